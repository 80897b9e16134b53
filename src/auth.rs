//! Accounts, user profiles, and the signed-in session.

use crate::config::Config;
use crate::docstore::{backend_message, fields, new_document_id, DocumentStore, Query};
use crate::error::AppError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};

const SIGN_IN_FAILED: &str = "Failed to sign in";
const SIGN_UP_FAILED: &str = "Failed to create account";

/// Profile document kept alongside the auth account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(rename = "accountId")]
    pub account_id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub username: String,
}

/// Who is signed in. Created once at startup and handed to every service
/// that acts on behalf of a user.
#[derive(Debug, Default)]
pub struct SessionContext {
    user: RwLock<Option<UserProfile>>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sign_in_as(&self, profile: UserProfile) {
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = Some(profile);
    }

    pub fn sign_out(&self) {
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        self.user
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.current_user().is_some()
    }

    pub fn require_user(&self) -> std::result::Result<UserProfile, AppError> {
        self.current_user().ok_or(AppError::NotSignedIn)
    }
}

pub fn validate_credentials(email: &str, password: &str) -> std::result::Result<(), AppError> {
    if email.trim().is_empty() || password.is_empty() {
        return Err(AppError::invalid_input("Please fill in all fields"));
    }
    Ok(())
}

pub fn validate_sign_up(
    username: &str,
    email: &str,
    password: &str,
) -> std::result::Result<(), AppError> {
    if username.trim().is_empty() {
        return Err(AppError::invalid_input("Please fill in all fields"));
    }
    validate_credentials(email, password)
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    #[serde(rename = "userId")]
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    #[serde(rename = "$id")]
    id: String,
}

/// Client for the hosted account API (email/password auth).
#[derive(Debug, Clone)]
pub struct AccountClient {
    client: reqwest::Client,
    endpoint: String,
    project_id: String,
}

impl AccountClient {
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            project_id: project_id.into(),
        }
    }

    pub fn from_config(client: reqwest::Client, config: &Config) -> Self {
        Self::new(client, &config.docstore_endpoint, &config.docstore_project_id)
    }

    /// Open an email/password session; returns the account id.
    pub async fn create_session(&self, email: &str, password: &str) -> Result<String> {
        let response = self
            .post("/account/sessions/email", json!({ "email": email, "password": password }))
            .await?;
        if !response.status().is_success() {
            return Err(auth_error(response, SIGN_IN_FAILED).await.into());
        }
        let session: SessionResponse = response
            .json()
            .await
            .context("Failed to parse session response")?;
        Ok(session.user_id)
    }

    /// Register a new account; returns its id.
    pub async fn create_account(&self, email: &str, password: &str, name: &str) -> Result<String> {
        let body = json!({
            "userId": "unique()",
            "email": email,
            "password": password,
            "name": name,
        });
        let response = self.post("/account", body).await?;
        if !response.status().is_success() {
            return Err(auth_error(response, SIGN_UP_FAILED).await.into());
        }
        let account: AccountResponse = response
            .json()
            .await
            .context("Failed to parse account response")?;
        Ok(account.id)
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<reqwest::Response> {
        self.client
            .post(format!("{}{}", self.endpoint, path))
            .header("X-Appwrite-Project", &self.project_id)
            .json(&body)
            .send()
            .await
            .context("Failed to send request to account API")
    }
}

async fn auth_error(response: reqwest::Response, generic: &str) -> AppError {
    let body = response.text().await.unwrap_or_default();
    AppError::auth(Some(&backend_message(&body)), generic)
}

/// Sign-in and sign-up flows tying accounts to profile documents.
pub struct AuthService {
    accounts: AccountClient,
    store: Arc<dyn DocumentStore>,
    users_collection: String,
    session: Arc<SessionContext>,
}

impl AuthService {
    pub fn new(
        accounts: AccountClient,
        store: Arc<dyn DocumentStore>,
        users_collection: impl Into<String>,
        session: Arc<SessionContext>,
    ) -> Self {
        Self {
            accounts,
            store,
            users_collection: users_collection.into(),
            session,
        }
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<UserProfile> {
        validate_credentials(email, password)?;
        let account_id = self.accounts.create_session(email.trim(), password).await?;
        let profile = self
            .find_profile(&account_id)
            .await?
            .ok_or_else(|| AppError::auth(None, SIGN_IN_FAILED))?;

        info!("Signed in as {}", profile.username);
        self.session.sign_in_as(profile.clone());
        Ok(profile)
    }

    /// Create the account, sign in, then create its profile document.
    pub async fn sign_up(&self, email: &str, password: &str, username: &str) -> Result<UserProfile> {
        validate_sign_up(username, email, password)?;
        let email = email.trim();
        let username = username.trim();

        let account_id = self.accounts.create_account(email, password, username).await?;
        self.accounts.create_session(email, password).await?;

        let doc = self
            .store
            .create_document(
                &self.users_collection,
                &new_document_id(),
                fields(json!({
                    "accountId": account_id,
                    "email": email,
                    "username": username,
                })),
            )
            .await
            .context("Failed to create user profile")?;
        let profile: UserProfile = doc.decode()?;

        info!("Created account for {}", profile.username);
        self.session.sign_in_as(profile.clone());
        Ok(profile)
    }

    pub fn sign_out(&self) {
        self.session.sign_out();
    }

    /// Re-read the signed-in user's profile. Lookup failures are logged and
    /// treated as signed out.
    pub async fn current_user(&self) -> Option<UserProfile> {
        let account_id = self.session.current_user()?.account_id;
        match self.find_profile(&account_id).await {
            Ok(Some(profile)) => {
                self.session.sign_in_as(profile.clone());
                Some(profile)
            }
            Ok(None) => {
                self.session.sign_out();
                None
            }
            Err(e) => {
                warn!("Error getting current user: {:#}", e);
                None
            }
        }
    }

    async fn find_profile(&self, account_id: &str) -> Result<Option<UserProfile>> {
        let docs = self
            .store
            .list_documents(
                &self.users_collection,
                &[Query::equal("accountId", account_id), Query::limit(1)],
            )
            .await
            .context("Failed to look up user profile")?;
        docs.first().map(|doc| doc.decode()).transpose()
    }
}
