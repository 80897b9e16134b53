//! Hosted document database, treated as an opaque keyed store.
//!
//! `AppwriteStore` talks to an Appwrite-compatible REST API;
//! `MemoryDocumentStore` evaluates the same queries in process.

use crate::config::Config;
use crate::error::AppError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// Attribute the backend stamps on every document at creation.
pub const CREATED_AT_ATTRIBUTE: &str = "$createdAt";

const SERVICE: &str = "Document store";

/// Filter, ordering, or limit applied to a document listing.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Equal { attribute: String, values: Vec<Value> },
    OrderAsc(String),
    OrderDesc(String),
    Limit(u32),
    Or(Vec<Query>),
    And(Vec<Query>),
}

impl Query {
    pub fn equal(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Equal {
            attribute: attribute.into(),
            values: vec![value.into()],
        }
    }

    pub fn order_asc(attribute: impl Into<String>) -> Self {
        Self::OrderAsc(attribute.into())
    }

    pub fn order_desc(attribute: impl Into<String>) -> Self {
        Self::OrderDesc(attribute.into())
    }

    pub fn limit(limit: u32) -> Self {
        Self::Limit(limit)
    }

    pub fn or(queries: Vec<Query>) -> Self {
        Self::Or(queries)
    }

    pub fn and(queries: Vec<Query>) -> Self {
        Self::And(queries)
    }

    /// Wire form used in `queries[]` parameters.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Equal { attribute, values } => {
                json!({ "method": "equal", "attribute": attribute, "values": values })
            }
            Self::OrderAsc(attribute) => json!({ "method": "orderAsc", "attribute": attribute }),
            Self::OrderDesc(attribute) => json!({ "method": "orderDesc", "attribute": attribute }),
            Self::Limit(limit) => json!({ "method": "limit", "values": [limit] }),
            Self::Or(queries) => json!({
                "method": "or",
                "values": queries.iter().map(Query::to_json).collect::<Vec<_>>(),
            }),
            Self::And(queries) => json!({
                "method": "and",
                "values": queries.iter().map(Query::to_json).collect::<Vec<_>>(),
            }),
        }
    }

    /// Whether `doc` passes this filter. Orderings and limits always pass.
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Self::Equal { attribute, values } => doc
                .attribute(attribute)
                .map(|v| values.contains(v))
                .unwrap_or(false),
            Self::Or(queries) => queries.iter().any(|q| q.matches(doc)),
            Self::And(queries) => queries.iter().all(|q| q.matches(doc)),
            Self::OrderAsc(_) | Self::OrderDesc(_) | Self::Limit(_) => true,
        }
    }
}

/// One stored document: its id plus arbitrary fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Deserialize into a record type. The id is available as `$id`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let mut object = self.fields.clone();
        object.insert("$id".to_string(), Value::String(self.id.clone()));
        serde_json::from_value(Value::Object(object))
            .with_context(|| format!("Failed to decode document {}", self.id))
    }
}

/// Fresh document id in the backend's format (hex, no dashes).
pub fn new_document_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Keyed document collections.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn list_documents(&self, collection: &str, queries: &[Query]) -> Result<Vec<Document>>;

    async fn create_document(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<Document>;

    /// Merge `fields` into an existing document.
    async fn update_document(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<Document>;

    async fn delete_document(&self, collection: &str, id: &str) -> Result<()>;
}

// ==================== Appwrite REST ====================

#[derive(Debug, Deserialize)]
struct DocumentList {
    documents: Vec<Document>,
}

#[derive(Debug, Deserialize)]
struct BackendErrorBody {
    message: Option<String>,
}

/// The `message` of a backend error body, or the raw body when it has none.
pub(crate) fn backend_message(body: &str) -> String {
    serde_json::from_str::<BackendErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .unwrap_or_else(|| body.to_string())
}

/// Turn a non-success response into `AppError::Backend`, keeping the
/// backend's own message when the body has one.
pub(crate) async fn backend_error(service: &'static str, response: reqwest::Response) -> AppError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = backend_message(&body);
    AppError::Backend {
        service,
        status,
        message,
    }
}

/// Appwrite-compatible database client.
#[derive(Debug, Clone)]
pub struct AppwriteStore {
    client: reqwest::Client,
    endpoint: String,
    project_id: String,
    api_key: Option<String>,
    database_id: String,
}

impl AppwriteStore {
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        project_id: impl Into<String>,
        database_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            project_id: project_id.into(),
            api_key: None,
            database_id: database_id.into(),
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn from_config(client: reqwest::Client, config: &Config) -> Self {
        Self::new(
            client,
            &config.docstore_endpoint,
            &config.docstore_project_id,
            &config.database_id,
        )
        .with_api_key(config.docstore_api_key.clone())
    }

    fn documents_url(&self, collection: &str) -> String {
        format!(
            "{}/databases/{}/collections/{}/documents",
            self.endpoint, self.database_id, collection
        )
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let request = self
            .client
            .request(method, url)
            .header("X-Appwrite-Project", &self.project_id);
        match &self.api_key {
            Some(key) => request.header("X-Appwrite-Key", key),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder, action: &str) -> Result<reqwest::Response> {
        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to send {} request to document store", action))?;
        if !response.status().is_success() {
            return Err(backend_error(SERVICE, response).await.into());
        }
        Ok(response)
    }
}

#[async_trait]
impl DocumentStore for AppwriteStore {
    async fn list_documents(&self, collection: &str, queries: &[Query]) -> Result<Vec<Document>> {
        let params: Vec<(&str, String)> = queries
            .iter()
            .map(|q| ("queries[]", q.to_json().to_string()))
            .collect();
        let request = self
            .request(reqwest::Method::GET, &self.documents_url(collection))
            .query(&params);

        let list: DocumentList = self
            .send(request, "list")
            .await?
            .json()
            .await
            .context("Failed to parse document list")?;

        debug!("Listed {} documents from {}", list.documents.len(), collection);
        Ok(list.documents)
    }

    async fn create_document(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<Document> {
        let request = self
            .request(reqwest::Method::POST, &self.documents_url(collection))
            .json(&json!({ "documentId": id, "data": fields }));

        self.send(request, "create")
            .await?
            .json()
            .await
            .context("Failed to parse created document")
    }

    async fn update_document(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<Document> {
        let url = format!("{}/{}", self.documents_url(collection), id);
        let request = self
            .request(reqwest::Method::PATCH, &url)
            .json(&json!({ "data": fields }));

        self.send(request, "update")
            .await?
            .json()
            .await
            .context("Failed to parse updated document")
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<()> {
        let url = format!("{}/{}", self.documents_url(collection), id);
        self.send(self.request(reqwest::Method::DELETE, &url), "delete")
            .await?;
        Ok(())
    }
}

// ==================== In-memory ====================

/// Process-local store with the same query semantics as the hosted one.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: Mutex<HashMap<String, Vec<Document>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert documents as-is, stamping `$createdAt` where missing.
    pub fn seed(&self, collection: &str, documents: impl IntoIterator<Item = Document>) {
        let mut collections = self.lock();
        let docs = collections.entry(collection.to_string()).or_default();
        for mut doc in documents {
            stamp_created_at(&mut doc);
            docs.push(doc);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Document>>> {
        self.collections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn stamp_created_at(doc: &mut Document) {
    doc.fields
        .entry(CREATED_AT_ATTRIBUTE.to_string())
        .or_insert_with(|| Value::String(chrono::Utc::now().to_rfc3339()));
}

fn not_found(collection: &str, id: &str) -> anyhow::Error {
    AppError::Backend {
        service: SERVICE,
        status: 404,
        message: format!("Document {} not found in {}", id, collection),
    }
    .into()
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn list_documents(&self, collection: &str, queries: &[Query]) -> Result<Vec<Document>> {
        let mut docs: Vec<Document> = self
            .lock()
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| queries.iter().all(|q| q.matches(doc)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        // Stable sorts applied last-to-first leave the first ordering primary.
        for query in queries.iter().rev() {
            match query {
                Query::OrderAsc(attr) => {
                    docs.sort_by(|a, b| compare_values(a.attribute(attr), b.attribute(attr)))
                }
                Query::OrderDesc(attr) => {
                    docs.sort_by(|a, b| compare_values(b.attribute(attr), a.attribute(attr)))
                }
                _ => {}
            }
        }

        if let Some(limit) = queries.iter().find_map(|q| match q {
            Query::Limit(n) => Some(*n as usize),
            _ => None,
        }) {
            docs.truncate(limit);
        }

        Ok(docs)
    }

    async fn create_document(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<Document> {
        let mut collections = self.lock();
        let docs = collections.entry(collection.to_string()).or_default();
        if docs.iter().any(|d| d.id == id) {
            return Err(AppError::Backend {
                service: SERVICE,
                status: 409,
                message: format!("Document {} already exists", id),
            }
            .into());
        }
        let mut doc = Document::new(id, fields);
        stamp_created_at(&mut doc);
        docs.push(doc.clone());
        Ok(doc)
    }

    async fn update_document(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<Document> {
        let mut collections = self.lock();
        let doc = collections
            .get_mut(collection)
            .and_then(|docs| docs.iter_mut().find(|d| d.id == id))
            .ok_or_else(|| not_found(collection, id))?;
        doc.fields.extend(fields);
        Ok(doc.clone())
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<()> {
        let mut collections = self.lock();
        let docs = collections
            .get_mut(collection)
            .ok_or_else(|| not_found(collection, id))?;
        let before = docs.len();
        docs.retain(|d| d.id != id);
        if docs.len() == before {
            return Err(not_found(collection, id));
        }
        Ok(())
    }
}

/// Build a field map from a JSON object literal.
pub fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn doc(id: &str, value: Value) -> Document {
        Document::new(id, fields(value))
    }

    // ==================== Query Tests ====================

    #[test]
    fn test_query_wire_format() {
        assert_eq!(
            Query::equal("sender_id", "u1").to_json(),
            json!({"method": "equal", "attribute": "sender_id", "values": ["u1"]})
        );
        assert_eq!(
            Query::order_desc("created_at").to_json(),
            json!({"method": "orderDesc", "attribute": "created_at"})
        );
        assert_eq!(Query::limit(10).to_json(), json!({"method": "limit", "values": [10]}));
    }

    #[test]
    fn test_nested_query_wire_format() {
        let query = Query::or(vec![
            Query::and(vec![Query::equal("a", "1"), Query::equal("b", "2")]),
            Query::equal("c", "3"),
        ]);
        let json = query.to_json();
        assert_eq!(json["method"], "or");
        assert_eq!(json["values"][0]["method"], "and");
        assert_eq!(json["values"][0]["values"][1]["attribute"], "b");
        assert_eq!(json["values"][1]["values"][0], "3");
    }

    #[test]
    fn test_query_matches() {
        let d = doc("m1", json!({"sender_id": "u1", "receiver_id": "bot"}));
        assert!(Query::equal("sender_id", "u1").matches(&d));
        assert!(!Query::equal("sender_id", "u2").matches(&d));
        assert!(!Query::equal("missing", "u1").matches(&d));
        assert!(Query::or(vec![Query::equal("sender_id", "x"), Query::equal("receiver_id", "bot")]).matches(&d));
        assert!(!Query::and(vec![Query::equal("sender_id", "u1"), Query::equal("receiver_id", "x")]).matches(&d));
        assert!(Query::limit(1).matches(&d));
    }

    // ==================== Document Tests ====================

    #[derive(Debug, Deserialize)]
    struct Note {
        #[serde(rename = "$id")]
        id: String,
        title: String,
    }

    #[test]
    fn test_document_decode_includes_id() {
        let note: Note = doc("n1", json!({"title": "hello", "extra": 1})).decode().unwrap();
        assert_eq!(note.id, "n1");
        assert_eq!(note.title, "hello");
    }

    #[test]
    fn test_document_decode_error_names_document() {
        let err = doc("n2", json!({})).decode::<Note>().unwrap_err();
        assert!(err.to_string().contains("n2"));
    }

    #[test]
    fn test_document_deserializes_backend_shape() {
        let d: Document = serde_json::from_value(json!({
            "$id": "abc",
            "$createdAt": "2024-01-01T00:00:00.000+00:00",
            "task": "write tests"
        }))
        .unwrap();
        assert_eq!(d.id, "abc");
        assert_eq!(d.str_field("task"), Some("write tests"));
        assert!(d.attribute(CREATED_AT_ATTRIBUTE).is_some());
    }

    #[test]
    fn test_new_document_id_format() {
        let id = new_document_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, new_document_id());
    }

    // ==================== Memory Store Tests ====================

    #[tokio::test]
    async fn test_memory_list_filters_orders_and_limits() {
        let store = MemoryDocumentStore::new();
        store.seed(
            "tweets",
            vec![
                doc("t1", json!({"created_at": "2024-01-01", "username": "a"})),
                doc("t2", json!({"created_at": "2024-03-01", "username": "b"})),
                doc("t3", json!({"created_at": "2024-02-01", "username": "a"})),
            ],
        );

        let newest = store
            .list_documents("tweets", &[Query::order_desc("created_at"), Query::limit(2)])
            .await
            .unwrap();
        let ids: Vec<&str> = newest.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["t2", "t3"]);

        let by_a = store
            .list_documents("tweets", &[Query::equal("username", "a"), Query::order_asc("created_at")])
            .await
            .unwrap();
        let ids: Vec<&str> = by_a.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t3"]);
    }

    #[tokio::test]
    async fn test_memory_unknown_collection_is_empty() {
        let store = MemoryDocumentStore::new();
        assert!(store.list_documents("nope", &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_create_update_delete() {
        let store = MemoryDocumentStore::new();
        let created = store
            .create_document("todos", "d1", fields(json!({"task": "a", "status": "pending"})))
            .await
            .unwrap();
        assert!(created.attribute(CREATED_AT_ATTRIBUTE).is_some());

        let updated = store
            .update_document("todos", "d1", fields(json!({"status": "completed"})))
            .await
            .unwrap();
        assert_eq!(updated.str_field("status"), Some("completed"));
        assert_eq!(updated.str_field("task"), Some("a"));

        store.delete_document("todos", "d1").await.unwrap();
        assert!(store.list_documents("todos", &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_missing_document_is_404() {
        let store = MemoryDocumentStore::new();
        let err = store.delete_document("todos", "ghost").await.unwrap_err();
        assert_eq!(err.downcast_ref::<AppError>().unwrap().status_code(), 404);

        let err = store
            .update_document("todos", "ghost", Map::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[tokio::test]
    async fn test_memory_duplicate_id_rejected() {
        let store = MemoryDocumentStore::new();
        store.create_document("c", "d1", Map::new()).await.unwrap();
        let err = store.create_document("c", "d1", Map::new()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AppError>(),
            Some(AppError::Backend { status: 409, .. })
        ));
    }

    // ==================== Appwrite Store Tests ====================

    fn appwrite(server: &MockServer) -> AppwriteStore {
        AppwriteStore::new(reqwest::Client::new(), format!("{}/v1/", server.uri()), "proj", "db")
            .with_api_key(Some("secret".to_string()))
    }

    #[tokio::test]
    async fn test_appwrite_list_sends_queries_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/databases/db/collections/tweets/documents"))
            .and(header("X-Appwrite-Project", "proj"))
            .and(header("X-Appwrite-Key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total": 1,
                "documents": [{"$id": "t1", "text": "こんにちは"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let docs = appwrite(&server)
            .list_documents("tweets", &[Query::order_desc("created_at")])
            .await
            .unwrap();

        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].str_field("text"), Some("こんにちは"));

        let requests = server.received_requests().await.unwrap();
        let sent: Vec<Value> = requests[0]
            .url
            .query_pairs()
            .filter(|(k, _)| k == "queries[]")
            .map(|(_, v)| serde_json::from_str(&v).unwrap())
            .collect();
        assert_eq!(sent, vec![Query::order_desc("created_at").to_json()]);
    }

    #[tokio::test]
    async fn test_appwrite_create_wraps_data() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/databases/db/collections/todos/documents"))
            .and(body_json(json!({"documentId": "d1", "data": {"task": "a"}})))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"$id": "d1", "task": "a"})),
            )
            .mount(&server)
            .await;

        let created = appwrite(&server)
            .create_document("todos", "d1", fields(json!({"task": "a"})))
            .await
            .unwrap();
        assert_eq!(created.id, "d1");
    }

    #[tokio::test]
    async fn test_appwrite_update_and_delete_paths() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/v1/databases/db/collections/todos/documents/d1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"$id": "d1", "status": "completed"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/v1/databases/db/collections/todos/documents/d1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let store = appwrite(&server);
        let updated = store
            .update_document("todos", "d1", fields(json!({"status": "completed"})))
            .await
            .unwrap();
        assert_eq!(updated.str_field("status"), Some("completed"));
        store.delete_document("todos", "d1").await.unwrap();
    }

    #[tokio::test]
    async fn test_appwrite_error_maps_to_backend_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "message": "The current user is not authorized to perform the requested action.",
                "code": 401
            })))
            .mount(&server)
            .await;

        let err = appwrite(&server).list_documents("tweets", &[]).await.unwrap_err();
        match err.downcast_ref::<AppError>() {
            Some(AppError::Backend { status, message, .. }) => {
                assert_eq!(*status, 401);
                assert!(message.starts_with("The current user"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(err.to_string().contains("API error (401)"));
    }
}
