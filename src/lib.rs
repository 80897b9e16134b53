pub mod auth;
pub mod chat;
pub mod config;
pub mod docstore;
pub mod error;
pub mod feed;
pub mod retry;
pub mod security;
pub mod server;
pub mod storage;
pub mod todo;
pub mod translation;
