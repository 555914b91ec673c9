//! Local memory store for AI coding agents.
//!
//! Notes (free text plus tags and an embedding) are scoped by project and
//! group, searched by cosine similarity, and isolated by an embedding
//! namespace `"{provider}:{model}:{dim}"`. Three interchangeable backends
//! implement one [`store::Store`] contract:
//!
//! | Backend | Persistence | Search |
//! |---------|-------------|--------|
//! | `memory` | none | brute force |
//! | `sqlite` | one local file, any number of namespaces | brute force |
//! | `qdrant` | remote server, three collections per namespace | server-side filters + ANN |
//!
//! All three return the same ids and scores for the same inputs; the in-memory
//! backend is the reference the others are tested against.
//!
//! # Modules
//!
//! - [`config`] — Configuration loading from TOML files and environment variables
//! - [`db`] — SQLite database opening, schema, and migrations
//! - [`embedding`] — Embedding provider seam and one-shot dimension discovery
//! - [`error`] — [`StoreError`](error::StoreError) and its sentinel conditions
//! - [`model`] — Note, GlobalConfig, and Group records with validation
//! - [`namespace`] — Namespace strings and collection-name sanitizing
//! - [`store`] — The `Store` trait, shared search/list algorithms, and backends

pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod model;
pub mod namespace;
pub mod store;

pub use error::{Result, StoreError};
pub use store::{open_store, ListOptions, SearchOptions, SearchResult, Store};
