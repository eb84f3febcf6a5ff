//! # docstore-core
//!
//! A schemaless document database engine built on an embedded SQL engine
//! with JSON support. Collections are SQLite tables with one JSON `data`
//! column and generated virtual columns backing any indexed fields; a
//! query compiler routes predicates through the index when it can and
//! falls back to a `json_extract` scan otherwise.
//!
//! ## Architecture
//!
//! - [`db`]: connection management, the transaction/savepoint controller,
//!   collection storage and indexing, and the query compiler.
//! - [`odm`]: a typed `Model` trait layered on top of `db`, with lazy
//!   foreign keys, one-to-many `RelatedSet`s, and `ManyToMany` junctions.
//! - [`config`] / [`logging`] / [`error`]: the ambient stack shared by
//!   both layers above.
//!
//! ## Example
//!
//! ```rust,no_run
//! use docstore_core::{Database, EngineConfig};
//! use serde_json::json;
//!
//! let config = EngineConfig::load().expect("failed to load config");
//! let db = Database::open(config.database_path()).expect("failed to open database");
//!
//! let users = db.collection("users", &["email".to_string()]).expect("open collection");
//! let id = users.insert(&json!({"email": "a@example.com", "name": "Ada"})).unwrap();
//! let found = users.search("email", &json!("a@example.com")).unwrap();
//! assert_eq!(found[0].0, id);
//! ```

pub use config::EngineConfig;
pub use db::{Collection, CollectionStats, CursorPage, Database, ExplainStep, Lookup, TxStatus};
pub use error::{Error, Result};

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod odm;
