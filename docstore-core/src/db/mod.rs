//! Storage layer: connection management, transactions, collections, and
//! the query compiler (spec §4.1, §4.2, §4.4).

pub mod collection;
pub mod database;
pub mod dialect;
pub mod query;
pub mod transaction;

pub use collection::{Collection, CollectionStats, CursorPage, ExplainStep};
pub use database::Database;
pub use query::Lookup;
pub use transaction::TxStatus;
