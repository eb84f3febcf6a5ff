//! Error types for docstore-core

use thiserror::Error;

/// Closed error taxonomy for the document storage engine.
///
/// Every operation that can fail raises exactly one of these variants; the
/// library never swallows an error silently. `Database` and `Json` are
/// catch-alls for engine/serialization failures that do not map onto a
/// named variant below — `DatabaseLocked` is still raised explicitly by
/// inspecting the SQLite error code before it would otherwise fall through
/// to `Database`.
#[derive(Error, Debug)]
pub enum Error {
    /// Value passed to insert/update was not a JSON object, or could not
    /// be serialized.
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// An empty/invalid field name was used, or a value of `null` was
    /// supplied where disallowed.
    #[error("invalid field: {0}")]
    InvalidField(String),

    /// A collection was reopened with an indexed-field set that does not
    /// match the one its table was created with.
    #[error("collection `{collection}` has indexed fields {existing:?}, but {requested:?} was requested")]
    IndexSchemaMismatch {
        collection: String,
        existing: Vec<String>,
        requested: Vec<String>,
    },

    /// `begin()` called while already in a transaction, or
    /// `commit()`/`rollback()` called while idle.
    #[error("invalid transaction state: {0}")]
    InvalidTransactionState(String),

    /// The underlying engine reported `SQLITE_BUSY`/`SQLITE_LOCKED` after
    /// the configured busy timeout elapsed.
    #[error("database is locked")]
    DatabaseLocked,

    /// An ODM operation was attempted with no database bound via
    /// [`crate::odm::bind_database`].
    #[error("no database is bound; call bind_database() first")]
    DatabaseNotBound,

    /// `delete()` was called on a model instance that was never saved
    /// (has no `_id`).
    #[error("cannot delete an instance with no assigned id")]
    UnsavedInstance,

    /// A required `ForeignKey` target could not be found.
    #[error("missing relation: {0}")]
    MissingRelation(String),

    /// `null` was assigned to a non-optional relationship descriptor.
    #[error("invalid assignment: {0}")]
    InvalidAssignment(String),

    /// A filter key used a `__op` suffix this engine does not recognise.
    #[error("unknown lookup operator: {0}")]
    UnknownLookup(String),

    /// `delete_many` was called with no filters.
    #[error("delete_many requires at least one filter")]
    MissingPredicate,

    /// Structural coercion between a JSON value and a typed ODM field
    /// failed.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Direct assignment to a `RelatedSet`/`ManyToMany` descriptor was
    /// attempted; use `add`/`remove`/`clear` instead.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Underlying SQL engine error not covered by a named variant above.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error (opening the database file, config, or log directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode error not covered by `SerializationError`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration file could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Translate a raw `rusqlite` error into `DatabaseLocked` when it
    /// represents a busy/locked condition, otherwise wrap it unchanged.
    pub(crate) fn from_sqlite(err: rusqlite::Error) -> Error {
        if let rusqlite::Error::SqliteFailure(sqlite_err, _) = &err {
            use rusqlite::ErrorCode;
            if matches!(sqlite_err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) {
                return Error::DatabaseLocked;
            }
        }
        Error::Database(err)
    }
}

/// Result type alias for docstore-core
pub type Result<T> = std::result::Result<T, Error>;
