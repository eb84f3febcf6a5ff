//! Object-document mapping (spec §4.3, §9).
//!
//! Typed models bind to a single process-wide database handle rather than
//! carrying their own reference — the same ergonomics the spec's source
//! languages get from a module-level "current connection" global. Call
//! [`bind_database`] once at startup (or per test) and [`unbind_database`]
//! to detach it again; every `Model`/`ForeignKey`/`RelatedSet`/`ManyToMany`
//! method raises [`crate::error::Error::DatabaseNotBound`] until a database
//! is bound.

mod foreign_key;
mod lookup;
mod many_to_many;
mod model;
mod pluralize;
mod related_set;

pub use foreign_key::ForeignKey;
pub use lookup::{parse_lookup_key, LookupKey};
pub use many_to_many::ManyToMany;
pub use model::{FieldSpec, FieldType, Filter, Model, Paginator};
pub use related_set::RelatedSet;

use crate::db::Database;
use crate::error::{Error, Result};
use std::sync::{Arc, RwLock};

static BOUND_DATABASE: RwLock<Option<Arc<Database>>> = RwLock::new(None);

/// Bind the database every `Model` method will use until
/// [`unbind_database`] is called (or another `bind_database` replaces it).
pub fn bind_database(db: Arc<Database>) {
    *BOUND_DATABASE.write().unwrap() = Some(db);
}

/// Detach the currently bound database, if any.
pub fn unbind_database() {
    *BOUND_DATABASE.write().unwrap() = None;
}

/// Whether a database is currently bound.
pub fn is_bound() -> bool {
    BOUND_DATABASE.read().unwrap().is_some()
}

/// Run `f` with the bound database, or raise [`Error::DatabaseNotBound`].
pub(crate) fn with_database<F, T>(f: F) -> Result<T>
where
    F: FnOnce(&Arc<Database>) -> Result<T>,
{
    let guard = BOUND_DATABASE.read().unwrap();
    let db = guard.as_ref().ok_or(Error::DatabaseNotBound)?;
    f(db)
}

/// Serializes tests that touch [`BOUND_DATABASE`] — it's process-wide, so
/// tests across modules in the same test binary would otherwise race.
#[cfg(test)]
pub(crate) fn test_lock() -> &'static std::sync::Mutex<()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    &LOCK
}
