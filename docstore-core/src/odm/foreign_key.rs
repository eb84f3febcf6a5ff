//! Lazy foreign-key descriptor (spec §4.3, §9).
//!
//! Stores only the target's `related_field` value until [`ForeignKey::get`]
//! is called, at which point the related document is fetched once and
//! cached for the life of this descriptor — the "no query until you
//! actually follow the relation" behaviour the spec's §8 test asserts by
//! statement count. `related_field` defaults to `"_id"` (the common case,
//! a rowid join) but can name any field on the target model, matching
//! spec §3's `ForeignKey(fk_field, target_model, optional, related_field)`.
//!
//! `optional` follows the same spec §4.3 step list `get()` implements:
//! a `null`/missing local value, or a related row that has gone away, is
//! `Ok(None)` when `optional`, and `Err(Error::MissingRelation)` when not.
//! `Error::InvalidAssignment` is reserved for *assigning* `null` to a
//! required relationship (spec §7); reading a missing one is always
//! `MissingRelation`, never `InvalidAssignment`.

use super::model::Model;
use crate::error::{Error, Result};
use serde_json::Value;
use std::cell::OnceCell;

/// Sentinel `related_field` meaning "join on the target's `_id`" rather
/// than a declared document field.
const BY_ROWID: &str = "_id";

pub struct ForeignKey<T: Model> {
    value: Option<Value>,
    related_field: String,
    optional: bool,
    cache: OnceCell<T>,
}

impl<T: Model> ForeignKey<T> {
    /// A descriptor that joins on the target's `_id`.
    pub fn new(id: i64, optional: bool) -> Self {
        Self::on(Value::from(id), BY_ROWID, optional)
    }

    /// A descriptor that joins on an arbitrary declared field of the
    /// target model (spec's `related_field`).
    pub fn on(value: Value, related_field: impl Into<String>, optional: bool) -> Self {
        Self { value: Some(value), related_field: related_field.into(), optional, cache: OnceCell::new() }
    }

    pub fn unset(optional: bool) -> Self {
        Self { value: None, related_field: BY_ROWID.to_string(), optional, cache: OnceCell::new() }
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn is_set(&self) -> bool {
        self.value.is_some()
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// Point this descriptor at a different target, discarding any cached
    /// instance.
    pub fn set(&mut self, value: Value) {
        self.value = Some(value);
        self.cache = OnceCell::new();
    }

    /// Clear the relation. Only valid when `optional`; clearing a required
    /// relationship fails with [`Error::InvalidAssignment`] (spec §7).
    pub fn clear(&mut self) -> Result<()> {
        if !self.optional {
            return Err(Error::InvalidAssignment("cannot assign null to a required foreign key".to_string()));
        }
        self.value = None;
        self.cache = OnceCell::new();
        Ok(())
    }

    /// Fetch (and cache) the related instance. `Ok(None)` means the
    /// relationship is `optional` and currently absent (unset, or its
    /// target has been deleted); a required relationship in that state is
    /// [`Error::MissingRelation`] instead.
    pub fn get(&self) -> Result<Option<&T>> {
        let value = match &self.value {
            Some(v) => v.clone(),
            None if self.optional => return Ok(None),
            None => return Err(Error::MissingRelation(format!("{}: foreign key is unset", T::collection_name()))),
        };
        if let Some(v) = self.cache.get() {
            return Ok(Some(v));
        }
        let found = if self.related_field == BY_ROWID {
            let id = value
                .as_i64()
                .ok_or_else(|| Error::InvalidField("_id-keyed foreign key requires an integer value".to_string()))?;
            T::get_by_id(id)?
        } else {
            T::get(&[(self.related_field.as_str(), Some(value.clone()))])?
        };
        match found {
            Some(inst) => {
                let _ = self.cache.set(inst);
                Ok(self.cache.get())
            }
            None if self.optional => Ok(None),
            None => Err(Error::MissingRelation(format!("{} where {} = {value}", T::collection_name(), self.related_field))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::odm::{bind_database, unbind_database, FieldSpec, FieldType};
    use serde_json::{json, Map, Value};

    struct Tag {
        id: Option<i64>,
        name: String,
    }

    impl Model for Tag {
        fn indexed_fields() -> Vec<String> {
            vec![]
        }
        fn fields() -> &'static [FieldSpec] {
            static FIELDS: &[FieldSpec] = &[FieldSpec::new("name", FieldType::String)];
            FIELDS
        }
        fn id(&self) -> Option<i64> {
            self.id
        }
        fn set_id(&mut self, id: i64) {
            self.id = Some(id);
        }
        fn to_fields(&self) -> Result<Map<String, Value>> {
            let mut m = Map::new();
            m.insert("name".to_string(), json!(self.name));
            Ok(m)
        }
        fn from_fields(id: i64, fields: Map<String, Value>) -> Result<Self> {
            Ok(Tag {
                id: Some(id),
                name: fields.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
            })
        }
    }

    #[test]
    fn fetches_once_and_caches() {
        let _guard = super::super::test_lock().lock().unwrap();
        let db = Database::open_in_memory().unwrap();
        bind_database(db);
        let mut tag = Tag { id: None, name: "rust".to_string() };
        tag.save().unwrap();
        let fk: ForeignKey<Tag> = ForeignKey::new(tag.id().unwrap(), false);
        assert_eq!(fk.get().unwrap().unwrap().name, "rust");
        assert_eq!(fk.get().unwrap().unwrap().name, "rust");
        unbind_database();
    }

    #[test]
    fn unset_required_get_is_missing_relation() {
        let fk: ForeignKey<Tag> = ForeignKey::unset(false);
        assert!(matches!(fk.get(), Err(Error::MissingRelation(_))));
    }

    #[test]
    fn unset_optional_get_is_none() {
        let fk: ForeignKey<Tag> = ForeignKey::unset(true);
        assert!(fk.get().unwrap().is_none());
    }

    #[test]
    fn clearing_a_required_key_is_invalid_assignment() {
        let mut fk: ForeignKey<Tag> = ForeignKey::new(1, false);
        assert!(matches!(fk.clear(), Err(Error::InvalidAssignment(_))));
    }

    #[test]
    fn clearing_an_optional_key_succeeds() {
        let mut fk: ForeignKey<Tag> = ForeignKey::new(1, true);
        fk.clear().unwrap();
        assert!(!fk.is_set());
    }

    #[test]
    fn optional_key_pointing_at_a_deleted_row_is_none() {
        let _guard = super::super::test_lock().lock().unwrap();
        let db = Database::open_in_memory().unwrap();
        bind_database(db);
        let fk: ForeignKey<Tag> = ForeignKey::new(999, true);
        assert!(fk.get().unwrap().is_none());
        unbind_database();
    }
}
