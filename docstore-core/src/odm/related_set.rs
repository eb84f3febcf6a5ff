//! One-to-many relation manager (spec §4.3, §9).
//!
//! The "many" side is just documents in `T`'s collection whose foreign-key
//! field equals the owner's `_id`; this type is a thin, named-method
//! wrapper around that query (`add`/`remove`/`clear`) so callers don't
//! reach for direct assignment, which the spec disallows for this
//! descriptor kind.

use super::model::{Filter, Model};
use super::with_database;
use crate::error::{Error, Result};
use serde_json::Value;
use std::marker::PhantomData;

pub struct RelatedSet<T: Model> {
    owner_id: i64,
    foreign_field: String,
    _marker: PhantomData<T>,
}

impl<T: Model> RelatedSet<T> {
    pub fn new(owner_id: i64, foreign_field: impl Into<String>) -> Self {
        Self { owner_id, foreign_field: foreign_field.into(), _marker: PhantomData }
    }

    /// All members currently pointing at the owner, optionally capped at
    /// `limit` rows.
    pub fn all(&self, limit: Option<i64>) -> Result<Vec<T>> {
        self.filter(&[], limit)
    }

    /// Members pointing at the owner that also satisfy `filters` (spec
    /// §4.3's `filter(**filters, limit)`), offset-free since this
    /// descriptor has no notion of a cursor.
    pub fn filter(&self, filters: &[Filter<'_>], limit: Option<i64>) -> Result<Vec<T>> {
        let mut conditions = Vec::with_capacity(filters.len() + 1);
        conditions.push((self.foreign_field.as_str(), Some(Value::from(self.owner_id))));
        conditions.extend_from_slice(filters);
        T::filter(&conditions, limit, None)
    }

    pub fn count(&self) -> Result<usize> {
        T::count(&[(self.foreign_field.as_str(), Some(Value::from(self.owner_id)))])
    }

    /// Synonym for [`RelatedSet::count`] (spec §4.3: "count(), ...
    /// iteration, and length").
    pub fn len(&self) -> Result<usize> {
        self.count()
    }

    /// Point `child_id`'s foreign-key field at the owner.
    pub fn add(&self, child_id: i64) -> Result<()> {
        with_database(|db| {
            let coll = db.collection(&T::collection_name(), &T::indexed_fields())?;
            let mut doc = coll
                .get_by_id(child_id)?
                .ok_or_else(|| Error::MissingRelation(format!("{} #{child_id}", T::collection_name())))?;
            match doc.as_object_mut() {
                Some(obj) => {
                    obj.insert(self.foreign_field.clone(), Value::from(self.owner_id));
                }
                None => return Err(Error::InvalidDocument(format!("row {child_id} is not a JSON object"))),
            }
            coll.write_data(child_id, &doc)
        })
    }

    /// Clear `child_id`'s foreign-key field.
    pub fn remove(&self, child_id: i64) -> Result<()> {
        with_database(|db| {
            let coll = db.collection(&T::collection_name(), &T::indexed_fields())?;
            let mut doc = coll
                .get_by_id(child_id)?
                .ok_or_else(|| Error::MissingRelation(format!("{} #{child_id}", T::collection_name())))?;
            match doc.as_object_mut() {
                Some(obj) => {
                    obj.insert(self.foreign_field.clone(), Value::Null);
                }
                None => return Err(Error::InvalidDocument(format!("row {child_id} is not a JSON object"))),
            }
            coll.write_data(child_id, &doc)
        })
    }

    /// Detach every current member.
    pub fn clear(&self) -> Result<()> {
        for member in self.all(None)? {
            if let Some(id) = member.id() {
                self.remove(id)?;
            }
        }
        Ok(())
    }

    /// Direct assignment is not supported; use `add`/`remove`/`clear`.
    pub fn set(&self, _items: &[T]) -> Result<()> {
        Err(Error::UnsupportedOperation(
            "RelatedSet does not support direct assignment; use add()/remove()/clear()".to_string(),
        ))
    }
}

/// Eagerly fetches every member (unbounded), then yields them one at a
/// time — a single lookup failure surfaces as one `Err` item rather than
/// aborting the `for` loop silently, matching the `Result<M>` iteration
/// style `Paginator` already uses.
impl<T: Model> IntoIterator for &RelatedSet<T> {
    type Item = Result<T>;
    type IntoIter = std::vec::IntoIter<Result<T>>;

    fn into_iter(self) -> Self::IntoIter {
        match self.all(None) {
            Ok(items) => items.into_iter().map(Ok).collect::<Vec<_>>().into_iter(),
            Err(e) => vec![Err(e)].into_iter(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::odm::{bind_database, unbind_database, FieldSpec, FieldType};
    use serde_json::{json, Map};

    struct Comment {
        id: Option<i64>,
        post_id: i64,
        body: String,
    }

    impl Model for Comment {
        fn indexed_fields() -> Vec<String> {
            vec!["post_id".to_string()]
        }
        fn fields() -> &'static [FieldSpec] {
            static FIELDS: &[FieldSpec] =
                &[FieldSpec::new("post_id", FieldType::Integer), FieldSpec::new("body", FieldType::String)];
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
            m.insert("post_id".to_string(), json!(self.post_id));
            m.insert("body".to_string(), json!(self.body));
            Ok(m)
        }
        fn from_fields(id: i64, fields: Map<String, Value>) -> Result<Self> {
            Ok(Comment {
                id: Some(id),
                post_id: fields.get("post_id").and_then(Value::as_i64).unwrap_or(0),
                body: fields.get("body").and_then(Value::as_str).unwrap_or_default().to_string(),
            })
        }
    }

    fn seeded(owner_id: i64) -> RelatedSet<Comment> {
        let mut first = Comment { id: None, post_id: owner_id, body: "first".to_string() };
        let mut second = Comment { id: None, post_id: owner_id, body: "second".to_string() };
        first.save().unwrap();
        second.save().unwrap();
        let mut other = Comment { id: None, post_id: owner_id + 1, body: "unrelated".to_string() };
        other.save().unwrap();
        RelatedSet::new(owner_id, "post_id")
    }

    #[test]
    fn all_and_count_and_len_agree() {
        let _guard = super::super::test_lock().lock().unwrap();
        let db = Database::open_in_memory().unwrap();
        bind_database(db);
        let set = seeded(1);
        assert_eq!(set.all(None).unwrap().len(), 2);
        assert_eq!(set.count().unwrap(), 2);
        assert_eq!(set.len().unwrap(), 2);
        unbind_database();
    }

    #[test]
    fn all_respects_limit() {
        let _guard = super::super::test_lock().lock().unwrap();
        let db = Database::open_in_memory().unwrap();
        bind_database(db);
        let set = seeded(1);
        assert_eq!(set.all(Some(1)).unwrap().len(), 1);
        unbind_database();
    }

    #[test]
    fn filter_narrows_within_the_owner() {
        let _guard = super::super::test_lock().lock().unwrap();
        let db = Database::open_in_memory().unwrap();
        bind_database(db);
        let set = seeded(1);
        let matches = set.filter(&[("body", Some(json!("first")))], None).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].body, "first");
        unbind_database();
    }

    #[test]
    fn add_remove_and_clear_reassign_membership() {
        let _guard = super::super::test_lock().lock().unwrap();
        let db = Database::open_in_memory().unwrap();
        bind_database(db);
        let set = seeded(1);
        let mut stray = Comment { id: None, post_id: 99, body: "stray".to_string() };
        stray.save().unwrap();

        set.add(stray.id().unwrap()).unwrap();
        assert_eq!(set.count().unwrap(), 3);

        set.remove(stray.id().unwrap()).unwrap();
        assert_eq!(set.count().unwrap(), 2);

        set.clear().unwrap();
        assert_eq!(set.count().unwrap(), 0);
        unbind_database();
    }

    #[test]
    fn iteration_yields_every_member() {
        let _guard = super::super::test_lock().lock().unwrap();
        let db = Database::open_in_memory().unwrap();
        bind_database(db);
        let set = seeded(1);
        let bodies: Vec<String> = (&set).into_iter().map(|r| r.unwrap().body).collect();
        assert_eq!(bodies.len(), 2);
        unbind_database();
    }

    #[test]
    fn set_is_unsupported() {
        let set: RelatedSet<Comment> = RelatedSet::new(1, "post_id");
        assert!(matches!(set.set(&[]), Err(Error::UnsupportedOperation(_))));
    }
}
