//! Many-to-many relation manager (spec §4.3, §9).
//!
//! Backed by a junction collection holding `{left_field, right_field}`
//! pairs — an ordinary collection, not a SQL join table, so it gets the
//! same indexing and transaction behaviour as any other collection.

use super::model::Model;
use super::with_database;
use crate::error::Result;
use serde_json::{json, Value};
use std::marker::PhantomData;

pub struct ManyToMany<T: Model> {
    owner_id: i64,
    junction: String,
    left_field: String,
    right_field: String,
    _marker: PhantomData<T>,
}

impl<T: Model> ManyToMany<T> {
    pub fn new(owner_id: i64, junction: impl Into<String>, left_field: impl Into<String>, right_field: impl Into<String>) -> Self {
        Self {
            owner_id,
            junction: junction.into(),
            left_field: left_field.into(),
            right_field: right_field.into(),
            _marker: PhantomData,
        }
    }

    fn junction_indexed_fields(&self) -> Vec<String> {
        vec![self.left_field.clone(), self.right_field.clone()]
    }

    /// Every related instance currently linked to the owner.
    pub fn all(&self) -> Result<Vec<T>> {
        let ids = self.linked_ids()?;
        ids.into_iter().filter_map(|id| T::get_by_id(id).transpose()).collect()
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.linked_ids()?.len())
    }

    /// Whether the owner is currently linked to `other_id`.
    pub fn contains(&self, other_id: i64) -> Result<bool> {
        with_database(|db| {
            let coll = db.collection(&self.junction, &self.junction_indexed_fields())?;
            let rows = coll.search_optimized(&[
                (self.left_field.clone(), crate::db::Lookup::Eq, Some(Value::from(self.owner_id))),
                (self.right_field.clone(), crate::db::Lookup::Eq, Some(Value::from(other_id))),
            ])?;
            Ok(!rows.is_empty())
        })
    }

    fn linked_ids(&self) -> Result<Vec<i64>> {
        with_database(|db| {
            let coll = db.collection(&self.junction, &self.junction_indexed_fields())?;
            let rows = coll.search(&self.left_field, &Value::from(self.owner_id))?;
            Ok(rows
                .into_iter()
                .filter_map(|(_, doc)| doc.get(&self.right_field).and_then(Value::as_i64))
                .collect())
        })
    }

    /// Link the owner to `other_id`, if not already linked.
    pub fn add(&self, other_id: i64) -> Result<()> {
        with_database(|db| {
            let coll = db.collection(&self.junction, &self.junction_indexed_fields())?;
            let existing = coll.search_optimized(&[
                (self.left_field.clone(), crate::db::Lookup::Eq, Some(Value::from(self.owner_id))),
                (self.right_field.clone(), crate::db::Lookup::Eq, Some(Value::from(other_id))),
            ])?;
            if existing.is_empty() {
                let mut doc = serde_json::Map::new();
                doc.insert(self.left_field.clone(), json!(self.owner_id));
                doc.insert(self.right_field.clone(), json!(other_id));
                coll.insert(&Value::Object(doc))?;
            }
            Ok(())
        })
    }

    /// Unlink the owner from `other_id`.
    pub fn remove(&self, other_id: i64) -> Result<()> {
        with_database(|db| {
            let coll = db.collection(&self.junction, &self.junction_indexed_fields())?;
            let rows = coll.search_optimized(&[
                (self.left_field.clone(), crate::db::Lookup::Eq, Some(Value::from(self.owner_id))),
                (self.right_field.clone(), crate::db::Lookup::Eq, Some(Value::from(other_id))),
            ])?;
            for (id, _) in rows {
                coll.remove_by_id(id)?;
            }
            Ok(())
        })
    }

    /// Unlink every current member.
    pub fn clear(&self) -> Result<()> {
        with_database(|db| {
            let coll = db.collection(&self.junction, &self.junction_indexed_fields())?;
            let rows = coll.search(&self.left_field, &Value::from(self.owner_id))?;
            for (id, _) in rows {
                coll.remove_by_id(id)?;
            }
            Ok(())
        })
    }

    /// Direct assignment is not supported; use `add`/`remove`/`clear`.
    pub fn set(&self, _items: &[T]) -> Result<()> {
        Err(crate::error::Error::UnsupportedOperation(
            "ManyToMany does not support direct assignment; use add()/remove()/clear()".to_string(),
        ))
    }
}
