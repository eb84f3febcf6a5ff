//! The typed document mapping trait (spec §4.3).
//!
//! A `Model` impl is the Rust stand-in for the spec's "declarative
//! document class": it names its collection, which fields are indexed,
//! and how to convert between itself and the JSON document stored in that
//! collection. The CRUD methods below are default trait methods so a
//! `#[derive]`-free `impl Model for T` gets `save`/`find`/`all`/`delete`
//! for free, routed through whichever database is currently bound via
//! [`crate::odm::bind_database`].

use super::lookup::parse_lookup_key;
use super::with_database;
use crate::db::Lookup;
use crate::error::{Error, Result};
use serde_json::{Map, Value};

/// A `field` or `field__op` key paired with its comparison value, the
/// Rust stand-in for the spec's `**filters` keyword arguments (spec
/// §4.3). `None` is only meaningful for `field__isnull`, which treats a
/// missing value as `true`.
pub type Filter<'a> = (&'a str, Option<Value>);

/// Page size used by [`Model::paginate`]'s internally chunked fetch
/// (spec §4.3: "a lazy finite sequence that internally fetches in chunks
/// of 100").
const PAGINATE_CHUNK: i64 = 100;

/// A declared field's type (spec §3/§9): scalars, an optional wrapper,
/// homogeneous sequences/mappings, or a nested document type, named by its
/// collection rather than a Rust type parameter so `FieldSpec` stays
/// `'static` and object-safe-friendly.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    Bool,
    Integer,
    Float,
    String,
    Optional(Box<FieldType>),
    Sequence(Box<FieldType>),
    Mapping(Box<FieldType>),
    Document(&'static str),
}

/// One entry of a model's declared field list: name, type, and default
/// (spec §3's "ordered list of typed fields (name, declared type,
/// default)"). `default` of `None` means the field is required.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: &'static str,
    pub field_type: FieldType,
    pub default: Option<Value>,
}

impl FieldSpec {
    pub const fn new(name: &'static str, field_type: FieldType) -> Self {
        Self { name, field_type, default: None }
    }

    pub fn with_default(name: &'static str, field_type: FieldType, default: Value) -> Self {
        Self { name, field_type, default: Some(default) }
    }
}

fn compile_filters(filters: &[Filter<'_>]) -> Result<Vec<(String, Lookup, Option<Value>)>> {
    filters
        .iter()
        .map(|(key, value)| {
            let lk = parse_lookup_key(key)?;
            Ok((lk.field, lk.op, value.clone()))
        })
        .collect()
}

/// A type that maps onto one collection.
pub trait Model: Sized {
    /// The collection this type's instances are stored in. Defaults to
    /// the pluralized, snake_cased type name (`BlogPost` -> `blog_posts`);
    /// override when that heuristic guesses wrong.
    fn collection_name() -> String {
        let full = std::any::type_name::<Self>();
        let short = full.rsplit("::").next().unwrap_or(full);
        super::pluralize::pluralize(&super::pluralize::to_snake_case(short))
    }

    /// Fields that should be backed by a generated index column.
    fn indexed_fields() -> Vec<String>;

    /// The model's declared fields (name, type, default) in source order —
    /// the Rust stand-in for the spec's class-body field list (spec §3).
    fn fields() -> &'static [FieldSpec];

    /// The instance's `_id`, or `None` if it has never been saved.
    fn id(&self) -> Option<i64>;

    /// Called once after a successful insert to record the assigned id.
    fn set_id(&mut self, id: i64);

    /// Serialize the typed fields (excluding `_id`) into a document map.
    fn to_fields(&self) -> Result<Map<String, Value>>;

    /// Reconstruct an instance from its `_id` and stored document map.
    fn from_fields(id: i64, fields: Map<String, Value>) -> Result<Self>;

    /// Insert (if unsaved) or fully overwrite (if saved) this instance.
    /// Returns the `_id`.
    fn save(&mut self) -> Result<i64> {
        with_database(|db| {
            let coll = db.collection(&Self::collection_name(), &Self::indexed_fields())?;
            let fields = self.to_fields()?;
            let doc = Value::Object(fields);
            match self.id() {
                Some(id) => {
                    coll.write_data(id, &doc)?;
                    Ok(id)
                }
                None => {
                    let id = coll.insert(&doc)?;
                    self.set_id(id);
                    Ok(id)
                }
            }
        })
    }

    /// Delete this instance. Errors with [`Error::UnsavedInstance`] if it
    /// was never saved.
    fn delete(&self) -> Result<()> {
        let id = self.id().ok_or(Error::UnsavedInstance)?;
        with_database(|db| {
            let coll = db.collection(&Self::collection_name(), &Self::indexed_fields())?;
            coll.remove_by_id(id)?;
            Ok(())
        })
    }

    /// Look up one instance by `_id`.
    fn get_by_id(id: i64) -> Result<Option<Self>> {
        with_database(|db| {
            let coll = db.collection(&Self::collection_name(), &Self::indexed_fields())?;
            row_to_instance(id, coll.get_by_id(id)?)
        })
    }

    /// Single-row variant of [`Model::filter`] (spec §4.3: `get(**filters)`
    /// is `filter(**filters, limit=1)`, returning the first match or
    /// `None`).
    fn get(filters: &[Filter<'_>]) -> Result<Option<Self>> {
        Ok(Self::filter(filters, Some(1), None)?.into_iter().next())
    }

    /// All instances, unbounded (spec §4.3: "without a `limit` argument,
    /// both `filter` and `all` return every matching row").
    fn all() -> Result<Vec<Self>> {
        Self::filter(&[], None, None)
    }

    /// Find instances matching an exact `field = value`.
    fn find_by(field: &str, value: &Value) -> Result<Vec<Self>> {
        Self::filter(&[(field, Some(value.clone()))], None, None)
    }

    /// Find instances matching a lookup-operator filter (`field`, op, and
    /// optional value — see [`crate::odm::lookup`]).
    fn find_where(field: &str, op: Lookup, value: Option<&Value>) -> Result<Vec<Self>> {
        with_database(|db| {
            let coll = db.collection(&Self::collection_name(), &Self::indexed_fields())?;
            coll.search_with(field, op, value)?
                .into_iter()
                .map(|(id, v)| row_to_instance_unwrap(id, v))
                .collect()
        })
    }

    /// Apply a conjunction of `field`/`field__op` filters (spec §4.3's
    /// lookup-operator table), offset-paginated. An empty `filters` slice
    /// matches every row.
    fn filter(filters: &[Filter<'_>], limit: Option<i64>, offset: Option<i64>) -> Result<Vec<Self>> {
        with_database(|db| {
            let coll = db.collection(&Self::collection_name(), &Self::indexed_fields())?;
            let conditions = compile_filters(filters)?;
            let rows = if conditions.is_empty() {
                coll.all(limit, offset)?
            } else if limit.is_none() && offset.is_none() {
                coll.search_optimized(&conditions)?
            } else {
                // search_optimized has no LIMIT/OFFSET of its own; apply
                // them over the full (still id-ordered) result set.
                let all = coll.search_optimized(&conditions)?;
                let start = offset.unwrap_or(0).max(0) as usize;
                let end = match limit {
                    Some(n) => start.saturating_add(n.max(0) as usize),
                    None => all.len(),
                };
                all.into_iter().skip(start).take(end.saturating_sub(start)).collect()
            };
            rows.into_iter().map(|(id, v)| row_to_instance_unwrap(id, v)).collect()
        })
    }

    /// Count rows matching `filters` without materialising them. Equal to
    /// `filter(filters, limit=None).len()` (spec §8's "count equals
    /// length" invariant) but pushed down to `COUNT(*)`.
    fn count(filters: &[Filter<'_>]) -> Result<usize> {
        with_database(|db| {
            let coll = db.collection(&Self::collection_name(), &Self::indexed_fields())?;
            let conditions = compile_filters(filters)?;
            Ok(coll.count_optimized(&conditions)? as usize)
        })
    }

    /// Insert every instance, assigning each its `_id` in order. All rows
    /// commit together or none do (spec §4.1's `insert_many` guarantee).
    fn insert_many(instances: &mut [Self]) -> Result<Vec<i64>> {
        with_database(|db| {
            let coll = db.collection(&Self::collection_name(), &Self::indexed_fields())?;
            let docs = instances
                .iter()
                .map(|inst| Ok(Value::Object(inst.to_fields()?)))
                .collect::<Result<Vec<Value>>>()?;
            let ids = coll.insert_many(&docs)?;
            for (inst, id) in instances.iter_mut().zip(ids.iter()) {
                inst.set_id(*id);
            }
            Ok(ids)
        })
    }

    /// Delete every row matching `filters`. At least one filter is
    /// required — `delete_many(&[])` raises [`Error::MissingPredicate`]
    /// to prevent accidental mass deletion (spec §4.3).
    fn delete_many(filters: &[Filter<'_>]) -> Result<usize> {
        if filters.is_empty() {
            return Err(Error::MissingPredicate);
        }
        with_database(|db| {
            let coll = db.collection(&Self::collection_name(), &Self::indexed_fields())?;
            let conditions = compile_filters(filters)?;
            coll.remove_optimized(&conditions)
        })
    }

    /// A lazy, chunked iterator over every row matching `filters` (spec
    /// §4.3: `paginate=true` fetches internally in pages of 100). Each
    /// call produces a fresh cursor; it is not restartable mid-iteration.
    fn paginate(filters: &[Filter<'_>]) -> Paginator<Self> {
        Paginator::new(filters.to_vec())
    }

    // --- Transaction proxies (spec §4.3: "this is how ODM code
    // participates in transactions"). ---

    fn begin() -> Result<()> {
        with_database(|db| db.begin())
    }

    fn commit() -> Result<()> {
        with_database(|db| db.commit())
    }

    fn rollback() -> Result<()> {
        with_database(|db| db.rollback())
    }

    fn transaction<F, T>(f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        with_database(|db| db.transaction(f))
    }
}

fn row_to_instance<M: Model>(id: i64, doc: Option<Value>) -> Result<Option<M>> {
    match doc {
        None => Ok(None),
        Some(Value::Object(fields)) => Ok(Some(M::from_fields(id, fields)?)),
        Some(_) => Err(Error::InvalidDocument(format!("row {id} is not a JSON object"))),
    }
}

fn row_to_instance_unwrap<M: Model>(id: i64, doc: Value) -> Result<M> {
    match doc {
        Value::Object(fields) => M::from_fields(id, fields),
        _ => Err(Error::InvalidDocument(format!("row {id} is not a JSON object"))),
    }
}

/// Lazy, chunk-fetching row sequence returned by [`Model::paginate`].
/// Fetches `PAGINATE_CHUNK` rows at a time via offset pagination,
/// yielding instances one at a time and re-fetching once a chunk is
/// exhausted, until a short page signals there is nothing left.
pub struct Paginator<M: Model> {
    filters: Vec<(String, Option<Value>)>,
    buffer: std::collections::VecDeque<M>,
    offset: i64,
    exhausted: bool,
}

impl<M: Model> Paginator<M> {
    fn new(filters: Vec<Filter<'_>>) -> Self {
        Self {
            filters: filters.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            buffer: std::collections::VecDeque::new(),
            offset: 0,
            exhausted: false,
        }
    }

    fn refill(&mut self) -> Result<()> {
        let owned: Vec<Filter<'_>> = self.filters.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
        let page = M::filter(&owned, Some(PAGINATE_CHUNK), Some(self.offset))?;
        self.offset += page.len() as i64;
        if (page.len() as i64) < PAGINATE_CHUNK {
            self.exhausted = true;
        }
        self.buffer.extend(page);
        Ok(())
    }
}

impl<M: Model> Iterator for Paginator<M> {
    type Item = Result<M>;

    fn next(&mut self) -> Option<Result<M>> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.refill() {
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
