//! Collection storage and indexing (spec §4.1).
//!
//! A collection is one SQLite table: an `id` rowid-alias primary key, a
//! `data` column holding the document as JSON text, and one generated
//! virtual column (plus B-tree index) per indexed field. Reopening a
//! collection with a different indexed-field set than the one its table
//! was created with is a schema mismatch, not an implicit migration.

use super::database::Database;
use super::dialect;
use super::query::{self, Lookup};
use crate::error::{Error, Result};
use rusqlite::{params_from_iter, Row};
use serde_json::Value;
use std::sync::Arc;

fn table_name(collection: &str) -> String {
    format!("collection_{collection}")
}

/// Snapshot of a collection's size, grounded on spec §4.1's `stats()`.
#[derive(Debug, Clone)]
pub struct CollectionStats {
    pub row_count: i64,
    pub indexed_fields: Vec<String>,
    pub file_size_bytes: u64,
    /// Whether the parent database is running in WAL journal mode (it
    /// always is, post-open — see `dialect::setup_pragmas` — but `stats()`
    /// surfaces it verbatim rather than assuming, per spec §4.1).
    pub wal_enabled: bool,
}

/// One row of `EXPLAIN QUERY PLAN` output, used to confirm a search used
/// its index rather than a full scan.
#[derive(Debug, Clone)]
pub struct ExplainStep {
    pub id: i64,
    pub parent: i64,
    pub detail: String,
}

/// A page of a cursor-paginated scan (spec §4.1, §8 "page-through").
#[derive(Debug, Clone)]
pub struct CursorPage {
    pub items: Vec<(i64, Value)>,
    pub next_cursor: Option<i64>,
    pub has_more: bool,
}

pub struct Collection {
    db: Arc<Database>,
    name: String,
    table: String,
    indexed_fields: Vec<String>,
}

impl Collection {
    pub(crate) fn open(db: &Arc<Database>, name: &str, indexed_fields: &[String]) -> Result<Arc<Collection>> {
        if !dialect::is_valid_identifier(name) {
            return Err(Error::InvalidField(format!("invalid collection name: {name}")));
        }
        for f in indexed_fields {
            if !dialect::is_valid_identifier(f) {
                return Err(Error::InvalidField(format!("invalid indexed field: {f}")));
            }
        }
        let table = table_name(name);
        let mut requested: Vec<String> = indexed_fields.to_vec();
        requested.sort();

        let outcome: std::result::Result<(), Error> = db.with_conn(|conn| {
            match existing_indexed_fields(conn, &table)? {
                Some(mut existing) => {
                    existing.sort();
                    if existing != requested {
                        return Ok(Err(Error::IndexSchemaMismatch {
                            collection: name.to_string(),
                            existing,
                            requested: requested.clone(),
                        }));
                    }
                    Ok(Ok(()))
                }
                None => {
                    create_table(conn, &table, indexed_fields)?;
                    Ok(Ok(()))
                }
            }
        })?;
        outcome?;

        tracing::debug!(collection = %name, indexed = ?indexed_fields, "collection opened");

        Ok(Arc::new(Collection {
            db: Arc::clone(db),
            name: name.to_string(),
            table,
            indexed_fields: indexed_fields.to_vec(),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn indexed_fields(&self) -> &[String] {
        &self.indexed_fields
    }

    /// Alias for [`Collection::indexed_fields`] under the name spec §6
    /// gives the export/import collaborators' consumed interface.
    pub fn get_indexed_fields(&self) -> &[String] {
        self.indexed_fields()
    }

    /// Row count matching `field = value`, without fetching the rows
    /// (backs [`crate::odm::Model::count`]).
    pub fn count(&self, field: &str, value: &Value) -> Result<i64> {
        self.count_optimized(&[(field.to_string(), Lookup::Eq, Some(value.clone()))])
    }

    /// Row count matching a multi-field conjunction (backs
    /// [`crate::odm::Model::count`] for lookup-operator filters).
    pub fn count_optimized(&self, conditions: &[(String, Lookup, Option<Value>)]) -> Result<i64> {
        let table = self.table.clone();
        if conditions.is_empty() {
            return self.db.with_conn(move |conn| {
                conn.query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |r| r.get(0))
            });
        }
        let mut clauses = Vec::new();
        let mut params = Vec::new();
        for (field, lookup, value) in conditions {
            let compiled = query::compile_condition(&self.indexed_fields, field, *lookup, value.as_ref())?;
            clauses.push(compiled.sql);
            params.extend(query::condition_params(*lookup, value.as_ref()));
        }
        let where_sql = clauses.join(" AND ");
        self.db.with_conn(move |conn| {
            let sql = format!("SELECT COUNT(*) FROM \"{table}\" WHERE {where_sql}");
            conn.query_row(&sql, params_from_iter(params.iter()), |r| r.get(0))
        })
    }

    fn require_object<'a>(&self, doc: &'a Value) -> Result<&'a serde_json::Map<String, Value>> {
        doc.as_object()
            .ok_or_else(|| Error::InvalidDocument("document must be a JSON object".to_string()))
    }

    pub fn insert(&self, doc: &Value) -> Result<i64> {
        self.require_object(doc)?;
        let text = serde_json::to_string(doc)?;
        let table = self.table.clone();
        self.db.with_conn(move |conn| {
            conn.execute(&format!("INSERT INTO \"{table}\" (data) VALUES (?)"), [text.clone()])?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Insert every document in `docs` atomically: if the engine rejects
    /// any one of them, none are committed (spec §4.1).
    pub fn insert_many(&self, docs: &[Value]) -> Result<Vec<i64>> {
        for doc in docs {
            self.require_object(doc)?;
        }
        let table = self.table.clone();
        let texts = docs
            .iter()
            .map(serde_json::to_string)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.db.transaction(move || {
            self.db.with_conn(|conn| {
                let mut ids = Vec::with_capacity(texts.len());
                for text in &texts {
                    conn.execute(&format!("INSERT INTO \"{table}\" (data) VALUES (?)"), [text.as_str()])?;
                    ids.push(conn.last_insert_rowid());
                }
                Ok(ids)
            })
        })
    }

    pub fn get_by_id(&self, id: i64) -> Result<Option<Value>> {
        let table = self.table.clone();
        self.db.with_conn(move |conn| {
            conn.query_row(&format!("SELECT data FROM \"{table}\" WHERE id = ?"), [id], |row| {
                row_to_value(row)
            })
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                e => Err(e),
            })
        })
    }

    /// Exact-equality search on a single field, auto-routed through the
    /// index when available.
    pub fn search(&self, field: &str, value: &Value) -> Result<Vec<(i64, Value)>> {
        self.search_with(field, Lookup::Eq, Some(value))
    }

    /// Search by an explicit lookup operator (the general form `search`
    /// specialises); this is what [`crate::odm::lookup`] compiles
    /// `field__op` filters down to.
    pub fn search_with(&self, field: &str, lookup: Lookup, value: Option<&Value>) -> Result<Vec<(i64, Value)>> {
        let compiled = query::compile_condition(&self.indexed_fields, field, lookup, value)?;
        let params = query::condition_params(lookup, value);
        let table = self.table.clone();
        self.db.with_conn(move |conn| {
            let sql = format!("SELECT id, data FROM \"{table}\" WHERE {} ORDER BY id", compiled.sql);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(params.iter()), row_to_id_value)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Multi-predicate AND search; each condition is routed independently
    /// so a mix of indexed and scanned fields is handled correctly.
    pub fn search_optimized(&self, conditions: &[(String, Lookup, Option<Value>)]) -> Result<Vec<(i64, Value)>> {
        if conditions.is_empty() {
            return self.all(None, None);
        }
        let mut clauses = Vec::new();
        let mut params = Vec::new();
        for (field, lookup, value) in conditions {
            let compiled = query::compile_condition(&self.indexed_fields, field, *lookup, value.as_ref())?;
            clauses.push(compiled.sql);
            params.extend(query::condition_params(*lookup, value.as_ref()));
        }
        let table = self.table.clone();
        let where_sql = clauses.join(" AND ");
        self.db.with_conn(move |conn| {
            let sql = format!("SELECT id, data FROM \"{table}\" WHERE {where_sql} ORDER BY id");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(params.iter()), row_to_id_value)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Rows where `field` equals any value in `values` (compiles to `IN`).
    pub fn find_any(&self, field: &str, values: &[Value]) -> Result<Vec<(i64, Value)>> {
        self.search_with(field, Lookup::In, Some(&Value::Array(values.to_vec())))
    }

    /// Rows where `field` holds a JSON array containing every element of
    /// `values` (subset match, spec §4.1). Documents where the field is
    /// absent or not an array never match, regardless of `values`.
    pub fn find_all(&self, field: &str, values: &[Value]) -> Result<Vec<(i64, Value)>> {
        if !dialect::is_valid_identifier(field) {
            return Err(Error::InvalidField(field.to_string()));
        }
        let table = self.table.clone();
        let path = format!("$.{field}");
        // One EXISTS clause per required value: the stored array must
        // contain each of them, not merely intersect `values`.
        let exists_clauses = vec!["EXISTS (SELECT 1 FROM json_each(data, ?) WHERE value = ?)"; values.len()].join(" AND ");
        let mut params = vec![rusqlite::types::Value::Text(path.clone())];
        for value in values {
            params.push(rusqlite::types::Value::Text(path.clone()));
            params.push(query::value_to_sql(value));
        }
        let sql = if values.is_empty() {
            format!("SELECT id, data FROM \"{table}\" WHERE json_type(data, ?) = 'array' ORDER BY id")
        } else {
            format!(
                "SELECT id, data FROM \"{table}\" \
                 WHERE json_type(data, ?) = 'array' AND {exists_clauses} \
                 ORDER BY id"
            )
        };
        self.db.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(params.iter()), row_to_id_value)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Regular-expression search on `field`, always a full scan (spec
    /// §4.4: pattern predicates never use the generated index column).
    pub fn search_pattern(&self, field: &str, pattern: &str) -> Result<Vec<(i64, Value)>> {
        if !dialect::is_valid_identifier(field) {
            return Err(Error::InvalidField(field.to_string()));
        }
        let table = self.table.clone();
        let expr = dialect::json_extract(field);
        let predicate = dialect::regexp_predicate(&expr);
        let pattern = pattern.to_string();
        self.db.with_conn(move |conn| {
            let sql = format!("SELECT id, data FROM \"{table}\" WHERE {predicate} ORDER BY id");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([pattern.clone()], row_to_id_value)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Shallow top-level merge update: keys in `patch` overwrite the
    /// corresponding key in the stored document wholesale (nested objects
    /// are replaced, not merged); keys absent from `patch` are untouched.
    /// Returns `true` if any row matched.
    pub fn update(&self, field: &str, value: &Value, patch: &Value) -> Result<bool> {
        let patch_obj = patch
            .as_object()
            .ok_or_else(|| Error::InvalidDocument("patch must be a JSON object".to_string()))?
            .clone();
        let rows = self.search(field, value)?;
        if rows.is_empty() {
            return Ok(false);
        }
        self.db.transaction(|| {
            for (id, mut data) in rows {
                if let Some(obj) = data.as_object_mut() {
                    for (k, v) in &patch_obj {
                        obj.insert(k.clone(), v.clone());
                    }
                }
                self.write_data(id, &data)?;
            }
            Ok(true)
        })
    }

    /// Overwrite the stored document at `id` wholesale. Used by
    /// `update()`'s merge loop and by the ODM's `save()` on an
    /// already-persisted instance.
    pub(crate) fn write_data(&self, id: i64, data: &Value) -> Result<()> {
        let text = serde_json::to_string(data)?;
        let table = self.table.clone();
        self.db.with_conn(move |conn| {
            conn.execute(&format!("UPDATE \"{table}\" SET data = ? WHERE id = ?"), rusqlite::params![text, id])?;
            Ok(())
        })
    }

    /// Delete every row matching `field = value`. Returns the number of
    /// rows removed.
    pub fn remove(&self, field: &str, value: &Value) -> Result<usize> {
        let compiled = query::compile_condition(&self.indexed_fields, field, Lookup::Eq, Some(value))?;
        let params = query::condition_params(Lookup::Eq, Some(value));
        let table = self.table.clone();
        self.db.with_conn(move |conn| {
            let sql = format!("DELETE FROM \"{table}\" WHERE {}", compiled.sql);
            let n = conn.execute(&sql, params_from_iter(params.iter()))?;
            Ok(n)
        })
    }

    /// Delete every row matching a multi-field conjunction. Returns the
    /// number of rows removed. Used by [`crate::odm::Model::delete_many`].
    pub fn remove_optimized(&self, conditions: &[(String, Lookup, Option<Value>)]) -> Result<usize> {
        let mut clauses = Vec::new();
        let mut params = Vec::new();
        for (field, lookup, value) in conditions {
            let compiled = query::compile_condition(&self.indexed_fields, field, *lookup, value.as_ref())?;
            clauses.push(compiled.sql);
            params.extend(query::condition_params(*lookup, value.as_ref()));
        }
        let table = self.table.clone();
        let where_sql = clauses.join(" AND ");
        self.db.with_conn(move |conn| {
            let sql = format!("DELETE FROM \"{table}\" WHERE {where_sql}");
            conn.execute(&sql, params_from_iter(params.iter()))
        })
    }

    /// Delete the row with this `id` (the rowid, i.e. a model's `_id`).
    /// Returns `true` if a row was removed.
    pub fn remove_by_id(&self, id: i64) -> Result<bool> {
        let table = self.table.clone();
        self.db
            .with_conn(move |conn| conn.execute(&format!("DELETE FROM \"{table}\" WHERE id = ?"), [id]))
            .map(|n| n > 0)
    }

    /// Delete every document in the collection.
    pub fn purge(&self) -> Result<usize> {
        let table = self.table.clone();
        self.db.with_conn(move |conn| conn.execute(&format!("DELETE FROM \"{table}\""), []))
    }

    /// All documents, offset-paginated. `None` for either bound means
    /// "unbounded".
    pub fn all(&self, limit: Option<i64>, offset: Option<i64>) -> Result<Vec<(i64, Value)>> {
        let table = self.table.clone();
        let limit = limit.unwrap_or(-1);
        let offset = offset.unwrap_or(0);
        self.db.with_conn(move |conn| {
            let sql = format!("SELECT id, data FROM \"{table}\" ORDER BY id LIMIT ? OFFSET ?");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![limit, offset], row_to_id_value)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Cursor-paginated scan: returns up to `page_size` rows with `id >
    /// after_id` (or from the start, when `after_id` is `None`), ordered by
    /// id, plus whether another page follows.
    pub fn all_cursor(&self, after_id: Option<i64>, page_size: u32) -> Result<CursorPage> {
        let table = self.table.clone();
        let after = after_id.unwrap_or(0);
        let limit = i64::from(page_size);
        self.db.with_conn(move |conn| {
            let sql = format!("SELECT id, data FROM \"{table}\" WHERE id > ? ORDER BY id LIMIT ?");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![after, limit + 1], row_to_id_value)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let has_more = rows.len() as i64 > limit;
            let mut items = rows;
            if has_more {
                items.truncate(limit as usize);
            }
            let next_cursor = items.last().map(|(id, _)| *id);
            Ok((items, next_cursor, has_more))
        })
        .map(|(items, next_cursor, has_more)| CursorPage { items, next_cursor, has_more })
    }

    pub fn stats(&self) -> Result<CollectionStats> {
        let table = self.table.clone();
        let row_count = self.db.with_conn(move |conn| {
            conn.query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |r| r.get::<_, i64>(0))
        })?;
        let wal_enabled = self
            .db
            .with_conn(|conn| conn.query_row("PRAGMA journal_mode", [], |r| r.get::<_, String>(0)))?
            .eq_ignore_ascii_case("wal");
        let file_size_bytes = self.db.file_size()?;
        Ok(CollectionStats { row_count, indexed_fields: self.indexed_fields.clone(), file_size_bytes, wal_enabled })
    }

    /// Returns the query plan SQLite would use for `field = value`, so
    /// callers (and tests) can confirm a search used its index.
    pub fn explain(&self, field: &str, value: &Value) -> Result<Vec<ExplainStep>> {
        let compiled = query::compile_condition(&self.indexed_fields, field, Lookup::Eq, Some(value))?;
        let params = query::condition_params(Lookup::Eq, Some(value));
        let table = self.table.clone();
        self.db.with_conn(move |conn| {
            let sql = format!("EXPLAIN QUERY PLAN SELECT id, data FROM \"{table}\" WHERE {}", compiled.sql);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(params.iter()), |row| {
                    Ok(ExplainStep {
                        id: row.get(0)?,
                        parent: row.get(1)?,
                        detail: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn row_to_value(row: &Row) -> rusqlite::Result<Value> {
    let text: String = row.get(0)?;
    serde_json::from_str(&text).map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn row_to_id_value(row: &Row) -> rusqlite::Result<(i64, Value)> {
    let id: i64 = row.get(0)?;
    let text: String = row.get(1)?;
    let value = serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e)))?;
    Ok((id, value))
}

fn create_table(conn: &rusqlite::Connection, table: &str, indexed_fields: &[String]) -> rusqlite::Result<()> {
    let mut cols = String::new();
    for f in indexed_fields {
        cols.push_str(", ");
        cols.push_str(&dialect::generated_column_decl(f));
    }
    let sql = format!("CREATE TABLE IF NOT EXISTS \"{table}\" (id INTEGER PRIMARY KEY, data TEXT NOT NULL{cols})");
    conn.execute_batch(&sql)?;
    for f in indexed_fields {
        let idx = dialect::index_name(table, f);
        conn.execute_batch(&format!("CREATE INDEX IF NOT EXISTS \"{idx}\" ON \"{table}\" (\"{f}\")"))?;
    }
    Ok(())
}

/// Returns the generated-column field names the table was created with,
/// or `None` if the table does not exist yet.
fn existing_indexed_fields(conn: &rusqlite::Connection, table: &str) -> rusqlite::Result<Option<Vec<String>>> {
    let exists: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |r| r.get(0),
    )?;
    if exists == 0 {
        return Ok(None);
    }
    let mut stmt = conn.prepare(&format!("PRAGMA table_xinfo(\"{table}\")"))?;
    let fields = stmt
        .query_map([], |row| {
            let name: String = row.get(1)?;
            let hidden: i64 = row.get(6)?;
            Ok((name, hidden))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?
        .into_iter()
        // hidden == 3 is a VIRTUAL generated column (SQLite's table_xinfo
        // convention); id and data are ordinary columns (hidden == 0).
        .filter(|(_, hidden)| *hidden == 3)
        .map(|(name, _)| name)
        .collect();
    Ok(Some(fields))
}
