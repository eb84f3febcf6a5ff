//! Query compiler (spec §4.4).
//!
//! Translates a field/operator/value predicate into a SQL fragment, routing
//! through the generated index column when the field is indexed and
//! through `json_extract` otherwise. This is the one place that decides
//! indexed-vs-scan, so [`super::collection::Collection`] and
//! [`crate::odm::lookup`] both go through it rather than building SQL by
//! hand.

use super::dialect;
use crate::error::{Error, Result};
use serde_json::Value;

/// The lookup operators recognised on a `field__op` filter key (spec §4.4
/// table, reproduced by the ODM lookup parser in [`crate::odm::lookup`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Like,
    IsNull,
}

impl Lookup {
    /// Parse the suffix after `__` in a filter key, e.g. `"gte"` -> `Gte`.
    /// `None` means "no suffix" (bare equality), not "unrecognised" —
    /// callers distinguish those by checking whether a `__` was present at
    /// all before calling this.
    pub fn parse_suffix(suffix: &str) -> Option<Lookup> {
        match suffix {
            "gt" => Some(Lookup::Gt),
            "gte" => Some(Lookup::Gte),
            "lt" => Some(Lookup::Lt),
            "lte" => Some(Lookup::Lte),
            "ne" => Some(Lookup::Ne),
            "in" => Some(Lookup::In),
            "like" => Some(Lookup::Like),
            "isnull" => Some(Lookup::IsNull),
            _ => None,
        }
    }
}

/// A compiled predicate: the SQL fragment (with `?` placeholders) and
/// whether it was able to use the generated index column.
pub struct CompiledPredicate {
    pub sql: String,
    pub indexed: bool,
}

fn field_expr(indexed_fields: &[String], field: &str) -> String {
    if indexed_fields.iter().any(|f| f == field) {
        format!("\"{field}\"")
    } else {
        dialect::json_extract(field)
    }
}

pub fn is_indexed(indexed_fields: &[String], field: &str) -> bool {
    indexed_fields.iter().any(|f| f == field)
}

/// Compile `field <op> value` into SQL. `value` is required for every
/// operator except `IsNull` (where it selects IS NULL vs IS NOT NULL, and
/// defaults to IS NULL when absent).
pub fn compile_condition(
    indexed_fields: &[String],
    field: &str,
    lookup: Lookup,
    value: Option<&Value>,
) -> Result<CompiledPredicate> {
    if !dialect::is_valid_identifier(field) {
        return Err(Error::InvalidField(field.to_string()));
    }
    let expr = field_expr(indexed_fields, field);
    // LIKE and regex scans never use the index column: SQLite's query
    // planner cannot use a B-tree index for a leading-wildcard LIKE, and a
    // generated column would gain nothing a json_extract scan doesn't.
    let indexed = is_indexed(indexed_fields, field) && !matches!(lookup, Lookup::Like);

    let sql = match lookup {
        Lookup::Eq => format!("{expr} = ?"),
        Lookup::Ne => format!("{expr} <> ?"),
        Lookup::Gt => format!("{expr} > ?"),
        Lookup::Gte => format!("{expr} >= ?"),
        Lookup::Lt => format!("{expr} < ?"),
        Lookup::Lte => format!("{expr} <= ?"),
        Lookup::Like => format!("{expr} LIKE ?"),
        Lookup::In => {
            let arr = value
                .and_then(Value::as_array)
                .ok_or_else(|| Error::InvalidField(format!("{field}__in requires an array value")))?;
            if arr.is_empty() {
                // An empty IN () is invalid SQL; no value can satisfy it.
                "0 = 1".to_string()
            } else {
                let placeholders = vec!["?"; arr.len()].join(", ");
                format!("{expr} IN ({placeholders})")
            }
        }
        Lookup::IsNull => {
            let want_null = value.and_then(Value::as_bool).unwrap_or(true);
            if want_null {
                format!("{expr} IS NULL")
            } else {
                format!("{expr} IS NOT NULL")
            }
        }
    };

    Ok(CompiledPredicate { sql, indexed })
}

/// Bind parameters for a compiled condition, in the order its `?`
/// placeholders expect. `IsNull` binds none; `In` binds one per element.
pub fn condition_params(lookup: Lookup, value: Option<&Value>) -> Vec<rusqlite::types::Value> {
    match lookup {
        Lookup::IsNull => Vec::new(),
        Lookup::In => value
            .and_then(Value::as_array)
            .map(|arr| arr.iter().map(value_to_sql).collect())
            .unwrap_or_default(),
        _ => value.map(|v| vec![value_to_sql(v)]).unwrap_or_default(),
    }
}

/// Convert a JSON scalar into a SQL parameter matching how SQLite's
/// `json_extract` surfaces it: booleans become 0/1, numbers stay numbers,
/// and structured values (arrays/objects) compare against their canonical
/// compact JSON text.
pub fn value_to_sql(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Bool(b) => rusqlite::types::Value::Integer(if *b { 1 } else { 0 }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                rusqlite::types::Value::Integer(i)
            } else if let Some(f) = n.as_f64() {
                rusqlite::types::Value::Real(f)
            } else {
                rusqlite::types::Value::Null
            }
        }
        Value::String(s) => rusqlite::types::Value::Text(s.clone()),
        other => rusqlite::types::Value::Text(other.to_string()),
    }
}
