//! SQL dialect shim.
//!
//! Isolates the one thing this crate assumes about its underlying SQL
//! engine: that it is SQLite with the JSON1 extension, generated virtual
//! columns, and user-defined functions. Every fragment of engine-specific
//! SQL syntax used by [`super::collection`] and [`super::query`] is built
//! here so the rest of the engine never spells out a `json_extract(...)`
//! or `GENERATED ALWAYS AS` by hand.

use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;

/// Name of the user-defined scalar function backing `search_pattern`.
const REGEXP_FN: &str = "docstore_regexp";

/// SQL fragment extracting `field` from the `data` JSON column.
///
/// `field` must already be validated as `[A-Za-z0-9_]+` by the caller —
/// this function does not escape arbitrary input into the JSON path.
pub fn json_extract(field: &str) -> String {
    format!("json_extract(data, '$.{field}')")
}

/// Declaration for a generated virtual column indexing `field`.
pub fn generated_column_decl(field: &str) -> String {
    format!("\"{field}\" GENERATED ALWAYS AS (json_extract(data, '$.{field}')) VIRTUAL")
}

/// Name of the B-tree index covering `field` on `table`.
pub fn index_name(table: &str, field: &str) -> String {
    format!("idx_{table}_{field}")
}

/// SQL fragment testing `expr REGEXP ?` using the registered UDF.
///
/// SQLite's built-in `REGEXP` operator requires an application-defined
/// `regexp(pattern, value)` function; we register one backed by the
/// `regex` crate rather than relying on a compile-time SQLite extension.
pub fn regexp_predicate(expr: &str) -> String {
    format!("{REGEXP_FN}(?, {expr})")
}

/// Register the `regexp(pattern, value)` scalar function used by
/// [`regexp_predicate`]. Must be called once per connection.
pub fn register_regexp_function(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        REGEXP_FN,
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        move |ctx| {
            let pattern: String = ctx.get(0)?;
            let text: Option<String> = ctx.get(1)?;
            let text = match text {
                Some(t) => t,
                None => return Ok(false),
            };
            let re = Regex::new(&pattern).map_err(|e| {
                rusqlite::Error::UserFunctionError(Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    e.to_string(),
                )))
            })?;
            Ok(re.is_match(&text))
        },
    )
}

/// Pragmas applied on every connection open (durability/concurrency knobs).
pub fn setup_pragmas(conn: &Connection, busy_timeout_ms: u32, cache_size_kib: u32) -> rusqlite::Result<()> {
    conn.execute_batch(&format!(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = {busy_timeout_ms};
         PRAGMA cache_size = -{cache_size_kib};"
    ))
}

/// Validates that `name` is a non-empty string of `[A-Za-z0-9_]`, as
/// required of collection names and indexed field names alike (§3).
pub fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
