//! Parses a `field__op` filter key into a field name and [`Lookup`]
//! operator (spec §4.4's lookup table, as exposed to the ODM layer).

use crate::db::Lookup;
use crate::error::{Error, Result};

pub struct LookupKey {
    pub field: String,
    pub op: Lookup,
}

/// Parse a filter key such as `"age__gte"` into its field and operator. A
/// key with no `__` suffix is plain equality. A `__` suffix that isn't one
/// of the recognised operators is [`Error::UnknownLookup`].
pub fn parse_lookup_key(key: &str) -> Result<LookupKey> {
    match key.rfind("__") {
        Some(idx) if idx > 0 => {
            let field = &key[..idx];
            let suffix = &key[idx + 2..];
            match Lookup::parse_suffix(suffix) {
                Some(op) => Ok(LookupKey { field: field.to_string(), op }),
                None => Err(Error::UnknownLookup(key.to_string())),
            }
        }
        _ => Ok(LookupKey { field: key.to_string(), op: Lookup::Eq }),
    }
}
