//! English pluralization used to derive a default collection name from a
//! `Model` type's name (spec §4.3, §9: "languages without declarative
//! class-to-table mapping derive the table name from the type name").
//!
//! This is a small table-driven heuristic, not a full inflection engine —
//! it covers the common cases and a short irregular list; anything else
//! should override [`crate::odm::Model::collection_name`] explicitly.

const IRREGULAR: &[(&str, &str)] = &[
    ("person", "people"),
    ("child", "children"),
    ("man", "men"),
    ("woman", "women"),
    ("datum", "data"),
    ("criterion", "criteria"),
];

/// Convert a `PascalCase` type name into `snake_case`.
pub fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() {
            if i != 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Pluralize a `snake_case` noun. The last underscore-delimited word is
/// pluralized; any preceding words (e.g. a prefix in a compound name) are
/// left as-is.
pub fn pluralize(snake: &str) -> String {
    let (prefix, last) = match snake.rfind('_') {
        Some(idx) => (&snake[..=idx], &snake[idx + 1..]),
        None => ("", snake),
    };

    if let Some((_, plural)) = IRREGULAR.iter().find(|(s, _)| *s == last) {
        return format!("{prefix}{plural}");
    }

    let plural = if last.ends_with(['s', 'x', 'z']) || last.ends_with("ch") || last.ends_with("sh") {
        format!("{last}es")
    } else if last.ends_with('y') && !ends_with_vowel_before_y(last) {
        format!("{}ies", &last[..last.len() - 1])
    } else {
        format!("{last}s")
    };

    format!("{prefix}{plural}")
}

fn ends_with_vowel_before_y(word: &str) -> bool {
    word.len() >= 2
        && matches!(
            word.as_bytes()[word.len() - 2],
            b'a' | b'e' | b'i' | b'o' | b'u'
        )
}
