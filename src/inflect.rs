//! Singular/plural accessor names guessed from table names.
//!
//! Only the last `_`-separated word is inflected, so `user_prefs` becomes
//! `user_pref` and `user_role` becomes `user_roles`. This is a best guess;
//! manual relations exist for the names it gets wrong.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessorNames {
    pub singular: String,
    pub plural: String,
}

const IRREGULAR: &[(&str, &str)] = &[
    ("person", "people"),
    ("child", "children"),
    ("man", "men"),
    ("woman", "women"),
    ("mouse", "mice"),
    ("goose", "geese"),
    ("foot", "feet"),
    ("tooth", "teeth"),
    ("ox", "oxen"),
];

/// Derive a singular/plural pair for `table`.
///
/// Never fails: when the heuristic collapses the pair is `table` and
/// `table` + `s`.
pub fn accessor_names(table: &str) -> AccessorNames {
    let (prefix, word) = match table.rfind('_') {
        Some(idx) => table.split_at(idx + 1),
        None => ("", table),
    };

    let (singular, plural) = match (singularize(word), pluralize(word)) {
        _ if word.is_empty() => (None, None),
        (Some(singular), _) if is_plural(word) => (Some(singular), Some(word.to_string())),
        (_, plural) => (Some(word.to_string()), plural),
    };

    match (singular, plural) {
        (Some(s), Some(p)) if s != p => AccessorNames {
            singular: format!("{}{}", prefix, s),
            plural: format!("{}{}", prefix, p),
        },
        _ => AccessorNames {
            singular: table.to_string(),
            plural: format!("{}s", table),
        },
    }
}

fn is_plural(word: &str) -> bool {
    let lower = word.to_ascii_lowercase();
    if IRREGULAR.iter().any(|(_, p)| *p == lower) {
        return true;
    }
    if IRREGULAR.iter().any(|(s, _)| *s == lower) {
        return false;
    }
    lower.ends_with('s') && !(lower.ends_with("ss") || lower.ends_with("us") || lower.ends_with("is"))
}

fn singularize(word: &str) -> Option<String> {
    let lower = word.to_ascii_lowercase();
    if let Some((s, _)) = IRREGULAR.iter().find(|(_, p)| *p == lower) {
        return Some(s.to_string());
    }
    if lower.len() > 3 && lower.ends_with("ies") {
        return Some(format!("{}y", &word[..word.len() - 3]));
    }
    for suffix in ["sses", "shes", "ches", "xes", "zes"] {
        if lower.ends_with(suffix) {
            return Some(word[..word.len() - 2].to_string());
        }
    }
    if lower.len() > 1 && lower.ends_with('s') {
        return Some(word[..word.len() - 1].to_string());
    }
    None
}

fn pluralize(word: &str) -> Option<String> {
    let lower = word.to_ascii_lowercase();
    if let Some((_, p)) = IRREGULAR.iter().find(|(s, _)| *s == lower) {
        return Some(p.to_string());
    }
    let consonant_y = lower.len() > 1
        && lower.ends_with('y')
        && !matches!(lower.as_bytes()[lower.len() - 2], b'a' | b'e' | b'i' | b'o' | b'u');
    if consonant_y {
        return Some(format!("{}ies", &word[..word.len() - 1]));
    }
    if ["s", "x", "z", "ch", "sh"].iter().any(|s| lower.ends_with(s)) {
        return Some(format!("{}es", word));
    }
    Some(format!("{}s", word))
}
