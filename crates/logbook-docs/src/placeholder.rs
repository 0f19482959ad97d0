//! `{{field_name}}` placeholder scanning and substitution.

use logbook_types::FieldMap;
use regex::{Captures, Regex};
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("placeholder pattern is valid")
});

/// Field names referenced by `text`, in order of appearance.
pub(crate) fn placeholders(text: &str) -> Vec<&str> {
    PLACEHOLDER
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect()
}

/// Replace every placeholder whose field is present in `fields`.
///
/// Unknown placeholders stay literally in place. Returns `None` when nothing
/// was replaced, so callers can leave the cell untouched.
pub fn substitute(text: &str, fields: &FieldMap) -> Option<String> {
    let mut replaced = false;
    let out = PLACEHOLDER.replace_all(text, |caps: &Captures<'_>| match fields.get(&caps[1]) {
        Some(value) => {
            replaced = true;
            value.to_string()
        }
        None => caps[0].to_string(),
    });
    replaced.then(|| out.into_owned())
}
