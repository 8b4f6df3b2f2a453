//! Slug generation for object ids

use std::sync::OnceLock;

use regex::Regex;

fn non_slug_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("static regex"))
}

/// Turn free text into a valid object_id
///
/// Lowercases, collapses every run of characters outside `[a-z0-9]` into a
/// single underscore and trims leading/trailing underscores. Text with no
/// usable characters becomes `"unknown"`.
pub fn slugify(text: &str) -> String {
    let lowered = text.to_lowercase();
    let slug = non_slug_chars().replace_all(&lowered, "_");
    let slug = slug.trim_matches('_');
    if slug.is_empty() {
        crate::STATE_UNKNOWN.to_string()
    } else {
        slug.to_string()
    }
}
