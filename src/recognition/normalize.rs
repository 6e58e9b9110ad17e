//! Whitespace normalisation for recognised text.

/// Trim the ends and collapse every internal whitespace run (spaces, tabs,
/// newlines) into a single space.
///
/// ```
/// use page_reader::recognition::normalize_text;
///
/// assert_eq!(normalize_text("  a   b\n c "), "a b c");
/// ```
pub fn normalize_text(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}
