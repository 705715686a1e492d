//! Utility functions and helpers.

pub mod http;
pub mod log;
pub mod url;

use unicode_segmentation::UnicodeSegmentation;

/// Collapse every whitespace run to a single space and trim the ends.
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate to at most `max` grapheme clusters, appending an ellipsis when cut.
pub fn truncate_graphemes(s: &str, max: usize) -> String {
    let mut graphemes = s.graphemes(true);
    let head: String = graphemes.by_ref().take(max).collect();
    if graphemes.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}
