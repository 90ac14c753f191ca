//! Display formatting for streamed assistant text
//!
//! The orchestrator re-runs [`format`] over the full accumulated text on
//! every fragment, so the transform must be a fixed point on its own
//! output: `format(format(x)) == format(x)`.

use std::sync::LazyLock;

use regex::Regex;

/// Notice appended exactly once when display text hits the length cap
pub const TRUNCATION_NOTICE: &str = "… [response truncated]";

/// `----Heading----` becomes a heading line with the markers stripped
static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"----([^-\n][^\n]*?)----").expect("valid regex"));

/// `*emphasis*` becomes its own bold-style line with the markers stripped
static BOLD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*([^*\n]+)\*").expect("valid regex"));

/// List markers (`1. ` or `- `) not already at the start of a line
static LIST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([^\n\d])(\d+\. |- )").expect("valid regex"));

/// Format accumulated model output for display.
///
/// Strips heading and emphasis markers onto their own lines, forces list
/// items onto new lines, and truncates to `max_chars` characters with a
/// single appended [`TRUNCATION_NOTICE`].
#[must_use]
pub fn format(text: &str, max_chars: usize) -> String {
    let text = HEADING_RE.replace_all(text, "\n$1\n");
    let text = BOLD_RE.replace_all(&text, "\n$1\n");
    let text = LIST_RE.replace_all(&text, "$1\n$2");

    truncate(&text, max_chars)
}

/// Truncate to `max_chars` characters, appending the notice once.
///
/// Text that already carries the notice is treated as final; re-running
/// the formatter over truncated output must not append a second notice.
fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars || text.ends_with(TRUNCATION_NOTICE) {
        return text.to_string();
    }

    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str(TRUNCATION_NOTICE);
    out
}
