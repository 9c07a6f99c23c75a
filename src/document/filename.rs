//! Filename derivation and path-component sanitization.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use super::DocumentRecord;

/// Substitute used for missing or fully-stripped components.
pub const UNKNOWN_COMPONENT: &str = "unknown";

const MAX_COMPONENT_CHARS: usize = 100;
const MAX_TITLE_CHARS: usize = 50;

#[allow(clippy::expect_used)]
static YEAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(19|20)\d{2}\b").expect("year regex is valid") // Static pattern, safe to panic
});

/// Makes `value` safe to use as a single path or blob-key component.
///
/// Reserved characters and whitespace become `_`, leading and trailing dots
/// and underscores are trimmed, and the result is cut to `max_chars`
/// characters. An empty result becomes [`UNKNOWN_COMPONENT`].
#[must_use]
pub fn sanitize_component(value: &str, max_chars: usize) -> String {
    let mapped: String = value
        .chars()
        .map(|ch| match ch {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_whitespace() || c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = mapped.trim_matches(|c| c == '.' || c == '_');
    let truncated: String = trimmed.chars().take(max_chars).collect();
    // Truncation can expose a trailing dot, which Windows shares reject.
    let truncated = truncated.trim_end_matches('.');
    if truncated.is_empty() || truncated == ".." {
        UNKNOWN_COMPONENT.to_string()
    } else {
        truncated.to_string()
    }
}

/// Returns the first 19xx/20xx year mentioned in `text`.
#[must_use]
pub fn extract_year(text: &str) -> Option<String> {
    YEAR_PATTERN.find(text).map(|m| m.as_str().to_string())
}

/// Derives the deterministic storage filename for a record.
///
/// The last URL path segment is used when it names a PDF; otherwise the
/// name is built from the id and a shortened title.
#[must_use]
pub fn derive_filename(record: &DocumentRecord) -> String {
    url_pdf_name(&record.source_url).unwrap_or_else(|| format!("{}.pdf", fallback_stem(record)))
}

/// Filename of the placeholder written when a record could not be fetched.
#[must_use]
pub fn placeholder_filename(record: &DocumentRecord) -> String {
    format!("{}_URL_ONLY.txt", fallback_stem(record))
}

fn fallback_stem(record: &DocumentRecord) -> String {
    let id = sanitize_component(&record.id, MAX_COMPONENT_CHARS);
    let title = sanitize_component(&record.title, MAX_TITLE_CHARS);
    format!("{id}_{title}")
}

fn url_pdf_name(source_url: &str) -> Option<String> {
    let parsed = Url::parse(source_url.trim()).ok()?;
    let segment = parsed.path_segments()?.next_back()?;
    let decoded = urlencoding::decode(segment).ok()?;
    if !decoded.to_lowercase().ends_with(".pdf") {
        return None;
    }
    let name = sanitize_component(&decoded, MAX_COMPONENT_CHARS);
    // A bare ".pdf" sanitizes to "pdf" and no longer carries the extension.
    name.to_lowercase().ends_with(".pdf").then_some(name)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== Sanitization Tests ====================

    #[test]
    fn test_sanitize_component_replaces_reserved_characters() {
        assert_eq!(sanitize_component("a<b>c:d\"e/f\\g|h?i*j", 100), "a_b_c_d_e_f_g_h_i_j");
        assert_eq!(sanitize_component("Annual  Report", 100), "Annual__Report");
    }

    #[test]
    fn test_sanitize_component_trims_dots_and_underscores() {
        assert_eq!(sanitize_component("._hidden_.", 100), "hidden");
        assert_eq!(sanitize_component("..", 100), "unknown");
        assert_eq!(sanitize_component("   ", 100), "unknown");
    }

    #[test]
    fn test_sanitize_component_truncates_by_chars() {
        let long = "é".repeat(120);
        assert_eq!(sanitize_component(&long, 100).chars().count(), 100);
    }

    // ==================== Year Tests ====================

    #[test]
    fn test_extract_year_matches_word_bounded_years() {
        assert_eq!(extract_year("Country Report 2018 update"), Some("2018".to_string()));
        assert_eq!(extract_year("Review 1999-2000"), Some("1999".to_string()));
        assert_eq!(extract_year("ID 12019"), None);
        assert_eq!(extract_year("Year 1850"), None);
    }

    // ==================== Filename Tests ====================

    #[test]
    fn test_derive_filename_uses_pdf_segment() {
        let record = DocumentRecord::new("1", "https://host/docs/My%20Report.pdf?x=1");
        assert_eq!(derive_filename(&record), "My_Report.pdf");
    }

    #[test]
    fn test_derive_filename_falls_back_to_id_and_title() {
        let record = DocumentRecord::new("99", "https://host/download?id=99")
            .with_title("Energy: Sector / Review");
        assert_eq!(derive_filename(&record), "99_Energy__Sector___Review.pdf");
    }

    #[test]
    fn test_derive_filename_truncates_long_titles() {
        let record = DocumentRecord::new("5", "https://host/view").with_title("x".repeat(80));
        assert_eq!(derive_filename(&record), format!("5_{}.pdf", "x".repeat(50)));
    }

    #[test]
    fn test_placeholder_filename_is_distinguishable() {
        let record = DocumentRecord::new("7", "https://host/a.pdf").with_title("Annual Report");
        assert_eq!(placeholder_filename(&record), "7_Annual_Report_URL_ONLY.txt");
        assert_ne!(placeholder_filename(&record), derive_filename(&record));
    }

    #[test]
    fn test_derive_filename_is_deterministic() {
        let record = DocumentRecord::new("3", "not a url").with_title("T");
        assert_eq!(derive_filename(&record), derive_filename(&record.clone()));
        assert_eq!(derive_filename(&record), "3_T.pdf");
    }
}
