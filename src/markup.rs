//! Markup helpers: visible-text measurement, cleanup of service output, and
//! a structural check that translated HTML kept its tags and URLs.

use regex::Regex;
use std::sync::OnceLock;

static SCRIPT_STYLE_REGEX: OnceLock<Regex> = OnceLock::new();
static COMMENT_REGEX: OnceLock<Regex> = OnceLock::new();
static TAG_REGEX: OnceLock<Regex> = OnceLock::new();
static WHITESPACE_REGEX: OnceLock<Regex> = OnceLock::new();
static LEADING_FENCE_REGEX: OnceLock<Regex> = OnceLock::new();
static TRAILING_FENCE_REGEX: OnceLock<Regex> = OnceLock::new();
static TAG_NAME_REGEX: OnceLock<Regex> = OnceLock::new();
static URL_ATTR_REGEX: OnceLock<Regex> = OnceLock::new();

/// Text a reader would see: scripts, styles, comments and tags removed,
/// common entities decoded, whitespace collapsed.
pub fn visible_text(html: &str) -> String {
    let script_style = SCRIPT_STYLE_REGEX.get_or_init(|| {
        Regex::new(r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>").unwrap()
    });
    let comment = COMMENT_REGEX.get_or_init(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
    let tag = TAG_REGEX.get_or_init(|| Regex::new(r"<[^>]*>").unwrap());
    let whitespace = WHITESPACE_REGEX.get_or_init(|| Regex::new(r"\s+").unwrap());

    let text = script_style.replace_all(html, " ");
    let text = comment.replace_all(&text, " ");
    let text = tag.replace_all(&text, " ");
    let text = decode_entities(&text);

    whitespace.replace_all(&text, " ").trim().to_string()
}

/// Number of characters in [`visible_text`].
pub fn visible_length(html: &str) -> usize {
    visible_text(html).chars().count()
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Remove the code fences a model sometimes wraps its answer in
/// (a leading ```` ```html ```` line and a trailing ```` ``` ````).
pub fn strip_code_fences(text: &str) -> String {
    let leading =
        LEADING_FENCE_REGEX.get_or_init(|| Regex::new(r"^\s*```[A-Za-z0-9_+-]*[ \t]*\r?\n?").unwrap());
    let trailing = TRAILING_FENCE_REGEX.get_or_init(|| Regex::new(r"\r?\n?```\s*$").unwrap());

    let text = leading.replace(text, "");
    let text = trailing.replace(&text, "");
    text.trim().to_string()
}

/// Structural comparison report for one translated fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Content that must survive translation verbatim but did not
    pub errors: Vec<String>,

    /// Differences that are suspicious but often harmless
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }
}

/// Checks that a translation preserved the markup of its source.
pub struct MarkupValidator;

impl MarkupValidator {
    /// Compare tag sequence and link/media URLs of `original` and `translated`.
    pub fn validate(original: &str, translated: &str) -> ValidationReport {
        let mut report = ValidationReport::default();

        let orig_tags = Self::extract_tag_names(original);
        let trans_tags = Self::extract_tag_names(translated);
        if orig_tags != trans_tags {
            report.warnings.push(format!(
                "Tag sequence mismatch: original has {} tags, translation has {}",
                orig_tags.len(),
                trans_tags.len()
            ));
        }

        let orig_urls = Self::extract_urls(original);
        let trans_urls = Self::extract_urls(translated);
        let missing: Vec<&String> = orig_urls
            .iter()
            .filter(|url| !trans_urls.contains(url))
            .collect();
        if !missing.is_empty() {
            report
                .errors
                .push(format!("URLs missing from translation: {:?}", missing));
        }

        report
    }

    /// Lowercased tag names in document order; closing tags keep their `/`.
    fn extract_tag_names(html: &str) -> Vec<String> {
        let regex =
            TAG_NAME_REGEX.get_or_init(|| Regex::new(r"<(/?)([A-Za-z][A-Za-z0-9-]*)").unwrap());

        regex
            .captures_iter(html)
            .map(|cap| format!("{}{}", &cap[1], cap[2].to_ascii_lowercase()))
            .collect()
    }

    /// Values of `href` and `src` attributes.
    fn extract_urls(html: &str) -> Vec<String> {
        let regex = URL_ATTR_REGEX.get_or_init(|| {
            Regex::new(r#"(?i)\b(?:href|src)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap()
        });

        regex
            .captures_iter(html)
            .filter_map(|cap| cap.get(1).or_else(|| cap.get(2)))
            .map(|m| m.as_str().to_string())
            .collect()
    }
}
