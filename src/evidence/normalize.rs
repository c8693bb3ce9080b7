//! Evidence text normalization — HTML stripping and PDF extraction
//!
//! License/terms pages are fetched as HTML or PDF. Raw bytes churn on
//! nearly every re-fetch (ad markup, dates, nonces), so change detection
//! and SPDX resolution both run over a normalized text form: markup
//! removed, entities decoded, whitespace collapsed.

use once_cell::sync::Lazy;
use regex::Regex;

pub const MIME_HTML: &str = "text/html";
pub const MIME_PDF: &str = "application/pdf";

/// Outcome of normalizing an evidence payload.
///
/// Extraction failure is recorded, never thrown: callers fall back to
/// raw-byte comparison so a changed-evidence signal is not silently lost.
#[derive(Debug, Clone)]
pub struct NormalizedEvidence {
    /// Normalized text, absent when extraction failed outright.
    pub text: Option<String>,
    /// True when a structured format (PDF) could not be extracted.
    pub extraction_failed: bool,
}

static SCRIPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script>").expect("script regex"));
static STYLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style>").expect("style regex"));
static COMMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").expect("comment regex"));
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]+>").expect("tag regex"));
static NUMERIC_ENTITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&#(x?[0-9a-fA-F]+);").expect("entity regex"));

/// Normalize an evidence payload according to its content type.
pub fn normalize_evidence(bytes: &[u8], content_type: &str) -> NormalizedEvidence {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_ascii_lowercase();

    match mime.as_str() {
        MIME_PDF => match pdf_extract::extract_text_from_mem(bytes) {
            Ok(text) => NormalizedEvidence {
                text: Some(collapse_whitespace(&text)),
                extraction_failed: false,
            },
            Err(e) => {
                tracing::warn!("PDF text extraction failed: {}", e);
                NormalizedEvidence {
                    text: None,
                    extraction_failed: true,
                }
            }
        },
        MIME_HTML | "application/xhtml+xml" => {
            let html = String::from_utf8_lossy(bytes);
            NormalizedEvidence {
                text: Some(strip_html(&html)),
                extraction_failed: false,
            }
        }
        _ => {
            let text = String::from_utf8_lossy(bytes);
            NormalizedEvidence {
                text: Some(collapse_whitespace(&text)),
                extraction_failed: false,
            }
        }
    }
}

/// Strip HTML to text: scripts, styles, comments, and tags removed,
/// entities decoded, whitespace collapsed.
pub fn strip_html(html: &str) -> String {
    let without_scripts = SCRIPT_RE.replace_all(html, " ");
    let without_styles = STYLE_RE.replace_all(&without_scripts, " ");
    let without_comments = COMMENT_RE.replace_all(&without_styles, " ");
    let without_tags = TAG_RE.replace_all(&without_comments, " ");
    collapse_whitespace(&decode_entities(&without_tags))
}

/// Collapse all whitespace runs to single spaces and trim.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entities(text: &str) -> String {
    let named = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'");

    NUMERIC_ENTITY_RE
        .replace_all(&named, |caps: &regex::Captures| {
            let body = &caps[1];
            let code = if let Some(hex) = body.strip_prefix('x').or_else(|| body.strip_prefix('X'))
            {
                u32::from_str_radix(hex, 16).ok()
            } else {
                body.parse::<u32>().ok()
            };
            code.and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_default()
        })
        .to_string()
}
