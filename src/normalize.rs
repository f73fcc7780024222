use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::models::{CompletionResponse, ImageKind};

// ── Constants ────────────────────────────────────────────────────────────────

/// Prose artifacts that cling to the end of a bare URL.
const TRAILING_PUNCTUATION: &[char] = &[')', ']', '"', '.'];

// ── Lazy static regexes ──────────────────────────────────────────────────────

static MARKDOWN_IMAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\[.*?\]\((.*?)\)").unwrap());

static HTML_SRC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"src="(.*?)""#).unwrap());

static RAW_URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://[^\s)]+").unwrap());

static DATA_URI_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"data:image/[^;]+;base64,[^")\s]+"#).unwrap());

static INLINE_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^data:image/[a-zA-Z0-9.+-]+;base64,").unwrap());

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    /// The provider answered with an error object.
    #[error("{0}")]
    Upstream(String),
    #[error("no image found in completion response")]
    NotFound,
    #[error("unsupported image reference: {0}")]
    Unsupported(String),
}

// ── Image reference ──────────────────────────────────────────────────────────

/// An image the caller can embed directly: a remote http(s) URL or a
/// self-contained `data:image/...;base64,` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    value: String,
    kind: ImageKind,
}

impl ImageReference {
    /// Classify a candidate string. Anything that is neither an http(s) URL
    /// nor an inline image data-URI is rejected.
    pub fn classify(candidate: &str) -> Option<Self> {
        let candidate = candidate.trim();

        if INLINE_PREFIX_RE.is_match(candidate) {
            return Some(Self {
                value: candidate.to_string(),
                kind: ImageKind::Inline,
            });
        }

        if candidate.starts_with("http://") || candidate.starts_with("https://") {
            let parsed = Url::parse(candidate).ok()?;
            parsed.host_str()?;
            return Some(Self {
                value: candidate.to_string(),
                kind: ImageKind::Remote,
            });
        }

        None
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn kind(&self) -> ImageKind {
        self.kind
    }

    pub fn into_string(self) -> String {
        self.value
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Locate the generated image in a completion response.
///
/// Precedence: top-level error, structured `images` on the first choice,
/// then the content text scanned for a Markdown image, an HTML `src`
/// attribute, a bare URL and finally an inline Base64 data-URI.
pub fn extract_image(response: &CompletionResponse) -> Result<ImageReference, NormalizeError> {
    if let Some(err) = &response.error {
        return Err(NormalizeError::Upstream(err.message.clone()));
    }

    let message = response.first_message().ok_or(NormalizeError::NotFound)?;

    if let Some(descriptor) = message.images.first() {
        if let Some(url) = descriptor.url().filter(|u| !u.trim().is_empty()) {
            tracing::debug!("image located in structured images field");
            return ImageReference::classify(url)
                .ok_or_else(|| NormalizeError::Unsupported(url.to_string()));
        }
    }

    let content = message
        .content
        .as_ref()
        .map(|c| c.text())
        .unwrap_or_default();

    extract_from_text(&content).ok_or(NormalizeError::NotFound)
}

/// Run the content cascade over free text.
pub fn extract_from_text(content: &str) -> Option<ImageReference> {
    if content.is_empty() {
        return None;
    }

    if let Some(found) = first_capture(&MARKDOWN_IMAGE_RE, content) {
        tracing::debug!("image located via markdown tag");
        return Some(found);
    }

    if let Some(found) = first_capture(&HTML_SRC_RE, content) {
        tracing::debug!("image located via html src attribute");
        return Some(found);
    }

    if let Some(found) = RAW_URL_RE
        .find_iter(content)
        .find_map(|m| ImageReference::classify(strip_trailing_punctuation(m.as_str())))
    {
        tracing::debug!("image located via bare url");
        return Some(found);
    }

    if let Some(found) = DATA_URI_RE
        .find_iter(content)
        .find_map(|m| ImageReference::classify(m.as_str()))
    {
        tracing::debug!("image located via inline data uri");
        return Some(found);
    }

    None
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn first_capture(re: &Regex, content: &str) -> Option<ImageReference> {
    re.captures_iter(content)
        .filter_map(|cap| cap.get(1))
        .find_map(|m| ImageReference::classify(m.as_str()))
}

fn strip_trailing_punctuation(url: &str) -> &str {
    url.trim_end_matches(TRAILING_PUNCTUATION)
}
