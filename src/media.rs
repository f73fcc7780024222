use std::net::{Ipv4Addr, Ipv6Addr};

use base64::{engine::general_purpose, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use url::{Host, Url};

// ── Lazy static regexes ──────────────────────────────────────────────────────

static DATA_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^data:(image/[a-zA-Z0-9.+-]+);base64,([A-Za-z0-9+/=\s]+)$").unwrap()
});

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("{0}")]
    InvalidDataUrl(String),
    #[error("image payload is not valid base64")]
    InvalidBase64,
    #[error("payload is not a recognised image")]
    NotAnImage,
    #[error("{0}")]
    InvalidUrl(String),
    #[error("garment image is larger than {0} bytes")]
    TooLarge(usize),
    #[error("garment image host returned status {0}")]
    Upstream(u16),
    #[error("{0}")]
    Request(String),
}

// ── Data URLs ────────────────────────────────────────────────────────────────

pub fn to_data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, general_purpose::STANDARD.encode(bytes))
}

/// Sniff an image MIME type from magic bytes.
pub fn detect_image_mime(bytes: &[u8]) -> Option<&'static str> {
    infer::get(bytes)
        .map(|kind| kind.mime_type())
        .filter(|mime| mime.starts_with("image/"))
}

/// Turn an uploaded image into a canonical `data:image/...;base64,` URL.
///
/// Accepts either a full data-URL (as a browser `FileReader` produces) or the
/// bare Base64 payload, in which case the MIME type is sniffed.
pub fn prepare_upload(input: &str) -> Result<String, MediaError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(MediaError::InvalidDataUrl("image is empty".to_string()));
    }

    if input.starts_with("data:") {
        let caps = DATA_URL_RE.captures(input).ok_or_else(|| {
            MediaError::InvalidDataUrl(
                "expected data:image/<type>;base64,<payload>".to_string(),
            )
        })?;
        let mime = caps[1].to_lowercase();
        let bytes = decode_base64(&caps[2])?;
        return Ok(to_data_url(&mime, &bytes));
    }

    let bytes = decode_base64(input)?;
    let mime = detect_image_mime(&bytes).ok_or(MediaError::NotAnImage)?;
    Ok(to_data_url(mime, &bytes))
}

fn decode_base64(payload: &str) -> Result<Vec<u8>, MediaError> {
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|_| MediaError::InvalidBase64)?;
    if bytes.is_empty() {
        return Err(MediaError::InvalidBase64);
    }
    Ok(bytes)
}

// ── Remote garment images ────────────────────────────────────────────────────

/// True for hosts that point back into the server's own network: loopback,
/// private, link-local and unspecified addresses, and `localhost`.
pub fn is_internal_host(url: &Url) -> bool {
    match url.host() {
        Some(Host::Ipv4(ip)) => is_internal_ipv4(ip),
        Some(Host::Ipv6(ip)) => is_internal_ipv6(ip),
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.').to_lowercase();
            domain == "localhost" || domain.ends_with(".localhost")
        }
        None => false,
    }
}

fn is_internal_ipv4(ip: Ipv4Addr) -> bool {
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
}

fn is_internal_ipv6(ip: Ipv6Addr) -> bool {
    if let Some(mapped) = ip.to_ipv4_mapped() {
        return is_internal_ipv4(mapped);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
}

fn validate_url(url: &str, allow_private_hosts: bool) -> Result<Url, MediaError> {
    let parsed =
        Url::parse(url).map_err(|_| MediaError::InvalidUrl("Invalid garment URL".to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(MediaError::InvalidUrl(
            "Only http and https garment URLs are allowed".to_string(),
        ));
    }
    if parsed.host_str().unwrap_or("").is_empty() {
        return Err(MediaError::InvalidUrl("Garment URL has no host".to_string()));
    }
    if !allow_private_hosts && is_internal_host(&parsed) {
        return Err(MediaError::InvalidUrl(
            "Garment URL points to a private or local address".to_string(),
        ));
    }
    Ok(parsed)
}

/// Download a garment photo and inline it as a data-URL.
///
/// The body is read chunk by chunk so an oversized response is cut off as
/// soon as it passes `max_bytes`, whether or not it announced a length.
pub async fn fetch_garment(
    client: &reqwest::Client,
    url: &str,
    max_bytes: usize,
    allow_private_hosts: bool,
) -> Result<String, MediaError> {
    let parsed = validate_url(url, allow_private_hosts)?;
    tracing::info!(url = %parsed, "fetching garment image");

    let mut response = client
        .get(parsed)
        .header(reqwest::header::ACCEPT, "image/*")
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                MediaError::Request(format!("TimeoutError: {}", e))
            } else if e.is_connect() {
                MediaError::Request(format!("ConnectError: {}", e))
            } else {
                MediaError::Request(format!("RequestError: {}", e))
            }
        })?;

    if !response.status().is_success() {
        return Err(MediaError::Upstream(response.status().as_u16()));
    }

    if response
        .content_length()
        .is_some_and(|len| len > max_bytes as u64)
    {
        return Err(MediaError::TooLarge(max_bytes));
    }

    let header_mime = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or("").trim().to_lowercase())
        .filter(|v| v.starts_with("image/"));

    let mut bytes: Vec<u8> = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| MediaError::Request(e.to_string()))?
    {
        if bytes.len() + chunk.len() > max_bytes {
            tracing::warn!(max_bytes, "garment image exceeded size limit");
            return Err(MediaError::TooLarge(max_bytes));
        }
        bytes.extend_from_slice(&chunk);
    }

    let mime = match header_mime {
        Some(mime) => mime,
        None => detect_image_mime(&bytes)
            .ok_or(MediaError::NotAnImage)?
            .to_string(),
    };

    tracing::debug!(mime = %mime, bytes = bytes.len(), "garment image downloaded");
    Ok(to_data_url(&mime, &bytes))
}
