use std::env;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_ANALYSIS_MODEL: &str = "google/gemini-3-pro-preview";
const DEFAULT_IMAGE_MODEL: &str = "google/gemini-2.5-flash-image";
const DEFAULT_SITE_URL: &str = "https://vercel.com";
const DEFAULT_SITE_NAME: &str = "Kurdish Virtual Try-On";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub base_url: String,
    pub analysis_model: String,
    pub image_model: String,
    pub site_url: String,
    pub site_name: String,
    pub bind_addr: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_body_bytes: usize,
    pub max_garment_bytes: usize,
    pub insecure_ssl: bool,
    /// Allow garment downloads from loopback, private and link-local hosts.
    pub allow_private_hosts: bool,
}

impl Config {
    /// Read settings from the process environment (after `.env`, if any).
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = env::var("OPENROUTER_API_KEY")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::Missing("OPENROUTER_API_KEY"))?;

        let base_url = env_string("OPENROUTER_BASE_URL", DEFAULT_BASE_URL);
        if url::Url::parse(&base_url).is_err() {
            return Err(ConfigError::Invalid {
                name: "OPENROUTER_BASE_URL",
                value: base_url,
            });
        }

        Ok(Self {
            api_key,
            base_url,
            analysis_model: env_string("TRYON_ANALYSIS_MODEL", DEFAULT_ANALYSIS_MODEL),
            image_model: env_string("TRYON_IMAGE_MODEL", DEFAULT_IMAGE_MODEL),
            site_url: env_string("TRYON_SITE_URL", DEFAULT_SITE_URL),
            site_name: env_string("TRYON_SITE_NAME", DEFAULT_SITE_NAME),
            bind_addr: env_string("TRYON_BIND_ADDR", DEFAULT_BIND_ADDR),
            request_timeout: Duration::from_secs(env_u64("TRYON_REQUEST_TIMEOUT_SECS", 120)),
            connect_timeout: Duration::from_secs(env_u64("TRYON_CONNECT_TIMEOUT_SECS", 10)),
            max_body_bytes: env_usize("TRYON_MAX_BODY_BYTES", 25 * 1024 * 1024),
            max_garment_bytes: env_usize("TRYON_MAX_GARMENT_BYTES", 10 * 1024 * 1024),
            insecure_ssl: env::var("TRYON_INSECURE_SSL").as_deref() == Ok("1"),
            allow_private_hosts: env::var("TRYON_ALLOW_PRIVATE_HOSTS").as_deref() == Ok("1"),
        })
    }

    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
pub(crate) fn test_config(base_url: &str) -> Config {
    Config {
        api_key: "test-key".to_string(),
        base_url: base_url.to_string(),
        analysis_model: DEFAULT_ANALYSIS_MODEL.to_string(),
        image_model: DEFAULT_IMAGE_MODEL.to_string(),
        site_url: DEFAULT_SITE_URL.to_string(),
        site_name: DEFAULT_SITE_NAME.to_string(),
        bind_addr: "127.0.0.1:0".to_string(),
        request_timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(2),
        max_body_bytes: 1024 * 1024,
        max_garment_bytes: 64 * 1024,
        insecure_ssl: false,
        // Mock hosts in tests bind to 127.0.0.1.
        allow_private_hosts: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completions_url_tolerates_trailing_slash() {
        let config = test_config("http://127.0.0.1:9/api/v1/");
        assert_eq!(config.completions_url(), "http://127.0.0.1:9/api/v1/chat/completions");
    }
}
