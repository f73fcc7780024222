use serde_json::{json, Value};

use crate::config::Config;
use crate::media;
use crate::models::CompletionResponse;

const USER_AGENT: &str = "virtual-tryon-api/1.0";
const ERROR_BODY_LOG_LIMIT: usize = 500;
const MAX_REDIRECTS: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("{0}")]
    Request(String),
    #[error("completion API returned status {status}: {body}")]
    Status { status: u16, body: String },
}

/// Redirects get the same host check as the URL a user submits, so a public
/// garment URL cannot bounce the download onto an internal address.
fn redirect_policy(allow_private_hosts: bool) -> reqwest::redirect::Policy {
    reqwest::redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            attempt.error("too many redirects")
        } else if !allow_private_hosts && media::is_internal_host(attempt.url()) {
            tracing::warn!(url = %attempt.url(), "refusing redirect to internal host");
            attempt.error("redirect to a private or local address")
        } else {
            attempt.follow()
        }
    })
}

pub fn build_http_client(config: &Config) -> Result<reqwest::Client, CompletionError> {
    let mut builder = reqwest::ClientBuilder::new()
        .connect_timeout(config.connect_timeout)
        .timeout(config.request_timeout)
        .redirect(redirect_policy(config.allow_private_hosts))
        .user_agent(USER_AGENT);

    if config.insecure_ssl {
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder
        .build()
        .map_err(|e| CompletionError::Request(e.to_string()))
}

/// One user turn carrying a text prompt and a single image.
pub fn build_payload(model: &str, prompt: &str, image_data_url: &str) -> Value {
    json!({
        "model": model,
        "messages": [
            {
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    { "type": "image_url", "image_url": { "url": image_data_url } }
                ]
            }
        ]
    })
}

/// POST a chat completion and parse the reply.
///
/// Providers report failures in-band as an `error` object, often with a
/// non-2xx status, so the body is parsed first and a failing status is only
/// reported when the body carries no error object of its own.
pub async fn chat_completion(
    client: &reqwest::Client,
    config: &Config,
    model: &str,
    prompt: &str,
    image_data_url: &str,
) -> Result<CompletionResponse, CompletionError> {
    let payload = build_payload(model, prompt, image_data_url);
    tracing::debug!(model, "sending completion request");

    let response = client
        .post(config.completions_url())
        .bearer_auth(&config.api_key)
        .header("HTTP-Referer", &config.site_url)
        .header("X-Title", &config.site_name)
        .json(&payload)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                CompletionError::Request(format!("TimeoutError: {}", e))
            } else if e.is_connect() {
                CompletionError::Request(format!("ConnectError: {}", e))
            } else {
                CompletionError::Request(format!("RequestError: {}", e))
            }
        })?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| CompletionError::Request(e.to_string()))?;

    match serde_json::from_str::<CompletionResponse>(&body) {
        Ok(parsed) if status.is_success() || parsed.error.is_some() => {
            if !status.is_success() {
                tracing::warn!(model, status = status.as_u16(), "completion API returned an error status");
            }
            Ok(parsed)
        }
        Ok(_) => Err(CompletionError::Status {
            status: status.as_u16(),
            body: truncate(&body, ERROR_BODY_LOG_LIMIT),
        }),
        Err(err) if status.is_success() => {
            Err(CompletionError::Request(format!("Malformed completion response: {}", err)))
        }
        Err(_) => {
            let snippet = truncate(&body, ERROR_BODY_LOG_LIMIT);
            tracing::warn!(model, status = status.as_u16(), body = %snippet, "completion request failed");
            Err(CompletionError::Status {
                status: status.as_u16(),
                body: snippet,
            })
        }
    }
}

fn truncate(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_text_and_image_parts() {
        let payload = build_payload("m/1", "describe", "data:image/png;base64,AAAA");
        assert_eq!(payload["model"], "m/1");
        let parts = payload["messages"][0]["content"].as_array().unwrap();
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[0]["text"], "describe");
        assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,AAAA");
    }

    #[test]
    fn truncate_marks_long_bodies() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc... (truncated)");
    }
}
