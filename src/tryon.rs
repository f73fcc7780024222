use crate::config::Config;
use crate::media::{self, MediaError};
use crate::models::{CompletionResponse, Gender, TryOnRequest, TryOnResponse};
use crate::normalize::{self, NormalizeError};
use crate::openrouter::{self, CompletionError};

// ── Prompts ──────────────────────────────────────────────────────────────────

const GARMENT_ANALYSIS_PROMPT: &str = "
    Analyze this image of clothing in extreme detail.
    Describe the type of clothing, the fabric texture, the color, the pattern, the cut, and the fit.
    Do not include any intro or outro text, just the description.
    ";

const FALLBACK_DESCRIPTION: &str = "Modern clothing";

const NO_IMAGE_MESSAGE: &str = "Failed to generate image. Please try again.";

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum TryOnError {
    #[error("{0}")]
    InvalidInput(String),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error("Analysis Error: {0}")]
    Analysis(String),
    #[error("Generation Error: {0}")]
    Generation(String),
    #[error("{}", NO_IMAGE_MESSAGE)]
    NoImage,
    #[error(transparent)]
    Completion(#[from] CompletionError),
}

// ── Validated input ──────────────────────────────────────────────────────────

enum GarmentSource<'a> {
    Upload(&'a str),
    Remote(&'a str),
}

fn validate(req: &TryOnRequest) -> Result<GarmentSource<'_>, TryOnError> {
    for (name, value) in [("height", req.height), ("weight", req.weight)] {
        if !value.is_finite() || value <= 0.0 {
            return Err(TryOnError::InvalidInput(format!(
                "{} must be a positive number",
                name
            )));
        }
    }

    let upload = req.garment_image.as_deref().filter(|s| !s.trim().is_empty());
    let remote = req.garment_url.as_deref().filter(|s| !s.trim().is_empty());
    match (upload, remote) {
        (Some(image), None) => Ok(GarmentSource::Upload(image)),
        (None, Some(url)) => Ok(GarmentSource::Remote(url.trim())),
        (Some(_), Some(_)) => Err(TryOnError::InvalidInput(
            "Provide either garment_image or garment_url, not both".to_string(),
        )),
        (None, None) => Err(TryOnError::InvalidInput(
            "A garment image or garment URL is required".to_string(),
        )),
    }
}

// ── Pipeline ─────────────────────────────────────────────────────────────────

pub fn build_generation_prompt(
    gender: Gender,
    description: &str,
    height: f64,
    weight: f64,
) -> String {
    format!(
        "
    Generate a high-quality, photorealistic full-body image of a {}.
    The person has the face provided in the first image (face image).
    The person is wearing the clothing described as: {}.
    The person's body proportions correspond to a height of {}cm and a weight of {}kg.
    The pose should be natural, standing, showcasing the outfit clearly.
    Ensure the lighting is professional fashion studio lighting.
    ",
        gender.subject(),
        description,
        height,
        weight
    )
}

fn garment_description(analysis: &CompletionResponse) -> Result<String, TryOnError> {
    if let Some(err) = &analysis.error {
        tracing::error!(message = %err.message, "garment analysis failed");
        return Err(TryOnError::Analysis(err.message.clone()));
    }

    Ok(analysis
        .first_text()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| FALLBACK_DESCRIPTION.to_string()))
}

/// Analyze the garment, then generate the composite photo.
pub async fn run(
    client: &reqwest::Client,
    config: &Config,
    req: &TryOnRequest,
) -> Result<TryOnResponse, TryOnError> {
    let garment_source = validate(req)?;

    let face = media::prepare_upload(&req.face_image)?;
    let garment = match garment_source {
        GarmentSource::Upload(image) => media::prepare_upload(image)?,
        GarmentSource::Remote(url) => {
            media::fetch_garment(
                client,
                url,
                config.max_garment_bytes,
                config.allow_private_hosts,
            )
            .await?
        }
    };

    tracing::info!(model = %config.analysis_model, "analysing garment");
    let analysis = openrouter::chat_completion(
        client,
        config,
        &config.analysis_model,
        GARMENT_ANALYSIS_PROMPT,
        &garment,
    )
    .await?;
    let description = garment_description(&analysis)?;
    tracing::debug!(description = %description, "garment description ready");

    tracing::info!(model = %config.image_model, "generating try-on image");
    let prompt = build_generation_prompt(req.gender, &description, req.height, req.weight);
    let generation =
        openrouter::chat_completion(client, config, &config.image_model, &prompt, &face).await?;

    let image = normalize::extract_image(&generation).map_err(|e| match e {
        NormalizeError::Upstream(message) => {
            tracing::error!(message = %message, "image generation failed");
            TryOnError::Generation(message)
        }
        other => {
            tracing::warn!(error = %other, "no usable image in generation response");
            TryOnError::NoImage
        }
    })?;

    tracing::info!(kind = ?image.kind(), "try-on image ready");
    Ok(TryOnResponse {
        image_kind: image.kind(),
        image: image.into_string(),
        garment_description: description,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::{extract::State, routing::post, Json, Router};
    use serde_json::{json, Value};

    use super::*;
    use crate::config::test_config;
    use crate::models::ImageKind;

    type Seen = Arc<Mutex<Vec<Value>>>;

    /// Spawn a fake completion API that answers the analysis and generation
    /// calls with the given documents, keyed on the requested model.
    async fn mock_upstream(analysis: Value, generation: Value) -> (String, Seen) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let replies = Arc::new((analysis, generation, seen.clone()));

        let app = Router::new()
            .route(
                "/api/v1/chat/completions",
                post(
                    |State(replies): State<Arc<(Value, Value, Seen)>>, Json(body): Json<Value>| async move {
                        let is_analysis = body["model"] == "google/gemini-3-pro-preview";
                        replies.2.lock().unwrap().push(body);
                        if is_analysis {
                            Json(replies.0.clone())
                        } else {
                            Json(replies.1.clone())
                        }
                    },
                ),
            )
            .with_state(replies);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/api/v1", addr), seen)
    }

    fn request(gender: &str) -> TryOnRequest {
        serde_json::from_value(json!({
            "face_image": "data:image/png;base64,iVBORw0KGgo=",
            "garment_image": "data:image/jpeg;base64,/9j/4AAQ",
            "height": "175",
            "weight": 70,
            "gender": gender
        }))
        .unwrap()
    }

    #[test]
    fn prompt_names_subject_and_metrics() {
        let prompt = build_generation_prompt(Gender::Female, "a red linen dress", 165.0, 58.5);
        assert!(prompt.contains("full-body image of a woman."));
        assert!(prompt.contains("described as: a red linen dress."));
        assert!(prompt.contains("height of 165cm and a weight of 58.5kg"));
    }

    #[test]
    fn rejects_missing_or_duplicate_garment() {
        let mut req = request("male");
        req.garment_image = None;
        assert!(matches!(validate(&req), Err(TryOnError::InvalidInput(_))));

        let mut req = request("male");
        req.garment_url = Some("https://shop.test/a.jpg".to_string());
        assert!(matches!(validate(&req), Err(TryOnError::InvalidInput(_))));
    }

    #[test]
    fn rejects_non_positive_metrics() {
        let mut req = request("male");
        req.weight = 0.0;
        let err = validate(&req).err().unwrap();
        assert_eq!(err.to_string(), "weight must be a positive number");
    }

    #[test]
    fn empty_analysis_falls_back_to_generic_description() {
        let resp: CompletionResponse =
            serde_json::from_value(json!({"choices": [{"message": {"content": "   "}}]})).unwrap();
        assert_eq!(garment_description(&resp).unwrap(), FALLBACK_DESCRIPTION);
    }

    #[tokio::test]
    async fn generates_image_from_both_steps() {
        let (base_url, seen) = mock_upstream(
            json!({"choices": [{"message": {"content": "A navy wool blazer."}}]}),
            json!({"choices": [{"message": {"content": "![look](https://cdn.test/out.png)"}}]}),
        )
        .await;
        let config = test_config(&base_url);
        let client = openrouter::build_http_client(&config).unwrap();

        let out = run(&client, &config, &request("نێر")).await.unwrap();
        assert_eq!(out.image, "https://cdn.test/out.png");
        assert_eq!(out.image_kind, ImageKind::Remote);
        assert_eq!(out.garment_description, "A navy wool blazer.");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(
            seen[0]["messages"][0]["content"][1]["image_url"]["url"],
            "data:image/jpeg;base64,/9j/4AAQ"
        );
        let prompt = seen[1]["messages"][0]["content"][0]["text"].as_str().unwrap();
        assert!(prompt.contains("image of a man."));
        assert!(prompt.contains("A navy wool blazer."));
        assert_eq!(
            seen[1]["messages"][0]["content"][1]["image_url"]["url"],
            "data:image/png;base64,iVBORw0KGgo="
        );
    }

    #[tokio::test]
    async fn analysis_error_is_prefixed() {
        let (base_url, _) = mock_upstream(
            json!({"error": {"message": "model overloaded"}}),
            json!({}),
        )
        .await;
        let config = test_config(&base_url);
        let client = openrouter::build_http_client(&config).unwrap();

        let err = run(&client, &config, &request("male")).await.unwrap_err();
        assert_eq!(err.to_string(), "Analysis Error: model overloaded");
    }

    #[tokio::test]
    async fn generation_error_and_missing_image() {
        let (base_url, _) = mock_upstream(
            json!({"choices": [{"message": {"content": "Jeans"}}]}),
            json!({"error": {"message": "content policy"}}),
        )
        .await;
        let config = test_config(&base_url);
        let client = openrouter::build_http_client(&config).unwrap();
        let err = run(&client, &config, &request("female")).await.unwrap_err();
        assert_eq!(err.to_string(), "Generation Error: content policy");

        let (base_url, _) = mock_upstream(
            json!({"choices": [{"message": {"content": "Jeans"}}]}),
            json!({"choices": [{"message": {"content": "I cannot generate this."}}]}),
        )
        .await;
        let config = test_config(&base_url);
        let err = run(&client, &config, &request("female")).await.unwrap_err();
        assert!(matches!(err, TryOnError::NoImage));
        assert_eq!(err.to_string(), NO_IMAGE_MESSAGE);
    }

    #[tokio::test]
    async fn garment_url_is_downloaded_and_inlined() {
        let png = crate::media::tests::PNG_MAGIC.to_vec();
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let seen_upstream = seen.clone();

        let app = Router::new()
            .route(
                "/shirt",
                axum::routing::get(move || {
                    let png = png.clone();
                    async move { png }
                }),
            )
            .route(
                "/api/v1/chat/completions",
                post(move |Json(body): Json<Value>| {
                    let seen_upstream = seen_upstream.clone();
                    async move {
                        let is_analysis = body["model"] == "google/gemini-3-pro-preview";
                        seen_upstream.lock().unwrap().push(body);
                        if is_analysis {
                            Json(json!({"choices": [{"message": {"content": "Striped shirt"}}]}))
                        } else {
                            Json(json!({"choices": [{"message": {"images": [
                                {"image_url": {"url": "data:image/png;base64,AAAA"}}
                            ]}}]}))
                        }
                    }
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let config = test_config(&format!("http://{}/api/v1", addr));
        let client = openrouter::build_http_client(&config).unwrap();
        let mut req = request("male");
        req.garment_image = None;
        req.garment_url = Some(format!("http://{}/shirt", addr));

        let out = run(&client, &config, &req).await.unwrap();
        assert_eq!(out.image, "data:image/png;base64,AAAA");
        assert_eq!(out.image_kind, ImageKind::Inline);

        let seen = seen.lock().unwrap();
        let garment = seen[0]["messages"][0]["content"][1]["image_url"]["url"]
            .as_str()
            .unwrap();
        assert!(garment.starts_with("data:image/png;base64,"));
    }
}
