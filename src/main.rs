use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

mod config;
mod media;
mod models;
mod normalize;
mod openrouter;
mod tryon;

use config::Config;
use models::{CompletionResponse, NormalizeResponse, TryOnRequest};

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    client: reqwest::Client,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::from_env()?;
    let client = openrouter::build_http_client(&config)?;
    let bind_addr = config.bind_addr.clone();
    let state = AppState {
        config: Arc::new(config),
        client,
    };

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app(state)).await?;
    Ok(())
}

fn app(state: AppState) -> Router {
    let body_limit = state.config.max_body_bytes;
    Router::new()
        .route("/health", get(health))
        .route("/normalize", post(normalize_endpoint))
        .route("/try-on", post(try_on_endpoint))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Malformed or mistyped JSON bodies get the same `{"detail": ...}` shape
/// as every other failure.
fn rejection_response(rejection: JsonRejection) -> Response {
    let detail = rejection.body_text();
    tracing::debug!(detail = %detail, "rejected request body");
    (StatusCode::BAD_REQUEST, Json(json!({"detail": detail}))).into_response()
}

async fn normalize_endpoint(doc: Result<Json<CompletionResponse>, JsonRejection>) -> Response {
    let Json(doc) = match doc {
        Ok(doc) => doc,
        Err(rejection) => return rejection_response(rejection),
    };
    match normalize::extract_image(&doc) {
        Ok(image) => {
            tracing::debug!(kind = ?image.kind(), len = image.as_str().len(), "normalized image reference");
            let response = NormalizeResponse {
                image_kind: image.kind(),
                image: image.into_string(),
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => {
            use normalize::NormalizeError;
            let status = match &e {
                NormalizeError::Upstream(_) => StatusCode::BAD_GATEWAY,
                NormalizeError::NotFound | NormalizeError::Unsupported(_) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
            };
            (status, Json(json!({"detail": e.to_string()}))).into_response()
        }
    }
}

async fn try_on_endpoint(
    State(state): State<AppState>,
    req: Result<Json<TryOnRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match req {
        Ok(req) => req,
        Err(rejection) => return rejection_response(rejection),
    };
    match tryon::run(&state.client, &state.config, &req).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => {
            use media::MediaError;
            use tryon::TryOnError;
            let status = match &e {
                TryOnError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                TryOnError::Media(media) => match media {
                    MediaError::InvalidDataUrl(_)
                    | MediaError::InvalidBase64
                    | MediaError::NotAnImage
                    | MediaError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
                    MediaError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
                    MediaError::Upstream(_) | MediaError::Request(_) => StatusCode::BAD_GATEWAY,
                },
                TryOnError::Analysis(_)
                | TryOnError::Generation(_)
                | TryOnError::Completion(_) => StatusCode::BAD_GATEWAY,
                TryOnError::NoImage => StatusCode::UNPROCESSABLE_ENTITY,
            };
            tracing::warn!(status = status.as_u16(), error = %e, "try-on request failed");
            (status, Json(json!({"detail": e.to_string()}))).into_response()
        }
    }
}
