use serde::{Deserialize, Deserializer, Serialize};

// ── Completion API documents ─────────────────────────────────────────────────

/// Response document of an OpenAI-compatible `chat/completions` call.
///
/// Every field is optional; providers differ in what they send back and the
/// normalizer only needs a handful of paths through the document.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CompletionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<Choice>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ApiError {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Choice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ImageDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<ImageUrl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ImageDescriptor {
    pub fn url(&self) -> Option<&str> {
        self.image_url
            .as_ref()
            .map(|u| u.url.as_str())
            .or(self.url.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

/// Message content is usually a plain string, but some providers answer with
/// a list of typed parts.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContentPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl MessageContent {
    /// Flatten the content to text. Non-text parts are dropped.
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl CompletionResponse {
    pub fn first_message(&self) -> Option<&Message> {
        self.choices
            .as_ref()
            .and_then(|c| c.first())
            .and_then(|c| c.message.as_ref())
    }

    pub fn first_text(&self) -> Option<String> {
        self.first_message()
            .and_then(|m| m.content.as_ref())
            .map(MessageContent::text)
    }
}

// ── Service request / response bodies ────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    #[serde(alias = "نێر", alias = "man")]
    Male,
    #[serde(alias = "مێ", alias = "woman")]
    Female,
}

impl Gender {
    pub fn subject(self) -> &'static str {
        match self {
            Gender::Male => "man",
            Gender::Female => "woman",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TryOnRequest {
    pub face_image: String,
    #[serde(default, alias = "cloth_image")]
    pub garment_image: Option<String>,
    #[serde(default, alias = "cloth_url")]
    pub garment_url: Option<String>,
    #[serde(deserialize_with = "de_metric")]
    pub height: f64,
    #[serde(deserialize_with = "de_metric")]
    pub weight: f64,
    pub gender: Gender,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Remote,
    Inline,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NormalizeResponse {
    pub image: String,
    pub image_kind: ImageKind,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TryOnResponse {
    pub image: String,
    pub image_kind: ImageKind,
    pub garment_description: String,
}

/// Metrics arrive from form inputs, so both `170` and `"170"` are accepted.
fn de_metric<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(f64),
        Text(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| serde::de::Error::custom(format!("not a number: {:?}", s))),
    }
}
