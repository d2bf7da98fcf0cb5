use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};

use crate::config::EngineConfig;
use crate::model::{
    ContentPart, InlineImage, ModelError, ModelRequest, ModelResponse, ModelService,
};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// `generateContent` over the Gemini REST API.
pub struct GeminiModelService {
    api_base: String,
    api_key: String,
    timeout: Duration,
    http: HttpClient,
}

impl GeminiModelService {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            api_base: api_base.into().trim().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            timeout,
            http: HttpClient::new(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> anyhow::Result<Self> {
        let Some(api_key) = config.api_key.clone() else {
            anyhow::bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };
        Ok(Self::new(&config.api_base, api_key, config.request_timeout))
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }
}

impl ModelService for GeminiModelService {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(&self, model: &str, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        let endpoint = self.endpoint_for_model(model);
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", self.api_key.as_str())])
            .timeout(self.timeout)
            .json(&build_payload(request))
            .send()
            .map_err(|err| classify_transport_error(model, &err))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|err| ModelError::other(model, format!("response body read failed: {err}")))?;
        if !(200..300).contains(&status) {
            return Err(classify_status(model, status, &body));
        }
        let parsed: Value = serde_json::from_str(&body)
            .map_err(|err| ModelError::other(model, format!("invalid JSON payload: {err}")))?;
        parse_response(model, &parsed)
    }
}

pub(crate) fn build_payload(request: &ModelRequest) -> Value {
    let parts = request
        .parts
        .iter()
        .map(|part| match part {
            ContentPart::Text(text) => json!({ "text": text }),
            ContentPart::InlineData { mime_type, bytes } => json!({
                "inlineData": {
                    "mimeType": mime_type,
                    "data": BASE64.encode(bytes),
                }
            }),
        })
        .collect::<Vec<Value>>();

    let mut payload = Map::new();
    payload.insert(
        "contents".to_string(),
        Value::Array(vec![json!({
            "role": "user",
            "parts": parts,
        })]),
    );
    // Text-only models reject an explicit modality list.
    if request.wants_image() {
        payload.insert(
            "generationConfig".to_string(),
            json!({
                "responseModalities": request
                    .modalities
                    .iter()
                    .map(|modality| modality.as_wire())
                    .collect::<Vec<&str>>(),
            }),
        );
    }
    Value::Object(payload)
}

pub(crate) fn parse_response(model: &str, payload: &Value) -> Result<ModelResponse, ModelError> {
    let candidates = payload
        .get("candidates")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut text = String::new();
    let mut images = Vec::new();

    for candidate in candidates {
        let parts = candidate
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for part in parts {
            if let Some(chunk) = part.get("text").and_then(Value::as_str) {
                text.push_str(chunk);
                continue;
            }
            let Some(inline) = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object)
            else {
                continue;
            };
            let data = inline
                .get("data")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if data.is_empty() {
                continue;
            }
            let bytes = BASE64.decode(data.as_bytes()).map_err(|err| {
                ModelError::other(model, format!("image base64 decode failed: {err}"))
            })?;
            let mime_type = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .unwrap_or("image/png")
                .to_string();
            images.push(InlineImage { mime_type, bytes });
        }
    }

    Ok(ModelResponse { text, images })
}

pub(crate) fn classify_status(model: &str, status: u16, body: &str) -> ModelError {
    let message = format!("request failed ({status}): {}", truncate_text(body, 512));
    if status == 429 || body.contains("RESOURCE_EXHAUSTED") {
        ModelError::rate_limited(model, message)
    } else {
        ModelError::other(model, message)
    }
}

fn classify_transport_error(model: &str, err: &reqwest::Error) -> ModelError {
    let message = format!("transport failure: {err}");
    if err.is_timeout() || err.is_connect() {
        ModelError::rate_limited(model, message)
    } else {
        ModelError::other(model, message)
    }
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use base64::Engine as _;
    use serde_json::{json, Value};

    use super::{build_payload, classify_status, parse_response, GeminiModelService, BASE64};
    use crate::model::{ContentPart, ModelErrorKind, ModelRequest};

    #[test]
    fn endpoint_prefixes_models_path_once() {
        let service = GeminiModelService::new(
            "https://example.test/v1beta/",
            "key",
            std::time::Duration::from_secs(5),
        );
        assert_eq!(
            service.endpoint_for_model("gemini-2.5-flash"),
            "https://example.test/v1beta/models/gemini-2.5-flash:generateContent"
        );
        assert_eq!(
            service.endpoint_for_model("models/gemini-2.5-flash"),
            "https://example.test/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    #[test]
    fn payload_inlines_photo_and_requests_image_modality() {
        let request = ModelRequest::text_and_image(vec![
            ContentPart::InlineData {
                mime_type: "image/jpeg".to_string(),
                bytes: vec![1, 2, 3],
            },
            ContentPart::Text("draw".to_string()),
        ]);
        let payload = build_payload(&request);

        assert_eq!(payload["contents"][0]["role"], json!("user"));
        assert_eq!(
            payload["contents"][0]["parts"][0]["inlineData"]["mimeType"],
            json!("image/jpeg")
        );
        assert_eq!(
            payload["contents"][0]["parts"][0]["inlineData"]["data"],
            json!(BASE64.encode([1u8, 2, 3]))
        );
        assert_eq!(payload["contents"][0]["parts"][1]["text"], json!("draw"));
        assert_eq!(
            payload["generationConfig"]["responseModalities"],
            json!(["TEXT", "IMAGE"])
        );
    }

    #[test]
    fn text_only_payload_omits_generation_config() {
        let payload = build_payload(&ModelRequest::text_only(vec![ContentPart::Text(
            "describe".to_string(),
        )]));
        assert!(payload.get("generationConfig").is_none());
    }

    #[test]
    fn response_parsing_collects_text_and_images() -> anyhow::Result<()> {
        let payload = json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "Here is "},
                    {"text": "your character."},
                    {"inlineData": {"mimeType": "image/png", "data": BASE64.encode([9u8, 8, 7])}},
                    {"inline_data": {"data": ""}}
                ]}
            }]
        });
        let response = parse_response("m", &payload)?;
        assert_eq!(response.text, "Here is your character.");
        assert_eq!(response.images.len(), 1);
        assert_eq!(response.images[0].bytes, vec![9, 8, 7]);
        assert_eq!(response.images[0].mime_type, "image/png");
        Ok(())
    }

    #[test]
    fn empty_candidates_are_an_empty_response() -> anyhow::Result<()> {
        let response = parse_response("m", &Value::Null)?;
        assert!(response.text.is_empty());
        assert!(response.images.is_empty());
        Ok(())
    }

    #[test]
    fn quota_failures_are_rate_limited() {
        assert_eq!(
            classify_status("m", 429, "Too Many Requests").kind,
            ModelErrorKind::RateLimited
        );
        assert_eq!(
            classify_status("m", 403, r#"{"error":{"status":"RESOURCE_EXHAUSTED"}}"#).kind,
            ModelErrorKind::RateLimited
        );
        let other = classify_status("m", 404, "model not found");
        assert_eq!(other.kind, ModelErrorKind::Other);
        assert_eq!(other.message, "request failed (404): model not found");
    }
}
