use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};

use super::retry::RetryPolicy;
use super::{
    PromptContext, PromptPurpose, ProviderClient, ProviderError, RegionDescription,
    RegionRequest, TextDraft,
};
use crate::config::{ConfigError, EndpointConfig, ProviderRole};

const VISION_SYSTEM_PROMPT: &str = "You identify the single object at the tapped point of a photo. \
Return strict JSON only with keys object_label (short string), seed_concepts (array of up to \
three short material or process concepts), scene_descriptors (array of short visual facts) and \
sensitive (true when the region shows a face, a licence plate or other identifying detail).";

const CONCEPT_SYSTEM_PROMPT: &str = "You extend an associative concept path by exactly one step. \
Reply with a single short noun phrase of at most eight words, no punctuation, no explanation.";

const PARAGRAPH_SYSTEM_PROMPT: &str = "You write exactly one paragraph of 250-350 words with no \
blank lines. No second person. No summaries or stock conclusions. Follow the concept path in \
order, keep the object present throughout, include at least one jump in physical or temporal \
scale, and end either by returning to the object or by leaving the thought suspended. Evidence fragments, \
when given, may ground facts but must not be quoted as a list.";

const BODY_PREVIEW_CHARS: usize = 512;

/// OpenAI-compatible chat completions client.
pub struct ExternalProvider {
    role: ProviderRole,
    model: String,
    api_key: String,
    api_base: String,
    timeout: Duration,
    retry: RetryPolicy,
    http: HttpClient,
}

impl ExternalProvider {
    pub fn new(
        config: &EndpointConfig,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, ConfigError> {
        let prefix = config.role.as_str().to_ascii_uppercase();
        let missing = |key: &str| ConfigError::Missing {
            key: format!("{prefix}_{key}"),
            provider_key: format!("{prefix}_PROVIDER"),
            provider: "external".to_string(),
        };
        let model = config.model.clone().ok_or_else(|| missing("MODEL"))?;
        let api_key = config.api_key.clone().ok_or_else(|| missing("API_KEY"))?;
        let http = HttpClient::builder()
            .build()
            .map_err(|err| ConfigError::HttpClient {
                role: config.role.as_str(),
                reason: err.to_string(),
            })?;
        Ok(Self {
            role: config.role,
            model,
            api_key,
            api_base: config.endpoint.trim_end_matches('/').to_string(),
            timeout,
            retry,
            http,
        })
    }

    fn chat(&self, payload: &Value) -> Result<String, ProviderError> {
        let endpoint = format!("{}/chat/completions", self.api_base);
        self.retry.run(self.name(), |attempt| {
            tracing::debug!(
                role = self.role.as_str(),
                model = %self.model,
                attempt,
                "posting chat completion"
            );
            self.post_once(&endpoint, payload)
        })
    }

    fn post_once(&self, endpoint: &str, payload: &Value) -> Result<String, ProviderError> {
        let response = self
            .http
            .post(endpoint)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .map_err(transport_error)?;
        let status = response.status().as_u16();
        let body = response.text().map_err(transport_error)?;
        if !(200..300).contains(&status) {
            return Err(status_error(status, &body));
        }
        let parsed: Value = serde_json::from_str(&body).map_err(|err| {
            ProviderError::Transient(format!("response was not valid JSON: {err}"))
        })?;
        message_text(&parsed)
    }
}

impl ProviderClient for ExternalProvider {
    fn name(&self) -> &str {
        "external"
    }

    fn describe_region(
        &self,
        request: &RegionRequest<'_>,
    ) -> Result<RegionDescription, ProviderError> {
        let mime = image::guess_format(request.image)
            .map(|format| format.to_mime_type())
            .unwrap_or("image/jpeg");
        let data_url = format!("data:{mime};base64,{}", BASE64.encode(request.image));
        let payload = json!({
            "model": self.model,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": VISION_SYSTEM_PROMPT},
                {
                    "role": "user",
                    "content": [
                        {
                            "type": "text",
                            "text": format!(
                                "tap_x={:.3}, tap_y={:.3} (fractions of width and height).",
                                request.tap.x, request.tap.y
                            ),
                        },
                        {"type": "image_url", "image_url": {"url": data_url}},
                    ],
                },
            ],
        });
        let content = self.chat(&payload)?;
        Ok(parse_region(&content))
    }

    fn continue_text(&self, context: &PromptContext) -> Result<TextDraft, ProviderError> {
        let system = match context.purpose {
            PromptPurpose::NextConcept => CONCEPT_SYSTEM_PROMPT,
            PromptPurpose::Paragraph => PARAGRAPH_SYSTEM_PROMPT,
        };
        let payload = json!({
            "model": self.model,
            "temperature": 0.7,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt_body(context).to_string()},
            ],
        });
        let text = self.chat(&payload)?;
        Ok(TextDraft {
            text: text.trim().to_string(),
        })
    }
}

fn prompt_body(context: &PromptContext) -> Value {
    let mut body = json!({
        "object_label": context.object_label,
        "vector_domain": context.domain.as_str(),
        "descriptors": context.descriptors,
        "concept_path": context.path,
        "attempt": context.attempt,
    });
    if let Some(prior) = &context.prior_paragraph {
        body["previous_paragraph"] = Value::String(prior.clone());
    }
    if !context.evidence.is_empty() {
        body["evidence"] = context
            .evidence
            .iter()
            .map(|snippet| Value::String(snippet.fragment()))
            .collect();
    }
    if !context.previous_violations.is_empty() {
        body["repair"] = Value::Array(
            context
                .previous_violations
                .iter()
                .map(|violation| Value::String(format!("fix: {violation}")))
                .collect(),
        );
    }
    body
}

fn transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(err.to_string())
    } else if err.is_builder() {
        ProviderError::Rejected(err.to_string())
    } else {
        ProviderError::Transient(err.to_string())
    }
}

fn status_error(status: u16, body: &str) -> ProviderError {
    let preview = truncate_text(body, BODY_PREVIEW_CHARS);
    let detail = format!("status {status}: {preview}");
    let error_code = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/code")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_default();
    if error_code == "content_policy_violation" {
        return ProviderError::ContentDisallowed(detail);
    }
    match status {
        408 => ProviderError::Timeout(detail),
        429 | 500..=599 => ProviderError::Transient(detail),
        _ => ProviderError::Rejected(detail),
    }
}

fn message_text(payload: &Value) -> Result<String, ProviderError> {
    let choice = payload
        .pointer("/choices/0")
        .ok_or_else(|| ProviderError::Transient("response had no choices".to_string()))?;
    if choice.get("finish_reason").and_then(Value::as_str) == Some("content_filter") {
        return Err(ProviderError::ContentDisallowed(
            "completion stopped by content filter".to_string(),
        ));
    }
    let message = choice.get("message").cloned().unwrap_or(Value::Null);
    if let Some(refusal) = message
        .get("refusal")
        .and_then(Value::as_str)
        .filter(|text| !text.trim().is_empty())
    {
        return Err(ProviderError::ContentDisallowed(refusal.to_string()));
    }
    let text = match message.get("content") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<&str>>()
            .join(""),
        _ => String::new(),
    };
    Ok(text)
}

/// Malformed output reads as "nothing identified" rather than an error.
fn parse_region(content: &str) -> RegionDescription {
    let parsed: Value = serde_json::from_str(content.trim()).unwrap_or(Value::Null);
    let strings = |key: &str| -> Vec<String> {
        parsed
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|item| item.trim().to_string())
                    .filter(|item| !item.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    };
    let object_label = parsed
        .get("object_label")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .unwrap_or("object")
        .to_string();
    let mut scene_descriptors = strings("scene_descriptors");
    if scene_descriptors.is_empty() {
        scene_descriptors.push("ambient manufactured light".to_string());
    }
    let sensitive = ["sensitive", "safety_face_or_plate"]
        .iter()
        .any(|key| parsed.get(*key).and_then(Value::as_bool).unwrap_or(false));
    RegionDescription {
        object_label,
        seed_concepts: strings("seed_concepts"),
        scene_descriptors,
        sensitive,
    }
}

fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}
