use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::error::UpstreamError;

// Thin client for the generateContent endpoint, one key per call
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
}

// Google API error envelope: {"error": {"code", "message", "status"}}
#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: Option<u16>,
    #[serde(default)]
    message: String,
    status: Option<String>,
}

impl GeminiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn generate_content(
        &self,
        key: &str,
        model: &str,
        body: &Value,
    ) -> Result<Value, UpstreamError> {
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, model);

        let res = self
            .http
            .post(&url)
            .header("x-goog-api-key", key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                UpstreamError::new(e.status().map(|s| s.as_u16()), format!("Request failed: {e}"))
            })?;

        let status = res.status().as_u16();
        let text = res
            .text()
            .await
            .map_err(|e| UpstreamError::new(Some(status), format!("Read error: {e}")))?;

        if !(200..300).contains(&status) {
            return Err(error_from_body(status, &text));
        }

        serde_json::from_str(&text)
            .map_err(|e| UpstreamError::new(Some(status), format!("Parse error: {e}")))
    }
}

/// Builds the error for a non-2xx response.
///
/// The API status name ("RESOURCE_EXHAUSTED") goes in front of the message
/// with underscores as spaces, so it reads "RESOURCE EXHAUSTED: ...".
pub fn error_from_body(status: u16, body: &str) -> UpstreamError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(ErrorEnvelope { error }) => {
            let message = match error.status {
                Some(name) => format!("{}: {}", name.replace('_', " "), error.message),
                None => error.message,
            };
            UpstreamError::new(Some(error.code.unwrap_or(status)), message)
        }
        Err(_) => UpstreamError::new(Some(status), format!("HTTP {status}: {}", body.trim())),
    }
}

fn first_parts(response: &Value) -> &[Value] {
    response["candidates"][0]["content"]["parts"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default()
}

// First inline image of the first candidate, as a data URL
pub fn first_inline_image(response: &Value) -> Option<String> {
    first_parts(response).iter().find_map(|part| {
        let inline = part.get("inlineData")?;
        let data = inline.get("data")?.as_str()?;
        let mime = inline
            .get("mimeType")
            .and_then(Value::as_str)
            .unwrap_or("image/png");
        Some(format!("data:{mime};base64,{data}"))
    })
}

pub fn first_text(response: &Value) -> Option<String> {
    let text: String = first_parts(response)
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    (!text.is_empty()).then_some(text)
}
