use crate::errors::GenerationError;

const DEFAULT_API_BASE: &str = "http://localhost:4000";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Client for an OpenAI-compatible chat-completions gateway (LiteLLM, or
/// anything speaking the same dialect). Treated as a black box that either
/// answers, fails transiently, or is misconfigured.
pub struct LlmClient {
    client: reqwest::Client,
    api_base: String,
    model: String,
    api_key: Option<String>,
}

impl LlmClient {
    /// Reads `LLM_API_BASE`, `MODEL_NAME`, and the optional `LLM_API_KEY`.
    pub fn from_env(client: reqwest::Client) -> Self {
        let api_base =
            std::env::var("LLM_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_owned());
        let model = std::env::var("MODEL_NAME").unwrap_or_else(|_| DEFAULT_MODEL.to_owned());
        let api_key = std::env::var("LLM_API_KEY").ok();
        Self::new(client, &api_base, &model, api_key)
    }

    pub fn new(
        client: reqwest::Client,
        api_base: &str,
        model: &str,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_owned(),
            model: model.to_owned(),
            api_key,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn generate(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, GenerationError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system_prompt {
            messages.push(serde_json::json!({ "role": "system", "content": system }));
        }
        messages.push(serde_json::json!({ "role": "user", "content": prompt }));

        let endpoint = format!("{}/v1/chat/completions", self.api_base);
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": temperature,
            "max_tokens": max_tokens,
        });

        let mut request = self.client.post(&endpoint).json(&body);
        if let Some(key) = self.api_key.as_deref() {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| GenerationError::Transient(format!("POST {endpoint}: {err}")))?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|err| GenerationError::Transient(err.to_string()))?;

        if !status.is_success() {
            let detail = parse_error_message(&raw).unwrap_or(raw);
            // 4xx means the request itself is wrong (bad key, unknown model);
            // retrying the same call cannot help.
            if status.is_client_error() {
                return Err(GenerationError::Config(format!("{status}: {detail}")));
            }
            return Err(GenerationError::Transient(format!("{status}: {detail}")));
        }

        let value: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|err| GenerationError::Transient(format!("parse gateway response: {err}")))?;
        extract_completion_text(&value)
    }
}

fn parse_error_message(raw_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    let message = value.get("error")?.get("message")?.as_str()?.to_owned();
    Some(message)
}

fn extract_completion_text(value: &serde_json::Value) -> Result<String, GenerationError> {
    let text = value
        .pointer("/choices/0/message/content")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            GenerationError::Transient("gateway response missing message content".to_owned())
        })?;
    if text.trim().is_empty() {
        return Err(GenerationError::Transient(
            "gateway returned empty completion".to_owned(),
        ));
    }
    Ok(text.to_owned())
}
