use anyhow::{Result, anyhow};
use serde::Deserialize;
use serde_json::json;

use crate::retry::{Backoff, is_throttled, retry_after};
use super::{
    DEFAULT_TEMPERATURE, Message, MessageRole, Provider, ProviderFuture, ProviderResponse,
    ProviderUsage, format_error_parts, join_role,
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1/messages";
pub(crate) const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";
const MAX_TOKENS: u32 = 4096;

#[derive(Debug, Clone)]
pub struct Claude {
    key: String,
    model: String,
    temperature: f32,
    messages: Vec<Message>,
}

impl Claude {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            messages: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.model = model;
        }
        self
    }
}

impl Provider for Claude {
    fn append_system_input(mut self, input: String) -> Self {
        self.messages.push(Message::system(input));
        self
    }

    fn append_user_input(mut self, input: String) -> Self {
        self.messages.push(Message::user(input));
        self
    }

    fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn complete(self) -> ProviderFuture {
        Box::pin(async move {
            let client = reqwest::Client::new();
            let url = base_url();

            let system = join_role(&self.messages, MessageRole::System);
            let messages = self
                .messages
                .iter()
                .filter(|message| message.role == MessageRole::User)
                .map(|message| {
                    json!({
                        "role": "user",
                        "content": [{"type": "text", "text": message.content}]
                    })
                })
                .collect::<Vec<_>>();

            let system_value = if system.trim().is_empty() {
                json!(null)
            } else {
                json!(system)
            };

            let body = json!({
                "model": self.model,
                "max_tokens": MAX_TOKENS,
                "temperature": self.temperature,
                "messages": messages,
                "system": system_value
            });

            let mut backoff = Backoff::new("Claude");
            loop {
                let response = client
                    .post(&url)
                    .header("x-api-key", self.key.clone())
                    .header("anthropic-version", "2023-06-01")
                    .json(&body)
                    .send()
                    .await?;

                let status = response.status();
                let retry_after = retry_after(response.headers());
                let text = response.text().await.unwrap_or_default();
                if status.is_success() {
                    return extract_completion(&text, &self.model);
                }
                if is_throttled(status, &text) && backoff.retry(retry_after).await {
                    continue;
                }
                return Err(anyhow!(
                    "Claude API error ({}): {}",
                    status,
                    extract_claude_error(&text).unwrap_or(text)
                ));
            }
        })
    }
}

fn base_url() -> String {
    std::env::var("ANTHROPIC_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string())
}

fn extract_completion(text: &str, fallback_model: &str) -> Result<ProviderResponse> {
    let payload: ClaudeResponse = serde_json::from_str(text)
        .map_err(|err| anyhow!("failed to parse Claude response JSON: {}", err))?;
    let blocks = payload
        .content
        .iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text.as_deref())
        .collect::<Vec<_>>();
    if blocks.is_empty() {
        return Err(anyhow!("no text content returned from Claude"));
    }

    let model = payload
        .model
        .filter(|value| !value.trim().is_empty())
        .or_else(|| Some(fallback_model.to_string()));
    let usage = payload.usage.map(|usage| ProviderUsage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: usage
            .input_tokens
            .zip(usage.output_tokens)
            .map(|(input, output)| input + output),
    });
    Ok(ProviderResponse {
        text: blocks.concat(),
        model,
        usage,
    })
}

fn extract_claude_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<ClaudeError>,
    }

    #[derive(Deserialize)]
    struct ClaudeError {
        #[serde(rename = "type")]
        kind: Option<String>,
        message: Option<String>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    Some(format_error_parts(error.message, error.kind, None))
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    content: Vec<ClaudeContent>,
    model: Option<String>,
    usage: Option<ClaudeUsage>,
}

#[derive(Debug, Deserialize)]
struct ClaudeUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ClaudeContent {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_text_blocks_and_sums_usage() {
        let payload = r#"{
            "model": "claude-3-5-haiku-20241022",
            "content": [{"type": "text", "text": "Ciao mondo"}],
            "usage": {"input_tokens": 20, "output_tokens": 5}
        }"#;
        let response = extract_completion(payload, DEFAULT_MODEL).expect("response");
        assert_eq!(response.text, "Ciao mondo");
        assert_eq!(response.usage.and_then(|usage| usage.total_tokens), Some(25));
    }

    #[test]
    fn error_body_keeps_type() {
        let body = r#"{"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}"#;
        assert_eq!(
            extract_claude_error(body).as_deref(),
            Some("Overloaded | type: overloaded_error")
        );
    }
}
