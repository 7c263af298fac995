// ABOUTME: Generation client for turning a prompt into a project file set via Anthropic Claude
// ABOUTME: Fetches the API key from a secret store, bounds the reply size, and validates the result

use crate::response::{parse_file_set, snippet};
use crate::secrets::SecretStore;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use shipyard_config::GenerationConfig;
use shipyard_core::{ChatMessage, ChatRole, FileSetLimits, GeneratedFileSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// System instruction constraining the model to reply with a file map only
pub const SYSTEM_INSTRUCTION: &str = "You generate complete, runnable web applications. \
Reply with a single JSON object and nothing else. Each key is a relative file path \
(for example \"index.html\", \"package.json\", \"src/main.jsx\") and each value is the \
full text content of that file. Do not wrap the JSON in prose. Include a package.json \
whose \"dev\" script starts a development server that honours the PORT environment \
variable and listens on all interfaces.";

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Most of an error reply that is read before classifying it
const ERROR_BODY_LIMIT: usize = 16 * 1024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("Generation service unreachable: {0}")]
    Network(String),

    #[error("No usable API key: {0}")]
    AuthMissing(String),

    #[error("Generation reply was malformed: {0}")]
    MalformedResponse(String),

    #[error("Generation quota exceeded: {0}")]
    QuotaExceeded(String),
}

pub type GenerationResult<T> = Result<T, GenerationError>;

/// Conversation context sent along with a prompt
#[derive(Debug, Clone, Default)]
pub struct GenerationContext {
    /// Earlier messages of the session, oldest first
    pub history: Vec<ChatMessage>,
}

impl GenerationContext {
    pub fn new(history: Vec<ChatMessage>) -> Self {
        Self { history }
    }

    /// Most recent user prompts, oldest first, at most `turns` of them
    pub fn recent_prompts(&self, turns: usize) -> Vec<&str> {
        let mut prompts: Vec<&str> = self
            .history
            .iter()
            .rev()
            .filter(|m| m.role() == ChatRole::User)
            .take(turns)
            .map(|m| m.content())
            .collect();
        prompts.reverse();
        prompts
    }
}

/// Anything that can turn a prompt into a validated file set
#[async_trait]
pub trait FileGenerator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        context: &GenerationContext,
    ) -> GenerationResult<GeneratedFileSet>;
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

/// Production [`FileGenerator`] backed by the Anthropic Messages API
pub struct CodeGenerationClient {
    client: Client,
    secrets: Arc<dyn SecretStore>,
    config: GenerationConfig,
    limits: FileSetLimits,
}

impl CodeGenerationClient {
    pub fn new(
        config: GenerationConfig,
        limits: FileSetLimits,
        secrets: Arc<dyn SecretStore>,
    ) -> GenerationResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| GenerationError::Network(format!("failed to build HTTP client: {}", e)))?;

        if config.model != shipyard_config::settings::DEFAULT_GENERATION_MODEL {
            info!("Using custom generation model: {}", config.model);
        }

        Ok(Self {
            client,
            secrets,
            config,
            limits,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn user_message(&self, prompt: &str, context: &GenerationContext) -> String {
        let earlier = context.recent_prompts(self.config.history_turns);
        if earlier.is_empty() {
            return prompt.to_string();
        }

        let mut content = String::from("Earlier requests in this session:\n");
        for p in earlier {
            content.push_str("- ");
            content.push_str(p);
            content.push('\n');
        }
        content.push_str("\nNew request:\n");
        content.push_str(prompt);
        content
    }

    /// Read the body, refusing to buffer more than the configured limit
    async fn read_bounded(&self, mut response: reqwest::Response) -> GenerationResult<Vec<u8>> {
        let limit = self.config.max_response_bytes;

        if let Some(len) = response.content_length() {
            if len as usize > limit {
                return Err(GenerationError::MalformedResponse(format!(
                    "reply of {} bytes exceeds limit of {} bytes",
                    len, limit
                )));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| GenerationError::Network(format!("failed to read reply: {}", e)))?
        {
            if body.len() + chunk.len() > limit {
                return Err(GenerationError::MalformedResponse(format!(
                    "reply exceeds limit of {} bytes",
                    limit
                )));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(body)
    }

    /// Read the start of an error reply, dropping whatever follows the cap
    async fn read_error_body(&self, mut response: reqwest::Response) -> String {
        let limit = ERROR_BODY_LIMIT.min(self.config.max_response_bytes);
        let mut body = Vec::new();

        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    let room = limit - body.len();
                    if chunk.len() >= room {
                        body.extend_from_slice(&chunk[..room]);
                        warn!("Error reply exceeds {} bytes, ignoring the rest", limit);
                        break;
                    }
                    body.extend_from_slice(&chunk);
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read error reply: {}", e);
                    break;
                }
            }
        }

        String::from_utf8_lossy(&body).into_owned()
    }
}

/// Map a non-success HTTP status and body to a generation error
fn classify_failure(status: StatusCode, body: &str) -> GenerationError {
    let detail = serde_json::from_str::<ApiErrorBody>(body).ok().map(|b| b.error);
    let message = detail
        .as_ref()
        .map(|d| snippet(&d.message).to_string())
        .unwrap_or_else(|| format!("API returned {}", status));

    match status.as_u16() {
        401 | 403 => GenerationError::AuthMissing(format!(
            "API key rejected by the generation service ({})",
            message
        )),
        429 | 529 => GenerationError::QuotaExceeded(message),
        _ => match detail {
            Some(d) if d.error_type == "rate_limit_error" => GenerationError::QuotaExceeded(message),
            Some(d) if d.message.to_lowercase().contains("credit balance") => {
                GenerationError::QuotaExceeded(message)
            }
            Some(_) => GenerationError::Network(format!("API returned {}: {}", status, message)),
            None => GenerationError::Network(message),
        },
    }
}

#[async_trait]
impl FileGenerator for CodeGenerationClient {
    async fn generate(
        &self,
        prompt: &str,
        context: &GenerationContext,
    ) -> GenerationResult<GeneratedFileSet> {
        let api_key = self
            .secrets
            .lookup(&self.config.api_key_secret)
            .await
            .map_err(|_| {
                GenerationError::AuthMissing(format!(
                    "secret '{}' not found",
                    self.config.api_key_secret
                ))
            })?;

        let request = AnthropicRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            system: SYSTEM_INSTRUCTION,
            messages: vec![Message {
                role: "user",
                content: self.user_message(prompt, context),
            }],
        };

        info!(
            "Making generation request: model={}, max_tokens={}",
            request.model, request.max_tokens
        );

        let response = self
            .client
            .post(&self.config.api_url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    error!("Generation request timed out");
                    GenerationError::Network("request timed out".to_string())
                } else if e.is_connect() {
                    error!("Failed to connect to generation service: {}", e);
                    GenerationError::Network(format!("connection failed: {}", e))
                } else {
                    error!("Generation request failed: {}", e);
                    GenerationError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        info!("Received generation response: status={}", status);

        if !status.is_success() {
            let body = self.read_error_body(response).await;
            let err = classify_failure(status, &body);
            error!("Generation service error: {}", err);
            return Err(err);
        }

        let body = self.read_bounded(response).await?;

        let envelope: AnthropicResponse = serde_json::from_slice(&body).map_err(|e| {
            GenerationError::MalformedResponse(format!("unexpected response envelope: {}", e))
        })?;

        if envelope.stop_reason.as_deref() == Some("max_tokens") {
            warn!("Generation reply was cut off at max_tokens");
            return Err(GenerationError::MalformedResponse(
                "reply was truncated at the token limit".to_string(),
            ));
        }

        let text = envelope
            .content
            .iter()
            .find(|block| block.content_type == "text")
            .and_then(|block| block.text.as_deref())
            .ok_or_else(|| {
                GenerationError::MalformedResponse("reply contained no text block".to_string())
            })?;

        let files = parse_file_set(text, &self.limits)?;
        info!(
            "Generated {} files ({} bytes)",
            files.len(),
            files.total_bytes()
        );
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipyard_core::MessageKind;

    #[test]
    fn test_classify_failure() {
        assert!(matches!(
            classify_failure(StatusCode::UNAUTHORIZED, ""),
            GenerationError::AuthMissing(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::TOO_MANY_REQUESTS, ""),
            GenerationError::QuotaExceeded(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::from_u16(529).unwrap(), ""),
            GenerationError::QuotaExceeded(_)
        ));

        let credit = r#"{"type":"error","error":{"type":"invalid_request_error","message":"Your credit balance is too low"}}"#;
        assert!(matches!(
            classify_failure(StatusCode::BAD_REQUEST, credit),
            GenerationError::QuotaExceeded(_)
        ));

        assert!(matches!(
            classify_failure(StatusCode::INTERNAL_SERVER_ERROR, "oops"),
            GenerationError::Network(_)
        ));
    }

    #[test]
    fn test_rejected_key_message_names_the_rejection() {
        let body = r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#;
        let err = classify_failure(StatusCode::UNAUTHORIZED, body);
        assert_eq!(
            err.to_string(),
            "No usable API key: API key rejected by the generation service (invalid x-api-key)"
        );
    }

    #[test]
    fn test_long_error_messages_are_truncated() {
        let message = "Your credit balance is too low. ".repeat(100);
        let body = serde_json::json!({
            "type": "error",
            "error": { "type": "invalid_request_error", "message": message }
        })
        .to_string();

        match classify_failure(StatusCode::BAD_REQUEST, &body) {
            GenerationError::QuotaExceeded(msg) => assert_eq!(msg.len(), 200),
            other => panic!("expected QuotaExceeded, got {:?}", other),
        }
    }

    #[test]
    fn test_recent_prompts_only_user_turns() {
        let context = GenerationContext::new(vec![
            ChatMessage::user("first"),
            ChatMessage::assistant(MessageKind::Acknowledgement, "on it"),
            ChatMessage::user("second"),
            ChatMessage::user("third"),
        ]);
        assert_eq!(context.recent_prompts(2), vec!["second", "third"]);
        assert_eq!(context.recent_prompts(0), Vec::<&str>::new());
    }
}
