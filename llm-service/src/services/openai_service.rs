//! OpenAI-compatible chat completions client.
//!
//! Talks to `POST {endpoint}/chat/completions` with bearer auth. Works with
//! the official API and any compatible gateway that honors the same schema.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{LlmModelConfig, LlmProvider};
use crate::errors::{LlmError, LlmResult};
use crate::types::{CallOpts, ChatMessage, ChatRole, FinishReason, LlmResponse, TokenUsage, ToolCall};

const PROVIDER: &str = "openai";

/// Thin client for OpenAI-compatible endpoints.
pub struct OpenAiService {
    client: reqwest::Client,
    cfg: LlmModelConfig,
    url_chat: String,
}

impl OpenAiService {
    /// Creates a new service from the given config.
    ///
    /// # Errors
    /// [`LlmError::Config`] if the provider is not OpenAI or validation fails.
    pub fn new(cfg: LlmModelConfig) -> LlmResult<Self> {
        if cfg.provider != LlmProvider::OpenAi {
            return Err(LlmError::Config(
                "expected provider openai for OpenAiService".into(),
            ));
        }
        cfg.validate()?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .user_agent("pr-ai-backend/0.1")
            .build()
            .map_err(|source| LlmError::Transport {
                provider: PROVIDER,
                source,
            })?;

        let url_chat = format!("{}/chat/completions", cfg.endpoint.trim_end_matches('/'));
        Ok(Self {
            client,
            cfg,
            url_chat,
        })
    }

    pub async fn chat(&self, messages: &[ChatMessage], opts: &CallOpts) -> LlmResult<LlmResponse> {
        let request = ChatRequest {
            model: &self.cfg.model,
            messages: messages.iter().map(WireMessage::from).collect(),
            max_tokens: opts.max_tokens.min(self.cfg.max_tokens),
            temperature: opts.temperature,
        };

        debug!(
            model = %self.cfg.model,
            max_tokens = request.max_tokens,
            "openai chat request"
        );

        let response = self
            .client
            .post(&self.url_chat)
            .bearer_auth(self.cfg.api_key.as_deref().unwrap_or_default())
            .json(&request)
            .send()
            .await
            .map_err(|source| LlmError::Transport {
                provider: PROVIDER,
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after_secs = retry_after(&response);
            let snippet = body_snippet(response).await;
            return Err(LlmError::HttpStatus {
                provider: PROVIDER,
                status: status.as_u16(),
                snippet,
                retry_after_secs,
            });
        }

        let raw = response.bytes().await.map_err(|source| LlmError::Transport {
            provider: PROVIDER,
            source,
        })?;
        let parsed: ChatResponse =
            serde_json::from_slice(&raw).map_err(|source| LlmError::Decode {
                provider: PROVIDER,
                source,
            })?;

        let choice = parsed.choices.into_iter().next().unwrap_or_default();
        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: serde_json::from_str(&tc.function.arguments)
                    .unwrap_or(serde_json::Value::Null),
            })
            .collect::<Vec<_>>();

        let finish_reason = match choice.finish_reason.as_deref() {
            Some("stop") => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            Some("tool_calls") => FinishReason::ToolCalls,
            _ => FinishReason::Other,
        };

        Ok(LlmResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            finish_reason,
            usage: TokenUsage {
                input_tokens: parsed.usage.prompt_tokens,
                output_tokens: parsed.usage.completion_tokens,
            },
            model: parsed.model,
        })
    }
}

fn retry_after(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

async fn body_snippet(response: reqwest::Response) -> String {
    let body = response.text().await.unwrap_or_default();
    body.chars().take(200).collect()
}

// ----- wire types -----

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

impl From<&ChatMessage> for WireMessage {
    fn from(m: &ChatMessage) -> Self {
        Self {
            role: match m.role {
                ChatRole::System => "system",
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
            },
            content: m.content.clone(),
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    model: String,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: WireUsage,
}

#[derive(Deserialize, Default)]
struct Choice {
    #[serde(default)]
    message: WireResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct WireResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(endpoint: &str) -> LlmModelConfig {
        LlmModelConfig {
            provider: LlmProvider::OpenAi,
            model: "gpt-test".to_string(),
            endpoint: endpoint.to_string(),
            api_key: Some("sk-test".to_string()),
            max_tokens: 512,
            temperature: 0.0,
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn chat_parses_content_and_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "gpt-test",
                "choices": [{
                    "message": {"content": "looks good"},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 12, "completion_tokens": 3}
            })))
            .mount(&server)
            .await;

        let svc = OpenAiService::new(config(&server.uri())).expect("service");
        let response = svc
            .chat(&[ChatMessage::user("review this")], &CallOpts::default())
            .await
            .expect("chat");

        assert_eq!(response.content, "looks good");
        assert_eq!(response.finish_reason, FinishReason::Stop);
        assert_eq!(response.usage.total(), 15);
    }

    #[tokio::test]
    async fn rate_limit_maps_to_transient_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "7")
                    .set_body_string("slow down"),
            )
            .mount(&server)
            .await;

        let svc = OpenAiService::new(config(&server.uri())).expect("service");
        let err = svc
            .chat(&[ChatMessage::user("hi")], &CallOpts::default())
            .await
            .expect_err("must fail");

        assert!(err.is_transient());
        assert_eq!(err.retry_after_secs(), Some(7));
    }
}
