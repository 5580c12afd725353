//! Anthropic Messages API client.
//!
//! The Messages API has its own auth headers, request shape, and content
//! blocks; system prompts travel in a dedicated field rather than the
//! message list.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{LlmModelConfig, LlmProvider};
use crate::errors::{LlmError, LlmResult};
use crate::types::{CallOpts, ChatMessage, ChatRole, FinishReason, LlmResponse, TokenUsage, ToolCall};

const PROVIDER: &str = "anthropic";
const API_VERSION: &str = "2023-06-01";

/// Thin client for the Anthropic Messages API.
pub struct AnthropicService {
    client: reqwest::Client,
    cfg: LlmModelConfig,
    url_messages: String,
}

impl AnthropicService {
    /// Creates a new service from the given config.
    pub fn new(cfg: LlmModelConfig) -> LlmResult<Self> {
        if cfg.provider != LlmProvider::Anthropic {
            return Err(LlmError::Config(
                "expected provider anthropic for AnthropicService".into(),
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

        let url_messages = format!("{}/messages", cfg.endpoint.trim_end_matches('/'));
        Ok(Self {
            client,
            cfg,
            url_messages,
        })
    }

    pub async fn chat(&self, messages: &[ChatMessage], opts: &CallOpts) -> LlmResult<LlmResponse> {
        // System messages are hoisted into the `system` field.
        let system: String = messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let wire_messages: Vec<WireMessage> = messages
            .iter()
            .filter(|m| m.role != ChatRole::System)
            .map(|m| WireMessage {
                role: match m.role {
                    ChatRole::Assistant => "assistant",
                    _ => "user",
                },
                content: m.content.clone(),
            })
            .collect();

        let request = MessagesRequest {
            model: &self.cfg.model,
            max_tokens: opts.max_tokens.min(self.cfg.max_tokens),
            system: if system.is_empty() {
                None
            } else {
                Some(system)
            },
            messages: wire_messages,
            temperature: opts.temperature,
        };

        debug!(
            model = %self.cfg.model,
            max_tokens = request.max_tokens,
            "anthropic messages request"
        );

        let response = self
            .client
            .post(&self.url_messages)
            .header("x-api-key", self.cfg.api_key.as_deref().unwrap_or_default())
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|source| LlmError::Transport {
                provider: PROVIDER,
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            // 529 is Anthropic's "overloaded"; treat like a rate limit.
            let retry_after_secs = if status.as_u16() == 529 {
                Some(30)
            } else {
                response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
            };
            let snippet: String = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(200)
                .collect();
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
        let parsed: MessagesResponse =
            serde_json::from_slice(&raw).map_err(|source| LlmError::Decode {
                provider: PROVIDER,
                source,
            })?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for block in parsed.content {
            match block {
                ContentBlock::Text { text } => content.push_str(&text),
                ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments: input,
                }),
            }
        }

        let finish_reason = match parsed.stop_reason.as_deref() {
            Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
            Some("max_tokens") => FinishReason::Length,
            Some("tool_use") => FinishReason::ToolCalls,
            _ => FinishReason::Other,
        };

        Ok(LlmResponse {
            content,
            tool_calls,
            finish_reason,
            usage: TokenUsage {
                input_tokens: parsed.usage.input_tokens,
                output_tokens: parsed.usage.output_tokens,
            },
            model: parsed.model,
        })
    }
}

// ----- wire types -----

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage>,
    temperature: f32,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    model: String,
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    #[serde(default)]
    usage: WireUsage,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

#[derive(Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(endpoint: &str) -> LlmModelConfig {
        LlmModelConfig {
            provider: LlmProvider::Anthropic,
            model: "claude-test".to_string(),
            endpoint: endpoint.to_string(),
            api_key: Some("key-test".to_string()),
            max_tokens: 512,
            temperature: 0.0,
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn chat_joins_text_blocks_and_maps_stop_reason() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(header("anthropic-version", API_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "claude-test",
                "content": [
                    {"type": "text", "text": "first "},
                    {"type": "text", "text": "second"}
                ],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 10, "output_tokens": 4}
            })))
            .mount(&server)
            .await;

        let svc = AnthropicService::new(config(&server.uri())).expect("service");
        let response = svc
            .chat(
                &[
                    ChatMessage::system("you are a reviewer"),
                    ChatMessage::user("review"),
                ],
                &CallOpts::default(),
            )
            .await
            .expect("chat");

        assert_eq!(response.content, "first second");
        assert_eq!(response.finish_reason, FinishReason::Stop);
        assert_eq!(response.usage.input_tokens, 10);
    }

    #[tokio::test]
    async fn overloaded_gets_default_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(529).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let svc = AnthropicService::new(config(&server.uri())).expect("service");
        let err = svc
            .chat(&[ChatMessage::user("hi")], &CallOpts::default())
            .await
            .expect_err("must fail");

        assert!(err.is_transient());
        assert_eq!(err.retry_after_secs(), Some(30));
    }
}
