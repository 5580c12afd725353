//! Shared LLM service for the PR review pipeline.
//!
//! One enum-dispatched client over three concrete providers:
//! - OpenAI-compatible chat completions
//! - Anthropic Messages API
//! - a deterministic mock (tests, no-network deployments)
//!
//! No `async-trait` and no heap trait objects; provider dispatch is a plain
//! enum, errors are unified by [`LlmError`], and streaming is a channel of
//! [`StreamingChunk`]s with an external cancellation token.

pub mod config;
pub mod errors;
pub mod prompts;
pub mod services;
pub mod streaming;
pub mod types;

pub use config::{LlmModelConfig, LlmProvider};
pub use errors::{LlmError, LlmResult};
pub use prompts::{build_system_prompt, PromptContext};
pub use streaming::ChunkSink;
pub use types::{
    CallOpts, ChatMessage, ChatRole, FinishReason, LlmResponse, StreamingChunk, TokenUsage,
    ToolCall,
};

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use services::anthropic_service::AnthropicService;
use services::mock_service::MockService;
use services::openai_service::OpenAiService;

/// Concrete LLM client (enum-dispatch).
pub enum LlmClient {
    OpenAi(OpenAiService),
    Anthropic(AnthropicService),
    Mock(MockService),
}

impl LlmClient {
    /// Constructs a concrete client from generic config.
    pub fn from_config(cfg: LlmModelConfig) -> LlmResult<Self> {
        Ok(match cfg.provider {
            LlmProvider::OpenAi => Self::OpenAi(OpenAiService::new(cfg)?),
            LlmProvider::Anthropic => Self::Anthropic(AnthropicService::new(cfg)?),
            LlmProvider::Mock => Self::Mock(MockService::new(cfg)),
        })
    }

    pub fn provider(&self) -> LlmProvider {
        match self {
            Self::OpenAi(_) => LlmProvider::OpenAi,
            Self::Anthropic(_) => LlmProvider::Anthropic,
            Self::Mock(_) => LlmProvider::Mock,
        }
    }

    /// One buffered chat call.
    pub async fn chat(&self, messages: &[ChatMessage], opts: &CallOpts) -> LlmResult<LlmResponse> {
        match self {
            Self::OpenAi(svc) => svc.chat(messages, opts).await,
            Self::Anthropic(svc) => svc.chat(messages, opts).await,
            Self::Mock(svc) => svc.chat(messages, opts).await,
        }
    }

    /// Chat with bounded retries on transient failures.
    ///
    /// Retries up to `max_attempts` total attempts, honoring the provider's
    /// `Retry-After` when present, otherwise doubling from one second. The
    /// cancellation token is observed before every attempt and during waits.
    pub async fn chat_with_retry(
        &self,
        messages: &[ChatMessage],
        opts: &CallOpts,
        cancel: &CancellationToken,
        max_attempts: u32,
    ) -> LlmResult<LlmResponse> {
        let mut delay = Duration::from_secs(1);
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(LlmError::Cancelled);
            }
            attempt += 1;
            match self.chat(messages, opts).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let wait = e
                        .retry_after_secs()
                        .map(Duration::from_secs)
                        .unwrap_or(delay);
                    warn!(
                        provider = self.provider().as_str(),
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "llm call failed, retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                    }
                    delay = delay.saturating_mul(2);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Streaming variant: the full response is delivered as chunks over `tx`.
    ///
    /// Returns the complete response so callers that also need the buffered
    /// form do not pay for a second call.
    pub async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        opts: &CallOpts,
        tx: mpsc::Sender<StreamingChunk>,
        cancel: &CancellationToken,
    ) -> LlmResult<LlmResponse> {
        if cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }
        let response = match self.chat(messages, opts).await {
            Ok(r) => r,
            Err(e) => {
                let _ = tx
                    .send(StreamingChunk::Error {
                        message: e.to_string(),
                    })
                    .await;
                return Err(e);
            }
        };
        streaming::deliver_chunks(&response, &tx, cancel).await?;
        Ok(response)
    }
}

/// Run a future and stamp its wall-clock latency in milliseconds.
pub async fn measure<T, F>(fut: F) -> (T, u64)
where
    F: std::future::Future<Output = T>,
{
    let start = Instant::now();
    let value = fut.await;
    let latency_ms = start.elapsed().as_millis() as u64;
    debug!(latency_ms, "measured execution");
    (value, latency_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_client_round_trip() {
        let client = LlmClient::from_config(LlmModelConfig::mock()).expect("client");
        assert_eq!(client.provider(), LlmProvider::Mock);

        let (response, latency_ms) = measure(client.chat(
            &[ChatMessage::user("classify this PR")],
            &CallOpts::default(),
        ))
        .await;
        let response = response.expect("mock never fails");
        assert!(response.content.starts_with("MOCK["));
        assert!(latency_ms < 1_000);
    }

    #[tokio::test]
    async fn stream_emits_done_chunk() {
        let client = LlmClient::from_config(LlmModelConfig::mock()).expect("client");
        let (tx, mut rx) = mpsc::channel(32);
        let cancel = CancellationToken::new();

        client
            .chat_stream(
                &[ChatMessage::user("stream me")],
                &CallOpts::default(),
                tx,
                &cancel,
            )
            .await
            .expect("stream");

        let mut sink = ChunkSink::new();
        while let Some(chunk) = rx.recv().await {
            if sink.accept(&chunk) {
                break;
            }
        }
        assert!(sink.is_done());
        assert!(sink.content().starts_with("MOCK["));
    }

    #[tokio::test]
    async fn retry_respects_cancellation() {
        let client = LlmClient::from_config(LlmModelConfig::mock()).expect("client");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = client
            .chat_with_retry(
                &[ChatMessage::user("hi")],
                &CallOpts::default(),
                &cancel,
                3,
            )
            .await
            .expect_err("cancelled before first attempt");
        assert!(matches!(err, LlmError::Cancelled));
    }
}
