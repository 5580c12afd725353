//! Deterministic in-process provider.
//!
//! The mock derives its reply from a hash of the conversation, so the same
//! prompt always yields the same response and the agent pipeline becomes
//! reproducible in tests. It never fails.

use sha2::{Digest, Sha256};

use crate::config::LlmModelConfig;
use crate::errors::LlmResult;
use crate::types::{CallOpts, ChatMessage, ChatRole, FinishReason, LlmResponse, TokenUsage};

/// Deterministic mock provider.
pub struct MockService {
    cfg: LlmModelConfig,
}

impl MockService {
    pub fn new(cfg: LlmModelConfig) -> Self {
        Self { cfg }
    }

    pub async fn chat(&self, messages: &[ChatMessage], opts: &CallOpts) -> LlmResult<LlmResponse> {
        let mut hasher = Sha256::new();
        for m in messages {
            hasher.update([m.role as u8]);
            hasher.update(m.content.as_bytes());
        }
        let digest = hasher.finalize();
        let seed = hex_prefix(&digest, 12);

        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or("");
        let echo: String = last_user.chars().take(120).collect();

        let content = format!("MOCK[{seed}] {echo}");
        let output_tokens = (content.len() / 4).max(1) as u32;
        let input_tokens = messages
            .iter()
            .map(|m| (m.content.len() / 4) as u32)
            .sum::<u32>()
            .max(1);

        Ok(LlmResponse {
            content,
            tool_calls: Vec::new(),
            finish_reason: FinishReason::Stop,
            usage: TokenUsage {
                input_tokens,
                output_tokens: output_tokens.min(opts.max_tokens),
            },
            model: self.cfg.model.clone(),
        })
    }
}

fn hex_prefix(bytes: &[u8], len: usize) -> String {
    let mut out = String::with_capacity(len);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
        if out.len() >= len {
            break;
        }
    }
    out.truncate(len);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_prompt_same_reply() {
        let svc = MockService::new(LlmModelConfig::mock());
        let messages = vec![ChatMessage::user("summarize this diff")];

        let a = svc.chat(&messages, &CallOpts::default()).await.expect("a");
        let b = svc.chat(&messages, &CallOpts::default()).await.expect("b");
        assert_eq!(a.content, b.content);

        let other = svc
            .chat(&[ChatMessage::user("different")], &CallOpts::default())
            .await
            .expect("other");
        assert_ne!(a.content, other.content);
    }
}
