//! Streaming chunk delivery.
//!
//! Providers are called in buffered mode; the streaming contract is the
//! channel of [`StreamingChunk`]s plus an external cancellation token, which
//! is what downstream consumers (realtime fan-out, tests) depend on. Chunks
//! are emitted at word boundaries so subscribers see incremental progress.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::errors::{LlmError, LlmResult};
use crate::types::{LlmResponse, StreamingChunk};

/// Split a completed response into chunks and deliver them over `tx`.
///
/// Observes `cancel` between sends; on cancellation an `Error` chunk is
/// emitted and [`LlmError::Cancelled`] returned.
pub async fn deliver_chunks(
    response: &LlmResponse,
    tx: &mpsc::Sender<StreamingChunk>,
    cancel: &CancellationToken,
) -> LlmResult<()> {
    for piece in split_words(&response.content, 24) {
        if cancel.is_cancelled() {
            let _ = tx
                .send(StreamingChunk::Error {
                    message: "cancelled".to_string(),
                })
                .await;
            return Err(LlmError::Cancelled);
        }
        if tx
            .send(StreamingChunk::Content { delta: piece })
            .await
            .is_err()
        {
            // Receiver dropped; nothing left to deliver.
            return Ok(());
        }
    }

    for call in &response.tool_calls {
        if tx
            .send(StreamingChunk::ToolCall { call: call.clone() })
            .await
            .is_err()
        {
            return Ok(());
        }
    }

    let _ = tx
        .send(StreamingChunk::Done {
            finish_reason: response.finish_reason,
            usage: response.usage,
        })
        .await;
    Ok(())
}

/// Accumulates streamed content; `reset` supports re-prompting flows that
/// discard a partial answer.
#[derive(Debug, Default)]
pub struct ChunkSink {
    buffer: String,
    done: bool,
}

impl ChunkSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk. Returns `true` once the stream is complete.
    pub fn accept(&mut self, chunk: &StreamingChunk) -> bool {
        match chunk {
            StreamingChunk::Content { delta } => self.buffer.push_str(delta),
            StreamingChunk::Done { .. } | StreamingChunk::Error { .. } => self.done = true,
            StreamingChunk::ToolCall { .. } => {}
        }
        self.done
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.done = false;
    }

    pub fn content(&self) -> &str {
        &self.buffer
    }

    pub fn is_done(&self) -> bool {
        self.done
    }
}

/// Split text into word-boundary pieces of at most `max_words` words.
fn split_words(text: &str, max_words: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let words: Vec<&str> = text.split_inclusive(char::is_whitespace).collect();
    words
        .chunks(max_words.max(1))
        .map(|chunk| chunk.concat())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FinishReason, TokenUsage};

    fn response(content: &str) -> LlmResponse {
        LlmResponse {
            content: content.to_string(),
            tool_calls: Vec::new(),
            finish_reason: FinishReason::Stop,
            usage: TokenUsage::default(),
            model: "mock-model".to_string(),
        }
    }

    #[tokio::test]
    async fn chunks_reassemble_to_original() {
        let original = "one two three four five six seven eight nine ten ".repeat(10);
        let (tx, mut rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();

        deliver_chunks(&response(&original), &tx, &cancel)
            .await
            .expect("deliver");
        drop(tx);

        let mut sink = ChunkSink::new();
        while let Some(chunk) = rx.recv().await {
            sink.accept(&chunk);
        }
        assert!(sink.is_done());
        assert_eq!(sink.content(), original);
    }

    #[tokio::test]
    async fn cancellation_stops_delivery() {
        let original = "word ".repeat(500);
        let (tx, mut rx) = mpsc::channel(256);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = deliver_chunks(&response(&original), &tx, &cancel)
            .await
            .expect_err("cancelled");
        assert!(matches!(err, LlmError::Cancelled));
        drop(tx);

        let mut saw_error = false;
        while let Some(chunk) = rx.recv().await {
            if matches!(chunk, StreamingChunk::Error { .. }) {
                saw_error = true;
            }
        }
        assert!(saw_error);
    }

    #[test]
    fn sink_reset_discards_partial_content() {
        let mut sink = ChunkSink::new();
        sink.accept(&StreamingChunk::Content {
            delta: "partial".to_string(),
        });
        sink.reset();
        assert_eq!(sink.content(), "");
        assert!(!sink.is_done());
    }
}
