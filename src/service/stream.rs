//! Token stream decoding for `POST /user_chat`
//!
//! The backend answers a streaming chat request with a chunked body of
//! newline-delimited lines:
//!
//! ```text
//! data: {"content": "Hel", "totalTokens": 12, "tokensPerSecond": 30.1}
//!
//! data: {"content": "lo", "title": "Greetings"}
//!
//! data: [DONE]
//! ```
//!
//! - Lines starting with `data: ` carry a JSON [`StreamChunk`].
//! - `data: [DONE]` is a sentinel without payload and is dropped.
//! - A `data:` line whose payload is not valid JSON is logged and skipped;
//!   later lines are still processed.
//! - Every other line (blank separators included) is ignored.
//!
//! [`ChatStream`] turns the raw byte stream into a cancellable sequence of
//! chunks. Cancellation is cooperative: the token is checked between reads
//! and any chunk still buffered when it fires is discarded.

use std::collections::VecDeque;
use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::error::{LepotatoError, Result};
use crate::metrics::{StreamMetrics, StreamOutcome};
use crate::types::TokenStatsUpdate;

/// Payload of the end-of-stream sentinel line
pub const DONE_SENTINEL: &str = "[DONE]";

const DATA_PREFIX: &str = "data: ";

/// One decoded `data:` event
///
/// Every field is optional; absent fields leave the client state as is.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamChunk {
    /// Next fragment of the assistant reply
    #[serde(default)]
    pub content: Option<String>,
    /// Tokens currently in the chat context
    #[serde(default)]
    pub total_tokens: Option<u64>,
    /// Context window of the model
    #[serde(default)]
    pub max_tokens: Option<u64>,
    /// Generation speed
    #[serde(default)]
    pub tokens_per_second: Option<f64>,
    /// Title generated by the backend for the chat
    #[serde(default)]
    pub title: Option<String>,
    /// Error reported by the backend in place of content
    #[serde(default)]
    pub error: Option<String>,
}

impl StreamChunk {
    /// Non-empty content fragment, if any
    pub fn content_fragment(&self) -> Option<&str> {
        self.content.as_deref().filter(|c| !c.is_empty())
    }

    /// Stats and title carried by the chunk
    ///
    /// Empty titles are treated as absent.
    pub fn stats_update(&self) -> TokenStatsUpdate {
        TokenStatsUpdate {
            total_tokens: self.total_tokens,
            max_tokens: self.max_tokens,
            tokens_per_second: self.tokens_per_second,
            title: self.title.clone().filter(|t| !t.trim().is_empty()),
        }
    }
}

/// Classification of one line of the stream body
#[derive(Debug, Clone, PartialEq)]
pub enum StreamLine {
    /// A decoded event
    Chunk(StreamChunk),
    /// The `[DONE]` sentinel
    Done,
    /// A `data:` line whose payload failed to parse
    Malformed {
        /// Raw payload after the prefix
        payload: String,
        /// Parser message
        reason: String,
    },
    /// Not a `data:` line
    Ignored,
}

/// Classify a single line of the stream body
///
/// # Examples
///
/// ```
/// use lepotato::service::stream::{parse_line, StreamLine};
///
/// assert_eq!(parse_line("data: [DONE]"), StreamLine::Done);
/// assert_eq!(parse_line(""), StreamLine::Ignored);
/// assert!(matches!(parse_line("data: {\"content\":\"hi\"}"), StreamLine::Chunk(_)));
/// assert!(matches!(parse_line("data: {oops"), StreamLine::Malformed { .. }));
/// ```
pub fn parse_line(line: &str) -> StreamLine {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let Some(rest) = line.strip_prefix(DATA_PREFIX) else {
        return StreamLine::Ignored;
    };

    let payload = rest.trim();
    if payload == DONE_SENTINEL {
        return StreamLine::Done;
    }

    match serde_json::from_str::<StreamChunk>(payload) {
        Ok(chunk) => StreamLine::Chunk(chunk),
        Err(e) => StreamLine::Malformed {
            payload: payload.to_string(),
            reason: e.to_string(),
        },
    }
}

/// Splits a byte stream into lines
///
/// Bytes are buffered until a `\n` arrives, so multi-byte characters split
/// across network reads decode correctly.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and return every line completed by them
    ///
    /// # Examples
    ///
    /// ```
    /// use lepotato::service::stream::LineDecoder;
    ///
    /// let mut decoder = LineDecoder::new();
    /// assert!(decoder.push(b"data: {\"con").is_empty());
    /// let lines = decoder.push(b"tent\":\"a\"}\n\n");
    /// assert_eq!(lines, vec!["data: {\"content\":\"a\"}".to_string(), String::new()]);
    /// ```
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..line.len() - 1]).into_owned());
        }
        lines
    }

    /// Return the trailing partial line, if any, and reset the decoder
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Boxed raw body stream
pub type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Finished(StreamOutcome),
}

enum Read {
    Cancelled,
    Next(Option<reqwest::Result<Bytes>>),
}

/// Cancellable sequence of [`StreamChunk`]s decoded from a response body
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use tokio_util::sync::CancellationToken;
/// use lepotato::service::stream::ChatStream;
///
/// # async fn example() -> lepotato::error::Result<()> {
/// let body = futures::stream::iter(vec![Ok::<_, reqwest::Error>(Bytes::from_static(
///     b"data: {\"content\":\"a\"}\n\ndata: [DONE]\n\n",
/// ))]);
/// let mut stream = ChatStream::new("chat-1", body, CancellationToken::new());
/// while let Some(chunk) = stream.next_chunk().await? {
///     println!("{:?}", chunk.content);
/// }
/// # Ok(())
/// # }
/// ```
pub struct ChatStream {
    bytes: ByteStream,
    decoder: LineDecoder,
    pending: VecDeque<StreamChunk>,
    cancel: CancellationToken,
    state: State,
    metrics: StreamMetrics,
}

impl std::fmt::Debug for ChatStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStream")
            .field("pending", &self.pending.len())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ChatStream {
    /// Wrap a raw body stream for `chat_id`
    pub fn new<S>(chat_id: &str, bytes: S, cancel: CancellationToken) -> Self
    where
        S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
    {
        Self {
            bytes: Box::pin(bytes),
            decoder: LineDecoder::new(),
            pending: VecDeque::new(),
            cancel,
            state: State::Open,
            metrics: StreamMetrics::new(chat_id),
        }
    }

    /// Next decoded chunk
    ///
    /// Returns `Ok(None)` once the body has ended or the token has been
    /// cancelled. After cancellation no further chunk is ever returned.
    ///
    /// # Errors
    ///
    /// Returns [`LepotatoError::Stream`] if reading the body fails.
    pub async fn next_chunk(&mut self) -> Result<Option<StreamChunk>> {
        loop {
            if self.cancel.is_cancelled() {
                self.mark_cancelled();
                return Ok(None);
            }

            if let Some(chunk) = self.pending.pop_front() {
                return Ok(Some(chunk));
            }

            if self.state != State::Open {
                return Ok(None);
            }

            let cancel = self.cancel.clone();
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => Read::Cancelled,
                next = self.bytes.next() => Read::Next(next),
            };

            match read {
                Read::Cancelled => {
                    self.mark_cancelled();
                    return Ok(None);
                }
                Read::Next(Some(Ok(bytes))) => {
                    for line in self.decoder.push(&bytes) {
                        self.handle_line(&line);
                    }
                }
                Read::Next(Some(Err(e))) => {
                    self.finish(StreamOutcome::Failed);
                    return Err(LepotatoError::Stream(format!("failed to read stream: {}", e)).into());
                }
                Read::Next(None) => {
                    if let Some(rest) = self.decoder.finish() {
                        self.handle_line(&rest);
                    }
                    self.finish(StreamOutcome::Completed);
                }
            }
        }
    }

    /// How the stream ended, once it has
    pub fn outcome(&self) -> Option<StreamOutcome> {
        match self.state {
            State::Open => None,
            State::Finished(outcome) => Some(outcome),
        }
    }

    /// Whether the stream was stopped through its token
    pub fn is_cancelled(&self) -> bool {
        self.outcome() == Some(StreamOutcome::Cancelled) || self.cancel.is_cancelled()
    }

    fn handle_line(&mut self, line: &str) {
        match parse_line(line) {
            StreamLine::Chunk(chunk) => {
                self.metrics.record_chunk();
                self.pending.push_back(chunk);
            }
            StreamLine::Malformed { payload, reason } => {
                self.metrics.record_parse_error();
                tracing::error!("Failed to parse stream chunk {:?}: {}", payload, reason);
            }
            StreamLine::Done | StreamLine::Ignored => {}
        }
    }

    fn mark_cancelled(&mut self) {
        self.pending.clear();
        if self.state == State::Open {
            self.finish(StreamOutcome::Cancelled);
        }
    }

    fn finish(&mut self, outcome: StreamOutcome) {
        self.state = State::Finished(outcome);
        self.metrics.record_outcome(outcome);
    }
}
