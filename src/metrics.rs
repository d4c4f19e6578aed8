//! Metrics for the token stream lifecycle
//!
//! One [`StreamMetrics`] value is created per streamed reply. It counts the
//! decoded chunks and skipped lines and records the final outcome once.
//! No exporter is installed by the binary, so without a recorder these
//! calls are no-ops.
//!
//! # Metrics
//!
//! - `lepotato_streams_total`: Counter of streams by outcome
//! - `lepotato_stream_duration_seconds`: Histogram of stream duration
//! - `lepotato_stream_chunks_total`: Counter of decoded chunks
//! - `lepotato_stream_parse_errors_total`: Counter of skipped malformed lines
//! - `lepotato_streams_active`: Gauge of open streams
//!
//! # Examples
//!
//! ```
//! use lepotato::metrics::{StreamMetrics, StreamOutcome};
//!
//! let mut metrics = StreamMetrics::new("chat-1");
//! metrics.record_chunk();
//! metrics.record_outcome(StreamOutcome::Completed);
//! assert_eq!(metrics.chunks(), 1);
//! ```

use metrics::{decrement_gauge, histogram, increment_counter, increment_gauge};
use std::time::Instant;

/// How a stream ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The transport signalled the end of the body
    Completed,
    /// `stop_streaming` fired before the end
    Cancelled,
    /// Opening or reading the stream failed
    Failed,
}

impl StreamOutcome {
    /// Label value used for the outcome
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamOutcome::Completed => "completed",
            StreamOutcome::Cancelled => "cancelled",
            StreamOutcome::Failed => "failed",
        }
    }
}

/// Counters for a single streamed reply
#[derive(Debug)]
pub struct StreamMetrics {
    chat_id: String,
    start: Instant,
    chunks: u64,
    parse_errors: u64,
    recorded: bool,
}

impl StreamMetrics {
    /// Start tracking a stream for `chat_id`
    pub fn new(chat_id: impl Into<String>) -> Self {
        increment_gauge!("lepotato_streams_active", 1.0);

        Self {
            chat_id: chat_id.into(),
            start: Instant::now(),
            chunks: 0,
            parse_errors: 0,
            recorded: false,
        }
    }

    /// Count one decoded chunk
    pub fn record_chunk(&mut self) {
        self.chunks += 1;
        increment_counter!("lepotato_stream_chunks_total");
    }

    /// Count one malformed `data:` line
    pub fn record_parse_error(&mut self) {
        self.parse_errors += 1;
        increment_counter!("lepotato_stream_parse_errors_total");
    }

    /// Record how the stream ended; later calls are ignored
    pub fn record_outcome(&mut self, outcome: StreamOutcome) {
        if self.recorded {
            return;
        }
        self.recorded = true;

        histogram!(
            "lepotato_stream_duration_seconds",
            self.start.elapsed().as_secs_f64(),
            "outcome" => outcome.as_str()
        );
        increment_counter!("lepotato_streams_total", "outcome" => outcome.as_str());
        decrement_gauge!("lepotato_streams_active", 1.0);

        tracing::debug!(
            "Stream for chat {} {} after {:?}: {} chunks, {} skipped lines",
            self.chat_id,
            outcome.as_str(),
            self.start.elapsed(),
            self.chunks,
            self.parse_errors
        );
    }

    /// Chunks decoded so far
    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    /// Malformed lines skipped so far
    pub fn parse_errors(&self) -> u64 {
        self.parse_errors
    }

    /// Time since the stream was opened
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

impl Drop for StreamMetrics {
    fn drop(&mut self) {
        if !self.recorded {
            decrement_gauge!("lepotato_streams_active", 1.0);
        }
    }
}
