use crate::config::ReaderConfig;
use crate::error::{StreamError, TimeoutKind};
use crate::models::openai::ChatCompletionChunk;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use std::fmt::Display;
use std::time::Duration;
use tokio::time::{Instant, timeout};

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

/// One item produced by the reader
#[derive(Debug)]
pub enum Fragment {
    /// Text content extracted from a `data:` payload
    Content(String),
    /// Terminal failure; nothing follows it
    Error(StreamError),
}

impl Fragment {
    pub fn is_error(&self) -> bool {
        matches!(self, Fragment::Error(_))
    }

    /// Render as text, errors as `Error: <message>`
    pub fn into_text(self) -> String {
        match self {
            Fragment::Content(text) => text,
            Fragment::Error(e) => format!("Error: {}", e),
        }
    }
}

/// Reads an SSE chat-completion byte stream under three timing budgets.
///
/// Single pass: once a terminal condition is reached (`[DONE]`, a finish
/// reason, end of input, a timeout or a transport fault) every later call
/// returns `None`. Timeouts and faults are yielded as one
/// [`Fragment::Error`] rather than returned as `Err`.
pub struct TimeoutStreamReader<S> {
    inner: S,
    first_chunk_timeout: Duration,
    inter_chunk_timeout: Duration,
    max_duration: Duration,
    started: Option<Instant>,
    received_chunk: bool,
    content_seen: bool,
    utf8_carry: Vec<u8>,
    line_buffer: String,
    pending: VecDeque<Fragment>,
    finished: bool,
}

impl<S, E> TimeoutStreamReader<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    pub fn new(inner: S, config: &ReaderConfig) -> Self {
        Self::with_timeouts(
            inner,
            config.first_chunk_timeout(),
            config.inter_chunk_timeout(),
            config.max_duration(),
        )
    }

    pub fn with_timeouts(
        inner: S,
        first_chunk_timeout: Duration,
        inter_chunk_timeout: Duration,
        max_duration: Duration,
    ) -> Self {
        Self {
            inner,
            first_chunk_timeout,
            inter_chunk_timeout,
            max_duration,
            started: None,
            received_chunk: false,
            content_seen: false,
            utf8_carry: Vec::new(),
            line_buffer: String::new(),
            pending: VecDeque::new(),
            finished: false,
        }
    }

    /// Time since the first read, zero before it
    pub fn elapsed(&self) -> Duration {
        self.started.map(|s| s.elapsed()).unwrap_or_default()
    }

    pub fn is_finished(&self) -> bool {
        self.finished && self.pending.is_empty()
    }

    /// Wait for the next fragment
    pub async fn next_fragment(&mut self) -> Option<Fragment> {
        loop {
            if let Some(fragment) = self.pending.pop_front() {
                return Some(fragment);
            }
            if self.finished {
                return None;
            }

            let started = *self.started.get_or_insert_with(Instant::now);
            let elapsed = started.elapsed();
            if elapsed >= self.max_duration {
                self.fail_timeout(TimeoutKind::MaxDuration, elapsed);
                continue;
            }

            let remaining = self.max_duration - elapsed;
            let (budget, kind) = if self.received_chunk {
                (self.inter_chunk_timeout, TimeoutKind::InterChunk)
            } else {
                (self.first_chunk_timeout, TimeoutKind::FirstChunk)
            };
            let (wait, kind) = if remaining < budget {
                (remaining, TimeoutKind::MaxDuration)
            } else {
                (budget, kind)
            };

            match timeout(wait, self.inner.next()).await {
                Err(_) => self.fail_timeout(kind, started.elapsed()),
                Ok(Some(Ok(chunk))) => {
                    self.received_chunk = true;
                    self.ingest(&chunk);
                }
                Ok(Some(Err(e))) => {
                    tracing::warn!(error = %e, "Upstream transport failed mid-stream");
                    self.finish_with(Fragment::Error(StreamError::Transport(e.to_string())));
                }
                Ok(None) => self.finish_eof(),
            }
        }
    }

    /// Adapt into a `Stream` of fragments
    pub fn into_stream(self) -> impl Stream<Item = Fragment> {
        futures::stream::unfold(self, |mut reader| async move {
            reader.next_fragment().await.map(|fragment| (fragment, reader))
        })
    }

    fn fail_timeout(&mut self, kind: TimeoutKind, elapsed: Duration) {
        let limit = match kind {
            TimeoutKind::FirstChunk => self.first_chunk_timeout,
            TimeoutKind::InterChunk => self.inter_chunk_timeout,
            TimeoutKind::MaxDuration => self.max_duration,
        };
        tracing::warn!(
            kind = %kind,
            limit_secs = limit.as_secs_f64(),
            elapsed_secs = elapsed.as_secs_f64(),
            "Stream timed out"
        );
        self.finish_with(Fragment::Error(StreamError::Timeout {
            kind,
            limit,
            elapsed,
        }));
    }

    fn finish_with(&mut self, fragment: Fragment) {
        self.pending.push_back(fragment);
        self.finish();
    }

    fn finish(&mut self) {
        self.finished = true;
        self.line_buffer.clear();
        self.utf8_carry.clear();
    }

    fn finish_eof(&mut self) {
        if !self.utf8_carry.is_empty() {
            let tail = String::from_utf8_lossy(&self.utf8_carry).into_owned();
            self.utf8_carry.clear();
            self.line_buffer.push_str(&tail);
        }

        // A final line without a trailing newline still counts
        let trailing = std::mem::take(&mut self.line_buffer);
        if self.handle_line(&trailing) {
            return;
        }

        if !self.content_seen {
            tracing::warn!("Upstream closed without sending any content");
            self.pending.push_back(Fragment::Error(StreamError::NoData));
        } else {
            tracing::debug!(elapsed_secs = self.elapsed().as_secs_f64(), "Upstream closed");
        }
        self.finish();
    }

    fn ingest(&mut self, chunk: &[u8]) {
        let text = self.decode_utf8(chunk);
        self.line_buffer.push_str(&text);

        while let Some(pos) = self.line_buffer.find('\n') {
            let line: String = self.line_buffer.drain(..=pos).collect();
            if self.handle_line(&line) {
                return;
            }
        }
    }

    /// Decode bytes, carrying an incomplete trailing character to the next chunk
    fn decode_utf8(&mut self, chunk: &[u8]) -> String {
        self.utf8_carry.extend_from_slice(chunk);
        let mut out = String::with_capacity(self.utf8_carry.len());

        loop {
            match std::str::from_utf8(&self.utf8_carry) {
                Ok(valid) => {
                    out.push_str(valid);
                    self.utf8_carry.clear();
                    break;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    out.push_str(std::str::from_utf8(&self.utf8_carry[..valid_up_to]).unwrap_or_default());
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.utf8_carry.drain(..valid_up_to + bad);
                        }
                        None => {
                            self.utf8_carry.drain(..valid_up_to);
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    /// Handle one SSE line. Returns true when the stream is complete.
    fn handle_line(&mut self, raw: &str) -> bool {
        let line = raw.trim();
        if line.is_empty() || line.starts_with(':') {
            return false;
        }

        let Some(data) = line.strip_prefix(DATA_PREFIX) else {
            return false;
        };

        if data.trim() == DONE_SENTINEL {
            tracing::debug!("Received stream terminator");
            self.finish();
            return true;
        }

        let chunk: ChatCompletionChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed SSE payload");
                return false;
            }
        };

        if let Some(content) = chunk.content() {
            self.content_seen = true;
            self.pending.push_back(Fragment::Content(content.to_string()));
        }

        if let Some(reason) = chunk.finish_reason() {
            tracing::debug!(finish_reason = %reason, "Upstream finished");
            self.finish();
            return true;
        }

        false
    }
}
