use std::time::Duration;
use thiserror::Error;

/// Which of the three reader budgets ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// Nothing arrived before the first-chunk budget elapsed
    FirstChunk,
    /// The gap between two network chunks exceeded the inter-chunk budget
    InterChunk,
    /// The whole stream ran longer than the total budget
    MaxDuration,
}

impl TimeoutKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeoutKind::FirstChunk => "first_chunk",
            TimeoutKind::InterChunk => "inter_chunk",
            TimeoutKind::MaxDuration => "max_duration",
        }
    }

    fn describe(&self, limit: Duration, elapsed: Duration) -> String {
        match self {
            TimeoutKind::FirstChunk => format!(
                "The request to the LLM service timed out after {:.1} seconds. Please try again.",
                elapsed.as_secs_f64()
            ),
            TimeoutKind::InterChunk => format!(
                "No chunk received for {}s. The LLM service may have stopped responding. Total elapsed: {:.1}s",
                limit.as_secs_f64(),
                elapsed.as_secs_f64()
            ),
            TimeoutKind::MaxDuration => format!(
                "Stream exceeded maximum duration of {}s. Total elapsed: {:.1}s",
                limit.as_secs_f64(),
                elapsed.as_secs_f64()
            ),
        }
    }
}

impl std::fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("{}", kind.describe(*limit, *elapsed))]
    Timeout {
        kind: TimeoutKind,
        limit: Duration,
        elapsed: Duration,
    },

    #[error("Error generating response: {0}")]
    Transport(String),

    #[error(
        "The LLM service did not send any response data. The service may be overloaded or unresponsive. Please try again."
    )]
    NoData,

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl StreamError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, StreamError::Timeout { .. })
    }

    pub fn timeout_kind(&self) -> Option<TimeoutKind> {
        match self {
            StreamError::Timeout { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;
