use bytes::Bytes;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;

use crate::error::Result;

/// Type alias for the streaming response from a provider
pub type ProviderStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Type alias for the future returned by stream_completion
pub type StreamFuture = Pin<Box<dyn Future<Output = Result<ProviderStream>> + Send>>;

/// Trait for upstream clients that stream chat completions as SSE bytes
pub trait Provider: Send + Sync {
    /// Start a streamed completion for a user prompt
    ///
    /// # Returns
    /// The raw SSE byte stream, ready for a `TimeoutStreamReader`
    fn stream_completion(&self, prompt: &str) -> StreamFuture;

    /// Get the provider name for logging
    fn name(&self) -> &str;
}
