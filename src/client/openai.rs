use reqwest::Client;
use std::time::Duration;
use tracing::info;

use crate::config::UpstreamConfig;
use crate::error::{Result, StreamError};
use crate::models::openai::{ChatMessage, ChatRequest};
use crate::provider::{Provider, ProviderStream, StreamFuture};

/// Instructs the model to answer in block protocol events
pub const BLOCK_PROTOCOL_PROMPT: &str = "Answer only with newline-separated JSON events. \
Open each block with {\"event\":\"block_start\",\"block_id\":<id>,\"block_type\":<type>}, \
stream its fields with {\"event\":\"block_delta\",\"block_id\":<id>,\"path\":<field>,\"value\":<text>} \
and close it with {\"event\":\"block_end\",\"block_id\":<id>}. \
Types: text, table, list, code, markdown, quote, divider, callout, key_value, json, metric, steps, media, error. \
Table rows and headers are single strings with cells separated by |.";

/// Streaming chat-completion client for OpenAI-compatible endpoints
pub struct OpenAiClient {
    client: Client,
    config: UpstreamConfig,
}

impl OpenAiClient {
    pub fn new(config: UpstreamConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(StreamError::ConfigError(
                "An API key is required to call the upstream service".to_string(),
            ));
        }

        // No whole-request timeout: it would also cut the body, which the
        // reader's budgets already bound.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| StreamError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.config.endpoint.trim_end_matches('/'))
    }

    pub fn build_request(&self, prompt: &str) -> ChatRequest {
        ChatRequest::streaming(
            self.config.model.clone(),
            vec![
                ChatMessage::system(BLOCK_PROTOCOL_PROMPT),
                ChatMessage::user(prompt),
            ],
        )
    }
}

impl Provider for OpenAiClient {
    fn stream_completion(&self, prompt: &str) -> StreamFuture {
        let url = self.completions_url();
        let request = self.build_request(prompt);
        let client = self.client.clone();
        let api_key = self.config.api_key.clone();

        Box::pin(async move { Self::stream_completion_impl(url, request, client, api_key).await })
    }

    fn name(&self) -> &str {
        "OpenAI"
    }
}

impl OpenAiClient {
    async fn stream_completion_impl(
        url: String,
        request: ChatRequest,
        client: Client,
        api_key: String,
    ) -> Result<ProviderStream> {
        let body = serde_json::to_vec(&request)?;
        info!(
            "OpenAI: Sending {} bytes to: {} with model: {}",
            body.len(),
            url,
            request.model
        );

        let response = client
            .post(&url)
            .header("Content-Type", "application/json")
            .bearer_auth(&api_key)
            .body(body)
            .send()
            .await
            .map_err(|e| StreamError::Transport(format!("OpenAI request failed: {}", e)))?;

        let status = response.status();
        info!("OpenAI responded with status: {}", status);

        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            return Err(StreamError::Upstream(format!(
                "OpenAI API error {}: {}",
                status, error_body
            )));
        }

        Ok(Box::pin(response.bytes_stream()))
    }
}
