//! # Block Stream
//!
//! Reassembles typed content blocks from token-at-a-time LLM output.
//!
//! ## Overview
//!
//! A model answers in a small JSON event protocol (`block_start`,
//! `block_delta`, `block_end`) streamed inside an OpenAI-style SSE response.
//! This library turns that byte stream back into validated blocks:
//! - Timeout-bounded SSE reading (first chunk, inter-chunk gap, total duration)
//! - Incremental JSON reassembly across arbitrary token boundaries
//! - Block lifecycle tracking with typed validation and an `unknown` fallback
//! - Adaptive pacing of deltas for progressive rendering
//!
//! Malformed input never aborts a stream: broken JSON is salvaged as a
//! partial text block and unrecognized shapes are kept as `unknown` blocks.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use block_stream::config::PipelineConfig;
//! use block_stream::streaming::BlockPipeline;
//!
//! let config = PipelineConfig::default();
//! let mut pipeline = BlockPipeline::new(&config);
//!
//! pipeline.push_fragment(r#"{"event":"block_start","block_id":"b1","block_type":"text"}"#);
//! pipeline.push_fragment(r#"{"event":"block_delta","block_id":"b1","value":"Hello"}"#);
//! pipeline.push_fragment(r#"{"event":"block_end","block_id":"b1"}"#);
//!
//! while let Some(block) = pipeline.next_block() {
//!     println!("{}: {:?}", block.block_type(), block.data());
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Error types and handling
//! - [`models`] - Block events, block shapes and upstream wire types
//! - [`streaming`] - Reader, parser, assembler, coalescer and pipeline
//! - [`client`] - Upstream chat-completion client
//! - [`metrics`] - Per-pipeline counters

pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod provider;
pub mod streaming;

pub use config::PipelineConfig;
pub use error::{Result, StreamError};
pub use streaming::{BlockPipeline, PipelineEvent};
