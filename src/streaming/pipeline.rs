use crate::config::{CoalescingConfig, PipelineConfig};
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::models::block::ContentBlock;
use crate::models::event::{BlockEvent, generate_block_id, normalize_event};
use crate::streaming::assembler::{BlockAssembler, is_element_path};
use crate::streaming::coalescer::DeltaCoalescer;
use crate::streaming::parser::IncrementalJsonParser;
use crate::streaming::reader::{Fragment, TimeoutStreamReader};
use bytes::Bytes;
use futures::{Stream, StreamExt, stream};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;

/// What the pipeline hands to a renderer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineEvent {
    BlockStarted {
        block_id: String,
        block_type: String,
    },
    /// A paced piece of one field of an open block
    BlockDelta {
        block_id: String,
        path: String,
        chunk: String,
    },
    BlockCompleted(ContentBlock),
}

/// Coalescer for one open block, with the path its buffer belongs to
struct ActiveCoalescer {
    coalescer: DeltaCoalescer,
    path: Option<String>,
}

/// Fragments in, paced block events and finished blocks out.
///
/// Owns one parser, one assembler and one coalescer per open block. Nothing
/// here is shared with other pipelines except the metrics handle.
pub struct BlockPipeline {
    parser: IncrementalJsonParser,
    assembler: BlockAssembler,
    coalescing: CoalescingConfig,
    coalescers: HashMap<String, ActiveCoalescer>,
    /// Index of the next completed block `next_block` hands out
    next_ready: usize,
    metrics: Arc<PipelineMetrics>,
}

impl BlockPipeline {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            parser: IncrementalJsonParser::with_threshold(config.parser.salvage_threshold),
            assembler: BlockAssembler::new(),
            coalescing: config.coalescing.clone(),
            coalescers: HashMap::new(),
            next_ready: 0,
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    /// Handle for reading counters while the pipeline runs
    pub fn metrics_handle(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn assembler(&self) -> &BlockAssembler {
        &self.assembler
    }

    /// Feed one text fragment through parser, assembler and coalescers
    pub fn push_fragment(&mut self, fragment: &str) -> Vec<PipelineEvent> {
        self.metrics.record_fragment();
        let before = self.parser.salvage_count();
        let values = self.parser.push(fragment);
        self.route(values, before)
    }

    /// Feed a reader fragment.
    ///
    /// An error ends the stream: the parser is flushed, open blocks close as
    /// partial, and the error message follows as its own partial text block.
    pub fn push_reader_fragment(&mut self, fragment: Fragment) -> Vec<PipelineEvent> {
        let error = match fragment {
            Fragment::Content(text) => return self.push_fragment(&text),
            Fragment::Error(e) => e,
        };

        self.metrics.record_fragment();
        if error.is_timeout() {
            self.metrics.record_timeout();
        }
        let mut out = self.flush();
        out.extend(self.close_all_partial());
        out.extend(self.error_block(&Fragment::Error(error).into_text()));
        out
    }

    /// Pull the next finished block, in completion order
    pub fn next_block(&mut self) -> Option<ContentBlock> {
        let block = self.assembler.completed().get(self.next_ready).cloned()?;
        self.next_ready += 1;
        Some(block)
    }

    /// Release whatever the parser still buffers
    pub fn flush(&mut self) -> Vec<PipelineEvent> {
        let before = self.parser.salvage_count();
        let values = self.parser.flush();
        self.route(values, before)
    }

    /// Force-close every open block as partial, in start order
    pub fn close_all_partial(&mut self) -> Vec<PipelineEvent> {
        let mut out = Vec::new();
        for block_id in self.assembler.open_ids() {
            self.handle_event(BlockEvent::end(block_id, true), &mut out);
        }
        out
    }

    /// End of input: flush the parser, then close what is still open
    pub fn finish(&mut self) -> Vec<PipelineEvent> {
        let mut out = self.flush();
        out.extend(self.close_all_partial());
        tracing::info!(metrics = %self.metrics.snapshot(), "Pipeline finished");
        out
    }

    /// Drive a reader to completion as a stream of pipeline events
    pub fn run<S, E>(self, reader: TimeoutStreamReader<S>) -> impl Stream<Item = PipelineEvent>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Display,
    {
        stream::unfold(
            Some((self, reader)),
            |state| async move {
                let (mut pipeline, mut reader) = state?;
                match reader.next_fragment().await {
                    Some(fragment) => {
                        let events = pipeline.push_reader_fragment(fragment);
                        Some((events, Some((pipeline, reader))))
                    }
                    None => Some((pipeline.finish(), None)),
                }
            },
        )
        .flat_map(stream::iter)
    }

    fn error_block(&mut self, message: &str) -> Vec<PipelineEvent> {
        let block_id = generate_block_id("salvaged");
        tracing::warn!(block_id = %block_id, error = %message, "Stream ended with an error");
        self.metrics.record_salvage();

        let mut out = Vec::new();
        for event in [
            BlockEvent::start(block_id.clone(), "text"),
            BlockEvent::delta(block_id.clone(), "content", message),
            BlockEvent::end(block_id, true),
        ] {
            self.handle_event(event, &mut out);
        }
        out
    }

    fn route(&mut self, values: Vec<Value>, salvages_before: u64) -> Vec<PipelineEvent> {
        let salvaged = self.parser.salvage_count() - salvages_before;
        for _ in 0..salvaged {
            self.metrics.record_salvage();
        }
        // Each salvage contributes three synthetic values
        self.metrics
            .record_values(values.len().saturating_sub(3 * salvaged as usize));

        let mut out = Vec::new();
        for value in values {
            self.handle_event(normalize_event(value), &mut out);
        }
        out
    }

    fn handle_event(&mut self, event: BlockEvent, out: &mut Vec<PipelineEvent>) {
        match event {
            BlockEvent::Start {
                block_id,
                block_type,
            } => {
                if !self.assembler.start(&block_id, &block_type) {
                    self.metrics.record_ignored();
                    return;
                }
                if self.coalescing.enabled {
                    let coalescer = DeltaCoalescer::for_block_type(
                        &block_type,
                        Instant::now(),
                        self.coalescing.adaptive,
                    );
                    self.coalescers.insert(
                        block_id.clone(),
                        ActiveCoalescer {
                            coalescer,
                            path: None,
                        },
                    );
                }
                out.push(PipelineEvent::BlockStarted {
                    block_id,
                    block_type,
                });
            }
            BlockEvent::Delta {
                block_id,
                path,
                value,
            } => {
                if !self.assembler.delta(&block_id, &path, &value) {
                    self.metrics.record_ignored();
                    return;
                }
                self.pace_delta(block_id, path, value, out);
            }
            BlockEvent::End { block_id, partial } => {
                if let Some(mut active) = self.coalescers.remove(&block_id) {
                    if let (Some(chunk), Some(path)) = (active.coalescer.flush(), active.path.take()) {
                        out.push(PipelineEvent::BlockDelta {
                            block_id: block_id.clone(),
                            path,
                            chunk,
                        });
                    }
                    tracing::debug!(block_id = %block_id, metrics = %active.coalescer.metrics(), "Block coalescer closed");
                }

                match self.assembler.end(&block_id, partial) {
                    Some(block) => {
                        self.metrics
                            .record_block(block.is_partial(), block.is_unknown());
                        out.push(PipelineEvent::BlockCompleted(block));
                    }
                    None => self.metrics.record_ignored(),
                }
            }
        }
    }

    fn pace_delta(&mut self, block_id: String, path: String, value: String, out: &mut Vec<PipelineEvent>) {
        let Some(active) = self.coalescers.get_mut(&block_id) else {
            out.push(PipelineEvent::BlockDelta {
                block_id,
                path,
                chunk: value,
            });
            return;
        };

        // Every emitted chunk belongs to exactly one path
        if active.path.as_deref() != Some(path.as_str()) {
            if let (Some(chunk), Some(previous)) = (active.coalescer.flush(), active.path.take()) {
                out.push(PipelineEvent::BlockDelta {
                    block_id: block_id.clone(),
                    path: previous,
                    chunk,
                });
            }
            active.path = Some(path.clone());
        }

        // List elements are already whole, merging them would lose the boundary
        let chunk = if is_element_path(&path) {
            Some(value)
        } else {
            active.coalescer.push(&value)
        };

        if let Some(chunk) = chunk {
            out.push(PipelineEvent::BlockDelta {
                block_id,
                path,
                chunk,
            });
        }
    }
}

impl Default for BlockPipeline {
    fn default() -> Self {
        Self::new(&PipelineConfig::default())
    }
}
