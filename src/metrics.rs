use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one pipeline's reassembly and assembly behavior
///
/// Thread-safe atomic counters so a logger can read them while the stream runs.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    /// Text fragments pushed into the pipeline
    pub fragments_received: AtomicU64,

    /// JSON values decoded by the parser
    pub values_decoded: AtomicU64,

    /// Parser buffers released as partial text blocks
    pub salvaged_buffers: AtomicU64,

    /// Blocks closed, partial or not
    pub blocks_completed: AtomicU64,

    /// Blocks closed before their end event
    pub partial_blocks: AtomicU64,

    /// Blocks re-tagged as unknown
    pub unknown_blocks: AtomicU64,

    /// Events that referenced a block that was not open
    pub ignored_deltas: AtomicU64,

    /// Reader timeouts of any kind
    pub timeouts: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_fragment(&self) {
        self.fragments_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_values(&self, count: usize) {
        self.values_decoded
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_salvage(&self) {
        self.salvaged_buffers.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a closed block
    pub fn record_block(&self, partial: bool, unknown: bool) {
        self.blocks_completed.fetch_add(1, Ordering::Relaxed);
        if partial {
            self.partial_blocks.fetch_add(1, Ordering::Relaxed);
        }
        if unknown {
            self.unknown_blocks.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_ignored(&self) {
        self.ignored_deltas.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Share of completed blocks that ended up unknown, as a percentage
    pub fn unknown_rate(&self) -> f64 {
        let total = self.blocks_completed.load(Ordering::Relaxed);
        let unknown = self.unknown_blocks.load(Ordering::Relaxed);
        if total > 0 {
            (unknown as f64 / total as f64) * 100.0
        } else {
            0.0
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            fragments_received: self.fragments_received.load(Ordering::Relaxed),
            values_decoded: self.values_decoded.load(Ordering::Relaxed),
            salvaged_buffers: self.salvaged_buffers.load(Ordering::Relaxed),
            blocks_completed: self.blocks_completed.load(Ordering::Relaxed),
            partial_blocks: self.partial_blocks.load(Ordering::Relaxed),
            unknown_blocks: self.unknown_blocks.load(Ordering::Relaxed),
            ignored_deltas: self.ignored_deltas.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            unknown_rate: self.unknown_rate(),
        }
    }

    pub fn reset(&self) {
        self.fragments_received.store(0, Ordering::Relaxed);
        self.values_decoded.store(0, Ordering::Relaxed);
        self.salvaged_buffers.store(0, Ordering::Relaxed);
        self.blocks_completed.store(0, Ordering::Relaxed);
        self.partial_blocks.store(0, Ordering::Relaxed);
        self.unknown_blocks.store(0, Ordering::Relaxed);
        self.ignored_deltas.store(0, Ordering::Relaxed);
        self.timeouts.store(0, Ordering::Relaxed);
    }
}

/// Immutable snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub fragments_received: u64,
    pub values_decoded: u64,
    pub salvaged_buffers: u64,
    pub blocks_completed: u64,
    pub partial_blocks: u64,
    pub unknown_blocks: u64,
    pub ignored_deltas: u64,
    pub timeouts: u64,
    pub unknown_rate: f64,
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pipeline Metrics: {} fragments, {} values, {} blocks ({} partial, {:.1}% unknown), {} salvaged, {} ignored, {} timeouts",
            self.fragments_received,
            self.values_decoded,
            self.blocks_completed,
            self.partial_blocks,
            self.unknown_rate,
            self.salvaged_buffers,
            self.ignored_deltas,
            self.timeouts
        )
    }
}
