use crate::models::block::BlockType;
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;
use std::time::{Duration, Instant};

lazy_static! {
    static ref SENTENCE_END: Regex = Regex::new(r"[.!?]\s*$").expect("valid sentence pattern");
    static ref TRAILING_NEWLINE: Regex = Regex::new(r"\n$").expect("valid newline pattern");
}

/// Block age at which the burst phase ends
pub const BURST_PHASE_END: Duration = Duration::from_millis(800);
/// Block age at which the flow phase ends and the read phase begins
pub const FLOW_PHASE_END: Duration = Duration::from_secs(3);

/// Pacing phase, chosen by block age
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Burst,
    Flow,
    Read,
}

impl Phase {
    pub fn for_age(age: Duration) -> Self {
        if age < BURST_PHASE_END {
            Phase::Burst
        } else if age < FLOW_PHASE_END {
            Phase::Flow
        } else {
            Phase::Read
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Burst => "burst",
            Phase::Flow => "flow",
            Phase::Read => "read",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which buffer shapes count as a natural break
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// Only size and latency trigger emission
    None,
    /// Buffer ends a sentence or ends with a newline
    Sentence,
    /// Buffer ends with a newline
    Newline,
    /// Buffer holds a newline anywhere (row and item boundaries)
    AnyNewline,
}

impl Boundary {
    fn matches(&self, buffer: &str) -> bool {
        match self {
            Boundary::None => false,
            Boundary::Sentence => SENTENCE_END.is_match(buffer) || TRAILING_NEWLINE.is_match(buffer),
            Boundary::Newline => TRAILING_NEWLINE.is_match(buffer),
            Boundary::AnyNewline => buffer.contains('\n'),
        }
    }
}

/// Emit condition: buffered characters, time since last emit, boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub max_chars: usize,
    pub max_latency: Duration,
    pub boundary: Boundary,
}

impl Thresholds {
    pub const fn new(max_chars: usize, max_latency_ms: u64, boundary: Boundary) -> Self {
        Self {
            max_chars,
            max_latency: Duration::from_millis(max_latency_ms),
            boundary,
        }
    }
}

/// Thresholds for each phase of an adaptive coalescer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTable {
    pub burst: Thresholds,
    pub flow: Thresholds,
    pub read: Thresholds,
}

impl PhaseTable {
    pub fn get(&self, phase: Phase) -> Thresholds {
        match phase {
            Phase::Burst => self.burst,
            Phase::Flow => self.flow,
            Phase::Read => self.read,
        }
    }
}

pub const PROSE_PHASES: PhaseTable = PhaseTable {
    burst: Thresholds::new(20, 50, Boundary::None),
    flow: Thresholds::new(120, 200, Boundary::Sentence),
    read: Thresholds::new(300, 400, Boundary::Sentence),
};

/// Periods are common in code, so only newlines count as boundaries
pub const CODE_PHASES: PhaseTable = PhaseTable {
    burst: Thresholds::new(10, 30, Boundary::Newline),
    flow: Thresholds::new(60, 150, Boundary::Newline),
    read: Thresholds::new(120, 300, Boundary::Newline),
};

pub const ROW_THRESHOLDS: Thresholds = Thresholds::new(120, 200, Boundary::AnyNewline);
pub const STATIC_PROSE_THRESHOLDS: Thresholds = Thresholds::new(120, 200, Boundary::Sentence);
pub const STATIC_CODE_THRESHOLDS: Thresholds = Thresholds::new(60, 150, Boundary::Sentence);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Adaptive(PhaseTable),
    Fixed(Thresholds),
}

/// Per-coalescer counters for tuning
#[derive(Debug, Clone, PartialEq)]
pub struct CoalescerMetrics {
    pub tokens_received: u64,
    pub chunks_emitted: u64,
    pub chars_emitted: u64,
    pub avg_chunk_size: f64,
    /// Chunks emitted per token received
    pub coalescing_ratio: f64,
    pub block_duration: Duration,
    /// Phase at the time of the snapshot, for adaptive coalescers
    pub final_phase: Option<Phase>,
}

impl fmt::Display for CoalescerMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Coalescer: {} tokens -> {} chunks (ratio {:.3}, avg {:.1} chars), {}ms",
            self.tokens_received,
            self.chunks_emitted,
            self.coalescing_ratio,
            self.avg_chunk_size,
            self.block_duration.as_millis()
        )?;
        if let Some(phase) = self.final_phase {
            write!(f, ", phase {}", phase)?;
        }
        Ok(())
    }
}

/// Batches streamed tokens for one block into readable chunks.
///
/// Emission is checked on every push: size first, then latency since the
/// last emit, then the boundary pattern. Any one of them drains the buffer.
#[derive(Debug, Clone)]
pub struct DeltaCoalescer {
    policy: Policy,
    buffer: String,
    buffered_chars: usize,
    started: Instant,
    last_emit: Instant,
    tokens_received: u64,
    chunks_emitted: u64,
    chars_emitted: u64,
}

impl DeltaCoalescer {
    pub fn new(policy: Policy, started: Instant) -> Self {
        Self {
            policy,
            buffer: String::new(),
            buffered_chars: 0,
            started,
            last_emit: started,
            tokens_received: 0,
            chunks_emitted: 0,
            chars_emitted: 0,
        }
    }

    /// Pick the policy for a block type
    pub fn for_block_type(block_type: &str, started: Instant, adaptive: bool) -> Self {
        let policy = match (BlockType::parse(block_type), adaptive) {
            (Some(BlockType::Table | BlockType::List | BlockType::Steps), _) => {
                Policy::Fixed(ROW_THRESHOLDS)
            }
            (Some(BlockType::Code), true) => Policy::Adaptive(CODE_PHASES),
            (Some(BlockType::Code), false) => Policy::Fixed(STATIC_CODE_THRESHOLDS),
            (_, true) => Policy::Adaptive(PROSE_PHASES),
            (_, false) => Policy::Fixed(STATIC_PROSE_THRESHOLDS),
        };
        Self::new(policy, started)
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub fn phase_at(&self, now: Instant) -> Phase {
        Phase::for_age(now.saturating_duration_since(self.started))
    }

    fn thresholds_at(&self, now: Instant) -> Thresholds {
        match self.policy {
            Policy::Adaptive(table) => table.get(self.phase_at(now)),
            Policy::Fixed(thresholds) => thresholds,
        }
    }

    pub fn push(&mut self, token: &str) -> Option<String> {
        self.push_at(token, Instant::now())
    }

    /// Buffer a token and return a chunk if the active thresholds are met
    pub fn push_at(&mut self, token: &str, now: Instant) -> Option<String> {
        self.tokens_received += 1;
        self.buffer.push_str(token);
        self.buffered_chars += token.chars().count();

        if self.buffer.is_empty() {
            return None;
        }

        let t = self.thresholds_at(now);
        let should_emit = self.buffered_chars >= t.max_chars
            || now.saturating_duration_since(self.last_emit) >= t.max_latency
            || t.boundary.matches(&self.buffer);

        if should_emit {
            self.last_emit = now;
            self.drain()
        } else {
            None
        }
    }

    pub fn flush(&mut self) -> Option<String> {
        self.flush_at(Instant::now())
    }

    /// Drain whatever is buffered, regardless of thresholds
    pub fn flush_at(&mut self, now: Instant) -> Option<String> {
        let out = self.drain();
        if out.is_some() {
            self.last_emit = now;
        }
        out
    }

    fn drain(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let out = std::mem::take(&mut self.buffer);
        self.chunks_emitted += 1;
        self.chars_emitted += self.buffered_chars as u64;
        self.buffered_chars = 0;
        Some(out)
    }

    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn metrics(&self) -> CoalescerMetrics {
        self.metrics_at(Instant::now())
    }

    pub fn metrics_at(&self, now: Instant) -> CoalescerMetrics {
        let avg_chunk_size = if self.chunks_emitted > 0 {
            self.chars_emitted as f64 / self.chunks_emitted as f64
        } else {
            0.0
        };
        let coalescing_ratio = if self.tokens_received > 0 {
            self.chunks_emitted as f64 / self.tokens_received as f64
        } else {
            0.0
        };

        CoalescerMetrics {
            tokens_received: self.tokens_received,
            chunks_emitted: self.chunks_emitted,
            chars_emitted: self.chars_emitted,
            avg_chunk_size,
            coalescing_ratio,
            block_duration: now.saturating_duration_since(self.started),
            final_phase: match self.policy {
                Policy::Adaptive(_) => Some(self.phase_at(now)),
                Policy::Fixed(_) => None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    /// Coalescer whose block started `age` ago, with the latency clock reset at `now`
    fn aged(block_type: &str, age: Duration) -> (DeltaCoalescer, Instant) {
        let t0 = Instant::now();
        let now = t0 + age;
        let mut c = DeltaCoalescer::for_block_type(block_type, t0, true);
        assert_eq!(c.push_at("~", now), Some("~".to_string()));
        (c, now)
    }

    #[test]
    fn test_phase_for_age() {
        assert_eq!(Phase::for_age(ms(0)), Phase::Burst);
        assert_eq!(Phase::for_age(ms(799)), Phase::Burst);
        assert_eq!(Phase::for_age(ms(800)), Phase::Flow);
        assert_eq!(Phase::for_age(ms(2999)), Phase::Flow);
        assert_eq!(Phase::for_age(ms(3000)), Phase::Read);
    }

    #[test]
    fn test_factory_policies() {
        let t0 = Instant::now();
        let policy = |ty: &str, adaptive| DeltaCoalescer::for_block_type(ty, t0, adaptive).policy();

        assert_eq!(policy("text", true), Policy::Adaptive(PROSE_PHASES));
        assert_eq!(policy("markdown", true), Policy::Adaptive(PROSE_PHASES));
        assert_eq!(policy("made_up", true), Policy::Adaptive(PROSE_PHASES));
        assert_eq!(policy("code", true), Policy::Adaptive(CODE_PHASES));
        assert_eq!(policy("table", true), Policy::Fixed(ROW_THRESHOLDS));
        assert_eq!(policy("steps", false), Policy::Fixed(ROW_THRESHOLDS));
        assert_eq!(policy("code", false), Policy::Fixed(STATIC_CODE_THRESHOLDS));
        assert_eq!(policy("text", false), Policy::Fixed(STATIC_PROSE_THRESHOLDS));
    }

    #[test]
    fn test_burst_emits_at_twenty_chars() {
        let t0 = Instant::now();
        let mut c = DeltaCoalescer::for_block_type("text", t0, true);

        let text = "abcdefghijklmnopqrstuvwxyz";
        let mut emitted = Vec::new();
        for (i, ch) in text.chars().enumerate() {
            if let Some(chunk) = c.push_at(&ch.to_string(), t0) {
                emitted.push((i, chunk));
            }
        }

        assert_eq!(emitted, vec![(19, "abcdefghijklmnopqrst".to_string())]);
        assert_eq!(c.buffered(), "uvwxyz");
    }

    #[test]
    fn test_burst_ignores_sentence_end() {
        let t0 = Instant::now();
        let mut c = DeltaCoalescer::for_block_type("text", t0, true);
        assert_eq!(c.push_at("Hi.", t0), None);
    }

    #[test]
    fn test_burst_emits_on_latency() {
        let t0 = Instant::now();
        let mut c = DeltaCoalescer::for_block_type("text", t0, true);

        assert_eq!(c.push_at("Hel", t0 + ms(10)), None);
        assert_eq!(c.push_at("lo", t0 + ms(49)), None);
        assert_eq!(c.push_at(" w", t0 + ms(50)), Some("Hello w".to_string()));
        // Latency clock restarts at the emit
        assert_eq!(c.push_at("o", t0 + ms(90)), None);
        assert_eq!(c.push_at("r", t0 + ms(100)), Some("or".to_string()));
    }

    #[test]
    fn test_flow_sentence_boundary() {
        let (mut c, now) = aged("text", ms(1000));

        assert_eq!(c.push_at("The end", now + ms(10)), None);
        assert_eq!(c.push_at(". ", now + ms(20)), Some("The end. ".to_string()));
        assert_eq!(c.push_at("What", now + ms(30)), None);
        assert_eq!(c.push_at("?", now + ms(40)), Some("What?".to_string()));
        assert_eq!(c.push_at("line\n", now + ms(50)), Some("line\n".to_string()));
    }

    #[test]
    fn test_read_phase_larger_batches() {
        let (mut c, now) = aged("text", ms(5000));

        let word = "x".repeat(150);
        assert_eq!(c.push_at(&word, now), None);
        let out = c.push_at(&word, now).unwrap();
        assert_eq!(out.len(), 300);
        assert_eq!(c.metrics_at(now).final_phase, Some(Phase::Read));
    }

    #[test]
    fn test_code_ignores_periods() {
        let (mut c, now) = aged("code", ms(1000));

        assert_eq!(c.push_at("self.", now), None);
        assert_eq!(c.push_at("run()", now), None);
        assert_eq!(c.push_at(";\n", now), Some("self.run();\n".to_string()));
    }

    #[test]
    fn test_code_burst_size() {
        let t0 = Instant::now();
        let mut c = DeltaCoalescer::for_block_type("code", t0, true);
        assert_eq!(c.push_at("let x", t0), None);
        assert_eq!(c.push_at(" = 1", t0), None);
        assert_eq!(c.push_at("0", t0), Some("let x = 10".to_string()));
    }

    #[test]
    fn test_rows_flush_on_any_newline() {
        let t0 = Instant::now();
        let mut c = DeltaCoalescer::for_block_type("table", t0, true);

        assert_eq!(c.push_at("a | b", t0), None);
        assert_eq!(c.push_at("\nc", t0), Some("a | b\nc".to_string()));
        assert_eq!(c.push_at(" | d", t0 + ms(199)), None);
        assert_eq!(c.push_at(" ", t0 + ms(200)), Some(" | d ".to_string()));
    }

    #[test]
    fn test_static_prose() {
        let t0 = Instant::now();
        let mut c = DeltaCoalescer::for_block_type("text", t0, false);

        // No burst phase: sentences flush immediately
        assert_eq!(c.push_at("Hi", t0), None);
        assert_eq!(c.push_at("!", t0), Some("Hi!".to_string()));
        assert_eq!(c.metrics_at(t0).final_phase, None);
    }

    #[test]
    fn test_empty_tokens_never_emit() {
        let t0 = Instant::now();
        let mut c = DeltaCoalescer::for_block_type("text", t0, true);

        assert_eq!(c.push_at("", t0 + ms(500)), None);
        assert_eq!(c.flush_at(t0 + ms(500)), None);

        let m = c.metrics_at(t0 + ms(500));
        assert_eq!(m.tokens_received, 1);
        assert_eq!(m.chunks_emitted, 0);
    }

    #[test]
    fn test_flush_returns_residual_once() {
        let t0 = Instant::now();
        let mut c = DeltaCoalescer::for_block_type("text", t0, true);

        c.push_at("tail", t0);
        assert_eq!(c.flush_at(t0), Some("tail".to_string()));
        assert!(c.is_empty());
        assert_eq!(c.flush_at(t0), None);
    }

    #[test]
    fn test_multibyte_counts_characters() {
        let t0 = Instant::now();
        let mut c = DeltaCoalescer::for_block_type("code", t0, true);
        // 9 characters, 27 bytes
        assert_eq!(c.push_at("日本語日本語日本語", t0), None);
        assert_eq!(c.push_at("x", t0), Some("日本語日本語日本語x".to_string()));
    }

    #[test]
    fn test_metrics() {
        let t0 = Instant::now();
        let mut c = DeltaCoalescer::for_block_type("text", t0, true);
        for _ in 0..10 {
            c.push_at("ab", t0);
        }
        c.push_at("cd", t0);
        c.flush_at(t0);

        let m = c.metrics_at(t0 + ms(1500));
        assert_eq!(m.tokens_received, 11);
        assert_eq!(m.chunks_emitted, 2);
        assert_eq!(m.chars_emitted, 22);
        assert_eq!(m.avg_chunk_size, 11.0);
        assert_eq!(m.block_duration, ms(1500));
        assert_eq!(m.final_phase, Some(Phase::Flow));

        let line = m.to_string();
        assert!(line.contains("11 tokens -> 2 chunks"));
        assert!(line.contains("phase flow"));
    }
}
