use block_stream::config::PipelineConfig;
use block_stream::models::event::normalize_event;
use block_stream::streaming::{BlockAssembler, BlockPipeline, DeltaCoalescer, IncrementalJsonParser};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use serde_json::json;
use std::hint::black_box;
use std::time::Instant;

/// Model output for a text block and a table block, one event per line
fn model_output() -> String {
    let mut lines = vec![json!({"event": "block_start", "block_id": "t", "block_type": "text"})];
    for word in "The quick brown fox jumps over the lazy dog. ".repeat(8).split_inclusive(' ') {
        lines.push(json!({"event": "block_delta", "block_id": "t", "path": "content", "value": word}));
    }
    lines.push(json!({"event": "block_end", "block_id": "t"}));

    lines.push(json!({"event": "block_start", "block_id": "g", "block_type": "table"}));
    lines.push(json!({"event": "block_delta", "block_id": "g", "path": "headers", "value": "Name | Score | Rank"}));
    for i in 0..20 {
        lines.push(json!({"event": "block_delta", "block_id": "g", "path": "rows", "value": format!("row{} | {} | {}", i, i * 3, i)}));
    }
    lines.push(json!({"event": "block_end", "block_id": "g"}));

    lines.iter().map(|l| format!("{}\n", l)).collect()
}

/// Split text into token-sized pieces on char boundaries
fn tokens(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size).map(|c| c.iter().collect()).collect()
}

fn benchmark_parser_whole(c: &mut Criterion) {
    let data = model_output();

    let mut group = c.benchmark_group("incremental_parser");
    group.throughput(Throughput::Bytes(data.len() as u64));

    group.bench_function("parse_whole_output", |b| {
        b.iter(|| {
            let mut parser = IncrementalJsonParser::new();
            black_box(parser.push(&data));
        });
    });

    let pieces = tokens(&data, 4);
    group.bench_function("parse_token_by_token", |b| {
        b.iter(|| {
            let mut parser = IncrementalJsonParser::new();
            for piece in &pieces {
                black_box(parser.push(piece));
            }
        });
    });

    group.finish();
}

fn benchmark_assembler(c: &mut Criterion) {
    let mut parser = IncrementalJsonParser::new();
    let events: Vec<_> = parser.push(&model_output()).into_iter().map(normalize_event).collect();

    c.bench_function("assemble_blocks", |b| {
        b.iter(|| {
            let mut assembler = BlockAssembler::new();
            for event in &events {
                black_box(assembler.apply(event.clone()));
            }
        });
    });
}

fn benchmark_coalescer(c: &mut Criterion) {
    let pieces = tokens(&"Streaming text arrives a few characters at a time. ".repeat(20), 3);

    c.bench_function("coalesce_prose", |b| {
        b.iter(|| {
            let now = Instant::now();
            let mut coalescer = DeltaCoalescer::for_block_type("text", now, true);
            for piece in &pieces {
                black_box(coalescer.push_at(piece, now));
            }
            black_box(coalescer.flush_at(now));
        });
    });
}

fn benchmark_end_to_end(c: &mut Criterion) {
    let data = model_output();
    let pieces = tokens(&data, 5);

    let mut group = c.benchmark_group("pipeline");
    group.throughput(Throughput::Bytes(data.len() as u64));

    for (name, coalesce) in [("pipeline_uncoalesced", false), ("pipeline_coalesced", true)] {
        let mut config = PipelineConfig::default();
        config.coalescing.enabled = coalesce;

        group.bench_function(name, |b| {
            b.iter(|| {
                let mut pipeline = BlockPipeline::new(&config);
                for piece in &pieces {
                    black_box(pipeline.push_fragment(piece));
                }
                black_box(pipeline.finish());
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_parser_whole,
    benchmark_assembler,
    benchmark_coalescer,
    benchmark_end_to_end
);
criterion_main!(benches);
