use block_stream::config::{PipelineConfig, ReaderConfig};
use block_stream::error::{StreamError, TimeoutKind};
use block_stream::streaming::{BlockPipeline, Fragment, PipelineEvent, TimeoutStreamReader};
use bytes::Bytes;
use futures::{StreamExt, stream};
use std::io;
use std::time::Duration;

type Chunk = Result<Bytes, io::Error>;

fn sse(content: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({"choices": [{"delta": {"content": content}}]})
    )
}

fn uncoalesced() -> BlockPipeline {
    let mut config = PipelineConfig::default();
    config.coalescing.enabled = false;
    BlockPipeline::new(&config)
}

fn completed(events: &[PipelineEvent]) -> Vec<&block_stream::models::ContentBlock> {
    events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::BlockCompleted(block) => Some(block),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_first_chunk_timeout_becomes_text_block() {
    let reader = TimeoutStreamReader::new(stream::pending::<Chunk>(), &ReaderConfig::default());
    let pipeline = uncoalesced();
    let metrics = pipeline.metrics_handle();

    let events: Vec<PipelineEvent> = pipeline.run(reader).collect().await;
    let blocks = completed(&events);

    assert_eq!(blocks.len(), 1);
    assert!(blocks[0].is_partial());
    assert_eq!(
        blocks[0].data()["content"],
        "Error: The request to the LLM service timed out after 30.0 seconds. Please try again."
    );
    assert_eq!(metrics.snapshot().timeouts, 1);
    assert_eq!(metrics.snapshot().salvaged_buffers, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stall_closes_open_blocks() {
    let head = sse(r#"{"event":"block_start","block_id":"b","block_type":"text"}"#)
        + &sse(r#"{"event":"block_delta","block_id":"b","value":"Partial answer"}"#);
    let inner = stream::iter(vec![Ok(Bytes::from(head))]).chain(stream::pending::<Chunk>());

    let reader = TimeoutStreamReader::with_timeouts(
        inner,
        Duration::from_secs(30),
        Duration::from_secs(2),
        Duration::from_secs(60),
    );
    let events: Vec<PipelineEvent> = uncoalesced().run(reader).collect().await;
    let blocks = completed(&events);

    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].id, "b");
    assert!(blocks[0].is_partial());
    assert_eq!(blocks[0].data()["content"], "Partial answer");

    // The error trails the interrupted block as its own text block
    assert!(blocks[1].id.starts_with("salvaged-"));
    assert!(blocks[1].is_partial());
    let error_text = blocks[1].data()["content"].as_str().unwrap().to_string();
    assert!(error_text.starts_with("Error: No chunk received for 2s."));
    assert!(error_text.ends_with("Total elapsed: 2.0s"));
}

#[tokio::test(start_paused = true)]
async fn test_max_duration_reported_separately() {
    let inner = Box::pin(stream::unfold(0u32, |n| async move {
        tokio::time::sleep(Duration::from_millis(900)).await;
        Some((Ok::<_, io::Error>(Bytes::from(sse(" "))), n + 1))
    }));

    let mut reader = TimeoutStreamReader::with_timeouts(
        inner,
        Duration::from_secs(5),
        Duration::from_secs(1),
        Duration::from_secs(3),
    );

    let mut last = None;
    while let Some(fragment) = reader.next_fragment().await {
        last = Some(fragment);
    }

    match last {
        Some(Fragment::Error(e)) => {
            assert!(e.is_timeout());
            assert_eq!(e.timeout_kind(), Some(TimeoutKind::MaxDuration));
            assert!(e.to_string().starts_with("Stream exceeded maximum duration of 3s."));
        }
        other => panic!("expected a max duration timeout, got {:?}", other),
    }
    assert!(reader.is_finished());
}

#[tokio::test]
async fn test_transport_fault_keeps_received_blocks() {
    let parts: Vec<Chunk> = vec![
        Ok(Bytes::from(
            sse(r#"{"event":"block_start","block_id":"ok","block_type":"divider"}"#)
                + &sse(r#"{"event":"block_end","block_id":"ok"}"#),
        )),
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset by peer")),
    ];

    let reader = TimeoutStreamReader::new(stream::iter(parts), &ReaderConfig::default());
    let events: Vec<PipelineEvent> = uncoalesced().run(reader).collect().await;
    let blocks = completed(&events);

    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].id, "ok");
    assert!(!blocks[0].is_partial());
    assert_eq!(
        blocks[1].data()["content"],
        "Error: Error generating response: connection reset by peer"
    );
}

#[tokio::test]
async fn test_empty_response_reports_no_data() {
    let reader = TimeoutStreamReader::new(
        stream::iter(vec![Ok::<_, io::Error>(Bytes::from_static(b": ping\n\n"))]),
        &ReaderConfig::default(),
    );

    let fragments: Vec<Fragment> = reader.into_stream().collect().await;
    assert_eq!(fragments.len(), 1);
    assert!(matches!(fragments[0], Fragment::Error(StreamError::NoData)));
}

#[test]
fn test_garbage_is_salvaged_not_dropped() {
    let mut config = PipelineConfig::default();
    config.coalescing.enabled = false;
    config.parser.salvage_threshold = 64;
    let mut pipeline = BlockPipeline::new(&config);

    let mut events = Vec::new();
    for _ in 0..10 {
        events.extend(pipeline.push_fragment("not json at all, "));
    }
    events.extend(pipeline.finish());

    let text: String = completed(&events)
        .iter()
        .map(|b| b.data()["content"].as_str().unwrap_or_default().to_string())
        .collect::<Vec<_>>()
        .join(" ");

    // Every character survives, modulo whitespace trimmed at salvage edges
    assert_eq!(
        text.split_whitespace().collect::<Vec<_>>(),
        "not json at all, ".repeat(10).split_whitespace().collect::<Vec<_>>()
    );
    assert!(pipeline.metrics().salvaged_buffers >= 2);
    assert!(!pipeline.assembler().has_open_blocks());
}
