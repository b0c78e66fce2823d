use anyhow::{Context, bail};
use block_stream::client::OpenAiClient;
use block_stream::config::PipelineConfig;
use block_stream::provider::Provider;
use block_stream::streaming::{BlockPipeline, PipelineEvent, TimeoutStreamReader};
use bytes::Bytes;
use clap::Parser;
use futures::{Stream, StreamExt, stream};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Reassemble content blocks from a streamed LLM response
#[derive(Debug, Parser)]
#[command(name = "block-stream", version, about)]
struct Args {
    /// TOML configuration file (defaults to BLOCK_STREAM_* environment variables)
    #[arg(long)]
    config: Option<String>,

    /// Replay a recorded SSE transcript instead of calling the upstream service
    #[arg(long, conflicts_with = "prompt")]
    replay: Option<String>,

    /// Bytes per simulated network chunk when replaying
    #[arg(long, default_value_t = 64)]
    chunk_size: usize,

    /// Prompt sent to the upstream service
    #[arg(long)]
    prompt: Option<String>,

    /// Forward every delta as-is instead of pacing them
    #[arg(long)]
    no_coalesce: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("block_stream=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::from_env()?,
    };
    if args.no_coalesce {
        config.coalescing.enabled = false;
    }
    config.validate()?;

    let pipeline = BlockPipeline::new(&config);
    let metrics = pipeline.metrics_handle();

    let printed = if let Some(path) = &args.replay {
        let transcript = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read transcript {}", path))?;
        let chunks: Vec<Result<Bytes, std::io::Error>> = transcript
            .chunks(args.chunk_size.max(1))
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();

        info!(path = %path, chunks = chunks.len(), "Replaying transcript");
        let reader = TimeoutStreamReader::new(stream::iter(chunks), &config.reader);
        print_events(pipeline.run(reader)).await?
    } else if let Some(prompt) = &args.prompt {
        let client = OpenAiClient::new(config.upstream.clone())?;
        info!(provider = client.name(), model = %config.upstream.model, "Requesting completion");

        let upstream = client.stream_completion(prompt).await?;
        let reader = TimeoutStreamReader::new(upstream, &config.reader);
        print_events(pipeline.run(reader)).await?
    } else {
        bail!("Either --replay <FILE> or --prompt <TEXT> is required");
    };

    info!(events = printed, "{}", metrics.snapshot());
    Ok(())
}

/// Print each event as one JSON line until the stream ends or Ctrl-C
async fn print_events(events: impl Stream<Item = PipelineEvent>) -> anyhow::Result<usize> {
    let mut events = std::pin::pin!(events);
    let mut interrupt = std::pin::pin!(tokio::signal::ctrl_c());
    let mut printed = 0;

    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(event) => {
                    println!("{}", serde_json::to_string(&event)?);
                    printed += 1;
                }
                None => break,
            },
            _ = &mut interrupt => {
                warn!("Interrupted, open blocks are abandoned");
                break;
            }
        }
    }

    Ok(printed)
}
