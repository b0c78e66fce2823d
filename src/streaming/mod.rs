pub mod assembler;
pub mod coalescer;
pub mod parser;
pub mod pipeline;
pub mod reader;

pub use assembler::{AssemblerUpdate, BlockAssembler, OpenBlock};
pub use coalescer::{CoalescerMetrics, DeltaCoalescer, Phase};
pub use parser::{IncrementalJsonParser, strip_markdown_fences};
pub use pipeline::{BlockPipeline, PipelineEvent};
pub use reader::{Fragment, TimeoutStreamReader};
