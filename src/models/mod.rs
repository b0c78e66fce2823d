pub mod block;
pub mod event;
pub mod openai;

pub use block::{BlockBody, BlockType, ContentBlock};
pub use event::{BlockEvent, UNKNOWN_BLOCK_ID, normalize_event};
