pub mod blocks;
pub mod error;
pub mod message;
pub mod types;

pub use blocks::{ChartSeries, ChatResponse, ResponseBlock, TableBlock};
pub use error::{Error, Result};
pub use message::{ChatMessage, ChatRole, ToolCall};
pub use types::{SessionId, ThreadId, UserId, thread_id};
