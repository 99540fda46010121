pub mod invoker;
pub mod orchestrator;
pub mod providers;
pub mod tools;

pub use invoker::{InvocationFailure, InvocationOutcome, ToolInvoker};
pub use orchestrator::{Orchestrator, Step, TurnState};
pub use providers::{OpenAiReasoner, ReasoningEngine, ReasoningOutput, ToolDefinition};
pub use tools::{Tool, ToolContext, ToolOutput, ToolRegistry};
