mod engine;
mod steps;

pub use engine::Orchestrator;
pub use steps::{Step, TurnState, decide_next};
