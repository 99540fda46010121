use adlens_common::{ChatMessage, ResponseBlock, ToolCall};
use serde::{Deserialize, Serialize};

/// The closed set of orchestration steps. Routing between them lives in
/// [`decide_next`]; adding a step means extending that function, nowhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Context,
    Reason,
    Tools,
    Analysis,
    Report,
    End,
}

/// Everything the turn carries between steps. Serialized wholesale into the
/// checkpoint after every step, so a crashed turn resumes where it stopped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnState {
    pub thread_id: String,
    pub user_id: String,
    pub session_id: String,
    /// The user query that started this turn. Routing inspects it.
    pub query: String,
    pub step: Step,
    pub messages: Vec<ChatMessage>,
    /// Calls requested by the latest reasoning round, pending execution.
    #[serde(default)]
    pub pending_calls: Vec<ToolCall>,
    /// Blocks produced by formatting tools, assembled into the response.
    #[serde(default)]
    pub blocks: Vec<ResponseBlock>,
    pub error_count: u32,
    pub tool_rounds: usize,
}

impl TurnState {
    pub fn new(thread_id: String, user_id: String, session_id: String, query: String) -> Self {
        Self {
            thread_id,
            user_id,
            session_id,
            query,
            step: Step::Context,
            messages: Vec::new(),
            pending_calls: Vec::new(),
            blocks: Vec::new(),
            error_count: 0,
            tool_rounds: 0,
        }
    }

    /// Content of the latest non-empty assistant message.
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| {
                matches!(m.role, adlens_common::ChatRole::Assistant) && !m.content.trim().is_empty()
            })
            .map(|m| m.content.as_str())
    }
}

/// Vocabulary that marks a query as wanting analysis rather than raw data.
const ANALYSIS_KEYWORDS: &[&str] = &[
    "analyze",
    "analysis",
    "compare",
    "comparison",
    "trend",
    "trends",
    "recommend",
    "recommendation",
    "versus",
    " vs ",
    "why",
];

fn wants_analysis(query: &str) -> bool {
    let lower = query.to_lowercase();
    ANALYSIS_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Pure routing function for the state machine. Every transition decision is
/// made here so the flow is auditable in one place.
pub fn decide_next(state: &TurnState, max_retries: u32) -> Step {
    if state.error_count >= max_retries {
        return Step::End;
    }

    match state.step {
        Step::Context => Step::Reason,
        Step::Reason => {
            if state.pending_calls.is_empty() {
                Step::End
            } else {
                Step::Tools
            }
        }
        Step::Tools => {
            if wants_analysis(&state.query) {
                Step::Analysis
            } else {
                Step::Reason
            }
        }
        Step::Analysis => Step::Report,
        Step::Report => Step::End,
        Step::End => Step::End,
    }
}
