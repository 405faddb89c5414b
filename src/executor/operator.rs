use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::action_parser::{Factors, ParsedAction};
use crate::agent_engine::state::RunStatus;
use crate::errors::AgentResult;
use crate::perception::types::{ScreenContext, ScreenshotOutput};

/// Action space advertised to the model when an operator does not provide its own.
pub const DEFAULT_ACTION_SPACES: &[&str] = &[
    "click(start_box='<|box_start|>(x1,y1)<|box_end|>')",
    "left_double(start_box='<|box_start|>(x1,y1)<|box_end|>')",
    "right_single(start_box='<|box_start|>(x1,y1)<|box_end|>')",
    "drag(start_box='<|box_start|>(x1,y1)<|box_end|>', end_box='<|box_start|>(x3,y3)<|box_end|>')",
    "hotkey(key='')",
    "type(content='') #If you want to submit your input, use \"\\n\" at the end of `content`.",
    "scroll(start_box='<|box_start|>(x1,y1)<|box_end|>', direction='down or up or right or left')",
    "wait() #Sleep for 5s and take a screenshot to check for any changes.",
    "finished(content='xxx') # Use escape characters \\', \\\", and \\n in content part to ensure we can parse the content in normal python string format.",
    "call_user() # Submit the task and call the user when the task is unsolvable, or when you need the user's help.",
];

/// Everything an operator needs to turn a normalized action into a concrete
/// input event. Nothing is read from ambient state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteParams {
    pub prediction: String,
    pub parsed_prediction: ParsedAction,
    pub screen: ScreenContext,
    pub scale_factor: f64,
    pub factors: Factors,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteOutput {
    /// Status the run should move to, if the operator wants to change it.
    pub status: Option<RunStatus>,
}

/// The controlled surface: screenshot source and action executor.
///
/// Implementations own all OS / browser I/O. Both calls may fail; the agent
/// wraps them in the configured retry policy.
#[async_trait]
pub trait Operator: Send + Sync {
    async fn screenshot(&self) -> AgentResult<ScreenshotOutput>;

    async fn execute(&self, params: ExecuteParams) -> AgentResult<ExecuteOutput>;

    /// Action signatures listed in the system prompt.
    fn action_spaces(&self) -> Vec<String> {
        DEFAULT_ACTION_SPACES.iter().map(|s| s.to_string()).collect()
    }
}
