use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::action_parser::ParsedAction;
use crate::errors::ErrorPayload;
use crate::perception::types::ScreenshotContext;

/// Text value of a turn that stands for its screenshot in the model input.
pub const IMAGE_PLACEHOLDER: &str = "<image>";

/// Lifecycle of a single run. Moves forward only:
/// `Init → Running → {Ended | MaxLoopExceeded}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Init,
    Running,
    MaxLoopExceeded,
    Ended,
}

impl RunStatus {
    fn rank(self) -> u8 {
        match self {
            RunStatus::Init => 0,
            RunStatus::Running => 1,
            RunStatus::MaxLoopExceeded | RunStatus::Ended => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::MaxLoopExceeded | RunStatus::Ended)
    }

    pub fn can_transition_to(self, next: RunStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Author {
    Human,
    Agent,
}

/// Wall-clock span of the work that produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    /// Milliseconds since the Unix epoch.
    pub start: i64,
    pub end: i64,
    /// Elapsed milliseconds.
    pub cost: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_tokens: Option<u64>,
}

impl Timing {
    pub fn since(start: DateTime<Utc>) -> Self {
        let end = Utc::now();
        Self {
            start: start.timestamp_millis(),
            end: end.timestamp_millis(),
            cost: (end - start).num_milliseconds().max(0) as u64,
            cost_tokens: None,
        }
    }

    pub fn with_tokens(mut self, tokens: Option<u64>) -> Self {
        self.cost_tokens = tokens;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnScreenshot {
    pub base64: String,
    pub context: ScreenshotContext,
}

/// One entry of the run's conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub author: Author,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<TurnScreenshot>,
    pub timing: Timing,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed_actions: Option<Vec<ParsedAction>>,
}

impl Turn {
    pub fn instruction(text: &str) -> Self {
        let now = Utc::now();
        Self {
            author: Author::Human,
            value: text.to_string(),
            screenshot: None,
            timing: Timing::since(now),
            parsed_actions: None,
        }
    }

    pub fn screenshot(base64: String, context: ScreenshotContext, timing: Timing) -> Self {
        Self {
            author: Author::Human,
            value: IMAGE_PLACEHOLDER.to_string(),
            screenshot: Some(TurnScreenshot { base64, context }),
            timing,
            parsed_actions: None,
        }
    }

    pub fn prediction(prediction: String, actions: Vec<ParsedAction>, timing: Timing) -> Self {
        Self {
            author: Author::Agent,
            value: prediction,
            screenshot: None,
            timing,
            parsed_actions: Some(actions),
        }
    }

    pub fn is_screenshot(&self) -> bool {
        self.screenshot.is_some()
    }
}

/// Mutable state of one `run(instruction)` call. Only the agent loop writes it;
/// observers receive clones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub instruction: String,
    pub system_prompt: String,
    pub conversation: Vec<Turn>,
    pub loop_count: u32,
    pub screenshot_error_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl RunState {
    pub fn new(instruction: &str, system_prompt: String) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            status: RunStatus::Init,
            instruction: instruction.to_string(),
            system_prompt,
            conversation: vec![Turn::instruction(instruction)],
            loop_count: 0,
            screenshot_error_count: 0,
            error: None,
        }
    }

    /// Moves to `next` if that is a forward move. Returns whether it moved.
    pub fn transition(&mut self, next: RunStatus) -> bool {
        if self.status.can_transition_to(next) {
            tracing::debug!(run_id = %self.run_id, from = ?self.status, to = ?next, "run status changed");
            self.status = next;
            true
        } else {
            if self.status != next {
                tracing::debug!(run_id = %self.run_id, from = ?self.status, to = ?next, "status change ignored");
            }
            false
        }
    }
}
