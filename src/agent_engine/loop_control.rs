use serde::{Deserialize, Serialize};

use crate::agent_engine::state::RunState;
use crate::errors::ErrorCode;

pub const DEFAULT_MAX_LOOP_COUNT: u32 = 25;
pub const DEFAULT_MAX_SNAPSHOT_ERRORS: u32 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    pub max_loop_count: u32,
    pub max_snapshot_errors: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_loop_count: DEFAULT_MAX_LOOP_COUNT,
            max_snapshot_errors: DEFAULT_MAX_SNAPSHOT_ERRORS,
        }
    }
}

/// Which budget ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetExceeded {
    Loops,
    Screenshots,
}

impl BudgetExceeded {
    pub fn code(self) -> ErrorCode {
        match self {
            BudgetExceeded::Loops => ErrorCode::ReachMaxLoop,
            BudgetExceeded::Screenshots => ErrorCode::TooManyScreenshotErrors,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            BudgetExceeded::Loops => "Has reached max loop count",
            BudgetExceeded::Screenshots => "Too many screenshot failures",
        }
    }
}

pub struct LoopController {
    config: LoopConfig,
}

impl LoopController {
    pub fn new(config: LoopConfig) -> Self {
        Self { config }
    }

    pub fn exceeded(&self, state: &RunState) -> Option<BudgetExceeded> {
        if state.loop_count >= self.config.max_loop_count {
            Some(BudgetExceeded::Loops)
        } else if state.screenshot_error_count >= self.config.max_snapshot_errors {
            Some(BudgetExceeded::Screenshots)
        } else {
            None
        }
    }

    pub fn begin_iteration(&self, state: &mut RunState) {
        state.loop_count += 1;
    }

    /// Gives back the slot taken by an iteration whose screenshot was unusable
    /// and charges the screenshot budget instead.
    pub fn record_screenshot_failure(&self, state: &mut RunState) {
        state.loop_count = state.loop_count.saturating_sub(1);
        state.screenshot_error_count += 1;
    }
}
