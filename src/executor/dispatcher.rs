use crate::errors::ErrorCode;

pub const FINISHED: &str = "finished";
pub const CALL_USER: &str = "call_user";
pub const ERROR_ENV: &str = "error_env";
pub const MAX_LOOP: &str = "max_loop";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionDisposition {
    /// Terminal sentinel: the run ends normally.
    End(EndReason),
    /// The model gave up on its step budget.
    MaxLoop,
    /// A real action for the operator.
    Dispatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Finished,
    CallUser,
    EnvironmentError,
}

impl EndReason {
    /// Error code recorded on the run, if this ending is a failure.
    pub fn error_code(self) -> Option<ErrorCode> {
        match self {
            EndReason::EnvironmentError => Some(ErrorCode::EnvironmentError),
            EndReason::Finished | EndReason::CallUser => None,
        }
    }
}

pub fn classify(action_type: &str) -> ActionDisposition {
    match action_type {
        FINISHED => ActionDisposition::End(EndReason::Finished),
        CALL_USER => ActionDisposition::End(EndReason::CallUser),
        ERROR_ENV => ActionDisposition::End(EndReason::EnvironmentError),
        MAX_LOOP => ActionDisposition::MaxLoop,
        _ => ActionDisposition::Dispatch,
    }
}
