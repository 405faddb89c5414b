pub mod action_parser;
pub mod agent_engine;
pub mod config;
pub mod errors;
pub mod executor;
pub mod llm;
pub mod perception;

pub use action_parser::{parse_prediction, ParseOptions, ParsedAction};
pub use agent_engine::{AgentHandle, AgentObserver, EventBus, GuiAgent, RunState, RunStatus};
pub use errors::{AgentError, AgentResult, ErrorCode, ErrorPayload};
pub use executor::operator::{ExecuteOutput, ExecuteParams, Operator};
pub use llm::model::{Model, UiTarsModel};

/// Installs the global `tracing` subscriber. `RUST_LOG` wins; otherwise `info`.
/// Calling it twice is harmless.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}
