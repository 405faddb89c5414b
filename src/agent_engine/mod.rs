pub mod engine;
pub mod event_bus;
pub mod history;
pub mod loop_control;
pub mod prompt;
pub mod retry;
pub mod state;

pub use engine::{AgentHandle, GuiAgent};
pub use event_bus::{AgentEvent, AgentObserver, EventBus, NoopObserver};
pub use state::{Author, RunState, RunStatus, Turn};
