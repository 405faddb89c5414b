use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::action_parser::ParsedAction;
use crate::agent_engine::event_bus::{AgentObserver, NoopObserver};
use crate::agent_engine::history::to_model_input;
use crate::agent_engine::loop_control::LoopController;
use crate::agent_engine::prompt::{render_system_prompt, COMPUTER_USE_TEMPLATE};
use crate::agent_engine::retry::{sleep_or_cancel, with_retry};
use crate::agent_engine::state::{RunState, RunStatus, Timing, Turn};
use crate::config::{AgentSettings, AppConfig, RetryConfig};
use crate::errors::{AgentError, AgentResult, ErrorCode, ErrorPayload};
use crate::executor::dispatcher::{self, ActionDisposition};
use crate::executor::operator::{ExecuteParams, Operator};
use crate::llm::model::{InvokeParams, Model, UiTarsModel};
use crate::perception::screenshot::validate_screenshot;
use crate::perception::types::ScreenshotContext;

/// Consecutive empty predictions that trigger `on_warning`.
const EMPTY_RESPONSE_WARN_THRESHOLD: u32 = 2;

/// Why a run stopped early, with the code reported to observers.
struct RunFailure {
    code: ErrorCode,
    error: AgentError,
}

impl From<AgentError> for RunFailure {
    fn from(error: AgentError) -> Self {
        Self {
            code: ErrorCode::Unknown,
            error,
        }
    }
}

/// Remote control for a [`GuiAgent`]: stop it or park it between iterations.
#[derive(Clone)]
pub struct AgentHandle {
    cancel: CancellationToken,
    paused: Arc<watch::Sender<bool>>,
}

impl AgentHandle {
    /// Aborts the current run, including any in-flight model call. Permanent.
    pub fn stop(&self) {
        tracing::info!("agent stop requested");
        self.cancel.cancel();
    }

    pub fn pause(&self) {
        tracing::info!("agent paused");
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        tracing::info!("agent resumed");
        self.paused.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Screenshot → predict → execute loop driving one [`Operator`].
pub struct GuiAgent {
    operator: Arc<dyn Operator>,
    model: Arc<dyn Model>,
    observer: Arc<dyn AgentObserver>,
    settings: AgentSettings,
    retry: RetryConfig,
    cancel: CancellationToken,
    paused: Arc<watch::Sender<bool>>,
}

impl GuiAgent {
    pub fn new(
        operator: Arc<dyn Operator>,
        model: Arc<dyn Model>,
        settings: AgentSettings,
        retry: RetryConfig,
    ) -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            operator,
            model,
            observer: Arc::new(NoopObserver),
            settings,
            retry,
            cancel: CancellationToken::new(),
            paused: Arc::new(paused),
        }
    }

    /// Builds the agent with a [`UiTarsModel`] talking to the configured endpoint.
    pub fn from_config(operator: Arc<dyn Operator>, config: &AppConfig) -> AgentResult<Self> {
        let model = UiTarsModel::from_config(config)?;
        Ok(Self::new(
            operator,
            Arc::new(model),
            config.agent.clone(),
            config.retry.clone(),
        ))
    }

    pub fn with_observer(mut self, observer: Arc<dyn AgentObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Uses an externally owned token, e.g. one shared with other tasks.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn handle(&self) -> AgentHandle {
        AgentHandle {
            cancel: self.cancel.clone(),
            paused: self.paused.clone(),
        }
    }

    fn system_prompt(&self, instruction: &str) -> String {
        match &self.settings.system_prompt {
            Some(custom) => custom.clone(),
            None => render_system_prompt(
                COMPUTER_USE_TEMPLATE,
                &self.operator.action_spaces(),
                &self.settings.language,
                instruction,
            ),
        }
    }

    /// Runs `instruction` to completion and returns the final snapshot.
    ///
    /// Nothing is returned as an error. A run that throws (model failure,
    /// panic) reaches observers through `on_error`; budget exhaustion and
    /// `error_env` are only recorded in the returned state's `status` and
    /// `error`.
    pub async fn run(&self, instruction: &str) -> RunState {
        let mut state = RunState::new(instruction, self.system_prompt(instruction));
        tracing::info!(run_id = %state.run_id, instruction, "run started");
        state.transition(RunStatus::Running);
        self.observer.on_data(&state).await;

        let outcome = AssertUnwindSafe(self.run_loop(&mut state)).catch_unwind().await;
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(failure)) if failure.error.is_cancelled() => {
                tracing::info!(run_id = %state.run_id, loop_count = state.loop_count, "run cancelled");
                None
            }
            Ok(Err(failure)) => {
                tracing::error!(run_id = %state.run_id, code = ?failure.code, error = %failure.error, "run failed");
                Some(ErrorPayload::from_error(failure.code, &failure.error))
            }
            Err(panic) => {
                let error = AgentError::Internal(panic_message(panic));
                tracing::error!(run_id = %state.run_id, error = %error, "agent loop panicked");
                Some(ErrorPayload::from_error(ErrorCode::Unknown, &error))
            }
        };
        state.transition(RunStatus::Ended);
        if let Some(payload) = failure {
            state.error = Some(payload.clone());
            self.observer.on_error(&state, &payload).await;
        }
        tracing::info!(
            run_id = %state.run_id,
            status = ?state.status,
            loop_count = state.loop_count,
            screenshot_errors = state.screenshot_error_count,
            turns = state.conversation.len(),
            "run finished"
        );
        self.observer.on_data(&state).await;
        state
    }

    async fn run_loop(&self, state: &mut RunState) -> Result<(), RunFailure> {
        let controller = LoopController::new(self.settings.loop_config());
        let mut empty_responses = 0u32;

        loop {
            if state.status != RunStatus::Running || self.cancel.is_cancelled() {
                return Ok(());
            }
            self.wait_while_paused().await?;

            if let Some(exceeded) = controller.exceeded(state) {
                tracing::warn!(
                    run_id = %state.run_id,
                    loop_count = state.loop_count,
                    screenshot_errors = state.screenshot_error_count,
                    "{}",
                    exceeded.message()
                );
                state.error = Some(ErrorPayload::new(exceeded.code(), exceeded.message()));
                state.transition(RunStatus::MaxLoopExceeded);
                return Ok(());
            }

            controller.begin_iteration(state);
            tracing::debug!(run_id = %state.run_id, loop_count = state.loop_count, "iteration started");

            let shot_start = chrono::Utc::now();
            let Some((base64, context)) = self.capture().await? else {
                controller.record_screenshot_failure(state);
                let interval = Duration::from_millis(self.settings.snapshot_retry_interval_ms);
                sleep_or_cancel(interval, &self.cancel).await?;
                continue;
            };

            state.conversation.push(Turn::screenshot(base64, context, Timing::since(shot_start)));
            self.observer.on_data(state).await;

            let params = InvokeParams {
                input: to_model_input(&state.conversation, self.settings.max_images),
                system_prompt: state.system_prompt.clone(),
                screen_context: context.size,
                scale_factor: context.scale_factor,
                retry: self.retry.model,
            };
            let invoke_start = chrono::Utc::now();
            let output = match self.model.invoke(params, &self.cancel).await {
                Ok(output) => {
                    empty_responses = 0;
                    output
                }
                Err(AgentError::EmptyResponse) => {
                    empty_responses += 1;
                    tracing::warn!(run_id = %state.run_id, empty_responses, "no prediction this iteration");
                    if empty_responses >= EMPTY_RESPONSE_WARN_THRESHOLD {
                        let message = format!("Model returned no prediction {empty_responses} times in a row");
                        self.observer.on_warning(state, &message).await;
                    }
                    self.pause_between_iterations().await?;
                    continue;
                }
                Err(error) if error.is_cancelled() => return Err(error.into()),
                Err(error) => {
                    return Err(RunFailure {
                        code: ErrorCode::InvokeRetryError,
                        error,
                    })
                }
            };

            tracing::info!(
                run_id = %state.run_id,
                loop_count = state.loop_count,
                actions = output.parsed_predictions.len(),
                cost_ms = output.cost_time_ms,
                cost_tokens = ?output.cost_tokens,
                "prediction received"
            );
            let timing = Timing::since(invoke_start).with_tokens(output.cost_tokens);
            state.conversation.push(Turn::prediction(
                output.prediction.clone(),
                output.parsed_predictions.clone(),
                timing,
            ));
            self.observer.on_data(state).await;

            self.dispatch_actions(state, &output.prediction, output.parsed_predictions, context)
                .await?;

            self.pause_between_iterations().await?;
        }
    }

    /// Takes and validates one screenshot. `Ok(None)` means this attempt is
    /// unusable and counts against the screenshot budget.
    async fn capture(&self) -> Result<Option<(String, ScreenshotContext)>, RunFailure> {
        let operator = &self.operator;
        let shot = with_retry(&self.retry.screenshot, &self.cancel, "screenshot", move || operator.screenshot()).await;
        let shot = match shot {
            Ok(shot) => shot,
            Err(error) if error.is_cancelled() => return Err(error.into()),
            Err(error) => {
                tracing::warn!(error = %error, "screenshot failed");
                return Ok(None);
            }
        };
        match validate_screenshot(&shot) {
            Ok(context) => Ok(Some((shot.base64, context))),
            Err(error) => {
                tracing::warn!(error = %error, "screenshot rejected");
                Ok(None)
            }
        }
    }

    async fn dispatch_actions(
        &self,
        state: &mut RunState,
        prediction: &str,
        actions: Vec<ParsedAction>,
        context: ScreenshotContext,
    ) -> Result<(), RunFailure> {
        let factors = self.model.factors();
        for action in actions {
            match dispatcher::classify(&action.action_type) {
                ActionDisposition::End(reason) => {
                    tracing::info!(run_id = %state.run_id, action = %action.action_type, "run ended by model");
                    if let Some(code) = reason.error_code() {
                        state.error = Some(ErrorPayload::new(code, format!("Model reported `{}`", action.action_type)));
                    }
                    state.transition(RunStatus::Ended);
                    return Ok(());
                }
                ActionDisposition::MaxLoop => {
                    tracing::warn!(run_id = %state.run_id, "model reported max_loop");
                    state.error = Some(ErrorPayload::new(ErrorCode::ReachMaxLoop, "Has reached max loop count"));
                    state.transition(RunStatus::MaxLoopExceeded);
                    return Ok(());
                }
                ActionDisposition::Dispatch => {}
            }

            if self.cancel.is_cancelled() {
                return Err(AgentError::Cancelled.into());
            }

            let params = ExecuteParams {
                prediction: prediction.to_string(),
                parsed_prediction: action,
                screen: context.size,
                scale_factor: context.scale_factor,
                factors,
            };
            let operator = &self.operator;
            let params = &params;
            let result = with_retry(&self.retry.execute, &self.cancel, "execute", move || {
                operator.execute(params.clone())
            })
            .await;

            match result {
                Ok(out) => {
                    if let Some(status) = out.status {
                        state.transition(status);
                    }
                    if state.status != RunStatus::Running {
                        tracing::info!(run_id = %state.run_id, status = ?state.status, "operator ended the run");
                        return Ok(());
                    }
                }
                Err(error) if error.is_cancelled() => return Err(error.into()),
                Err(error) => {
                    tracing::warn!(
                        run_id = %state.run_id,
                        action = %params.parsed_prediction.action_type,
                        error = %error,
                        "action failed, continuing"
                    );
                }
            }
        }
        Ok(())
    }

    async fn wait_while_paused(&self) -> AgentResult<()> {
        let mut rx = self.paused.subscribe();
        while *rx.borrow_and_update() {
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(AgentError::Cancelled),
                changed = rx.changed() => {
                    changed.map_err(|e| AgentError::Internal(format!("pause channel closed: {e}")))?;
                }
            }
        }
        Ok(())
    }

    async fn pause_between_iterations(&self) -> AgentResult<()> {
        sleep_or_cancel(Duration::from_millis(self.settings.loop_interval_ms), &self.cancel).await
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "agent loop panicked".to_string()
    }
}
