use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::action_parser::{self, Factors, ParseMode, ParseOptions, ParsedAction, UiTarsVersion};
use crate::agent_engine::history::ModelInput;
use crate::agent_engine::retry::{with_retry, RetryPolicy};
use crate::agent_engine::state::{Author, IMAGE_PLACEHOLDER};
use crate::config::{AppConfig, API_KEY_ENV};
use crate::errors::{AgentError, AgentResult};
use crate::llm::provider::LlmProvider;
use crate::llm::providers::openai_compatible::OpenAiCompatibleProvider;
use crate::llm::types::{CallConfig, ChatMessage};
use crate::perception::preprocess::{resize_to_budget, to_data_uri};
use crate::perception::types::ScreenContext;

#[derive(Debug, Clone)]
pub struct InvokeParams {
    pub input: ModelInput,
    pub system_prompt: String,
    /// Size of the most recent screenshot.
    pub screen_context: ScreenContext,
    pub scale_factor: f64,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone)]
pub struct InvokeOutput {
    pub prediction: String,
    pub parsed_predictions: Vec<ParsedAction>,
    pub cost_time_ms: u64,
    pub cost_tokens: Option<u64>,
}

/// A vision-language model that predicts the next GUI action.
#[async_trait]
pub trait Model: Send + Sync {
    async fn invoke(&self, params: InvokeParams, cancel: &CancellationToken) -> AgentResult<InvokeOutput>;

    /// Coordinate system of the model's predictions.
    fn factors(&self) -> Factors {
        Factors::default()
    }
}

#[derive(Debug, Clone)]
pub struct ModelOptions {
    pub call: CallConfig,
    pub version: UiTarsVersion,
    pub mode: ParseMode,
    pub factors: Factors,
}

/// [`Model`] backed by an OpenAI-compatible endpoint serving a UI-TARS
/// style model.
pub struct UiTarsModel {
    provider: Arc<dyn LlmProvider>,
    options: ModelOptions,
}

impl UiTarsModel {
    pub fn new(provider: Arc<dyn LlmProvider>, options: ModelOptions) -> Self {
        Self { provider, options }
    }

    pub fn from_config(cfg: &AppConfig) -> AgentResult<Self> {
        let model = &cfg.model;
        let api_key = model
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AgentError::Config(format!("model.api_key is not set (or export {API_KEY_ENV})")))?;
        let provider = OpenAiCompatibleProvider::new(model.provider_id.clone(), model.api_base.clone(), api_key);
        Ok(Self::new(
            Arc::new(provider),
            ModelOptions {
                call: model.call_config(),
                version: model.ui_tars_version,
                mode: cfg.agent.parse_mode,
                factors: cfg.agent.factors,
            },
        ))
    }

    /// Downscales each screenshot to the version's pixel budget and returns
    /// `data:` URIs labelled with the actual image format.
    fn prepare_images(&self, images: &[String]) -> Vec<String> {
        let max_pixels = self.options.version.max_pixels();
        images
            .iter()
            .map(|img| match resize_to_budget(img, max_pixels) {
                Ok(resized) => to_data_uri(&resized),
                Err(e) => {
                    tracing::warn!(error = %e, "screenshot preprocessing failed, sending original");
                    to_data_uri(img)
                }
            })
            .collect()
    }
}

/// Interleaves the conversation with images: the n-th placeholder turn
/// carries the n-th image URI.
pub fn build_messages(system_prompt: &str, input: &ModelInput, images: &[String]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(input.conversations.len() + 1);
    if !system_prompt.is_empty() {
        messages.push(ChatMessage::text("system", system_prompt));
    }

    let mut images = images.iter();
    for turn in &input.conversations {
        let role = match turn.author {
            Author::Human => "user",
            Author::Agent => "assistant",
        };
        if turn.value == IMAGE_PLACEHOLDER {
            match images.next() {
                Some(url) => messages.push(ChatMessage::image(role, url.clone())),
                None => tracing::warn!("image placeholder without payload, skipped"),
            }
        } else {
            messages.push(ChatMessage::text(role, turn.value.clone()));
        }
    }
    messages
}

#[async_trait]
impl Model for UiTarsModel {
    async fn invoke(&self, params: InvokeParams, cancel: &CancellationToken) -> AgentResult<InvokeOutput> {
        let started = Instant::now();
        let images = self.prepare_images(&params.input.images);
        let messages = build_messages(&params.system_prompt, &params.input, &images);

        let provider = &self.provider;
        let call = &self.options.call;
        let messages = &messages;
        let response = with_retry(&params.retry, cancel, "model", move || async move {
            let resp = provider.chat(messages, call, cancel).await?;
            if resp.content.trim().is_empty() {
                tracing::error!(provider = %provider.name(), "model returned an empty prediction");
                return Err(AgentError::EmptyResponse);
            }
            Ok(resp)
        })
        .await?;

        let opts = ParseOptions {
            factors: self.options.factors,
            screen_context: Some(params.screen_context),
            scale_factor: Some(params.scale_factor),
            mode: self.options.mode,
            model_version: self.options.version,
        };
        let parsed_predictions = action_parser::parse_prediction(&response.content, &opts).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "prediction could not be parsed");
            Vec::new()
        });

        Ok(InvokeOutput {
            prediction: response.content,
            parsed_predictions,
            cost_time_ms: started.elapsed().as_millis() as u64,
            cost_tokens: response.total_tokens,
        })
    }

    fn factors(&self) -> Factors {
        self.options.factors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_engine::history::ModelTurn;
    use crate::llm::types::{LlmResponse, MessageContent};
    use crate::perception::screenshot::tests::png_base64;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedProvider {
        replies: Mutex<VecDeque<AgentResult<LlmResponse>>>,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<AgentResult<LlmResponse>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn chat(
            &self,
            messages: &[ChatMessage],
            _cfg: &CallConfig,
            _cancel: &CancellationToken,
        ) -> AgentResult<LlmResponse> {
            self.seen.lock().unwrap().push(messages.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(AgentError::Internal("script exhausted".into())))
        }
    }

    fn reply(text: &str) -> AgentResult<LlmResponse> {
        Ok(LlmResponse {
            content: text.into(),
            reasoning: String::new(),
            total_tokens: Some(12),
        })
    }

    fn options() -> ModelOptions {
        ModelOptions {
            call: CallConfig {
                model: "ui-tars".into(),
                stream: false,
                temperature: 0.0,
                top_p: None,
                max_tokens: None,
            },
            version: UiTarsVersion::V1_5,
            mode: ParseMode::Bc,
            factors: Factors::default(),
        }
    }

    fn params(retry: RetryPolicy) -> InvokeParams {
        InvokeParams {
            input: ModelInput {
                conversations: vec![
                    ModelTurn { author: Author::Human, value: "open settings".into() },
                    ModelTurn { author: Author::Human, value: IMAGE_PLACEHOLDER.into() },
                ],
                images: vec![png_base64(8, 8)],
            },
            system_prompt: "sys".into(),
            screen_context: ScreenContext { width: 1920, height: 1080 },
            scale_factor: 1.0,
            retry,
        }
    }

    #[test]
    fn test_build_messages_interleaves_images() {
        let input = params(RetryPolicy::none()).input;
        let msgs = build_messages("sys", &input, &["data:image/png;base64,AAAA".to_string()]);
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0].role, "system");
        assert_eq!(msgs[1].content, MessageContent::Text("open settings".into()));
        match &msgs[2].content {
            MessageContent::Parts(parts) => {
                let json = serde_json::to_value(&parts[0]).unwrap();
                assert_eq!(json["type"], "image_url");
                assert_eq!(json["image_url"]["url"], "data:image/png;base64,AAAA");
            }
            other => panic!("expected image parts, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invoke_parses_prediction() {
        let provider = ScriptedProvider::new(vec![reply(
            "Thought: click it\nAction: click(start_box='(100,200,300,400)')",
        )]);
        let model = UiTarsModel::new(provider.clone(), options());
        let out = model.invoke(params(RetryPolicy::none()), &CancellationToken::new()).await.unwrap();

        assert_eq!(out.cost_tokens, Some(12));
        assert_eq!(out.parsed_predictions.len(), 1);
        assert_eq!(out.parsed_predictions[0].action_type, "click");
        assert_eq!(out.parsed_predictions[0].thought, "click it");
        assert_eq!(provider.seen.lock().unwrap()[0].len(), 3);
    }

    #[tokio::test]
    async fn test_empty_prediction_is_retried() {
        let provider = ScriptedProvider::new(vec![reply("  "), reply("Action: finished()")]);
        let model = UiTarsModel::new(provider.clone(), options());
        let out = model.invoke(params(RetryPolicy::new(1, 0)), &CancellationToken::new()).await.unwrap();
        assert_eq!(out.parsed_predictions[0].action_type, "finished");
        assert_eq!(provider.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_prediction_after_retries_is_an_error() {
        let provider = ScriptedProvider::new(vec![reply(""), reply("")]);
        let model = UiTarsModel::new(provider, options());
        let out = model.invoke(params(RetryPolicy::new(1, 0)), &CancellationToken::new()).await;
        assert!(matches!(out, Err(AgentError::EmptyResponse)));
    }

    #[tokio::test]
    async fn test_unparseable_o1_prediction_yields_no_actions() {
        let provider = ScriptedProvider::new(vec![reply("just chatting")]);
        let mut opts = options();
        opts.mode = ParseMode::O1;
        let model = UiTarsModel::new(provider, opts);
        let out = model.invoke(params(RetryPolicy::none()), &CancellationToken::new()).await.unwrap();
        assert_eq!(out.prediction, "just chatting");
        assert!(out.parsed_predictions.is_empty());
    }

    #[test]
    fn test_undecodable_image_is_sent_as_is() {
        let model = UiTarsModel::new(ScriptedProvider::new(vec![]), options());
        let out = model.prepare_images(&["data:image/png;base64,not-an-image".to_string()]);
        assert_eq!(out, vec!["data:image/png;base64,not-an-image".to_string()]);
    }

    #[tokio::test]
    async fn test_jpeg_screenshot_is_sent_as_jpeg() {
        let img = image::RgbImage::from_pixel(8, 8, image::Rgb([0, 128, 255]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Jpeg)
            .unwrap();
        let jpeg = {
            use base64::Engine as _;
            base64::engine::general_purpose::STANDARD.encode(&bytes)
        };

        let provider = ScriptedProvider::new(vec![reply("Action: finished()")]);
        let model = UiTarsModel::new(provider.clone(), options());
        let mut p = params(RetryPolicy::none());
        p.input.images = vec![jpeg.clone()];
        model.invoke(p, &CancellationToken::new()).await.unwrap();

        let seen = provider.seen.lock().unwrap();
        match &seen[0][2].content {
            MessageContent::Parts(parts) => {
                let json = serde_json::to_value(&parts[0]).unwrap();
                assert_eq!(json["image_url"]["url"], format!("data:image/jpeg;base64,{jpeg}"));
            }
            other => panic!("expected image parts, got {other:?}"),
        }
    }
}
