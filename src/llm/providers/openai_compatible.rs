use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::errors::{AgentError, AgentResult};
use crate::llm::provider::LlmProvider;
use crate::llm::sse_parser;
use crate::llm::types::{CallConfig, ChatMessage, LlmResponse, StreamChunk};

pub struct OpenAiCompatibleProvider {
    id: String,
    api_base: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(id: String, api_base: String, api_key: String) -> Self {
        Self {
            id,
            api_base,
            api_key,
            client: reqwest::Client::new(),
        }
    }

    fn request_body(messages: &[ChatMessage], cfg: &CallConfig) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": cfg.model,
            "messages": messages,
            "stream": cfg.stream,
            "temperature": cfg.temperature,
        });
        if let Some(top_p) = cfg.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }
        if let Some(max_tokens) = cfg.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if cfg.stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }
        body
    }

    async fn send(&self, messages: &[ChatMessage], cfg: &CallConfig) -> AgentResult<LlmResponse> {
        let body = Self::request_body(messages, cfg);

        tracing::debug!(
            provider = %self.id,
            model = %cfg.model,
            stream = cfg.stream,
            messages = messages.len(),
            "sending LLM request"
        );
        tracing::trace!(body = %sanitized_for_log(&body), "request body (base64 omitted)");

        let response = self
            .client
            .post(&self.api_base)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(AgentError::LlmProvider {
                status: status.as_u16(),
                message: err_body,
            });
        }

        if cfg.stream {
            self.handle_stream(response).await
        } else {
            self.handle_json(response).await
        }
    }

    /// Accumulates an SSE response into a single [`LlmResponse`].
    async fn handle_stream(&self, response: reqwest::Response) -> AgentResult<LlmResponse> {
        let mut byte_stream = response.bytes_stream();
        // Raw bytes: a multi-byte character may straddle two network chunks.
        let mut line_buf: Vec<u8> = Vec::new();
        let mut out = LlmResponse::default();
        let mut done = false;

        'stream: while let Some(result) = byte_stream.next().await {
            let bytes = result?;
            line_buf.extend_from_slice(&bytes);

            while let Some(line) = take_line(&mut line_buf) {
                if apply_sse_line(&mut out, &line?) {
                    done = true;
                    break 'stream;
                }
            }
        }
        if !done && !line_buf.is_empty() {
            let tail = String::from_utf8(std::mem::take(&mut line_buf))
                .map_err(|e| AgentError::SseParsing(format!("invalid UTF-8 in stream: {e}")))?;
            apply_sse_line(&mut out, &tail);
        }

        tracing::info!(
            provider = %self.id,
            content_len = out.content.len(),
            reasoning_len = out.reasoning.len(),
            total_tokens = ?out.total_tokens,
            "LLM stream complete"
        );
        Ok(out)
    }

    async fn handle_json(&self, response: reqwest::Response) -> AgentResult<LlmResponse> {
        let json: serde_json::Value = response.json().await?;
        let out = parse_completion(&json);
        tracing::info!(
            provider = %self.id,
            content_len = out.content.len(),
            total_tokens = ?out.total_tokens,
            "LLM JSON response received"
        );
        Ok(out)
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.id
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        cfg: &CallConfig,
        cancel: &CancellationToken,
    ) -> AgentResult<LlmResponse> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(provider = %self.id, "LLM request aborted");
                Err(AgentError::Cancelled)
            }
            r = self.send(messages, cfg) => r,
        }
    }
}

/// Pops the next complete `\n`-terminated line off `buf`, decoded as UTF-8.
fn take_line(buf: &mut Vec<u8>) -> Option<AgentResult<String>> {
    let pos = buf.iter().position(|b| *b == b'\n')?;
    let raw: Vec<u8> = buf.drain(..=pos).collect();
    Some(
        String::from_utf8(raw)
            .map_err(|e| AgentError::SseParsing(format!("invalid UTF-8 in stream: {e}"))),
    )
}

/// Folds one SSE line into `out`. Returns true once the stream is done.
fn apply_sse_line(out: &mut LlmResponse, line: &str) -> bool {
    let line = line.trim();
    if line.is_empty() {
        return false;
    }
    match sse_parser::parse_sse_line(line) {
        Ok(Some(StreamChunk::Reasoning(text))) => out.reasoning.push_str(&text),
        Ok(Some(StreamChunk::Content(text))) => out.content.push_str(&text),
        Ok(Some(StreamChunk::Usage(total))) => out.total_tokens = Some(total),
        Ok(Some(StreamChunk::Done)) => return true,
        Ok(None) => {}
        Err(e) => tracing::debug!("SSE parse skipped: {e}"),
    }
    false
}

fn parse_completion(json: &serde_json::Value) -> LlmResponse {
    let message = &json["choices"][0]["message"];
    LlmResponse {
        content: message["content"].as_str().unwrap_or("").to_string(),
        reasoning: message["reasoning_content"].as_str().unwrap_or("").to_string(),
        total_tokens: json["usage"]["total_tokens"].as_u64(),
    }
}

/// Copy of the request body with image payloads replaced, for logging.
fn sanitized_for_log(body: &serde_json::Value) -> String {
    let mut log_body = body.clone();
    if let Some(msgs) = log_body.get_mut("messages").and_then(|m| m.as_array_mut()) {
        for msg in msgs {
            // content is either a string or an array of parts; only parts carry images.
            let Some(parts) = msg.get_mut("content").and_then(|c| c.as_array_mut()) else {
                continue;
            };
            for part in parts {
                if part.get("type").and_then(|t| t.as_str()) == Some("image_url") {
                    if let Some(url) = part.get_mut("image_url").and_then(|u| u.get_mut("url")) {
                        *url = serde_json::Value::String("<omitted_base64_image>".to_string());
                    }
                }
            }
        }
    }
    serde_json::to_string(&log_body).unwrap_or_default()
}
