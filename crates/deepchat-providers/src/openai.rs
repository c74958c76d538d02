use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, trace};

use deepchat_core::{
    CompletionRequest, Error, Message, Provider, StreamChunk, StreamResult, Usage,
};

/// llama.cpp's `llama-server` default; LM Studio and vLLM expose the same API.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/v1";

/// Provider for OpenAI-compatible `/chat/completions` servers.
pub struct OpenAIProvider {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    default_model: Option<String>,
}

impl OpenAIProvider {
    pub fn new() -> Self {
        // HTTP/1.1 avoids HTTP/2 framing issues with SSE on some local servers
        let client = Client::builder()
            .http1_only()
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    fn build_request(&self, request: &CompletionRequest) -> OpenAIChatRequest {
        // Model priority: request > provider default
        // If neither is set, don't send model field (let the server use its loaded model)
        let model = request
            .model
            .clone()
            .or_else(|| self.default_model.clone());

        OpenAIChatRequest {
            model,
            messages: request.messages.iter().map(OpenAIMessage::from).collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
            extra: request.extra.clone(),
        }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {}", key)),
            None => builder,
        }
    }

    fn parse_error(&self, status: u16, body: &str) -> Error {
        #[derive(Deserialize)]
        struct ErrorResponse {
            error: ErrorDetail,
        }

        #[derive(Deserialize)]
        struct ErrorDetail {
            message: String,
        }

        if let Ok(err) = serde_json::from_str::<ErrorResponse>(body) {
            match status {
                404 => Error::ModelNotFound(err.error.message),
                400 => Error::invalid_request(err.error.message),
                _ => Error::api(status, err.error.message),
            }
        } else {
            Error::api(status, body.to_string())
        }
    }
}

impl Default for OpenAIProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn default_model(&self) -> Option<&str> {
        self.default_model.as_deref()
    }

    async fn stream(&self, request: CompletionRequest) -> Result<StreamResult, Error> {
        let api_request = self.build_request(&request);
        debug!("OpenAI stream request: {:?}", api_request);

        // Disable compression and request SSE content type to prevent buffering
        let response = self
            .authorize(self.client.post(format!("{}/chat/completions", self.base_url)))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .header("Accept-Encoding", "identity")
            .header("Cache-Control", "no-cache")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| {
                Error::unavailable(format!("cannot reach {}: {}", self.base_url, e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(self.parse_error(status.as_u16(), &error_text));
        }

        let (tx, rx) = mpsc::channel::<Result<StreamChunk, Error>>(100);

        tokio::spawn(async move {
            let mut response = response;
            let mut buffer: Vec<u8> = Vec::new();
            let mut started = false;

            loop {
                let bytes = match response.chunk().await {
                    Ok(Some(bytes)) => bytes,
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(Err(Error::interrupted(e.to_string()))).await;
                        return;
                    }
                };
                trace!(len = bytes.len(), "SSE: received bytes");
                // Some servers terminate lines with CRLF
                buffer.extend(bytes.iter().filter(|&&b| b != b'\r'));

                // Process complete SSE events (separated by a blank line)
                while let Some(event_end) = find_event_end(&buffer) {
                    let raw: Vec<u8> = buffer.drain(..event_end + 2).collect();
                    let event_data = String::from_utf8_lossy(&raw);

                    for line in event_data.lines() {
                        let Some(data) = line.strip_prefix("data:") else {
                            continue;
                        };
                        let data = data.trim();

                        if data == "[DONE]" {
                            let _ = tx.send(Ok(StreamChunk::Done { usage: None })).await;
                            return;
                        }

                        let chunks = match decode_event(data, &mut started) {
                            Ok(chunks) => chunks,
                            Err(e) => {
                                error!(error = %e, "Server reported an error mid-stream");
                                let _ = tx.send(Err(e)).await;
                                return;
                            }
                        };
                        for chunk in chunks {
                            let finished = matches!(chunk, StreamChunk::Done { .. });
                            if tx.send(Ok(chunk)).await.is_err() {
                                debug!("SSE: receiver dropped, stopping stream");
                                return;
                            }
                            if finished {
                                return;
                            }
                        }
                    }
                }
            }

            // Servers that close the connection without [DONE]
            let _ = tx.send(Ok(StreamChunk::Done { usage: None })).await;
        });

        let stream = ReceiverStream::new(rx);
        Ok(Box::pin(stream) as StreamResult)
    }

    async fn list_models(&self) -> Result<Vec<String>, Error> {
        let response = self
            .authorize(self.client.get(format!("{}/models", self.base_url)))
            .send()
            .await
            .map_err(|e| {
                Error::unavailable(format!("cannot reach {}: {}", self.base_url, e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(self.parse_error(status.as_u16(), &error_text));
        }

        let models: OpenAIModelList = response
            .json()
            .await
            .map_err(|e| Error::serialization(e.to_string()))?;
        Ok(models.data.into_iter().map(|m| m.id).collect())
    }
}

fn find_event_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

/// Decode the JSON payload of one SSE `data:` line.
///
/// Unparseable payloads are logged and skipped; an `error` object ends the
/// stream with [`Error::StreamInterrupted`].
fn decode_event(data: &str, started: &mut bool) -> Result<Vec<StreamChunk>, Error> {
    let response = match serde_json::from_str::<OpenAIStreamResponse>(data) {
        Ok(response) => response,
        Err(e) => {
            error!("Failed to parse SSE message: {} - data: {}", e, data);
            return Ok(Vec::new());
        }
    };

    if let Some(err) = response.error {
        return Err(Error::interrupted(stream_error_message(&err)));
    }

    let mut chunks = Vec::new();
    if !*started {
        *started = true;
        chunks.push(StreamChunk::Start {
            model: response.model.clone().unwrap_or_default(),
        });
    }

    let usage = response
        .usage
        .as_ref()
        .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens));

    for choice in response.choices {
        // Reasoning models served with a reasoning parser (e.g. vLLM, llama.cpp --reasoning-format)
        if let Some(reasoning) = choice.delta.reasoning_content.filter(|r| !r.is_empty()) {
            chunks.push(StreamChunk::ThinkingDelta { content: reasoning });
        }
        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
            chunks.push(StreamChunk::Delta { content });
        }
    }

    // With include_usage the usage arrives in a final chunk with no choices
    if usage.is_some() {
        chunks.push(StreamChunk::Done { usage });
    }
    Ok(chunks)
}

/// vLLM and llama-server send `{"error": {"message": ...}}`; some proxies send a bare string.
fn stream_error_message(err: &serde_json::Value) -> String {
    err.get("message")
        .and_then(|m| m.as_str())
        .or_else(|| err.as_str())
        .map(String::from)
        .unwrap_or_else(|| err.to_string())
}

// OpenAI API types

#[derive(Debug, Serialize)]
struct OpenAIChatRequest {
    /// Model to use. Optional for servers that have a default model.
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
    stream_options: StreamOptions,
    /// Extra parameters (reasoning_effort, chat_template_kwargs, etc.)
    #[serde(flatten)]
    extra: std::collections::HashMap<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

impl From<&Message> for OpenAIMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role.to_string(),
            content: message.content.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamResponse {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<OpenAIStreamChoice>,
    usage: Option<OpenAIUsage>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChoice {
    delta: OpenAIStreamDelta,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamDelta {
    content: Option<String>,
    /// Reasoning/thinking content split out by the server
    reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIModelList {
    #[serde(default)]
    data: Vec<OpenAIModel>,
}

#[derive(Debug, Deserialize)]
struct OpenAIModel {
    id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_creation() {
        let provider = OpenAIProvider::new();
        assert_eq!(provider.name(), "openai");
        assert_eq!(provider.default_model(), None);
        assert!(provider.api_key.is_none());
    }

    #[test]
    fn test_build_request() {
        let provider = OpenAIProvider::new().with_default_model("deepseek-r1-distill");
        let request = CompletionRequest::new(vec![Message::user("Hello")]);
        let api_request = provider.build_request(&request);

        assert_eq!(api_request.model, Some("deepseek-r1-distill".to_string()));
        assert_eq!(api_request.messages.len(), 1);
        assert_eq!(api_request.messages[0].role, "user");
        assert!(api_request.stream);
    }

    #[test]
    fn test_build_request_no_model() {
        let provider = OpenAIProvider::new();
        let request = CompletionRequest::new(vec![Message::user("Hello")]);
        let api_request = provider.build_request(&request);

        // No model configured - field should be None (skipped in serialization)
        assert_eq!(api_request.model, None);
        let json = serde_json::to_value(&api_request).unwrap();
        assert!(json.get("model").is_none());
    }

    #[test]
    fn test_decode_event() {
        let mut started = false;
        let chunks = decode_event(
            r#"{"model":"local","choices":[{"delta":{"content":"<think>"}}]}"#,
            &mut started,
        )
        .unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(matches!(chunks[0], StreamChunk::Start { ref model } if model == "local"));
        assert!(matches!(chunks[1], StreamChunk::Delta { ref content } if content == "<think>"));

        let chunks = decode_event(
            r#"{"choices":[{"delta":{"reasoning_content":"hmm"}}]}"#,
            &mut started,
        )
        .unwrap();
        assert!(matches!(chunks[0], StreamChunk::ThinkingDelta { ref content } if content == "hmm"));

        let chunks = decode_event(
            r#"{"choices":[],"usage":{"prompt_tokens":5,"completion_tokens":7}}"#,
            &mut started,
        )
        .unwrap();
        assert!(matches!(chunks[0], StreamChunk::Done { usage: Some(ref u) } if u.total_tokens == 12));

        assert!(decode_event("{broken", &mut started).unwrap().is_empty());
    }

    #[test]
    fn test_decode_error_event() {
        let mut started = true;
        let err = decode_event(
            r#"{"error":{"message":"CUDA out of memory","type":"server_error","code":500}}"#,
            &mut started,
        )
        .unwrap_err();
        assert!(matches!(err, Error::StreamInterrupted(ref m) if m == "CUDA out of memory"));

        let err = decode_event(r#"{"error":"model crashed"}"#, &mut started).unwrap_err();
        assert!(matches!(err, Error::StreamInterrupted(ref m) if m == "model crashed"));
    }

    #[test]
    fn test_find_event_end() {
        assert_eq!(find_event_end(b"data: {}\n\ndata: x"), Some(8));
        assert_eq!(find_event_end(b"data: {}\n"), None);
    }

    #[test]
    fn test_parse_error() {
        let provider = OpenAIProvider::new();
        let err = provider.parse_error(404, r#"{"error":{"message":"model not loaded"}}"#);
        assert!(matches!(err, Error::ModelNotFound(_)));
        let err = provider.parse_error(502, "bad gateway");
        assert!(matches!(err, Error::Api { status: 502, .. }));
    }
}
