use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, trace, warn};

use deepchat_core::{
    CompletionRequest, Error, Message, Provider, StreamChunk, StreamResult, Usage,
};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Request fields that Ollama expects at the top level rather than in `options`.
const TOP_LEVEL_PARAMS: &[&str] = &["keep_alive", "think", "format"];

pub struct OllamaProvider {
    client: Client,
    base_url: String,
    default_model: Option<String>,
}

impl OllamaProvider {
    pub fn new() -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    fn build_request(&self, request: &CompletionRequest) -> Result<OllamaChatRequest, Error> {
        let model = request
            .model
            .clone()
            .or_else(|| self.default_model.clone())
            .ok_or_else(|| Error::invalid_request("No model configured for Ollama"))?;

        let mut options: HashMap<String, serde_json::Value> = HashMap::new();
        if let Some(t) = request.temperature {
            options.insert("temperature".to_string(), serde_json::json!(t));
        }
        if let Some(n) = request.max_tokens {
            options.insert("num_predict".to_string(), serde_json::json!(n));
        }

        let mut top_level = HashMap::new();
        for (key, value) in &request.extra {
            if TOP_LEVEL_PARAMS.contains(&key.as_str()) {
                top_level.insert(key.clone(), value.clone());
            } else {
                options.insert(key.clone(), value.clone());
            }
        }

        Ok(OllamaChatRequest {
            model,
            messages: request.messages.iter().map(OllamaMessage::from).collect(),
            stream: true,
            options,
            extra: top_level,
        })
    }

    fn parse_error(&self, status: u16, body: &str, model: &str) -> Error {
        #[derive(Deserialize)]
        struct ErrorResponse {
            error: String,
        }

        let message = serde_json::from_str::<ErrorResponse>(body)
            .map(|e| e.error)
            .unwrap_or_else(|_| body.to_string());

        match status {
            404 => Error::ModelNotFound(format!("{} ({})", model, message)),
            400 => Error::invalid_request(message),
            _ => Error::api(status, message),
        }
    }
}

impl Default for OllamaProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn default_model(&self) -> Option<&str> {
        self.default_model.as_deref()
    }

    async fn stream(&self, request: CompletionRequest) -> Result<StreamResult, Error> {
        let api_request = self.build_request(&request)?;
        debug!(model = %api_request.model, messages = api_request.messages.len(), "Ollama chat request");

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&api_request)
            .send()
            .await
            .map_err(|e| {
                Error::unavailable(format!("cannot reach Ollama at {}: {}", self.base_url, e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(self.parse_error(status.as_u16(), &error_text, &api_request.model));
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
                trace!(len = bytes.len(), "Ollama: received bytes");
                buffer.extend_from_slice(&bytes);

                // One JSON object per line
                while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                    let raw: Vec<u8> = buffer.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&raw);
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }

                    if !forward_line(line, &mut started, &tx).await {
                        return;
                    }
                }
            }

            // Last object may arrive without a trailing newline
            let rest = String::from_utf8_lossy(&buffer);
            let rest = rest.trim();
            if !rest.is_empty() && !forward_line(rest, &mut started, &tx).await {
                return;
            }

            warn!("Ollama: connection closed without a final done object");
        });

        let stream = ReceiverStream::new(rx);
        Ok(Box::pin(stream) as StreamResult)
    }

    async fn list_models(&self) -> Result<Vec<String>, Error> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map_err(|e| {
                Error::unavailable(format!("cannot reach Ollama at {}: {}", self.base_url, e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::api(status.as_u16(), error_text));
        }

        let tags: OllamaTags = response
            .json()
            .await
            .map_err(|e| Error::serialization(e.to_string()))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

struct DecodedLine {
    chunks: Vec<StreamChunk>,
    done: bool,
}

/// Decode a line and pass its chunks on. Returns false once the stream is over.
async fn forward_line(
    line: &str,
    started: &mut bool,
    tx: &mpsc::Sender<Result<StreamChunk, Error>>,
) -> bool {
    match decode_line(line, started) {
        Ok(Some(decoded)) => {
            for chunk in decoded.chunks {
                if tx.send(Ok(chunk)).await.is_err() {
                    debug!("Ollama: receiver dropped, stopping stream");
                    return false;
                }
            }
            !decoded.done
        }
        Ok(None) => true,
        Err(e) => {
            let _ = tx.send(Err(e)).await;
            false
        }
    }
}

/// Decode one NDJSON line of a streaming `/api/chat` response.
///
/// Lines that fail to parse are logged and skipped; an `error` object ends the
/// stream with [`Error::StreamInterrupted`].
fn decode_line(line: &str, started: &mut bool) -> Result<Option<DecodedLine>, Error> {
    let parsed: OllamaChatChunk = match serde_json::from_str(line) {
        Ok(parsed) => parsed,
        Err(e) => {
            error!("Failed to parse Ollama stream line: {} - data: {}", e, line);
            return Ok(None);
        }
    };

    if let Some(message) = parsed.error {
        return Err(Error::interrupted(message));
    }

    let mut chunks = Vec::new();
    if !*started {
        *started = true;
        chunks.push(StreamChunk::Start {
            model: parsed.model.clone().unwrap_or_default(),
        });
    }

    if let Some(message) = parsed.message {
        if let Some(thinking) = message.thinking.filter(|t| !t.is_empty()) {
            chunks.push(StreamChunk::ThinkingDelta { content: thinking });
        }
        if let Some(content) = message.content.filter(|c| !c.is_empty()) {
            chunks.push(StreamChunk::Delta { content });
        }
    }

    if parsed.done {
        let usage = match (parsed.prompt_eval_count, parsed.eval_count) {
            (None, None) => None,
            (prompt, completion) => Some(Usage::new(
                prompt.unwrap_or_default(),
                completion.unwrap_or_default(),
            )),
        };
        chunks.push(StreamChunk::Done { usage });
    }

    Ok(Some(DecodedLine {
        chunks,
        done: parsed.done,
    }))
}

// Ollama API types

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    options: HashMap<String, serde_json::Value>,
    /// Top-level extras (keep_alive, think, format)
    #[serde(flatten)]
    extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

impl From<&Message> for OllamaMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role.to_string(),
            content: message.content.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OllamaChatChunk {
    model: Option<String>,
    message: Option<OllamaDelta>,
    #[serde(default)]
    done: bool,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaDelta {
    content: Option<String>,
    thinking: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaTags {
    #[serde(default)]
    models: Vec<OllamaModel>,
}

#[derive(Debug, Deserialize)]
struct OllamaModel {
    name: String,
}
