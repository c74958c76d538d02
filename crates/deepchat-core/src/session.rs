//! Session controller: owns the conversations, tracks which one is active and
//! runs user turns against the model backend.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::message::{Message, StreamChunk, Usage};
use crate::provider::{CompletionRequest, Provider};
use crate::splitter::{Markers, SplitEvent, SplitOutput, StreamSplitter};
use crate::store::{Conversation, ConversationStore};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

const CONVERSATION_PREFIX: &str = "Chat";

/// Per-session settings applied to every turn.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Seed message of every new conversation.
    pub system_prompt: String,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub extra: HashMap<String, serde_json::Value>,
    pub markers: Markers,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            model: None,
            temperature: None,
            max_tokens: None,
            extra: HashMap::new(),
            markers: Markers::default(),
        }
    }
}

/// Progress of a turn, forwarded to the presentation layer as it happens.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    Started { model: String },
    Split(SplitEvent),
    Finished { usage: Option<Usage> },
}

/// Receiver of live turn output.
pub trait TurnSink: Send {
    fn emit(&mut self, event: TurnEvent) -> Result<(), Error>;
}

impl TurnSink for Vec<TurnEvent> {
    fn emit(&mut self, event: TurnEvent) -> Result<(), Error> {
        self.push(event);
        Ok(())
    }
}

pub struct SessionController {
    provider: Arc<dyn Provider>,
    options: SessionOptions,
    store: ConversationStore,
    active: String,
}

impl SessionController {
    /// Build a controller around a long-lived backend client. The default
    /// conversation exists as soon as this returns.
    pub fn new(provider: Arc<dyn Provider>, options: SessionOptions) -> Self {
        let mut controller = Self {
            provider,
            options,
            store: ConversationStore::new(),
            active: String::new(),
        };
        controller.initialize();
        controller
    }

    /// Create the default conversation if none exists. Idempotent.
    pub fn initialize(&mut self) {
        if !self.store.is_empty() {
            return;
        }

        let name = conversation_name(1);
        let seed = self.seed();
        // The store is empty, so this cannot collide.
        if self.store.create(name.as_str(), seed).is_ok() {
            debug!(conversation = %name, "Session initialized");
            self.active = name;
        }
    }

    pub fn select(&mut self, name: &str) -> Result<(), Error> {
        if !self.store.contains(name) {
            return Err(Error::not_found(name));
        }
        debug!(conversation = %name, "Conversation selected");
        self.active = name.to_string();
        Ok(())
    }

    /// Create a fresh conversation, make it active and return its name.
    pub fn new_conversation(&mut self) -> Result<String, Error> {
        let mut number = self.store.len() + 1;
        while self.store.contains(&conversation_name(number)) {
            number += 1;
        }

        let name = conversation_name(number);
        let seed = self.seed();
        self.store.create(name.as_str(), seed)?;
        self.active = name.clone();
        info!(conversation = %name, "New conversation");
        Ok(name)
    }

    /// Run one user turn on the active conversation.
    ///
    /// The user message is appended before the backend is called and stays
    /// appended if the turn fails. The assistant reply (thinking followed by
    /// answer) is appended only once the stream has completed.
    pub async fn submit_user_message(
        &mut self,
        text: &str,
        sink: &mut dyn TurnSink,
    ) -> Result<SplitOutput, Error> {
        let name = self.active.clone();
        self.store.append(&name, Message::user(text))?;

        let request = self.build_request(&name)?;
        info!(
            conversation = %name,
            messages = request.messages.len(),
            model = ?request.model,
            "Submitting turn"
        );

        let mut stream = self.provider.stream(request).await.map_err(|e| {
            warn!(error = %e, "Backend request failed");
            e
        })?;

        let mut splitter = StreamSplitter::new(self.options.markers.clone());
        let mut usage = None;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                warn!(error = %e, "Stream failed mid-turn");
                match e {
                    Error::StreamInterrupted(_) => e,
                    other => Error::interrupted(other.to_string()),
                }
            })?;

            match chunk {
                StreamChunk::Start { model } => {
                    sink.emit(TurnEvent::Started { model })?;
                }
                StreamChunk::Delta { content } => {
                    for event in splitter.push(&content) {
                        sink.emit(TurnEvent::Split(event))?;
                    }
                }
                StreamChunk::ThinkingDelta { content } => {
                    for event in splitter.push_thinking(&content) {
                        sink.emit(TurnEvent::Split(event))?;
                    }
                }
                StreamChunk::Done { usage: done } => {
                    if let Some(u) = &done {
                        debug!(
                            prompt_tokens = u.prompt_tokens,
                            completion_tokens = u.completion_tokens,
                            "Stream done"
                        );
                    }
                    usage = done;
                    break;
                }
                StreamChunk::Error { message } => {
                    warn!(%message, "Backend reported an error mid-stream");
                    return Err(Error::interrupted(message));
                }
            }
        }
        drop(stream);

        // Text held back as a possible marker is shown before the turn closes.
        if let Some(event) = splitter.flush() {
            sink.emit(TurnEvent::Split(event))?;
        }
        sink.emit(TurnEvent::Finished { usage })?;

        let output = splitter.finish();
        self.store.append(
            &name,
            Message::assistant_with_thinking(&output.thinking, &output.answer),
        )?;
        debug!(
            thinking_len = output.thinking.len(),
            answer_len = output.answer.len(),
            "Turn complete"
        );
        Ok(output)
    }

    pub fn active_name(&self) -> &str {
        &self.active
    }

    pub fn active_conversation(&self) -> Result<&Conversation, Error> {
        self.store.get(&self.active)
    }

    pub fn conversation_names(&self) -> Vec<&str> {
        self.store.list_names()
    }

    /// Model the next turn will use, if known.
    pub fn model(&self) -> Option<&str> {
        self.options
            .model
            .as_deref()
            .or_else(|| self.provider.default_model())
    }

    fn seed(&self) -> Vec<Message> {
        vec![Message::system(self.options.system_prompt.as_str())]
    }

    fn build_request(&self, name: &str) -> Result<CompletionRequest, Error> {
        let messages = self.store.get(name)?.messages().to_vec();
        let mut request = CompletionRequest::new(messages);

        if let Some(model) = &self.options.model {
            request = request.with_model(model);
        }
        if let Some(temperature) = self.options.temperature {
            request = request.with_temperature(temperature);
        }
        if let Some(max_tokens) = self.options.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }
        if !self.options.extra.is_empty() {
            request = request.with_extra(self.options.extra.clone());
        }
        Ok(request)
    }
}

fn conversation_name(number: usize) -> String {
    format!("{} {}", CONVERSATION_PREFIX, number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use crate::testing::MockProvider;

    fn controller() -> (Arc<MockProvider>, SessionController) {
        let provider = Arc::new(MockProvider::new());
        let controller = SessionController::new(provider.clone(), SessionOptions::default());
        (provider, controller)
    }

    #[test]
    fn test_fresh_session_has_default_conversation() {
        let (_, controller) = controller();
        assert_eq!(controller.active_name(), "Chat 1");
        assert_eq!(controller.conversation_names(), vec!["Chat 1"]);

        let conversation = controller.active_conversation().unwrap();
        assert_eq!(conversation.messages(), &[Message::system(DEFAULT_SYSTEM_PROMPT)]);
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let (_, mut controller) = controller();
        controller.initialize();
        controller.initialize();
        assert_eq!(controller.store.len(), 1);
        assert_eq!(controller.active_name(), "Chat 1");
        assert_eq!(controller.active_conversation().unwrap().len(), 1);
    }

    #[test]
    fn test_new_conversations_are_unique_and_selected() {
        let (_, mut controller) = controller();
        for expected in 2..=5 {
            let name = controller.new_conversation().unwrap();
            assert_eq!(name, format!("Chat {}", expected));
            assert_eq!(controller.active_name(), name);
        }
        assert_eq!(
            controller.conversation_names(),
            vec!["Chat 1", "Chat 2", "Chat 3", "Chat 4", "Chat 5"]
        );
        for name in controller.conversation_names() {
            let conversation = controller.store.get(name).unwrap();
            assert_eq!(conversation.messages(), &[Message::system(DEFAULT_SYSTEM_PROMPT)]);
        }
    }

    #[test]
    fn test_select() {
        let (_, mut controller) = controller();
        controller.new_conversation().unwrap();
        controller.select("Chat 1").unwrap();
        assert_eq!(controller.active_name(), "Chat 1");

        let err = controller.select("Chat 9").unwrap_err();
        assert!(matches!(err, Error::ConversationNotFound(ref n) if n == "Chat 9"));
        assert_eq!(controller.active_name(), "Chat 1");
    }

    #[tokio::test]
    async fn test_submit_end_to_end() {
        let (provider, mut controller) = controller();
        provider.queue_fragments(&["<think>", "reasoning", "</think>", "Hi there"]);

        let mut events: Vec<TurnEvent> = Vec::new();
        let output = controller
            .submit_user_message("Hello", &mut events)
            .await
            .unwrap();

        assert_eq!(output.thinking, "reasoning");
        assert_eq!(output.answer, "Hi there");

        let messages = controller.active_conversation().unwrap().messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0], Message::system(DEFAULT_SYSTEM_PROMPT));
        assert_eq!((messages[1].role, messages[1].content.as_str()), (Role::User, "Hello"));
        assert_eq!(
            (messages[2].role, messages[2].content.as_str()),
            (Role::Assistant, "reasoningHi there")
        );
        assert_eq!(messages[2].answer(), "Hi there");

        assert_eq!(
            events,
            vec![
                TurnEvent::Started {
                    model: "mock-model".to_string()
                },
                TurnEvent::Split(SplitEvent::Thinking("reasoning".to_string())),
                TurnEvent::Split(SplitEvent::ThinkingComplete("reasoning".to_string())),
                TurnEvent::Split(SplitEvent::Answer("Hi there".to_string())),
                TurnEvent::Finished {
                    usage: Some(Usage::new(10, 4))
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_request_carries_full_history() {
        let provider = Arc::new(MockProvider::new());
        let options = SessionOptions {
            model: Some("deepseek-r1".to_string()),
            temperature: Some(0.6),
            ..SessionOptions::default()
        };
        let mut controller = SessionController::new(provider.clone(), options);

        provider.queue_fragments(&["<think>a</think>", "first"]);
        provider.queue_fragments(&["<think>b</think>", "second"]);

        let mut sink: Vec<TurnEvent> = Vec::new();
        controller.submit_user_message("one", &mut sink).await.unwrap();
        controller.submit_user_message("two", &mut sink).await.unwrap();

        assert_eq!(provider.request_count(), 2);
        let request = provider.last_request().unwrap();
        assert_eq!(request.model.as_deref(), Some("deepseek-r1"));
        assert_eq!(request.temperature, Some(0.6));
        let contents: Vec<&str> = request.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            vec![DEFAULT_SYSTEM_PROMPT, "one", "afirst", "two"]
        );
    }

    #[tokio::test]
    async fn test_turns_go_to_active_conversation() {
        let (provider, mut controller) = controller();
        controller.new_conversation().unwrap();
        provider.queue_fragments(&["</think>", "in chat 2"]);

        let mut sink: Vec<TurnEvent> = Vec::new();
        controller.submit_user_message("hi", &mut sink).await.unwrap();

        assert_eq!(controller.store.get("Chat 1").unwrap().len(), 1);
        assert_eq!(controller.store.get("Chat 2").unwrap().len(), 3);
        assert_eq!(
            controller.store.get("Chat 2").unwrap().last().unwrap().content,
            "in chat 2"
        );
    }

    #[tokio::test]
    async fn test_backend_unavailable_keeps_user_message() {
        let (provider, mut controller) = controller();
        provider.queue_failure(Error::unavailable("connection refused"));

        let mut sink: Vec<TurnEvent> = Vec::new();
        let err = controller
            .submit_user_message("Hello", &mut sink)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BackendUnavailable(_)));
        assert!(sink.is_empty());

        let messages = controller.active_conversation().unwrap().messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1], Message::user("Hello"));
    }

    #[tokio::test]
    async fn test_interrupted_stream_discards_partial_reply() {
        let (provider, mut controller) = controller();
        provider.queue_broken_stream(&["<think>", "half a thou"], "connection reset");

        let mut sink: Vec<TurnEvent> = Vec::new();
        let err = controller
            .submit_user_message("Hello", &mut sink)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StreamInterrupted(ref m) if m.contains("connection reset")));

        let conversation = controller.active_conversation().unwrap();
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation.last().unwrap().role, Role::User);

        // The session stays usable after a failed turn.
        provider.queue_fragments(&["<think>ok</think>", "done"]);
        controller.submit_user_message("again", &mut sink).await.unwrap();
        assert_eq!(controller.active_conversation().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_server_error_event_discards_partial_reply() {
        let (provider, mut controller) = controller();
        provider.queue_chunks(vec![
            Ok(StreamChunk::Start {
                model: "mock-model".to_string(),
            }),
            Ok(StreamChunk::Delta {
                content: "<think>partial".to_string(),
            }),
            Err(Error::interrupted("CUDA out of memory")),
            Ok(StreamChunk::Done { usage: None }),
        ]);

        let mut sink: Vec<TurnEvent> = Vec::new();
        let err = controller.submit_user_message("hi", &mut sink).await.unwrap_err();
        assert!(matches!(err, Error::StreamInterrupted(ref m) if m == "CUDA out of memory"));
        assert!(!sink.iter().any(|e| matches!(e, TurnEvent::Finished { .. })));

        let messages = controller.active_conversation().unwrap().messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1], Message::user("hi"));
    }

    #[tokio::test]
    async fn test_error_chunk_fails_turn() {
        let (provider, mut controller) = controller();
        provider.queue_chunks(vec![
            Ok(StreamChunk::Delta {
                content: "<think>x".to_string(),
            }),
            Ok(StreamChunk::Error {
                message: "model crashed".to_string(),
            }),
        ]);

        let mut sink: Vec<TurnEvent> = Vec::new();
        let err = controller.submit_user_message("hi", &mut sink).await.unwrap_err();
        assert!(matches!(err, Error::StreamInterrupted(_)));
        assert_eq!(controller.active_conversation().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_stream_without_closing_marker() {
        let (provider, mut controller) = controller();
        provider.queue_fragments(&["<think>", "still thinking"]);

        let mut sink: Vec<TurnEvent> = Vec::new();
        let output = controller.submit_user_message("hi", &mut sink).await.unwrap();
        assert_eq!(output.thinking, "still thinking");
        assert_eq!(output.answer, "");
        assert_eq!(
            controller.active_conversation().unwrap().last().unwrap().content,
            "still thinking"
        );
    }

    #[tokio::test]
    async fn test_held_back_tail_shown_before_finish() {
        let (provider, mut controller) = controller();
        provider.queue_fragments(&["<think>", "is a <"]);

        let mut sink: Vec<TurnEvent> = Vec::new();
        let output = controller.submit_user_message("hi", &mut sink).await.unwrap();
        assert_eq!(output.thinking, "is a <");

        let last_thinking = sink.iter().rev().find_map(|e| match e {
            TurnEvent::Split(SplitEvent::Thinking(t)) => Some(t.as_str()),
            _ => None,
        });
        assert_eq!(last_thinking, Some("is a <"));
        assert!(matches!(sink.last(), Some(TurnEvent::Finished { .. })));
    }

    #[tokio::test]
    async fn test_stream_without_done_still_completes() {
        let (provider, mut controller) = controller();
        provider.queue_chunks(vec![Ok(StreamChunk::Delta {
            content: "<think>t</think>a".to_string(),
        })]);

        let mut sink: Vec<TurnEvent> = Vec::new();
        controller.submit_user_message("hi", &mut sink).await.unwrap();
        assert_eq!(sink.last(), Some(&TurnEvent::Finished { usage: None }));
        assert_eq!(controller.active_conversation().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_separate_reasoning_channel() {
        let (provider, mut controller) = controller();
        provider.queue_chunks(vec![
            Ok(StreamChunk::ThinkingDelta {
                content: "ponder".to_string(),
            }),
            Ok(StreamChunk::Delta {
                content: "answer".to_string(),
            }),
            Ok(StreamChunk::Done { usage: None }),
        ]);

        let mut sink: Vec<TurnEvent> = Vec::new();
        let output = controller.submit_user_message("hi", &mut sink).await.unwrap();
        assert_eq!(output.thinking, "ponder");
        assert_eq!(output.answer, "answer");
        let last = controller.active_conversation().unwrap().last().unwrap().clone();
        assert_eq!(last.content, "ponderanswer");
        assert_eq!(last.thinking.as_deref(), Some("ponder"));
    }

    #[test]
    fn test_model_falls_back_to_provider_default() {
        let (_, controller) = controller();
        assert_eq!(controller.model(), Some("mock-model"));
    }
}
