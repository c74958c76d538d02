//! Test utilities shared across the workspace.
//! Only compiled when running tests or with the `testing` feature.

use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream;

use crate::error::Error;
use crate::message::{StreamChunk, Usage};
use crate::provider::{CompletionRequest, Provider, StreamResult};

enum Scripted {
    Stream(Vec<Result<StreamChunk, Error>>),
    Fail(Error),
}

/// A mock provider that replays pre-configured streams.
pub struct MockProvider {
    scripts: Mutex<Vec<Scripted>>,
    /// Captured requests (for assertion).
    pub captured_requests: Mutex<Vec<CompletionRequest>>,
    pub name: String,
    pub default_model: Option<String>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(Vec::new()),
            captured_requests: Mutex::new(Vec::new()),
            name: "mock".to_string(),
            default_model: Some("mock-model".to_string()),
        }
    }

    /// Queue a stream that yields `fragments` as content deltas, then Done.
    /// Streams are returned in FIFO order (first queued = first returned).
    pub fn queue_fragments(&self, fragments: &[&str]) {
        let mut chunks = vec![Ok(StreamChunk::Start {
            model: "mock-model".to_string(),
        })];
        chunks.extend(fragments.iter().map(|f| {
            Ok(StreamChunk::Delta {
                content: f.to_string(),
            })
        }));
        chunks.push(Ok(StreamChunk::Done {
            usage: Some(Usage::new(10, fragments.len() as u32)),
        }));
        self.queue_chunks(chunks);
    }

    /// Queue a raw chunk sequence.
    pub fn queue_chunks(&self, chunks: Vec<Result<StreamChunk, Error>>) {
        self.scripts.lock().unwrap().insert(0, Scripted::Stream(chunks));
    }

    /// Queue a stream that yields `fragments` and then breaks with a transport error.
    pub fn queue_broken_stream(&self, fragments: &[&str], message: &str) {
        let mut chunks: Vec<Result<StreamChunk, Error>> = fragments
            .iter()
            .map(|f| {
                Ok(StreamChunk::Delta {
                    content: f.to_string(),
                })
            })
            .collect();
        chunks.push(Err(Error::network(message)));
        self.queue_chunks(chunks);
    }

    /// Make the next stream() call fail before any output.
    pub fn queue_failure(&self, error: Error) {
        self.scripts.lock().unwrap().insert(0, Scripted::Fail(error));
    }

    /// Get the number of captured requests.
    pub fn request_count(&self) -> usize {
        self.captured_requests.lock().unwrap().len()
    }

    /// Get the last captured request.
    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.captured_requests.lock().unwrap().last().cloned()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> Option<&str> {
        self.default_model.as_deref()
    }

    async fn stream(&self, request: CompletionRequest) -> Result<StreamResult, Error> {
        self.captured_requests.lock().unwrap().push(request);
        match self.scripts.lock().unwrap().pop() {
            Some(Scripted::Stream(chunks)) => Ok(Box::pin(stream::iter(chunks)) as StreamResult),
            Some(Scripted::Fail(error)) => Err(error),
            None => Err(Error::unavailable("No mock stream queued")),
        }
    }
}
