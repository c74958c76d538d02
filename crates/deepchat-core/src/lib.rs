//! deepchat-core: conversation model and streaming turn logic for deepchat
//!
//! This crate holds everything that does not touch the network or the
//! terminal: messages, the in-memory conversation store, the thinking/answer
//! stream splitter and the session controller that ties them to a
//! [`Provider`].

pub mod error;
pub mod message;
pub mod provider;
pub mod session;
pub mod splitter;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::Error;
pub use message::{Message, Role, StreamChunk, Usage};
pub use provider::{CompletionRequest, Provider, StreamResult};
pub use session::{SessionController, SessionOptions, TurnEvent, TurnSink, DEFAULT_SYSTEM_PROMPT};
pub use splitter::{Markers, Phase, SplitEvent, SplitOutput, StreamSplitter};
pub use store::{Conversation, ConversationStore};

pub type Result<T> = std::result::Result<T, Error>;
