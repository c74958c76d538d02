//! In-memory conversation store.
//!
//! Conversations are kept in creation order so that list positions stay
//! stable across renders.

use std::collections::HashMap;

use crate::error::Error;
use crate::message::Message;

/// A named, append-only list of messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    name: String,
    messages: Vec<Message>,
}

impl Conversation {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: Vec<Conversation>,
    index: HashMap<String, usize>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new conversation. Existing names are never overwritten.
    pub fn create(&mut self, name: impl Into<String>, seed: Vec<Message>) -> Result<(), Error> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(Error::duplicate(name));
        }

        self.index.insert(name.clone(), self.conversations.len());
        self.conversations.push(Conversation {
            name,
            messages: seed,
        });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Conversation, Error> {
        self.index
            .get(name)
            .map(|&i| &self.conversations[i])
            .ok_or_else(|| Error::not_found(name))
    }

    pub fn append(&mut self, name: &str, message: Message) -> Result<(), Error> {
        let i = *self.index.get(name).ok_or_else(|| Error::not_found(name))?;
        self.conversations[i].messages.push(message);
        Ok(())
    }

    pub fn list_names(&self) -> Vec<&str> {
        self.conversations.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}
