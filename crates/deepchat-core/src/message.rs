use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Thinking prefix of `content` on assistant replies. Display-only: it is
    /// never serialized into a backend request.
    #[serde(skip)]
    pub thinking: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            thinking: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            thinking: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            thinking: None,
        }
    }

    /// Assistant reply whose content is `thinking` followed by `answer`.
    pub fn assistant_with_thinking(thinking: &str, answer: &str) -> Self {
        let mut content = String::with_capacity(thinking.len() + answer.len());
        content.push_str(thinking);
        content.push_str(answer);
        Self {
            role: Role::Assistant,
            content,
            thinking: if thinking.is_empty() {
                None
            } else {
                Some(thinking.to_string())
            },
        }
    }

    /// The part of `content` that follows the thinking prefix.
    pub fn answer(&self) -> &str {
        match &self.thinking {
            Some(thinking) => self
                .content
                .strip_prefix(thinking.as_str())
                .unwrap_or(&self.content),
            None => &self.content,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

#[derive(Debug, Clone)]
pub enum StreamChunk {
    Start {
        model: String,
    },
    Delta {
        content: String,
    },
    /// Reasoning delivered on a separate channel rather than inline markers.
    ThinkingDelta {
        content: String,
    },
    Done {
        usage: Option<Usage>,
    },
    Error {
        message: String,
    },
}
