use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Conversation already exists: {0}")]
    DuplicateConversation(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Asset missing: {0}")]
    AssetMissing(String),

    #[error("API error: {message} (status: {status})")]
    Api { status: u16, message: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Output error: {0}")]
    Sink(String),
}

impl Error {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::ConversationNotFound(name.into())
    }

    pub fn duplicate(name: impl Into<String>) -> Self {
        Self::DuplicateConversation(name.into())
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::BackendUnavailable(message.into())
    }

    pub fn interrupted(message: impl Into<String>) -> Self {
        Self::StreamInterrupted(message.into())
    }

    pub fn asset_missing(message: impl Into<String>) -> Self {
        Self::AssetMissing(message.into())
    }

    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn sink(message: impl Into<String>) -> Self {
        Self::Sink(message.into())
    }

    /// True for failures of the model backend during a turn, as opposed to
    /// bookkeeping errors in the conversation store.
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            Error::BackendUnavailable(_)
                | Error::StreamInterrupted(_)
                | Error::Api { .. }
                | Error::Network(_)
                | Error::ModelNotFound(_)
                | Error::InvalidRequest(_)
                | Error::Serialization(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
