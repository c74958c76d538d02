//! deepchat-providers: model backends for deepchat
//!
//! This crate provides implementations of the Provider trait for locally
//! hosted model servers.

pub mod ollama;
pub mod openai;

pub use ollama::OllamaProvider;
pub use openai::OpenAIProvider;
