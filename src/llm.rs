//! Boundary to the language-model client.
//!
//! The engine treats completions as an opaque async call: slow, fallible,
//! never allowed to block other threads' progress. Production wires a real
//! provider behind this trait; tests use a scripted stand-in.

use async_trait::async_trait;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Token accounting reported by the provider.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// One model completion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub token_usage: TokenUsage,
}

#[derive(Debug, Error, Diagnostic)]
pub enum LanguageModelError {
    #[error("provider error ({provider}): {message}")]
    #[diagnostic(code(flowloom::llm::provider))]
    Provider { provider: String, message: String },
}

/// Opaque async completion function the engine hands to nodes.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        temperature: f32,
    ) -> Result<Completion, LanguageModelError>;
}

/// Stand-in that echoes the prompt back. Useful for wiring a system together
/// before a real provider is configured.
#[derive(Debug, Default, Clone)]
pub struct EchoLanguageModel;

#[async_trait]
impl LanguageModel for EchoLanguageModel {
    async fn complete(
        &self,
        _model: &str,
        prompt: &str,
        _temperature: f32,
    ) -> Result<Completion, LanguageModelError> {
        Ok(Completion {
            text: prompt.to_string(),
            token_usage: TokenUsage {
                prompt_tokens: prompt.split_whitespace().count() as u32,
                completion_tokens: prompt.split_whitespace().count() as u32,
            },
        })
    }
}
