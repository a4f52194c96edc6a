use crate::models::{ChatConfig, Message, Source};
use async_trait::async_trait;

/// Result of one completion request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Completion {
    pub text: String,
    pub sources: Vec<Source>,
    pub thinking: Option<String>,
    pub thinking_duration_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("OpenAI API Key is missing. Please set OPENAI_API_KEY in your environment or enter it in the settings.")]
    MissingCredential,
    #[error("{0}")]
    Upstream(String),
}

// Trait defining the interface to the hosted model API.
// Request formatting and response parsing live behind it.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(
        &self,
        history: &[Message],
        config: &ChatConfig,
        credential: &str,
        system_instruction: Option<&str>,
    ) -> Result<Completion, CompletionError>;

    // Best effort; callers keep their local title on failure.
    async fn summarize_to_title(
        &self,
        text: &str,
        credential: &str,
    ) -> Result<String, CompletionError>;
}

/// Used when no model backend is wired in (e.g. the maintenance CLI).
/// Every request fails, which the dispatch flow records as an error message.
#[derive(Debug, Default)]
pub struct OfflineCompletionService;

#[async_trait]
impl CompletionService for OfflineCompletionService {
    async fn complete(
        &self,
        _history: &[Message],
        _config: &ChatConfig,
        credential: &str,
        _system_instruction: Option<&str>,
    ) -> Result<Completion, CompletionError> {
        if credential.is_empty() {
            return Err(CompletionError::MissingCredential);
        }
        Err(CompletionError::Upstream(
            "No completion backend is configured".to_string(),
        ))
    }

    async fn summarize_to_title(
        &self,
        _text: &str,
        _credential: &str,
    ) -> Result<String, CompletionError> {
        Err(CompletionError::Upstream(
            "No completion backend is configured".to_string(),
        ))
    }
}
