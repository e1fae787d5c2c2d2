//! Error types for the orchestration core

use thiserror::Error;

/// Outcome code attached to an end-of-conversation signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EndOfConversationCode {
    /// The user ended the conversation
    CompletedSuccessfully,
    /// A turn failed and the conversation was torn down
    Error,
}

/// Advisor error type
#[derive(Debug, Error)]
pub enum AdvisorError {
    /// The inference engine (or a delegated sub-agent) could not complete the request
    #[error("engine unavailable: {0}")]
    EngineUnavailable(String),

    /// Listing the external tool catalog failed
    #[error("tool discovery failed: {0}")]
    ToolDiscovery(String),

    /// A thread or agent definition id does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// A selected capability failed while executing
    #[error("capability '{name}' failed: {message}")]
    CapabilityInvocation { name: String, message: String },

    /// The turn was cancelled by the caller
    #[error("request cancelled")]
    Cancelled,

    /// Invalid or missing configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// History persistence failed
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AdvisorError {
    /// Build a capability failure for the named capability
    pub fn capability(name: impl Into<String>, message: impl std::fmt::Display) -> Self {
        AdvisorError::CapabilityInvocation {
            name: name.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error means the requested id does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, AdvisorError::NotFound(_))
    }
}

impl From<reqwest::Error> for AdvisorError {
    fn from(err: reqwest::Error) -> Self {
        AdvisorError::EngineUnavailable(err.to_string())
    }
}

impl From<rusqlite::Error> for AdvisorError {
    fn from(err: rusqlite::Error) -> Self {
        AdvisorError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_detection() {
        assert!(AdvisorError::NotFound("asst_1".into()).is_not_found());
        assert!(!AdvisorError::Cancelled.is_not_found());
    }

    #[test]
    fn test_capability_error_message() {
        let err = AdvisorError::capability("scenario-agent", "boom");
        assert_eq!(err.to_string(), "capability 'scenario-agent' failed: boom");
    }
}
