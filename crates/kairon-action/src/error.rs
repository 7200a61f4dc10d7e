//! Error types for the action engine.

use kairon_core::error::KaironError;

/// Errors raised while executing an action.
///
/// `UnknownActionType`, `ConfigMissing` and `Rejected` are caller errors and
/// surface as 400. Everything else is absorbed by the executor into the
/// canned failure reply.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("Unknown action type: {0}")]
    UnknownActionType(String),
    #[error("No action found for given bot and name: {0}")]
    ConfigMissing(String),
    #[error("Request rejected: {0}")]
    Rejected(String),
    #[error("Invalid action config: {0}")]
    InvalidConfig(String),
    #[error("Parameter resolution failed: {0}")]
    ParameterResolution(String),
    #[error("Secret not found in key vault: {0}")]
    SecretMissing(String),
    #[error("Upstream timeout: {0}")]
    UpstreamTimeout(String),
    #[error("Upstream failure: {0}")]
    UpstreamFailure(String),
    #[error("Script syntax error: {0}")]
    ScriptSyntax(String),
    #[error("Script evaluation timeout after {0} ms")]
    ScriptTimeout(u64),
    #[error("Script crashed: {0}")]
    ScriptCrashed(String),
    #[error("Templating failure: {0}")]
    Templating(String),
    #[error("cancelled")]
    Cancelled,
    #[error("Storage error: {0}")]
    Storage(#[from] KaironError),
}

impl ActionError {
    /// Whether the error is reported to the caller as a 400.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ActionError::UnknownActionType(_)
                | ActionError::ConfigMissing(_)
                | ActionError::Rejected(_)
        )
    }
}

impl From<reqwest::Error> for ActionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ActionError::UpstreamTimeout(err.to_string())
        } else {
            ActionError::UpstreamFailure(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_error_display() {
        let err = ActionError::UnknownActionType("fax_action".to_string());
        assert_eq!(err.to_string(), "Unknown action type: fax_action");

        let err = ActionError::ScriptTimeout(1000);
        assert_eq!(err.to_string(), "Script evaluation timeout after 1000 ms");

        let err = ActionError::Cancelled;
        assert_eq!(err.to_string(), "cancelled");
    }

    #[test]
    fn test_client_errors() {
        assert!(ActionError::UnknownActionType("x".into()).is_client_error());
        assert!(ActionError::ConfigMissing("x".into()).is_client_error());
        assert!(ActionError::Rejected("x".into()).is_client_error());
        assert!(!ActionError::SecretMissing("x".into()).is_client_error());
        assert!(!ActionError::ScriptTimeout(10).is_client_error());
        assert!(!ActionError::Cancelled.is_client_error());
    }

    #[test]
    fn test_timeout_messages_mention_timeout() {
        assert!(ActionError::ScriptTimeout(5)
            .to_string()
            .to_lowercase()
            .contains("timeout"));
        assert!(ActionError::UpstreamTimeout("smtp".into())
            .to_string()
            .to_lowercase()
            .contains("timeout"));
    }

    #[test]
    fn test_action_error_from_kairon_error() {
        let err: ActionError = KaironError::Storage("disk full".to_string()).into();
        assert!(matches!(err, ActionError::Storage(_)));
        assert!(err.to_string().contains("disk full"));
    }
}
