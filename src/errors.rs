//! Typed error hierarchy for the draftsmith workflow engine.
//!
//! Two top-level enums cover the two subsystems:
//! - `TransportError`: backend transport failures after bounded recovery
//! - `WorkflowError`: orchestrator and card-level failures
//!
//! A 202 heartbeat is never an error: it is filtered into
//! `Reply::Heartbeat` before classification reaches this taxonomy.

use thiserror::Error;

use crate::phase::PhaseId;

/// Errors from the backend transport, after the transport's own bounded
/// recovery (one session resync, one token refresh) has been exhausted.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No response at all: connect failure, timeout, DNS.
    #[error("Network error: {0}")]
    Network(String),

    /// The validation token was rejected even after a refresh.
    #[error("Validation token rejected after refresh")]
    Validation,

    /// Not authenticated. Fatal to the session; never retried here.
    #[error("Not authenticated")]
    Auth,

    /// The server lost the session and the single permitted
    /// resync-and-retry did not recover it.
    #[error("Server session lost and could not be restored")]
    SessionLost,

    /// A structured backend failure. `detail` comes from the parsed error
    /// field of the response body when present, else the raw body text.
    #[error("Backend error ({status}): {detail}")]
    Backend { status: u16, detail: String },

    /// The backend answered 2xx but the payload did not match the contract.
    #[error("Malformed backend payload: {0}")]
    Payload(String),
}

impl TransportError {
    /// Whether an explicit user-initiated retry of the same request makes
    /// sense. Auth failures are fatal to the session.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Auth)
    }
}

/// Errors from the workflow orchestrator and its cards.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Unknown vendor: {0}")]
    UnknownVendor(String),

    #[error("No {phase} card exists for vendor {vendor}")]
    CardNotFound { vendor: String, phase: PhaseId },

    #[error("Cannot approve {phase} card for {vendor}: {reason}")]
    NotApprovable {
        vendor: String,
        phase: PhaseId,
        reason: String,
    },

    #[error("No paragraph with id {0}")]
    ParagraphNotFound(uuid::Uuid),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_backend_carries_status_and_detail() {
        let err = TransportError::Backend {
            status: 500,
            detail: "model overloaded".to_string(),
        };
        match &err {
            TransportError::Backend { status, detail } => {
                assert_eq!(*status, 500);
                assert_eq!(detail, "model overloaded");
            }
            _ => panic!("Expected Backend variant"),
        }
        assert!(err.to_string().contains("500"));
        assert!(err.to_string().contains("model overloaded"));
    }

    #[test]
    fn auth_is_not_retryable_everything_else_is() {
        assert!(!TransportError::Auth.is_retryable());
        assert!(TransportError::Validation.is_retryable());
        assert!(TransportError::SessionLost.is_retryable());
        assert!(TransportError::Network("timed out".into()).is_retryable());
        assert!(
            TransportError::Backend {
                status: 503,
                detail: "busy".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn workflow_error_converts_from_transport_error() {
        let err: WorkflowError = TransportError::SessionLost.into();
        assert!(matches!(
            err,
            WorkflowError::Transport(TransportError::SessionLost)
        ));
    }

    #[test]
    fn workflow_error_not_approvable_names_card_and_reason() {
        let err = WorkflowError::NotApprovable {
            vendor: "acme".to_string(),
            phase: PhaseId::Refine,
            reason: "2 feedback items unreviewed".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("acme"));
        assert!(msg.contains("refine"));
        assert!(msg.contains("unreviewed"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&TransportError::Auth);
        assert_std_error(&WorkflowError::UnknownVendor("x".into()));
    }
}
