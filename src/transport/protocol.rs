//! Wire contract for the vendor generation backend.
//!
//! Request and reply bodies for the five backend operations, plus the
//! `Reply` wrapper that keeps a 202 heartbeat distinct from both success
//! and failure. Semantics only; the backend is free to evolve fields it
//! does not share with us, which is why replies use `#[serde(default)]`
//! on everything optional.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::session::VendorSnapshot;

pub const INIT_ENDPOINT: &str = "/api/v1/session/init";
pub const BACKGROUND_ENDPOINT: &str = "/api/v1/generate/background";
pub const DRAFT_ENDPOINT: &str = "/api/v1/generate/draft";
pub const REFINE_ENDPOINT: &str = "/api/v1/generate/refine";
pub const RESTORE_ENDPOINT: &str = "/api/v1/session/restore";

/// Outcome of one backend call that did not fail.
///
/// A `Heartbeat` means the server is still working on an earlier identical
/// request. The caller must not treat it as success or failure, and must
/// not re-issue: the original in-flight request remains sole owner of the
/// eventual result.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply<T> {
    /// The request settled with a payload.
    Terminal(T),
    /// Still running; the original in-flight request owns the result.
    Heartbeat,
}

impl<T> Reply<T> {
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Self::Heartbeat)
    }

    /// Consume the reply, yielding the terminal payload if there is one.
    pub fn terminal(self) -> Option<T> {
        match self {
            Self::Terminal(t) => Some(t),
            Self::Heartbeat => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Reply<U> {
        match self {
            Self::Terminal(t) => Reply::Terminal(f(t)),
            Self::Heartbeat => Reply::Heartbeat,
        }
    }
}

/// Generic acknowledgement for `init` and `restore`.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Ack {
    #[serde(default)]
    pub ok: bool,
}

/// Opens a server-side session correlated by a client-issued identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitRequest {
    pub session_id: Uuid,
    /// The job posting text the letters target.
    pub job_text: String,
    /// Free-form applicant metadata (name, role, notes).
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundRequest {
    pub session_id: Uuid,
    pub vendor: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BackgroundReply {
    pub company_report: String,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub document: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftRequest {
    pub session_id: Uuid,
    pub vendor: String,
    /// Edited company report, when the reviewer changed it before approval.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_report: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DraftReply {
    pub draft_letter: String,
    /// Machine critique, keyed by category.
    #[serde(default)]
    pub feedback: BTreeMap<String, String>,
    #[serde(default)]
    pub cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefineRequest {
    pub session_id: Uuid,
    pub vendor: String,
    /// Edited draft, when the reviewer changed it before approval.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft_letter: Option<String>,
    /// Reviewer-resolved critique, when any item was overridden.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback_override: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RefineReply {
    pub final_letter: String,
    #[serde(default)]
    pub cost: f64,
}

/// Full client-held session state, pushed to the server only when it
/// answers that the session is lost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreRequest {
    pub session_id: Uuid,
    pub job_text: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub vendors: BTreeMap<String, VendorSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_heartbeat_is_neither_success_nor_payload() {
        let reply: Reply<Ack> = Reply::Heartbeat;
        assert!(reply.is_heartbeat());
        assert!(reply.terminal().is_none());
    }

    #[test]
    fn reply_map_preserves_heartbeat() {
        let reply: Reply<u32> = Reply::Heartbeat;
        assert!(reply.map(|n| n + 1).is_heartbeat());

        let reply = Reply::Terminal(41);
        assert_eq!(reply.map(|n| n + 1).terminal(), Some(42));
    }

    #[test]
    fn draft_request_omits_unedited_report() {
        let req = DraftRequest {
            session_id: Uuid::nil(),
            vendor: "acme".into(),
            company_report: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("company_report"));
    }

    #[test]
    fn background_reply_tolerates_missing_optional_fields() {
        let reply: BackgroundReply =
            serde_json::from_str(r#"{"company_report": "Acme builds anvils."}"#).unwrap();
        assert_eq!(reply.company_report, "Acme builds anvils.");
        assert_eq!(reply.cost, 0.0);
        assert!(reply.document.is_none());
    }

    #[test]
    fn draft_reply_parses_feedback_map() {
        let reply: DraftReply = serde_json::from_str(
            r#"{"draft_letter": "Dear team,", "feedback": {"tone": "Too formal"}, "cost": 0.02}"#,
        )
        .unwrap();
        assert_eq!(reply.feedback.get("tone").unwrap(), "Too formal");
    }
}
