//! Workflow layer: shared state, event stream, and the orchestrator.
//!
//! The orchestrator drives the two generation phases across all vendors,
//! mutating a single [`WorkflowState`] behind an async mutex and pushing
//! [`WorkflowEvent`]s to whoever is rendering (the CLI run loop, tests).

pub mod runner;
pub mod state;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::card::CardStatus;
use crate::controller::PhaseCounters;
use crate::phase::PhaseId;

pub use runner::Orchestrator;
pub use state::{CardView, FinalLetter, PhaseView, WorkflowSnapshot, WorkflowState};

/// Events emitted while the workflow runs.
///
/// Serialized with a `type` tag so the CLI can also dump them as JSON
/// lines when not rendering interactively.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// A session was initialized with the backend.
    SessionStarted {
        session_id: Uuid,
        vendors: Vec<String>,
    },
    /// A card moved between PENDING, READY, and APPROVED.
    CardStatus {
        vendor: String,
        phase: PhaseId,
        status: CardStatus,
        dirty: bool,
    },
    /// A generation call for a card failed after transport recovery.
    CardFailed {
        vendor: String,
        phase: PhaseId,
        message: String,
    },
    /// Phase counters changed.
    PhaseCounts {
        phase: PhaseId,
        counters: PhaseCounters,
        visible: bool,
    },
    /// A card was approved and its downstream call settled.
    CardApproved { vendor: String, phase: PhaseId },
    /// A vendor's final letter arrived and was split into paragraphs.
    FinalReady { vendor: String, paragraphs: usize },
    /// The session was abandoned and a fresh id minted.
    SessionReset { session_id: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let ev = WorkflowEvent::CardStatus {
            vendor: "acme".to_string(),
            phase: PhaseId::Background,
            status: CardStatus::Ready,
            dirty: false,
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "card_status");
        assert_eq!(v["phase"], "background");
        assert_eq!(v["status"], "ready");
    }

    #[test]
    fn final_ready_round_trips() {
        let ev = WorkflowEvent::FinalReady {
            vendor: "acme".to_string(),
            paragraphs: 4,
        };
        let json = serde_json::to_string(&ev).unwrap();
        let back: WorkflowEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, WorkflowEvent::FinalReady { paragraphs: 4, .. }));
    }
}
