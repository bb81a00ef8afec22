//! The ordered phase pipeline.
//!
//! `PhaseId` is a closed enum: every phase-specific behavior (approval
//! preconditions, the outbound call a phase builds, how a terminal
//! payload lands in a card) is dispatched by pattern match here rather
//! than scattered across duck-typed phase objects.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::card::{Card, CardData, CardStatus};
use crate::transport::protocol::{
    BackgroundReply, BackgroundRequest, DraftReply, DraftRequest, RefineRequest,
};

/// One stage of the generation pipeline, in fixed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseId {
    /// Company background research.
    Background,
    /// Draft letter with machine critique, refined into the final letter.
    Refine,
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Background => "background",
            Self::Refine => "refine",
        })
    }
}

/// An outbound backend call built by a phase.
#[derive(Debug, Clone)]
pub enum PhaseCall {
    Background(BackgroundRequest),
    Draft(DraftRequest),
    Refine(RefineRequest),
}

/// A terminal payload that fills a phase's card.
#[derive(Debug, Clone)]
pub enum PhasePayload {
    Background(BackgroundReply),
    Draft(DraftReply),
}

impl PhaseId {
    /// Pipeline order.
    pub const ALL: [PhaseId; 2] = [PhaseId::Background, PhaseId::Refine];

    pub fn prev(&self) -> Option<PhaseId> {
        match self {
            Self::Background => None,
            Self::Refine => Some(Self::Background),
        }
    }

    pub fn next(&self) -> Option<PhaseId> {
        match self {
            Self::Background => Some(Self::Refine),
            Self::Refine => None,
        }
    }

    pub fn is_last(&self) -> bool {
        self.next().is_none()
    }

    /// Every phase at or after this one, in order. Used when a rerun
    /// clears a vendor's downstream cards.
    pub fn and_downstream(&self) -> Vec<PhaseId> {
        Self::ALL.iter().copied().filter(|p| p >= self).collect()
    }

    /// The edit key carrying this phase's body text.
    pub fn primary_field(&self) -> &'static str {
        match self {
            Self::Background => "company_report",
            Self::Refine => "draft_letter",
        }
    }

    /// Human-facing title.
    pub fn title(&self) -> &'static str {
        match self {
            Self::Background => "Background research",
            Self::Refine => "Draft & refine",
        }
    }

    /// Check the approval preconditions for a card of this phase.
    ///
    /// `prev_approved` is whether the same vendor's previous-phase card is
    /// approved (vacuously true for the first phase).
    pub fn validate(&self, card: &Card, prev_approved: bool) -> Result<(), String> {
        match card.status() {
            CardStatus::Pending => return Err("no data yet".to_string()),
            CardStatus::Approved if !card.dirty() => {
                return Err("already approved".to_string());
            }
            _ => {}
        }
        if !prev_approved {
            return Err(format!("{} phase not yet approved", self.prev().map(|p| p.to_string()).unwrap_or_default()));
        }
        if *self == Self::Refine && !card.feedback.all_resolved() {
            return Err(format!(
                "{} feedback item(s) unreviewed",
                card.feedback.unresolved_count()
            ));
        }
        Ok(())
    }

    /// The call that (re)fills this phase's card for one vendor.
    ///
    /// The refine card is filled by the draft endpoint, so its request is
    /// built from the vendor's background card.
    pub fn fill_call(&self, session_id: Uuid, vendor: &str, prev: Option<&Card>) -> PhaseCall {
        match self {
            Self::Background => PhaseCall::Background(BackgroundRequest {
                session_id,
                vendor: vendor.to_string(),
            }),
            Self::Refine => PhaseCall::Draft(DraftRequest {
                session_id,
                vendor: vendor.to_string(),
                company_report: prev.and_then(|c| c.upstream_text()),
            }),
        }
    }

    /// The call this phase's approval issues: background approval asks
    /// for a draft, refine approval asks for the final letter.
    pub fn approval_call(&self, session_id: Uuid, card: &Card) -> PhaseCall {
        match self {
            Self::Background => PhaseCall::Draft(DraftRequest {
                session_id,
                vendor: card.vendor.clone(),
                company_report: card.upstream_text(),
            }),
            Self::Refine => PhaseCall::Refine(RefineRequest {
                session_id,
                vendor: card.vendor.clone(),
                draft_letter: card.upstream_text(),
                feedback_override: card
                    .feedback
                    .has_overrides()
                    .then(|| card.feedback.resolved()),
            }),
        }
    }

    /// Land a terminal fill payload in this phase's card.
    pub fn apply_result(&self, card: &mut Card, payload: PhasePayload) {
        match (self, payload) {
            (Self::Background, PhasePayload::Background(reply)) => card.set_data(CardData::Report {
                company_report: reply.company_report,
                cost: reply.cost,
                document: reply.document,
            }),
            (Self::Refine, PhasePayload::Draft(reply)) => card.set_data(CardData::Draft {
                draft_letter: reply.draft_letter,
                feedback: reply.feedback,
                cost: reply.cost,
            }),
            (phase, _) => {
                tracing::warn!(%phase, vendor = %card.vendor, "dropping payload of the wrong shape");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn ready_background_card() -> Card {
        let mut card = Card::new("acme", PhaseId::Background);
        card.set_data(CardData::Report {
            company_report: "Acme builds anvils.".to_string(),
            cost: 0.01,
            document: None,
        });
        card
    }

    fn ready_refine_card() -> Card {
        let mut card = Card::new("acme", PhaseId::Refine);
        card.set_data(CardData::Draft {
            draft_letter: "Dear team,".to_string(),
            feedback: BTreeMap::from([("tone".to_string(), "Too formal".to_string())]),
            cost: 0.02,
        });
        card
    }

    #[test]
    fn phase_ordering_and_links() {
        assert_eq!(PhaseId::Background.next(), Some(PhaseId::Refine));
        assert_eq!(PhaseId::Refine.prev(), Some(PhaseId::Background));
        assert!(PhaseId::Background.prev().is_none());
        assert!(PhaseId::Refine.is_last());
        assert_eq!(
            PhaseId::Background.and_downstream(),
            vec![PhaseId::Background, PhaseId::Refine]
        );
        assert_eq!(PhaseId::Refine.and_downstream(), vec![PhaseId::Refine]);
    }

    #[test]
    fn validate_rejects_pending_card() {
        let card = Card::new("acme", PhaseId::Background);
        let err = PhaseId::Background.validate(&card, true).unwrap_err();
        assert!(err.contains("no data"));
    }

    #[test]
    fn validate_rejects_unapproved_predecessor() {
        let card = ready_refine_card();
        let err = PhaseId::Refine.validate(&card, false).unwrap_err();
        assert!(err.contains("background"));
    }

    #[test]
    fn validate_rejects_unreviewed_feedback() {
        let card = ready_refine_card();
        let err = PhaseId::Refine.validate(&card, true).unwrap_err();
        assert!(err.contains("unreviewed"));
    }

    #[test]
    fn validate_accepts_ready_card_with_resolved_feedback() {
        let mut card = ready_refine_card();
        card.feedback.approve_all();
        assert!(PhaseId::Refine.validate(&card, true).is_ok());
    }

    #[test]
    fn validate_rejects_clean_approved_but_accepts_dirty() {
        let mut card = ready_background_card();
        card.approve();
        assert_eq!(
            PhaseId::Background.validate(&card, true).unwrap_err(),
            "already approved"
        );

        card.record_edit("company_report", "newer research");
        assert!(card.dirty());
        assert!(PhaseId::Background.validate(&card, true).is_ok());
    }

    #[test]
    fn background_approval_builds_draft_call_with_edits() {
        let mut card = ready_background_card();
        card.record_edit("company_report", "Acme builds rockets now.");
        let call = PhaseId::Background.approval_call(Uuid::nil(), &card);
        match call {
            PhaseCall::Draft(req) => {
                assert_eq!(req.vendor, "acme");
                assert_eq!(req.company_report.as_deref(), Some("Acme builds rockets now."));
            }
            _ => panic!("Expected a draft call"),
        }
    }

    #[test]
    fn refine_approval_sends_feedback_override_only_when_touched() {
        let mut card = ready_refine_card();
        card.feedback.approve_all();
        match PhaseId::Refine.approval_call(Uuid::nil(), &card) {
            PhaseCall::Refine(req) => assert!(req.feedback_override.is_none()),
            _ => panic!("Expected a refine call"),
        }

        card.feedback.set_override("tone", "Fine, tighten the close");
        match PhaseId::Refine.approval_call(Uuid::nil(), &card) {
            PhaseCall::Refine(req) => {
                let fb = req.feedback_override.unwrap();
                assert_eq!(fb.get("tone").unwrap(), "Fine, tighten the close");
            }
            _ => panic!("Expected a refine call"),
        }
    }

    #[test]
    fn refine_fill_call_carries_edited_report_from_predecessor() {
        let mut prev = ready_background_card();
        prev.record_edit("company_report", "edited report");
        prev.approve();

        let call = PhaseId::Refine.fill_call(Uuid::nil(), "acme", Some(&prev));
        match call {
            PhaseCall::Draft(req) => {
                assert_eq!(req.company_report.as_deref(), Some("edited report"))
            }
            _ => panic!("Expected a draft call"),
        }
    }

    #[test]
    fn apply_result_fills_matching_phase_and_drops_mismatch() {
        let mut card = Card::new("acme", PhaseId::Background);
        PhaseId::Background.apply_result(
            &mut card,
            PhasePayload::Background(BackgroundReply {
                company_report: "r".to_string(),
                cost: 0.0,
                document: None,
            }),
        );
        assert_eq!(card.status(), CardStatus::Ready);

        // A draft payload cannot land in a background card.
        let before = card.data().cloned();
        PhaseId::Background.apply_result(
            &mut card,
            PhasePayload::Draft(DraftReply {
                draft_letter: "d".to_string(),
                feedback: BTreeMap::new(),
                cost: 0.0,
            }),
        );
        assert_eq!(card.data().cloned(), before);
    }
}
