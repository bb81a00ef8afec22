//! Per-(vendor, phase) card state machine.
//!
//! A card tracks one vendor's progress through one phase: the generated
//! payload, reviewer edits, approval, local error, and the request
//! generation counter that guards against stale completions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::feedback::FeedbackTracker;
use crate::phase::PhaseId;

/// Card lifecycle status.
///
/// There is no terminal state: `Approved` is always reopenable through
/// edits (dirty) or a rerun.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CardStatus {
    /// No usable data and no sufficient manual input.
    #[default]
    Pending,
    /// Data present (from the backend or sufficient edits), unapproved.
    Ready,
    /// Explicitly approved.
    Approved,
}

/// Phase-typed generation payload held by a card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CardData {
    /// Background phase: company research report.
    Report {
        company_report: String,
        cost: f64,
        document: Option<String>,
    },
    /// Refine phase: draft letter plus machine critique.
    Draft {
        draft_letter: String,
        feedback: BTreeMap<String, String>,
        cost: f64,
    },
}

impl CardData {
    /// The editable body text of this payload.
    pub fn primary_text(&self) -> &str {
        match self {
            Self::Report { company_report, .. } => company_report,
            Self::Draft { draft_letter, .. } => draft_letter,
        }
    }

    fn set_primary_text(&mut self, text: &str) {
        match self {
            Self::Report { company_report, .. } => *company_report = text.to_string(),
            Self::Draft { draft_letter, .. } => *draft_letter = text.to_string(),
        }
    }

    pub fn cost(&self) -> f64 {
        match self {
            Self::Report { cost, .. } | Self::Draft { cost, .. } => *cost,
        }
    }
}

/// One vendor's state for one phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    pub vendor: String,
    pub phase: PhaseId,
    data: Option<CardData>,
    approved: bool,
    edits: BTreeMap<String, String>,
    /// Local failure message; never propagated globally.
    pub error: Option<String>,
    generation: u64,
    pub feedback: FeedbackTracker,
    /// True once approved content diverged from what the backend
    /// delivered; the server's copy is stale and upstream calls must
    /// carry our text.
    #[serde(default)]
    overridden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sentinel: Option<String>,
}

impl Card {
    pub fn new(vendor: &str, phase: PhaseId) -> Self {
        Self {
            vendor: vendor.to_string(),
            phase,
            data: None,
            approved: false,
            edits: BTreeMap::new(),
            error: None,
            generation: 0,
            feedback: FeedbackTracker::default(),
            overridden: false,
            sentinel: None,
        }
    }

    /// Use a custom no-issue sentinel for feedback classification.
    pub fn with_sentinel(mut self, sentinel: &str) -> Self {
        self.sentinel = Some(sentinel.to_string());
        self
    }

    /// Current status, derived from content rather than stored flags.
    ///
    /// A card with no data and no sufficient manual input is PENDING even
    /// if a stale approved flag survived a reset.
    pub fn status(&self) -> CardStatus {
        if self.data.is_none() && !self.has_sufficient_edits() {
            CardStatus::Pending
        } else if self.approved {
            CardStatus::Approved
        } else {
            CardStatus::Ready
        }
    }

    pub fn data(&self) -> Option<&CardData> {
        self.data.as_ref()
    }

    pub fn is_approved(&self) -> bool {
        self.status() == CardStatus::Approved
    }

    // ---- request generations ----

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether a completion tagged with `generation` is still current.
    pub fn accepts(&self, generation: u64) -> bool {
        self.generation == generation
    }

    /// Orphan any in-flight request for this card. Responses tagged with
    /// an older generation must be discarded by the caller.
    pub fn bump_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    // ---- data arrival ----

    /// Store a terminal payload. First arrival moves PENDING to READY.
    /// Refine payloads rebuild the feedback tracker from the critique map.
    pub fn set_data(&mut self, data: CardData) {
        if let CardData::Draft { feedback, .. } = &data {
            let tracker = FeedbackTracker::from_base(feedback);
            self.feedback = match &self.sentinel {
                Some(s) => tracker.with_sentinel(s),
                None => tracker,
            };
        }
        self.data = Some(data);
        self.overridden = false;
        self.error = None;
    }

    /// Record a local failure. The card stays PENDING (or keeps older
    /// data) and the message is surfaced for a manual retry.
    pub fn set_error(&mut self, message: &str) {
        self.error = Some(message.to_string());
    }

    // ---- edits ----

    /// Record a reviewer edit to one field.
    pub fn record_edit(&mut self, field: &str, value: &str) {
        self.edits.insert(field.to_string(), value.to_string());
    }

    pub fn edits(&self) -> &BTreeMap<String, String> {
        &self.edits
    }

    /// Whether manual input alone is enough to count as usable data.
    pub fn has_sufficient_edits(&self) -> bool {
        self.edits
            .get(self.phase.primary_field())
            .is_some_and(|t| !t.trim().is_empty())
    }

    /// The body text as the reviewer sees it: edit override, else stored
    /// data, else `None`.
    pub fn effective_text(&self) -> Option<String> {
        if let Some(edit) = self.edits.get(self.phase.primary_field())
            && !edit.trim().is_empty()
        {
            return Some(edit.clone());
        }
        self.data.as_ref().map(|d| d.primary_text().to_string())
    }

    /// The body edit to send upstream, only when it differs from stored
    /// data (an unchanged card sends nothing and lets the server use its
    /// own copy).
    pub fn edited_text(&self) -> Option<String> {
        let edit = self.edits.get(self.phase.primary_field())?;
        if edit.trim().is_empty() {
            return None;
        }
        match &self.data {
            Some(data) if data.primary_text().trim() == edit.trim() => None,
            _ => Some(edit.clone()),
        }
    }

    /// Approved card whose pending edits diverge from the last-approved
    /// data. Approval of a dirty card becomes "save and restart from here".
    pub fn dirty(&self) -> bool {
        if !self.approved {
            return false;
        }
        let Some(data) = &self.data else {
            return false;
        };
        self.edits
            .get(self.phase.primary_field())
            .is_some_and(|edit| edit.trim() != data.primary_text().trim())
    }

    // ---- approval ----

    /// Mark approved, folding pending edits into the stored data so the
    /// approved content is the content the reviewer saw. Preconditions
    /// (READY, previous phase approved, feedback resolved) are checked by
    /// the phase dispatch before this is called.
    pub fn approve(&mut self) {
        if let Some(edit) = self.edits.remove(self.phase.primary_field())
            && !edit.trim().is_empty()
            && let Some(data) = &mut self.data
        {
            if data.primary_text().trim() != edit.trim() {
                self.overridden = true;
            }
            data.set_primary_text(&edit);
        }
        self.edits.clear();
        self.approved = true;
        self.error = None;
    }

    /// Body text to send upstream: present only when the reviewer's
    /// content diverges from the copy the backend holds.
    pub fn upstream_text(&self) -> Option<String> {
        if let Some(edit) = self.edited_text() {
            return Some(edit);
        }
        if self.overridden {
            return self.data.as_ref().map(|d| d.primary_text().to_string());
        }
        None
    }

    /// Full reset: used on session reset and on rerun-from-phase, which
    /// clears this card and all downstream cards for the vendor. Orphans
    /// any in-flight request via the generation counter.
    pub fn reset(&mut self) {
        self.data = None;
        self.approved = false;
        self.edits.clear();
        self.error = None;
        self.feedback = FeedbackTracker::default();
        self.overridden = false;
        self.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(text: &str) -> CardData {
        CardData::Report {
            company_report: text.to_string(),
            cost: 0.01,
            document: None,
        }
    }

    fn draft(text: &str, feedback: &[(&str, &str)]) -> CardData {
        CardData::Draft {
            draft_letter: text.to_string(),
            feedback: feedback
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            cost: 0.02,
        }
    }

    #[test]
    fn new_card_is_pending() {
        let card = Card::new("acme", PhaseId::Background);
        assert_eq!(card.status(), CardStatus::Pending);
        assert!(card.effective_text().is_none());
    }

    #[test]
    fn data_arrival_moves_pending_to_ready() {
        let mut card = Card::new("acme", PhaseId::Background);
        card.set_data(report("Acme builds anvils."));
        assert_eq!(card.status(), CardStatus::Ready);
        assert_eq!(card.effective_text().as_deref(), Some("Acme builds anvils."));
    }

    #[test]
    fn sufficient_manual_input_also_moves_to_ready() {
        let mut card = Card::new("acme", PhaseId::Background);
        card.record_edit("company_report", "Hand-written research.");
        assert_eq!(card.status(), CardStatus::Ready);

        // Blank input is not sufficient.
        let mut blank = Card::new("acme", PhaseId::Background);
        blank.record_edit("company_report", "   ");
        assert_eq!(blank.status(), CardStatus::Pending);
    }

    #[test]
    fn approval_requires_passing_through_ready() {
        let mut card = Card::new("acme", PhaseId::Background);
        card.set_data(report("r"));
        assert_eq!(card.status(), CardStatus::Ready);
        card.approve();
        assert_eq!(card.status(), CardStatus::Approved);
    }

    #[test]
    fn stale_approved_flag_without_data_reads_pending() {
        let mut card = Card::new("acme", PhaseId::Background);
        card.set_data(report("r"));
        card.approve();
        card.reset();
        // Reset cleared data; even if approval had leaked through, the
        // derived status guards against acting on orphaned state.
        assert_eq!(card.status(), CardStatus::Pending);
        assert!(!card.dirty());
    }

    #[test]
    fn approve_folds_edits_into_data() {
        let mut card = Card::new("acme", PhaseId::Background);
        card.set_data(report("original"));
        card.record_edit("company_report", "edited");
        card.approve();
        assert_eq!(card.data().unwrap().primary_text(), "edited");
        assert!(card.edits().is_empty());
        assert!(!card.dirty());
    }

    #[test]
    fn post_approval_edit_sets_dirty_without_reverting_status() {
        let mut card = Card::new("acme", PhaseId::Background);
        card.set_data(report("approved text"));
        card.approve();
        assert!(!card.dirty());

        card.record_edit("company_report", "newer text");
        assert!(card.dirty());
        assert_eq!(card.status(), CardStatus::Approved);
    }

    #[test]
    fn edit_equal_to_data_is_not_dirty_and_not_sent() {
        let mut card = Card::new("acme", PhaseId::Background);
        card.set_data(report("same text"));
        card.approve();
        card.record_edit("company_report", "same text");
        assert!(!card.dirty());
        assert!(card.edited_text().is_none());
    }

    #[test]
    fn edited_text_only_when_diverging_from_data() {
        let mut card = Card::new("acme", PhaseId::Refine);
        card.set_data(draft("Dear team,", &[]));
        assert!(card.edited_text().is_none());
        card.record_edit("draft_letter", "Dear hiring team,");
        assert_eq!(card.edited_text().as_deref(), Some("Dear hiring team,"));
    }

    #[test]
    fn draft_data_rebuilds_feedback_tracker() {
        let mut card = Card::new("acme", PhaseId::Refine);
        card.set_data(draft("Dear team,", &[("tone", "Too formal")]));
        assert_eq!(card.feedback.len(), 1);
        assert!(!card.feedback.all_resolved());
    }

    #[test]
    fn card_sentinel_reaches_feedback_tracker() {
        let mut card = Card::new("acme", PhaseId::Refine).with_sentinel("looks fine");
        card.set_data(draft("d", &[("tone", "Too formal")]));
        card.feedback.set_override("tone", "Looks Fine");
        assert!(card.feedback.all_resolved());
    }

    #[test]
    fn set_data_clears_error_and_stale_completions_are_detectable() {
        let mut card = Card::new("acme", PhaseId::Background);
        card.set_error("vendor unreachable");
        assert!(card.error.is_some());

        let generation = card.generation();
        assert!(card.accepts(generation));
        card.bump_generation();
        assert!(!card.accepts(generation));

        card.set_data(report("r"));
        assert!(card.error.is_none());
    }

    #[test]
    fn upstream_text_tracks_divergence_across_approval() {
        let mut card = Card::new("acme", PhaseId::Background);
        card.set_data(report("server copy"));
        assert!(card.upstream_text().is_none());

        card.record_edit("company_report", "reviewer copy");
        assert_eq!(card.upstream_text().as_deref(), Some("reviewer copy"));

        // Folding the edit at approval keeps the divergence visible even
        // though the edit map is now empty.
        card.approve();
        assert!(card.edits().is_empty());
        assert_eq!(card.upstream_text().as_deref(), Some("reviewer copy"));
    }

    #[test]
    fn reset_orphans_in_flight_requests() {
        let mut card = Card::new("acme", PhaseId::Background);
        let generation = card.generation();
        card.set_data(report("r"));
        card.reset();
        assert!(!card.accepts(generation));
        assert_eq!(card.status(), CardStatus::Pending);
    }
}
