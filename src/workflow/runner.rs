//! The orchestrator: drives fills and approvals across vendors.
//!
//! Every backend call is issued with the owning card's generation in
//! hand; by the time the reply settles the card may have been rerun or
//! the whole session reset, in which case the completion is dropped.
//! Approval of a non-final phase and the fill of the next phase are one
//! call: the current card only becomes APPROVED when that call's
//! terminal reply lands.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::backend::Backend;
use crate::card::Card;
use crate::diff::CorrectionRecord;
use crate::errors::{TransportError, WorkflowError};
use crate::paragraph::Paragraph;
use crate::phase::{PhaseCall, PhaseId, PhasePayload};
use crate::session::SessionStore;
use crate::transport::protocol::{RefineReply, Reply};

use super::WorkflowEvent;
use super::state::{FinalLetter, WorkflowSnapshot, WorkflowState};

/// What a settled terminal reply carries.
enum CallOutcome {
    /// Payload that fills a card.
    Fill(PhasePayload),
    /// A vendor's finished letter.
    Final(RefineReply),
}

/// How an approval proceeds once validated.
enum Plan {
    /// Dirty card: clear downstream and regenerate from here.
    Restart,
    Call {
        call: PhaseCall,
        /// The card the reply will land in (and whose generation guards it).
        owner: PhaseId,
        generation: u64,
        /// Phase to mark APPROVED when the call settles terminally.
        approving: Option<PhaseId>,
    },
}

/// Drives the whole generation workflow. Cheap to clone; all clones
/// share state, session, and the event channel.
#[derive(Clone)]
pub struct Orchestrator {
    backend: Arc<dyn Backend>,
    session: Arc<SessionStore>,
    state: Arc<Mutex<WorkflowState>>,
    events: Option<mpsc::Sender<WorkflowEvent>>,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn Backend>,
        session: Arc<SessionStore>,
        sentinel: Option<&str>,
    ) -> Self {
        Self {
            backend,
            session,
            state: Arc::new(Mutex::new(WorkflowState::new(sentinel))),
            events: None,
        }
    }

    /// Attach an event channel for a renderer.
    pub fn with_events(mut self, tx: mpsc::Sender<WorkflowEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub async fn snapshot(&self) -> WorkflowSnapshot {
        self.state.lock().await.snapshot()
    }

    // ==================== Lifecycle ====================

    /// Initialize the session and fan out the background request for
    /// every vendor concurrently. One vendor failing stays local to its
    /// card; only the init call itself is fatal here.
    pub async fn start(&self, vendors: &[String]) -> Result<(), WorkflowError> {
        {
            let mut st = self.state.lock().await;
            st.begin(vendors);
        }
        self.emit(WorkflowEvent::SessionStarted {
            session_id: self.session.session_id(),
            vendors: vendors.to_vec(),
        })
        .await;
        self.backend.init(&self.session.init_request()).await?;
        let mut handles = Vec::with_capacity(vendors.len());
        for vendor in vendors {
            let runner = self.clone();
            let vendor = vendor.clone();
            handles.push(tokio::spawn(async move {
                runner.issue_fill(PhaseId::Background, &vendor).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }

    /// Abandon the current session. Cards, finals, and the assembly are
    /// wiped; a new session id is minted but not initialized until the
    /// next `start`.
    pub async fn reset(&self) -> Uuid {
        self.state.lock().await.reset();
        let session_id = self.session.rotate();
        self.emit(WorkflowEvent::SessionReset { session_id }).await;
        session_id
    }

    // ==================== Approval ====================

    /// Approve one card, folding in `edits` first.
    ///
    /// For the background phase this issues the draft call and fills the
    /// vendor's refine card; for the refine phase it issues the refine
    /// call and lands the final letter. A dirty card instead restarts
    /// from this phase.
    pub async fn approve(
        &self,
        phase: PhaseId,
        vendor: &str,
        edits: &BTreeMap<String, String>,
    ) -> Result<(), WorkflowError> {
        let plan = {
            let mut st = self.state.lock().await;
            if !st.knows_vendor(vendor) {
                return Err(WorkflowError::UnknownVendor(vendor.to_string()));
            }
            if !edits.is_empty() {
                st.with_card(phase, vendor, |c| {
                    for (field, value) in edits {
                        c.record_edit(field, value);
                    }
                })
                .ok_or_else(|| WorkflowError::CardNotFound {
                    vendor: vendor.to_string(),
                    phase,
                })?;
            }
            let prev_ok = st.prev_approved(phase, vendor);
            let card = st
                .card(phase, vendor)
                .ok_or_else(|| WorkflowError::CardNotFound {
                    vendor: vendor.to_string(),
                    phase,
                })?;
            phase
                .validate(card, prev_ok)
                .map_err(|reason| WorkflowError::NotApprovable {
                    vendor: vendor.to_string(),
                    phase,
                    reason,
                })?;
            if card.dirty() {
                Plan::Restart
            } else {
                let call = phase.approval_call(self.session.session_id(), card);
                match phase.next() {
                    Some(next) => {
                        let generation = st.ensure_card(next, vendor).generation();
                        Plan::Call {
                            call,
                            owner: next,
                            generation,
                            approving: Some(phase),
                        }
                    }
                    None => {
                        let generation = st.card(phase, vendor).map_or(0, Card::generation);
                        Plan::Call {
                            call,
                            owner: phase,
                            generation,
                            approving: Some(phase),
                        }
                    }
                }
            }
        };
        match plan {
            Plan::Restart => self.rerun_from(phase, vendor).await,
            Plan::Call {
                call,
                owner,
                generation,
                approving,
            } => {
                let result = self.execute(call).await;
                self.settle(owner, vendor, generation, result, approving)
                    .await;
                Ok(())
            }
        }
    }

    /// Approve every card of `phase` that would pass approval right now
    /// and report which vendors ended up approved. Cards without data,
    /// dirty cards, and cards with unreviewed feedback are untouched.
    pub async fn approve_all(&self, phase: PhaseId) -> Result<Vec<String>, WorkflowError> {
        let vendors = self.state.lock().await.approvable_vendors(phase);
        let empty = BTreeMap::new();
        future::join_all(vendors.iter().map(|v| self.approve(phase, v, &empty))).await;
        let st = self.state.lock().await;
        Ok(vendors
            .into_iter()
            .filter(|v| st.card(phase, v).is_some_and(Card::is_approved))
            .collect())
    }

    // ==================== Reruns ====================

    /// Clear `phase` and everything downstream for one vendor and issue a
    /// fresh fill for this phase. Later completions of the old request
    /// are dropped by the generation guard.
    pub async fn rerun_from(&self, phase: PhaseId, vendor: &str) -> Result<(), WorkflowError> {
        let events = {
            let mut st = self.state.lock().await;
            if !st.knows_vendor(vendor) {
                return Err(WorkflowError::UnknownVendor(vendor.to_string()));
            }
            if st.card(phase, vendor).is_none() {
                return Err(WorkflowError::CardNotFound {
                    vendor: vendor.to_string(),
                    phase,
                });
            }
            let changes = st.clear_from(phase, vendor);
            match phase {
                PhaseId::Background => self.session.clear_vendor_from_draft(vendor),
                PhaseId::Refine => self.session.clear_vendor_final(vendor),
            }
            let mut events = Vec::new();
            for (p, _, new) in changes {
                events.push(WorkflowEvent::CardStatus {
                    vendor: vendor.to_string(),
                    phase: p,
                    status: new,
                    dirty: false,
                });
                events.push(phase_counts(&st, p));
            }
            events
        };
        self.emit_all(events).await;
        self.issue_fill(phase, vendor).await;
        Ok(())
    }

    /// Re-issue a card's fill after a local error, keeping its data and
    /// generation. If the original request eventually settles too, both
    /// completions are accepted in arrival order; heartbeats in between
    /// are no-ops.
    pub async fn retry(&self, phase: PhaseId, vendor: &str) -> Result<(), WorkflowError> {
        {
            let mut st = self.state.lock().await;
            if !st.knows_vendor(vendor) {
                return Err(WorkflowError::UnknownVendor(vendor.to_string()));
            }
            st.with_card(phase, vendor, |c| c.error = None)
                .ok_or_else(|| WorkflowError::CardNotFound {
                    vendor: vendor.to_string(),
                    phase,
                })?;
        }
        self.issue_fill(phase, vendor).await;
        Ok(())
    }

    // ==================== Edits and feedback ====================

    /// Record a field edit on a card. Sufficient primary-field content
    /// can move a PENDING card to READY without any backend data.
    pub async fn record_edit(
        &self,
        phase: PhaseId,
        vendor: &str,
        field: &str,
        value: &str,
    ) -> Result<(), WorkflowError> {
        let events = {
            let mut st = self.state.lock().await;
            st.with_card(phase, vendor, |c| c.record_edit(field, value))
                .ok_or_else(|| WorkflowError::CardNotFound {
                    vendor: vendor.to_string(),
                    phase,
                })?;
            card_events(&st, phase, vendor)
        };
        self.emit_all(events).await;
        Ok(())
    }

    /// Replace a feedback item's text. Returns the next unreviewed key
    /// for the reviewing UI to advance to.
    pub async fn override_feedback(
        &self,
        vendor: &str,
        key: &str,
        text: &str,
    ) -> Result<Option<String>, WorkflowError> {
        let mut st = self.state.lock().await;
        let (next, _, _) = st
            .with_card(PhaseId::Refine, vendor, |c| {
                c.feedback.set_override(key, text);
                c.feedback.next_unreviewed(Some(key))
            })
            .ok_or_else(|| WorkflowError::CardNotFound {
                vendor: vendor.to_string(),
                phase: PhaseId::Refine,
            })?;
        Ok(next)
    }

    /// Approve a feedback item as-is. Returns the next unreviewed key.
    pub async fn approve_feedback(
        &self,
        vendor: &str,
        key: &str,
    ) -> Result<Option<String>, WorkflowError> {
        let mut st = self.state.lock().await;
        let (next, _, _) = st
            .with_card(PhaseId::Refine, vendor, |c| {
                c.feedback.approve_item(key);
                c.feedback.next_unreviewed(Some(key))
            })
            .ok_or_else(|| WorkflowError::CardNotFound {
                vendor: vendor.to_string(),
                phase: PhaseId::Refine,
            })?;
        Ok(next)
    }

    /// The first unreviewed feedback key for a vendor's refine card, if
    /// any. Entry point for a review walk.
    pub async fn next_feedback(&self, vendor: &str) -> Result<Option<String>, WorkflowError> {
        let st = self.state.lock().await;
        let card = st
            .card(PhaseId::Refine, vendor)
            .ok_or_else(|| WorkflowError::CardNotFound {
                vendor: vendor.to_string(),
                phase: PhaseId::Refine,
            })?;
        Ok(card.feedback.next_unreviewed(None))
    }

    /// The current text of one feedback item, reviewer override over the
    /// machine base. `None` for unknown vendors or keys.
    pub async fn feedback_text(&self, vendor: &str, key: &str) -> Option<String> {
        let st = self.state.lock().await;
        st.card(PhaseId::Refine, vendor)
            .and_then(|c| c.feedback.item(key))
            .map(|i| i.override_text.clone().unwrap_or_else(|| i.base.clone()))
    }

    /// Approve every unreviewed feedback item, returning the keys that
    /// changed. Edited and cleared items keep their review outcome.
    pub async fn approve_all_feedback(&self, vendor: &str) -> Result<Vec<String>, WorkflowError> {
        let mut st = self.state.lock().await;
        let (changed, _, _) = st
            .with_card(PhaseId::Refine, vendor, |c| c.feedback.approve_all())
            .ok_or_else(|| WorkflowError::CardNotFound {
                vendor: vendor.to_string(),
                phase: PhaseId::Refine,
            })?;
        Ok(changed)
    }

    // ==================== Assembly ====================

    pub async fn paragraphs(&self) -> Vec<Paragraph> {
        self.state.lock().await.paragraphs().to_vec()
    }

    /// Append a user-authored paragraph; it never produces corrections.
    pub async fn add_paragraph(&self, text: &str) -> Uuid {
        self.state.lock().await.push_paragraph(Paragraph::user(text))
    }

    pub async fn edit_paragraph(&self, id: Uuid, text: &str) -> Result<(), WorkflowError> {
        if self.state.lock().await.set_paragraph_text(id, text) {
            Ok(())
        } else {
            Err(WorkflowError::ParagraphNotFound(id))
        }
    }

    pub async fn remove_paragraph(&self, id: Uuid) -> Result<(), WorkflowError> {
        if self.state.lock().await.remove_paragraph(id) {
            Ok(())
        } else {
            Err(WorkflowError::ParagraphNotFound(id))
        }
    }

    /// Per-vendor correction records for the edited vendor paragraphs.
    pub async fn corrections(&self) -> BTreeMap<String, Vec<CorrectionRecord>> {
        self.state.lock().await.corrections()
    }

    pub async fn final_letter(&self, vendor: &str) -> Option<FinalLetter> {
        self.state.lock().await.final_letter(vendor).cloned()
    }

    // ==================== Internals ====================

    /// Issue the fill call for one card, capturing its generation first.
    async fn issue_fill(&self, phase: PhaseId, vendor: &str) {
        let (generation, call) = {
            let mut st = self.state.lock().await;
            let prev = phase.prev().and_then(|p| st.card(p, vendor)).cloned();
            let card = st.ensure_card(phase, vendor);
            let generation = card.generation();
            (
                generation,
                phase.fill_call(self.session.session_id(), vendor, prev.as_ref()),
            )
        };
        let events = card_events(&*self.state.lock().await, phase, vendor);
        self.emit_all(events).await;
        let result = self.execute(call).await;
        self.settle(phase, vendor, generation, result, None).await;
    }

    /// Run one backend call to completion through the transport.
    async fn execute(&self, call: PhaseCall) -> Result<Reply<CallOutcome>, TransportError> {
        match call {
            PhaseCall::Background(req) => Ok(self
                .backend
                .background(&req)
                .await?
                .map(|r| CallOutcome::Fill(PhasePayload::Background(r)))),
            PhaseCall::Draft(req) => Ok(self
                .backend
                .draft(&req)
                .await?
                .map(|r| CallOutcome::Fill(PhasePayload::Draft(r)))),
            PhaseCall::Refine(req) => {
                Ok(self.backend.refine(&req).await?.map(CallOutcome::Final))
            }
        }
    }

    /// Land a call's result in the owning card.
    ///
    /// Heartbeats are no-ops: the terminal result belongs to whichever
    /// identical request settles first. Terminal payloads are dropped
    /// when the card's generation moved on since issue time.
    async fn settle(
        &self,
        owner: PhaseId,
        vendor: &str,
        generation: u64,
        result: Result<Reply<CallOutcome>, TransportError>,
        approving: Option<PhaseId>,
    ) {
        let events = {
            let mut st = self.state.lock().await;
            match result {
                Ok(Reply::Heartbeat) => {
                    debug!(phase = %owner, vendor, "request accepted, awaiting completion");
                    Vec::new()
                }
                Ok(Reply::Terminal(outcome)) => {
                    let current = st
                        .card(owner, vendor)
                        .is_some_and(|c| c.accepts(generation));
                    if !current {
                        debug!(phase = %owner, vendor, generation, "dropping stale completion");
                        Vec::new()
                    } else {
                        self.land(&mut st, owner, vendor, outcome, approving)
                    }
                }
                Err(err) => {
                    if err.is_retryable() {
                        warn!(phase = %owner, vendor, cause = %err, "generation call failed; card can be retried");
                    } else {
                        error!(phase = %owner, vendor, cause = %err, "generation call failed");
                    }
                    let message = err.to_string();
                    st.with_card(owner, vendor, |c| c.set_error(&message));
                    let mut events = card_events(&st, owner, vendor);
                    events.push(WorkflowEvent::CardFailed {
                        vendor: vendor.to_string(),
                        phase: owner,
                        message,
                    });
                    events
                }
            }
        };
        self.emit_all(events).await;
    }

    /// Apply a current terminal outcome: fill the owner card or store the
    /// final letter, then mark the approving phase APPROVED.
    fn land(
        &self,
        st: &mut WorkflowState,
        owner: PhaseId,
        vendor: &str,
        outcome: CallOutcome,
        approving: Option<PhaseId>,
    ) -> Vec<WorkflowEvent> {
        let mut events = Vec::new();
        match outcome {
            CallOutcome::Fill(payload) => {
                match &payload {
                    PhasePayload::Background(r) => self.session.record_cost(vendor, r.cost),
                    PhasePayload::Draft(r) => {
                        self.session
                            .record_draft(vendor, &r.draft_letter, &r.feedback, r.cost);
                    }
                }
                st.with_card(owner, vendor, |c| owner.apply_result(c, payload));
                events.extend(card_events(st, owner, vendor));
            }
            CallOutcome::Final(reply) => {
                self.session
                    .record_final(vendor, &reply.final_letter, reply.cost);
                let count = st.record_final(vendor, &reply.final_letter, reply.cost);
                events.push(WorkflowEvent::FinalReady {
                    vendor: vendor.to_string(),
                    paragraphs: count,
                });
            }
        }
        if let Some(phase) = approving {
            st.with_card(phase, vendor, Card::approve);
            events.extend(card_events(st, phase, vendor));
            events.push(WorkflowEvent::CardApproved {
                vendor: vendor.to_string(),
                phase,
            });
        }
        events
    }

    async fn emit(&self, event: WorkflowEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }

    async fn emit_all(&self, events: Vec<WorkflowEvent>) {
        for event in events {
            self.emit(event).await;
        }
    }
}

/// Current status + counters events for one card's phase.
fn card_events(st: &WorkflowState, phase: PhaseId, vendor: &str) -> Vec<WorkflowEvent> {
    let mut events = Vec::new();
    if let Some(card) = st.card(phase, vendor) {
        events.push(WorkflowEvent::CardStatus {
            vendor: vendor.to_string(),
            phase,
            status: card.status(),
            dirty: card.dirty(),
        });
    }
    events.push(phase_counts(st, phase));
    events
}

fn phase_counts(st: &WorkflowState, phase: PhaseId) -> WorkflowEvent {
    let ctl = st.controller(phase);
    WorkflowEvent::PhaseCounts {
        phase,
        counters: ctl.counters(),
        visible: ctl.visible(),
    }
}
