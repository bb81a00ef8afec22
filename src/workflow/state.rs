//! Single mutable home of workflow state.
//!
//! Everything the orchestrator touches concurrently lives here: the
//! per-phase card tables, the counter controllers fed by status deltas,
//! finished letters, and the paragraph assembly. Mutations that can flip
//! a card's status go through [`WorkflowState::with_card`] so the
//! matching controller delta is never skipped.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::card::{Card, CardStatus};
use crate::controller::{PhaseController, PhaseCounters};
use crate::diff::{self, CorrectionRecord};
use crate::paragraph::{self, Paragraph};
use crate::phase::PhaseId;

/// A vendor's finished letter, kept alongside the paragraph assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalLetter {
    pub final_letter: String,
    pub cost: f64,
}

/// Read-only view of one card for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct CardView {
    pub vendor: String,
    pub status: CardStatus,
    pub dirty: bool,
    pub error: Option<String>,
    pub text: Option<String>,
    pub unresolved_feedback: usize,
    pub cost: f64,
}

/// Read-only view of one phase.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseView {
    pub phase: PhaseId,
    pub visible: bool,
    pub counters: PhaseCounters,
    pub cards: Vec<CardView>,
}

/// Immutable snapshot of the whole workflow, safe to hand to renderers.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowSnapshot {
    pub phases: Vec<PhaseView>,
    pub finals: BTreeMap<String, FinalLetter>,
    pub paragraphs: Vec<Paragraph>,
}

/// All mutable workflow state. The orchestrator holds this behind one
/// async mutex; nothing here blocks.
#[derive(Debug)]
pub struct WorkflowState {
    vendors: Vec<String>,
    cards: BTreeMap<PhaseId, BTreeMap<String, Card>>,
    controllers: BTreeMap<PhaseId, PhaseController>,
    finals: BTreeMap<String, FinalLetter>,
    assembly: Vec<Paragraph>,
    sentinel: Option<String>,
}

impl WorkflowState {
    pub fn new(sentinel: Option<&str>) -> Self {
        let mut controllers = BTreeMap::new();
        for phase in PhaseId::ALL {
            controllers.insert(phase, PhaseController::new());
        }
        let mut state = Self {
            vendors: Vec::new(),
            cards: BTreeMap::new(),
            controllers,
            finals: BTreeMap::new(),
            assembly: Vec::new(),
            sentinel: sentinel.map(str::to_string),
        };
        state.refresh_visibility();
        state
    }

    /// Start a run: wipe previous state and seed a PENDING background
    /// card per vendor.
    pub fn begin(&mut self, vendors: &[String]) {
        self.reset();
        self.vendors = vendors.to_vec();
        for vendor in vendors {
            self.ensure_card(PhaseId::Background, vendor);
        }
    }

    pub fn vendors(&self) -> &[String] {
        &self.vendors
    }

    pub fn knows_vendor(&self, vendor: &str) -> bool {
        self.vendors.iter().any(|v| v == vendor)
    }

    pub fn card(&self, phase: PhaseId, vendor: &str) -> Option<&Card> {
        self.cards.get(&phase).and_then(|m| m.get(vendor))
    }

    /// Get or create a card, registering it with the phase counters.
    pub fn ensure_card(&mut self, phase: PhaseId, vendor: &str) -> &mut Card {
        let controllers = &mut self.controllers;
        let sentinel = &self.sentinel;
        self.cards
            .entry(phase)
            .or_default()
            .entry(vendor.to_string())
            .or_insert_with(|| {
                if let Some(ctl) = controllers.get_mut(&phase) {
                    ctl.register_card();
                }
                let mut card = Card::new(vendor, phase);
                if let Some(s) = sentinel {
                    card = card.with_sentinel(s);
                }
                card
            })
    }

    /// Mutate a card and feed any status flip into its phase controller.
    /// Returns the closure result plus the (old, new) statuses.
    pub fn with_card<R>(
        &mut self,
        phase: PhaseId,
        vendor: &str,
        f: impl FnOnce(&mut Card) -> R,
    ) -> Option<(R, CardStatus, CardStatus)> {
        let card = self.cards.get_mut(&phase)?.get_mut(vendor)?;
        let old = card.status();
        let out = f(card);
        let new = card.status();
        if old != new
            && let Some(ctl) = self.controllers.get_mut(&phase)
        {
            ctl.on_status_change(old, new);
        }
        self.refresh_visibility();
        Some((out, old, new))
    }

    /// True when the phase before `phase` has an approved card for this
    /// vendor. The first phase has no gate.
    pub fn prev_approved(&self, phase: PhaseId, vendor: &str) -> bool {
        match phase.prev() {
            None => true,
            Some(prev) => self
                .card(prev, vendor)
                .is_some_and(|c| c.is_approved()),
        }
    }

    /// Vendors whose card in `phase` would pass approval right now.
    /// Dirty cards are excluded: bulk approval never restarts work.
    pub fn approvable_vendors(&self, phase: PhaseId) -> Vec<String> {
        self.vendors
            .iter()
            .filter(|v| {
                self.card(phase, v).is_some_and(|c| {
                    !c.dirty() && phase.validate(c, self.prev_approved(phase, v)).is_ok()
                })
            })
            .cloned()
            .collect()
    }

    /// Reset `phase` and everything downstream of it for one vendor.
    /// Returns the (phase, old, new) transitions of cards that changed.
    pub fn clear_from(
        &mut self,
        phase: PhaseId,
        vendor: &str,
    ) -> Vec<(PhaseId, CardStatus, CardStatus)> {
        let mut changes = Vec::new();
        for p in phase.and_downstream() {
            if let Some((_, old, new)) = self.with_card(p, vendor, Card::reset)
                && old != new
            {
                changes.push((p, old, new));
            }
        }
        self.drop_final(vendor);
        changes
    }

    /// Store a vendor's final letter and extend the assembly with its
    /// paragraphs. Replaces any previous letter from the same vendor.
    pub fn record_final(&mut self, vendor: &str, final_letter: &str, cost: f64) -> usize {
        self.drop_final(vendor);
        self.finals.insert(
            vendor.to_string(),
            FinalLetter {
                final_letter: final_letter.to_string(),
                cost,
            },
        );
        let paragraphs = paragraph::split(final_letter, vendor);
        let count = paragraphs.len();
        self.assembly.extend(paragraphs);
        count
    }

    fn drop_final(&mut self, vendor: &str) {
        if self.finals.remove(vendor).is_some() {
            self.assembly
                .retain(|p| p.vendor.as_deref() != Some(vendor));
        }
    }

    pub fn final_letter(&self, vendor: &str) -> Option<&FinalLetter> {
        self.finals.get(vendor)
    }

    pub fn controller(&self, phase: PhaseId) -> &PhaseController {
        // A controller for every phase is created in `new`.
        &self.controllers[&phase]
    }

    /// Re-evaluate phase visibility. The first phase is always eligible;
    /// later phases open once the previous phase has an approval or they
    /// already hold data. Visibility is sticky per controller.
    fn refresh_visibility(&mut self) {
        for phase in PhaseId::ALL {
            let prev_ok = match phase.prev() {
                None => true,
                Some(prev) => self
                    .controllers
                    .get(&prev)
                    .is_some_and(|c| c.approved_count() > 0),
            };
            let has_data = self
                .cards
                .get(&phase)
                .is_some_and(|m| m.values().any(|c| c.status() != CardStatus::Pending));
            if let Some(ctl) = self.controllers.get_mut(&phase) {
                ctl.update_visibility(prev_ok, has_data);
            }
        }
    }

    // ==================== Paragraph assembly ====================

    pub fn paragraphs(&self) -> &[Paragraph] {
        &self.assembly
    }

    pub fn push_paragraph(&mut self, paragraph: Paragraph) -> Uuid {
        let id = paragraph.id;
        self.assembly.push(paragraph);
        id
    }

    pub fn set_paragraph_text(&mut self, id: Uuid, text: &str) -> bool {
        match self.assembly.iter_mut().find(|p| p.id == id) {
            Some(p) => {
                p.text = text.to_string();
                true
            }
            None => false,
        }
    }

    pub fn remove_paragraph(&mut self, id: Uuid) -> bool {
        let before = self.assembly.len();
        self.assembly.retain(|p| p.id != id);
        self.assembly.len() != before
    }

    /// Per-vendor correction records for every edited vendor paragraph.
    /// User paragraphs have no original and produce nothing.
    pub fn corrections(&self) -> BTreeMap<String, Vec<CorrectionRecord>> {
        let mut out: BTreeMap<String, Vec<CorrectionRecord>> = BTreeMap::new();
        for p in &self.assembly {
            if !p.is_edited() {
                continue;
            }
            let (Some(vendor), Some(original)) = (p.vendor.as_deref(), p.original_text()) else {
                continue;
            };
            let records = diff::diff(original, &p.text);
            if !records.is_empty() {
                out.entry(vendor.to_string()).or_default().extend(records);
            }
        }
        out
    }

    // ==================== Lifecycle ====================

    /// Wipe everything back to an empty, invisible workflow.
    pub fn reset(&mut self) {
        self.vendors.clear();
        self.cards.clear();
        self.finals.clear();
        self.assembly.clear();
        for ctl in self.controllers.values_mut() {
            ctl.reset();
        }
        self.refresh_visibility();
    }

    pub fn snapshot(&self) -> WorkflowSnapshot {
        let phases = PhaseId::ALL
            .into_iter()
            .map(|phase| {
                let ctl = self.controller(phase);
                let cards = self
                    .vendors
                    .iter()
                    .filter_map(|v| self.card(phase, v))
                    .map(|c| CardView {
                        vendor: c.vendor.clone(),
                        status: c.status(),
                        dirty: c.dirty(),
                        error: c.error.clone(),
                        text: c.effective_text(),
                        unresolved_feedback: c.feedback.unresolved_count(),
                        cost: c.data().map(|d| d.cost()).unwrap_or(0.0),
                    })
                    .collect();
                PhaseView {
                    phase,
                    visible: ctl.visible(),
                    counters: ctl.counters(),
                    cards,
                }
            })
            .collect();
        WorkflowSnapshot {
            phases,
            finals: self.finals.clone(),
            paragraphs: self.assembly.clone(),
        }
    }
}
