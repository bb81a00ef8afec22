//! Per-phase aggregation: counters and visibility.
//!
//! Counters are maintained purely by (old, new) status deltas delivered
//! per card. Callbacks from different vendors land in arbitrary order, so
//! a delta must never be re-derived from a potentially stale aggregate;
//! each notification carries everything needed to stay consistent.

use serde::{Deserialize, Serialize};

use crate::card::CardStatus;

/// Counter block for one phase.
///
/// Invariant: `pending + approved == total` (pending counts PENDING and
/// READY cards, i.e. everything not yet approved).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseCounters {
    /// READY cards not yet approved.
    pub ready: usize,
    /// Cards not yet approved (PENDING or READY).
    pub pending: usize,
    pub approved: usize,
    pub total: usize,
}

impl PhaseCounters {
    /// Register a newly created card (enters as PENDING).
    pub fn register(&mut self) {
        self.total += 1;
        self.pending += 1;
    }

    /// Apply one card's status change as a monotonic delta.
    pub fn apply(&mut self, old: CardStatus, new: CardStatus) {
        use CardStatus::*;
        match (old, new) {
            (Pending, Ready) => self.ready += 1,
            (Ready, Pending) => self.ready = self.ready.saturating_sub(1),
            (Pending | Ready, Approved) => {
                if old == Ready {
                    self.ready = self.ready.saturating_sub(1);
                }
                self.pending = self.pending.saturating_sub(1);
                self.approved += 1;
            }
            (Approved, Pending | Ready) => {
                self.approved = self.approved.saturating_sub(1);
                self.pending += 1;
                if new == Ready {
                    self.ready += 1;
                }
            }
            _ => {}
        }
    }
}

/// Aggregates all vendor cards of one phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseController {
    counters: PhaseCounters,
    visible: bool,
}

impl PhaseController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counters(&self) -> PhaseCounters {
        self.counters
    }

    pub fn ready_count(&self) -> usize {
        self.counters.ready
    }

    pub fn pending_count(&self) -> usize {
        self.counters.pending
    }

    pub fn approved_count(&self) -> usize {
        self.counters.approved
    }

    pub fn register_card(&mut self) {
        self.counters.register();
    }

    pub fn on_status_change(&mut self, old: CardStatus, new: CardStatus) {
        self.counters.apply(old, new);
    }

    /// Sticky visibility: once the precondition (previous phase has at
    /// least one approved card, or this phase already holds data) is met,
    /// the phase stays visible.
    pub fn update_visibility(&mut self, prev_has_approved: bool, has_data: bool) {
        if prev_has_approved || has_data {
            self.visible = true;
        }
    }

    pub fn visible(&self) -> bool {
        self.visible
    }

    /// Drop all counter state, keeping visibility logic to be re-primed
    /// by the caller. Used on session reset.
    pub fn reset(&mut self) {
        self.counters = PhaseCounters::default();
        self.visible = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_starts_cards_as_pending() {
        let mut c = PhaseController::new();
        c.register_card();
        c.register_card();
        assert_eq!(c.pending_count(), 2);
        assert_eq!(c.ready_count(), 0);
        assert_eq!(c.approved_count(), 0);
    }

    #[test]
    fn pending_to_ready_increments_ready_once() {
        let mut c = PhaseController::new();
        c.register_card();
        c.on_status_change(CardStatus::Pending, CardStatus::Ready);
        assert_eq!(c.ready_count(), 1);
        assert_eq!(c.pending_count(), 1);
    }

    #[test]
    fn approval_decrements_ready_and_pending_exactly_once() {
        let mut c = PhaseController::new();
        c.register_card();
        c.on_status_change(CardStatus::Pending, CardStatus::Ready);
        c.on_status_change(CardStatus::Ready, CardStatus::Approved);
        assert_eq!(c.ready_count(), 0);
        assert_eq!(c.pending_count(), 0);
        assert_eq!(c.approved_count(), 1);
    }

    #[test]
    fn counters_never_underflow_on_out_of_order_callbacks() {
        let mut c = PhaseController::new();
        c.register_card();
        // Ready→Pending delivered before any Pending→Ready.
        c.on_status_change(CardStatus::Ready, CardStatus::Pending);
        assert_eq!(c.ready_count(), 0);
        assert_eq!(c.pending_count(), 1);
    }

    #[test]
    fn conservation_holds_across_arbitrary_interleavings() {
        let mut c = PhaseController::new();
        for _ in 0..3 {
            c.register_card();
        }
        let transitions = [
            (CardStatus::Pending, CardStatus::Ready),
            (CardStatus::Pending, CardStatus::Ready),
            (CardStatus::Ready, CardStatus::Approved),
            (CardStatus::Pending, CardStatus::Ready),
            (CardStatus::Ready, CardStatus::Pending),
            (CardStatus::Pending, CardStatus::Ready),
            (CardStatus::Ready, CardStatus::Approved),
            (CardStatus::Approved, CardStatus::Pending),
        ];
        for (old, new) in transitions {
            c.on_status_change(old, new);
            let k = c.counters();
            assert_eq!(k.pending + k.approved, k.total);
            assert!(k.ready <= k.pending);
        }
    }

    #[test]
    fn rerun_of_approved_card_returns_it_to_pending() {
        let mut c = PhaseController::new();
        c.register_card();
        c.on_status_change(CardStatus::Pending, CardStatus::Ready);
        c.on_status_change(CardStatus::Ready, CardStatus::Approved);
        c.on_status_change(CardStatus::Approved, CardStatus::Pending);
        assert_eq!(c.approved_count(), 0);
        assert_eq!(c.pending_count(), 1);
        assert_eq!(c.ready_count(), 0);
    }

    #[test]
    fn visibility_is_sticky() {
        let mut c = PhaseController::new();
        assert!(!c.visible());
        c.update_visibility(false, false);
        assert!(!c.visible());
        c.update_visibility(true, false);
        assert!(c.visible());
        // Precondition no longer holds; visibility stays.
        c.update_visibility(false, false);
        assert!(c.visible());
    }
}
