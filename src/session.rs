//! Client-held session state.
//!
//! The server correlates generation calls by a client-issued session id
//! and may lose that state at any time. The `SessionStore` is the
//! client's own copy of everything needed to rebuild the server side: it
//! is written as cards settle and read by the transport when a call
//! answers "session lost".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::transport::protocol::{InitRequest, RestoreRequest};

/// Restorable per-vendor generation state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VendorSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft_letter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_letter: Option<String>,
    #[serde(default)]
    pub feedback: BTreeMap<String, String>,
    #[serde(default)]
    pub cost: f64,
}

/// Everything the client holds for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub job_text: String,
    pub metadata: BTreeMap<String, String>,
    pub vendors: BTreeMap<String, VendorSnapshot>,
    pub updated_at: DateTime<Utc>,
}

/// Shared, interior-mutable session state. Lock scope is always a short
/// synchronous section; no await happens under the lock.
#[derive(Debug)]
pub struct SessionStore {
    inner: Mutex<SessionSnapshot>,
}

impl SessionStore {
    pub fn new(job_text: &str, metadata: BTreeMap<String, String>) -> Self {
        Self {
            inner: Mutex::new(SessionSnapshot {
                session_id: Uuid::new_v4(),
                job_text: job_text.to_string(),
                metadata,
                vendors: BTreeMap::new(),
                updated_at: Utc::now(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionSnapshot> {
        // A poisoned session lock means a panic mid-update; the snapshot
        // is still structurally valid, so recover it.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn session_id(&self) -> Uuid {
        self.lock().session_id
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.lock().clone()
    }

    /// Discard all per-vendor state and issue a fresh session identifier.
    pub fn rotate(&self) -> Uuid {
        let mut s = self.lock();
        s.session_id = Uuid::new_v4();
        s.vendors.clear();
        s.updated_at = Utc::now();
        s.session_id
    }

    pub fn record_draft(&self, vendor: &str, draft_letter: &str, feedback: &BTreeMap<String, String>, cost: f64) {
        let mut s = self.lock();
        let v = s.vendors.entry(vendor.to_string()).or_default();
        v.draft_letter = Some(draft_letter.to_string());
        v.feedback = feedback.clone();
        v.final_letter = None;
        v.cost += cost;
        s.updated_at = Utc::now();
    }

    pub fn record_final(&self, vendor: &str, final_letter: &str, cost: f64) {
        let mut s = self.lock();
        let v = s.vendors.entry(vendor.to_string()).or_default();
        v.final_letter = Some(final_letter.to_string());
        v.cost += cost;
        s.updated_at = Utc::now();
    }

    pub fn record_cost(&self, vendor: &str, cost: f64) {
        let mut s = self.lock();
        s.vendors.entry(vendor.to_string()).or_default().cost += cost;
        s.updated_at = Utc::now();
    }

    /// Drop one vendor's letters and critique. Rerunning the draft
    /// invalidates both letters; rerunning refine only the final one.
    pub fn clear_vendor_from_draft(&self, vendor: &str) {
        let mut s = self.lock();
        if let Some(v) = s.vendors.get_mut(vendor) {
            v.draft_letter = None;
            v.final_letter = None;
            v.feedback.clear();
        }
        s.updated_at = Utc::now();
    }

    /// Drop only the final letter; the draft stays restorable while a
    /// refine rerun regenerates it.
    pub fn clear_vendor_final(&self, vendor: &str) {
        let mut s = self.lock();
        if let Some(v) = s.vendors.get_mut(vendor) {
            v.final_letter = None;
        }
        s.updated_at = Utc::now();
    }

    pub fn total_cost(&self) -> f64 {
        self.lock().vendors.values().map(|v| v.cost).sum()
    }

    /// The init request that opens this session server-side.
    pub fn init_request(&self) -> InitRequest {
        let s = self.lock();
        InitRequest {
            session_id: s.session_id,
            job_text: s.job_text.clone(),
            metadata: s.metadata.clone(),
        }
    }

    /// The restore request for session-loss recovery.
    pub fn restore_request(&self) -> RestoreRequest {
        let s = self.lock();
        RestoreRequest {
            session_id: s.session_id,
            job_text: s.job_text.clone(),
            metadata: s.metadata.clone(),
            vendors: s.vendors.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        SessionStore::new("Senior blacksmith wanted.", BTreeMap::new())
    }

    #[test]
    fn rotate_issues_a_fresh_id_and_clears_vendors() {
        let s = store();
        s.record_draft("acme", "Dear team,", &BTreeMap::new(), 0.02);
        let before = s.session_id();

        let after = s.rotate();
        assert_ne!(before, after);
        assert_eq!(s.session_id(), after);
        assert!(s.snapshot().vendors.is_empty());
    }

    #[test]
    fn draft_and_final_accumulate_into_the_restore_request() {
        let s = store();
        let feedback = BTreeMap::from([("tone".to_string(), "Too formal".to_string())]);
        s.record_cost("acme", 0.01);
        s.record_draft("acme", "Dear team,", &feedback, 0.02);
        s.record_final("acme", "Dear hiring team,", 0.03);

        let req = s.restore_request();
        let v = req.vendors.get("acme").unwrap();
        assert_eq!(v.draft_letter.as_deref(), Some("Dear team,"));
        assert_eq!(v.final_letter.as_deref(), Some("Dear hiring team,"));
        assert_eq!(v.feedback.get("tone").unwrap(), "Too formal");
        assert!((v.cost - 0.06).abs() < 1e-9);
        assert_eq!(req.job_text, "Senior blacksmith wanted.");
    }

    #[test]
    fn a_new_draft_invalidates_the_old_final_letter() {
        let s = store();
        s.record_final("acme", "old final", 0.0);
        s.record_draft("acme", "new draft", &BTreeMap::new(), 0.0);
        let v = s.snapshot().vendors.get("acme").cloned().unwrap();
        assert!(v.final_letter.is_none());
    }

    #[test]
    fn clearing_from_draft_keeps_only_cost() {
        let s = store();
        s.record_draft("acme", "draft", &BTreeMap::new(), 0.05);
        s.record_final("acme", "final", 0.0);
        s.clear_vendor_from_draft("acme");
        let v = s.snapshot().vendors.get("acme").cloned().unwrap();
        assert!(v.draft_letter.is_none());
        assert!(v.final_letter.is_none());
        assert!(v.feedback.is_empty());
        assert!((v.cost - 0.05).abs() < 1e-9);
    }

    #[test]
    fn clearing_the_final_keeps_the_draft() {
        let s = store();
        s.record_draft("acme", "draft", &BTreeMap::new(), 0.0);
        s.record_final("acme", "final", 0.0);
        s.clear_vendor_final("acme");
        let v = s.snapshot().vendors.get("acme").cloned().unwrap();
        assert!(v.final_letter.is_none());
        assert_eq!(v.draft_letter.as_deref(), Some("draft"));
    }

    #[test]
    fn total_cost_sums_all_vendors() {
        let s = store();
        s.record_cost("acme", 0.02);
        s.record_cost("globex", 0.03);
        assert!((s.total_cost() - 0.05).abs() < 1e-9);
    }

    #[test]
    fn init_request_carries_session_and_job() {
        let s = store();
        let req = s.init_request();
        assert_eq!(req.session_id, s.session_id());
        assert_eq!(req.job_text, "Senior blacksmith wanted.");
    }
}
