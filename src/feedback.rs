//! Reviewer approval tracking for machine-generated critique items.
//!
//! Each refine card carries a set of feedback items keyed by critique
//! category. Every item must be resolved by the reviewer (approved as-is,
//! edited, or cleared) before the card itself can be approved.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Override text that counts as "no issue here" rather than an edit.
///
/// The comparison is case-insensitive after trimming. Deployments whose
/// backend phrases this differently can override it per tracker via
/// [`FeedbackTracker::with_sentinel`].
pub const NO_ISSUE_SENTINEL: &str = "no issues found";

/// One machine-generated critique category on a refine card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackItem {
    /// The machine-generated critique text.
    pub base: String,
    /// Reviewer override, if any.
    pub override_text: Option<String>,
    /// Explicit reviewer approval of the unchanged base text.
    pub approved: bool,
}

impl FeedbackItem {
    fn new(base: &str) -> Self {
        Self {
            base: base.to_string(),
            override_text: None,
            approved: false,
        }
    }
}

/// Human-review status of a single feedback item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    /// Explicitly approved with unchanged content.
    Approved,
    /// Override differs from the base and is real text.
    Edited,
    /// Override differs from the base and reduces to empty or the
    /// no-issue sentinel.
    Cleared,
    /// Not yet looked at.
    Unreviewed,
}

impl ReviewStatus {
    /// Whether this status counts as resolved for card approval.
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Unreviewed)
    }
}

/// Tracks reviewer resolution of every feedback item on one refine card.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackTracker {
    items: BTreeMap<String, FeedbackItem>,
    #[serde(default)]
    sentinel: Option<String>,
}

impl FeedbackTracker {
    /// Build a tracker from the machine critique map, all items unreviewed.
    pub fn from_base(feedback: &BTreeMap<String, String>) -> Self {
        Self {
            items: feedback
                .iter()
                .map(|(k, v)| (k.clone(), FeedbackItem::new(v)))
                .collect(),
            sentinel: None,
        }
    }

    /// Replace the default no-issue sentinel.
    pub fn with_sentinel(mut self, sentinel: &str) -> Self {
        self.sentinel = Some(sentinel.to_string());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.items.keys()
    }

    pub fn item(&self, key: &str) -> Option<&FeedbackItem> {
        self.items.get(key)
    }

    fn sentinel(&self) -> &str {
        self.sentinel.as_deref().unwrap_or(NO_ISSUE_SENTINEL)
    }

    /// Classify the reviewer status of one item.
    ///
    /// An override that differs from the base wins over a stale approved
    /// flag: re-editing an approved item puts it back under the edited or
    /// cleared classification.
    pub fn status_of(&self, key: &str) -> Option<ReviewStatus> {
        let item = self.items.get(key)?;
        let status = match &item.override_text {
            Some(text) if text.trim() != item.base.trim() => {
                let trimmed = text.trim();
                if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(self.sentinel()) {
                    ReviewStatus::Cleared
                } else {
                    ReviewStatus::Edited
                }
            }
            _ if item.approved => ReviewStatus::Approved,
            _ => ReviewStatus::Unreviewed,
        };
        Some(status)
    }

    /// Record a reviewer override for one item. Unknown keys are ignored.
    pub fn set_override(&mut self, key: &str, text: &str) {
        if let Some(item) = self.items.get_mut(key) {
            item.override_text = Some(text.to_string());
        }
    }

    /// Explicitly approve one item's unchanged content.
    pub fn approve_item(&mut self, key: &str) {
        if let Some(item) = self.items.get_mut(key) {
            item.approved = true;
        }
    }

    /// Mark every unreviewed item approved without touching content.
    /// Returns the keys that changed.
    pub fn approve_all(&mut self) -> Vec<String> {
        let unreviewed: Vec<String> = self
            .items
            .keys()
            .filter(|k| self.status_of(k) == Some(ReviewStatus::Unreviewed))
            .cloned()
            .collect();
        for key in &unreviewed {
            self.approve_item(key);
        }
        unreviewed
    }

    /// Whether every item has been resolved (approved, edited, or cleared).
    pub fn all_resolved(&self) -> bool {
        self.items
            .keys()
            .all(|k| self.status_of(k).is_some_and(|s| s.is_resolved()))
    }

    pub fn unresolved_count(&self) -> usize {
        self.items
            .keys()
            .filter(|k| self.status_of(k) == Some(ReviewStatus::Unreviewed))
            .count()
    }

    /// Next unreviewed item after `current`, wrapping around the key
    /// order. Returns `None` when everything is resolved, in which case
    /// the caller leaves its selection unchanged.
    pub fn next_unreviewed(&self, current: Option<&str>) -> Option<String> {
        let keys: Vec<&String> = self.items.keys().collect();
        if keys.is_empty() {
            return None;
        }
        let start = match current {
            Some(cur) => keys
                .iter()
                .position(|k| k.as_str() == cur)
                .map(|i| i + 1)
                .unwrap_or(0),
            None => 0,
        };
        (0..keys.len())
            .map(|offset| keys[(start + offset) % keys.len()])
            .find(|k| self.status_of(k) == Some(ReviewStatus::Unreviewed))
            .cloned()
    }

    /// The critique as the reviewer resolved it: overrides win, cleared
    /// items are dropped.
    pub fn resolved(&self) -> BTreeMap<String, String> {
        self.items
            .iter()
            .filter_map(|(key, item)| match self.status_of(key) {
                Some(ReviewStatus::Cleared) => None,
                Some(ReviewStatus::Edited) => {
                    Some((key.clone(), item.override_text.clone().unwrap_or_default()))
                }
                _ => Some((key.clone(), item.base.clone())),
            })
            .collect()
    }

    /// Whether any item carries an override differing from its base.
    pub fn has_overrides(&self) -> bool {
        self.items.keys().any(|k| {
            matches!(
                self.status_of(k),
                Some(ReviewStatus::Edited | ReviewStatus::Cleared)
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(pairs: &[(&str, &str)]) -> FeedbackTracker {
        let base: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        FeedbackTracker::from_base(&base)
    }

    #[test]
    fn fresh_items_are_unreviewed() {
        let t = tracker(&[("tone", "Too formal"), ("length", "Too long")]);
        assert_eq!(t.status_of("tone"), Some(ReviewStatus::Unreviewed));
        assert!(!t.all_resolved());
        assert_eq!(t.unresolved_count(), 2);
    }

    #[test]
    fn approving_unchanged_content_resolves_item() {
        let mut t = tracker(&[("tone", "Too formal")]);
        t.approve_item("tone");
        assert_eq!(t.status_of("tone"), Some(ReviewStatus::Approved));
        assert!(t.all_resolved());
    }

    #[test]
    fn override_differing_from_base_is_edited() {
        let mut t = tracker(&[("tone", "Too formal")]);
        t.set_override("tone", "Slightly stiff opening");
        assert_eq!(t.status_of("tone"), Some(ReviewStatus::Edited));
    }

    #[test]
    fn empty_override_is_cleared() {
        let mut t = tracker(&[("tone", "Too formal")]);
        t.set_override("tone", "   ");
        assert_eq!(t.status_of("tone"), Some(ReviewStatus::Cleared));
    }

    #[test]
    fn sentinel_override_is_cleared_case_insensitively() {
        let mut t = tracker(&[("tone", "Too formal")]);
        t.set_override("tone", "No Issues Found");
        assert_eq!(t.status_of("tone"), Some(ReviewStatus::Cleared));
    }

    #[test]
    fn custom_sentinel_replaces_default() {
        let mut t = tracker(&[("tone", "Too formal")]).with_sentinel("looks fine");
        t.set_override("tone", "looks fine");
        assert_eq!(t.status_of("tone"), Some(ReviewStatus::Cleared));

        t.set_override("tone", "no issues found");
        assert_eq!(t.status_of("tone"), Some(ReviewStatus::Edited));
    }

    #[test]
    fn override_matching_base_does_not_resolve() {
        let mut t = tracker(&[("tone", "Too formal")]);
        t.set_override("tone", "Too formal");
        assert_eq!(t.status_of("tone"), Some(ReviewStatus::Unreviewed));
    }

    #[test]
    fn editing_an_approved_item_reclassifies_it() {
        let mut t = tracker(&[("tone", "Too formal")]);
        t.approve_item("tone");
        t.set_override("tone", "Actually fine, just trim the intro");
        assert_eq!(t.status_of("tone"), Some(ReviewStatus::Edited));
    }

    #[test]
    fn approve_all_resolves_only_unreviewed_items() {
        let mut t = tracker(&[("tone", "Too formal"), ("length", "Too long")]);
        t.set_override("length", "Cut paragraph two");

        let changed = t.approve_all();
        assert_eq!(changed, vec!["tone".to_string()]);
        assert_eq!(t.status_of("tone"), Some(ReviewStatus::Approved));
        assert_eq!(t.status_of("length"), Some(ReviewStatus::Edited));
        assert!(t.all_resolved());
    }

    #[test]
    fn next_unreviewed_wraps_around() {
        let mut t = tracker(&[("a", "x"), ("b", "y"), ("c", "z")]);
        t.approve_item("b");
        t.approve_item("c");

        // From "b", the next unreviewed item wraps back to "a".
        assert_eq!(t.next_unreviewed(Some("b")), Some("a".to_string()));
    }

    #[test]
    fn next_unreviewed_is_none_when_all_resolved() {
        let mut t = tracker(&[("a", "x")]);
        t.approve_item("a");
        assert_eq!(t.next_unreviewed(Some("a")), None);
    }

    #[test]
    fn resolved_applies_overrides_and_drops_cleared() {
        let mut t = tracker(&[("tone", "Too formal"), ("length", "Too long"), ("cliche", "Opens with a cliche")]);
        t.approve_item("tone");
        t.set_override("length", "Trim to one page");
        t.set_override("cliche", "no issues found");

        let resolved = t.resolved();
        assert_eq!(resolved.get("tone").unwrap(), "Too formal");
        assert_eq!(resolved.get("length").unwrap(), "Trim to one page");
        assert!(!resolved.contains_key("cliche"));
        assert!(t.has_overrides());
    }

    #[test]
    fn empty_tracker_is_trivially_resolved() {
        let t = FeedbackTracker::default();
        assert!(t.all_resolved());
        assert!(t.next_unreviewed(None).is_none());
        assert!(!t.has_overrides());
    }
}
