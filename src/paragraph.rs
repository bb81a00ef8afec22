//! Paragraph units of the assembled letter.
//!
//! Final-phase output is segmented into vendor-tagged paragraphs; the
//! reviewer then edits paragraphs in place at assembly time, and the
//! divergence from each paragraph's original text is what the diff
//! engine audits at save time.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use uuid::Uuid;

static BLANK_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r?\n[ \t]*\r?\n").unwrap());

/// One paragraph of the assembled document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paragraph {
    pub id: Uuid,
    /// `None` for user-authored text.
    pub vendor: Option<String>,
    pub text: String,
    /// Set once at creation for vendor-sourced paragraphs, never mutated;
    /// only `text` changes afterwards.
    original_text: Option<String>,
}

impl Paragraph {
    /// A paragraph produced by a generation vendor.
    pub fn from_vendor(vendor: &str, text: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            vendor: Some(vendor.to_string()),
            text: text.to_string(),
            original_text: Some(text.to_string()),
        }
    }

    /// A paragraph written by the user at assembly time. It has no
    /// original to diff against.
    pub fn user(text: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            vendor: None,
            text: text.to_string(),
            original_text: None,
        }
    }

    pub fn original_text(&self) -> Option<&str> {
        self.original_text.as_deref()
    }

    pub fn is_edited(&self) -> bool {
        self.original_text
            .as_deref()
            .is_some_and(|orig| orig != self.text)
    }
}

/// Split generated text on blank-line boundaries into vendor-tagged
/// paragraphs. Each paragraph is trimmed; empty segments are dropped.
pub fn split(text: &str, vendor: &str) -> Vec<Paragraph> {
    BLANK_LINE
        .split(text)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| Paragraph::from_vendor(vendor, p))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_blank_lines_and_trims() {
        let text = "Dear hiring team,\n\nI am writing to apply.\n\n  Sincerely,\nA. Candidate  ";
        let paragraphs = split(text, "acme");
        assert_eq!(paragraphs.len(), 3);
        assert_eq!(paragraphs[0].text, "Dear hiring team,");
        assert_eq!(paragraphs[1].text, "I am writing to apply.");
        assert_eq!(paragraphs[2].text, "Sincerely,\nA. Candidate");
    }

    #[test]
    fn handles_crlf_and_whitespace_only_blank_lines() {
        let paragraphs = split("first\r\n\r\nsecond\n   \nthird", "acme");
        assert_eq!(paragraphs.len(), 3);
    }

    #[test]
    fn drops_empty_segments() {
        let paragraphs = split("\n\nonly one\n\n\n\n", "acme");
        assert_eq!(paragraphs.len(), 1);
        assert_eq!(paragraphs[0].text, "only one");
    }

    #[test]
    fn vendor_paragraphs_carry_immutable_originals() {
        let mut paragraphs = split("Dear team,", "acme");
        let p = &mut paragraphs[0];
        assert_eq!(p.vendor.as_deref(), Some("acme"));
        assert_eq!(p.original_text(), Some("Dear team,"));
        assert!(!p.is_edited());

        p.text = "Dear hiring team,".to_string();
        assert_eq!(p.original_text(), Some("Dear team,"));
        assert!(p.is_edited());
    }

    #[test]
    fn user_paragraphs_have_no_original() {
        let p = Paragraph::user("P.S. I also enjoy hiking.");
        assert!(p.vendor.is_none());
        assert!(p.original_text().is_none());
        assert!(!p.is_edited());
    }

    #[test]
    fn each_paragraph_gets_a_fresh_identifier() {
        let paragraphs = split("one\n\ntwo", "acme");
        assert_ne!(paragraphs[0].id, paragraphs[1].id);
    }
}
