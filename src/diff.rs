//! Word-level correction records between an original and an edited
//! paragraph, for the per-vendor audit trail produced at save time.

use serde::{Deserialize, Serialize};

/// A whole-paragraph rewrite is not worth itemizing: above this
/// changed-word ratio the diff collapses to one `full` record.
pub const FULL_REWRITE_RATIO: f64 = 0.20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrectionKind {
    /// One contiguous changed run of words.
    Diff,
    /// The whole paragraph, original vs edited.
    Full,
}

/// One entry of a vendor's correction record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionRecord {
    #[serde(rename = "type")]
    pub kind: CorrectionKind,
    pub original: String,
    pub edited: String,
}

impl CorrectionRecord {
    fn full(original: &str, edited: &str) -> Self {
        Self {
            kind: CorrectionKind::Full,
            original: original.to_string(),
            edited: edited.to_string(),
        }
    }

    fn run(removed: &[&str], added: &[&str]) -> Self {
        Self {
            kind: CorrectionKind::Diff,
            original: removed.join(" "),
            edited: added.join(" "),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op<'a> {
    Keep,
    Del(&'a str),
    Ins(&'a str),
}

/// Compute the correction records between two paragraphs.
///
/// Identical texts produce `[]`; exactly one empty side produces a single
/// `full` record; a change touching more than [`FULL_REWRITE_RATIO`] of
/// the longer side collapses to a single `full` record; otherwise each
/// maximal contiguous changed run (a deletion immediately followed by an
/// insertion is one replace run) becomes one `diff` record.
pub fn diff(original: &str, edited: &str) -> Vec<CorrectionRecord> {
    let orig: Vec<&str> = original.split_whitespace().collect();
    let edit: Vec<&str> = edited.split_whitespace().collect();

    if orig == edit {
        return Vec::new();
    }
    if orig.is_empty() || edit.is_empty() {
        return vec![CorrectionRecord::full(original, edited)];
    }

    let ops = align(&orig, &edit);
    let removed = ops.iter().filter(|op| matches!(op, Op::Del(_))).count();
    let added = ops.iter().filter(|op| matches!(op, Op::Ins(_))).count();
    let changed = removed.max(added) as f64;
    let span = orig.len().max(edit.len()) as f64;
    if changed / span > FULL_REWRITE_RATIO {
        return vec![CorrectionRecord::full(original, edited)];
    }

    collect_runs(&ops)
}

/// Word alignment via longest-common-subsequence backtracking. Deletions
/// are emitted before insertions at the same gap, which is what makes a
/// replace read as one run.
fn align<'a>(orig: &[&'a str], edit: &[&'a str]) -> Vec<Op<'a>> {
    let n = orig.len();
    let m = edit.len();
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if orig[i] == edit[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut ops = Vec::with_capacity(n + m);
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if orig[i] == edit[j] {
            ops.push(Op::Keep);
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            ops.push(Op::Del(orig[i]));
            i += 1;
        } else {
            ops.push(Op::Ins(edit[j]));
            j += 1;
        }
    }
    while i < n {
        ops.push(Op::Del(orig[i]));
        i += 1;
    }
    while j < m {
        ops.push(Op::Ins(edit[j]));
        j += 1;
    }
    ops
}

/// Partition the alignment into maximal contiguous changed runs.
fn collect_runs(ops: &[Op<'_>]) -> Vec<CorrectionRecord> {
    let mut records = Vec::new();
    let mut removed: Vec<&str> = Vec::new();
    let mut added: Vec<&str> = Vec::new();

    for op in ops {
        match op {
            Op::Keep => {
                if !removed.is_empty() || !added.is_empty() {
                    records.push(CorrectionRecord::run(&removed, &added));
                    removed.clear();
                    added.clear();
                }
            }
            Op::Del(word) => removed.push(word),
            Op::Ins(word) => added.push(word),
        }
    }
    if !removed.is_empty() || !added.is_empty() {
        records.push(CorrectionRecord::run(&removed, &added));
    }
    records
}
