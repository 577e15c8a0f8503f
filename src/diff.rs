//! Text diffing between the original and corrected text of one content unit.
//!
//! The diff is computed per word so edit boundaries land on word boundaries
//! instead of single-character fragments, and adjacent tokens with the same
//! operation are merged into one segment. Concatenating all non-Delete
//! segments reproduces the corrected text; all non-Insert segments reproduce
//! the original. Output is deterministic for fixed inputs, which the response
//! cache and the tests rely on.

use crate::comments::{RunStyle, StyledRun};
use similar::utils::diff_words;
use similar::{Algorithm, ChangeTag};

const ANSI_RED: &str = "\x1b[91m";
const ANSI_GREEN: &str = "\x1b[92m";
const ANSI_RESET: &str = "\x1b[0m";

/// Hex color applied to deleted text in the comment body.
pub const DELETE_COLOR: &str = "FF0000";
/// Hex color applied to inserted text in the comment body.
pub const INSERT_COLOR: &str = "00B050";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffOp {
    Delete,
    Insert,
    Equal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffSegment {
    pub op: DiffOp,
    pub text: String,
}

/// Computes the ordered edit segments between two strings.
pub fn diff_segments(original: &str, corrected: &str) -> Vec<DiffSegment> {
    let mut segments: Vec<DiffSegment> = Vec::new();
    for (tag, token) in diff_words(Algorithm::Myers, original, corrected) {
        if token.is_empty() {
            continue;
        }
        let op = match tag {
            ChangeTag::Delete => DiffOp::Delete,
            ChangeTag::Insert => DiffOp::Insert,
            ChangeTag::Equal => DiffOp::Equal,
        };
        match segments.last_mut() {
            Some(last) if last.op == op => last.text.push_str(token),
            _ => segments.push(DiffSegment {
                op,
                text: token.to_string(),
            }),
        }
    }
    segments
}

/// Maps diff segments to styled comment runs: deletions struck through in
/// red, insertions in green, unchanged text unstyled. Segment order is kept,
/// so the comment reads as one before/after narrative.
pub fn styled_runs_from_diff(segments: &[DiffSegment]) -> Vec<StyledRun> {
    segments
        .iter()
        .filter(|s| !s.text.is_empty())
        .map(|s| {
            let style = match s.op {
                DiffOp::Delete => RunStyle {
                    strike: true,
                    color: Some(DELETE_COLOR.to_string()),
                    ..RunStyle::default()
                },
                DiffOp::Insert => RunStyle {
                    color: Some(INSERT_COLOR.to_string()),
                    ..RunStyle::default()
                },
                DiffOp::Equal => RunStyle::default(),
            };
            StyledRun {
                text: s.text.clone(),
                style,
            }
        })
        .collect()
}

/// Single unstyled run, for plain-text comments.
pub fn plain_runs(text: &str) -> Vec<StyledRun> {
    vec![StyledRun {
        text: text.to_string(),
        style: RunStyle::default(),
    }]
}

/// Renders the diff with ANSI colors for terminal log output.
pub fn colored_console_diff(original: &str, corrected: &str) -> String {
    let mut out = String::new();
    for segment in diff_segments(original, corrected) {
        match segment.op {
            DiffOp::Delete => {
                out.push_str(ANSI_RED);
                out.push_str(&segment.text);
                out.push_str(ANSI_RESET);
            }
            DiffOp::Insert => {
                out.push_str(ANSI_GREEN);
                out.push_str(&segment.text);
                out.push_str(ANSI_RESET);
            }
            DiffOp::Equal => out.push_str(&segment.text),
        }
    }
    out
}
