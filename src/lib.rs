pub mod cache;
pub mod comments;
pub mod diff;
pub mod document;
pub mod llm;
pub mod package;
pub mod reviewer;
pub mod xml;

use thiserror::Error;

/// Errors with a meaning defined by the review pipeline itself, as opposed
/// to I/O or parse failures that bubble up through `anyhow`.
#[derive(Debug, Error)]
pub enum ReviewError {
    /// A comment anchor must resolve to exactly one or two content nodes.
    /// Any other arity is a programming error upstream, not a data problem.
    #[error("comment anchor must be one or two nodes, got {0}")]
    InvalidAnchorArity(usize),
}
