//! Error taxonomy for the node-set / range-set algebra (spec §7 "Parse errors").
//!
//! These are surfaced synchronously to the caller of a parser; they never
//! cross an event boundary, which is why this module stays free of any
//! engine or worker vocabulary.

use thiserror::Error;

/// Failure parsing a single `RangeSet` textual pattern (e.g. `"1-3,5"`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeSetParseError {
    #[error("empty range `{0}-{1}`: start must not exceed end")]
    EmptyRange(u64, u64),

    #[error("invalid range syntax in token `{0}`")]
    InvalidSyntax(String),

    #[error("step must be >= 1, got `{0}` in token `{0}`")]
    ZeroStep(String),

    #[error("step form `a-b/step` cannot mix pad widths: `{0}` has width {1} but `{2}` has width {3}")]
    MixedPadWidth(String, u8, String, u8),

    #[error("step form forbids trailing digits outside the bracket near `{0}`")]
    TrailingDigitsWithStep(String),

    #[error("integer overflow parsing `{0}`")]
    Overflow(String),
}

/// Failure parsing a `NodeSet` textual pattern.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeSetParseError {
    #[error(transparent)]
    Range(#[from] RangeSetParseError),

    #[error("unbalanced bracket in pattern `{0}`")]
    UnbalancedBracket(String),

    #[error("empty operand before operator `{0}` in `{1}`")]
    EmptyOperand(char, String),

    #[error("unknown operator `{0}` in `{1}`")]
    UnknownOperator(char, String),

    #[error("group resolution requested (`{0}`) but no resolver was supplied")]
    NoResolver(String),

    #[error(transparent)]
    Resolver(#[from] ResolverError),
}

/// Failure in an external group-source upcall (spec §6, §7 "Resolver errors").
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("group source `{source}` failed to resolve `{upcall}`: {reason}")]
pub struct ResolverError {
    pub source: String,
    pub upcall: String,
    pub reason: String,
}

impl ResolverError {
    pub fn new(source: impl Into<String>, upcall: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            upcall: upcall.into(),
            reason: reason.into(),
        }
    }
}
