//! Core capability errors (parsing and validation of changelog values).
//!
//! These represent refusal states for malformed input, never store or I/O
//! failures.

use thiserror::Error;

use crate::error::Transience;

/// Invalid identifier or position literal.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidId {
    #[error("csn `{raw}` is invalid: {reason}")]
    Csn { raw: String, reason: String },
    #[error("dn `{raw}` is invalid: {reason}")]
    Dn { raw: String, reason: String },
    #[error("cookie `{raw}` is invalid: {reason}")]
    Cookie { raw: String, reason: String },
}

/// Invalid search filter string.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("filter `{raw}` is invalid at offset {offset}: {reason}")]
pub struct InvalidFilter {
    pub raw: String,
    pub offset: usize,
    pub reason: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CoreError {
    #[error(transparent)]
    InvalidId(#[from] InvalidId),
    #[error(transparent)]
    InvalidFilter(#[from] InvalidFilter),
}

impl CoreError {
    pub fn transience(&self) -> Transience {
        Transience::Permanent
    }
}
