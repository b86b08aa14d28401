use std::fmt;

use thiserror::Error;

use crate::changelog::{ChangelogError, CookieValidationError};
use crate::core::{CoreError, Csn, Dn};
use crate::error::Transience;

/// LDAP result codes a changelog search can end with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Success,
    OperationsError,
    ProtocolError,
    TimeLimitExceeded,
    SizeLimitExceeded,
    InvalidAttributeSyntax,
    NoSuchObject,
    InsufficientAccessRights,
    UnwillingToPerform,
    AdminLimitExceeded,
    Cancelled,
}

impl ResultCode {
    /// Numeric value on the wire (RFC 4511, RFC 3909 for `Cancelled`).
    pub fn as_u32(self) -> u32 {
        match self {
            ResultCode::Success => 0,
            ResultCode::OperationsError => 1,
            ResultCode::ProtocolError => 2,
            ResultCode::TimeLimitExceeded => 3,
            ResultCode::SizeLimitExceeded => 4,
            ResultCode::InvalidAttributeSyntax => 21,
            ResultCode::NoSuchObject => 32,
            ResultCode::InsufficientAccessRights => 50,
            ResultCode::UnwillingToPerform => 53,
            ResultCode::AdminLimitExceeded => 11,
            ResultCode::Cancelled => 118,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResultCode::Success => "success",
            ResultCode::OperationsError => "operationsError",
            ResultCode::ProtocolError => "protocolError",
            ResultCode::TimeLimitExceeded => "timeLimitExceeded",
            ResultCode::SizeLimitExceeded => "sizeLimitExceeded",
            ResultCode::InvalidAttributeSyntax => "invalidAttributeSyntax",
            ResultCode::NoSuchObject => "noSuchObject",
            ResultCode::InsufficientAccessRights => "insufficientAccessRights",
            ResultCode::UnwillingToPerform => "unwillingToPerform",
            ResultCode::AdminLimitExceeded => "adminLimitExceeded",
            ResultCode::Cancelled => "canceled",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a changelog search failed. Each variant maps to the LDAP result code
/// returned to the client.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SearchError {
    #[error("you do not have sufficient privileges to use the changelog")]
    InsufficientAccess,

    #[error("{base_dn} is not below the changelog root {root}")]
    NoSuchEntry { base_dn: Dn, root: Dn },

    #[error("invalid change number {value:?}")]
    InvalidChangeNumber { value: String },

    #[error("invalid replication csn {value:?}")]
    InvalidCsn { value: String },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("invalid cookie: {0}")]
    InvalidCookie(#[from] CookieValidationError),

    #[error(
        "change number {change_number} points to csn {index_csn} which is missing from the \
replica log (last read {last_csn})"
    )]
    MissingReplicaUpdate {
        change_number: i64,
        index_csn: Csn,
        last_csn: String,
    },

    #[error("unexpected {kind} message in the changelog of {domain}")]
    UnexpectedMessage { domain: Dn, kind: &'static str },

    #[error("csn timestamp {timestamp_ms}ms cannot be rendered as a change time")]
    InvalidTimestamp { timestamp_ms: u64 },

    #[error("persistent search limit of {max} reached")]
    PersistentSearchLimit { max: usize },

    #[error(transparent)]
    Changelog(#[from] ChangelogError),
}

impl SearchError {
    pub fn result_code(&self) -> ResultCode {
        match self {
            SearchError::InsufficientAccess => ResultCode::InsufficientAccessRights,
            SearchError::NoSuchEntry { .. } => ResultCode::NoSuchObject,
            SearchError::InvalidChangeNumber { .. } | SearchError::InvalidCsn { .. } => {
                ResultCode::InvalidAttributeSyntax
            }
            SearchError::Core(_) => ResultCode::ProtocolError,
            SearchError::InvalidCookie(_) => ResultCode::UnwillingToPerform,
            SearchError::MissingReplicaUpdate { .. }
            | SearchError::UnexpectedMessage { .. }
            | SearchError::InvalidTimestamp { .. } => ResultCode::OperationsError,
            SearchError::PersistentSearchLimit { .. } => ResultCode::AdminLimitExceeded,
            SearchError::Changelog(_) => ResultCode::UnwillingToPerform,
        }
    }

    pub fn transience(&self) -> Transience {
        match self {
            SearchError::Changelog(err) => err.transience(),
            SearchError::PersistentSearchLimit { .. } => Transience::Retryable,
            SearchError::InvalidCookie(CookieValidationError::Unavailable) => {
                Transience::Retryable
            }
            SearchError::InsufficientAccess
            | SearchError::NoSuchEntry { .. }
            | SearchError::InvalidChangeNumber { .. }
            | SearchError::InvalidCsn { .. }
            | SearchError::Core(_)
            | SearchError::InvalidCookie(_)
            | SearchError::MissingReplicaUpdate { .. }
            | SearchError::UnexpectedMessage { .. }
            | SearchError::InvalidTimestamp { .. } => Transience::Permanent,
        }
    }
}
