//! Interfaces to the durable change log this engine reads.
//!
//! The per-domain replica log, the global change-number index and the
//! replication server's cookie checks live outside this crate; the search
//! engine only needs the cursors and lookups below. [`memory`] provides an
//! in-memory implementation of all of them.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::core::{Csn, Dn, MultiDomainServerState, ServerId, ServerState, UpdateMsg};
use crate::error::Transience;

pub mod ecl_cursor;
pub mod memory;

pub use ecl_cursor::EclMultiDomainCursor;
pub use memory::{Committed, MemoryChangelog};

/// One entry of the global change-number index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeNumberIndexRecord {
    pub change_number: i64,
    pub base_dn: Dn,
    pub csn: Csn,
}

impl ChangeNumberIndexRecord {
    pub fn new(change_number: i64, base_dn: Dn, csn: Csn) -> Self {
        Self {
            change_number,
            base_dn,
            csn,
        }
    }
}

/// How a cursor's starting key is resolved against a replica's records.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyMatchingStrategy {
    /// Start at the first record whose CSN is at or after the key.
    GreaterThanOrEqualToKey,
    /// Start at the last record whose CSN is at or before the key.
    LessThanOrEqualToKey,
}

/// Whether the matched record itself is returned by the first `next()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PositionStrategy {
    OnMatchingKey,
    AfterMatchingKey,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CursorOptions {
    pub key_matching: KeyMatchingStrategy,
    pub positioning: PositionStrategy,
}

impl CursorOptions {
    pub const AFTER_COOKIE: CursorOptions = CursorOptions {
        key_matching: KeyMatchingStrategy::GreaterThanOrEqualToKey,
        positioning: PositionStrategy::AfterMatchingKey,
    };

    pub const FROM_KEY: CursorOptions = CursorOptions {
        key_matching: KeyMatchingStrategy::GreaterThanOrEqualToKey,
        positioning: PositionStrategy::OnMatchingKey,
    };

    pub const AT_OR_BEFORE_KEY: CursorOptions = CursorOptions {
        key_matching: KeyMatchingStrategy::LessThanOrEqualToKey,
        positioning: PositionStrategy::OnMatchingKey,
    };
}

/// Forward-only cursor over a durable store.
///
/// `record()` is `None` before the first `next()` and after `next()` returned
/// `false`. A cursor that returned `false` may return `true` later once new
/// records are committed.
pub trait DbCursor<T>: Send {
    fn next(&mut self) -> Result<bool, ChangelogError>;
    fn record(&self) -> Option<&T>;
}

/// Cursor over several domains' replica logs, merged in CSN order.
pub trait MultiDomainCursor: Send {
    fn next(&mut self) -> Result<bool, ChangelogError>;
    fn record(&self) -> Option<&UpdateMsg>;
    /// Domain of the current record.
    fn domain(&self) -> Option<&Dn>;
    /// Cursor position as a cookie: per replica, the last record returned, or
    /// before the first `next()` the record the cursor was positioned on.
    fn to_cookie(&self) -> MultiDomainServerState;
}

pub trait ReplicationDomainDb: Send + Sync {
    /// Opens a cursor over every domain not in `excluded`, starting from the
    /// per-replica positions in `start`. Replicas absent from `start` are read
    /// from their oldest record.
    fn cursor_from(
        &self,
        start: &MultiDomainServerState,
        options: CursorOptions,
        excluded: &BTreeSet<Dn>,
    ) -> Result<Box<dyn MultiDomainCursor>, ChangelogError>;

    /// Newest committed CSN of every replica of `domain`.
    fn domain_newest_csns(&self, domain: &Dn) -> Result<ServerState, ChangelogError>;

    fn domains(&self) -> Result<Vec<Dn>, ChangelogError>;
}

pub trait ChangeNumberIndexDb: Send + Sync {
    fn oldest_record(&self) -> Result<Option<ChangeNumberIndexRecord>, ChangelogError>;

    /// Cursor over records with a change number at or above `change_number`.
    fn cursor_from(
        &self,
        change_number: i64,
    ) -> Result<Box<dyn DbCursor<ChangeNumberIndexRecord>>, ChangelogError>;
}

pub trait ChangelogDb: Send + Sync {
    fn replication_domain_db(&self) -> &dyn ReplicationDomainDb;
    fn change_number_index_db(&self) -> &dyn ChangeNumberIndexDb;
}

/// The replication server's view of which domains are exposed and whether a
/// client cookie is still usable.
pub trait ReplicationServer: Send + Sync {
    fn is_ecl_enabled(&self, domain: &Dn) -> bool;

    fn validate_cookie(
        &self,
        cookie: &MultiDomainServerState,
        excluded: &BTreeSet<Dn>,
    ) -> Result<(), CookieValidationError>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CookieValidationError {
    #[error("cookie references unknown or excluded domain {domain}")]
    UnknownDomain { domain: Dn },
    #[error("cookie position {csn} in {domain} is older than the oldest retained change")]
    Stale { domain: Dn, csn: Csn },
    #[error("changelog state unavailable")]
    Unavailable,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ChangelogError {
    #[error("changelog storage failure: {reason}")]
    Storage { reason: String },
    #[error("changelog lock poisoned")]
    LockPoisoned,
    #[error("csn {csn} does not follow {last} for replica {server_id} of {domain}")]
    OutOfOrder {
        domain: Dn,
        server_id: ServerId,
        csn: Csn,
        last: Csn,
    },
    #[error("{kind} message {csn} cannot be indexed")]
    NotIndexable { kind: &'static str, csn: Csn },
}

impl ChangelogError {
    pub fn transience(&self) -> Transience {
        match self {
            ChangelogError::Storage { .. } => Transience::Unknown,
            ChangelogError::LockPoisoned => Transience::Retryable,
            ChangelogError::OutOfOrder { .. } | ChangelogError::NotIndexable { .. } => {
                Transience::Permanent
            }
        }
    }
}
