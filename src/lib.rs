#![forbid(unsafe_code)]

//! External change log search engine.
//!
//! Exposes a replicated, per-replica change log as search results: a bounded
//! initial scan, an unbounded persistent search, or the first followed by the
//! second without gaps or duplicates. Clients resume with a multi-domain cookie
//! or a global change number.

pub mod backend;
pub mod changelog;
pub mod config;
pub mod core;
pub mod error;
pub mod telemetry;

pub use error::{Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

pub use crate::backend::{
    ChangeNumberRange, ChangelogBackend, ResultCode, SearchError, SearchOperation,
    SearchOutcome, SearchRequest,
};
pub use crate::changelog::{ChangeNumberIndexRecord, ChangelogError};
pub use crate::core::{
    Attribute, Csn, Dn, Entry, MultiDomainServerState, ReplicaId, SearchFilter, SearchScope,
    ServerId, ServerState, UpdateMsg,
};
