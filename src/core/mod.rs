//! Changelog value types: positions (CSN, server states, cookies), names,
//! filters, entries and update messages.

pub mod csn;
pub mod dn;
pub mod entry;
pub mod error;
pub mod filter;
pub mod server_state;
pub mod update;

pub use csn::{Csn, ServerId};
pub use dn::{Dn, Rdn, SearchScope};
pub use entry::{Attribute, Entry};
pub use error::{CoreError, InvalidFilter, InvalidId};
pub use filter::SearchFilter;
pub use server_state::{MultiDomainServerState, ServerState};
pub use update::{Modification, ModificationType, UpdateKind, UpdateMsg};

/// A replica within one domain: the key for per-replica delivery tracking.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReplicaId {
    pub domain: Dn,
    pub server_id: ServerId,
}

impl ReplicaId {
    pub fn new(domain: Dn, server_id: ServerId) -> Self {
        Self { domain, server_id }
    }
}

impl std::fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.server_id, self.domain)
    }
}
