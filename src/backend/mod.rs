//! The changelog backend: answers searches below the changelog root and fans
//! committed changes out to persistent searches.

mod change_number_sender;
mod cookie_sender;
pub mod entry_builder;
mod error;
pub mod gate;
pub mod range;
mod search;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::changelog::{
    ChangelogDb, CursorOptions, EclMultiDomainCursor, MultiDomainCursor, ReplicationServer,
};
use crate::config::BackendConfig;
use crate::core::{Dn, MultiDomainServerState, SearchScope, UpdateMsg};

pub use change_number_sender::ChangeNumberEntrySender;
pub use cookie_sender::CookieEntrySender;
pub use error::{ResultCode, SearchError};
pub use gate::{DeliveryGate, SearchPhase};
pub use range::ChangeNumberRange;
pub use search::{
    CancellationToken, PersistentSearch, Privileges, SearchOperation, SearchOutcome,
    SearchRequest, SearchResultEntry,
};

use entry_builder::{build_base_changelog_entry, create_entry_from_msg};

/// Control exchanging the resume cookie with cookie-mode clients.
pub const ECL_COOKIE_EXCHANGE_CONTROL_OID: &str = "1.3.6.1.4.1.26027.1.5.4";

const SUPPORTED_CONTROLS: &[&str] = &[ECL_COOKIE_EXCHANGE_CONTROL_OID];

pub struct ChangelogBackend {
    config: BackendConfig,
    changelog: Arc<dyn ChangelogDb>,
    server: Arc<dyn ReplicationServer>,
    registry: Mutex<Registry>,
}

/// Registered persistent searches, keyed by search id.
#[derive(Default)]
struct Registry {
    cookie: BTreeMap<u64, Arc<CookieEntrySender>>,
    change_number: BTreeMap<u64, Arc<ChangeNumberEntrySender>>,
}

impl Registry {
    fn len(&self) -> usize {
        self.cookie.len() + self.change_number.len()
    }

    fn contains(&self, id: u64) -> bool {
        self.cookie.contains_key(&id) || self.change_number.contains_key(&id)
    }
}

impl ChangelogBackend {
    pub fn new(
        config: BackendConfig,
        changelog: Arc<dyn ChangelogDb>,
        server: Arc<dyn ReplicationServer>,
    ) -> Self {
        Self {
            config,
            changelog,
            server,
            registry: Mutex::new(Registry::default()),
        }
    }

    pub fn changelog_root(&self) -> &Dn {
        &self.config.root_dn
    }

    pub fn supported_controls(&self) -> &'static [&'static str] {
        SUPPORTED_CONTROLS
    }

    pub fn excluded_domains(&self) -> &BTreeSet<Dn> {
        &self.config.excluded_domains
    }

    pub fn persistent_search_count(&self) -> usize {
        self.lock_registry().len()
    }

    /// Whether `dn` has entries below it. Only the root ever does, and only
    /// while some exposed domain has a change in its log.
    pub fn has_subordinates(&self, dn: &Dn) -> Result<bool, SearchError> {
        if dn != self.changelog_root() {
            return Ok(false);
        }
        let cursor = self.changelog.replication_domain_db().cursor_from(
            &MultiDomainServerState::new(),
            CursorOptions::FROM_KEY,
            &self.config.excluded_domains,
        )?;
        let mut cursor = EclMultiDomainCursor::new(cursor, Arc::clone(&self.server));
        Ok(cursor.next()?)
    }

    /// Registers `op` to receive live changes. Searches without the
    /// persistent-search control are ignored, as are repeated registrations.
    pub fn register_persistent_search(&self, op: &Arc<SearchOperation>) -> Result<(), SearchError> {
        let request = op.request();
        if !request.is_persistent() || self.lock_registry().contains(op.id()) {
            return Ok(());
        }
        let changes_only = request.is_changes_only();
        if changes_only && !request.privileges.changelog_read {
            return Err(SearchError::InsufficientAccess);
        }
        let start_phase = if changes_only {
            SearchPhase::Persistent
        } else {
            SearchPhase::Initial
        };
        let root = self.changelog_root().clone();

        if let Some(requested) = &request.cookie {
            let cookie = if changes_only {
                self.newest_cookie()?
            } else {
                requested.clone()
            };
            let sender = CookieEntrySender::new(
                Arc::clone(op),
                root,
                self.config.excluded_domains.clone(),
                start_phase,
                cookie,
            );
            let mut registry = self.registry_with_room()?;
            registry.cookie.insert(op.id(), Arc::new(sender));
        } else {
            let range = range::optimize_search(&root, &request.base_dn, &request.filter)?;
            let sender = ChangeNumberEntrySender::new(
                Arc::clone(op),
                root,
                self.config.excluded_domains.clone(),
                range,
                start_phase,
            );
            let mut registry = self.registry_with_room()?;
            registry.change_number.insert(op.id(), Arc::new(sender));
        }
        tracing::info!(
            search_id = op.id(),
            cookie_mode = request.is_cookie_mode(),
            changes_only,
            "persistent search registered"
        );
        Ok(())
    }

    /// Cancels and forgets the persistent search `id`.
    pub fn deregister_persistent_search(&self, id: u64) -> bool {
        let removed = {
            let mut registry = self.lock_registry();
            let cookie = registry.cookie.remove(&id).map(|s| Arc::clone(s.operation()));
            let change_number = registry
                .change_number
                .remove(&id)
                .map(|s| Arc::clone(s.operation()));
            cookie.or(change_number)
        };
        match removed {
            Some(op) => {
                op.cancel();
                tracing::info!(search_id = id, "persistent search deregistered");
                true
            }
            None => false,
        }
    }

    /// Runs the search: the base entry if in scope, then the initial scan.
    /// Persistent searches stay registered afterwards and keep receiving
    /// live changes through the notify methods.
    pub fn search(&self, op: &Arc<SearchOperation>) -> Result<SearchOutcome, SearchError> {
        let request = op.request();
        if !request.privileges.changelog_read {
            return Err(SearchError::InsufficientAccess);
        }
        let root = self.changelog_root();
        if !request.base_dn.is_descendant_of(root) {
            return Err(SearchError::NoSuchEntry {
                base_dn: request.base_dn.clone(),
                root: root.clone(),
            });
        }
        tracing::debug!(
            search_id = op.id(),
            base = %request.base_dn,
            filter = %request.filter,
            cookie_mode = request.is_cookie_mode(),
            persistent = request.is_persistent(),
            "changelog search"
        );

        self.register_persistent_search(op)?;
        if request.is_changes_only() {
            return Ok(op.outcome());
        }

        let result = self.run_initial_search(op);
        if let Err(err) = &result {
            tracing::debug!(search_id = op.id(), "search failed: {err}");
            self.deregister_persistent_search(op.id());
        }
        result
    }

    fn run_initial_search(&self, op: &Arc<SearchOperation>) -> Result<SearchOutcome, SearchError> {
        let request = op.request();
        if let Some(cookie) = &request.cookie {
            self.server
                .validate_cookie(cookie, &self.config.excluded_domains)?;
        }
        let range = if request.is_cookie_mode() {
            ChangeNumberRange::unbounded()
        } else {
            range::optimize_search(self.changelog_root(), &request.base_dn, &request.filter)?
        };

        if !self.send_base_entry(op)? {
            return Ok(op.outcome());
        }

        if request.is_cookie_mode() {
            let sender = match self.lock_registry().cookie.get(&op.id()) {
                Some(sender) => Arc::clone(sender),
                None => Arc::new(CookieEntrySender::new(
                    Arc::clone(op),
                    self.changelog_root().clone(),
                    self.config.excluded_domains.clone(),
                    SearchPhase::Initial,
                    request.cookie.clone().unwrap_or_default(),
                )),
            };
            sender.initial_search(
                self.changelog.replication_domain_db(),
                Arc::clone(&self.server),
            )?;
        } else {
            let sender = match self.lock_registry().change_number.get(&op.id()) {
                Some(sender) => Arc::clone(sender),
                None => Arc::new(ChangeNumberEntrySender::new(
                    Arc::clone(op),
                    self.changelog_root().clone(),
                    self.config.excluded_domains.clone(),
                    range,
                    SearchPhase::Initial,
                )),
            };
            sender.initial_search(self.changelog.as_ref(), Arc::clone(&self.server))?;
        }
        Ok(op.outcome())
    }

    /// Sends the root entry when the search covers it. Returns `false` when
    /// nothing below the root is in scope.
    fn send_base_entry(&self, op: &SearchOperation) -> Result<bool, SearchError> {
        let request = op.request();
        let root = self.changelog_root();
        if root.matches_base_and_scope(&request.base_dn, request.scope) {
            let entry = build_base_changelog_entry(root, self.has_subordinates(root)?);
            if request.filter.matches(&entry) {
                op.return_entry(entry, None);
            }
        }
        Ok(!(request.base_dn == *root && request.scope == SearchScope::BaseObject))
    }

    /// Live delivery of a change just committed to `domain`, for cookie-mode
    /// searches.
    pub fn notify_cookie_entry_added(&self, domain: &Dn, msg: &UpdateMsg) {
        if !self.is_exposed(domain, msg) {
            return;
        }
        let senders: Vec<_> = {
            let mut registry = self.lock_registry();
            registry.cookie.retain(|_, s| !s.operation().is_done());
            registry.cookie.values().cloned().collect()
        };
        for sender in senders {
            if let Err(err) = sender.notify_entry_added(domain, msg) {
                tracing::warn!(
                    search_id = sender.operation().id(),
                    csn = %msg.csn,
                    "live delivery failed: {err}"
                );
            }
        }
    }

    /// Live delivery of a change just committed and indexed as
    /// `change_number`, for change-number searches. `cookie` is the cookie
    /// right after the commit.
    pub fn notify_change_number_entry_added(
        &self,
        domain: &Dn,
        change_number: i64,
        cookie: &str,
        msg: &UpdateMsg,
    ) {
        if !self.is_exposed(domain, msg) {
            return;
        }
        let senders: Vec<_> = {
            let mut registry = self.lock_registry();
            registry.change_number.retain(|_, s| !s.operation().is_done());
            registry.change_number.values().cloned().collect()
        };
        if senders.is_empty() {
            return;
        }
        let entry =
            match create_entry_from_msg(self.changelog_root(), domain, change_number, cookie, msg) {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!(change_number, csn = %msg.csn, "live delivery failed: {err}");
                    return;
                }
            };
        for sender in senders {
            sender.notify_entry_added(change_number, &entry);
        }
    }

    fn is_exposed(&self, domain: &Dn, msg: &UpdateMsg) -> bool {
        msg.is_ldap_update()
            && !self.config.excluded_domains.contains(domain)
            && self.server.is_ecl_enabled(domain)
    }

    fn newest_cookie(&self) -> Result<MultiDomainServerState, SearchError> {
        let db = self.changelog.replication_domain_db();
        let mut cookie = MultiDomainServerState::new();
        for domain in db.domains()? {
            if self.config.excluded_domains.contains(&domain) {
                continue;
            }
            cookie.update_state(&domain, &db.domain_newest_csns(&domain)?);
        }
        Ok(cookie)
    }

    fn registry_with_room(&self) -> Result<MutexGuard<'_, Registry>, SearchError> {
        let registry = self.lock_registry();
        let max = self.config.max_persistent_searches;
        if registry.len() >= max {
            tracing::warn!(max, "persistent search limit reached");
            return Err(SearchError::PersistentSearchLimit { max });
        }
        Ok(registry)
    }

    fn lock_registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
