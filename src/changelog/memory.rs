//! In-memory changelog: per-domain replica logs plus the change-number index.
//!
//! Cursors hold a handle on the shared state and re-read it on every `next()`,
//! so a cursor that ran dry picks up records committed afterwards.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::core::{Csn, Dn, MultiDomainServerState, ServerId, ServerState, UpdateMsg};

use super::{
    ChangeNumberIndexDb, ChangeNumberIndexRecord, ChangelogDb, ChangelogError,
    CookieValidationError, CursorOptions, DbCursor, KeyMatchingStrategy, MultiDomainCursor,
    PositionStrategy, ReplicationDomainDb, ReplicationServer,
};

/// Result of committing one change: its index record and the cookie covering
/// every change committed so far, this one included.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Committed {
    pub record: ChangeNumberIndexRecord,
    pub cookie: String,
}

#[derive(Default)]
struct DomainLog {
    replicas: BTreeMap<ServerId, BTreeMap<Csn, UpdateMsg>>,
    /// Newest purged CSN per replica.
    purged: ServerState,
}

#[derive(Default)]
struct MemoryChangelogState {
    domains: BTreeMap<Dn, DomainLog>,
    index: BTreeMap<i64, ChangeNumberIndexRecord>,
    last_change_number: i64,
    newest: MultiDomainServerState,
    ecl_disabled: BTreeSet<Dn>,
}

impl MemoryChangelogState {
    fn commit_to_log(&mut self, domain: &Dn, msg: UpdateMsg) -> Result<(), ChangelogError> {
        let server_id = msg.csn.server_id();
        let log = self.domains.entry(domain.clone()).or_default();
        let replica = log.replicas.entry(server_id).or_default();
        let last = replica
            .keys()
            .next_back()
            .copied()
            .into_iter()
            .chain(log.purged.get(server_id))
            .max();
        if let Some(last) = last {
            if msg.csn <= last {
                return Err(ChangelogError::OutOfOrder {
                    domain: domain.clone(),
                    server_id,
                    csn: msg.csn,
                    last,
                });
            }
        }
        self.newest.update(domain, msg.csn);
        replica.insert(msg.csn, msg);
        Ok(())
    }

    fn index(&mut self, domain: &Dn, csn: Csn) -> ChangeNumberIndexRecord {
        self.last_change_number += 1;
        let record = ChangeNumberIndexRecord::new(self.last_change_number, domain.clone(), csn);
        self.index.insert(record.change_number, record.clone());
        record
    }
}

#[derive(Clone, Default)]
pub struct MemoryChangelog {
    state: Arc<RwLock<MemoryChangelogState>>,
}

impl MemoryChangelog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a domain with no changes yet.
    pub fn add_domain(&self, domain: &Dn) -> Result<(), ChangelogError> {
        self.write()?.domains.entry(domain.clone()).or_default();
        Ok(())
    }

    /// Commits `msg` to its replica log and assigns the next change number in
    /// one step.
    pub fn append(&self, domain: &Dn, msg: UpdateMsg) -> Result<Committed, ChangelogError> {
        if !msg.is_ldap_update() {
            return Err(ChangelogError::NotIndexable {
                kind: msg.kind.name(),
                csn: msg.csn,
            });
        }
        let mut state = self.write()?;
        let csn = msg.csn;
        state.commit_to_log(domain, msg)?;
        let record = state.index(domain, csn);
        let cookie = state.newest.to_string();
        tracing::trace!(change_number = record.change_number, %csn, %domain, "committed change");
        Ok(Committed { record, cookie })
    }

    /// Commits `msg` to its replica log without indexing it.
    pub fn append_log_only(&self, domain: &Dn, msg: UpdateMsg) -> Result<(), ChangelogError> {
        self.write()?.commit_to_log(domain, msg)
    }

    /// Assigns the next change number to `csn` without touching the log.
    pub fn append_index_only(
        &self,
        domain: &Dn,
        csn: Csn,
    ) -> Result<ChangeNumberIndexRecord, ChangelogError> {
        Ok(self.write()?.index(domain, csn))
    }

    /// Drops every message of `domain` at or before `csn`. Index records are
    /// kept.
    pub fn purge_through(&self, domain: &Dn, csn: Csn) -> Result<(), ChangelogError> {
        let mut state = self.write()?;
        let Some(log) = state.domains.get_mut(domain) else {
            return Ok(());
        };
        for replica in log.replicas.values_mut() {
            let purged: Vec<Csn> = replica.range(..=csn).map(|(key, _)| *key).collect();
            for key in purged {
                replica.remove(&key);
                log.purged.update(key);
            }
        }
        Ok(())
    }

    pub fn disable_ecl(&self, domain: &Dn) -> Result<(), ChangelogError> {
        self.write()?.ecl_disabled.insert(domain.clone());
        Ok(())
    }

    pub fn last_change_number(&self) -> Result<i64, ChangelogError> {
        Ok(self.read()?.last_change_number)
    }

    /// Cookie covering every committed change.
    pub fn newest_cookie(&self) -> Result<MultiDomainServerState, ChangelogError> {
        Ok(self.read()?.newest.clone())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryChangelogState>, ChangelogError> {
        read_state(&self.state)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryChangelogState>, ChangelogError> {
        self.state.write().map_err(|_| ChangelogError::LockPoisoned)
    }
}

fn read_state(
    state: &RwLock<MemoryChangelogState>,
) -> Result<RwLockReadGuard<'_, MemoryChangelogState>, ChangelogError> {
    state.read().map_err(|_| ChangelogError::LockPoisoned)
}

impl ChangelogDb for MemoryChangelog {
    fn replication_domain_db(&self) -> &dyn ReplicationDomainDb {
        self
    }

    fn change_number_index_db(&self) -> &dyn ChangeNumberIndexDb {
        self
    }
}

impl ReplicationDomainDb for MemoryChangelog {
    fn cursor_from(
        &self,
        start: &MultiDomainServerState,
        options: CursorOptions,
        excluded: &BTreeSet<Dn>,
    ) -> Result<Box<dyn MultiDomainCursor>, ChangelogError> {
        let state = self.read()?;
        let cursor = match options.key_matching {
            KeyMatchingStrategy::GreaterThanOrEqualToKey => {
                let mut bounds = BTreeMap::new();
                let mut position = MultiDomainServerState::new();
                for (domain, server_state) in start.iter() {
                    for csn in server_state.csns() {
                        let bound = match options.positioning {
                            PositionStrategy::OnMatchingKey => Bound::Included(csn),
                            PositionStrategy::AfterMatchingKey => {
                                position.update(domain, csn);
                                Bound::Excluded(csn)
                            }
                        };
                        bounds.insert((domain.clone(), csn.server_id()), bound);
                    }
                }
                MemoryDomainCursor {
                    state: Arc::clone(&self.state),
                    scope: DomainScope::AllExcept(excluded.clone()),
                    bounds,
                    position,
                    current: None,
                }
            }
            KeyMatchingStrategy::LessThanOrEqualToKey => {
                let mut bounds = BTreeMap::new();
                let mut position = MultiDomainServerState::new();
                let mut only = BTreeSet::new();
                for (domain, server_state) in start.iter() {
                    if excluded.contains(domain) {
                        continue;
                    }
                    only.insert(domain.clone());
                    let Some(log) = state.domains.get(domain) else {
                        continue;
                    };
                    let Some(fallback) = server_state.max_csn() else {
                        continue;
                    };
                    for (server_id, replica) in &log.replicas {
                        let reference = server_state.get(*server_id).unwrap_or(fallback);
                        let Some((&csn, _)) = replica.range(..=reference).next_back() else {
                            continue;
                        };
                        position.update(domain, csn);
                        let bound = match options.positioning {
                            PositionStrategy::OnMatchingKey => Bound::Included(csn),
                            PositionStrategy::AfterMatchingKey => Bound::Excluded(csn),
                        };
                        bounds.insert((domain.clone(), *server_id), bound);
                    }
                }
                MemoryDomainCursor {
                    state: Arc::clone(&self.state),
                    scope: DomainScope::Only(only),
                    bounds,
                    position,
                    current: None,
                }
            }
        };
        Ok(Box::new(cursor))
    }

    fn domain_newest_csns(&self, domain: &Dn) -> Result<ServerState, ChangelogError> {
        Ok(self.read()?.newest.get(domain).cloned().unwrap_or_default())
    }

    fn domains(&self) -> Result<Vec<Dn>, ChangelogError> {
        Ok(self.read()?.domains.keys().cloned().collect())
    }
}

impl ChangeNumberIndexDb for MemoryChangelog {
    fn oldest_record(&self) -> Result<Option<ChangeNumberIndexRecord>, ChangelogError> {
        Ok(self.read()?.index.values().next().cloned())
    }

    fn cursor_from(
        &self,
        change_number: i64,
    ) -> Result<Box<dyn DbCursor<ChangeNumberIndexRecord>>, ChangelogError> {
        Ok(Box::new(MemoryIndexCursor {
            state: Arc::clone(&self.state),
            next_from: change_number,
            current: None,
        }))
    }
}

impl ReplicationServer for MemoryChangelog {
    fn is_ecl_enabled(&self, domain: &Dn) -> bool {
        self.read()
            .map(|state| !state.ecl_disabled.contains(domain))
            .unwrap_or(false)
    }

    fn validate_cookie(
        &self,
        cookie: &MultiDomainServerState,
        excluded: &BTreeSet<Dn>,
    ) -> Result<(), CookieValidationError> {
        let state = self
            .read()
            .map_err(|_| CookieValidationError::Unavailable)?;
        for (domain, server_state) in cookie.iter() {
            let log = match state.domains.get(domain) {
                Some(log) if !excluded.contains(domain) => log,
                _ => {
                    return Err(CookieValidationError::UnknownDomain {
                        domain: domain.clone(),
                    })
                }
            };
            for csn in server_state.csns() {
                if let Some(purged) = log.purged.get(csn.server_id()) {
                    if csn < purged {
                        return Err(CookieValidationError::Stale {
                            domain: domain.clone(),
                            csn,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

enum DomainScope {
    AllExcept(BTreeSet<Dn>),
    Only(BTreeSet<Dn>),
}

impl DomainScope {
    fn includes(&self, domain: &Dn) -> bool {
        match self {
            DomainScope::AllExcept(excluded) => !excluded.contains(domain),
            DomainScope::Only(domains) => domains.contains(domain),
        }
    }
}

struct MemoryDomainCursor {
    state: Arc<RwLock<MemoryChangelogState>>,
    scope: DomainScope,
    /// Lower bound of the next record per (domain, replica); absent means the
    /// replica is read from its oldest record.
    bounds: BTreeMap<(Dn, ServerId), Bound<Csn>>,
    position: MultiDomainServerState,
    current: Option<(Dn, UpdateMsg)>,
}

impl MultiDomainCursor for MemoryDomainCursor {
    fn next(&mut self) -> Result<bool, ChangelogError> {
        let found = {
            let state = read_state(&self.state)?;
            let mut best: Option<(&Dn, &UpdateMsg)> = None;
            for (domain, log) in &state.domains {
                if !self.scope.includes(domain) {
                    continue;
                }
                for (server_id, replica) in &log.replicas {
                    let lower = self
                        .bounds
                        .get(&(domain.clone(), *server_id))
                        .copied()
                        .unwrap_or(Bound::Unbounded);
                    let Some((_, msg)) = replica.range((lower, Bound::Unbounded)).next() else {
                        continue;
                    };
                    let better = match best {
                        None => true,
                        Some((best_domain, best_msg)) => {
                            (msg.csn, domain) < (best_msg.csn, best_domain)
                        }
                    };
                    if better {
                        best = Some((domain, msg));
                    }
                }
            }
            best.map(|(domain, msg)| (domain.clone(), msg.clone()))
        };

        match found {
            Some((domain, msg)) => {
                self.bounds.insert(
                    (domain.clone(), msg.csn.server_id()),
                    Bound::Excluded(msg.csn),
                );
                self.position.update(&domain, msg.csn);
                self.current = Some((domain, msg));
                Ok(true)
            }
            None => {
                self.current = None;
                Ok(false)
            }
        }
    }

    fn record(&self) -> Option<&UpdateMsg> {
        self.current.as_ref().map(|(_, msg)| msg)
    }

    fn domain(&self) -> Option<&Dn> {
        self.current.as_ref().map(|(domain, _)| domain)
    }

    fn to_cookie(&self) -> MultiDomainServerState {
        self.position.clone()
    }
}

struct MemoryIndexCursor {
    state: Arc<RwLock<MemoryChangelogState>>,
    next_from: i64,
    current: Option<ChangeNumberIndexRecord>,
}

impl DbCursor<ChangeNumberIndexRecord> for MemoryIndexCursor {
    fn next(&mut self) -> Result<bool, ChangelogError> {
        let state = read_state(&self.state)?;
        self.current = state.index.range(self.next_from..).next().map(|(_, r)| r.clone());
        if let Some(record) = &self.current {
            self.next_from = record.change_number.saturating_add(1);
        }
        Ok(self.current.is_some())
    }

    fn record(&self) -> Option<&ChangeNumberIndexRecord> {
        self.current.as_ref()
    }
}
