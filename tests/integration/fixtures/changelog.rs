#![allow(dead_code)]

//! In-memory changelog plus a backend wired to it, and a write path that
//! commits then notifies the way a replication server does.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam::channel::Receiver;
use ecl_backend::backend::{
    ChangelogBackend, SearchError, SearchOperation, SearchOutcome, SearchRequest,
    SearchResultEntry,
};
use ecl_backend::changelog::{Committed, MemoryChangelog};
use ecl_backend::config::BackendConfig;
use ecl_backend::core::{Csn, Dn, SearchFilter, SearchScope, ServerId, UpdateMsg};

/// 2014-09-23T12:34:56Z
const BASE_TIMESTAMP_MS: u64 = 1_411_475_696_000;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ChangelogFixture {
    pub log: MemoryChangelog,
    pub backend: ChangelogBackend,
    /// Serializes commit + notify so CSNs, change numbers and notifications
    /// all follow commit order.
    clock: Mutex<u64>,
    next_search_id: AtomicU64,
}

impl ChangelogFixture {
    pub fn new() -> Self {
        Self::with_config(BackendConfig::default())
    }

    pub fn with_config(config: BackendConfig) -> Self {
        let log = MemoryChangelog::new();
        let backend = ChangelogBackend::new(config, Arc::new(log.clone()), Arc::new(log.clone()));
        Self {
            log,
            backend,
            clock: Mutex::new(0),
            next_search_id: AtomicU64::new(1),
        }
    }

    /// Commits a delete of a fresh entry on `server` in `domain`.
    pub fn write(&self, domain: &Dn, server: u16) -> UpdateMsg {
        let mut clock = self.clock.lock().expect("clock");
        *clock += 1;
        let csn = Csn::new(BASE_TIMESTAMP_MS + *clock, 0, ServerId::new(server));
        let target = dn(&format!("uid=user{},ou=people", *clock)).under(domain);
        let msg = UpdateMsg::delete(csn, target, Some("cn=Directory Manager".to_string()));
        self.commit_and_notify(domain, msg.clone());
        msg
    }

    pub fn write_many(&self, domain: &Dn, server: u16, count: usize) -> Vec<UpdateMsg> {
        (0..count).map(|_| self.write(domain, server)).collect()
    }

    /// Commits a caller-built message. Its CSN must be newer than the last one
    /// committed by the same replica.
    pub fn commit(&self, domain: &Dn, msg: UpdateMsg) -> Committed {
        let _clock = self.clock.lock().expect("clock");
        self.commit_and_notify(domain, msg)
    }

    /// Commits then notifies without serializing against other writers, the
    /// way independent replicas do.
    pub fn commit_and_notify(&self, domain: &Dn, msg: UpdateMsg) -> Committed {
        let committed = self.log.append(domain, msg.clone()).expect("append");
        self.backend.notify_cookie_entry_added(domain, &msg);
        self.backend.notify_change_number_entry_added(
            domain,
            committed.record.change_number,
            &committed.cookie,
            &msg,
        );
        committed
    }

    pub fn operation(
        &self,
        request: SearchRequest,
    ) -> (Arc<SearchOperation>, Receiver<SearchResultEntry>) {
        let id = self.next_search_id.fetch_add(1, Ordering::Relaxed);
        SearchOperation::new(id, request)
    }

    /// Runs a search and returns what it sent before returning.
    pub fn search(
        &self,
        request: SearchRequest,
    ) -> Result<(SearchOutcome, Vec<SearchResultEntry>), SearchError> {
        let (op, rx) = self.operation(request);
        let outcome = self.backend.search(&op)?;
        Ok((outcome, rx.try_iter().collect()))
    }
}

/// Delete of a fresh entry in `domain` with a caller-chosen CSN.
pub fn delete_at(domain: &Dn, offset_ms: u64, server: u16) -> UpdateMsg {
    let csn = Csn::new(BASE_TIMESTAMP_MS + offset_ms, 0, ServerId::new(server));
    let target = dn(&format!("uid=s{server}t{offset_ms},ou=people")).under(domain);
    UpdateMsg::delete(csn, target, None)
}

pub fn dn(raw: &str) -> Dn {
    Dn::parse(raw).expect("dn")
}

pub fn root() -> Dn {
    dn("cn=changelog")
}

/// Subtree search of the changelog root with `filter`.
pub fn request(filter: &str) -> SearchRequest {
    SearchRequest::new(
        root(),
        SearchScope::WholeSubtree,
        SearchFilter::parse(filter).expect("filter"),
    )
}

/// Matches change entries but not the root entry.
pub const CHANGES_ONLY_FILTER: &str = "(changeType=*)";

pub fn change_numbers(entries: &[SearchResultEntry]) -> Vec<i64> {
    entries
        .iter()
        .map(|e| {
            e.entry
                .first_value("changeNumber")
                .expect("changeNumber")
                .parse()
                .expect("numeric change number")
        })
        .collect()
}

pub fn csns(entries: &[SearchResultEntry]) -> Vec<Csn> {
    entries
        .iter()
        .map(|e| Csn::parse(e.entry.first_value("replicationCSN").expect("csn")).expect("csn"))
        .collect()
}

pub fn msg_csns(msgs: &[UpdateMsg]) -> Vec<Csn> {
    msgs.iter().map(|msg| msg.csn).collect()
}

/// Receives exactly `count` entries, failing on timeout.
pub fn recv_n(rx: &Receiver<SearchResultEntry>, count: usize) -> Vec<SearchResultEntry> {
    (0..count)
        .map(|idx| {
            rx.recv_timeout(RECV_TIMEOUT)
                .unwrap_or_else(|err| panic!("entry {idx} of {count}: {err}"))
        })
        .collect()
}

/// Asserts nothing more arrives within a short grace period.
pub fn assert_quiet(rx: &Receiver<SearchResultEntry>) {
    let extra = rx.recv_timeout(Duration::from_millis(100));
    assert!(extra.is_err(), "unexpected entry: {extra:?}");
}
