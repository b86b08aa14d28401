//! Change-number-mode delivery: the global change-number index drives the
//! scan and each index record is resolved against the replica logs.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::changelog::{
    ChangeNumberIndexRecord, ChangelogDb, CursorOptions, DbCursor, EclMultiDomainCursor,
    MultiDomainCursor, ReplicationServer,
};
use crate::core::{Csn, Dn, Entry, MultiDomainServerState};

use super::entry_builder::create_entry_from_msg;
use super::error::SearchError;
use super::gate::{CompleteOnDrop, DeliveryGate, SearchPhase};
use super::range::ChangeNumberRange;
use super::search::SearchOperation;

/// Change number used when the index is empty.
const CHANGE_NUMBER_FOR_EMPTY_CURSOR: i64 = 0;

pub struct ChangeNumberEntrySender {
    op: Arc<SearchOperation>,
    root: Dn,
    excluded: BTreeSet<Dn>,
    range: ChangeNumberRange,
    gate: DeliveryGate<i64>,
}

/// Cursors and display cookie of one scan; both passes share them.
struct ScanState {
    index: Box<dyn DbCursor<ChangeNumberIndexRecord>>,
    updates: Option<Box<dyn MultiDomainCursor>>,
    cookie: MultiDomainServerState,
}

enum Lookup {
    Found,
    /// The log is already past the record's CSN.
    Passed,
    /// The log ran out before reaching the record's CSN.
    Exhausted { last: Option<Csn> },
}

impl ChangeNumberEntrySender {
    pub fn new(
        op: Arc<SearchOperation>,
        root: Dn,
        excluded: BTreeSet<Dn>,
        range: ChangeNumberRange,
        start_phase: SearchPhase,
    ) -> Self {
        Self {
            op,
            root,
            excluded,
            range,
            gate: DeliveryGate::new(start_phase),
        }
    }

    pub fn operation(&self) -> &Arc<SearchOperation> {
        &self.op
    }

    pub fn range(&self) -> ChangeNumberRange {
        self.range
    }

    pub fn phase(&self) -> SearchPhase {
        self.gate.phase()
    }

    /// Sends every indexed change within the range, then hands off to live
    /// delivery.
    pub fn initial_search(
        &self,
        changelog: &dyn ChangelogDb,
        server: Arc<dyn ReplicationServer>,
    ) -> Result<(), SearchError> {
        let _complete = CompleteOnDrop::new(|| self.gate.complete_transition());

        let start = self.start_change_number(changelog)?;
        tracing::debug!(
            search_id = self.op.id(),
            start,
            upper_bound = self.range.upper_bound,
            "change number scan started"
        );
        let mut scan = ScanState {
            index: changelog.change_number_index_db().cursor_from(start)?,
            updates: None,
            cookie: MultiDomainServerState::new(),
        };

        if !self.send_index_entries(&mut scan, changelog, &server)? {
            return Ok(());
        }
        self.gate.begin_transition();
        self.send_index_entries(&mut scan, changelog, &server)?;
        tracing::debug!(
            search_id = self.op.id(),
            last = ?self.gate.last_sent_by_initial_scan(),
            "change number scan finished"
        );
        Ok(())
    }

    /// Live delivery of an entry already rendered for `change_number`.
    pub fn notify_entry_added(&self, change_number: i64, entry: &Entry) {
        if self.op.is_done() {
            return;
        }
        if self.gate.can_deliver_live(&change_number, self.op.cancellation())
            && self.op.matches(entry)
        {
            self.op.return_entry(entry.clone(), None);
        }
    }

    fn start_change_number(&self, changelog: &dyn ChangelogDb) -> Result<i64, SearchError> {
        if self.range.lower_bound > 1 {
            return Ok(self.range.lower_bound);
        }
        Ok(changelog
            .change_number_index_db()
            .oldest_record()?
            .map_or(CHANGE_NUMBER_FOR_EMPTY_CURSOR, |record| record.change_number))
    }

    fn send_index_entries(
        &self,
        scan: &mut ScanState,
        changelog: &dyn ChangelogDb,
        server: &Arc<dyn ReplicationServer>,
    ) -> Result<bool, SearchError> {
        while scan.index.next()? {
            let Some(record) = scan.index.record().cloned() else {
                continue;
            };
            if self.range.is_beyond_upper_bound(record.change_number) {
                return Ok(false);
            }

            self.gate.record_initial_scan_delivery(record.change_number);
            if !self.is_exposed(&record.base_dn, &**server) {
                continue;
            }

            if scan.updates.is_some() {
                scan.cookie.update(&record.base_dn, record.csn);
            } else {
                scan.cookie = Self::initial_cookie(&record, changelog, server)?;
                scan.updates = Some(Self::open_updates_cursor(&record, changelog)?);
            }
            let Some(updates) = scan.updates.as_mut() else {
                continue;
            };

            let mut lookup = find_replica_update(&record, updates.as_mut())?;
            if !matches!(lookup, Lookup::Found) {
                // Committed after a newer change of another replica: the
                // shared cursor may already be past it.
                *updates = Self::open_updates_cursor(&record, changelog)?;
                lookup = find_replica_update(&record, updates.as_mut())?;
            }
            match lookup {
                Lookup::Passed => {
                    tracing::debug!(
                        change_number = record.change_number,
                        csn = %record.csn,
                        "replica update no longer in the log, skipping"
                    );
                }
                Lookup::Exhausted { last } => {
                    let err = SearchError::MissingReplicaUpdate {
                        change_number: record.change_number,
                        index_csn: record.csn,
                        last_csn: last.map_or_else(|| "none".to_string(), |csn| csn.to_string()),
                    };
                    tracing::error!(domain = %record.base_dn, "{err}");
                    return Err(err);
                }
                Lookup::Found => {
                    let keep_going = match updates.record() {
                        Some(msg) => {
                            let entry = create_entry_from_msg(
                                &self.root,
                                &record.base_dn,
                                record.change_number,
                                &scan.cookie.to_string(),
                                msg,
                            )?;
                            if self.op.matches(&entry) {
                                self.op.return_entry(entry, None)
                            } else {
                                !self.op.is_done()
                            }
                        }
                        None => true,
                    };
                    updates.next()?;
                    if !keep_going {
                        return Ok(false);
                    }
                }
            }
        }
        Ok(true)
    }

    /// Same rule live notifications follow: excluded domains and domains
    /// with the external changelog disabled stay hidden.
    fn is_exposed(&self, domain: &Dn, server: &dyn ReplicationServer) -> bool {
        !self.excluded.contains(domain) && server.is_ecl_enabled(domain)
    }

    /// Cursor over every domain's log, positioned on `record`.
    fn open_updates_cursor(
        record: &ChangeNumberIndexRecord,
        changelog: &dyn ChangelogDb,
    ) -> Result<Box<dyn MultiDomainCursor>, SearchError> {
        let mut start = MultiDomainServerState::new();
        start.update(&record.base_dn, record.csn);
        let mut cursor = changelog.replication_domain_db().cursor_from(
            &start,
            CursorOptions::FROM_KEY,
            &Default::default(),
        )?;
        cursor.next()?;
        Ok(cursor)
    }

    /// Cookie as of `record`: its own CSN plus the newest position at or
    /// before it of every other replica of the domain.
    fn initial_cookie(
        record: &ChangeNumberIndexRecord,
        changelog: &dyn ChangelogDb,
        server: &Arc<dyn ReplicationServer>,
    ) -> Result<MultiDomainServerState, SearchError> {
        let mut cookie = MultiDomainServerState::new();
        cookie.update(&record.base_dn, record.csn);
        let cursor = changelog.replication_domain_db().cursor_from(
            &cookie,
            CursorOptions::AT_OR_BEFORE_KEY,
            &Default::default(),
        )?;
        let mut cursor = EclMultiDomainCursor::new(cursor, Arc::clone(server));
        cursor.next()?;
        cookie.merge(&cursor.to_cookie());
        Ok(cookie)
    }
}

/// Advances `updates` until it reaches or passes the message `record`
/// points to.
fn find_replica_update(
    record: &ChangeNumberIndexRecord,
    updates: &mut dyn MultiDomainCursor,
) -> Result<Lookup, SearchError> {
    loop {
        let current = updates.record().map(|msg| msg.csn);
        match current {
            Some(csn) if record.csn < csn => return Ok(Lookup::Passed),
            Some(csn) if record.csn == csn => return Ok(Lookup::Found),
            _ => {}
        }
        if !updates.next()? {
            return Ok(Lookup::Exhausted { last: current });
        }
    }
}
