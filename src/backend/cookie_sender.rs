//! Cookie-mode delivery: changes are keyed by (domain, replica) and every
//! entry carries the cookie a client resumes from.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::changelog::{
    CursorOptions, EclMultiDomainCursor, MultiDomainCursor, ReplicationDomainDb,
    ReplicationServer,
};
use crate::core::{Csn, Dn, MultiDomainServerState, ReplicaId, UpdateMsg};

use super::entry_builder::create_entry_from_msg;
use super::error::SearchError;
use super::gate::{CompleteOnDrop, DeliveryGate, SearchPhase};
use super::search::SearchOperation;

pub struct CookieEntrySender {
    op: Arc<SearchOperation>,
    root: Dn,
    excluded: BTreeSet<Dn>,
    gates: Mutex<GateTable>,
    cookie: Mutex<MultiDomainServerState>,
}

/// Per-replica gates plus the phase any newly created gate starts in. Mass
/// phase changes and gate creation both happen under this table's lock.
struct GateTable {
    phase: SearchPhase,
    by_replica: BTreeMap<ReplicaId, Arc<DeliveryGate<Csn>>>,
}

impl CookieEntrySender {
    pub fn new(
        op: Arc<SearchOperation>,
        root: Dn,
        excluded: BTreeSet<Dn>,
        start_phase: SearchPhase,
        cookie: MultiDomainServerState,
    ) -> Self {
        Self {
            op,
            root,
            excluded,
            gates: Mutex::new(GateTable {
                phase: start_phase,
                by_replica: BTreeMap::new(),
            }),
            cookie: Mutex::new(cookie),
        }
    }

    pub fn operation(&self) -> &Arc<SearchOperation> {
        &self.op
    }

    pub fn phase(&self) -> SearchPhase {
        self.lock_gates().phase
    }

    /// Current cookie, as it would be attached to the next entry.
    pub fn cookie(&self) -> MultiDomainServerState {
        self.cookie
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sends every change after the cookie, then hands off to live delivery.
    pub fn initial_search(
        &self,
        db: &dyn ReplicationDomainDb,
        server: Arc<dyn ReplicationServer>,
    ) -> Result<(), SearchError> {
        let _complete = CompleteOnDrop::new(|| self.complete_transition());

        let start = self.cookie();
        let cursor = db.cursor_from(&start, CursorOptions::AFTER_COOKIE, &self.excluded)?;
        let mut cursor = EclMultiDomainCursor::new(cursor, server);
        tracing::debug!(search_id = self.op.id(), cookie = %start, "cookie scan started");

        if !self.send_cursor_entries(&mut cursor)? {
            return Ok(());
        }
        self.begin_transition();
        self.send_cursor_entries(&mut cursor)?;
        tracing::debug!(search_id = self.op.id(), "cookie scan finished");
        Ok(())
    }

    /// Live delivery of a change committed to `domain`.
    pub fn notify_entry_added(&self, domain: &Dn, msg: &UpdateMsg) -> Result<(), SearchError> {
        if self.op.is_done() {
            return Ok(());
        }
        let gate = self.gate(ReplicaId::new(domain.clone(), msg.csn.server_id()));
        if !gate.can_deliver_live(&msg.csn, self.op.cancellation()) {
            return Ok(());
        }
        let cookie = self.fold_and_snapshot(domain, msg.csn);
        let entry = create_entry_from_msg(&self.root, domain, 0, &cookie, msg)?;
        if self.op.matches(&entry) {
            self.op.return_entry(entry, Some(cookie));
        }
        Ok(())
    }

    fn send_cursor_entries(&self, cursor: &mut dyn MultiDomainCursor) -> Result<bool, SearchError> {
        while cursor.next()? {
            let (Some(domain), Some(msg)) = (cursor.domain(), cursor.record()) else {
                continue;
            };
            let gate = self.gate(ReplicaId::new(domain.clone(), msg.csn.server_id()));
            gate.record_initial_scan_delivery(msg.csn);
            let cookie = self.fold_and_snapshot(domain, msg.csn);
            let entry = create_entry_from_msg(&self.root, domain, 0, &cookie, msg)?;
            let keep_going = if self.op.matches(&entry) {
                self.op.return_entry(entry, Some(cookie))
            } else {
                !self.op.is_done()
            };
            if !keep_going {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn gate(&self, replica: ReplicaId) -> Arc<DeliveryGate<Csn>> {
        let mut table = self.lock_gates();
        let phase = table.phase;
        Arc::clone(
            table
                .by_replica
                .entry(replica)
                .or_insert_with(|| Arc::new(DeliveryGate::new(phase))),
        )
    }

    fn begin_transition(&self) {
        let mut table = self.lock_gates();
        if table.phase == SearchPhase::Initial {
            table.phase = SearchPhase::Transitioning;
        }
        for gate in table.by_replica.values() {
            gate.begin_transition();
        }
    }

    fn complete_transition(&self) {
        let mut table = self.lock_gates();
        table.phase = SearchPhase::Persistent;
        for gate in table.by_replica.values() {
            gate.complete_transition();
        }
    }

    fn fold_and_snapshot(&self, domain: &Dn, csn: Csn) -> String {
        let mut cookie = self.cookie.lock().unwrap_or_else(PoisonError::into_inner);
        cookie.update(domain, csn);
        cookie.to_string()
    }

    fn lock_gates(&self) -> MutexGuard<'_, GateTable> {
        self.gates.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
