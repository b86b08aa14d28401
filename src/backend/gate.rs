//! Hand-off between a search's initial scan and live notifications.
//!
//! A gate tracks one stream of keys (one replica in cookie mode, the global
//! change number otherwise). The scan records what it sent; once it has
//! finished, live callers deliver only keys strictly after that point. Live
//! callers arriving while the scan is finishing wait for it.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crossbeam::channel::{Receiver, Sender};

use super::search::CancellationToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SearchPhase {
    /// The initial scan owns delivery.
    Initial,
    /// The scan is re-polling for stragglers; live callers wait.
    Transitioning,
    /// Live notifications own delivery.
    Persistent,
}

#[derive(Debug)]
pub struct DeliveryGate<K> {
    state: Mutex<GateState<K>>,
    released: Receiver<()>,
}

#[derive(Debug)]
struct GateState<K> {
    phase: SearchPhase,
    last_sent_by_initial_scan: Option<K>,
    /// Dropped exactly once, on entering `Persistent`.
    release: Option<Sender<()>>,
}

impl<K: Ord + Clone> DeliveryGate<K> {
    pub fn new(start_phase: SearchPhase) -> Self {
        let (release, released) = crossbeam::channel::bounded(0);
        let release = (start_phase != SearchPhase::Persistent).then_some(release);
        Self {
            state: Mutex::new(GateState {
                phase: start_phase,
                last_sent_by_initial_scan: None,
                release,
            }),
            released,
        }
    }

    pub fn phase(&self) -> SearchPhase {
        self.lock().phase
    }

    /// Called by the scan before it emits (or skips past) `key`.
    pub fn record_initial_scan_delivery(&self, key: K) {
        let mut state = self.lock();
        debug_assert!(
            state
                .last_sent_by_initial_scan
                .as_ref()
                .is_none_or(|last| *last < key),
            "initial scan keys must strictly increase"
        );
        state.last_sent_by_initial_scan = Some(key);
    }

    pub fn last_sent_by_initial_scan(&self) -> Option<K> {
        self.lock().last_sent_by_initial_scan.clone()
    }

    pub fn begin_transition(&self) {
        let mut state = self.lock();
        if state.phase == SearchPhase::Initial {
            state.phase = SearchPhase::Transitioning;
        }
    }

    /// Enters `Persistent` and wakes every waiting live caller.
    pub fn complete_transition(&self) {
        let mut state = self.lock();
        state.phase = SearchPhase::Persistent;
        state.release.take();
    }

    /// Whether a live notification for `key` should be delivered.
    ///
    /// Blocks while the scan is transitioning; returns `false` if `cancel`
    /// fires first.
    pub fn can_deliver_live(&self, key: &K, cancel: &CancellationToken) -> bool {
        {
            let state = self.lock();
            match state.phase {
                SearchPhase::Initial => return false,
                SearchPhase::Persistent => return Self::after_scan(&state, key),
                SearchPhase::Transitioning => {}
            }
        }

        crossbeam::select! {
            recv(self.released) -> _ => {}
            recv(cancel.receiver()) -> _ => return false,
        }
        if cancel.is_cancelled() {
            return false;
        }
        let state = self.lock();
        Self::after_scan(&state, key)
    }

    fn after_scan(state: &GateState<K>, key: &K) -> bool {
        state
            .last_sent_by_initial_scan
            .as_ref()
            .is_none_or(|last| key > last)
    }

    fn lock(&self) -> MutexGuard<'_, GateState<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Runs `complete` when dropped, including on early return and unwind.
pub(super) struct CompleteOnDrop<F: FnMut()> {
    complete: F,
}

impl<F: FnMut()> CompleteOnDrop<F> {
    pub(super) fn new(complete: F) -> Self {
        Self { complete }
    }
}

impl<F: FnMut()> Drop for CompleteOnDrop<F> {
    fn drop(&mut self) {
        (self.complete)();
    }
}
