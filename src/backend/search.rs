//! Search requests, the per-search handle entries are returned through, and
//! cancellation.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, Sender};

use crate::core::{Dn, Entry, MultiDomainServerState, SearchFilter, SearchScope};

use super::error::ResultCode;

/// Privileges of the requesting client that matter to changelog searches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Privileges {
    pub changelog_read: bool,
}

impl Privileges {
    pub fn changelog_reader() -> Self {
        Self {
            changelog_read: true,
        }
    }
}

/// Persistent search control. With `changes_only` the initial scan is skipped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PersistentSearch {
    pub changes_only: bool,
}

#[derive(Clone, Debug)]
pub struct SearchRequest {
    pub base_dn: Dn,
    pub scope: SearchScope,
    pub filter: SearchFilter,
    /// Maximum entries returned; 0 means unlimited.
    pub size_limit: usize,
    pub time_limit: Option<Duration>,
    /// Cookie control. Present (even empty) selects cookie mode.
    pub cookie: Option<MultiDomainServerState>,
    pub persistent: Option<PersistentSearch>,
    pub privileges: Privileges,
}

impl SearchRequest {
    pub fn new(base_dn: Dn, scope: SearchScope, filter: SearchFilter) -> Self {
        Self {
            base_dn,
            scope,
            filter,
            size_limit: 0,
            time_limit: None,
            cookie: None,
            persistent: None,
            privileges: Privileges::changelog_reader(),
        }
    }

    pub fn with_size_limit(mut self, size_limit: usize) -> Self {
        self.size_limit = size_limit;
        self
    }

    pub fn with_time_limit(mut self, time_limit: Duration) -> Self {
        self.time_limit = Some(time_limit);
        self
    }

    pub fn with_cookie(mut self, cookie: MultiDomainServerState) -> Self {
        self.cookie = Some(cookie);
        self
    }

    pub fn persistent(mut self, changes_only: bool) -> Self {
        self.persistent = Some(PersistentSearch { changes_only });
        self
    }

    pub fn with_privileges(mut self, privileges: Privileges) -> Self {
        self.privileges = privileges;
        self
    }

    pub fn is_cookie_mode(&self) -> bool {
        self.cookie.is_some()
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent.is_some()
    }

    pub fn is_changes_only(&self) -> bool {
        self.persistent.is_some_and(|ps| ps.changes_only)
    }
}

/// An entry as returned to the client. In cookie mode `cookie` carries the
/// entry-changelog-notification control value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchResultEntry {
    pub entry: Entry,
    pub cookie: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SearchOutcome {
    pub result_code: ResultCode,
    pub entries_sent: usize,
}

/// Cancellation shared by a search and everyone delivering to it.
///
/// `receiver()` disconnects on cancel so it can be waited on in
/// `crossbeam::select!` alongside other channels.
#[derive(Clone, Debug)]
pub struct CancellationToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug)]
struct CancelInner {
    cancelled: AtomicBool,
    trigger: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (trigger, signal) = crossbeam::channel::bounded(0);
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                trigger: Mutex::new(Some(trigger)),
                signal,
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        let mut trigger = self
            .inner
            .trigger
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        trigger.take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    pub fn receiver(&self) -> &Receiver<()> {
        &self.inner.signal
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// A running search: its request, the channel entries are returned on, and
/// its size/time budget.
#[derive(Debug)]
pub struct SearchOperation {
    id: u64,
    request: SearchRequest,
    entries: Sender<SearchResultEntry>,
    sent: AtomicUsize,
    started: Instant,
    cancel: CancellationToken,
    limit_reached: OnceLock<ResultCode>,
}

impl SearchOperation {
    pub fn new(id: u64, request: SearchRequest) -> (Arc<Self>, Receiver<SearchResultEntry>) {
        let (entries, receiver) = crossbeam::channel::unbounded();
        let op = Arc::new(Self {
            id,
            request,
            entries,
            sent: AtomicUsize::new(0),
            started: Instant::now(),
            cancel: CancellationToken::new(),
            limit_reached: OnceLock::new(),
        });
        (op, receiver)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn request(&self) -> &SearchRequest {
        &self.request
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancelled, or a size or time limit was reached.
    pub fn is_done(&self) -> bool {
        self.is_cancelled() || self.limit_reached.get().is_some()
    }

    pub fn entries_sent(&self) -> usize {
        self.sent.load(Ordering::Acquire)
    }

    /// Whether `entry` is within the search base and scope and matches the
    /// filter.
    pub fn matches(&self, entry: &Entry) -> bool {
        entry
            .dn()
            .matches_base_and_scope(&self.request.base_dn, self.request.scope)
            && self.request.filter.matches(entry)
    }

    /// Hands `entry` to the client. Returns `false` once the search must stop
    /// sending: cancelled, the client went away, or a limit was reached.
    pub fn return_entry(&self, entry: Entry, cookie: Option<String>) -> bool {
        if self.is_done() {
            return false;
        }
        if let Some(limit) = self.request.time_limit {
            if self.started.elapsed() >= limit {
                let _ = self.limit_reached.set(ResultCode::TimeLimitExceeded);
                return false;
            }
        }
        let size_limit = self.request.size_limit;
        let reserved = self
            .sent
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |sent| {
                (size_limit == 0 || sent < size_limit).then_some(sent + 1)
            });
        if reserved.is_err() {
            let _ = self.limit_reached.set(ResultCode::SizeLimitExceeded);
            return false;
        }
        if self.entries.send(SearchResultEntry { entry, cookie }).is_err() {
            tracing::debug!(search_id = self.id, "client went away, cancelling search");
            self.cancel.cancel();
            return false;
        }
        true
    }

    pub fn outcome(&self) -> SearchOutcome {
        let result_code = match self.limit_reached.get() {
            Some(code) => *code,
            None if self.is_cancelled() => ResultCode::Cancelled,
            None => ResultCode::Success,
        };
        SearchOutcome {
            result_code,
            entries_sent: self.entries_sent(),
        }
    }
}
