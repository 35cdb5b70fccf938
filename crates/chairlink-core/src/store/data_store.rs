// ── Central reactive data store ──
//
// Owns the single current `FleetState`. Every mutation is a `FleetEvent`
// run through the reducer while the watch channel's write lock is held,
// so dispatches are serialized and readers always see a whole state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::debug;

use super::reducer::{FleetEvent, FleetState, Outcome, Reduction, reduce};
use crate::model::{Alarm, Device};
use crate::stream::{AlarmFilter, DeviceFilter, FleetStream};

/// Central reactive store for one session's view of the fleet.
///
/// Reads are cheap `Arc` clones. Once closed, every dispatch is ignored
/// and subscribers see their streams end.
pub struct DataStore {
    state: watch::Sender<Arc<FleetState>>,
    closed: Arc<AtomicBool>,
    last_error: watch::Sender<Option<String>>,
}

impl DataStore {
    pub fn new() -> Self {
        let (state, _) = watch::channel(Arc::new(FleetState::new()));
        let (last_error, _) = watch::channel(None);

        Self {
            state,
            closed: Arc::new(AtomicBool::new(false)),
            last_error,
        }
    }

    // ── Mutation ─────────────────────────────────────────────────────

    /// Run one event through the reducer.
    ///
    /// Returns `None` when the store is closed; the event is discarded.
    pub fn dispatch(&self, event: FleetEvent) -> Option<Outcome> {
        let mut outcome = None;

        self.state.send_if_modified(|current| {
            if self.closed.load(Ordering::Acquire) {
                return false;
            }
            let Reduction { state, outcome: o } = reduce(FleetState::clone(current), event);
            let notify = o.changed();
            *current = Arc::new(state);
            outcome = Some(o);
            notify
        });

        if outcome.is_none() {
            debug!("store closed; discarding event");
        }
        outcome
    }

    /// Stop accepting events and wake every subscriber.
    ///
    /// The flag flips under the same lock `dispatch` takes, so no event
    /// can land after this returns.
    pub fn close(&self) {
        self.state.send_modify(|_| {
            self.closed.store(true, Ordering::Release);
        });
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // ── Soft errors ──────────────────────────────────────────────────

    /// Remember the most recent refresh failure for display.
    pub fn record_error(&self, message: impl Into<String>) {
        self.last_error.send_replace(Some(message.into()));
    }

    pub fn clear_error(&self) {
        self.last_error.send_replace(None);
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.borrow().clone()
    }

    // ── Snapshot accessors ───────────────────────────────────────────

    pub fn snapshot(&self) -> Arc<FleetState> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> FleetStream {
        FleetStream::new(self.state.subscribe(), Arc::clone(&self.closed))
    }

    pub fn devices(&self, filter: &DeviceFilter) -> Vec<Device> {
        self.snapshot()
            .devices()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect()
    }

    /// Matching alarms, newest first.
    pub fn alarms(&self, filter: &AlarmFilter) -> Vec<Alarm> {
        let mut alarms: Vec<Alarm> = self
            .snapshot()
            .alarms()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        alarms.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        alarms
    }

    pub fn device_count(&self) -> usize {
        self.state.borrow().device_count()
    }

    pub fn last_snapshot(&self) -> Option<DateTime<Utc>> {
        self.state.borrow().last_snapshot()
    }
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new()
    }
}
