// ── Reactive fleet streams ──
//
// Subscription types for consuming state changes from the DataStore.

mod filter;

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::store::FleetState;

pub use filter::{AlarmFilter, DeviceFilter};

/// A subscription to the fleet state.
///
/// Provides both point-in-time snapshot access and change notification
/// via `changed()` or by converting into a `Stream`. Ends when the store
/// is closed.
pub struct FleetStream {
    current: Arc<FleetState>,
    receiver: watch::Receiver<Arc<FleetState>>,
    closed: Arc<AtomicBool>,
}

impl FleetStream {
    pub(crate) fn new(receiver: watch::Receiver<Arc<FleetState>>, closed: Arc<AtomicBool>) -> Self {
        let current = receiver.borrow().clone();
        Self {
            current,
            receiver,
            closed,
        }
    }

    /// The snapshot seen most recently through this stream.
    pub fn current(&self) -> &Arc<FleetState> {
        &self.current
    }

    /// The latest snapshot, whether or not it has been observed yet.
    pub fn latest(&self) -> Arc<FleetState> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change, returning the new snapshot.
    /// Returns `None` once the store is closed or dropped.
    pub async fn changed(&mut self) -> Option<Arc<FleetState>> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        self.receiver.changed().await.ok()?;
        let snap = self.receiver.borrow_and_update().clone();
        self.current = Arc::clone(&snap);
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        Some(snap)
    }

    /// Convert into a `Stream` for use with `StreamExt` combinators.
    ///
    /// The first item is the current snapshot.
    pub fn into_stream(self) -> FleetWatchStream {
        FleetWatchStream {
            inner: WatchStream::new(self.receiver),
            closed: self.closed,
        }
    }
}

/// `Stream` adapter backed by a `watch::Receiver`.
pub struct FleetWatchStream {
    inner: WatchStream<Arc<FleetState>>,
    closed: Arc<AtomicBool>,
}

impl Stream for FleetWatchStream {
    type Item = Arc<FleetState>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.closed.load(Ordering::Acquire) {
            return Poll::Ready(None);
        }
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(_)) if self.closed.load(Ordering::Acquire) => Poll::Ready(None),
            other => other,
        }
    }
}
