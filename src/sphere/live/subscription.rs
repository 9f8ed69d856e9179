//! Subscription handles and mount tracking
//!
//! A realtime subscription is the one resource a view must release
//! explicitly: a leaked subscription keeps delivering events into a view
//! that has been replaced, which shows up as duplicate handling.

use crate::sphere::live::event::ChangeEvent;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

type Release = Box<dyn FnOnce() + Send + 'static>;

/// Releases the remote side of a subscription exactly once
pub struct SubscriptionGuard {
    id: u64,
    table: String,
    release: Option<Release>,
}

impl SubscriptionGuard {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn is_open(&self) -> bool {
        self.release.is_some()
    }

    /// Closes the subscription; later calls are no-ops
    pub fn close(&mut self) {
        if let Some(release) = self.release.take() {
            debug!("[Subscription] close #{} on {}", self.id, self.table);
            release();
        }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for SubscriptionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionGuard")
            .field("id", &self.id)
            .field("table", &self.table)
            .field("open", &self.is_open())
            .finish()
    }
}

/// An open subscription: a stream of change events plus its guard
pub struct Subscription {
    events: mpsc::UnboundedReceiver<ChangeEvent>,
    guard: SubscriptionGuard,
}

impl Subscription {
    pub fn new(
        id: u64,
        table: impl Into<String>,
        events: mpsc::UnboundedReceiver<ChangeEvent>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            events,
            guard: SubscriptionGuard {
                id,
                table: table.into(),
                release: Some(Box::new(release)),
            },
        }
    }

    pub fn id(&self) -> u64 {
        self.guard.id
    }

    /// Next event; `None` once the feed side is gone
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }

    pub fn close(mut self) {
        self.guard.close();
    }

    /// Splits into the event stream and the guard so the stream can be
    /// moved into a pump task while the owner keeps the guard.
    pub fn into_parts(self) -> (mpsc::UnboundedReceiver<ChangeEvent>, SubscriptionGuard) {
        (self.events, self.guard)
    }
}

/// Tracks whether results of an async operation still belong to the current
/// mount of a view.
///
/// Each mount takes a new epoch; an operation captures the epoch it started
/// under and applies its result only if that epoch is still current.
#[derive(Debug, Clone, Default)]
pub struct MountEpoch {
    current: Arc<AtomicU64>,
}

/// Zero is reserved for "not mounted"
const UNMOUNTED: u64 = 0;

impl MountEpoch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new mount and returns its epoch
    pub fn begin(&self) -> u64 {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        let epoch = NEXT.fetch_add(1, Ordering::Relaxed);
        self.current.store(epoch, Ordering::SeqCst);
        epoch
    }

    pub fn end(&self) {
        self.current.store(UNMOUNTED, Ordering::SeqCst);
    }

    pub fn is_current(&self, epoch: u64) -> bool {
        epoch != UNMOUNTED && self.current.load(Ordering::SeqCst) == epoch
    }

    pub fn is_mounted(&self) -> bool {
        self.current.load(Ordering::SeqCst) != UNMOUNTED
    }
}
