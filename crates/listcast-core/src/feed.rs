//! Capabilities a session consumes
//!
//! A session needs two things from its backend:
//! - ListSource: answers "what is the full current state?" on demand
//! - Watcher: says "the state may have changed" whenever it might have
//!
//! Both are shared by every session watching the same resource list, so
//! they must tolerate concurrent use.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::protocol::Collection;

/// Errors produced by a listing source
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The backend could not produce the current state
    #[error("listing failed: {0}")]
    List(String),

    /// The snapshot could not be turned into a wire payload
    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A full-state value that can be compared against the previous one
///
/// Equality must be structural: two snapshots listing the same resources
/// with the same contents are equal regardless of where they came from.
pub trait Snapshot: PartialEq + Send + Sync + 'static {
    /// The well-formed, contentually empty value sent on a no-change cycle
    fn sentinel() -> Self;
}

impl<T> Snapshot for Collection<T>
where
    T: PartialEq + Send + Sync + 'static,
{
    fn sentinel() -> Self {
        Collection::empty()
    }
}

/// The listing function a session polls
///
/// The `#[async_trait]` macro keeps the trait object-safe so the server can
/// hold sources as `Arc<dyn ListSource<Snapshot = ...>>`.
#[async_trait]
pub trait ListSource: Send + Sync {
    type Snapshot: Snapshot;

    /// Query the current state
    async fn list(&self) -> Result<Self::Snapshot, SourceError>;

    /// Populate and serialize a snapshot into its wire form
    ///
    /// Must be free of side effects; a failure ends the session.
    fn encode(&self, snapshot: &Self::Snapshot) -> Result<String, SourceError>;
}

/// Change notifier for one resource list
///
/// Every call to [`Watcher::notify`] bumps a generation counter. Each
/// subscriber sees at least one event after any number of bumps it has not
/// yet observed, so bursts collapse into a single wake-up.
#[derive(Debug, Clone)]
pub struct Watcher {
    tx: Arc<watch::Sender<u64>>,
}

impl Watcher {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    /// Signal that the resource list may have changed
    pub fn notify(&self) {
        self.tx.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// Current generation (number of notifications so far)
    #[cfg(test)]
    fn generation(&self) -> u64 {
        *self.tx.borrow()
    }

    /// Start receiving change events from this point on
    pub fn subscribe(&self) -> ChangeEvents {
        ChangeEvents {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for Watcher {
    fn default() -> Self {
        Self::new()
    }
}

/// One session's view of a [`Watcher`]
#[derive(Debug)]
pub struct ChangeEvents {
    rx: watch::Receiver<u64>,
}

impl ChangeEvents {
    /// Wait for the next change event
    ///
    /// Once the watcher is gone no further events arrive and this never
    /// completes, which leaves keepalive and disconnect in charge.
    pub async fn next(&mut self) {
        if self.rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_list_source_is_object_safe() {
        // Compiles only if the trait can be used as a trait object.
        fn _assert_object_safe(_: Box<dyn ListSource<Snapshot = Collection<String>>>) {}
    }

    #[test]
    fn test_collection_sentinel() {
        let sentinel = <Collection<u8> as Snapshot>::sentinel();
        assert!(sentinel.is_sentinel());
    }

    #[tokio::test]
    async fn test_subscriber_sees_notification() {
        let watcher = Watcher::new();
        let mut events = watcher.subscribe();

        watcher.notify();
        tokio::time::timeout(Duration::from_secs(1), events.next())
            .await
            .expect("change event");
        assert_eq!(watcher.generation(), 1);
    }

    #[tokio::test]
    async fn test_burst_collapses_into_one_event() {
        let watcher = Watcher::new();
        let mut events = watcher.subscribe();

        watcher.notify();
        watcher.notify();
        watcher.notify();

        events.next().await;
        let second = tokio::time::timeout(Duration::from_millis(50), events.next()).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn test_late_subscriber_ignores_past_notifications() {
        let watcher = Watcher::new();
        watcher.notify();

        let mut events = watcher.subscribe();
        let pending = tokio::time::timeout(Duration::from_millis(50), events.next()).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn test_dropped_watcher_never_fires() {
        let watcher = Watcher::new();
        let mut events = watcher.subscribe();
        drop(watcher);

        let pending = tokio::time::timeout(Duration::from_millis(50), events.next()).await;
        assert!(pending.is_err());
    }
}
