//! Snapshot fan-out to presentation layers.
//!
//! Every listener gets its own unbounded queue so no snapshot is ever
//! coalesced away; ordering follows the order of `publish` calls, which the
//! controller issues from a single task.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::session::SessionState;

struct ObserverInner {
    listeners: Vec<mpsc::UnboundedSender<SessionState>>,
    latest: SessionState,
    closed: bool,
}

#[derive(Clone)]
pub struct SessionObserver {
    inner: Arc<Mutex<ObserverInner>>,
}

impl SessionObserver {
    pub fn new(initial: SessionState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ObserverInner {
                listeners: Vec::new(),
                latest: initial,
                closed: false,
            })),
        }
    }

    /// Registers a listener. Only snapshots published after this call are
    /// delivered; use [`SessionObserver::latest`] for the current state.
    /// After the session closed the stream ends immediately.
    pub fn subscribe(&self) -> SnapshotStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        if !inner.closed {
            inner.listeners.push(tx);
        }
        SnapshotStream { rx }
    }

    pub fn latest(&self) -> SessionState {
        self.lock().latest.clone()
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    pub(crate) fn publish(&self, state: &SessionState) {
        let mut inner = self.lock();
        inner.latest = state.clone();
        inner
            .listeners
            .retain(|listener| listener.send(state.clone()).is_ok());
    }

    /// Ends every stream once the last snapshot is queued.
    pub(crate) fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.listeners.clear();
    }

    fn lock(&self) -> MutexGuard<'_, ObserverInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct SnapshotStream {
    rx: mpsc::UnboundedReceiver<SessionState>,
}

impl SnapshotStream {
    /// Next snapshot; `None` once the controller has shut down.
    pub async fn next(&mut self) -> Option<SessionState> {
        self.rx.recv().await
    }

    pub fn try_next(&mut self) -> Option<SessionState> {
        self.rx.try_recv().ok()
    }

    /// Skips snapshots until one matches `predicate`.
    pub async fn wait_for<F>(&mut self, mut predicate: F) -> Option<SessionState>
    where
        F: FnMut(&SessionState) -> bool,
    {
        while let Some(state) = self.rx.recv().await {
            if predicate(&state) {
                return Some(state);
            }
        }
        None
    }
}

/// Rate limit for progress-only snapshots. A suppressed update is remembered
/// as pending so it can be flushed before the next phase change.
pub(crate) struct ProgressThrottle {
    interval: Duration,
    last_emit: Option<Instant>,
    pending: bool,
}

impl ProgressThrottle {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
            pending: false,
        }
    }

    pub(crate) fn admit(&mut self) -> bool {
        let now = Instant::now();
        let due = self
            .last_emit
            .map_or(true, |last| now.duration_since(last) >= self.interval);
        if due {
            self.last_emit = Some(now);
            self.pending = false;
        } else {
            self.pending = true;
        }
        due
    }

    pub(crate) fn take_pending(&mut self) -> bool {
        std::mem::take(&mut self.pending)
    }

    pub(crate) fn reset(&mut self) {
        self.last_emit = None;
        self.pending = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Phase;

    #[tokio::test]
    async fn delivers_in_order_to_every_listener() {
        let observer = SessionObserver::new(SessionState::new());
        let mut first = observer.subscribe();
        let mut second = observer.subscribe();
        let mut state = SessionState::new();
        for phase in [Phase::Loading, Phase::Ready, Phase::Practicing] {
            state.phase = phase;
            observer.publish(&state);
        }
        for stream in [&mut first, &mut second] {
            assert_eq!(stream.next().await.unwrap().phase, Phase::Loading);
            assert_eq!(stream.next().await.unwrap().phase, Phase::Ready);
            assert_eq!(stream.next().await.unwrap().phase, Phase::Practicing);
            assert!(stream.try_next().is_none());
        }
        assert_eq!(observer.latest().phase, Phase::Practicing);
    }

    #[test]
    fn dropped_listeners_are_pruned() {
        let observer = SessionObserver::new(SessionState::new());
        let stream = observer.subscribe();
        assert_eq!(observer.listener_count(), 1);
        drop(stream);
        observer.publish(&SessionState::new());
        assert_eq!(observer.listener_count(), 0);
    }

    #[tokio::test]
    async fn close_ends_streams_after_queued_snapshots() {
        let observer = SessionObserver::new(SessionState::new());
        let mut stream = observer.subscribe();
        let mut state = SessionState::new();
        state.phase = Phase::Cancelled;
        observer.publish(&state);
        observer.close();
        assert_eq!(stream.next().await.unwrap().phase, Phase::Cancelled);
        assert!(stream.next().await.is_none());
        assert!(observer.subscribe().next().await.is_none());
        assert_eq!(observer.latest().phase, Phase::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_marks_suppressed_updates_pending() {
        let mut throttle = ProgressThrottle::new(Duration::from_millis(50));
        assert!(throttle.admit());
        assert!(!throttle.admit());
        assert!(throttle.take_pending());
        assert!(!throttle.take_pending());
        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(throttle.admit());
        assert!(!throttle.take_pending());
    }
}
