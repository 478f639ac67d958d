//! Hand-off of captured buffers from the audio thread into the controller.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use duet_audio::{AudioBuffer, BufferSink};
use tokio::sync::Notify;
use tracing::debug;

/// Monotonic counter bumped whenever in-flight work must be invalidated.
/// Buffers and delayed actions carry the value they were created under and
/// are discarded when it no longer matches.
#[derive(Clone, Debug, Default)]
pub(crate) struct SessionEpoch(Arc<AtomicU64>);

impl SessionEpoch {
    pub(crate) fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Advances only if the epoch is still `expected`; `None` when another
    /// advance got there first.
    pub(crate) fn advance_from(&self, expected: u64) -> Option<u64> {
        self.0
            .compare_exchange(expected, expected + 1, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|previous| previous + 1)
    }
}

pub(crate) struct TaggedBuffer {
    pub(crate) epoch: u64,
    pub(crate) buffer: AudioBuffer,
}

/// Bounded queue that never blocks the producer: when full, the oldest
/// buffer is dropped to make room.
pub(crate) struct AudioInbox {
    queue: Mutex<VecDeque<TaggedBuffer>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
}

impl AudioInbox {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    pub(crate) fn push(&self, epoch: u64, buffer: AudioBuffer) {
        {
            let mut queue = self.lock();
            if queue.len() >= self.capacity {
                queue.pop_front();
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(dropped, "audio inbox full, dropped oldest buffer");
            }
            queue.push_back(TaggedBuffer { epoch, buffer });
        }
        self.notify.notify_one();
    }

    pub(crate) fn drain(&self) -> Vec<TaggedBuffer> {
        self.lock().drain(..).collect()
    }

    pub(crate) async fn notified(&self) {
        self.notify.notified().await
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<TaggedBuffer>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Sink handed to the record port for one attempt; every buffer is tagged
/// with the epoch the attempt started under.
pub(crate) struct AttemptSink {
    inbox: Arc<AudioInbox>,
    epoch: u64,
}

impl AttemptSink {
    pub(crate) fn new(inbox: Arc<AudioInbox>, epoch: u64) -> Self {
        Self { inbox, epoch }
    }
}

impl BufferSink for AttemptSink {
    fn push(&self, buffer: AudioBuffer) {
        self.inbox.push(self.epoch, buffer);
    }
}
