//! One-slot, overwrite-on-full handoff between a producer and one consumer.

use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crossbeam::utils::CachePadded;
use tokio::sync::Notify;

use crate::error::ChannelClosed;

/// What happened to a frame handed to [`LatestFrameChannel::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The slot was empty
    Installed,
    /// An unread frame was discarded to make room
    Replaced,
    /// The channel is closed; the frame was dropped
    Closed,
}

/// Latest-wins channel. A send never blocks and never queues: an unread
/// frame is silently replaced, so the consumer always gets the freshest one.
pub struct LatestFrameChannel<T> {
    slot: Mutex<Slot<T>>,
    available: Condvar,
    notify: Notify,
    stats: CachePadded<ChannelStats>,
}

struct Slot<T> {
    frame: Option<T>,
    closed: bool,
}

#[derive(Default)]
struct ChannelStats {
    sent: AtomicU64,
    overwritten: AtomicU64,
    received: AtomicU64,
}

impl<T> Default for LatestFrameChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LatestFrameChannel<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                frame: None,
                closed: false,
            }),
            available: Condvar::new(),
            notify: Notify::new(),
            stats: CachePadded::new(ChannelStats::default()),
        }
    }

    // Slot state stays consistent even if a holder panicked, so poisoning
    // is ignored.
    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install `frame` as the pending frame, replacing any unread one.
    pub fn send(&self, frame: T) -> SendOutcome {
        let replaced = {
            let mut slot = self.lock();
            if slot.closed {
                return SendOutcome::Closed;
            }
            slot.frame.replace(frame)
        };

        self.stats.sent.fetch_add(1, Ordering::Relaxed);
        self.available.notify_one();
        self.notify.notify_one();

        // The stale frame is dropped outside the lock
        match replaced {
            Some(_) => {
                self.stats.overwritten.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("framegate_frames_overwritten").increment(1);
                SendOutcome::Replaced
            }
            None => SendOutcome::Installed,
        }
    }

    /// Block until a frame is available or the channel closes.
    pub fn receive(&self) -> Result<T, ChannelClosed> {
        let mut slot = self.lock();
        loop {
            if let Some(frame) = slot.frame.take() {
                self.stats.received.fetch_add(1, Ordering::Relaxed);
                return Ok(frame);
            }
            if slot.closed {
                return Err(ChannelClosed);
            }
            slot = self
                .available
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Async counterpart of [`receive`](Self::receive).
    pub async fn receive_async(&self) -> Result<T, ChannelClosed> {
        loop {
            // Register interest before checking the slot so a send or close
            // racing with the check still wakes us.
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();

            if let Some(result) = self.try_take() {
                return result;
            }
            notified.await;
        }
    }

    /// Take the pending frame without waiting.
    pub fn try_receive(&self) -> Result<Option<T>, ChannelClosed> {
        self.try_take().transpose()
    }

    fn try_take(&self) -> Option<Result<T, ChannelClosed>> {
        let mut slot = self.lock();
        if let Some(frame) = slot.frame.take() {
            self.stats.received.fetch_add(1, Ordering::Relaxed);
            Some(Ok(frame))
        } else if slot.closed {
            Some(Err(ChannelClosed))
        } else {
            None
        }
    }

    /// Close the channel for good, discarding any pending frame and waking
    /// a blocked receiver. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        let pending = {
            let mut slot = self.lock();
            if slot.closed {
                return false;
            }
            slot.closed = true;
            slot.frame.take()
        };
        drop(pending);

        self.available.notify_all();
        self.notify.notify_waiters();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// (sent, overwritten, received)
    pub fn stats(&self) -> (u64, u64, u64) {
        (
            self.stats.sent.load(Ordering::Relaxed),
            self.stats.overwritten.load(Ordering::Relaxed),
            self.stats.received.load(Ordering::Relaxed),
        )
    }
}
