//! Frame fan-out from the capture thread to connected clients.
//!
//! The capture thread calls [`Broadcaster::offer`] with each encoded
//! frame. At most one frame is in flight: the offer claims a single
//! `sending` flag and spawns the delivery onto the tokio runtime through
//! a [`Handle`]. Frames offered while a delivery is still running are
//! dropped, never queued.
//!
//! Each sink is a bounded channel drained by its connection's writer. A
//! sink whose channel is still full misses the frame; the other sinks
//! are unaffected.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};

use crate::stream::types::EncodedFrame;
use crate::sync::lock;

/// Identifies one registered sink.
pub type SinkId = u64;

/// Single-writer, drop-on-busy frame distributor.
pub struct Broadcaster {
    handle: Handle,
    sinks: Mutex<Vec<(SinkId, mpsc::Sender<EncodedFrame>)>>,
    sending: AtomicBool,
    delivered: AtomicU64,
    dropped: AtomicU64,
    lagged: AtomicU64,
}

impl Broadcaster {
    /// Create a broadcaster delivering on the runtime behind `handle`.
    pub fn new(handle: Handle) -> Arc<Self> {
        Arc::new(Self {
            handle,
            sinks: Mutex::new(Vec::new()),
            sending: AtomicBool::new(false),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            lagged: AtomicU64::new(0),
        })
    }

    /// Register a sink. Replaces any sink with the same id.
    pub fn add_sink(&self, id: SinkId, tx: mpsc::Sender<EncodedFrame>) {
        let mut sinks = lock(&self.sinks);
        sinks.retain(|(sid, _)| *sid != id);
        sinks.push((id, tx));
    }

    /// Unregister a sink. Returns `false` if it was not registered.
    pub fn remove_sink(&self, id: SinkId) -> bool {
        let mut sinks = lock(&self.sinks);
        let before = sinks.len();
        sinks.retain(|(sid, _)| *sid != id);
        sinks.len() != before
    }

    pub fn sink_count(&self) -> usize {
        lock(&self.sinks).len()
    }

    /// Hand a frame over for delivery. Callable from any thread.
    ///
    /// Returns `true` if a delivery was scheduled, `false` if the frame
    /// was dropped because no sink is registered or a previous delivery
    /// is still in progress.
    pub fn offer(self: &Arc<Self>, frame: EncodedFrame) -> bool {
        if self.sink_count() == 0 {
            return false;
        }

        if self
            .sending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!(bytes = frame.len(), "frame dropped: delivery in progress");
            return false;
        }

        // Created before the spawn so the flag is released even if the
        // runtime discards the task without polling it.
        let guard = SendingGuard(Arc::clone(self));
        self.handle.spawn(async move {
            let guard = guard;
            guard.0.deliver(frame);
        });
        true
    }

    /// Deliver one frame to every sink registered right now, in order.
    fn deliver(&self, frame: EncodedFrame) {
        let sinks = lock(&self.sinks);
        for (id, tx) in sinks.iter() {
            match tx.try_send(frame.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.lagged.fetch_add(1, Ordering::Relaxed);
                    trace!(sink = id, "sink busy, frame skipped for it");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(sink = id, "sink closed, skipping");
                }
            }
        }
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Whether a delivery is currently in flight.
    pub fn is_sending(&self) -> bool {
        self.sending.load(Ordering::Acquire)
    }

    /// Frames delivered (to every sink registered at the time).
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Frames dropped because a delivery was still in flight.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Per-sink misses: a frame one sink skipped because its channel
    /// was still full.
    pub fn lagged(&self) -> u64 {
        self.lagged.load(Ordering::Relaxed)
    }
}

/// Clears the `sending` flag when the delivery task ends, however it ends.
struct SendingGuard(Arc<Broadcaster>);

impl Drop for SendingGuard {
    fn drop(&mut self) {
        self.0.sending.store(false, Ordering::Release);
    }
}

// ── Tests ────────────────────────────────────────────────────────
