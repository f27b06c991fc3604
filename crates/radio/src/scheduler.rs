//! Outbound frame queue shared by every transport and drained by the radio loop

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{trace, warn};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};

use ndn_lora_core::OutboundFrame;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("send queue is full ({capacity} frames)")]
    Full { capacity: usize },

    #[error("send queue is closed")]
    Closed,
}

#[derive(Debug, Default)]
struct Counters {
    frames_queued: AtomicU64,
    frames_drained: AtomicU64,
    frames_rejected: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub frames_queued: u64,
    pub frames_drained: u64,
    pub frames_rejected: u64,
}

/// Creates a bounded send queue. The writer half is cloned into every
/// transport, the reader half belongs to the radio I/O loop.
pub fn send_queue(capacity: usize) -> (SendQueue, SendQueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let counters = Arc::new(Counters::default());
    (
        SendQueue {
            tx,
            counters: counters.clone(),
        },
        SendQueueReceiver {
            rx,
            counters,
            disconnected: false,
        },
    )
}

#[derive(Debug, Clone)]
pub struct SendQueue {
    tx: mpsc::Sender<OutboundFrame>,
    counters: Arc<Counters>,
}

impl SendQueue {
    /// Appends a frame at the tail. Never waits: a full queue is reported
    /// back to the caller.
    pub fn push(&self, frame: OutboundFrame) -> Result<(), QueueError> {
        let address = frame.address();
        let size = frame.len();
        match self.tx.try_send(frame) {
            Ok(()) => {
                self.counters.frames_queued.fetch_add(1, Ordering::Relaxed);
                trace!("Queued {} bytes for {}", size, address);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.counters.frames_rejected.fetch_add(1, Ordering::Relaxed);
                warn!("LoRa send queue is FULL, dropping {} bytes for {}", size, address);
                Err(QueueError::Full {
                    capacity: self.capacity(),
                })
            }
            Err(TrySendError::Closed(_)) => {
                self.counters.frames_rejected.fetch_add(1, Ordering::Relaxed);
                Err(QueueError::Closed)
            }
        }
    }

    /// Appends every frame or none of them. Used for the fragments of one
    /// packet: a partial message would only occupy the peer's reassembly
    /// buffer until it times out.
    pub fn push_all(&self, frames: Vec<OutboundFrame>) -> Result<(), QueueError> {
        let count = frames.len();
        if count == 0 {
            return Ok(());
        }
        let bytes: usize = frames.iter().map(OutboundFrame::len).sum();

        let permits = if count > self.capacity() {
            Err(TrySendError::Full(()))
        } else {
            self.tx.try_reserve_many(count)
        };
        match permits {
            Ok(permits) => {
                for (permit, frame) in permits.zip(frames) {
                    permit.send(frame);
                }
                self.counters
                    .frames_queued
                    .fetch_add(count as u64, Ordering::Relaxed);
                trace!("Queued {} frames, {} bytes", count, bytes);
                Ok(())
            }
            Err(TrySendError::Full(())) => {
                self.counters
                    .frames_rejected
                    .fetch_add(count as u64, Ordering::Relaxed);
                warn!(
                    "LoRa send queue has no room for {} frames, dropping {} bytes",
                    count, bytes
                );
                Err(QueueError::Full {
                    capacity: self.capacity(),
                })
            }
            Err(TrySendError::Closed(())) => {
                self.counters
                    .frames_rejected
                    .fetch_add(count as u64, Ordering::Relaxed);
                Err(QueueError::Closed)
            }
        }
    }

    /// Frames enqueued and not yet drained.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn stats(&self) -> QueueStats {
        snapshot(&self.counters)
    }
}

#[derive(Debug)]
pub struct SendQueueReceiver {
    rx: mpsc::Receiver<OutboundFrame>,
    counters: Arc<Counters>,
    disconnected: bool,
}

impl SendQueueReceiver {
    /// Takes every queued frame, oldest first. Writers are never held up
    /// while the caller works through the returned frames.
    pub fn drain(&mut self) -> Vec<OutboundFrame> {
        let mut frames = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(frame) => frames.push(frame),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.disconnected = true;
                    break;
                }
            }
        }
        if !frames.is_empty() {
            self.counters
                .frames_drained
                .fetch_add(frames.len() as u64, Ordering::Relaxed);
        }
        frames
    }

    /// True once every writer is gone and the queue has been emptied.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    pub fn stats(&self) -> QueueStats {
        snapshot(&self.counters)
    }
}

fn snapshot(counters: &Counters) -> QueueStats {
    QueueStats {
        frames_queued: counters.frames_queued.load(Ordering::Relaxed),
        frames_drained: counters.frames_drained.load(Ordering::Relaxed),
        frames_rejected: counters.frames_rejected.load(Ordering::Relaxed),
    }
}
