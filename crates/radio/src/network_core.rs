//! Half-duplex radio I/O loop
//!
//! One dedicated thread owns the radio session. Each turn it either drains
//! the send queue to the transmitter or, when nothing is waiting, polls the
//! receiver. Sends win over polling so daemon traffic is not held back by a
//! quiet channel; the price is that packets arriving during a long burst of
//! sends can be missed by the hardware.
//!
//! Received frames are never dispatched from this thread. They are posted
//! over a bounded channel to the face dispatcher running on the daemon
//! runtime.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use tokio::sync::mpsc::{self, error::TrySendError};

use ndn_lora_core::{InboundFrame, OutboundFrame};
use crate::driver::RadioSession;
use crate::scheduler::SendQueueReceiver;
use crate::{BurstPolicy, RadioConfig, RadioError};

#[derive(Debug, Default)]
struct LoopCounters {
    frames_transmitted: AtomicU64,
    transmit_failures: AtomicU64,
    frames_received: AtomicU64,
    receive_failures: AtomicU64,
    frames_overwritten: AtomicU64,
    frames_dropped: AtomicU64,
    invalid_frames: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub frames_transmitted: u64,
    pub transmit_failures: u64,
    pub frames_received: u64,
    pub receive_failures: u64,
    /// Packets discarded by `BurstPolicy::LatestOnly`.
    pub frames_overwritten: u64,
    /// Packets the dispatcher could not take.
    pub frames_dropped: u64,
    pub invalid_frames: u64,
}

/// Outcome of a single loop turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStep {
    Transmitted(usize),
    Received(usize),
    Idle,
    /// Every send queue writer is gone.
    Closed,
}

pub struct RadioIoLoop {
    session: RadioSession,
    queue: SendQueueReceiver,
    inbound: mpsc::Sender<InboundFrame>,
    transmit_timeout: Duration,
    poll_interval: Duration,
    burst_policy: BurstPolicy,
    counters: Arc<LoopCounters>,
}

impl RadioIoLoop {
    pub fn new(
        session: RadioSession,
        queue: SendQueueReceiver,
        inbound: mpsc::Sender<InboundFrame>,
        config: &RadioConfig,
    ) -> Self {
        Self {
            session,
            queue,
            inbound,
            transmit_timeout: config.transmit_timeout,
            poll_interval: config.poll_interval,
            burst_policy: config.burst_policy,
            counters: Arc::new(LoopCounters::default()),
        }
    }

    /// Starts the loop on its own thread.
    pub fn spawn(self) -> Result<RadioLoopHandle, RadioError> {
        if !self.session.is_operational() {
            return Err(RadioError::NotOperational);
        }

        let stop = Arc::new(AtomicBool::new(false));
        let counters = self.counters.clone();
        let thread = thread::Builder::new()
            .name("lora-io".to_string())
            .spawn({
                let stop = stop.clone();
                move || self.run(&stop)
            })?;

        Ok(RadioLoopHandle {
            stop,
            thread: Some(thread),
            counters,
        })
    }

    fn run(mut self, stop: &AtomicBool) -> RadioSession {
        info!("LoRa I/O loop started");
        while !stop.load(Ordering::Acquire) {
            match self.run_once() {
                LoopStep::Idle => thread::sleep(self.poll_interval),
                LoopStep::Closed => {
                    info!("LoRa send queue closed, stopping I/O loop");
                    break;
                }
                LoopStep::Transmitted(_) | LoopStep::Received(_) => {}
            }
        }
        info!("LoRa I/O loop stopped: {:?}", self.stats());
        self.session
    }

    pub fn run_once(&mut self) -> LoopStep {
        let frames = self.queue.drain();
        if !frames.is_empty() {
            let count = frames.len();
            for frame in frames {
                self.transmit(frame);
            }
            if let Err(e) = self.session.driver_mut().start_receive() {
                error!("Unable to re-enter receive mode: {}", e);
            }
            return LoopStep::Transmitted(count);
        }

        if self.session.driver_mut().data_available() {
            return LoopStep::Received(self.receive_burst());
        }

        if self.queue.is_disconnected() {
            return LoopStep::Closed;
        }
        LoopStep::Idle
    }

    fn transmit(&mut self, frame: OutboundFrame) {
        let address = frame.address();
        if frame.is_empty() {
            self.counters.invalid_frames.fetch_add(1, Ordering::Relaxed);
            error!("Trying to send a packet with no size to {}, not sending", address);
            return;
        }

        let driver = self.session.driver_mut();
        if let Err(e) = driver.set_node_address(address.local_id) {
            error!("Unable to set source id to {}: {}", address.local_id, e);
        }

        match driver.transmit(address.peer_id, frame.payload(), self.transmit_timeout) {
            Ok(()) => {
                self.counters.frames_transmitted.fetch_add(1, Ordering::Relaxed);
                if address.is_broadcast() {
                    debug!("Sent {} bytes from {} to everyone", frame.len(), address.local_id);
                } else {
                    debug!(
                        "Sent {} bytes from {} to {}",
                        frame.len(),
                        address.local_id,
                        address.peer_id
                    );
                }
            }
            Err(e) => {
                self.counters.transmit_failures.fetch_add(1, Ordering::Relaxed);
                error!("Send operation to {} failed: {}", address, e);
            }
        }
    }

    fn receive_burst(&mut self) -> usize {
        let mut burst = Vec::new();
        let driver = self.session.driver_mut();
        loop {
            match driver.receive_packet() {
                Ok(frame) => {
                    trace!(
                        "Received {} bytes from {} to {}",
                        frame.payload.len(),
                        frame.src,
                        frame.dst
                    );
                    burst.push(frame);
                }
                Err(e) => {
                    self.counters.receive_failures.fetch_add(1, Ordering::Relaxed);
                    error!("Unable to get packet data: {}", e);
                    break;
                }
            }
            if !driver.data_available() {
                break;
            }
        }
        self.counters
            .frames_received
            .fetch_add(burst.len() as u64, Ordering::Relaxed);

        if self.burst_policy == BurstPolicy::LatestOnly && burst.len() > 1 {
            let overwritten = burst.len() - 1;
            self.counters
                .frames_overwritten
                .fetch_add(overwritten as u64, Ordering::Relaxed);
            burst.drain(..overwritten);
        }

        let mut posted = 0;
        for frame in burst {
            match self.inbound.try_send(frame) {
                Ok(()) => posted += 1,
                Err(TrySendError::Full(frame)) => {
                    self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Inbound dispatch queue full, dropping frame from {} to {}",
                        frame.src, frame.dst
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    debug!("Inbound dispatcher gone, dropping frame");
                }
            }
        }
        posted
    }

    pub fn stats(&self) -> LoopStats {
        snapshot(&self.counters)
    }

    pub fn into_session(self) -> RadioSession {
        self.session
    }
}

/// Owner of the running loop thread. Dropping the handle stops the loop.
pub struct RadioLoopHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<RadioSession>>,
    counters: Arc<LoopCounters>,
}

impl RadioLoopHandle {
    pub fn stats(&self) -> LoopStats {
        snapshot(&self.counters)
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stops the loop and hands the radio session back.
    pub fn shutdown(mut self) -> Option<RadioSession> {
        self.stop_and_join()
    }

    fn stop_and_join(&mut self) -> Option<RadioSession> {
        self.stop.store(true, Ordering::Release);
        let thread = self.thread.take()?;
        match thread.join() {
            Ok(session) => Some(session),
            Err(_) => {
                error!("LoRa I/O thread panicked");
                None
            }
        }
    }
}

impl Drop for RadioLoopHandle {
    fn drop(&mut self) {
        let _ = self.stop_and_join();
    }
}

fn snapshot(counters: &LoopCounters) -> LoopStats {
    LoopStats {
        frames_transmitted: counters.frames_transmitted.load(Ordering::Relaxed),
        transmit_failures: counters.transmit_failures.load(Ordering::Relaxed),
        frames_received: counters.frames_received.load(Ordering::Relaxed),
        receive_failures: counters.receive_failures.load(Ordering::Relaxed),
        frames_overwritten: counters.frames_overwritten.load(Ordering::Relaxed),
        frames_dropped: counters.frames_dropped.load(Ordering::Relaxed),
        invalid_frames: counters.invalid_frames.load(Ordering::Relaxed),
    }
}
