//! Per-face LoRa transport
//!
//! Outgoing packets become frames on the shared send queue; the transport
//! never waits for the radio. Incoming packets are handed synchronously to
//! the face's link service.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error, info, trace};

use ndn_lora_core::{Block, EndpointId, OutboundFrame, RadioAddress};
use ndn_lora_radio::{RadioError, SendQueue};

use crate::error::{FaceError, Result};
use crate::face::FacePersistency;
use crate::link_service::LinkService;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Up,
    Failed,
    Closed,
}

impl TransportState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransportState::Failed | TransportState::Closed)
    }
}

#[derive(Debug, Default)]
struct Counters {
    in_packets: AtomicU64,
    in_bytes: AtomicU64,
    out_packets: AtomicU64,
    out_bytes: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportCounters {
    pub in_packets: u64,
    pub in_bytes: u64,
    pub out_packets: u64,
    pub out_bytes: u64,
}

pub struct LoRaTransport {
    address: RadioAddress,
    mtu: usize,
    persistency: FacePersistency,
    queue: SendQueue,
    link_service: Arc<LinkService>,
    state: Mutex<TransportState>,
    counters: Counters,
}

impl LoRaTransport {
    pub fn new(
        address: RadioAddress,
        mtu: usize,
        persistency: FacePersistency,
        queue: SendQueue,
        link_service: Arc<LinkService>,
    ) -> Self {
        Self {
            address,
            mtu,
            persistency,
            queue,
            link_service,
            state: Mutex::new(TransportState::Up),
            counters: Counters::default(),
        }
    }

    pub fn address(&self) -> RadioAddress {
        self.address
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    pub fn persistency(&self) -> FacePersistency {
        self.persistency
    }

    pub fn state(&self) -> TransportState {
        *self.lock_state()
    }

    /// Queues one link-layer packet for the radio loop.
    pub fn send(&self, packet: &Block, endpoint: EndpointId) -> Result<()> {
        self.send_all(std::slice::from_ref(packet), endpoint)
    }

    /// Queues the fragments of one network packet. Either every fragment is
    /// queued or none is.
    pub fn send_all(&self, packets: &[Block], _endpoint: EndpointId) -> Result<()> {
        if self.state() != TransportState::Up {
            return Err(FaceError::TransportClosed(self.address.to_string()));
        }

        let mut frames = Vec::with_capacity(packets.len());
        for packet in packets {
            let wire = packet.encode();
            if wire.len() > self.mtu {
                return Err(RadioError::PacketTooLarge {
                    size: wire.len(),
                    mtu: self.mtu,
                }
                .into());
            }
            frames.push(OutboundFrame::new(self.address, wire)?);
        }

        let count = frames.len() as u64;
        let size: usize = frames.iter().map(OutboundFrame::len).sum();
        self.queue.push_all(frames)?;
        self.counters.out_packets.fetch_add(count, Ordering::Relaxed);
        self.counters.out_bytes.fetch_add(size as u64, Ordering::Relaxed);
        trace!("[{}] Sending {} frames, {} bytes", self.address, count, size);
        Ok(())
    }

    /// Called by the channel when the dispatcher routed a packet here.
    pub fn receive(&self, packet: Block, endpoint: EndpointId) {
        if self.state() != TransportState::Up {
            debug!("[{}] Ignoring packet from {}, transport not up", self.address, endpoint);
            return;
        }
        self.counters.in_packets.fetch_add(1, Ordering::Relaxed);
        self.counters
            .in_bytes
            .fetch_add(packet.encoded_len() as u64, Ordering::Relaxed);
        self.link_service.receive_packet(packet, endpoint);
    }

    pub fn close(&self) {
        let mut state = self.lock_state();
        if state.is_terminal() {
            return;
        }
        info!("[{}] Closing LoRa transport", self.address);
        *state = TransportState::Closed;
    }

    pub fn handle_error(&self, message: &str) {
        if self.persistency == FacePersistency::Permanent {
            error!("[{}] Permanent face ignores error: {}", self.address, message);
            return;
        }

        error!("[{}] {}", self.address, message);
        {
            let mut state = self.lock_state();
            if state.is_terminal() {
                return;
            }
            *state = TransportState::Failed;
        }
        self.close();
    }

    pub fn counters(&self) -> TransportCounters {
        TransportCounters {
            in_packets: self.counters.in_packets.load(Ordering::Relaxed),
            in_bytes: self.counters.in_bytes.load(Ordering::Relaxed),
            out_packets: self.counters.out_packets.load(Ordering::Relaxed),
            out_bytes: self.counters.out_bytes.load(Ordering::Relaxed),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, TransportState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for LoRaTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoRaTransport")
            .field("address", &self.address)
            .field("mtu", &self.mtu)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link_service::LinkServiceOptions;
    use ndn_lora_core::{TLV_DATA, TLV_INTEREST};
    use ndn_lora_radio::{send_queue, QueueError, SendQueueReceiver};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn transport(
        persistency: FacePersistency,
        capacity: usize,
    ) -> (LoRaTransport, SendQueueReceiver, mpsc::UnboundedReceiver<Block>) {
        let (queue, queue_rx) = send_queue(capacity);
        let (upper_tx, upper_rx) = mpsc::unbounded_channel();
        let link = LinkService::new(
            LinkServiceOptions::default(),
            160,
            Duration::from_secs(30),
            upper_tx,
        )
        .unwrap();
        let transport = LoRaTransport::new(
            RadioAddress::new(3, 5),
            160,
            persistency,
            queue,
            Arc::new(link),
        );
        (transport, queue_rx, upper_rx)
    }

    #[test]
    fn test_send_enqueues_with_transport_address() {
        let (transport, mut queue_rx, _upper) = transport(FacePersistency::Persistent, 8);
        let packet = Block::new(TLV_INTEREST, vec![1, 2, 3]);

        transport.send(&packet, 0).unwrap();

        let frames = queue_rx.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].address(), RadioAddress::new(3, 5));
        assert_eq!(frames[0].payload(), &packet.encode());
        assert_eq!(transport.counters().out_packets, 1);
        assert_eq!(transport.counters().out_bytes, 5);
    }

    #[test]
    fn test_send_returns_before_radio_runs() {
        // nobody drains the queue: the send must still complete
        let (transport, _queue_rx, _upper) = transport(FacePersistency::Persistent, 4);
        for _ in 0..4 {
            transport.send(&Block::new(TLV_DATA, vec![0u8; 100]), 0).unwrap();
        }
        assert!(matches!(
            transport.send(&Block::new(TLV_DATA, vec![0u8; 10]), 0),
            Err(FaceError::Queue(QueueError::Full { capacity: 4 }))
        ));
    }

    #[test]
    fn test_send_rejects_oversized_packet() {
        let (transport, mut queue_rx, _upper) = transport(FacePersistency::Persistent, 4);
        assert!(matches!(
            transport.send(&Block::new(TLV_DATA, vec![0u8; 200]), 0),
            Err(FaceError::Radio(RadioError::PacketTooLarge { .. }))
        ));
        assert!(queue_rx.drain().is_empty());
    }

    #[test]
    fn test_receive_reaches_link_service() {
        let (transport, _queue_rx, mut upper) = transport(FacePersistency::Persistent, 4);
        let packet = Block::new(TLV_DATA, vec![7; 12]);

        transport.receive(packet.clone(), 5);

        assert_eq!(upper.try_recv().unwrap(), packet);
        assert_eq!(transport.counters().in_packets, 1);
    }

    #[test]
    fn test_close_is_idempotent_and_stops_sending() {
        let (transport, _queue_rx, mut upper) = transport(FacePersistency::Persistent, 4);
        transport.close();
        transport.close();
        assert_eq!(transport.state(), TransportState::Closed);

        assert!(matches!(
            transport.send(&Block::new(TLV_DATA, vec![1]), 0),
            Err(FaceError::TransportClosed(_))
        ));
        transport.receive(Block::new(TLV_DATA, vec![1]), 5);
        assert!(upper.try_recv().is_err());
    }

    #[test]
    fn test_error_fails_non_permanent_transport() {
        let (transport, _queue_rx, _upper) = transport(FacePersistency::Persistent, 4);
        transport.handle_error("radio went away");
        assert_eq!(transport.state(), TransportState::Failed);

        transport.close();
        assert_eq!(transport.state(), TransportState::Failed);
    }

    #[test]
    fn test_permanent_transport_ignores_errors() {
        let (transport, _queue_rx, _upper) = transport(FacePersistency::Permanent, 4);
        transport.handle_error("radio went away");
        assert_eq!(transport.state(), TransportState::Up);
    }

    #[test]
    fn test_states_seen_over_a_lifecycle() {
        let (closed, _q1, _u1) = transport(FacePersistency::Persistent, 4);
        let (failed, _q2, _u2) = transport(FacePersistency::OnDemand, 4);
        assert_eq!(closed.state(), TransportState::Up);
        assert!(!closed.state().is_terminal());

        closed.close();
        failed.handle_error("lost sync");
        assert_eq!(closed.state(), TransportState::Closed);
        assert_eq!(failed.state(), TransportState::Failed);
        assert!(closed.state().is_terminal() && failed.state().is_terminal());

        // a terminal transport never comes back up
        failed.close();
        closed.handle_error("late error");
        assert_eq!(closed.state(), TransportState::Closed);
        assert_eq!(failed.state(), TransportState::Failed);
    }
}
