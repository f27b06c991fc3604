//! Link service: sits between a face and its transport and handles
//! fragmentation and reassembly.

use std::time::Duration;

use log::{trace, warn};
use tokio::sync::mpsc;

use ndn_lora_core::{Block, EndpointId, TLV_LP_PACKET};
use ndn_lora_radio::{RadioError, RadioFramer};

use crate::error::{FaceError, Result};
use crate::transport::LoRaTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkServiceOptions {
    pub allow_fragmentation: bool,
    pub allow_reassembly: bool,
    /// Recorded for the face status; acknowledgment is left to an upper layer.
    pub reliability_enabled: bool,
}

impl Default for LinkServiceOptions {
    fn default() -> Self {
        Self {
            allow_fragmentation: true,
            allow_reassembly: true,
            reliability_enabled: false,
        }
    }
}

pub struct LinkService {
    options: LinkServiceOptions,
    framer: RadioFramer,
    upper: mpsc::UnboundedSender<Block>,
}

impl LinkService {
    pub fn new(
        options: LinkServiceOptions,
        mtu: usize,
        reassembly_timeout: Duration,
        upper: mpsc::UnboundedSender<Block>,
    ) -> Result<Self> {
        let framer = RadioFramer::new(mtu, reassembly_timeout)
            .map_err(|e| FaceError::Construction(e.to_string()))?;
        Ok(Self {
            options,
            framer,
            upper,
        })
    }

    pub fn options(&self) -> &LinkServiceOptions {
        &self.options
    }

    /// Hands a network packet to the transport, split into MTU-sized
    /// fragments when fragmentation is on.
    pub fn send_packet(&self, packet: &Block, transport: &LoRaTransport) -> Result<()> {
        if !self.options.allow_fragmentation {
            if packet.encoded_len() > transport.mtu() {
                return Err(RadioError::PacketTooLarge {
                    size: packet.encoded_len(),
                    mtu: transport.mtu(),
                }
                .into());
            }
            return transport.send(packet, 0);
        }

        let fragments = self.framer.fragment(packet)?;
        transport.send_all(&fragments, 0)
    }

    /// Inbound path, called synchronously by the transport.
    pub fn receive_packet(&self, packet: Block, endpoint: EndpointId) {
        let complete = if self.options.allow_reassembly {
            match self.framer.reassemble(endpoint, packet) {
                Ok(complete) => complete,
                Err(e) => {
                    warn!("Dropping packet from {}: {}", endpoint, e);
                    return;
                }
            }
        } else if packet.tlv_type() == TLV_LP_PACKET {
            warn!("Dropping fragment from {}: reassembly disabled", endpoint);
            return;
        } else {
            Some(packet)
        };

        if let Some(packet) = complete {
            trace!("Delivering {} byte packet from {}", packet.encoded_len(), endpoint);
            if self.upper.send(packet).is_err() {
                trace!("Face receiver gone, dropping packet from {}", endpoint);
            }
        }
    }

    pub fn pending_reassembly(&self) -> usize {
        self.framer.pending()
    }
}
