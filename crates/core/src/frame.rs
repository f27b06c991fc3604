use bytes::Bytes;
use thiserror::Error;

use crate::address::RadioAddress;
use crate::types::{EndpointId, NodeId, BROADCAST};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("refusing frame with empty payload")]
    Empty,
}

/// A packet waiting in the send queue. The frame owns its payload, so
/// dropping it after the transmit attempt releases everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    address: RadioAddress,
    payload: Bytes,
}

impl OutboundFrame {
    pub fn new(address: RadioAddress, payload: impl Into<Bytes>) -> Result<Self, FrameError> {
        let payload = payload.into();
        if payload.is_empty() {
            return Err(FrameError::Empty);
        }
        Ok(Self { address, payload })
    }

    pub fn address(&self) -> RadioAddress {
        self.address
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// A packet as pulled off the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub src: NodeId,
    pub dst: NodeId,
    pub payload: Bytes,
}

impl InboundFrame {
    pub fn new(src: NodeId, dst: NodeId, payload: impl Into<Bytes>) -> Self {
        Self {
            src,
            dst,
            payload: payload.into(),
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.dst == BROADCAST
    }

    pub fn endpoint(&self) -> EndpointId {
        link_endpoint(self.src, self.dst)
    }
}

/// Endpoint id of the link from `src` to `dst`. A node's unicast and
/// multicast faces transmit with different destinations, so their fragments
/// never share an endpoint at the receiver.
pub fn link_endpoint(src: NodeId, dst: NodeId) -> EndpointId {
    (EndpointId::from(src) << 8) | EndpointId::from(dst)
}
