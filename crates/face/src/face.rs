use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use ndn_lora_core::{Block, FaceId, FaceUri};

use crate::error::Result;
use crate::link_service::LinkService;
use crate::transport::{LoRaTransport, TransportState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FacePersistency {
    OnDemand,
    #[default]
    Persistent,
    /// Survives transport errors.
    Permanent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FaceParams {
    pub persistency: FacePersistency,
    pub want_reliability: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateFaceRequest {
    pub remote_uri: String,
    pub local_uri: Option<String>,
    pub params: FaceParams,
}

impl CreateFaceRequest {
    pub fn new(remote_uri: impl Into<String>) -> Self {
        Self {
            remote_uri: remote_uri.into(),
            local_uri: None,
            params: FaceParams::default(),
        }
    }

    pub fn with_params(mut self, params: FaceParams) -> Self {
        self.params = params;
        self
    }
}

/// A link service and its transport, bound to one radio address.
pub struct Face {
    id: FaceId,
    remote_uri: FaceUri,
    link_service: Arc<LinkService>,
    transport: LoRaTransport,
    inbound: Mutex<mpsc::UnboundedReceiver<Block>>,
}

impl Face {
    pub(crate) fn new(
        id: FaceId,
        remote_uri: FaceUri,
        link_service: Arc<LinkService>,
        transport: LoRaTransport,
        inbound: mpsc::UnboundedReceiver<Block>,
    ) -> Self {
        Self {
            id,
            remote_uri,
            link_service,
            transport,
            inbound: Mutex::new(inbound),
        }
    }

    pub fn id(&self) -> FaceId {
        self.id
    }

    pub fn remote_uri(&self) -> FaceUri {
        self.remote_uri
    }

    pub fn link_service(&self) -> &LinkService {
        &self.link_service
    }

    pub fn transport(&self) -> &LoRaTransport {
        &self.transport
    }

    pub fn state(&self) -> TransportState {
        self.transport.state()
    }

    pub fn send(&self, packet: &Block) -> Result<()> {
        self.link_service.send_packet(packet, &self.transport)
    }

    /// Next complete network packet received on this face.
    pub async fn recv(&self) -> Option<Block> {
        self.inbound.lock().await.recv().await
    }

    pub fn try_recv(&self) -> Option<Block> {
        self.inbound.try_lock().ok()?.try_recv().ok()
    }

    pub fn close(&self) {
        self.transport.close();
    }
}

impl fmt::Debug for Face {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Face")
            .field("id", &self.id)
            .field("remote_uri", &self.remote_uri.to_string())
            .field("transport", &self.transport)
            .finish()
    }
}
