//! LoRa channel: one radio address, at most one face

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{error, info, warn};
use tokio::sync::mpsc;

use ndn_lora_core::{Block, EndpointId, FaceId, FaceUri, RadioAddress};
use ndn_lora_radio::SendQueue;

use crate::error::{FaceError, Result, FACE_CREATION_FAILED};
use crate::face::{Face, FaceParams};
use crate::link_service::{LinkService, LinkServiceOptions};
use crate::registry::Channel;
use crate::transport::LoRaTransport;

/// Link parameters shared by every face a factory creates.
#[derive(Debug, Clone, Copy)]
pub struct LinkSettings {
    pub mtu: usize,
    pub reassembly_timeout: Duration,
}

pub struct LoRaChannel {
    uri: FaceUri,
    face: Mutex<Option<Arc<Face>>>,
}

impl LoRaChannel {
    pub fn new(uri: FaceUri) -> Self {
        info!("[{}] Creating channel", uri);
        Self {
            uri,
            face: Mutex::new(None),
        }
    }

    pub fn face_uri(&self) -> FaceUri {
        self.uri
    }

    pub fn address(&self) -> RadioAddress {
        self.uri.address()
    }

    pub fn face(&self) -> Option<Arc<Face>> {
        self.lock_face().clone()
    }

    /// Builds the channel's face. The link service always fragments and
    /// reassembles; reliability follows the request parameters.
    pub fn try_create_face(
        &self,
        queue: &SendQueue,
        params: &FaceParams,
        link: &LinkSettings,
        face_id: FaceId,
    ) -> Result<Arc<Face>> {
        info!("[{}] Creating face", self.uri);
        let options = LinkServiceOptions {
            allow_fragmentation: true,
            allow_reassembly: true,
            reliability_enabled: params.want_reliability,
        };

        let (upper_tx, upper_rx) = mpsc::unbounded_channel();
        let link_service = Arc::new(LinkService::new(
            options,
            link.mtu,
            link.reassembly_timeout,
            upper_tx,
        )?);
        let transport = LoRaTransport::new(
            self.address(),
            link.mtu,
            params.persistency,
            queue.clone(),
            link_service.clone(),
        );

        let face = Arc::new(Face::new(face_id, self.uri, link_service, transport, upper_rx));
        *self.lock_face() = Some(face.clone());
        Ok(face)
    }

    /// Callback form of [`LoRaChannel::try_create_face`].
    pub fn create_face<C, F>(
        &self,
        queue: &SendQueue,
        params: &FaceParams,
        link: &LinkSettings,
        face_id: FaceId,
        on_created: C,
        on_failure: F,
    ) where
        C: FnOnce(Arc<Face>),
        F: FnOnce(u32, String),
    {
        match self.try_create_face(queue, params, link, face_id) {
            Ok(face) => on_created(face),
            Err(e) => {
                error!("[{}] {}", self.uri, e);
                let message = match &e {
                    FaceError::Construction(_) => e.to_string(),
                    other => FaceError::Construction(other.to_string()).to_string(),
                };
                on_failure(FACE_CREATION_FAILED, message);
            }
        }
    }

    /// Routes a received packet to this channel's face.
    pub fn deliver(&self, packet: Block, endpoint: EndpointId) {
        match self.face() {
            Some(face) => face.transport().receive(packet, endpoint),
            None => warn!("[{}] No face yet, dropping packet from {}", self.uri, endpoint),
        }
    }

    fn lock_face(&self) -> MutexGuard<'_, Option<Arc<Face>>> {
        self.face.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Channel for LoRaChannel {
    fn uri(&self) -> String {
        self.uri.to_string()
    }

    fn is_listening(&self) -> bool {
        true
    }

    fn size(&self) -> usize {
        usize::from(self.lock_face().is_some())
    }
}

impl fmt::Debug for LoRaChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoRaChannel")
            .field("uri", &self.uri.to_string())
            .field("faces", &self.size())
            .finish()
    }
}
