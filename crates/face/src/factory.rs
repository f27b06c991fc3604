//! LoRa protocol factory
//!
//! Owns the radio session through the I/O loop, the shared send queue and
//! the two channel tables. Unicast channels are keyed by `lora://<local>-<peer>`
//! and multicast channels by `lora://<local>`; keys are always the canonical
//! form of the parsed URI.
//!
//! Frames heard by the radio are fanned out by a dispatcher task on the tokio
//! runtime the factory was created on. A single frame can reach several
//! channels: every unicast channel whose peer sent it and whose local id it
//! was addressed to, and every multicast channel listening on the destination.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use log::{debug, error, info, trace, warn};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use ndn_lora_core::{Block, FaceUri, InboundFrame, SCHEME};
use ndn_lora_radio::{
    send_queue, LoopStats, QueueStats, RadioConfig, RadioIoLoop, RadioLoopHandle, RadioSession,
    SendQueue,
};

use crate::channel::{LinkSettings, LoRaChannel};
use crate::error::{FaceError, Result, FACE_CREATION_FAILED};
use crate::face::{CreateFaceRequest, Face};
use crate::registry::{Channel, ConfigSection, ProtocolFactory};

type ChannelTable = RwLock<BTreeMap<String, Arc<LoRaChannel>>>;

/// Unicast and multicast channel tables, shared with the dispatcher task.
#[derive(Clone, Default)]
pub struct ChannelTables {
    unicast: Arc<ChannelTable>,
    multicast: Arc<ChannelTable>,
}

impl ChannelTables {
    fn table_for(&self, uri: &FaceUri) -> &ChannelTable {
        if uri.is_multicast() {
            &self.multicast
        } else {
            &self.unicast
        }
    }

    /// Delivers one received frame to every matching channel and returns the
    /// number of deliveries. Frames that do not decode are dropped.
    pub async fn dispatch(&self, frame: &InboundFrame) -> usize {
        let packet = match Block::decode(&frame.payload) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(
                    "Dropping undecodable frame from {} to {}: {}",
                    frame.src, frame.dst, e
                );
                return 0;
            }
        };
        let endpoint = frame.endpoint();

        let mut delivered = 0;
        for channel in self.unicast.read().await.values() {
            if channel.address().accepts_unicast(frame.src, frame.dst) {
                channel.deliver(packet.clone(), endpoint);
                delivered += 1;
            }
        }
        for channel in self.multicast.read().await.values() {
            if channel.address().accepts_multicast(frame.dst) {
                channel.deliver(packet.clone(), endpoint);
                delivered += 1;
            }
        }

        if delivered == 0 {
            debug!("No channel for frame from {} to {}", frame.src, frame.dst);
        } else {
            trace!(
                "Frame from {} to {} delivered to {} channel(s)",
                frame.src,
                frame.dst,
                delivered
            );
        }
        delivered
    }
}

pub struct LoRaFactory {
    config: RadioConfig,
    link: LinkSettings,
    tables: ChannelTables,
    send_queue: SendQueue,
    next_face_id: AtomicU64,
    operational: bool,
    io_loop: Mutex<Option<RadioLoopHandle>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl LoRaFactory {
    pub const ID: &'static str = "lora";

    /// Builds the factory and, when the session configured correctly, starts
    /// the radio I/O loop. A failed session still yields a factory; its faces
    /// cannot transmit.
    pub fn new(config: RadioConfig, session: RadioSession) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current()?;

        let (queue, queue_rx) = send_queue(config.send_queue_capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_queue_capacity);
        let operational = session.is_operational();

        let io_loop = if operational {
            let handle = RadioIoLoop::new(session, queue_rx, inbound_tx, &config).spawn()?;
            info!(
                "LoRa factory started, MTU {} bytes, send queue capacity {}",
                config.mtu, config.send_queue_capacity
            );
            Some(handle)
        } else {
            error!("LoRa radio is not operational, no I/O loop started");
            None
        };

        let tables = ChannelTables::default();
        let dispatcher = runtime.spawn(run_dispatcher(tables.clone(), inbound_rx));

        Ok(Self {
            link: LinkSettings {
                mtu: config.mtu,
                reassembly_timeout: config.reassembly_timeout,
            },
            config,
            tables,
            send_queue: queue,
            next_face_id: AtomicU64::new(1),
            operational,
            io_loop: Mutex::new(io_loop),
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }

    pub fn get_id() -> &'static str {
        Self::ID
    }

    pub fn config(&self) -> &RadioConfig {
        &self.config
    }

    pub fn is_operational(&self) -> bool {
        self.operational
    }

    pub fn tables(&self) -> &ChannelTables {
        &self.tables
    }

    /// Creates the face for `request.remote_uri`, failing if a channel
    /// already exists for that address.
    pub async fn try_create_face(&self, request: &CreateFaceRequest) -> Result<Arc<Face>> {
        let uri = FaceUri::parse(&request.remote_uri)?;
        if request.local_uri.is_some() {
            debug!("Ignoring local URI for {}", uri);
        }

        let channel = {
            let mut table = self.tables.table_for(&uri).write().await;
            if table.contains_key(&uri.to_string()) {
                return Err(FaceError::DuplicateFace(request.remote_uri.clone()));
            }
            get_or_insert(&mut table, uri)
        };

        let face_id = self.next_face_id.fetch_add(1, Ordering::Relaxed);
        channel.try_create_face(&self.send_queue, &request.params, &self.link, face_id)
    }

    /// Callback form of [`LoRaFactory::try_create_face`]. Every failure is
    /// reported with [`FACE_CREATION_FAILED`].
    pub async fn create_face<C, F>(&self, request: &CreateFaceRequest, on_created: C, on_failure: F)
    where
        C: FnOnce(Arc<Face>),
        F: FnOnce(u32, String),
    {
        match self.try_create_face(request).await {
            Ok(face) => {
                info!("Created face {} for {}", face.id(), face.remote_uri());
                on_created(face)
            }
            Err(e) => {
                error!("{}", e);
                on_failure(FACE_CREATION_FAILED, e.to_string());
            }
        }
    }

    pub async fn create_channel(&self, uri: &str) -> Result<Arc<LoRaChannel>> {
        let parsed = FaceUri::parse(uri)?;
        if parsed.is_multicast() {
            return Err(FaceError::WrongChannelKind {
                uri: uri.to_string(),
                expected: "unicast",
            });
        }
        Ok(get_or_insert(&mut *self.tables.unicast.write().await, parsed))
    }

    pub async fn create_multicast_channel(&self, uri: &str) -> Result<Arc<LoRaChannel>> {
        let parsed = FaceUri::parse(uri)?;
        if !parsed.is_multicast() {
            return Err(FaceError::WrongChannelKind {
                uri: uri.to_string(),
                expected: "multicast",
            });
        }
        Ok(get_or_insert(&mut *self.tables.multicast.write().await, parsed))
    }

    /// Unicast channels first, then multicast channels, each in key order.
    pub async fn channels(&self) -> Vec<Arc<LoRaChannel>> {
        let mut channels: Vec<_> = self.tables.unicast.read().await.values().cloned().collect();
        channels.extend(self.tables.multicast.read().await.values().cloned());
        channels
    }

    pub async fn dispatch(&self, frame: &InboundFrame) -> usize {
        self.tables.dispatch(frame).await
    }

    pub fn loop_stats(&self) -> Option<LoopStats> {
        self.lock_io_loop().as_ref().map(RadioLoopHandle::stats)
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.send_queue.stats()
    }

    /// Stops the I/O loop, waits for the dispatcher to drain and returns the
    /// radio session if a loop was running.
    pub async fn shutdown(&self) -> Option<RadioSession> {
        let handle = self.lock_io_loop().take();
        let session = match handle {
            Some(handle) => match tokio::task::spawn_blocking(move || handle.shutdown()).await {
                Ok(session) => session,
                Err(e) => {
                    error!("LoRa I/O loop shutdown failed: {}", e);
                    None
                }
            },
            None => None,
        };

        let dispatcher = lock(&self.dispatcher).take();
        if let Some(dispatcher) = dispatcher {
            // the loop owned the only sender, so the dispatcher ends on its own
            if let Err(e) = dispatcher.await {
                error!("LoRa dispatcher task failed: {}", e);
            }
        }
        info!("LoRa factory shut down");
        session
    }

    fn lock_io_loop(&self) -> MutexGuard<'_, Option<RadioLoopHandle>> {
        lock(&self.io_loop)
    }
}

#[async_trait]
impl ProtocolFactory for LoRaFactory {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn provided_schemes(&self) -> Vec<&'static str> {
        vec![SCHEME]
    }

    async fn create_face(&self, request: &CreateFaceRequest) -> Result<Arc<Face>> {
        self.try_create_face(request).await
    }

    async fn list_channels(&self) -> Vec<Arc<dyn Channel>> {
        self.channels()
            .await
            .into_iter()
            .map(|channel| channel as Arc<dyn Channel>)
            .collect()
    }

    fn process_config(&self, section: Option<&ConfigSection>) -> Result<()> {
        debug!(
            "LoRa factory ignores configuration ({} keys)",
            section.map_or(0, |s| s.len())
        );
        Ok(())
    }
}

async fn run_dispatcher(tables: ChannelTables, mut inbound: mpsc::Receiver<InboundFrame>) {
    while let Some(frame) = inbound.recv().await {
        tables.dispatch(&frame).await;
    }
    debug!("LoRa dispatcher stopped");
}

fn get_or_insert(table: &mut BTreeMap<String, Arc<LoRaChannel>>, uri: FaceUri) -> Arc<LoRaChannel> {
    table
        .entry(uri.to_string())
        .or_insert_with(|| Arc::new(LoRaChannel::new(uri)))
        .clone()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::{FaceParams, FacePersistency};
    use ndn_lora_core::{AddressError, NodeId, BROADCAST, TLV_DATA, TLV_INTEREST, TLV_LP_PACKET};
    use ndn_lora_radio::driver::STATUS_ERROR;
    use ndn_lora_radio::{
        DriverError, FragmentHeader, RadioDriver, RadioSettings, SimulatedEther,
    };
    use std::time::Duration;

    fn sim_config(node_address: NodeId) -> RadioConfig {
        let mut config = RadioConfig {
            bandwidth_bps: 0,
            poll_interval: Duration::from_millis(1),
            ..Default::default()
        };
        config.settings.node_address = node_address;
        config
    }

    fn factory_on(ether: &SimulatedEther, node_address: NodeId) -> LoRaFactory {
        let config = sim_config(node_address);
        let session = RadioSession::open(ether.attach(&config), config.settings.clone());
        LoRaFactory::new(config, session).unwrap()
    }

    async fn face(factory: &LoRaFactory, uri: &str) -> Arc<Face> {
        factory
            .try_create_face(&CreateFaceRequest::new(uri))
            .await
            .unwrap()
    }

    fn interest(value: &[u8]) -> Block {
        Block::new(TLV_INTEREST, value.to_vec())
    }

    struct DeadRadio;

    impl RadioDriver for DeadRadio {
        fn configure(&mut self, _settings: &RadioSettings) -> std::result::Result<(), DriverError> {
            Err(DriverError::new("configure", STATUS_ERROR))
        }

        fn set_node_address(&mut self, _id: NodeId) -> std::result::Result<(), DriverError> {
            Ok(())
        }

        fn transmit(
            &mut self,
            _dest: NodeId,
            _payload: &[u8],
            _timeout: Duration,
        ) -> std::result::Result<(), DriverError> {
            Err(DriverError::new("transmit", STATUS_ERROR))
        }

        fn start_receive(&mut self) -> std::result::Result<(), DriverError> {
            Ok(())
        }

        fn data_available(&mut self) -> bool {
            false
        }

        fn receive_packet(&mut self) -> std::result::Result<InboundFrame, DriverError> {
            Err(DriverError::new("receive", STATUS_ERROR))
        }
    }

    #[tokio::test]
    async fn test_second_face_for_same_uri_is_duplicate() {
        let factory = factory_on(&SimulatedEther::new(), 3);
        let first = face(&factory, "lora://3-5").await;
        assert_eq!(first.id(), 1);

        let err = factory
            .try_create_face(&CreateFaceRequest::new("lora://3-5"))
            .await
            .unwrap_err();
        assert!(matches!(err, FaceError::DuplicateFace(_)));

        let mut failure = None;
        factory
            .create_face(
                &CreateFaceRequest::new("lora://3-5"),
                |_| panic!("duplicate face created"),
                |code, message| failure = Some((code, message)),
            )
            .await;
        let (code, message) = failure.unwrap();
        assert_eq!(code, FACE_CREATION_FAILED);
        assert_eq!(message, "Face already exists for lora://3-5");
        assert_eq!(factory.channels().await.len(), 1);
    }

    #[tokio::test]
    async fn test_differently_formatted_uri_is_duplicate() {
        let factory = factory_on(&SimulatedEther::new(), 3);
        face(&factory, "lora://3-5").await;

        assert!(matches!(
            factory.try_create_face(&CreateFaceRequest::new("lora://03-005")).await,
            Err(FaceError::DuplicateFace(_))
        ));
    }

    #[tokio::test]
    async fn test_unicast_and_multicast_tables_are_independent() {
        let factory = factory_on(&SimulatedEther::new(), 3);
        face(&factory, "lora://3").await;
        face(&factory, "lora://3-5").await;
        face(&factory, "lora://2-7").await;

        let uris: Vec<_> = factory
            .list_channels()
            .await
            .iter()
            .map(|c| c.uri())
            .collect();
        assert_eq!(uris, vec!["lora://2-7", "lora://3-5", "lora://3"]);
    }

    #[tokio::test]
    async fn test_callback_reports_created_face() {
        let factory = factory_on(&SimulatedEther::new(), 3);
        let request = CreateFaceRequest::new("lora://3-5").with_params(FaceParams {
            persistency: FacePersistency::Permanent,
            want_reliability: false,
        });

        let mut created = None;
        factory
            .create_face(
                &request,
                |face| created = Some(face),
                |code, message| panic!("unexpected failure {}: {}", code, message),
            )
            .await;

        let face = created.unwrap();
        assert_eq!(face.transport().persistency(), FacePersistency::Permanent);
        assert_eq!(face.remote_uri(), FaceUri::parse("lora://3-5").unwrap());
    }

    #[tokio::test]
    async fn test_bad_uri_reported_through_callback() {
        let factory = factory_on(&SimulatedEther::new(), 3);
        let mut code = None;
        factory
            .create_face(
                &CreateFaceRequest::new("lora://3-x"),
                |_| panic!("face created from bad URI"),
                |c, _| code = Some(c),
            )
            .await;
        assert_eq!(code, Some(FACE_CREATION_FAILED));
        assert!(factory.channels().await.is_empty());
    }

    #[tokio::test]
    async fn test_create_channel_is_idempotent() {
        let factory = factory_on(&SimulatedEther::new(), 3);
        let a = factory.create_channel("lora://3-5").await.unwrap();
        let b = factory.create_channel("lora://03-5").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.size(), 0);

        assert!(matches!(
            factory.create_channel("lora://3").await,
            Err(FaceError::WrongChannelKind { .. })
        ));
        assert!(matches!(
            factory.create_multicast_channel("lora://3-5").await,
            Err(FaceError::WrongChannelKind { .. })
        ));
        factory.create_multicast_channel("lora://3").await.unwrap();
        assert_eq!(factory.channels().await.len(), 2);
    }

    #[tokio::test]
    async fn test_fan_out_to_matching_channels() {
        let factory = factory_on(&SimulatedEther::new(), 3);
        let uni_3_5 = face(&factory, "lora://3-5").await;
        let uni_3_9 = face(&factory, "lora://3-9").await;
        let uni_4_5 = face(&factory, "lora://4-5").await;
        let multi_3 = face(&factory, "lora://3").await;
        let multi_4 = face(&factory, "lora://4").await;
        let packet = interest(b"/a");

        let delivered = factory
            .dispatch(&InboundFrame::new(5, 3, packet.encode()))
            .await;
        assert_eq!(delivered, 2);
        assert_eq!(uni_3_5.try_recv(), Some(packet.clone()));
        assert_eq!(multi_3.try_recv(), Some(packet.clone()));
        assert_eq!(uni_3_9.try_recv(), None);
        assert_eq!(uni_4_5.try_recv(), None);
        assert_eq!(multi_4.try_recv(), None);

        let delivered = factory
            .dispatch(&InboundFrame::new(9, 3, packet.encode()))
            .await;
        assert_eq!(delivered, 2);
        assert_eq!(uni_3_9.try_recv(), Some(packet.clone()));
        assert_eq!(multi_3.try_recv(), Some(packet.clone()));
        assert_eq!(uni_3_5.try_recv(), None);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_listener_of_sender() {
        let factory = factory_on(&SimulatedEther::new(), 3);
        let uni_3_5 = face(&factory, "lora://3-5").await;
        let uni_4_5 = face(&factory, "lora://4-5").await;
        let uni_3_9 = face(&factory, "lora://3-9").await;
        let multi_3 = face(&factory, "lora://3").await;
        let multi_4 = face(&factory, "lora://4").await;
        let packet = Block::new(TLV_DATA, vec![1, 2, 3]);

        let delivered = factory
            .dispatch(&InboundFrame::new(5, BROADCAST, packet.encode()))
            .await;
        assert_eq!(delivered, 4);
        for face in [&uni_3_5, &uni_4_5, &multi_3, &multi_4] {
            assert_eq!(face.try_recv(), Some(packet.clone()));
        }
        assert_eq!(uni_3_9.try_recv(), None);
    }

    #[tokio::test]
    async fn test_undecodable_frame_is_dropped() {
        let factory = factory_on(&SimulatedEther::new(), 3);
        let face = face(&factory, "lora://3-5").await;

        assert_eq!(factory.dispatch(&InboundFrame::new(5, 3, vec![5, 9, 1])).await, 0);
        assert_eq!(factory.dispatch(&InboundFrame::new(5, 3, Vec::new())).await, 0);
        assert_eq!(face.try_recv(), None);
    }

    fn fragments_with_id(packet: &Block, message_id: u64, chunk: usize) -> Vec<Block> {
        let wire = packet.encode();
        let chunks: Vec<_> = wire.chunks(chunk).collect();
        let total_fragments = chunks.len() as u16;
        chunks
            .iter()
            .enumerate()
            .map(|(i, data)| {
                let mut value = FragmentHeader {
                    message_id,
                    fragment_index: i as u16,
                    total_fragments,
                }
                .encode()
                .unwrap();
                value.extend_from_slice(data);
                Block::new(TLV_LP_PACKET, value)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_interleaved_fragments_from_two_faces_of_one_sender() {
        // node 3 sends on lora://3-5 and lora://3 with the same message id
        let factory = factory_on(&SimulatedEther::new(), 5);
        let multicast = face(&factory, "lora://5").await;
        let unicast = face(&factory, "lora://5-3").await;

        let a = Block::new(TLV_DATA, vec![0xAA; 400]);
        let b = Block::new(TLV_DATA, vec![0xBB; 400]);
        let frags_a = fragments_with_id(&a, 0, 120);
        let frags_b = fragments_with_id(&b, 0, 120);
        for (fa, fb) in frags_a.into_iter().zip(frags_b) {
            factory.dispatch(&InboundFrame::new(3, 5, fa.encode())).await;
            factory
                .dispatch(&InboundFrame::new(3, BROADCAST, fb.encode()))
                .await;
        }

        for face in [&multicast, &unicast] {
            assert_eq!(face.try_recv(), Some(a.clone()));
            assert_eq!(face.try_recv(), Some(b.clone()));
            assert_eq!(face.try_recv(), None);
            assert_eq!(face.link_service().pending_reassembly(), 0);
        }
    }

    #[tokio::test]
    async fn test_broadcast_peer_uri_rejected() {
        let factory = factory_on(&SimulatedEther::new(), 3);
        assert!(matches!(
            factory.try_create_face(&CreateFaceRequest::new("lora://3-0")).await,
            Err(FaceError::Address(AddressError::BroadcastPeer(_)))
        ));
        assert!(factory.channels().await.is_empty());

        let multicast = face(&factory, "lora://3").await;
        let packet = interest(b"/x");
        let delivered = factory
            .dispatch(&InboundFrame::new(BROADCAST, 3, packet.encode()))
            .await;
        assert_eq!(delivered, 1);
        assert_eq!(multicast.try_recv(), Some(packet));
    }

    #[tokio::test]
    async fn test_two_nodes_exchange_packets_over_the_air() {
        let ether = SimulatedEther::new();
        let node_a = factory_on(&ether, 3);
        let node_b = factory_on(&ether, 5);
        let face_a = face(&node_a, "lora://3-5").await;
        let face_b = face(&node_b, "lora://5-3").await;

        let small = interest(b"/ping");
        face_a.send(&small).unwrap();
        let received = tokio::time::timeout(Duration::from_secs(5), face_b.recv())
            .await
            .unwrap();
        assert_eq!(received, Some(small));

        // larger than one radio frame, arrives as several fragments
        let large = Block::new(TLV_DATA, vec![0xab; 600]);
        face_b.send(&large).unwrap();
        let received = tokio::time::timeout(Duration::from_secs(5), face_a.recv())
            .await
            .unwrap();
        assert_eq!(received, Some(large));
        assert!(node_b.loop_stats().unwrap().frames_transmitted > 1);

        assert!(node_a.shutdown().await.is_some());
        assert!(node_b.shutdown().await.is_some());
    }

    #[tokio::test]
    async fn test_multicast_face_hears_broadcast_from_peer() {
        let ether = SimulatedEther::new();
        let node_a = factory_on(&ether, 3);
        let node_b = factory_on(&ether, 5);
        let sender = face(&node_a, "lora://3").await;
        let listener = face(&node_b, "lora://5").await;

        let packet = interest(b"/hello");
        sender.send(&packet).unwrap();
        let received = tokio::time::timeout(Duration::from_secs(5), listener.recv())
            .await
            .unwrap();
        assert_eq!(received, Some(packet));
    }

    #[tokio::test]
    async fn test_failed_radio_still_builds_factory() {
        let config = RadioConfig::default();
        let session = RadioSession::open(DeadRadio, config.settings.clone());
        let factory = LoRaFactory::new(config, session).unwrap();

        assert!(!factory.is_operational());
        assert!(factory.loop_stats().is_none());

        let face = face(&factory, "lora://3-5").await;
        assert!(matches!(
            face.send(&interest(b"/x")),
            Err(FaceError::Queue(_))
        ));
        assert!(factory.shutdown().await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = RadioConfig {
            mtu: 512,
            ..Default::default()
        };
        let session = RadioSession::open(DeadRadio, config.settings.clone());
        assert!(matches!(
            LoRaFactory::new(config, session),
            Err(FaceError::Radio(_))
        ));
    }

    #[tokio::test]
    async fn test_process_config_is_accepted() {
        let factory = factory_on(&SimulatedEther::new(), 3);
        let mut section = ConfigSection::new();
        section.insert("mtu".to_string(), "120".to_string());
        assert!(factory.process_config(Some(&section)).is_ok());
        assert!(factory.process_config(None).is_ok());
        assert_eq!(factory.config().mtu, 160);
    }

    #[test]
    fn test_factory_needs_runtime() {
        let config = RadioConfig::default();
        let session = RadioSession::open(DeadRadio, config.settings.clone());
        assert!(matches!(
            LoRaFactory::new(config, session),
            Err(FaceError::NoRuntime(_))
        ));
    }
}
