//! NDN faces over a shared half-duplex LoRa link
//!
//! A [`LoRaFactory`] owns one radio session and multiplexes any number of
//! unicast (`lora://<local>-<peer>`) and multicast (`lora://<local>`) faces
//! onto it.

pub mod channel;
pub mod error;
pub mod face;
pub mod factory;
pub mod link_service;
pub mod registry;
pub mod transport;

pub use channel::{LinkSettings, LoRaChannel};
pub use error::{FaceError, Result, FACE_CREATION_FAILED, UNSUPPORTED_PROTOCOL};
pub use face::{CreateFaceRequest, Face, FaceParams, FacePersistency};
pub use factory::{ChannelTables, LoRaFactory};
pub use link_service::{LinkService, LinkServiceOptions};
pub use registry::{Channel, ConfigSection, FactoryRegistry, ProtocolFactory};
pub use transport::{LoRaTransport, TransportCounters, TransportState};
