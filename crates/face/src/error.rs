use ndn_lora_core::{AddressError, FrameError};
use ndn_lora_radio::{QueueError, RadioError};
use thiserror::Error;

/// Code reported through the face-creation failure callback.
pub const FACE_CREATION_FAILED: u32 = 504;

/// Code reported when no factory handles the URI scheme.
pub const UNSUPPORTED_PROTOCOL: u32 = 406;

#[derive(Debug, Error)]
pub enum FaceError {
    #[error("invalid face URI: {0}")]
    Address(#[from] AddressError),

    #[error("Face already exists for {0}")]
    DuplicateFace(String),

    #[error("{uri} is not a {expected} URI")]
    WrongChannelKind { uri: String, expected: &'static str },

    #[error("Unable to create transport and link service: {0}")]
    Construction(String),

    #[error("transport {0} is not up")]
    TransportClosed(String),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Radio(#[from] RadioError),

    #[error("invalid frame: {0}")]
    InvalidFrame(#[from] FrameError),

    #[error("Unsupported protocol {0:?}")]
    UnsupportedScheme(String),

    #[error("scheme {0:?} is already provided by another factory")]
    SchemeTaken(String),

    #[error("LoRa factory must be created inside a tokio runtime: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

impl FaceError {
    /// Numeric code for callback-style reporting.
    pub fn code(&self) -> u32 {
        match self {
            FaceError::UnsupportedScheme(_) => UNSUPPORTED_PROTOCOL,
            _ => FACE_CREATION_FAILED,
        }
    }
}

pub type Result<T> = std::result::Result<T, FaceError>;
