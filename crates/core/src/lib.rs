//! core data types for NDN over LoRa faces

pub mod address;
pub mod block;
pub mod frame;
pub mod types;

pub use address::{uri_scheme, AddressError, FaceUri, RadioAddress};
pub use block::{Block, BlockError};
pub use frame::{link_endpoint, FrameError, InboundFrame, OutboundFrame};
pub use types::*;
