pub type NodeId = u8;
pub type FaceId = u64;
pub type EndpointId = u64;

/// Wildcard peer / destination. Matches the SX1272 `BROADCAST_0` address.
pub const BROADCAST: NodeId = 0;

pub const SCHEME: &str = "lora";
pub const SCHEME_PREFIX: &str = "lora://";

/// Largest payload the SX127x FIFO accepts in one packet.
pub const MAX_PHY_PAYLOAD: usize = 255;

/// Link MTU exposed to the fragmentation layer.
pub const DEFAULT_MTU: usize = 160;

pub const TLV_LP_PACKET: u64 = 100;
pub const TLV_INTEREST: u64 = 5;
pub const TLV_DATA: u64 = 6;
