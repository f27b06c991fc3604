//! LoRa radio layer: hardware session, send queue and the half-duplex I/O loop

use std::time::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use ndn_lora_core::{BlockError, FrameError, DEFAULT_MTU, MAX_PHY_PAYLOAD};

pub mod driver;
pub mod framing;
pub mod scheduler;
pub mod simulated;
pub mod network_core;

pub use driver::{
    Bandwidth, CodingRate, DriverError, HeaderMode, PowerLevel, RadioDriver, RadioSession,
    RadioSettings, SpreadingFactor,
};
pub use framing::{FragmentHeader, RadioFramer};
pub use scheduler::{send_queue, QueueError, QueueStats, SendQueue, SendQueueReceiver};
pub use simulated::{SimulatedEther, SimulatedRadio};
pub use network_core::{LoopStats, LoopStep, RadioIoLoop, RadioLoopHandle};

#[derive(Debug, Error)]
pub enum RadioError {
    #[error("packet of {size} bytes exceeds radio MTU {mtu}")]
    PacketTooLarge { size: usize, mtu: usize },

    #[error("MTU {mtu} outside supported range {min}..={max}")]
    InvalidMtu { mtu: usize, min: usize, max: usize },

    #[error("malformed fragment: {0}")]
    MalformedFragment(String),

    #[error("invalid frame: {0}")]
    InvalidFrame(#[from] FrameError),

    #[error("invalid TLV block: {0}")]
    InvalidBlock(#[from] BlockError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("radio session is not operational")]
    NotOperational,

    #[error("failed to spawn radio I/O thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// What to do with several packets drained in one receive burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BurstPolicy {
    /// Every packet read in the burst is dispatched.
    #[default]
    DeliverAll,
    /// Only the last packet of the burst is dispatched; earlier ones are
    /// overwritten the way a single receive buffer would.
    LatestOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioConfig {
    pub mtu: usize,
    pub transmit_timeout: Duration,
    pub poll_interval: Duration,
    pub send_queue_capacity: usize,
    pub inbound_queue_capacity: usize,
    pub burst_policy: BurstPolicy,
    pub reassembly_timeout: Duration,
    /// Air rate used by the simulated radio; 0 disables air-time delays.
    pub bandwidth_bps: u32,
    /// Loss probability used by the simulated radio.
    pub packet_loss: f32,
    pub latency: Duration,
    pub settings: RadioSettings,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            transmit_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(5),
            send_queue_capacity: 1024,
            inbound_queue_capacity: 256,
            burst_policy: BurstPolicy::DeliverAll,
            reassembly_timeout: Duration::from_secs(30),
            bandwidth_bps: 21_875,
            packet_loss: 0.0,
            latency: Duration::ZERO,
            settings: RadioSettings::default(),
        }
    }
}

impl RadioConfig {
    pub fn validate(&self) -> Result<(), RadioError> {
        if self.mtu == 0 || self.mtu > MAX_PHY_PAYLOAD {
            return Err(RadioError::InvalidMtu {
                mtu: self.mtu,
                min: 1,
                max: MAX_PHY_PAYLOAD,
            });
        }
        Ok(())
    }
}
