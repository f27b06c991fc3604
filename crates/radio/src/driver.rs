//! Radio driver interface and the one-time hardware session

use std::fmt;
use std::time::Duration;

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use ndn_lora_core::{InboundFrame, NodeId};

/// Generic failure status, as returned by the SX127x library.
pub const STATUS_ERROR: i32 = 1;
/// The command was not executed (radio off, nothing to read, ...).
pub const STATUS_NOT_EXECUTED: i32 = 2;

/// Non-zero status from a driver call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("radio {op} failed with status {status}")]
pub struct DriverError {
    pub op: &'static str,
    pub status: i32,
}

impl DriverError {
    pub fn new(op: &'static str, status: i32) -> Self {
        Self { op, status }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CodingRate {
    #[default]
    Cr4_5,
    Cr4_6,
    Cr4_7,
    Cr4_8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Bandwidth {
    Khz125,
    Khz250,
    #[default]
    Khz500,
}

impl Bandwidth {
    pub fn hz(&self) -> u32 {
        match self {
            Bandwidth::Khz125 => 125_000,
            Bandwidth::Khz250 => 250_000,
            Bandwidth::Khz500 => 500_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SpreadingFactor {
    Sf6,
    #[default]
    Sf7,
    Sf8,
    Sf9,
    Sf10,
    Sf11,
    Sf12,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HeaderMode {
    #[default]
    Explicit,
    Implicit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PowerLevel {
    Low,
    #[default]
    High,
    Max,
}

/// Register-level settings applied once when the session is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioSettings {
    pub coding_rate: CodingRate,
    pub bandwidth: Bandwidth,
    pub spreading_factor: SpreadingFactor,
    pub header_mode: HeaderMode,
    /// Center frequency; the default is SX1272 `CH_00_900`.
    pub frequency_hz: u32,
    pub crc: bool,
    pub power: PowerLevel,
    pub node_address: NodeId,
}

impl Default for RadioSettings {
    fn default() -> Self {
        Self {
            coding_rate: CodingRate::Cr4_5,
            bandwidth: Bandwidth::Khz500,
            spreading_factor: SpreadingFactor::Sf7,
            header_mode: HeaderMode::Explicit,
            frequency_hz: 903_080_000,
            crc: true,
            power: PowerLevel::High,
            node_address: 3,
        }
    }
}

/// Blocking access to one LoRa transceiver.
///
/// Implementations are driven from the radio I/O thread only; none of the
/// calls are expected to be cheap.
pub trait RadioDriver: Send + 'static {
    /// Power the module on and apply every register setting.
    fn configure(&mut self, settings: &RadioSettings) -> Result<(), DriverError>;

    /// Source address stamped on subsequent transmissions.
    fn set_node_address(&mut self, id: NodeId) -> Result<(), DriverError>;

    fn transmit(&mut self, dest: NodeId, payload: &[u8], timeout: Duration)
        -> Result<(), DriverError>;

    /// Put the transceiver back into continuous receive mode.
    fn start_receive(&mut self) -> Result<(), DriverError>;

    fn data_available(&mut self) -> bool;

    fn receive_packet(&mut self) -> Result<InboundFrame, DriverError>;
}

impl<T: RadioDriver + ?Sized> RadioDriver for Box<T> {
    fn configure(&mut self, settings: &RadioSettings) -> Result<(), DriverError> {
        (**self).configure(settings)
    }

    fn set_node_address(&mut self, id: NodeId) -> Result<(), DriverError> {
        (**self).set_node_address(id)
    }

    fn transmit(
        &mut self,
        dest: NodeId,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<(), DriverError> {
        (**self).transmit(dest, payload, timeout)
    }

    fn start_receive(&mut self) -> Result<(), DriverError> {
        (**self).start_receive()
    }

    fn data_available(&mut self) -> bool {
        (**self).data_available()
    }

    fn receive_packet(&mut self) -> Result<InboundFrame, DriverError> {
        (**self).receive_packet()
    }
}

/// The single owned handle on the radio hardware.
///
/// Opening the session performs the one-time configuration. A session whose
/// configuration failed stays usable as a value but reports itself as not
/// operational and the factory will not start an I/O loop on it.
pub struct RadioSession {
    driver: Box<dyn RadioDriver>,
    settings: RadioSettings,
    operational: bool,
}

impl RadioSession {
    pub fn open(driver: impl RadioDriver, settings: RadioSettings) -> Self {
        let mut driver: Box<dyn RadioDriver> = Box::new(driver);

        let operational = match driver.configure(&settings) {
            Ok(()) => {
                if let Err(e) = driver.start_receive() {
                    warn!("Unable to enter receive mode: {}", e);
                }
                info!(
                    "LoRa radio configured: {:?} {:?} {:?} at {} Hz, node address {}",
                    settings.coding_rate,
                    settings.bandwidth,
                    settings.spreading_factor,
                    settings.frequency_hz,
                    settings.node_address
                );
                true
            }
            Err(e) => {
                error!("LoRa radio configuration failed, faces will not transmit: {}", e);
                false
            }
        };

        Self {
            driver,
            settings,
            operational,
        }
    }

    pub fn is_operational(&self) -> bool {
        self.operational
    }

    pub fn settings(&self) -> &RadioSettings {
        &self.settings
    }

    pub fn driver_mut(&mut self) -> &mut dyn RadioDriver {
        self.driver.as_mut()
    }

    pub fn into_driver(self) -> Box<dyn RadioDriver> {
        self.driver
    }
}

impl fmt::Debug for RadioSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RadioSession")
            .field("settings", &self.settings)
            .field("operational", &self.operational)
            .finish()
    }
}
