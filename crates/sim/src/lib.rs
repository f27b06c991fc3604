//! simulation tools for NDN over LoRa

pub mod scenarios;

use std::time::Duration;

use anyhow::Result;
use ndn_lora_core::NodeId;
use ndn_lora_face::LoRaFactory;
use ndn_lora_radio::{
    Bandwidth, RadioConfig, RadioSession, RadioSettings, SimulatedEther, SpreadingFactor,
};

pub struct SimulationPresets;

impl SimulationPresets {
    /// SF7 at 500 kHz, a few hundred meters line of sight.
    pub fn short_range() -> RadioConfig {
        RadioConfig {
            bandwidth_bps: 21_875,
            packet_loss: 0.01,
            latency: Duration::from_millis(5),
            ..Default::default()
        }
    }

    pub fn suburban() -> RadioConfig {
        RadioConfig {
            bandwidth_bps: 1_760,
            packet_loss: 0.10,
            latency: Duration::from_millis(20),
            settings: RadioSettings {
                bandwidth: Bandwidth::Khz125,
                spreading_factor: SpreadingFactor::Sf9,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// SF12 at 125 kHz: a full 160 byte frame is over four seconds of air time.
    pub fn long_range() -> RadioConfig {
        RadioConfig {
            bandwidth_bps: 293,
            packet_loss: 0.25,
            latency: Duration::from_millis(50),
            transmit_timeout: Duration::from_secs(10),
            settings: RadioSettings {
                bandwidth: Bandwidth::Khz125,
                spreading_factor: SpreadingFactor::Sf12,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// No air time and no loss.
    pub fn lossless() -> RadioConfig {
        RadioConfig {
            bandwidth_bps: 0,
            packet_loss: 0.0,
            poll_interval: Duration::from_millis(1),
            ..Default::default()
        }
    }
}

/// Air time of `bytes` at the configured rate, latency included.
pub fn air_time(config: &RadioConfig, bytes: usize) -> Duration {
    if config.bandwidth_bps == 0 {
        return config.latency;
    }
    Duration::from_secs_f64((bytes * 8) as f64 / config.bandwidth_bps as f64) + config.latency
}

/// Starts a LoRa factory for `node_address` on the shared ether.
pub fn spawn_node(ether: &SimulatedEther, config: &RadioConfig, node_address: NodeId) -> Result<LoRaFactory> {
    let mut config = config.clone();
    config.settings.node_address = node_address;
    let session = RadioSession::open(ether.attach(&config), config.settings.clone());
    Ok(LoRaFactory::new(config, session)?)
}
