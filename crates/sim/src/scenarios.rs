//! Simulation scenarios for NDN faces over a shared LoRa channel

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info};
use tokio::time::{timeout, Instant};

use ndn_lora_core::{Block, NodeId, TLV_DATA, TLV_INTEREST};
use ndn_lora_face::{CreateFaceRequest, Face, LoRaFactory};
use ndn_lora_radio::{RadioConfig, SimulatedEther};

use crate::{air_time, spawn_node};

#[derive(Debug, Clone, Copy, Default)]
pub struct ScenarioReport {
    pub sent: usize,
    pub received: usize,
    pub elapsed: Duration,
    pub bytes: usize,
}

impl ScenarioReport {
    pub fn delivery_ratio(&self) -> f64 {
        if self.sent == 0 {
            return 0.0;
        }
        self.received as f64 / self.sent as f64
    }

    pub fn goodput_bps(&self) -> f64 {
        if self.elapsed.is_zero() {
            return 0.0;
        }
        (self.bytes * 8) as f64 / self.elapsed.as_secs_f64()
    }
}

async fn open_face(node: &LoRaFactory, uri: &str) -> Result<Arc<Face>> {
    node.try_create_face(&CreateFaceRequest::new(uri))
        .await
        .with_context(|| format!("creating face {}", uri))
}

/// Waits for a packet carrying `value`, discarding late replies to earlier
/// requests.
async fn recv_matching(face: &Face, value: &[u8], wait: Duration) -> Option<Block> {
    let deadline = Instant::now() + wait;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, face.recv()).await {
            Ok(Some(packet)) if packet.value().as_ref() == value => return Some(packet),
            Ok(Some(packet)) => debug!("Discarding stale packet of {} bytes", packet.encoded_len()),
            Ok(None) | Err(_) => return None,
        }
    }
}

fn node_pair(config: &RadioConfig, a: NodeId, b: NodeId) -> Result<(SimulatedEther, LoRaFactory, LoRaFactory)> {
    let ether = SimulatedEther::new();
    let node_a = spawn_node(&ether, config, a)?;
    let node_b = spawn_node(&ether, config, b)?;
    Ok((ether, node_a, node_b))
}

/// Interest/Data round trips between two unicast faces. The far node echoes
/// every Interest back as Data with the same value.
pub async fn ping_test(config: RadioConfig, count: usize) -> Result<ScenarioReport> {
    println!("\n=== Ping Test ===");
    let (ether, node_a, node_b) = node_pair(&config, 3, 5)?;
    let client = open_face(&node_a, "lora://3-5").await?;
    let server = open_face(&node_b, "lora://5-3").await?;

    let echo = tokio::spawn({
        let server = server.clone();
        async move {
            while let Some(interest) = server.recv().await {
                let reply = Block::new(TLV_DATA, interest.value().clone());
                if let Err(e) = server.send(&reply) {
                    debug!("Echo failed: {}", e);
                }
            }
        }
    });

    let wait = air_time(&config, config.mtu) * 2 + Duration::from_secs(1);
    let mut report = ScenarioReport::default();
    let start = Instant::now();
    for seq in 0..count {
        let value = format!("/ping/{}", seq).into_bytes();
        client.send(&Block::new(TLV_INTEREST, value.clone()))?;
        report.sent += 1;

        let sent_at = Instant::now();
        match recv_matching(&client, &value, wait).await {
            Some(reply) => {
                report.received += 1;
                report.bytes += reply.encoded_len();
                println!("  ✓ ping {} answered in {:?}", seq, sent_at.elapsed());
            }
            None => println!("  ✗ ping {} timed out after {:?}", seq, wait),
        }
    }
    report.elapsed = start.elapsed();
    echo.abort();

    let (on_air, dropped, bytes) = ether.get_stats();
    println!(
        "  {} of {} answered ({:.0}%), {} frames on air, {} lost, {} bytes",
        report.received,
        report.sent,
        report.delivery_ratio() * 100.0,
        on_air,
        dropped,
        bytes
    );

    node_a.shutdown().await;
    node_b.shutdown().await;
    Ok(report)
}

/// One multicast sender, several multicast listeners. Every listener should
/// hear every broadcast.
pub async fn broadcast_test(config: RadioConfig, listeners: usize, count: usize) -> Result<ScenarioReport> {
    println!("\n=== Broadcast Test ===");
    let listeners = listeners.min(usize::from(NodeId::MAX) - 1);
    let ether = SimulatedEther::new();
    let sender_node = spawn_node(&ether, &config, 1)?;
    let sender = open_face(&sender_node, "lora://1").await?;

    let mut nodes = Vec::with_capacity(listeners);
    for i in 0..listeners {
        let id = NodeId::try_from(i + 2)?;
        let node = spawn_node(&ether, &config, id)?;
        let face = open_face(&node, &format!("lora://{}", id)).await?;
        nodes.push((node, face));
    }

    let start = Instant::now();
    for seq in 0..count {
        sender.send(&Block::new(TLV_INTEREST, format!("/hello/{}", seq).into_bytes()))?;
    }
    // everything is queued; give the sender time to put it on the air
    tokio::time::sleep(air_time(&config, config.mtu) * count as u32 + Duration::from_millis(200)).await;

    let mut report = ScenarioReport {
        sent: count * listeners,
        ..Default::default()
    };
    for (node, face) in &nodes {
        let mut heard = 0;
        while let Some(packet) = face.try_recv() {
            heard += 1;
            report.bytes += packet.encoded_len();
        }
        println!("  node {} heard {} of {}", node.config().settings.node_address, heard, count);
        report.received += heard;
    }
    report.elapsed = start.elapsed();
    println!("  delivery ratio {:.0}%", report.delivery_ratio() * 100.0);

    sender_node.shutdown().await;
    for (node, _) in nodes {
        node.shutdown().await;
    }
    Ok(report)
}

/// Sends Data packets of growing size across one unicast link; anything over
/// the MTU is carried as several fragments.
pub async fn fragmentation_test(config: RadioConfig, sizes: &[usize]) -> Result<ScenarioReport> {
    println!("\n=== Fragmentation Test ===");
    let (_ether, node_a, node_b) = node_pair(&config, 3, 5)?;
    let sender = open_face(&node_a, "lora://3-5").await?;
    let receiver = open_face(&node_b, "lora://5-3").await?;

    let mut report = ScenarioReport::default();
    for (i, &size) in sizes.iter().enumerate() {
        let mut value = vec![0x55; size];
        if let Some(first) = value.first_mut() {
            *first = i as u8;
        }
        let packet = Block::new(TLV_DATA, value.clone());
        let frames = packet.encoded_len().div_ceil(config.mtu / 2).max(1);
        let wait = air_time(&config, config.mtu) * (frames as u32 + 1) + Duration::from_secs(1);

        let start = Instant::now();
        sender.send(&packet)?;
        report.sent += 1;
        match recv_matching(&receiver, &value, wait).await {
            Some(_) => {
                let elapsed = start.elapsed();
                report.received += 1;
                report.bytes += packet.encoded_len();
                report.elapsed += elapsed;
                println!(
                    "  ✓ {} bytes in {:?} ({:.0} bps)",
                    size,
                    elapsed,
                    (packet.encoded_len() * 8) as f64 / elapsed.as_secs_f64()
                );
            }
            None => println!("  ✗ {} bytes lost (a fragment went missing)", size),
        }
    }

    if let Some(stats) = node_a.loop_stats() {
        info!("sender loop: {:?}", stats);
        println!(
            "  {} frames transmitted, goodput {:.0} bps",
            stats.frames_transmitted,
            report.goodput_bps()
        );
    }

    node_a.shutdown().await;
    node_b.shutdown().await;
    Ok(report)
}
