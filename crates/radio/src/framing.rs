use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bytes::{BufMut, BytesMut};
use log::{trace, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};

use ndn_lora_core::{block::var_number_len, Block, EndpointId, MAX_PHY_PAYLOAD, TLV_LP_PACKET};
use crate::RadioError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentHeader {
    pub message_id: u64,
    pub fragment_index: u16,
    pub total_fragments: u16,
}

impl FragmentHeader {
    pub fn encode(&self) -> Result<Vec<u8>, RadioError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| RadioError::MalformedFragment(e.to_string()))
    }

    /// Returns the header and the number of bytes it occupied.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), RadioError> {
        bincode::serde::decode_from_slice(buf, bincode::config::standard())
            .map_err(|e| RadioError::MalformedFragment(e.to_string()))
    }

    /// Largest encoding the variable-length header can take.
    fn max_encoded_len() -> usize {
        FragmentHeader {
            message_id: u64::MAX,
            fragment_index: u16::MAX,
            total_fragments: u16::MAX,
        }
        .encode()
        .map(|v| v.len())
        .unwrap_or(15)
    }
}

struct ReassemblyState {
    fragments: HashMap<u16, Vec<u8>>,
    total_fragments: u16,
    last_seen: Instant,
}

type ReassemblyMap = HashMap<(EndpointId, u64), ReassemblyState>;

/// Splits network packets into MTU-sized `LpPacket` fragments and puts them
/// back together on the receiving side.
pub struct RadioFramer {
    mtu: usize,
    payload_size: usize,
    message_counter: AtomicU64,
    reassembly_timeout: Duration,
    reassembly: Mutex<ReassemblyMap>,
}

impl RadioFramer {
    pub fn new(mtu: usize, reassembly_timeout: Duration) -> Result<Self, RadioError> {
        if mtu > MAX_PHY_PAYLOAD {
            return Err(RadioError::InvalidMtu {
                mtu,
                min: 0,
                max: MAX_PHY_PAYLOAD,
            });
        }
        let overhead = 1 + var_number_len(mtu as u64) + FragmentHeader::max_encoded_len();
        if mtu <= overhead {
            return Err(RadioError::InvalidMtu {
                mtu,
                min: overhead + 1,
                max: MAX_PHY_PAYLOAD,
            });
        }

        Ok(Self {
            mtu,
            payload_size: mtu - overhead,
            // random start so a restarted or second framer on the same
            // node does not replay message ids still pending at a receiver
            message_counter: AtomicU64::new(rand::rng().random()),
            reassembly_timeout,
            reassembly: Mutex::new(HashMap::new()),
        })
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Bytes of network packet carried per fragment.
    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    pub fn fragment(&self, packet: &Block) -> Result<Vec<Block>, RadioError> {
        let wire = packet.encode();
        let chunks: Vec<_> = wire.chunks(self.payload_size).collect();
        if chunks.len() > u16::MAX as usize {
            return Err(RadioError::PacketTooLarge {
                size: wire.len(),
                mtu: self.payload_size * u16::MAX as usize,
            });
        }
        let total_fragments = chunks.len() as u16;
        let message_id = self.message_counter.fetch_add(1, Ordering::Relaxed);

        let mut fragments = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.iter().enumerate() {
            let header = FragmentHeader {
                message_id,
                fragment_index: index as u16,
                total_fragments,
            }
            .encode()?;
            let mut value = BytesMut::with_capacity(header.len() + chunk.len());
            value.put_slice(&header);
            value.put_slice(chunk);
            fragments.push(Block::new(TLV_LP_PACKET, value.freeze()));
        }

        trace!(
            "Fragmented {} byte packet into {} fragments (message {})",
            wire.len(),
            total_fragments,
            message_id
        );
        Ok(fragments)
    }

    /// Feeds one received fragment. Returns the network packet once every
    /// fragment of its message has arrived. Blocks that are not `LpPacket`s
    /// are bare network packets and come straight back.
    pub fn reassemble(&self, sender: EndpointId, packet: Block) -> Result<Option<Block>, RadioError> {
        if packet.tlv_type() != TLV_LP_PACKET {
            return Ok(Some(packet));
        }

        let (header, header_len) = FragmentHeader::decode(packet.value())?;
        if header.total_fragments == 0 || header.fragment_index >= header.total_fragments {
            return Err(RadioError::MalformedFragment(format!(
                "fragment {} of {}",
                header.fragment_index, header.total_fragments
            )));
        }
        let data = &packet.value()[header_len..];

        let now = Instant::now();
        let mut reassembly = self.lock_reassembly();
        self.evict_expired(&mut reassembly, now);

        if header.total_fragments == 1 {
            return Ok(Some(Block::decode(data)?));
        }

        let key = (sender, header.message_id);
        let state = reassembly.entry(key).or_insert_with(|| ReassemblyState {
            fragments: HashMap::new(),
            total_fragments: header.total_fragments,
            last_seen: now,
        });
        if state.total_fragments != header.total_fragments {
            reassembly.remove(&key);
            return Err(RadioError::MalformedFragment(format!(
                "message {} changed fragment count",
                header.message_id
            )));
        }
        state.last_seen = now;
        state.fragments.insert(header.fragment_index, data.to_vec());

        if state.fragments.len() < state.total_fragments as usize {
            return Ok(None);
        }

        let mut complete = Vec::new();
        for i in 0..state.total_fragments {
            match state.fragments.get(&i) {
                Some(fragment) => complete.extend_from_slice(fragment),
                None => {
                    warn!("Missing fragment {} for message from {}", i, sender);
                    return Ok(None);
                }
            }
        }
        reassembly.remove(&key);
        Ok(Some(Block::decode(&complete)?))
    }

    /// Messages currently waiting for more fragments.
    pub fn pending(&self) -> usize {
        let mut reassembly = self.lock_reassembly();
        self.evict_expired(&mut reassembly, Instant::now());
        reassembly.len()
    }

    fn lock_reassembly(&self) -> MutexGuard<'_, ReassemblyMap> {
        self.reassembly
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn evict_expired(&self, reassembly: &mut ReassemblyMap, now: Instant) {
        let timeout = self.reassembly_timeout;
        reassembly.retain(|key, state| {
            if now.duration_since(state.last_seen) >= timeout {
                warn!(
                    "Dropping incomplete message {} from {}, received {}/{} fragments",
                    key.1,
                    key.0,
                    state.fragments.len(),
                    state.total_fragments
                );
                false
            } else {
                true
            }
        });
    }
}
