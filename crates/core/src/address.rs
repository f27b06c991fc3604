//! Face URI parsing and radio addressing
//!
//! Unicast faces are written `lora://<local>-<peer>`, broadcast (multicast)
//! faces `lora://<local>`. Ids are decimal and must fit in a byte.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{NodeId, BROADCAST, SCHEME_PREFIX};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("face URI {0:?} does not start with lora://")]
    BadScheme(String),

    #[error("face URI {uri:?} has an empty {field} id")]
    MissingId { uri: String, field: &'static str },

    #[error("face URI {0:?} names the broadcast address as its peer")]
    BroadcastPeer(String),

    #[error("face URI {uri:?} has invalid {field} id {value:?}")]
    InvalidId {
        uri: String,
        field: &'static str,
        value: String,
    },
}

/// Sender id and destination id of one radio link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RadioAddress {
    pub local_id: NodeId,
    pub peer_id: NodeId,
}

impl RadioAddress {
    pub const fn new(local_id: NodeId, peer_id: NodeId) -> Self {
        Self { local_id, peer_id }
    }

    pub const fn broadcast(local_id: NodeId) -> Self {
        Self {
            local_id,
            peer_id: BROADCAST,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.peer_id == BROADCAST
    }

    /// Unicast match: the frame must come from our peer and be addressed to
    /// us or to everyone. Our own `local_id` is irrelevant for broadcasts.
    /// A broadcast address has no peer and matches nothing.
    pub fn accepts_unicast(&self, src: NodeId, dst: NodeId) -> bool {
        !self.is_broadcast() && self.peer_id == src && (self.local_id == dst || dst == BROADCAST)
    }

    /// Multicast match: any sender, addressed to us or to everyone.
    pub fn accepts_multicast(&self, dst: NodeId) -> bool {
        self.local_id == dst || dst == BROADCAST
    }
}

impl fmt::Display for RadioAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.local_id, self.peer_id)
    }
}

/// Parsed `lora://` face URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaceUri {
    Unicast { local_id: NodeId, peer_id: NodeId },
    Multicast { local_id: NodeId },
}

impl FaceUri {
    pub fn parse(uri: &str) -> Result<Self, AddressError> {
        let rest = uri
            .strip_prefix(SCHEME_PREFIX)
            .ok_or_else(|| AddressError::BadScheme(uri.to_string()))?;

        match rest.split_once('-') {
            Some((local, peer)) => {
                let local_id = parse_id(uri, "local", local)?;
                let peer_id = parse_id(uri, "peer", peer)?;
                if peer_id == BROADCAST {
                    return Err(AddressError::BroadcastPeer(uri.to_string()));
                }
                Ok(FaceUri::Unicast { local_id, peer_id })
            }
            None => Ok(FaceUri::Multicast {
                local_id: parse_id(uri, "local", rest)?,
            }),
        }
    }

    pub fn is_multicast(&self) -> bool {
        matches!(self, FaceUri::Multicast { .. })
    }

    pub fn address(&self) -> RadioAddress {
        match *self {
            FaceUri::Unicast { local_id, peer_id } => RadioAddress::new(local_id, peer_id),
            FaceUri::Multicast { local_id } => RadioAddress::broadcast(local_id),
        }
    }
}

impl fmt::Display for FaceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaceUri::Unicast { local_id, peer_id } => {
                write!(f, "{SCHEME_PREFIX}{local_id}-{peer_id}")
            }
            FaceUri::Multicast { local_id } => write!(f, "{SCHEME_PREFIX}{local_id}"),
        }
    }
}

impl FromStr for FaceUri {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FaceUri::parse(s)
    }
}

/// Returns the scheme part of any `scheme://...` URI.
pub fn uri_scheme(uri: &str) -> Option<&str> {
    uri.split_once("://")
        .map(|(scheme, _)| scheme)
        .filter(|scheme| !scheme.is_empty())
}

fn parse_id(uri: &str, field: &'static str, value: &str) -> Result<NodeId, AddressError> {
    if value.is_empty() {
        return Err(AddressError::MissingId {
            uri: uri.to_string(),
            field,
        });
    }
    // u8::from_str accepts a leading '+', ids are plain digits only
    if !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AddressError::InvalidId {
            uri: uri.to_string(),
            field,
            value: value.to_string(),
        });
    }
    value.parse::<NodeId>().map_err(|_| AddressError::InvalidId {
        uri: uri.to_string(),
        field,
        value: value.to_string(),
    })
}
