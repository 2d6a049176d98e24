//! Encoding and decoding of [`WireMessage`] payloads.

use bytes::Bytes;
use prost::Message;
use thiserror::Error;

use crate::wire::{MessageKind, WireMessage};

/// Errors raised while turning messages into bytes or back.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed wire message: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("{kind:?} message must not carry a unicast payload")]
    UnexpectedUnicast { kind: MessageKind },
    #[error("{kind:?} message must not carry a prefix or path")]
    PeerEventWithRouteAttributes { kind: MessageKind },
    #[error("encoded message is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },
}

impl WireMessage {
    /// Checks the schema invariants that the type system does not enforce.
    pub fn validate(&self) -> Result<(), WireError> {
        if let (Some(kind), Some(unicast)) = (self.known_kind(), &self.unicast) {
            if !kind.carries_unicast() {
                return Err(WireError::UnexpectedUnicast { kind });
            }
            if kind.is_peer_event() && (unicast.prefix.is_some() || unicast.path.is_some()) {
                return Err(WireError::PeerEventWithRouteAttributes { kind });
            }
        }
        Ok(())
    }
}

/// Validates and serializes `msg`, refusing anything larger than `limit` bytes.
pub fn encode(msg: &WireMessage, limit: usize) -> Result<Bytes, WireError> {
    msg.validate()?;
    let size = msg.encoded_len();
    if size > limit {
        return Err(WireError::TooLarge { size, limit });
    }
    Ok(Bytes::from(msg.encode_to_vec()))
}

/// Parses a payload received from the bus.
pub fn decode(payload: &[u8]) -> Result<WireMessage, WireError> {
    Ok(WireMessage::decode(payload)?)
}
