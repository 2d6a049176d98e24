//! # BMP Bridge Wire Protocol
//!
//! The protobuf schema exchanged over the message bus, its codec, and the
//! text rendering shared by the consumers.

pub mod codec;
pub mod present;
pub mod wire;

pub use codec::{decode, encode, WireError};
pub use wire::{
    AsPathSegment, BgpPath, Community, Ip, IpVersion, MessageKind, Prefix, UnicastPayload,
    WireMessage,
};
