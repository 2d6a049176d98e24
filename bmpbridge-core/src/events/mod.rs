//! ## bmpbridge-core::events
//! **Typed routing events and the callback seam they arrive through**
//!
//! The BMP session layer is an external collaborator. It decodes router
//! feeds and reports each peer state change or route update by calling a
//! [`BmpEventCallback`]. Implementations must be cheap to call from many
//! session tasks at once.

pub mod route;

pub use route::{AsSegment, PathAttributes, PeerSession, RouteEvent};

/// Result of handing one event to the bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    /// The event could not be turned into a wire message and was dropped.
    EncodeFailed,
    /// The broker rejected the single publish attempt and the event was dropped.
    SendFailed,
}

impl PublishOutcome {
    pub fn is_published(self) -> bool {
        self == PublishOutcome::Published
    }
}

/// Receives routing events from the BMP session layer.
pub trait BmpEventCallback: Send + Sync {
    fn on_peer_up(&self, peer: &PeerSession) -> PublishOutcome;

    /// `reason` is diagnostic only and never leaves the process.
    fn on_peer_down(&self, peer: &PeerSession, reason: &str) -> PublishOutcome;

    fn on_route_monitoring(&self, event: &RouteEvent) -> PublishOutcome;
}
