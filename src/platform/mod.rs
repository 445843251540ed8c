//! Host platform collaborators
//!
//! The controller and the network monitor never talk to the operating system
//! directly. Everything goes through these traits so the lifecycle logic can
//! run against NetworkManager on Linux or a fake in tests.

pub mod nmcli;

pub use nmcli::NmcliPlatform;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::PlatformError;
use crate::models::{CapabilityTier, NetworkHandle, NetworkInfo, PlatformEvent};

/// Requested access-point parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotspotRequest {
    pub ssid: String,
    pub passphrase: String,
}

/// A claim on a running managed-tier access point.
///
/// Closing must be idempotent.
pub trait Reservation: Send {
    fn close(&mut self);
}

/// Access point management
#[async_trait]
pub trait HotspotPlatform: Send + Sync {
    /// Probe what the platform supports. Called once at startup.
    fn detect_tier(&self) -> CapabilityTier;

    /// Ask the platform to bring up a local access point.
    ///
    /// Returns immediately. The outcome arrives later on `events`: exactly one
    /// `Started` or `Failed`, possibly followed by `Stopped` when the platform
    /// tears the access point down on its own.
    fn start_local_hotspot(
        &self,
        request: HotspotRequest,
        events: UnboundedSender<PlatformEvent>,
    ) -> Result<Box<dyn Reservation>, PlatformError>;

    /// Best-effort IPv4 address of the access-point interface
    async fn hotspot_ipv4(&self) -> Option<String>;
}

/// Identifies a network-change subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    Available(NetworkHandle),
    Lost(NetworkHandle),
}

/// Network-change notifications and per-network queries, scoped to
/// wireless-capable interfaces
#[async_trait]
pub trait NetworkPlatform: Send + Sync {
    fn subscribe(&self, events: UnboundedSender<NetworkEvent>) -> Result<SubscriptionId, PlatformError>;

    /// Unknown or already-removed subscriptions are ignored
    fn unsubscribe(&self, id: SubscriptionId);

    /// None when the platform no longer knows the handle
    async fn describe(&self, handle: NetworkHandle) -> Option<NetworkInfo>;

    async fn ipv4_address(&self, handle: NetworkHandle) -> Option<String>;

    /// Tell the platform's connectivity layer whether traffic on this
    /// network can be trusted. Must not block.
    fn report_connectivity(&self, handle: NetworkHandle, validated: bool);
}
