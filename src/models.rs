//! Data models for the hotspot lifecycle and the login audit trail

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Placeholder SSID reported while the access point has to be configured by hand
pub const MANUAL_SSID: &str = "SystemHotspot (Manual)";
/// Placeholder passphrase reported while the access point has to be configured by hand
pub const MANUAL_PASSPHRASE: &str = "N/A (Manual)";

/// How much programmatic control the host platform gives over the access point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapabilityTier {
    /// Full local-access-point API with asynchronous callbacks
    Managed,
    /// No reliable API; the operator sets the access point up by hand
    LegacyManual,
    /// No access point support at all
    Unsupported,
}

impl fmt::Display for CapabilityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Managed => "managed",
            Self::LegacyManual => "legacy-manual",
            Self::Unsupported => "unsupported",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradedReason {
    ManualSetupRequired,
}

/// Lifecycle of the access point owned by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Starting,
    Active,
    Degraded(DegradedReason),
    Failed,
    Stopping,
}

impl LifecycleState {
    /// Starting and Stopping are transient; calls made during them are rejected
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Starting | Self::Stopping)
    }

    /// Only these states may carry ssid/passphrase/address values
    pub fn holds_session(&self) -> bool {
        matches!(self, Self::Active | Self::Degraded(_))
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Starting => f.write_str("starting"),
            Self::Active => f.write_str("active"),
            Self::Degraded(DegradedReason::ManualSetupRequired) => {
                f.write_str("degraded (manual setup required)")
            }
            Self::Failed => f.write_str("failed"),
            Self::Stopping => f.write_str("stopping"),
        }
    }
}

/// The current access-point instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotspotSession {
    pub ssid: Option<String>,
    pub passphrase: Option<String>,
    pub ip_address: Option<String>,
    pub state: LifecycleState,
    pub capability_tier: CapabilityTier,
}

impl HotspotSession {
    pub fn new(capability_tier: CapabilityTier) -> Self {
        Self {
            ssid: None,
            passphrase: None,
            ip_address: None,
            state: LifecycleState::Idle,
            capability_tier,
        }
    }

    /// Drop ssid, passphrase and address. The state is left to the caller.
    pub fn clear(&mut self) {
        self.ssid = None;
        self.passphrase = None;
        self.ip_address = None;
    }
}

/// Events emitted by the controller towards the attached listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Starting,
    Started {
        ssid: Option<String>,
        passphrase: Option<String>,
        ip_address: Option<String>,
    },
    Stopped,
    Failed,
    ManualSetupRequired,
}

/// Access-point configuration reported by the platform once it is up
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HotspotConfiguration {
    pub ssid: Option<String>,
    pub passphrase: Option<String>,
    pub ip_address: Option<String>,
}

/// Asynchronous result of a managed-tier start, delivered over a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    Started(HotspotConfiguration),
    Failed { reason: String },
    Stopped,
}

/// Opaque identifier of a platform network object.
///
/// The platform keeps the object; this is only a key for looking it up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetworkHandle(pub u64);

impl fmt::Display for NetworkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "network#{}", self.0)
    }
}

/// What the platform knows about a network when it becomes available
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkInfo {
    pub interface: Option<String>,
    pub wireless: bool,
    pub access_point: bool,
}

/// Login service a form was submitted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Service {
    Primary,
    MockGmail,
    MockOutlook,
    MockICloud,
}

impl Service {
    pub const DECOYS: [Service; 3] = [Service::MockGmail, Service::MockOutlook, Service::MockICloud];

    /// Name stored in the audit table
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "Primary",
            Self::MockGmail => "MockGmail",
            Self::MockOutlook => "MockOutlook",
            Self::MockICloud => "MockiCloud",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Primary" => Some(Self::Primary),
            "MockGmail" => Some(Self::MockGmail),
            "MockOutlook" => Some(Self::MockOutlook),
            "MockiCloud" => Some(Self::MockICloud),
            _ => None,
        }
    }

    /// URL slug used in selector, page and login paths
    pub fn slug(&self) -> Option<&'static str> {
        match self {
            Self::Primary => None,
            Self::MockGmail => Some("gmail"),
            Self::MockOutlook => Some("outlook"),
            Self::MockICloud => Some("icloud"),
        }
    }

    /// Asset file holding this service's login page
    pub fn page_asset(&self) -> &'static str {
        match self {
            Self::Primary => "login.html",
            Self::MockGmail => "mock_gmail_login.html",
            Self::MockOutlook => "mock_outlook_login.html",
            Self::MockICloud => "mock_icloud_login.html",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Accepted,
    Rejected,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "Accepted",
            Self::Rejected => "Rejected",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Accepted" => Some(Self::Accepted),
            "Rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// One submitted login form. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginAttempt {
    pub timestamp: DateTime<Utc>,
    pub client_identifier: String,
    pub service: Service,
    pub typed_identity: Option<String>,
    pub typed_secret: Option<String>,
    pub outcome: Outcome,
}

impl LoginAttempt {
    pub fn now(
        client_identifier: impl Into<String>,
        service: Service,
        typed_identity: Option<String>,
        typed_secret: Option<String>,
        outcome: Outcome,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            client_identifier: client_identifier.into(),
            service,
            typed_identity,
            typed_secret,
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_names_round_trip() {
        for service in [Service::Primary, Service::MockGmail, Service::MockOutlook, Service::MockICloud] {
            assert_eq!(Service::from_name(service.as_str()), Some(service));
        }
        assert_eq!(Service::from_name("Gmail"), None);
    }

    #[test]
    fn test_session_fields_only_in_holding_states() {
        assert!(LifecycleState::Active.holds_session());
        assert!(LifecycleState::Degraded(DegradedReason::ManualSetupRequired).holds_session());
        assert!(!LifecycleState::Starting.holds_session());
        assert!(!LifecycleState::Failed.holds_session());
        assert!(LifecycleState::Stopping.is_transient());
    }
}
