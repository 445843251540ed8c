//! Hotspot Gate - a local access point behind a captive-portal login
//!
//! A [`HotspotController`] brings the access point up through whatever the
//! platform supports, then serves a login page to joining clients. Accepted
//! logins are recorded and reported to the platform as validated traffic.

pub mod config;
pub mod error;
pub mod hotspot;
pub mod models;
pub mod monitor;
pub mod parser;
pub mod platform;
pub mod portal;
pub mod store;
pub mod utils;

pub use config::Config;
pub use hotspot::{drive_listener, Collaborators, HotspotController, LifecycleListener};
pub use models::{CapabilityTier, HotspotSession, LifecycleEvent, LifecycleState, LoginAttempt, Outcome, Service};
pub use portal::CaptivePortalServer;
pub use store::{CredentialStore, SqliteCredentialStore};
