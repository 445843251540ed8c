//! Error types for each component

use crate::models::LifecycleState;
use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HotspotError {
    #[error("hotspot is busy ({0}), try again once the transition completes")]
    Busy(LifecycleState),

    #[error("hotspot can only be started when idle (currently {0})")]
    NotIdle(LifecycleState),

    #[error("manual setup confirmation is only valid while manual setup is required (currently {0})")]
    NotAwaitingManualSetup(LifecycleState),
}

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("`{command}` failed: {reason}")]
    Command { command: String, reason: String },

    #[error("platform I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation not supported by this platform")]
    Unsupported,
}

#[derive(Debug, Error)]
pub enum PortalError {
    #[error("failed to bind portal on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt login record {id}: {reason}")]
    Corrupt { id: i64, reason: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormError {
    #[error("form body is not valid UTF-8")]
    InvalidUtf8,

    #[error("form field `{0}` is not valid percent-encoding")]
    InvalidEncoding(String),
}
