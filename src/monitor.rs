//! Watches platform network changes for the access point's own interface
//!
//! The monitor holds at most one [`NetworkHandle`]. The handle is only a
//! lookup key: when the platform reports the network lost, it is dropped with
//! no reconnect attempt.

use parking_lot::Mutex;
use regex::Regex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::PlatformError;
use crate::models::{NetworkHandle, NetworkInfo};
use crate::platform::{NetworkEvent, NetworkPlatform, SubscriptionId};

/// Called with the resolved IPv4 address of a newly detected access-point network
pub type AddressCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Forwards "this network is validated" to the platform for the held handle.
///
/// Cloned out of the monitor so the portal's request path never has to touch
/// the controller's lock.
#[derive(Clone)]
pub struct ValidationReporter {
    platform: Arc<dyn NetworkPlatform>,
    held: Arc<Mutex<Option<NetworkHandle>>>,
}

impl ValidationReporter {
    pub fn report_validated(&self) {
        let held = *self.held.lock();
        match held {
            Some(handle) => self.platform.report_connectivity(handle, true),
            None => tracing::warn!("No hotspot network to report validated for"),
        }
    }
}

struct Subscription {
    id: SubscriptionId,
    task: JoinHandle<()>,
    /// Set on stop. Checked under the `held` lock, since an aborted task can
    /// still be mid-poll on another worker.
    cancelled: Arc<AtomicBool>,
}

pub struct NetworkMonitor {
    platform: Arc<dyn NetworkPlatform>,
    ap_pattern: Option<Regex>,
    held: Arc<Mutex<Option<NetworkHandle>>>,
    subscription: Option<Subscription>,
}

impl NetworkMonitor {
    pub fn new(platform: Arc<dyn NetworkPlatform>, ap_interface_pattern: &str) -> Self {
        let ap_pattern = match Regex::new(ap_interface_pattern) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!("Invalid access point interface pattern '{}': {}", ap_interface_pattern, e);
                None
            }
        };

        Self {
            platform,
            ap_pattern,
            held: Arc::new(Mutex::new(None)),
            subscription: None,
        }
    }

    pub fn reporter(&self) -> ValidationReporter {
        ValidationReporter {
            platform: self.platform.clone(),
            held: self.held.clone(),
        }
    }

    pub fn held(&self) -> Option<NetworkHandle> {
        *self.held.lock()
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    /// Subscribe to network changes. A second call while subscribed is a no-op.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&mut self, on_address: AddressCallback) -> Result<(), PlatformError> {
        if self.subscription.is_some() {
            return Ok(());
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = self.platform.subscribe(tx)?;
        *self.held.lock() = None;

        let cancelled = Arc::new(AtomicBool::new(false));
        let watch = Watch {
            platform: self.platform.clone(),
            held: self.held.clone(),
            ap_pattern: self.ap_pattern.clone(),
            cancelled: cancelled.clone(),
            on_address,
        };
        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    NetworkEvent::Available(handle) => watch.on_available(handle).await,
                    NetworkEvent::Lost(handle) => watch.on_lost(handle),
                }
            }
        });

        tracing::debug!("Network monitor subscribed");
        self.subscription = Some(Subscription { id, task, cancelled });
        Ok(())
    }

    /// Unsubscribe and drop any held handle. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.cancelled.store(true, Ordering::SeqCst);
            self.platform.unsubscribe(subscription.id);
            subscription.task.abort();
            tracing::debug!("Network monitor unsubscribed");
        }
        *self.held.lock() = None;
    }
}

impl Drop for NetworkMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Whether a reported network is the access point rather than some other
/// wireless network the host is also using
pub fn is_access_point(info: &NetworkInfo, ap_pattern: Option<&Regex>) -> bool {
    if info.access_point {
        return true;
    }
    let name_matches = match (info.interface.as_deref(), ap_pattern) {
        (Some(name), Some(re)) => re.is_match(name),
        _ => false,
    };
    info.wireless && name_matches
}

/// State shared with one subscription's event task
struct Watch {
    platform: Arc<dyn NetworkPlatform>,
    held: Arc<Mutex<Option<NetworkHandle>>>,
    ap_pattern: Option<Regex>,
    cancelled: Arc<AtomicBool>,
    on_address: AddressCallback,
}

impl Watch {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    async fn on_available(&self, handle: NetworkHandle) {
        tracing::debug!("Network available: {}", handle);
        let Some(info) = self.platform.describe(handle).await else {
            return;
        };
        if !is_access_point(&info, self.ap_pattern.as_ref()) {
            return;
        }

        {
            let mut held = self.held.lock();
            if self.is_cancelled() || held.is_some() {
                return;
            }
            *held = Some(handle);
        }
        tracing::info!(
            "Tracking access point network {} ({})",
            handle,
            info.interface.as_deref().unwrap_or("unknown interface")
        );

        if let Some(address) = self.platform.ipv4_address(handle).await {
            if !self.is_cancelled() {
                (self.on_address)(address);
            }
        }
    }

    fn on_lost(&self, handle: NetworkHandle) {
        let mut held = self.held.lock();
        if *held == Some(handle) {
            tracing::info!("Monitored hotspot network lost: {}", handle);
            *held = None;
        }
    }
}
