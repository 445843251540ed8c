//! Hotspot lifecycle controller
//!
//! Owns the session, the captive portal and the network monitor, and drives
//! the access point through the capability tier picked at startup:
//!
//! ```text
//! Idle -> Starting -> { Active, Degraded(ManualSetupRequired), Failed } -> Stopping -> Idle
//! ```
//!
//! Platform callbacks, network notifications and portal requests all arrive on
//! different tasks. Every state transition and session mutation happens under
//! one lock. Events for the listener go through a channel, so the listener runs
//! on whatever task drains it.

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::config::Config;
use crate::error::HotspotError;
use crate::models::{
    CapabilityTier, DegradedReason, HotspotSession, LifecycleEvent, LifecycleState, PlatformEvent,
    MANUAL_PASSPHRASE, MANUAL_SSID,
};
use crate::monitor::{AddressCallback, NetworkMonitor, ValidationReporter};
use crate::platform::{HotspotPlatform, HotspotRequest, NetworkPlatform, Reservation};
use crate::portal::{AuthCallback, CaptivePortalServer, PageAssets};
use crate::store::CredentialStore;
use crate::utils::strip_quotes;

const MANUAL_SETUP: LifecycleState = LifecycleState::Degraded(DegradedReason::ManualSetupRequired);

/// Receiver side of the lifecycle events
pub trait LifecycleListener {
    fn starting(&mut self);
    fn started(&mut self, ssid: Option<&str>, passphrase: Option<&str>, ip_address: Option<&str>);
    fn stopped(&mut self);
    fn failed(&mut self);
    fn manual_setup_required(&mut self);
}

/// Deliver events to `listener` until the controller drops the channel or
/// attaches a different one
pub async fn drive_listener<L>(mut events: UnboundedReceiver<LifecycleEvent>, listener: &mut L)
where
    L: LifecycleListener + ?Sized,
{
    while let Some(event) = events.recv().await {
        match event {
            LifecycleEvent::Starting => listener.starting(),
            LifecycleEvent::Started {
                ssid,
                passphrase,
                ip_address,
            } => listener.started(ssid.as_deref(), passphrase.as_deref(), ip_address.as_deref()),
            LifecycleEvent::Stopped => listener.stopped(),
            LifecycleEvent::Failed => listener.failed(),
            LifecycleEvent::ManualSetupRequired => listener.manual_setup_required(),
        }
    }
}

/// Everything the controller talks to
pub struct Collaborators {
    pub hotspot: Arc<dyn HotspotPlatform>,
    pub network: Arc<dyn NetworkPlatform>,
    pub assets: Arc<dyn PageAssets>,
    pub store: Arc<dyn CredentialStore>,
}

struct Inner {
    session: HotspotSession,
    reservation: Option<Box<dyn Reservation>>,
    server: CaptivePortalServer,
    monitor: NetworkMonitor,
    /// Bumped on every start and teardown; platform callbacks from an older
    /// generation are ignored
    generation: u64,
    listener: Option<UnboundedSender<LifecycleEvent>>,
}

impl Inner {
    fn emit(&self, event: LifecycleEvent) {
        if let Some(listener) = &self.listener {
            if listener.send(event).is_err() {
                tracing::debug!("Lifecycle listener is gone, event dropped");
            }
        }
    }

    fn emit_started(&self) {
        self.emit(LifecycleEvent::Started {
            ssid: self.session.ssid.clone(),
            passphrase: self.session.passphrase.clone(),
            ip_address: self.session.ip_address.clone(),
        });
    }

    fn set_state(&mut self, state: LifecycleState) {
        tracing::info!("Hotspot {} -> {}", self.session.state, state);
        self.session.state = state;
    }

    /// Release everything the session holds. Each step tolerates resources
    /// that are already gone.
    fn teardown(&mut self) {
        self.generation += 1;
        if let Some(mut reservation) = self.reservation.take() {
            reservation.close();
        }
        self.server.stop();
        self.monitor.stop();
        self.session.clear();
    }

    fn fail(&mut self) {
        self.teardown();
        self.set_state(LifecycleState::Failed);
        self.emit(LifecycleEvent::Failed);
    }

    fn shut_down(&mut self) {
        if self.session.state == LifecycleState::Idle {
            tracing::debug!("Hotspot already idle, reconciling listener");
            self.teardown();
            self.emit(LifecycleEvent::Stopped);
            return;
        }
        self.set_state(LifecycleState::Stopping);
        self.teardown();
        self.set_state(LifecycleState::Idle);
        self.emit(LifecycleEvent::Stopped);
    }
}

pub struct HotspotController {
    this: Weak<HotspotController>,
    platform: Arc<dyn HotspotPlatform>,
    validator: ValidationReporter,
    start_timeout: Duration,
    inner: Mutex<Inner>,
}

impl HotspotController {
    pub fn new(tier: CapabilityTier, parts: Collaborators, config: &Config) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Self>| {
            let weak = this.clone();
            let on_success: Arc<dyn AuthCallback> = Arc::new(move || {
                if let Some(controller) = weak.upgrade() {
                    controller.report_validated();
                }
            });

            let server = CaptivePortalServer::new(config.portal.clone(), parts.assets, parts.store, on_success);
            let monitor = NetworkMonitor::new(parts.network, &config.monitor.ap_interface_pattern);
            let validator = monitor.reporter();

            tracing::debug!("Hotspot controller created for {} tier", tier);
            Self {
                this: this.clone(),
                platform: parts.hotspot,
                validator,
                start_timeout: config.hotspot.start_timeout(),
                inner: Mutex::new(Inner {
                    session: HotspotSession::new(tier),
                    reservation: None,
                    server,
                    monitor,
                    generation: 0,
                    listener: None,
                }),
            }
        })
    }

    /// Attach the listener channel, replacing any previous one
    pub fn subscribe(&self) -> UnboundedReceiver<LifecycleEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().listener = Some(tx);
        rx
    }

    pub fn detach_listener(&self) {
        self.inner.lock().listener = None;
    }

    pub fn session(&self) -> HotspotSession {
        self.inner.lock().session.clone()
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.lock().session.state
    }

    pub fn portal_addr(&self) -> Option<SocketAddr> {
        self.inner.lock().server.local_addr()
    }

    /// True only while the portal accepts connections and a network name is set
    pub fn is_active(&self) -> bool {
        let inner = self.inner.lock();
        inner.server.is_listening() && inner.session.ssid.is_some()
    }

    /// Start the access point. Only valid from `Idle`.
    ///
    /// Platform failures are not errors here: they end in `Failed` or
    /// `Degraded` and are reported through the listener.
    pub async fn start(&self, ssid: &str, passphrase: &str) -> Result<(), HotspotError> {
        let (tier, generation) = {
            let mut inner = self.inner.lock();
            match inner.session.state {
                LifecycleState::Idle => {}
                state if state.is_transient() => return Err(HotspotError::Busy(state)),
                state => return Err(HotspotError::NotIdle(state)),
            }
            inner.generation += 1;
            inner.set_state(LifecycleState::Starting);
            inner.emit(LifecycleEvent::Starting);
            (inner.session.capability_tier, inner.generation)
        };

        match tier {
            CapabilityTier::Managed => self.start_managed(ssid, passphrase, generation),
            CapabilityTier::LegacyManual => self.start_legacy(generation).await,
            CapabilityTier::Unsupported => {
                tracing::warn!("Programmatic hotspot creation is not supported on this platform");
                let mut inner = self.inner.lock();
                inner.teardown();
                inner.set_state(MANUAL_SETUP);
                inner.emit(LifecycleEvent::ManualSetupRequired);
            }
        }
        Ok(())
    }

    fn start_managed(&self, ssid: &str, passphrase: &str, generation: u64) {
        let (tx, rx) = mpsc::unbounded_channel();
        let request = HotspotRequest {
            ssid: ssid.to_string(),
            passphrase: passphrase.to_string(),
        };

        let mut inner = self.inner.lock();
        match self.platform.start_local_hotspot(request, tx) {
            Ok(reservation) => {
                inner.reservation = Some(reservation);
                tokio::spawn(pump_platform_events(
                    self.this.clone(),
                    self.platform.clone(),
                    generation,
                    rx,
                    self.start_timeout,
                ));
            }
            Err(e) => {
                tracing::error!("Local hotspot request failed: {}", e);
                inner.fail();
            }
        }
    }

    async fn start_legacy(&self, generation: u64) {
        tracing::warn!("No programmatic hotspot control, manual setup required");
        let ip_address = self.platform.hotspot_ipv4().await;

        let mut inner = self.inner.lock();
        if inner.generation != generation || inner.session.state != LifecycleState::Starting {
            return;
        }
        inner.session.ssid = Some(MANUAL_SSID.to_string());
        inner.session.passphrase = Some(MANUAL_PASSPHRASE.to_string());
        inner.session.ip_address = ip_address;
        inner.set_state(MANUAL_SETUP);
        inner.emit(LifecycleEvent::ManualSetupRequired);
    }

    /// Called once the operator has brought the access point up by hand.
    /// Starts the portal and the monitor and moves to `Active`.
    pub async fn confirm_manual_setup(&self) -> Result<(), HotspotError> {
        let generation = {
            let inner = self.inner.lock();
            if inner.session.state != MANUAL_SETUP {
                return Err(HotspotError::NotAwaitingManualSetup(inner.session.state));
            }
            inner.generation
        };

        let ip_address = self.platform.hotspot_ipv4().await;

        let mut inner = self.inner.lock();
        if inner.generation != generation || inner.session.state != MANUAL_SETUP {
            return Err(HotspotError::NotAwaitingManualSetup(inner.session.state));
        }
        inner.session.ssid.get_or_insert_with(|| MANUAL_SSID.to_string());
        inner.session.passphrase.get_or_insert_with(|| MANUAL_PASSPHRASE.to_string());
        if ip_address.is_some() {
            inner.session.ip_address = ip_address;
        }
        self.bring_up_services(&mut inner);
        Ok(())
    }

    /// Stop the access point and reconcile the listener. From `Idle` this
    /// still emits `Stopped`. Rejected while a transition is in flight.
    pub fn stop(&self) -> Result<(), HotspotError> {
        let mut inner = self.inner.lock();
        let state = inner.session.state;
        if state.is_transient() {
            return Err(HotspotError::Busy(state));
        }
        inner.shut_down();
        Ok(())
    }

    /// Authentication-success hook for the portal. Never blocks on the
    /// controller lock.
    pub fn report_validated(&self) {
        self.validator.report_validated();
    }

    /// Start portal and monitor, then enter `Active`; a portal that cannot
    /// bind fails the whole start
    fn bring_up_services(&self, inner: &mut Inner) {
        if let Err(e) = inner.server.start() {
            tracing::error!("Captive portal could not start: {}", e);
            inner.fail();
            return;
        }
        if let Err(e) = inner.monitor.start(self.address_callback()) {
            tracing::warn!("Network monitor unavailable: {}", e);
        }
        inner.set_state(LifecycleState::Active);
        inner.emit_started();
    }

    fn address_callback(&self) -> AddressCallback {
        let weak = self.this.clone();
        Arc::new(move |address: String| {
            if let Some(controller) = weak.upgrade() {
                controller.on_address_resolved(address);
            }
        })
    }

    fn on_address_resolved(&self, address: String) {
        let mut inner = self.inner.lock();
        if !inner.session.state.holds_session() || inner.session.ssid.is_none() {
            return;
        }
        if inner.session.ip_address.as_deref() == Some(address.as_str()) {
            return;
        }
        tracing::info!("Hotspot network IP updated: {}", address);
        inner.session.ip_address = Some(address);
        inner.emit_started();
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner.lock().generation == generation
    }

    fn apply_platform_event(&self, generation: u64, event: PlatformEvent) {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            tracing::debug!("Ignoring stale platform event {:?}", event);
            return;
        }

        match event {
            PlatformEvent::Started(config) => {
                if inner.session.state != LifecycleState::Starting {
                    tracing::warn!("Platform reported start while {}", inner.session.state);
                    return;
                }
                inner.session.ssid = config.ssid.as_deref().map(strip_quotes);
                inner.session.passphrase = config.passphrase.as_deref().map(strip_quotes);
                inner.session.ip_address = config.ip_address;
                tracing::info!(
                    "Local hotspot started. SSID: {:?}, IP: {:?}",
                    inner.session.ssid,
                    inner.session.ip_address
                );
                self.bring_up_services(&mut inner);
            }
            PlatformEvent::Failed { reason } => {
                tracing::error!("Local hotspot failed: {}", reason);
                inner.fail();
            }
            PlatformEvent::Stopped => {
                tracing::info!("Local hotspot stopped by the platform");
                inner.shut_down();
            }
        }
    }
}

/// Feed platform callbacks for one start attempt into the controller.
///
/// The first callback has to arrive within `start_timeout`; a silent or
/// vanished platform counts as a failure.
async fn pump_platform_events(
    controller: Weak<HotspotController>,
    platform: Arc<dyn HotspotPlatform>,
    generation: u64,
    mut events: UnboundedReceiver<PlatformEvent>,
    start_timeout: Duration,
) {
    let first = match tokio::time::timeout(start_timeout, events.recv()).await {
        Ok(Some(event)) => event,
        Ok(None) => PlatformEvent::Failed {
            reason: "platform dropped the start callback".to_string(),
        },
        Err(_) => PlatformEvent::Failed {
            reason: format!("no start callback within {:?}", start_timeout),
        },
    };

    let mut next = Some(first);
    while let Some(mut event) = next {
        if let PlatformEvent::Started(config) = &mut event {
            if config.ip_address.is_none() {
                config.ip_address = platform.hotspot_ipv4().await;
            }
        }

        let Some(controller) = controller.upgrade() else {
            return;
        };
        controller.apply_platform_event(generation, event);
        if !controller.is_current(generation) {
            return;
        }
        drop(controller);

        next = events.recv().await;
    }
}
