//! NetworkManager-backed platform for Linux
//!
//! Drives the access point through `nmcli` and reads addresses with `ip`.
//! Network-change notifications are produced by polling device status.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use super::{HotspotPlatform, HotspotRequest, NetworkEvent, NetworkPlatform, Reservation, SubscriptionId};
use crate::error::PlatformError;
use crate::models::{CapabilityTier, HotspotConfiguration, NetworkHandle, NetworkInfo, PlatformEvent};
use crate::utils::{self, DeviceStatus};

#[derive(Debug, Clone)]
pub struct NmcliSettings {
    /// Connection profile created for the access point
    pub connection_name: String,
    /// Wireless device to use; NetworkManager picks one when unset
    pub interface: Option<String>,
    pub poll_interval: Duration,
}

/// Maps platform devices to the opaque handles given out to the monitor
#[derive(Debug, Default)]
struct DeviceTable {
    by_device: HashMap<String, NetworkHandle>,
    by_handle: HashMap<NetworkHandle, String>,
    next: u64,
}

impl DeviceTable {
    fn handle_for(&mut self, device: &str) -> NetworkHandle {
        if let Some(handle) = self.by_device.get(device) {
            return *handle;
        }
        self.next += 1;
        let handle = NetworkHandle(self.next);
        self.by_device.insert(device.to_string(), handle);
        self.by_handle.insert(handle, device.to_string());
        handle
    }

    fn device(&self, handle: NetworkHandle) -> Option<String> {
        self.by_handle.get(&handle).cloned()
    }

    fn forget(&mut self, device: &str) -> Option<NetworkHandle> {
        let handle = self.by_device.remove(device)?;
        self.by_handle.remove(&handle);
        Some(handle)
    }
}

pub struct NmcliPlatform {
    settings: NmcliSettings,
    devices: Arc<Mutex<DeviceTable>>,
    subscriptions: Mutex<HashMap<SubscriptionId, JoinHandle<()>>>,
    next_subscription: AtomicU64,
}

impl NmcliPlatform {
    pub fn new(settings: NmcliSettings) -> Self {
        Self {
            settings,
            devices: Arc::new(Mutex::new(DeviceTable::default())),
            subscriptions: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
        }
    }
}

/// Run a command and return its stdout, failing on a non-zero exit
async fn run(program: &str, args: &[&str]) -> Result<String, PlatformError> {
    let output = tokio::process::Command::new(program)
        .args(args)
        .output()
        .await?;

    if !output.status.success() {
        return Err(PlatformError::Command {
            command: format!("{} {}", program, args.join(" ")),
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Fire-and-forget a command, off the caller's thread
fn spawn_command(program: &'static str, args: Vec<String>) {
    let task = async move {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        if let Err(e) = run(program, &args).await {
            tracing::warn!("{}", e);
        }
    };
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(task);
        }
        Err(_) => tracing::warn!("No async runtime available, skipped `{}`", program),
    }
}

async fn device_status() -> Result<Vec<DeviceStatus>, PlatformError> {
    let output = run("nmcli", &["-t", "-f", "DEVICE,TYPE,STATE,CONNECTION", "device", "status"]).await?;
    Ok(utils::parse_device_status(&output))
}

async fn active_connections() -> Result<Vec<String>, PlatformError> {
    let output = run("nmcli", &["-t", "-f", "NAME", "connection", "show", "--active"]).await?;
    Ok(output
        .lines()
        .filter_map(|line| utils::split_terse(line).into_iter().next())
        .collect())
}

/// Read the SSID and PSK NetworkManager actually configured
async fn read_back(connection: &str, request: &HotspotRequest) -> HotspotConfiguration {
    let fields = run(
        "nmcli",
        &["-s", "-g", "802-11-wireless.ssid,802-11-wireless-security.psk", "connection", "show", connection],
    )
    .await;

    let (ssid, passphrase) = match fields {
        Ok(output) => {
            let mut values = utils::split_terse(output.trim_end()).into_iter();
            (values.next(), values.next())
        }
        Err(e) => {
            tracing::debug!("Could not read back hotspot settings: {}", e);
            (None, None)
        }
    };

    let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty());
    HotspotConfiguration {
        ssid: non_empty(ssid).or_else(|| Some(request.ssid.clone())),
        passphrase: non_empty(passphrase).or_else(|| Some(request.passphrase.clone())),
        ip_address: None,
    }
}

struct NmcliReservation {
    connection: String,
    closed: Arc<AtomicBool>,
}

impl Reservation for NmcliReservation {
    fn close(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Bringing down hotspot connection '{}'", self.connection);
        spawn_command(
            "nmcli",
            vec!["connection".into(), "down".into(), self.connection.clone()],
        );
    }
}

#[async_trait]
impl HotspotPlatform for NmcliPlatform {
    fn detect_tier(&self) -> CapabilityTier {
        if !utils::has_wireless_interface() {
            tracing::warn!("No wireless interface found");
            return CapabilityTier::Unsupported;
        }
        if utils::command_available("nmcli") {
            CapabilityTier::Managed
        } else {
            tracing::warn!("nmcli not available, the access point has to be set up manually");
            CapabilityTier::LegacyManual
        }
    }

    fn start_local_hotspot(
        &self,
        request: HotspotRequest,
        events: UnboundedSender<PlatformEvent>,
    ) -> Result<Box<dyn Reservation>, PlatformError> {
        let connection = self.settings.connection_name.clone();
        let poll_interval = self.settings.poll_interval;
        let closed = Arc::new(AtomicBool::new(false));

        let mut args = vec!["device".to_string(), "wifi".into(), "hotspot".into()];
        if let Some(interface) = &self.settings.interface {
            args.extend(["ifname".to_string(), interface.clone()]);
        }
        args.extend([
            "con-name".to_string(),
            connection.clone(),
            "ssid".into(),
            request.ssid.clone(),
            "password".into(),
            request.passphrase.clone(),
        ]);

        let watch_closed = closed.clone();
        let watch_connection = connection.clone();
        let handle = tokio::runtime::Handle::try_current().map_err(|_| PlatformError::Unsupported)?;
        handle.spawn(async move {
            let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
            if let Err(e) = run("nmcli", &arg_refs).await {
                let _ = events.send(PlatformEvent::Failed { reason: e.to_string() });
                return;
            }

            // Closed while nmcli was still bringing it up
            if watch_closed.load(Ordering::SeqCst) {
                spawn_command("nmcli", vec!["connection".into(), "down".into(), watch_connection]);
                return;
            }

            let config = read_back(&watch_connection, &request).await;
            if events.send(PlatformEvent::Started(config)).is_err() {
                return;
            }

            loop {
                tokio::time::sleep(poll_interval).await;
                if watch_closed.load(Ordering::SeqCst) {
                    return;
                }
                match active_connections().await {
                    Ok(active) if !active.iter().any(|c| *c == watch_connection) => {
                        tracing::info!("Hotspot connection '{}' went down", watch_connection);
                        let _ = events.send(PlatformEvent::Stopped);
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => tracing::debug!("Could not list active connections: {}", e),
                }
            }
        });

        Ok(Box::new(NmcliReservation { connection, closed }))
    }

    async fn hotspot_ipv4(&self) -> Option<String> {
        match run("ip", &["-4", "-o", "addr", "show"]).await {
            Ok(output) => utils::pick_hotspot_ipv4(&utils::parse_ipv4_addresses(&output)),
            Err(e) => {
                tracing::warn!("Error getting hotspot IP: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl NetworkPlatform for NmcliPlatform {
    fn subscribe(&self, events: UnboundedSender<NetworkEvent>) -> Result<SubscriptionId, PlatformError> {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        let devices = self.devices.clone();
        let poll_interval = self.settings.poll_interval;

        let handle = tokio::runtime::Handle::try_current().map_err(|_| PlatformError::Unsupported)?;
        let task = handle.spawn(async move {
            let mut known: HashSet<String> = HashSet::new();
            loop {
                match device_status().await {
                    Ok(status) => {
                        let current: HashSet<String> = status
                            .iter()
                            .filter(|d| d.is_connected_wifi())
                            .map(|d| d.device.clone())
                            .collect();

                        for device in current.difference(&known) {
                            let handle = devices.lock().handle_for(device);
                            if events.send(NetworkEvent::Available(handle)).is_err() {
                                return;
                            }
                        }
                        for device in known.difference(&current) {
                            let lost = devices.lock().forget(device);
                            if let Some(handle) = lost {
                                if events.send(NetworkEvent::Lost(handle)).is_err() {
                                    return;
                                }
                            }
                        }
                        known = current;
                    }
                    Err(e) => tracing::debug!("Device status poll failed: {}", e),
                }
                tokio::time::sleep(poll_interval).await;
            }
        });

        self.subscriptions.lock().insert(id, task);
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if let Some(task) = self.subscriptions.lock().remove(&id) {
            task.abort();
        }
    }

    async fn describe(&self, handle: NetworkHandle) -> Option<NetworkInfo> {
        let device = self.devices.lock().device(handle)?;
        let status = device_status().await.ok()?;
        let row = status.into_iter().find(|d| d.device == device)?;

        Some(NetworkInfo {
            access_point: row.connection.as_deref() == Some(self.settings.connection_name.as_str()),
            wireless: row.kind == "wifi",
            interface: Some(row.device),
        })
    }

    async fn ipv4_address(&self, handle: NetworkHandle) -> Option<String> {
        let device = self.devices.lock().device(handle)?;
        let output = run("ip", &["-4", "-o", "addr", "show", "dev", &device]).await.ok()?;
        utils::parse_ipv4_addresses(&output)
            .into_iter()
            .next()
            .map(|a| a.address)
    }

    fn report_connectivity(&self, handle: NetworkHandle, validated: bool) {
        if !validated {
            return;
        }
        tracing::info!("Reporting network validated for {}", handle);
        spawn_command(
            "nmcli",
            vec!["networking".into(), "connectivity".into(), "check".into()],
        );
    }
}

impl Drop for NmcliPlatform {
    fn drop(&mut self) {
        for (_, task) in self.subscriptions.lock().drain() {
            task.abort();
        }
    }
}
