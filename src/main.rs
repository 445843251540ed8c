//! hotspot-gate - local access point with a captive-portal login
//!
//! Brings the access point up, serves the login portal and runs until Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing_subscriber::EnvFilter;

use hotspot_gate::platform::nmcli::NmcliSettings;
use hotspot_gate::platform::{HotspotPlatform, NmcliPlatform};
use hotspot_gate::portal::{AssetDir, EmbeddedAssets, PageAssets};
use hotspot_gate::{
    drive_listener, Collaborators, Config, CredentialStore, HotspotController, LifecycleListener, LoginAttempt,
    SqliteCredentialStore,
};

#[derive(Parser, Debug)]
#[command(name = "hotspot-gate")]
#[command(about = "Local access point with a captive-portal login", long_about = None)]
struct Args {
    /// Config file path (default: search standard locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the requested SSID
    #[arg(long)]
    ssid: Option<String>,

    /// Override the requested passphrase
    #[arg(long)]
    passphrase: Option<String>,

    /// Print the N most recent login attempts as JSON lines and exit
    #[arg(long, value_name = "N")]
    attempts: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let cfg = Config::load(args.config.as_deref())?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.logging.level)),
        )
        .init();

    let db_path = cfg.storage.resolved_path();
    let store = SqliteCredentialStore::open(&db_path)
        .await
        .with_context(|| format!("Failed to open login store at {}", db_path.display()))?;

    if let Some(limit) = args.attempts {
        return print_attempts(&store, limit).await;
    }

    tracing::info!("hotspot-gate v{}", env!("CARGO_PKG_VERSION"));

    let platform = Arc::new(NmcliPlatform::new(NmcliSettings {
        connection_name: cfg.hotspot.connection_name.clone(),
        interface: cfg.hotspot.interface.clone(),
        poll_interval: cfg.monitor.poll_interval(),
    }));
    let tier = match cfg.hotspot.tier.pinned() {
        Some(tier) => tier,
        None => platform.detect_tier(),
    };
    tracing::info!("Capability tier: {}", tier);

    let assets: Arc<dyn PageAssets> = match &cfg.portal.assets_dir {
        Some(dir) => Arc::new(AssetDir::new(dir)),
        None => Arc::new(EmbeddedAssets),
    };

    let controller = HotspotController::new(
        tier,
        Collaborators {
            hotspot: platform.clone(),
            network: platform,
            assets,
            store: Arc::new(store),
        },
        &cfg,
    );

    let (manual_tx, mut manual_rx) = mpsc::unbounded_channel();
    let events = controller.subscribe();
    let port = cfg.portal.port;
    let listener = tokio::spawn(async move {
        let mut console = ConsoleListener {
            port,
            manual_setup: manual_tx,
        };
        drive_listener(events, &mut console).await;
    });

    let ssid = args.ssid.unwrap_or_else(|| cfg.hotspot.ssid.clone());
    let passphrase = args.passphrase.unwrap_or_else(|| cfg.hotspot.passphrase.clone());
    controller.start(&ssid, &passphrase).await?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut awaiting_manual = false;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some(()) = manual_rx.recv() => {
                awaiting_manual = true;
                tracing::warn!("Turn on the access point in the system settings, then press Enter");
            }
            line = stdin.next_line(), if awaiting_manual => {
                awaiting_manual = false;
                match line {
                    Ok(Some(_)) => {
                        if let Err(e) = controller.confirm_manual_setup().await {
                            tracing::warn!("{}", e);
                        }
                    }
                    Ok(None) => tracing::warn!("stdin closed, manual setup cannot be confirmed"),
                    Err(e) => tracing::warn!("Failed to read stdin: {}", e),
                }
            }
        }
    }

    tracing::info!("Shutting down...");
    if let Err(e) = controller.stop() {
        tracing::warn!("Stop rejected: {}", e);
    }
    controller.detach_listener();
    let _ = listener.await;
    Ok(())
}

/// Logs lifecycle events and forwards manual-setup requests to the main loop
struct ConsoleListener {
    port: u16,
    manual_setup: UnboundedSender<()>,
}

impl LifecycleListener for ConsoleListener {
    fn starting(&mut self) {
        tracing::info!("Starting hotspot...");
    }

    fn started(&mut self, ssid: Option<&str>, passphrase: Option<&str>, ip_address: Option<&str>) {
        tracing::info!("Hotspot is up");
        tracing::info!("   -> SSID: {}", ssid.unwrap_or("N/A"));
        tracing::info!("   -> Passphrase: {}", passphrase.unwrap_or("N/A"));
        match ip_address {
            Some(ip) => tracing::info!("   -> Portal: http://{}:{}/", ip, self.port),
            None => tracing::info!("   -> Portal on port {} (address not known yet)", self.port),
        }
    }

    fn stopped(&mut self) {
        tracing::info!("Hotspot stopped");
    }

    fn failed(&mut self) {
        tracing::error!("Hotspot failed to start");
    }

    fn manual_setup_required(&mut self) {
        let _ = self.manual_setup.send(());
    }
}

#[derive(Serialize)]
struct AttemptLine<'a> {
    id: i64,
    #[serde(flatten)]
    attempt: &'a LoginAttempt,
}

async fn print_attempts(store: &SqliteCredentialStore, limit: u32) -> Result<()> {
    for stored in store.recent(limit).await? {
        let line = AttemptLine {
            id: stored.id,
            attempt: &stored.attempt,
        };
        println!("{}", serde_json::to_string(&line)?);
    }
    Ok(())
}
