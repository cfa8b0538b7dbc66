//! navassist service: keeps the peripheral connected and acts on its reports.
//!
//! Run with: `cargo run -p navassist-service`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use navassist_core::{BleHandle, BleService, BtleBackend, IdentityStore};
use navassist_service::{
    ActionHandler, Collaborators, Config, SharedStore, SpeechQueue, SqliteIdentityStore,
    default_config_path, geocoder_from_config, sender_from_config, speaker_from_config,
    translator_from_config,
};
use navassist_store::Store;

/// Time allowed for queued speech to finish on shutdown.
const SPEECH_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// navassist service: BLE session plus speech, geocoding and emergency SMS.
#[derive(Parser, Debug)]
#[command(name = "navassist-service")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database path (overrides config).
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Connect to this peripheral instead of the last one used.
    #[arg(long, value_name = "ADDRESS")]
    connect: Option<String>,

    /// Scan for peripherals and log them.
    #[arg(long)]
    scan: bool,

    /// Store the emergency contact's phone number and exit.
    #[arg(long, value_name = "NUMBER")]
    set_phone: Option<String>,

    /// Forget the last connected peripheral and exit.
    #[arg(long)]
    forget: bool,

    /// Write the effective configuration to the config path and exit.
    #[arg(long)]
    write_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("navassist_service=info".parse()?)
                .add_directive("navassist_core=info".parse()?),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default().unwrap_or_else(|e| {
            warn!(error = %e, "Ignoring unreadable default config");
            Config::default()
        }),
    };
    if let Some(db_path) = &args.database {
        config.storage.path = db_path.clone();
    }
    config.validate()?;

    if args.write_config {
        let path = args.config.clone().unwrap_or_else(default_config_path);
        config.save(&path)?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    let store = SharedStore::new(Store::open(&config.storage.path)?);

    if let Some(number) = &args.set_phone {
        store.lock()?.set_phone_number(number)?;
        println!("Emergency contact set to {}", number.trim());
        return Ok(());
    }
    if args.forget {
        store.lock()?.clear_peripheral_identity()?;
        println!("Forgot the last connected peripheral");
        return Ok(());
    }

    run(args, config, store).await
}

async fn run(args: Args, config: Config, store: SharedStore) -> anyhow::Result<()> {
    let backend = Arc::new(BtleBackend::new(
        config.ble.connection_config(),
        config.ble.reconnect_options(),
    ));
    let identities: Arc<dyn IdentityStore> = Arc::new(SqliteIdentityStore::new(store.clone()));
    let (service, handle) = BleService::new(backend, identities, config.ble.service_config())?;

    let (speech, speech_worker) = SpeechQueue::spawn(speaker_from_config(&config.speech));
    let collaborators = Collaborators {
        geocoder: geocoder_from_config(&config.geocoding)?,
        translator: translator_from_config(&config.translation)?,
        sms: sender_from_config(&config.sms)?,
        speech,
        store,
        default_phone_number: config.sms.default_phone_number.clone(),
    };

    let cancel = CancellationToken::new();
    let handler_task =
        ActionHandler::new(collaborators).spawn(handle.bus().actions(), cancel.clone());
    let report_task = tokio::spawn(report(handle.clone(), args.scan, cancel.clone()));
    let mut service_task = tokio::spawn(service.run());

    match &args.connect {
        Some(address) => handle.connect(address.clone())?,
        None => handle.restore()?,
    }
    if args.scan {
        handle.start_scan()?;
    }

    tokio::select! {
        result = &mut service_task => {
            warn!("BLE service stopped on its own");
            result??;
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutting down");
            handle.shutdown();
            service_task.await??;
        }
    }

    cancel.cancel();
    let _ = report_task.await;
    let _ = handler_task.await;
    if tokio::time::timeout(SPEECH_DRAIN_TIMEOUT, speech_worker)
        .await
        .is_err()
    {
        warn!("Speech still pending at shutdown, dropping it");
    }

    Ok(())
}

/// Log status, keep-alive and (when scanning) scan result changes.
async fn report(handle: BleHandle, scan: bool, cancel: CancellationToken) {
    let mut status = handle.bus().status();
    let mut keep_alive = handle.keep_alive();
    let mut results = handle.bus().scan_results();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                info!(%current, "Status");
            }
            changed = keep_alive.changed() => {
                if changed.is_err() {
                    break;
                }
                match keep_alive.borrow_and_update().clone() {
                    Some(notice) => info!(%notice, "Keep-alive held"),
                    None => info!("Keep-alive released"),
                }
            }
            changed = results.changed(), if scan => {
                if changed.is_err() {
                    break;
                }
                for device in results.borrow_and_update().iter() {
                    info!(
                        address = %device.address,
                        name = %device.display_name(),
                        rssi = ?device.rssi,
                        "Found peripheral"
                    );
                }
            }
        }
    }
}
