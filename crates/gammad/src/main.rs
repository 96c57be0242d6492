use std::{net::SocketAddr, time::Duration};

use controller::Controller;
use detector::DriverRegistry;
use shared::protocol::Outbound;
use storage::SpectrumStore;
use telemetry::{SimulatedGps, TelemetryProvider};
use tokio::{net::UdpSocket, time::MissedTickBehavior};
use tracing::{error, info, warn};

mod config;

use config::{load_settings, prepare_database_url};

const MAX_DATAGRAM_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let store = SpectrumStore::new(&database_url).await.map_err(|err| {
        error!(
            %database_url,
            %err,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        err
    })?;

    let provider = TelemetryProvider::start(
        SimulatedGps::default(),
        Duration::from_millis(settings.telemetry_period_ms),
    )?;

    let registry = DriverRegistry::with_builtin_drivers();
    info!(plugins = ?registry.known_plugins(), "detector registry ready");

    let (mut controller, mut acquisitions, mut driver_ops, mut outbound) = Controller::new(
        registry,
        store,
        provider.reader(),
        settings.data_dir.clone(),
    );

    let socket = UdpSocket::bind(&settings.bind_addr).await?;
    info!(addr = %settings.bind_addr, "gammad listening");

    let mut tick = tokio::time::interval(Duration::from_millis(settings.tick_interval_ms));
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    // Last-seen operator address; the destination for every outbound
    // envelope, including asynchronous spectrum reports.
    let mut operator: Option<SocketAddr> = None;
    let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, addr)) => {
                    operator = Some(addr);
                    controller.handle_datagram(&buf[..len]).await;
                }
                Err(recv_error) => warn!(%recv_error, "udp receive failed"),
            },
            _ = tick.tick(), if controller.session_active() => {
                controller.tick();
            }
            Some(outcome) = acquisitions.recv() => {
                controller.apply_outcome(outcome).await;
            }
            Some(outcome) = driver_ops.recv() => {
                controller.apply_driver_outcome(outcome).await;
            }
            Some(message) = outbound.recv() => {
                send_envelope(&socket, operator, &message).await;
            }
            _ = &mut shutdown => {
                info!("shutdown requested");
                break;
            }
        }
    }

    controller.shutdown().await;
    provider.shutdown();
    info!("gammad stopped");
    Ok(())
}

async fn send_envelope(socket: &UdpSocket, operator: Option<SocketAddr>, message: &Outbound) {
    let Some(addr) = operator else {
        warn!("dropping response, no operator address seen yet");
        return;
    };

    let payload = match serde_json::to_vec(message) {
        Ok(payload) => payload,
        Err(encode_error) => {
            warn!(%encode_error, "failed to encode response envelope");
            return;
        }
    };

    if let Err(send_error) = socket.send_to(&payload, addr).await {
        warn!(%send_error, %addr, "failed to send response");
    }
}
