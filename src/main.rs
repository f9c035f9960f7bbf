//! camrelay daemon
//!
//! Relays the outputs of the first reachable camera device to HTTP streams
//! and keeps the external stream registry in step.
//!
//! Run with: camrelay --devices ./devices --bind 0.0.0.0:8554
//!
//! Devices are replayed from recorded H.264 elementary streams, one
//! subdirectory per device holding `rgb.h264`, `mono_left.h264` and
//! `mono_right.h264`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use camrelay::device::{ReplayBackend, ReplayConfig};
use camrelay::registry::{HttpRegistryClient, MemoryRegistry, RegistryClient, RegistryConfig};
use camrelay::{RelayConfig, RestartPolicy, ServerConfig, Supervisor};

#[derive(Parser, Debug)]
#[command(name = "camrelay")]
#[command(about = "Relay multi-camera device outputs to live network streams")]
#[command(version)]
struct Args {
    /// Address the stream server binds to
    #[arg(short, long, env = "CAMRELAY_BIND", default_value = "0.0.0.0:8554")]
    bind: SocketAddr,

    /// Directory holding the local transport endpoints
    #[arg(long, env = "CAMRELAY_TRANSPORT_DIR", default_value = "/tmp")]
    transport_dir: PathBuf,

    /// Directory with one subdirectory of recordings per device
    #[arg(short, long, env = "CAMRELAY_DEVICES", default_value = "./devices")]
    devices: PathBuf,

    /// Stop a device output at the end of its recording instead of looping
    #[arg(long)]
    no_loop: bool,

    /// Maximum concurrent clients (0 = unlimited)
    #[arg(long, default_value = "0")]
    max_connections: usize,

    /// Base URL of the stream registry
    #[arg(long, env = "CAMRELAY_REGISTRY_URL", default_value = "http://127.0.0.1:6020")]
    registry_url: String,

    /// Base of the redirect URLs registered for each stream
    /// (default: the stream server's own URL)
    #[arg(long, env = "CAMRELAY_REDIRECT_BASE")]
    redirect_base: Option<String>,

    /// Seconds between registry polls
    #[arg(long, default_value = "3")]
    registry_poll: u64,

    /// Do not talk to the stream registry
    #[arg(long)]
    no_registry: bool,

    /// Seconds to wait after a failure before the device was reached
    #[arg(long, default_value = "1")]
    short_delay: u64,

    /// Seconds to wait after a failure while serving
    #[arg(long, default_value = "5")]
    long_delay: u64,
}

impl Args {
    fn relay_config(&self) -> RelayConfig {
        let server = ServerConfig::with_addr(self.bind).max_connections(self.max_connections);

        let redirect_base = self
            .redirect_base
            .clone()
            .unwrap_or_else(|| server.base_url());
        let mut registry = RegistryConfig::with_url(&self.registry_url)
            .redirect_base(redirect_base)
            .poll_interval(Duration::from_secs(self.registry_poll));
        if self.no_registry {
            registry = registry.disable();
        }

        let restart = RestartPolicy::default()
            .short_delay(Duration::from_secs(self.short_delay))
            .long_delay(Duration::from_secs(self.long_delay));

        RelayConfig::default()
            .transport_dir(&self.transport_dir)
            .server(server)
            .registry(registry)
            .restart(restart)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("camrelay=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = args.relay_config();

    let backend = ReplayBackend::new(
        ReplayConfig::with_root(&args.devices).looping(!args.no_loop),
    );

    tracing::info!(
        bind = %config.server.bind_addr,
        devices = %args.devices.display(),
        registry = %config.registry.url,
        redirect_base = %config.registry.redirect_base,
        "Starting camrelay"
    );

    if config.registry.enabled {
        let registry = HttpRegistryClient::new(&config.registry)?;
        run(backend, registry, config).await
    } else {
        run(backend, MemoryRegistry::new(), config).await
    }
}

async fn run<R: RegistryClient>(
    backend: ReplayBackend,
    registry: R,
    config: RelayConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let supervisor = Supervisor::new(backend, registry, config)?;
    let cancel = CancellationToken::new();

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        tracing::info!("Shutting down");
        shutdown.cancel();
    });

    supervisor.run(cancel).await;
    Ok(())
}
