use clap::Parser;
use mesh_accel_agent::config::{Cli, Commands, ControllerArgs};
use mesh_accel_agent::controller::processor::Processor;
use mesh_accel_agent::controller::{self, RestartMarker};
use mesh_accel_agent::registry::NameRegistry;
use mesh_accel_agent::{Result, bpf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DELTA_CHANNEL_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Controller(args) => {
            setup_subscriber();
            run_controller(args).await
        }
    }
}

async fn run_controller(args: ControllerArgs) -> Result<()> {
    let registry = NameRegistry::load(&args.registry_path)?;
    let tables = bpf::tables::load_tables(&args.bpf_fs)?;
    let mut processor = Processor::new(tables, registry);

    let marker = RestartMarker::new(args.restart_marker.clone());
    if marker.is_set() {
        processor.begin_recovery()?;
    }

    // The discovery transport decodes delta responses off the stream from
    // `args.discovery_address` and hands them to this sender; the
    // reconciliation loop owns the receive side.
    let (_delta_tx, delta_rx) = tokio::sync::mpsc::channel(DELTA_CHANNEL_CAPACITY);
    info!(discovery = %args.discovery_address, "awaiting delta responses");

    let cancel = tokio_util::sync::CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        watcher.cancel();
    });

    controller::run(processor, delta_rx, marker, cancel).await
}

fn setup_subscriber() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mesh_accel_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };
    tokio::select! {
        _ = ctrl_c => {
            info!("captured ctrl_c signal");
        },
        _ = terminate => {},
    }
}
