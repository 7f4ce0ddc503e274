use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Subcommand, Debug)]
pub enum Commands {
    Controller(ControllerArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct ControllerArgs {
    /// Path to the bpf fs where the dataplane tables are pinned
    #[arg(long, default_value = "/sys/fs/bpf")]
    pub bpf_fs: PathBuf,

    /// Path of the persisted name registry
    #[arg(
        long,
        env = "NAME_REGISTRY_PATH",
        default_value = "/var/lib/mesh-accel/registry"
    )]
    pub registry_path: PathBuf,

    /// Restart marker set by the supervising orchestrator when the prior
    /// process owned the current table contents
    #[arg(
        long,
        env = "RESTART_MARKER_PATH",
        default_value = "/var/run/mesh-accel/restart"
    )]
    pub restart_marker: PathBuf,

    /// Control plane discovery address
    #[arg(long, env = "DISCOVERY_ADDRESS", default_value = "127.0.0.1:15012")]
    pub discovery_address: SocketAddr,
}
