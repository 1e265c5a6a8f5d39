//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// CSAR artifact gateway - proxy, lifecycle notifications and replication
#[derive(Parser, Debug)]
#[command(name = "csar-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "CSAR_GATEWAY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "CSAR_GATEWAY_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "CSAR_GATEWAY_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "CSAR_GATEWAY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "CSAR_GATEWAY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the gateway server (default)
    Serve,

    /// Run one replication job and exit
    Replicate(ReplicateArgs),
}

/// Arguments of a one-off replication job
#[derive(clap::Args, Debug, Clone)]
pub struct ReplicateArgs {
    /// Source registry URL
    #[arg(long)]
    pub source_url: String,

    /// Destination registry URL
    #[arg(long)]
    pub dest_url: String,

    /// Artifact to replicate (`namespace/name`)
    #[arg(long)]
    pub name: String,

    /// Name on the destination (`namespace/name`, defaults to --name)
    #[arg(long)]
    pub dest_name: Option<String>,

    /// Overwrite an existing artifact on the destination
    #[arg(long = "override")]
    pub override_existing: bool,

    /// Delete the artifact on the destination instead of copying
    #[arg(long)]
    pub delete: bool,

    /// Skip TLS certificate verification on both registries
    #[arg(long)]
    pub insecure: bool,

    /// Adapter type of both registries
    #[arg(long, default_value = "csar")]
    pub registry_type: String,

    /// Source registry user
    #[arg(long, env = "CSAR_REPLICATE_SOURCE_USER")]
    pub source_user: Option<String>,

    /// Source registry password
    #[arg(long, env = "CSAR_REPLICATE_SOURCE_PASSWORD", hide_env_values = true)]
    pub source_password: Option<String>,

    /// Destination registry user
    #[arg(long, env = "CSAR_REPLICATE_DEST_USER")]
    pub dest_user: Option<String>,

    /// Destination registry password
    #[arg(long, env = "CSAR_REPLICATE_DEST_PASSWORD", hide_env_values = true)]
    pub dest_password: Option<String>,
}
