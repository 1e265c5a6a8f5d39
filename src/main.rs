//! CSAR Gateway - artifact proxy with lifecycle notifications and replication

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use csar_core::{ArtifactIdentity, RegistryCredential, RegistryDescriptor, Resource};
use tracing::{error, info};

use csar_gateway::{
    cli::{Cli, Command, ReplicateArgs},
    config::Config,
    gateway::Gateway,
    replication::{AdapterRegistry, Transfer},
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::Replicate(args)) => run_replicate(args).await,
        Some(Command::Serve) | None => run_server(cli).await,
    }
}

fn descriptor(
    registry_type: &str,
    url: &str,
    insecure: bool,
    user: Option<String>,
    password: Option<String>,
) -> RegistryDescriptor {
    RegistryDescriptor {
        registry_type: registry_type.to_string(),
        url: url.to_string(),
        insecure,
        credential: user.map(|access_key| RegistryCredential {
            access_key,
            access_secret: password.unwrap_or_default(),
        }),
    }
}

/// Run one replication job
async fn run_replicate(args: ReplicateArgs) -> ExitCode {
    let parse = |s: &str| {
        s.parse::<ArtifactIdentity>().map_err(|e| {
            eprintln!("Invalid artifact name '{s}': {e}");
        })
    };
    let Ok(src_name) = parse(&args.name) else {
        return ExitCode::FAILURE;
    };
    let Ok(dst_name) = parse(args.dest_name.as_deref().unwrap_or(&args.name)) else {
        return ExitCode::FAILURE;
    };

    let src = Resource::new(
        descriptor(
            &args.registry_type,
            &args.source_url,
            args.insecure,
            args.source_user,
            args.source_password,
        ),
        &src_name,
    );
    let mut dst = Resource::new(
        descriptor(
            &args.registry_type,
            &args.dest_url,
            args.insecure,
            args.dest_user,
            args.dest_password,
        ),
        &dst_name,
    );
    dst.deleted = args.delete;
    dst.override_existing = args.override_existing;

    let mut transfer = Transfer::new(Arc::new(AdapterRegistry::with_defaults()), Arc::new(|| false));
    if let Err(e) = transfer.initialize(&src, &dst) {
        error!("Failed to initialize replication: {e}");
        return ExitCode::FAILURE;
    }

    match transfer.execute().await {
        Ok(outcome) => {
            info!(src = %src_name, dst = %dst_name, outcome = %outcome, "Replication finished");
            println!("{outcome}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Replication failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_server(cli: Cli) -> ExitCode {
    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        backend = %config.backend.url,
        "Starting CSAR Gateway"
    );

    let gateway = match Gateway::new(config) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}
