//! xenprov CLI - VM console forwarding for XenServer provisioning
//!
//! Exposes a VM's VNC console (or any TCP service) on a local ephemeral port.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use xenprov_console::XapiConsoleWrapper;
use xenprov_forward::{
    join_host_port, split_host_port, tcp_address_from_url, Forwarding, IdentityWrapper,
};
use xenprov_steps::{CommonConfig, TracingUi, Ui, VncConfig};

const VERSION: &str = concat!(
    env!("GIT_TAG"),
    " (",
    env!("GIT_HASH"),
    ", built ",
    env!("BUILD_TIME"),
    ")"
);

/// xenprov - Forward XenServer VM consoles to local ports
#[derive(Parser, Debug)]
#[command(name = "xenprov")]
#[command(about = "xenprov - Forward XenServer VM consoles to local ports")]
#[command(version = VERSION)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// YAML builder configuration supplying defaults
    #[arg(long, global = true, env = "XENPROV_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Forward a VM's VNC console through the pool master
    #[command(long_about = r#"
Open a local listener that tunnels every VNC client connection to the
VM console at LOCATION. Each connection authenticates with the XAPI
session reference before any client bytes are relayed.

EXAMPLES:
  xenprov console \
    --location "https://pool-master/console?ref=OpaqueRef:4f8c..." \
    --session "OpaqueRef:1d2e..."

ENVIRONMENT VARIABLES:
  XENPROV_CONSOLE_LOCATION  Console URL
  XENPROV_SESSION           XAPI session reference
  XENPROV_CONFIG            YAML configuration file
    "#)]
    Console {
        /// Console URL as reported by the hypervisor (http or https)
        #[arg(long, env = "XENPROV_CONSOLE_LOCATION")]
        location: String,

        /// XAPI session reference used as the session_id cookie
        #[arg(long, env = "XENPROV_SESSION", hide_env_values = true)]
        session: String,

        /// Local interface to listen on (default from config, else 127.0.0.1)
        #[arg(long)]
        bind: Option<IpAddr>,

        /// Verify the pool master's TLS certificate
        #[arg(long)]
        verify_tls: bool,

        /// Maximum concurrently relayed connections
        #[arg(long)]
        max_connections: Option<usize>,
    },

    /// Forward a local ephemeral port to a TCP address as-is
    Forward {
        /// Target address (e.g., 10.0.0.5:5900)
        #[arg(long)]
        remote: String,

        /// Local interface to listen on (default 127.0.0.1)
        #[arg(long)]
        bind: Option<IpAddr>,
    },
}

/// Setup logging with the specified log level
fn setup_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<CommonConfig> {
    match path {
        Some(path) => CommonConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(CommonConfig::default()),
    }
}

/// Start the forwarding and keep it up until Ctrl+C
async fn serve(
    mut forwarding: Forwarding,
    ui: &dyn Ui,
    announce: impl FnOnce(&str) -> String,
) -> Result<()> {
    let local_addr = match forwarding.start().await {
        Ok(addr) => addr,
        Err(e) => {
            forwarding.close();
            return Err(e).context("Failed to start forwarding");
        }
    };

    let local = join_host_port(&local_addr.ip().to_string(), local_addr.port());
    ui.say(&announce(&local));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C, shutting down...");

    forwarding.close();
    Ok(())
}

fn apply_overrides(
    mut vnc: VncConfig,
    bind: Option<IpAddr>,
    verify_tls: bool,
    max_connections: Option<usize>,
) -> VncConfig {
    if let Some(bind) = bind {
        vnc.bind_address = bind;
    }
    vnc.verify_tls |= verify_tls;
    if max_connections.is_some() {
        vnc.max_connections = max_connections;
    }
    vnc
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let config = load_config(cli.config.as_ref())?;
    let ui = TracingUi;

    match cli.command {
        Commands::Console {
            location,
            session,
            bind,
            verify_tls,
            max_connections,
        } => {
            let vnc = apply_overrides(config.vnc, bind, verify_tls, max_connections);
            if vnc.disable_vnc {
                warn!("VNC is disabled in the configuration; forwarding anyway");
            }

            let (host, port) = tcp_address_from_url(&location)
                .with_context(|| format!("Invalid console location {}", location))?;
            let wrapper = if vnc.verify_tls {
                XapiConsoleWrapper::with_verified_tls(&location, &session)?
            } else {
                XapiConsoleWrapper::new(&location, &session)?
            };
            if wrapper.uses_tls() && !vnc.verify_tls {
                warn!("Certificate verification disabled for {}", host);
            }

            let mut forwarding =
                Forwarding::new(host, port, wrapper)?.with_bind_ip(vnc.bind_address);
            if let Some(max_connections) = vnc.max_connections {
                forwarding = forwarding.with_max_connections(max_connections);
            }

            serve(forwarding, &ui, |local| format!("VNC available on vnc://{}", local)).await?;
        }
        Commands::Forward { remote, bind } => {
            let (host, port) = split_host_port(&remote)
                .with_context(|| format!("Invalid remote address {}", remote))?;
            let bind = bind.unwrap_or(config.vnc.bind_address);

            let target = join_host_port(&host, port);
            let forwarding = Forwarding::new(host, port, IdentityWrapper)?.with_bind_ip(bind);
            serve(forwarding, &ui, |local| format!("Forwarding {} -> {}", local, target)).await?;
        }
    }

    info!("xenprov stopped");
    Ok(())
}
