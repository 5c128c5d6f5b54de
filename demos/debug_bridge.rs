//! Serves a VexRiscv CPU's debug port to OpenOCD, over Etherbone.
//!
//! Point OpenOCD's `vexriscv` target at the listen address (port 7893 by
//! default) with `vexriscv networkProtocol etherbone`.

use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use litex_etherbone::{BridgeServer, Config, CsrWidth, DebugRegisters, SocInfo};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
struct Args {
    /// A JSON config file. Command-line options override what's in it.
    #[arg(long)]
    config: Option<PathBuf>,
    /// The SoC's `csr.json`, used to find the debug bridge CSRs.
    #[arg(long)]
    soc_info: Option<PathBuf>,
    /// Name prefix of the debug bridge CSRs in the SoC info.
    #[arg(long, default_value = DebugRegisters::DEFAULT_PREFIX)]
    debug_prefix: String,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    listen: Option<SocketAddr>,
    #[arg(long)]
    tcp: bool,
    /// CSR data width in bits (8 or 32).
    #[arg(long)]
    csr_width: Option<u32>,
    /// Give up on a debug read after this many counter polls.
    #[arg(long)]
    sync_poll_limit: Option<u32>,
    /// Log filter used when `RUST_LOG` isn't set.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    let mut config: Config = match &args.config {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("couldn't read {}", path.display()))?;
            serde_json::from_str(&json).context("invalid config file")?
        }
        None => Config::default(),
    };

    if let Some(path) = &args.soc_info {
        let json = fs::read_to_string(path)
            .with_context(|| format!("couldn't read {}", path.display()))?;
        let soc_info: SocInfo = serde_json::from_str(&json)?;
        config.debug = Some(soc_info.debug_registers(&args.debug_prefix)?);
        config.csr_width = soc_info.csr_width()?;
    }

    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if args.tcp {
        config.protocol = litex_etherbone::Protocol::Tcp;
    }
    if let Some(bits) = args.csr_width {
        config.csr_width =
            CsrWidth::from_bits(bits).with_context(|| format!("unsupported CSR width {bits}"))?;
    }
    if args.sync_poll_limit.is_some() {
        config.sync_poll_limit = args.sync_poll_limit;
    }

    if config.debug.is_none() {
        anyhow::bail!("no debug bridge CSRs: pass --soc-info or set `debug` in the config");
    }

    info!(
        host = %config.host,
        port = config.port,
        width = %config.csr_width,
        "connecting to SoC"
    );
    let session = config.connect()?;
    let mut server = BridgeServer::bind(config.listen, session)?;
    server.run()?;
    Ok(())
}
