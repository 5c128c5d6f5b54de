//! Reads or writes a register on an SoC connected via. Etherbone.

use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use litex_etherbone::config::DEFAULT_ETHERBONE_PORT;
use litex_etherbone::{Connection, CsrBus, CsrWidth, Protocol, SocInfo};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
struct Args {
    /// Host name or IP address of the Etherbone core.
    #[arg(long, default_value = "10.0.11.2")]
    host: String,
    #[arg(long, default_value_t = DEFAULT_ETHERBONE_PORT)]
    port: u16,
    #[arg(long, default_value_t = DEFAULT_ETHERBONE_PORT)]
    local_port: u16,
    /// Talk to a TCP Etherbone bridge instead of the UDP core.
    #[arg(long)]
    tcp: bool,
    /// CSR data width in bits (8 or 32). Taken from `--soc-info` if given.
    #[arg(long)]
    csr_width: Option<u32>,
    /// The SoC's `csr.json`, for looking registers up by name.
    #[arg(long)]
    soc_info: Option<PathBuf>,
    /// Register address (hex with `0x`, or decimal), or a CSR name when
    /// `--soc-info` is given.
    register: String,
    /// Value to write. Without one the register is only read.
    value: Option<String>,
    /// Log filter used when `RUST_LOG` isn't set.
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn parse_u32(s: &str) -> anyhow::Result<u32> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.with_context(|| format!("`{s}` is not a 32-bit number"))
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    let soc_info: Option<SocInfo> = match &args.soc_info {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("couldn't read {}", path.display()))?;
            Some(serde_json::from_str(&json)?)
        }
        None => None,
    };

    let width = match (args.csr_width, &soc_info) {
        (Some(bits), _) => CsrWidth::from_bits(bits)
            .with_context(|| format!("unsupported CSR width {bits}"))?,
        (None, Some(info)) => info.csr_width()?,
        (None, None) => CsrWidth::default(),
    };

    let address = match (parse_u32(&args.register), &soc_info) {
        (Ok(address), _) => address,
        (Err(_), Some(info)) => info.csr_addr(&args.register)?,
        (Err(e), None) => return Err(e),
    };

    let protocol = if args.tcp { Protocol::Tcp } else { Protocol::Udp };
    let link = Connection::open(protocol, &args.host, args.port, args.local_port)?;
    let mut bus = CsrBus::new(link, width);

    match args.value {
        None => {
            let value = bus.read32(address)?;
            println!("Value at {address:08x}: {value:08x}");
        }
        Some(value) => {
            let report = bus.write32_verified(address, parse_u32(&value)?)?;
            println!(
                "Value at {address:08x}: {:08x} -> {:08x} ({:08x})",
                report.old, report.new, report.wanted
            );
            if report.stuck() {
                eprintln!("warning: register didn't take the written value");
            }
        }
    }

    bus.into_link().close();
    Ok(())
}
