//! CLI entrypoint for the udsmux harness.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use udsmux_core::UnixAddr;
use udsmux_harness::HarnessError;
use udsmux_harness::echo::EchoServer;

/// Echo server, client and log tooling for udsmux.
#[derive(Debug, Parser)]
#[command(name = "udsmux-harness")]
#[command(about = "Exercise the udsmux transport from the command line")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a readiness-driven echo server.
    Echo {
        /// Socket path, or `@name` for an abstract name.
        #[arg(long)]
        addr: String,
        /// Exit after this many clients have disconnected.
        #[arg(long)]
        max_clients: Option<u64>,
    },
    /// Send a payload and print the echo.
    Send {
        /// Socket path, or `@name` for an abstract name.
        #[arg(long)]
        addr: String,
        /// Payload to send.
        #[arg(long)]
        data: String,
        /// Give up waiting for the echo after this many milliseconds.
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,
    },
    /// Validate a structured JSONL log and print a JSON summary.
    ValidateLog {
        /// Log file written via `UDSMUX_LOG`.
        #[arg(long)]
        log: PathBuf,
    },
}

fn parse_addr(s: &str) -> Result<UnixAddr, HarnessError> {
    UnixAddr::parse_display(s).map_err(|_| HarnessError::InvalidAddress(s.to_string()))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Echo { addr, max_clients } => {
            let addr = parse_addr(&addr)?;
            let server = EchoServer::bind(&addr)?;
            eprintln!("Echoing on {}", server.local_addr()?);
            let stats = server.run(max_clients)?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Send {
            addr,
            data,
            timeout_ms,
        } => {
            let addr = parse_addr(&addr)?;
            let echoed = udsmux_harness::client::send_and_receive(
                &addr,
                data.as_bytes(),
                Duration::from_millis(timeout_ms),
            )?;
            println!("{}", String::from_utf8_lossy(&echoed));
        }
        Command::ValidateLog { log } => {
            let report = udsmux_harness::log_report::validate_log(&log)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.ok {
                return Err(format!(
                    "Log validation failed: {} violation(s)",
                    report.violations.len()
                )
                .into());
            }
        }
    }

    Ok(())
}
