//! `observer` binary: observe-mode moderation with human approval.

mod actions;
mod clock;
mod commands;
mod config;
mod ephemeral;
mod error;
mod gate;
mod gateway;
mod generator;
mod init;
mod knowledge;
mod observe;
mod policy;
mod prefilter;
mod records;
mod redact;
mod routes;
mod server;
#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Debug, Parser)]
#[command(
    name = "observer",
    version,
    about = "Drafts answers to channel questions and holds them for reviewer approval"
)]
struct Cli {
    /// Config file (defaults to ~/.observer/config.toml).
    #[arg(long, global = true, env = "OBSERVER_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the observer server (default).
    Serve,
    /// Write ~/.observer/config.toml from the bundled template (idempotent).
    Init,
    /// Load and validate config, including HTTP action definitions.
    Doctor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing()?;
    install_panic_hook();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => server::serve(cli.config).await,
        Command::Init => {
            let report = init::initialize_default().await?;
            if report.created.is_empty() {
                println!(
                    "observer init: already initialized at {}",
                    report.root.display()
                );
            } else {
                println!("observer init: initialized {}", report.root.display());
                for path in &report.created {
                    println!("created {}", path.display());
                }
                if !report.skipped.is_empty() {
                    println!("kept {} existing file(s) unchanged", report.skipped.len());
                }
            }
            println!(
                "next: set channels and admin_users in {}",
                report.root.join("config.toml").display()
            );
            Ok(())
        }
        Command::Doctor => server::doctor(cli.config).await,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            other => Err(anyhow::anyhow!(
                "unsupported OBSERVER_LOG_FORMAT={other:?}; expected one of: json, pretty, compact"
            )),
        }
    }
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(
            "info,observer=debug,ob_app=debug,ob_channels=debug,ob_llm=debug,tower_http=info",
        )
    });
    let log_format: LogFormat = std::env::var("OBSERVER_LOG_FORMAT")
        .unwrap_or_else(|_| "json".to_string())
        .parse()?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);
    match log_format {
        LogFormat::Json => builder
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(true)
            .init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Compact => builder.compact().init(),
    }

    tracing::info!(
        log_format = ?log_format,
        env_filter = ?std::env::var("RUST_LOG").ok(),
        "tracing initialized"
    );
    Ok(())
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = panic_payload_to_string(panic_info.payload());
        tracing::error!(
            panic_location = %location,
            panic_payload = %payload,
            "panic captured"
        );
        default_hook(panic_info);
    }));
}

fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        return msg.to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}
