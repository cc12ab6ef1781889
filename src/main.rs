use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use safety_alert_bot::telemetry::{self, LogFormat};

mod commands;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser, Debug)]
#[command(
    name = "safety-alert-bot",
    version,
    about = "Relay Motive speeding events to Telegram"
)]
struct Cli {
    /// Console log format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the webhook receiver
    Serve {
        /// Interface to bind
        #[arg(long, env = "WEB_INTERFACE", default_value = "0.0.0.0")]
        interface: String,
        /// Port to listen on
        #[arg(long, env = "WEB_PORT", default_value_t = 8000)]
        port: u16,
        /// Skip the Prometheus recorder and the /metrics endpoint
        #[arg(long, default_value_t = false)]
        no_metrics: bool,
    },
    /// Print the X-KT-Webhook-Signature value for a payload
    Sign {
        /// Webhook shared secret
        #[arg(long, env = "WEBHOOK_SECRET", hide_env_values = true)]
        secret: String,
        /// Payload file, or "-" for stdin
        #[arg(default_value = "-")]
        payload: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            interface,
            port,
            no_metrics,
        } => {
            telemetry::init_tracing(cli.log_format)?;
            commands::handle_serve(&interface, port, !no_metrics).await
        }
        Commands::Sign { secret, payload } => commands::handle_sign(&secret, &payload),
    }
}
