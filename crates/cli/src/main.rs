mod pairing_commands;

use {
    clap::{Parser, Subcommand},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "larkgate", about = "Larkgate, a chat-channel gateway for LLM agents")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// State file backing the pairing engine (defaults to the user data
    /// directory).
    #[arg(long, global = true, env = "LARKGATE_STATE_FILE")]
    state_file: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Pairing and allow-from administration.
    Pairing {
        #[command(subcommand)]
        action: pairing_commands::PairingAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_thread_ids(false).with_ansi(true))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_telemetry(&cli);

    match &cli.command {
        Commands::Pairing { action } => {
            pairing_commands::run(action, cli.state_file.clone()).await
        },
    }
}
