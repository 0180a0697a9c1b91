use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod commands;

#[derive(Parser)]
#[command(name = "remindd-cli", version, about = "Remindd CLI")]
struct Cli {
    /// Log verbosity (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn", global = true)]
    log_level: Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reminder management
    Reminder {
        #[command(subcommand)]
        action: commands::reminder::ReminderAction,
    },
    /// Engine control: ticks, polling service, health
    Engine {
        #[command(subcommand)]
        action: commands::engine::EngineAction,
    },
    /// Process an acknowledgment for a delivery
    Ack(commands::ack::AckArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }

    let result = match cli.command {
        Commands::Reminder { action } => commands::reminder::run(action),
        Commands::Engine { action } => commands::engine::run(action).await,
        Commands::Ack(args) => commands::ack::run(args).await,
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
