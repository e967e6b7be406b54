use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod host;

#[derive(Parser)]
#[command(name = "medtrack", version, about = "MedTrack medication reminders")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Medication management
    Med {
        #[command(subcommand)]
        action: commands::med::MedAction,
    },
    /// Inspect and drive pending alarms
    Alarm {
        #[command(subcommand)]
        action: commands::alarm::AlarmAction,
    },
    /// Respond to a dose alert
    Dose {
        #[command(subcommand)]
        action: commands::dose::DoseAction,
    },
    /// Rebuild all alarms, as after a reboot
    Recover {
        /// Skip the settle delay
        #[arg(long)]
        no_settle: bool,
    },
    /// Dose history
    History {
        /// Print as JSON
        #[arg(long)]
        json: bool,
        /// Show at most this many entries
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Export or restore a JSON backup
    Backup {
        #[command(subcommand)]
        action: commands::backup::BackupAction,
    },
}

fn init_logging() {
    let filter = std::env::var("MEDTRACK_LOG")
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("medtrack=info"));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

fn main() {
    init_logging();
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Med { action } => commands::med::run(action),
        Commands::Alarm { action } => commands::alarm::run(action),
        Commands::Dose { action } => commands::dose::run(action),
        Commands::Recover { no_settle } => commands::recover::run(no_settle),
        Commands::History { json, limit } => commands::history::run(json, limit),
        Commands::Config { action } => commands::config::run(action),
        Commands::Backup { action } => commands::backup::run(action),
    };

    if let Err(e) = result {
        tracing::error!("{e}");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
