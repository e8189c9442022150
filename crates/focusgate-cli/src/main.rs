use clap::{Parser, Subcommand};
use focusgate_core::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod host;

#[derive(Parser)]
#[command(name = "focusgate", version, about = "FocusGate CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mode management and manual activation
    Mode {
        #[command(subcommand)]
        action: commands::mode::ModeAction,
    },
    /// Weekly schedule management
    Schedule {
        #[command(subcommand)]
        action: commands::schedule::ScheduleAction,
    },
    /// Unlock token management
    Token {
        #[command(subcommand)]
        action: commands::token::TokenAction,
    },
    /// Inspect or reset the persisted activation state
    State {
        #[command(subcommand)]
        action: commands::state::StateAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Report the app currently in the foreground
    Foreground(commands::foreground::ForegroundArgs),
    /// Run the scheduler and enforcement daemon
    Run,
}

fn init_tracing(filter: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() {
    let cli = Cli::parse();
    let config = Config::load_or_default();
    init_tracing(&config.logging.filter);

    let result = match cli.command {
        Commands::Mode { action } => commands::mode::run(action),
        Commands::Schedule { action } => commands::schedule::run(action),
        Commands::Token { action } => commands::token::run(action),
        Commands::State { action } => commands::state::run(action),
        Commands::Config { action } => commands::config::run(action),
        Commands::Foreground(args) => commands::foreground::run(args),
        Commands::Run => commands::daemon::run(&config),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
