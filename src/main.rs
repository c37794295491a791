use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;

use commands::{
    ConfigCommand, MachineArgs, MachineIntent, RoomsCommand, SeedCommand, ShowCommand,
    StatusCommand, WatchCommand,
};
use config::Config;

#[derive(Parser)]
#[command(name = "laundry")]
#[command(version)]
#[command(about = "Shared washer and dryer availability for laundry rooms", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List rooms with washer and dryer availability
    Rooms(RoomsCommand),

    /// Show the machines of one room
    Show(ShowCommand),

    /// Flip a machine between available and occupied
    Toggle(MachineArgs),

    /// Report a machine as out of order
    OutOfOrder(MachineArgs),

    /// Return an out-of-order machine to service
    Working(MachineArgs),

    /// Follow room availability live
    Watch(WatchCommand),

    /// Create the seed rooms if the store is empty
    Seed(SeedCommand),

    /// Show server connectivity
    Status(StatusCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(Config::default_config_path);
    let config = Config::load(cli.config)?;

    match cli.command {
        Some(Commands::Rooms(cmd)) => cmd.run(&config).await?,
        Some(Commands::Show(cmd)) => cmd.run(&config).await?,
        Some(Commands::Toggle(args)) => args.run(MachineIntent::Toggle, &config).await?,
        Some(Commands::OutOfOrder(args)) => {
            args.run(MachineIntent::MarkOutOfOrder, &config).await?
        }
        Some(Commands::Working(args)) => args.run(MachineIntent::MarkWorking, &config).await?,
        Some(Commands::Watch(cmd)) => cmd.run(&config).await?,
        Some(Commands::Seed(cmd)) => cmd.run(&config).await?,
        Some(Commands::Status(cmd)) => cmd.run(&config).await?,
        Some(Commands::Config(cmd)) => cmd.run(&config, &config_path)?,
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}
