use clap::{Args, Subcommand};
use std::fs;
use std::io::Write;
use std::path::Path;

use super::OutputFormat;
use crate::config::Config;

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Initialize configuration file
    Init,
}

const DEFAULT_CONFIG: &str = r#"# laundrytime configuration

# Document store server
server_url: ws://localhost:8080

# YAML list of {name, washers, dryers} used to seed an empty store
# (default: built-in rooms). Relative paths are resolved against this file.
# seed_file: rooms.yaml

# last_write_wins (default) or versioned
# write_consistency: last_write_wins
"#;

impl ConfigCommand {
    /// `config_path` is the file the CLI resolved, from `--config` or the
    /// platform default.
    pub fn run(
        &self,
        config: &Config,
        config_path: &Path,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => {
                        println!("Configuration");
                        println!("=============\n");

                        if let Some(path) = &config.config_file {
                            println!("Config file: {}", path.display());
                        } else {
                            println!("Config file: {} (not found)", config_path.display());
                        }
                        println!();

                        println!("server_url: {}", config.server_url.value);
                        println!("  source: {}", config.server_url.source);
                        println!();

                        match &config.seed_file.value {
                            Some(path) => println!("seed_file: {}", path.display()),
                            None => println!("seed_file: (built-in rooms)"),
                        }
                        println!("  source: {}", config.seed_file.source);
                        println!();

                        println!("write_consistency: {}", config.write_consistency.value);
                        println!("  source: {}", config.write_consistency.source);
                    }
                }
                Ok(())
            }

            ConfigSubcommand::Init => {
                if !init_config(config_path)? {
                    println!("Config file already exists: {}", config_path.display());
                    println!("Use 'laundry config show' to view current configuration.");
                    return Ok(());
                }

                println!("Created config file: {}", config_path.display());
                println!("\nEdit this file to customize your settings.");
                Ok(())
            }
        }
    }
}

/// Writes the default config to `path` unless a file is already there.
/// Returns whether a file was written.
fn init_config(path: &Path) -> std::io::Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    write_default_config(path)?;
    Ok(true)
}

fn write_default_config(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::File::create(path)?;
    file.write_all(DEFAULT_CONFIG.as_bytes())
}
