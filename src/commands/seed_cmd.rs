use clap::Args;
use laundry_time_core::{RemoteStore, RoomAdapter, SeedOutcome};

use super::CommandError;
use crate::config::Config;

/// Create the seed rooms if the store is empty
#[derive(Args)]
pub struct SeedCommand {}

impl SeedCommand {
    pub async fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let seed = config.seed_data()?;
        let store = RemoteStore::connect(&config.server_url.value).await?;
        let adapter = RoomAdapter::new(store.clone());

        let outcome = adapter.seed_if_empty(&seed).await;
        store.close();

        match outcome {
            SeedOutcome::Seeded { created, failed } => {
                println!("Created {} room(s).", created);
                if failed > 0 {
                    println!("{} room(s) could not be created; see log output.", failed);
                }
            }
            SeedOutcome::Skipped { existing } => {
                println!(
                    "Store already holds {} room document(s); nothing to do.",
                    existing
                );
            }
            SeedOutcome::Failed(e) => return Err(CommandError::SeedFailed(e).into()),
        }
        Ok(())
    }
}
