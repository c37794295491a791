use clap::Args;
use laundry_time_core::{check_server, RemoteStore};

use crate::config::Config;

/// Show the configured server and whether it is reachable
#[derive(Args)]
pub struct StatusCommand {}

impl StatusCommand {
    pub async fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let server_url = &config.server_url.value;

        println!("Server Status");
        println!("=============");
        println!();
        println!("Server:            {}", server_url);
        println!("Write consistency: {}", config.write_consistency.value);
        println!();

        if !check_server(server_url).await {
            println!("Health check:      ✗ unreachable");
            return Ok(());
        }
        println!("Health check:      ✓ ok");

        match RemoteStore::connect(server_url).await {
            Ok(store) => {
                println!("Store:             ✓ connected (server {})", store.server_peer_id());
                store.close();
            }
            Err(e) => println!("Store:             ✗ {}", e),
        }

        Ok(())
    }
}
