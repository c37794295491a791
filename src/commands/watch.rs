use chrono::Local;
use clap::Args;
use laundry_time_core::RoomsSnapshot;

use super::rooms::summary_line;
use super::start_controller;
use crate::config::Config;

/// Print the room summary every time it changes, until Ctrl-C
#[derive(Args)]
pub struct WatchCommand {}

impl WatchCommand {
    pub async fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let controller = start_controller(config).await?;
        let mut updates = controller.watch();

        print_snapshot(&updates.borrow_and_update());

        loop {
            tokio::select! {
                changed = updates.changed() => {
                    if changed.is_err() {
                        println!("Room subscription ended.");
                        break;
                    }
                    print_snapshot(&updates.borrow_and_update());
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        controller.shutdown();
        Ok(())
    }
}

fn print_snapshot(snapshot: &RoomsSnapshot) {
    println!("--- {} ---", Local::now().format("%H:%M:%S"));
    for room in &snapshot.rooms {
        println!("{}", summary_line(room));
    }
    println!();
}
