use chrono::{DateTime, Utc};
use clap::Args;
use laundry_time_core::{format_relative_time_from, Machine, MachineType, Room};
use serde_json::Value;

use super::{resolve_room, start_controller, CommandError, OutputFormat};
use crate::config::Config;

/// List rooms with washer and dryer availability
#[derive(Args)]
pub struct RoomsCommand {
    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

impl RoomsCommand {
    pub async fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let controller = start_controller(config).await?;
        let rooms = controller.rooms();
        controller.shutdown();

        match self.format {
            OutputFormat::Json => {
                let rooms: Vec<Value> = rooms.iter().map(room_json).collect::<Result<_, _>>()?;
                println!("{}", serde_json::to_string_pretty(&rooms)?);
            }
            OutputFormat::Text => {
                if rooms.is_empty() {
                    println!("No rooms found.");
                }
                for room in &rooms {
                    println!("{}", summary_line(room));
                }
            }
        }
        Ok(())
    }
}

/// Show the machines of one room
#[derive(Args)]
pub struct ShowCommand {
    /// Room id or name
    room: String,

    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

impl ShowCommand {
    pub async fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let controller = start_controller(config).await?;
        let room = resolve_room(&controller, &self.room)?;
        controller.shutdown();

        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&room_json(&room)?)?);
            }
            OutputFormat::Text => print!("{}", room_detail(&room, Utc::now())),
        }
        Ok(())
    }
}

/// The stored document body with the id added back.
fn room_json(room: &Room) -> Result<Value, CommandError> {
    let mut value = room.to_document()?;
    if let (Some(object), Some(id)) = (value.as_object_mut(), &room.id) {
        object.insert("id".to_string(), Value::String(id.clone()));
    }
    Ok(value)
}

/// One line per room: name, then available/total per machine type.
pub(crate) fn summary_line(room: &Room) -> String {
    format!(
        "{:<24} washers {:>2}/{:<2}  dryers {:>2}/{:<2}  [{}]",
        room.name,
        room.available(MachineType::Washer),
        room.washers().count(),
        room.available(MachineType::Dryer),
        room.dryers().count(),
        room.id.as_deref().unwrap_or("-"),
    )
}

fn machine_line(machine: &Machine, now: DateTime<Utc>) -> String {
    format!(
        "  #{:<3} {:<13} updated {}",
        machine.id,
        machine.status.label(),
        format_relative_time_from(machine.last_status_update, now)
    )
}

/// Room header followed by its machines grouped into washers and dryers.
pub(crate) fn room_detail(room: &Room, now: DateTime<Utc>) -> String {
    let mut out = room.to_string();

    for (title, machine_type) in [("Washers", MachineType::Washer), ("Dryers", MachineType::Dryer)] {
        let machines: Vec<&Machine> = room.machines_of_type(machine_type).collect();
        if machines.is_empty() {
            continue;
        }
        out.push('\n');
        out.push_str(title);
        out.push('\n');
        for machine in machines {
            out.push_str(&machine_line(machine, now));
            out.push('\n');
        }
    }

    out.push_str(&format!(
        "\nLast updated {}\n",
        format_relative_time_from(room.last_updated, now)
    ));
    out
}
