use clap::Args;
use laundry_time_core::{MachineStatus, RemoteStore, SyncController, WriteOutcome};

use super::{resolve_room, start_controller, CommandError, SNAPSHOT_TIMEOUT};
use crate::config::Config;

/// Selects one machine in one room
#[derive(Args)]
pub struct MachineArgs {
    /// Room id or name
    room: String,

    /// Machine number within the room
    machine: u32,
}

/// What the user wants to happen to a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineIntent {
    Toggle,
    MarkOutOfOrder,
    MarkWorking,
}

impl MachineIntent {
    /// Status the machine should end up in, given its current one.
    fn target(self, current: MachineStatus) -> Option<MachineStatus> {
        match self {
            MachineIntent::Toggle => current.toggled(),
            MachineIntent::MarkOutOfOrder => Some(MachineStatus::OutOfOrder),
            MachineIntent::MarkWorking => Some(MachineStatus::Available),
        }
    }
}

impl MachineArgs {
    pub async fn run(
        &self,
        intent: MachineIntent,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let controller = start_controller(config).await?;
        let result = self.apply(&controller, intent).await;
        controller.shutdown();
        result
    }

    async fn apply(
        &self,
        controller: &SyncController<RemoteStore>,
        intent: MachineIntent,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let room = resolve_room(controller, &self.room)?;
        let room_id = room
            .id
            .clone()
            .ok_or_else(|| CommandError::UnknownRoom(self.room.clone()))?;
        let current = room.machine(self.machine).map(|m| m.status);

        let pending = match intent {
            MachineIntent::Toggle => controller.toggle_machine(&room_id, self.machine),
            MachineIntent::MarkOutOfOrder => controller.mark_out_of_order(&room_id, self.machine),
            MachineIntent::MarkWorking => controller.mark_working(&room_id, self.machine),
        }?;

        match pending.await? {
            WriteOutcome::Written { .. } => {}
            WriteOutcome::Abandoned(e) => return Err(CommandError::WriteFailed(e.to_string()).into()),
        }

        let target = current.and_then(|status| intent.target(status));
        let machine_id = self.machine;
        let confirmed = controller
            .wait_until(SNAPSHOT_TIMEOUT, |s| {
                s.room(&room_id)
                    .and_then(|r| r.machine(machine_id))
                    .map(|m| Some(m.status) == target)
                    .unwrap_or(false)
            })
            .await;

        match confirmed {
            Some(_) => println!(
                "{} #{} is now {}",
                room.name,
                self.machine,
                target.map(MachineStatus::label).unwrap_or("unchanged")
            ),
            None => println!(
                "{} #{}: update sent, waiting for confirmation timed out",
                room.name, self.machine
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::{spawn_server, test_config};
    use laundry_time_core::IntentError;

    #[test]
    fn test_intent_targets() {
        assert_eq!(
            MachineIntent::Toggle.target(MachineStatus::Available),
            Some(MachineStatus::Occupied)
        );
        assert_eq!(MachineIntent::Toggle.target(MachineStatus::OutOfOrder), None);
        assert_eq!(
            MachineIntent::MarkOutOfOrder.target(MachineStatus::Occupied),
            Some(MachineStatus::OutOfOrder)
        );
        assert_eq!(
            MachineIntent::MarkWorking.target(MachineStatus::OutOfOrder),
            Some(MachineStatus::Available)
        );
    }

    #[tokio::test]
    async fn test_unknown_machine_is_rejected() {
        let (url, _temp) = spawn_server().await;
        let controller = start_controller(&test_config(&url)).await.unwrap();

        let args = MachineArgs {
            room: "Center Street North".to_string(),
            machine: 99,
        };
        let err = args
            .apply(&controller, MachineIntent::Toggle)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IntentError>(),
            Some(IntentError::MachineNotFound { machine_id: 99, .. })
        ));
    }

    #[tokio::test]
    async fn test_toggle_confirms_new_status() {
        let (url, _temp) = spawn_server().await;
        let controller = start_controller(&test_config(&url)).await.unwrap();

        let args = MachineArgs {
            room: "Center Street North".to_string(),
            machine: 1,
        };
        args.apply(&controller, MachineIntent::Toggle).await.unwrap();

        let room = resolve_room(&controller, "Center Street North").unwrap();
        assert_eq!(room.machine(1).unwrap().status, MachineStatus::Occupied);
    }
}
