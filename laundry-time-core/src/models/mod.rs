mod machine;
mod room;

pub use machine::{Machine, MachineStatus, MachineType};
pub use room::Room;
