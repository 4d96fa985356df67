pub mod allocation;
pub mod model;
pub mod state_machine;
