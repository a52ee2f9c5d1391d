pub mod update_bus;

pub use update_bus::{TokenUpdate, UpdateBus};
