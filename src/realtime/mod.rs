pub mod gateway;
pub mod hub;
pub mod protocol;

pub use gateway::{handle_client_message, RealtimeGateway};
pub use hub::{HubStats, RealtimeHub, SubscriberId};
pub use protocol::{ClientMessage, ServerMessage};
