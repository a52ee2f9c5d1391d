use crate::core::TokenState;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, instrument};

/// A freshly assembled token state, as pushed to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenUpdate {
    pub token: String,
    pub state: TokenState,
}

impl TokenUpdate {
    pub fn new(state: TokenState) -> Self {
        Self {
            token: state.token().to_string(),
            state,
        }
    }
}

/// In-process fan-out between the engine and the realtime hub
#[derive(Debug, Clone)]
pub struct UpdateBus {
    tx: broadcast::Sender<TokenUpdate>,
}

impl UpdateBus {
    #[instrument]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        debug!(capacity, "UpdateBus initialized");
        Self { tx }
    }

    /// Never fails the caller: having no listeners is normal.
    /// Returns how many receivers got the update.
    #[instrument(skip(self, update), fields(token = %update.token))]
    pub fn publish(&self, update: TokenUpdate) -> usize {
        match self.tx.send(update) {
            Ok(receivers) => {
                debug!(receivers, "Published token update");
                receivers
            }
            Err(_) => {
                debug!("No listeners for token update");
                0
            }
        }
    }

    #[instrument(skip(self))]
    pub fn subscribe(&self) -> broadcast::Receiver<TokenUpdate> {
        let receiver = self.tx.subscribe();
        debug!("New listener added to update bus");
        receiver
    }
}
