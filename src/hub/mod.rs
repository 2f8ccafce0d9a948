//! Hub core
//!
//! The hub task owns every registry and processes events one at a time from
//! a single channel. Connection tasks, listeners, and timers only ever post
//! events; they never touch routing state. This is what makes the router,
//! keyword cache, permission gate, and tasters safe without a single lock:
//! all mutation happens between events on one logical thread of control.
//!
//! ```text
//!  commander tasks ──┐                       ┌── actor writer tasks
//!                    ├──> mpsc<HubEvent> ──> Hub ──> mpsc<Bytes> ──┤
//!  actor tasks ──────┤        (serial)       │                     └── commander writer tasks
//!  timer tasks ──────┘                       └── KV / gate / tasters
//! ```

pub mod event;
pub mod router;
pub mod state;

use tokio::sync::mpsc;

use crate::config::HubConfig;
use crate::net::Dialer;
use crate::vocab::Vocabulary;

pub use event::HubEvent;
pub use state::{ActorConn, CommanderConn, ConnRef, HubState, HUB_IDENTITY, HUB_SOURCE};

/// The hub: routing state plus the vocabulary registry and event source
pub struct Hub {
    pub(crate) state: HubState,
    pub(crate) vocab: Vocabulary,
    pub(crate) dialer: Dialer,
    events: mpsc::Receiver<HubEvent>,
}

impl Hub {
    /// Assemble a hub around an already-created event channel
    pub fn new(
        config: HubConfig,
        events_tx: mpsc::Sender<HubEvent>,
        events: mpsc::Receiver<HubEvent>,
        dialer: Dialer,
    ) -> Self {
        Self {
            state: HubState::new(config, events_tx),
            vocab: Vocabulary::standard(),
            dialer,
            events,
        }
    }

    /// Process events until shutdown is requested or every sender is gone
    pub async fn run(mut self) {
        tracing::info!(version = env!("CARGO_PKG_VERSION"), "hub running");
        while let Some(event) = self.events.recv().await {
            self.handle_event(event);
            if self.state.shutdown {
                tracing::info!("hub stopping");
                break;
            }
        }
    }

    /// Routing state, for tests and embedding
    pub fn state(&self) -> &HubState {
        &self.state
    }
}
