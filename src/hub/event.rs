//! Hub events
//!
//! Everything that happens to the hub arrives as one of these, posted into
//! the hub task's channel by connection tasks, listeners, and timers. The
//! hub processes events strictly one at a time, which is what lets the
//! routing state live without locks.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::codec::{CommandLine, ReplyLine};

/// One event for the hub task
#[derive(Debug)]
pub enum HubEvent {
    /// An actor connection is up and ready for registration
    ActorConnected {
        conn_id: u64,
        name: String,
        tx: mpsc::UnboundedSender<Bytes>,
    },

    /// An actor connection produced one decoded reply
    ActorReply { conn_id: u64, line: ReplyLine },

    /// An actor connection tore down
    ActorClosed {
        conn_id: u64,
        error: Option<String>,
    },

    /// A commander connection is up and ready for registration
    CommanderConnected {
        conn_id: u64,
        peer: String,
        tx: mpsc::UnboundedSender<Bytes>,
    },

    /// A commander connection produced one decoded command line
    CommanderLine { conn_id: u64, line: CommandLine },

    /// A commander connection tore down
    CommanderClosed {
        conn_id: u64,
        error: Option<String>,
    },

    /// A command's reply deadline expired
    CommandTimeout { xid: u64 },

    /// Request to (re)dial a configured actor by name
    DialActor { name: String },
}
