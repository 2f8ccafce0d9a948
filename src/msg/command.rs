//! Commands and their routing identity
//!
//! A command carries two routing keys: the `(cid, mid)` pair the issuing
//! commander chose (used to address the eventual replies back to it) and the
//! `(cid, mid)` pair the hub assigns when the command is forwarded to an
//! actor. The `xid` is the hub's own process-wide identity for the command and
//! is independent of either peer's numbering.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Connection id / message id pair used to correlate replies with commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RoutingKey {
    /// Connection id
    pub cid: u32,
    /// Message id
    pub mid: u32,
}

impl RoutingKey {
    /// Create a routing key
    pub fn new(cid: u32, mid: u32) -> Self {
        Self { cid, mid }
    }
}

impl std::fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.cid, self.mid)
    }
}

/// Process-wide command id allocator
#[derive(Debug, Default)]
pub struct XidCounter(AtomicU64);

impl XidCounter {
    /// Create a counter starting at 1; xid 0 is reserved for the hub's own
    /// diagnostic channel.
    pub fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    /// Allocate the next xid
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// One request traveling through the hub
#[derive(Debug, Clone)]
pub struct Command {
    /// Process-wide unique id
    pub xid: u64,

    /// When the command entered the hub
    pub created_at: Instant,

    /// Issuing commander identity ("program.user")
    pub commander: String,

    /// Routing key the commander supplied; replies are addressed with it
    pub commander_key: RoutingKey,

    /// Target actor or vocabulary word name
    pub target: String,

    /// Raw command text after the target name
    pub text: String,

    /// Routing key assigned when forwarded to an actor; unset until then
    pub actor_key: Option<RoutingKey>,

    /// Commands that never reach a terminal state (the hub's own channel)
    pub never_done: bool,

    /// Cleared when a terminal reply is produced or the owner disappears
    pub alive: bool,
}

impl Command {
    /// Create a new live command
    pub fn new(
        xid: u64,
        commander: impl Into<String>,
        commander_key: RoutingKey,
        target: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            xid,
            created_at: Instant::now(),
            commander: commander.into(),
            commander_key,
            target: target.into(),
            text: text.into(),
            actor_key: None,
            never_done: false,
            alive: true,
        }
    }

    /// Create the hub's own never-terminating diagnostic command
    pub fn hub_channel(commander: impl Into<String>) -> Self {
        let mut cmd = Self::new(0, commander, RoutingKey::default(), "hub", "(internal)");
        cmd.never_done = true;
        cmd
    }

    /// Program part of the commander identity
    pub fn program(&self) -> &str {
        self.commander
            .split_once('.')
            .map(|(program, _)| program)
            .unwrap_or(&self.commander)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xid_allocation() {
        let counter = XidCounter::new();
        let a = counter.next();
        let b = counter.next();

        assert_ne!(a, 0);
        assert_ne!(a, b);
    }

    #[test]
    fn test_program_extraction() {
        let cmd = Command::new(1, "APO.obs1", RoutingKey::new(3, 7), "tcc", "track");
        assert_eq!(cmd.program(), "APO");

        let bare = Command::new(2, "hub", RoutingKey::default(), "tcc", "ping");
        assert_eq!(bare.program(), "hub");
    }

    #[test]
    fn test_hub_channel_never_done() {
        let cmd = Command::hub_channel("hub.hub");
        assert_eq!(cmd.xid, 0);
        assert!(cmd.never_done);
        assert!(cmd.alive);
    }
}
