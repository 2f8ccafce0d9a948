//! Hub state
//!
//! One struct owning every registry: connected actors, connected commanders,
//! live commands, the keyword cache, the permission gate, and the login
//! table. Constructed once at startup and owned by the hub task; every
//! mutation happens between events, so nothing here is locked.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::auth::{AuthPhase, LoginTable, PermGate};
use crate::cimap::Cimap;
use crate::codec::{self, CodecKind};
use crate::config::HubConfig;
use crate::kv::KvStore;
use crate::msg::{Command, KeyValues, Reply, ReplyFlag, RoutingKey, XidCounter};
use crate::taster::Taster;

use super::event::HubEvent;

/// Identity the hub's own commands and diagnostics run under
pub const HUB_IDENTITY: &str = "hub.hub";

/// Source name of hub diagnostics
pub const HUB_SOURCE: &str = "hub";

/// One connected actor
pub struct ActorConn {
    /// Actor name; also its keyword namespace
    pub name: String,
    /// Connection id of the underlying socket tasks
    pub conn_id: u64,
    /// Connection id used on the wire; `None` until a grab-cid actor has
    /// announced its own
    pub cid: Option<u32>,
    /// Next message id to assign
    pub next_mid: u32,
    /// In-flight commands keyed by the routing key sent to the actor
    pub pending: HashMap<RoutingKey, u64>,
    /// Outbound queue into the connection's writer task
    pub tx: mpsc::UnboundedSender<Bytes>,
    /// Codec the actor speaks
    pub codec: CodecKind,
    /// Commands to send once the connection (and any cid grab) is ready
    pub init_cmds: Vec<String>,
    /// Per-command reply deadline
    pub timeout: Option<Duration>,
}

impl ActorConn {
    /// Allocate the next routing key for a forwarded command
    pub fn next_key(&mut self) -> RoutingKey {
        let key = RoutingKey::new(self.cid.unwrap_or(0), self.next_mid);
        self.next_mid += 1;
        key
    }
}

/// One connected commander
pub struct CommanderConn {
    /// Identity ("program.user"); provisional until login when auth is on
    pub identity: String,
    /// Connection id of the underlying socket tasks
    pub conn_id: u64,
    /// Connection id echoed in reply lines to this commander
    pub cid: u32,
    /// In-flight commands keyed by the commander's own routing key
    pub pending: HashMap<RoutingKey, u64>,
    /// Outbound queue into the connection's writer task
    pub tx: mpsc::UnboundedSender<Bytes>,
    /// Reply filter
    pub taster: Taster,
    /// Login handshake state
    pub phase: AuthPhase,
    /// Whether this connection must authenticate before routing
    pub needs_auth: bool,
}

impl CommanderConn {
    /// True once this commander may route commands and receive replies
    pub fn is_routable(&self) -> bool {
        !self.needs_auth || self.phase.is_connected()
    }

    /// Queue one encoded reply line
    pub fn send(&self, bytes: Bytes) {
        if self.tx.send(bytes).is_err() {
            tracing::debug!(commander = %self.identity, "send to closed commander");
        }
    }
}

/// Where a connection id leads
#[derive(Debug, Clone)]
pub enum ConnRef {
    Actor(String),
    Commander(String),
}

/// All hub registries; see the module docs
pub struct HubState {
    /// Static configuration
    pub config: HubConfig,
    /// Connected actors by name
    pub actors: Cimap<ActorConn>,
    /// Connected commanders by identity
    pub commanders: Cimap<CommanderConn>,
    /// Connection id index
    pub conns: HashMap<u64, ConnRef>,
    /// Every live command by xid
    pub commands: HashMap<u64, Command>,
    /// Keyword cache
    pub kv: KvStore,
    /// Permission gate
    pub gate: PermGate,
    /// Login password table
    pub logins: LoginTable,
    /// Command id allocator
    pub xids: XidCounter,
    /// Handle for posting events back into the hub's own channel (timers,
    /// redials)
    pub events_tx: mpsc::Sender<HubEvent>,
    /// Set by the `hub shutdown` word; the run loop exits when it sees it
    pub shutdown: bool,
}

impl HubState {
    /// Build the state from a config
    pub fn new(config: HubConfig, events_tx: mpsc::Sender<HubEvent>) -> Self {
        let mut gate = PermGate::new();
        let mut logins = LoginTable::new();

        for god in &config.gods {
            gate.add_god(god);
        }
        for program in &config.bypass {
            gate.add_bypass(program);
        }
        for spec in &config.programs {
            gate.register_program(&spec.name, spec.actors.iter().cloned());
            if let Some(password) = &spec.password {
                logins.add_program(&spec.name, password);
            }
        }

        let mut commands = HashMap::new();
        commands.insert(0, Command::hub_channel(HUB_IDENTITY));

        Self {
            config,
            actors: Cimap::new(),
            commanders: Cimap::new(),
            conns: HashMap::new(),
            commands,
            kv: KvStore::new(),
            gate,
            logins,
            xids: XidCounter::new(),
            events_tx,
            shutdown: false,
        }
    }

    /// Build a reply on the hub's own diagnostic channel
    pub fn hub_reply(&self, flag: ReplyFlag, keys: KeyValues) -> Reply {
        Reply::new(0, flag, HUB_SOURCE, keys)
    }

    /// Pick a free identity, suffixing `_2`, `_3`, ... on collision
    pub fn unique_identity(&self, desired: &str) -> String {
        if !self.commanders.contains(desired) {
            return desired.to_string();
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}_{}", desired, n);
            if !self.commanders.contains(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Queue a command to an actor connection, registering it in-flight.
    ///
    /// Returns false when the routing key is already registered: two
    /// commands colluding on one id is a hub bug, and the command is refused
    /// rather than sent.
    pub fn send_to_actor(&mut self, actor_name: &str, xid: u64) -> bool {
        let actor = match self.actors.get_mut(actor_name) {
            Some(a) => a,
            None => return false,
        };
        let key = actor.next_key();
        if actor.pending.contains_key(&key) {
            tracing::error!(
                actor = %actor.name,
                key = %key,
                "duplicate in-flight routing key"
            );
            return false;
        }

        let command = match self.commands.get_mut(&xid) {
            Some(c) => c,
            None => return false,
        };
        command.actor_key = Some(key);
        actor.pending.insert(key, xid);

        let bytes = codec::encode_command_for(actor.codec, key, &command.text);
        if actor.tx.send(bytes).is_err() {
            tracing::debug!(actor = %actor.name, "send to closed actor");
        }

        if let Some(timeout) = actor.timeout {
            let events = self.events_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let _ = events.send(HubEvent::CommandTimeout { xid }).await;
            });
        }
        true
    }
}
