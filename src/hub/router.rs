//! Command routing and reply fan-out
//!
//! Commands: commander line -> authorization gate -> actor (or vocabulary
//! word). Replies: actor line -> keyword cache -> every commander's taster.
//! Every routing failure is answered with a terminal fail reply; nothing is
//! ever dropped silently.

use crate::auth::{Access, AuthPhase, DenyReason, LoginOutcome};
use crate::codec::{ascii, CommandLine, ReplyLine};
use crate::msg::{keys_from, Command, KeyValue, KeyValues, Reply, ReplyFlag, RoutingKey};
use crate::taster::Taster;
use crate::vocab::keys::cache_source;

use super::event::HubEvent;
use super::state::{ActorConn, CommanderConn, ConnRef, HUB_IDENTITY, HUB_SOURCE};
use super::Hub;

impl Hub {
    /// Process one event; never panics, never blocks
    pub(crate) fn handle_event(&mut self, event: HubEvent) {
        match event {
            HubEvent::ActorConnected { conn_id, name, tx } => {
                self.on_actor_connected(conn_id, name, tx)
            }
            HubEvent::ActorReply { conn_id, line } => self.on_actor_reply(conn_id, line),
            HubEvent::ActorClosed { conn_id, error } => self.on_actor_closed(conn_id, error),
            HubEvent::CommanderConnected { conn_id, peer, tx } => {
                self.on_commander_connected(conn_id, peer, tx)
            }
            HubEvent::CommanderLine { conn_id, line } => self.on_commander_line(conn_id, line),
            HubEvent::CommanderClosed { conn_id, error } => {
                self.on_commander_closed(conn_id, error)
            }
            HubEvent::CommandTimeout { xid } => self.on_command_timeout(xid),
            HubEvent::DialActor { name } => self.on_dial_actor(&name),
        }
    }

    // ---- actor lifecycle -------------------------------------------------

    fn on_actor_connected(
        &mut self,
        conn_id: u64,
        name: String,
        tx: tokio::sync::mpsc::UnboundedSender<bytes::Bytes>,
    ) {
        if self.state.actors.contains(&name) {
            tracing::error!(actor = %name, "duplicate actor name; refusing connection");
            self.deliver(self.state.hub_reply(
                ReplyFlag::Warn,
                keys_from([("duplicateActor", name.as_str())]),
            ));
            return; // dropping tx tears the new connection down
        }

        let spec = match self.state.config.actor(&name) {
            Some(spec) => spec.clone(),
            None => {
                tracing::error!(actor = %name, "connection for unconfigured actor");
                return;
            }
        };

        let cid = if spec.grab_cid {
            None
        } else {
            Some(conn_id as u32)
        };

        let actor = ActorConn {
            name: name.clone(),
            conn_id,
            cid,
            next_mid: 1,
            pending: std::collections::HashMap::new(),
            tx,
            codec: spec.codec,
            init_cmds: spec.init_cmds.clone(),
            timeout: spec.timeout(),
        };
        self.state.actors.insert(name.clone(), actor);
        self.state.conns.insert(conn_id, ConnRef::Actor(name.clone()));

        self.state.kv.add_source(&name);
        if spec.governed {
            self.state.gate.govern_actor(&name, spec.safe_regex());
        }

        tracing::info!(actor = %name, conn_id, grab_cid = spec.grab_cid, "actor connected");
        self.deliver(self.state.hub_reply(
            ReplyFlag::Info,
            keys_from([("actorConnected", name.as_str())]),
        ));

        if spec.grab_cid {
            // One probe with cid 0; init commands wait until the first reply
            // reveals the actor's own cid.
            let xid = self.make_hub_command(&name, "ping");
            self.state.send_to_actor(&name, xid);
        } else {
            self.send_init_cmds(&name);
        }
    }

    fn send_init_cmds(&mut self, actor_name: &str) {
        let cmds = match self.state.actors.get_mut(actor_name) {
            Some(actor) => std::mem::take(&mut actor.init_cmds),
            None => return,
        };
        for text in cmds {
            let xid = self.make_hub_command(actor_name, &text);
            self.state.send_to_actor(actor_name, xid);
        }
    }

    fn on_actor_reply(&mut self, conn_id: u64, line: ReplyLine) {
        let name = match self.state.conns.get(&conn_id) {
            Some(ConnRef::Actor(name)) => name.clone(),
            _ => {
                tracing::debug!(conn_id, "reply from unknown connection");
                return;
            }
        };

        let mut grabbed_cid = false;
        {
            let actor = match self.state.actors.get_mut(&name) {
                Some(a) => a,
                None => return,
            };

            if actor.cid.is_none() {
                // First reply from a grab-cid actor announces its cid;
                // re-key anything sent under the provisional cid 0.
                actor.cid = Some(line.key.cid);
                let rekeyed: Vec<(RoutingKey, u64)> = actor
                    .pending
                    .drain()
                    .map(|(key, xid)| {
                        if key.cid == 0 {
                            (RoutingKey::new(line.key.cid, key.mid), xid)
                        } else {
                            (key, xid)
                        }
                    })
                    .collect();
                actor.pending.extend(rekeyed);
                grabbed_cid = true;
                tracing::info!(actor = %name, cid = line.key.cid, "actor announced cid");
            }
        }
        if grabbed_cid {
            self.send_init_cmds(&name);
        }

        let actor = match self.state.actors.get_mut(&name) {
            Some(a) => a,
            None => return,
        };
        let xid = match actor.pending.get(&line.key) {
            Some(&xid) => xid,
            None => {
                // Orphan reply: attach it to a synthesized hub-owned command
                // so it is surfaced as a diagnostic instead of dropped.
                let xid = self.state.xids.next();
                let mut cmd =
                    Command::new(xid, HUB_IDENTITY, RoutingKey::default(), &name, "(orphan)");
                cmd.actor_key = Some(line.key);
                actor.pending.insert(line.key, xid);
                self.state.commands.insert(xid, cmd);
                tracing::warn!(actor = %name, key = %line.key, "orphan reply");
                self.deliver(self.state.hub_reply(
                    ReplyFlag::Diagnostic,
                    keys_from([("orphanReply", format!("{} {}", name, line.key))]),
                ));
                xid
            }
        };

        // A degraded non-terminal line is surfaced as a warning; a degraded
        // terminal line must stay terminal or the command would hang.
        let flag = if line.degraded && !line.flag.is_terminal() {
            ReplyFlag::Warn
        } else {
            line.flag
        };

        self.deliver(Reply::new(xid, flag, name, line.keys));
    }

    fn on_actor_closed(&mut self, conn_id: u64, error: Option<String>) {
        let name = match self.state.conns.remove(&conn_id) {
            Some(ConnRef::Actor(name)) => name,
            Some(other) => {
                self.state.conns.insert(conn_id, other);
                return;
            }
            None => return,
        };
        let actor = match self.state.actors.remove(&name) {
            Some(a) => a,
            None => return,
        };

        tracing::warn!(actor = %name, error = ?error, "actor disconnected");

        // The namespace goes first so nothing can read stale values.
        self.state.kv.drop_source(&name);

        for (_, xid) in actor.pending {
            self.deliver(Reply::new(
                xid,
                ReplyFlag::Failed,
                name.clone(),
                keys_from([("why", "actor disconnected")]),
            ));
        }

        self.deliver(self.state.hub_reply(
            ReplyFlag::Warn,
            keys_from([("actorDisconnected", name.as_str())]),
        ));
    }

    fn on_dial_actor(&mut self, name: &str) {
        match self.state.config.actor(name) {
            Some(spec) => self.dialer.dial(spec.clone()),
            None => tracing::warn!(actor = %name, "dial requested for unconfigured actor"),
        }
    }

    // ---- commander lifecycle ---------------------------------------------

    fn on_commander_connected(
        &mut self,
        conn_id: u64,
        peer: String,
        tx: tokio::sync::mpsc::UnboundedSender<bytes::Bytes>,
    ) {
        let needs_auth = self.state.config.listen.needs_auth;
        let program = if needs_auth {
            "unknown".to_string()
        } else {
            self.state.config.listen.program.clone()
        };
        let identity = self
            .state
            .unique_identity(&format!("{}.conn{}", program, conn_id));

        let commander = CommanderConn {
            identity: identity.clone(),
            conn_id,
            cid: conn_id as u32,
            pending: std::collections::HashMap::new(),
            tx,
            taster: Taster::for_commander(&identity),
            phase: if needs_auth {
                AuthPhase::NotConnected
            } else {
                AuthPhase::Connected
            },
            needs_auth,
        };
        self.state.commanders.insert(identity.clone(), commander);
        self.state
            .conns
            .insert(conn_id, ConnRef::Commander(identity.clone()));

        tracing::info!(commander = %identity, peer = %peer, needs_auth, "commander connected");
        if !needs_auth {
            self.deliver(self.state.hub_reply(
                ReplyFlag::Info,
                keys_from([("commander", identity.as_str())]),
            ));
        }
    }

    fn on_commander_closed(&mut self, conn_id: u64, error: Option<String>) {
        let identity = match self.state.conns.remove(&conn_id) {
            Some(ConnRef::Commander(identity)) => identity,
            Some(other) => {
                self.state.conns.insert(conn_id, other);
                return;
            }
            None => return,
        };
        let commander = match self.state.commanders.remove(&identity) {
            Some(c) => c,
            None => return,
        };

        // In-flight commands are abandoned: late replies lose their owner
        // and reach only listeners whose tasters match.
        tracing::info!(
            commander = %identity,
            abandoned = commander.pending.len(),
            error = ?error,
            "commander disconnected"
        );

        if commander.is_routable() {
            self.deliver(self.state.hub_reply(
                ReplyFlag::Info,
                keys_from([("commanderGone", identity.as_str())]),
            ));
        }
    }

    fn on_commander_line(&mut self, conn_id: u64, line: CommandLine) {
        let identity = match self.state.conns.get(&conn_id) {
            Some(ConnRef::Commander(identity)) => identity.clone(),
            _ => {
                tracing::debug!(conn_id, "command from unknown connection");
                return;
            }
        };

        let commander = match self.state.commanders.get(&identity) {
            Some(c) => c,
            None => return,
        };

        if commander.needs_auth {
            let verb = line.target.to_ascii_lowercase();
            if !commander.phase.is_connected() {
                self.handle_handshake(&identity, line);
                return;
            }
            if verb == "logout" {
                self.handle_handshake(&identity, line);
                return;
            }
        } else if let Some(wanted) = line.commander.clone() {
            // Unauthenticated connections may claim an identity once; the
            // connection is renamed so reply ownership follows it.
            if !wanted.eq_ignore_ascii_case(&identity) {
                self.rename_commander(&identity, &wanted);
                let renamed = match self.state.conns.get(&conn_id) {
                    Some(ConnRef::Commander(name)) => name.clone(),
                    _ => return,
                };
                self.accept_command(&renamed, line);
                return;
            }
        }

        self.accept_command(&identity, line);
    }

    /// Register a decoded command and dispatch it
    fn accept_command(&mut self, identity: &str, line: CommandLine) {
        let commander = match self.state.commanders.get_mut(identity) {
            Some(c) => c,
            None => return,
        };
        let key = RoutingKey::new(commander.cid, line.mid);

        if commander.pending.contains_key(&key) {
            tracing::warn!(commander = %identity, key = %key, "duplicate message id");
            commander.send(ascii::encode_reply(
                key,
                ReplyFlag::Failed,
                HUB_SOURCE,
                &keys_from([("why", "duplicate message id")]),
            ));
            return;
        }

        let xid = self.state.xids.next();
        let cmd = Command::new(xid, identity, key, &line.target, &line.text);
        commander.pending.insert(key, xid);
        self.state.commands.insert(xid, cmd);

        tracing::debug!(
            commander = %identity,
            target = %line.target,
            xid,
            "command accepted"
        );
        self.dispatch(xid);
    }

    // ---- dispatch --------------------------------------------------------

    /// Route one registered command to its target
    fn dispatch(&mut self, xid: u64) {
        let (target, program, text) = match self.state.commands.get(&xid) {
            Some(cmd) => (
                cmd.target.clone(),
                cmd.program().to_string(),
                cmd.text.clone(),
            ),
            None => return,
        };

        if self.state.actors.contains(&target) {
            match self.state.gate.check_access(&program, &target, &text) {
                Access::Granted => {
                    if !self.state.send_to_actor(&target, xid) {
                        self.fail_command(
                            xid,
                            keys_from([("why", "internal send failure")]),
                        );
                    }
                }
                Access::Denied(reason) => self.deny_command(xid, &target, &program, reason),
            }
            return;
        }

        if self.vocab.contains(&target) {
            self.run_word(xid, &target);
            return;
        }

        let mut keys = keys_from([("why", "target not connected")]);
        keys.insert("noTarget", KeyValue::Scalar(target));
        self.fail_command(xid, keys);
    }

    fn run_word(&mut self, xid: u64, target: &str) {
        let cmd = match self.state.commands.get(&xid) {
            Some(cmd) => cmd.clone(),
            None => return,
        };
        let word = match self.vocab.get(target) {
            Some(word) => word,
            None => return,
        };

        match word.handle(&mut self.state, &cmd) {
            Ok(replies) => {
                let mut saw_terminal = false;
                for reply in replies {
                    saw_terminal |= reply.is_terminal();
                    self.deliver(reply);
                }
                if !saw_terminal {
                    self.deliver(Reply::new(
                        xid,
                        ReplyFlag::Done,
                        target.to_string(),
                        KeyValues::new(),
                    ));
                }
            }
            Err(e) => {
                tracing::warn!(word = %target, error = %e, "vocabulary handler failed");
                self.fail_command(xid, keys_from([("why", e.to_string())]));
            }
        }
    }

    fn deny_command(&mut self, xid: u64, target: &str, program: &str, reason: DenyReason) {
        let mut keys = KeyValues::new();
        keys.insert("NoPermission", KeyValue::Scalar(target.to_string()));

        let (why, diag) = match reason {
            DenyReason::Locked { by } => (format!("{} locked by {}", target, by), false),
            DenyReason::NoEntry { first } => (
                format!("no authorization entry exists for program {}", program),
                first,
            ),
            DenyReason::NotAuthorized => {
                (format!("program {} may not command {}", program, target), false)
            }
        };
        keys.insert("why", KeyValue::Scalar(why.clone()));

        tracing::info!(target = %target, program = %program, why = %why, "command denied");
        self.fail_command(xid, keys);

        if diag {
            // First missing-entry denial for this program: duplicate the
            // warning on the hub channel, since it usually means a
            // configuration gap rather than an intruder.
            self.deliver(self.state.hub_reply(
                ReplyFlag::Warn,
                keys_from([("noAuthEntry", program), ("why", why.as_str())]),
            ));
        }
    }

    /// Answer a command with a terminal fail reply through normal fan-out
    fn fail_command(&mut self, xid: u64, keys: KeyValues) {
        self.deliver(Reply::new(xid, ReplyFlag::Failed, HUB_SOURCE, keys));
    }

    fn on_command_timeout(&mut self, xid: u64) {
        let source = match self.state.commands.get(&xid) {
            Some(cmd) if cmd.alive => cmd.target.clone(),
            _ => return,
        };
        tracing::warn!(xid, actor = %source, "command timed out");
        let mut keys = keys_from([("why", "timeout")]);
        keys.insert("Timeout", KeyValue::Flag);
        self.deliver(Reply::new(xid, ReplyFlag::Failed, source, keys));
    }

    // ---- reply fan-out ---------------------------------------------------

    /// Cache a reply's keywords, fan it out through every taster, and close
    /// out the owning command when the flag is terminal.
    pub(crate) fn deliver(&mut self, reply: Reply) {
        // `keys_<actor>` answers are cached under the actor itself; clients
        // still see the relabeled source.
        let cache_under = cache_source(&reply.source)
            .unwrap_or(&reply.source)
            .to_string();
        self.state.kv.set_keys(&cache_under, &reply.keys, reply.xid);

        let (owner, owner_key, never_done) = match self.state.commands.get(&reply.xid) {
            Some(cmd) => (cmd.commander.clone(), cmd.commander_key, cmd.never_done),
            None => {
                tracing::debug!(xid = reply.xid, "reply for unknown command");
                return;
            }
        };

        for (_, commander) in self.state.commanders.iter() {
            if !commander.is_routable() {
                continue;
            }
            let is_owner = commander.identity.eq_ignore_ascii_case(&owner);
            let key = if is_owner {
                owner_key
            } else {
                RoutingKey::default()
            };
            let matched = commander
                .taster
                .taste(&reply.source, &owner, &reply.keys);

            if matched && (reply.broadcast || is_owner) {
                commander.send(ascii::encode_reply(
                    key,
                    reply.flag,
                    &reply.source,
                    &reply.keys,
                ));
            } else if reply.is_terminal() && reply.broadcast {
                // Completion is still announced, just without the keys.
                commander.send(ascii::encode_reply(
                    key,
                    reply.flag,
                    &reply.source,
                    &KeyValues::new(),
                ));
            }
        }

        if reply.is_terminal() && !never_done {
            self.finish_command(reply.xid, reply.flag, &owner, owner_key);
        }
    }

    /// Remove a finished command from every registry and note its completion
    fn finish_command(&mut self, xid: u64, flag: ReplyFlag, owner: &str, owner_key: RoutingKey) {
        let cmd = match self.state.commands.remove(&xid) {
            Some(cmd) => cmd,
            None => return,
        };

        if let (Some(actor_key), Some(actor)) =
            (cmd.actor_key, self.state.actors.get_mut(&cmd.target))
        {
            actor.pending.remove(&actor_key);
        }
        if let Some(commander) = self.state.commanders.get_mut(owner) {
            commander.pending.remove(&owner_key);
        }

        self.deliver(self.state.hub_reply(
            ReplyFlag::Diagnostic,
            keys_from([
                ("cmdDone", xid.to_string()),
                ("cmdr", cmd.commander.clone()),
                ("target", cmd.target.clone()),
                ("flag", flag.as_char().to_string()),
            ]),
        ));
    }

    // ---- authentication --------------------------------------------------

    fn handle_handshake(&mut self, identity: &str, line: CommandLine) {
        let verb = line.target.to_ascii_lowercase();
        match verb.as_str() {
            "knockknock" => {
                let nonce = self.state.logins.make_nonce();
                if let Some(commander) = self.state.commanders.get_mut(identity) {
                    commander.phase = AuthPhase::Connecting {
                        nonce: nonce.clone(),
                    };
                    let key = RoutingKey::new(commander.cid, line.mid);
                    commander.send(ascii::encode_reply(
                        key,
                        ReplyFlag::Done,
                        HUB_SOURCE,
                        &keys_from([("nonce", nonce.as_str())]),
                    ));
                }
            }
            "login" => self.handle_login(identity, line),
            "logout" => {
                if let Some(commander) = self.state.commanders.get_mut(identity) {
                    let was_routable = commander.is_routable();
                    commander.phase = AuthPhase::NotConnected;
                    let key = RoutingKey::new(commander.cid, line.mid);
                    commander.send(ascii::encode_reply(
                        key,
                        ReplyFlag::Done,
                        HUB_SOURCE,
                        &keys_from([("loggedOut", identity)]),
                    ));
                    if was_routable {
                        tracing::info!(commander = %identity, "logged out");
                        self.deliver(self.state.hub_reply(
                            ReplyFlag::Info,
                            keys_from([("commanderGone", identity)]),
                        ));
                    }
                }
            }
            _ => {
                if let Some(commander) = self.state.commanders.get(identity) {
                    let key = RoutingKey::new(commander.cid, line.mid);
                    commander.send(ascii::encode_reply(
                        key,
                        ReplyFlag::Failed,
                        HUB_SOURCE,
                        &keys_from([("why", "login required")]),
                    ));
                }
            }
        }
    }

    fn handle_login(&mut self, identity: &str, line: CommandLine) {
        let parsed = crate::codec::parse_keys(&line.text, crate::codec::Delim::Whitespace);
        let program = scalar(&parsed.keys, "program");
        let username = scalar(&parsed.keys, "username");
        let password = scalar(&parsed.keys, "password");

        let commander = match self.state.commanders.get(identity) {
            Some(c) => c,
            None => return,
        };
        let key = RoutingKey::new(commander.cid, line.mid);

        let (program, username, password) = match (program, username, password) {
            (Some(p), Some(u), Some(h)) => (p, u, h),
            _ => {
                commander.send(ascii::encode_reply(
                    key,
                    ReplyFlag::Failed,
                    HUB_SOURCE,
                    &keys_from([("why", "login needs program, username, password")]),
                ));
                return;
            }
        };

        let outcome = self
            .state
            .logins
            .verify(&commander.phase, &program, &password);
        match outcome {
            LoginOutcome::Accepted => {
                let wanted = format!("{}.{}", program, username);
                let new_identity = self
                    .rename_commander(identity, &wanted)
                    .unwrap_or_else(|| identity.to_string());
                if let Some(commander) = self.state.commanders.get_mut(&new_identity) {
                    commander.phase = AuthPhase::Connected;
                    commander.send(ascii::encode_reply(
                        key,
                        ReplyFlag::Done,
                        HUB_SOURCE,
                        &keys_from([("loggedIn", new_identity.as_str())]),
                    ));
                }
                tracing::info!(commander = %new_identity, "login accepted");
                self.deliver(self.state.hub_reply(
                    ReplyFlag::Info,
                    keys_from([("commander", new_identity.as_str())]),
                ));
            }
            refused => {
                let why = refused.reason().unwrap_or("login refused");
                tracing::info!(commander = %identity, why, "login refused");
                commander.send(ascii::encode_reply(
                    key,
                    ReplyFlag::Failed,
                    HUB_SOURCE,
                    &keys_from([("why", why)]),
                ));
            }
        }
    }

    /// Move a commander to a new identity, deduplicated with `_2`, `_3`, ...
    /// suffixes, keeping its pending commands and connection index current.
    /// Returns the identity actually assigned.
    fn rename_commander(&mut self, old: &str, wanted: &str) -> Option<String> {
        let unique = self.state.unique_identity(wanted);
        let mut commander = self.state.commanders.remove(old)?;
        tracing::info!(old = %old, new = %unique, "commander renamed");
        commander.identity = unique.clone();
        commander.taster.add(crate::taster::Dimension::Commanders, &unique);
        self.state
            .conns
            .insert(commander.conn_id, ConnRef::Commander(unique.clone()));
        self.state.commanders.insert(unique.clone(), commander);
        Some(unique)
    }

    /// Register a command the hub itself originates (probes, init commands)
    fn make_hub_command(&mut self, target: &str, text: &str) -> u64 {
        let xid = self.state.xids.next();
        let cmd = Command::new(xid, HUB_IDENTITY, RoutingKey::default(), target, text);
        self.state.commands.insert(xid, cmd);
        xid
    }
}

fn scalar(keys: &KeyValues, name: &str) -> Option<String> {
    keys.get(name)
        .and_then(|v| v.as_scalar())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use tokio::sync::mpsc;

    use crate::auth::login::challenge_response;
    use crate::codec::ascii::{parse_command_line, parse_reply_line, parse_routed_reply};
    use crate::config::{ActorSpec, HubConfig, ProgramSpec};
    use crate::net::{ConnIds, Dialer};

    use super::*;

    fn actor_spec(name: &str) -> ActorSpec {
        ActorSpec {
            name: name.to_string(),
            addr: "localhost:0".to_string(),
            codec: crate::codec::CodecKind::Ascii,
            governed: true,
            safe_pattern: None,
            grab_cid: false,
            init_cmds: Vec::new(),
            timeout_secs: None,
        }
    }

    fn hub_with(mut config: HubConfig) -> Hub {
        config.listen.needs_auth = false;
        let (events_tx, events_rx) = mpsc::channel(64);
        let dialer = Dialer::new(
            Arc::new(ConnIds::new()),
            events_tx.clone(),
            std::env::temp_dir(),
        );
        Hub::new(config, events_tx, events_rx, dialer)
    }

    fn auth_hub_with(config: HubConfig) -> Hub {
        let mut hub = hub_with(config);
        hub.state.config.listen.needs_auth = true;
        hub
    }

    fn connect_actor(hub: &mut Hub, conn_id: u64, name: &str) -> mpsc::UnboundedReceiver<Bytes> {
        let (tx, rx) = mpsc::unbounded_channel();
        hub.handle_event(HubEvent::ActorConnected {
            conn_id,
            name: name.to_string(),
            tx,
        });
        rx
    }

    fn connect_commander(hub: &mut Hub, conn_id: u64) -> mpsc::UnboundedReceiver<Bytes> {
        let (tx, rx) = mpsc::unbounded_channel();
        hub.handle_event(HubEvent::CommanderConnected {
            conn_id,
            peer: "test".to_string(),
            tx,
        });
        rx
    }

    fn send_line(hub: &mut Hub, conn_id: u64, line: &str) {
        let parsed = parse_command_line(line).expect("command line");
        hub.handle_event(HubEvent::CommanderLine {
            conn_id,
            line: parsed,
        });
    }

    fn actor_reply(hub: &mut Hub, conn_id: u64, line: &str) {
        hub.handle_event(HubEvent::ActorReply {
            conn_id,
            line: parse_reply_line(line),
        });
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Bytes>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(chunk) = rx.try_recv() {
            for line in String::from_utf8_lossy(&chunk).lines() {
                lines.push(line.to_string());
            }
        }
        lines
    }

    fn assert_any_contains(lines: &[String], needle: &str) {
        assert!(
            lines.iter().any(|l| l.contains(needle)),
            "no line contains {:?} in {:?}",
            needle,
            lines
        );
    }

    #[tokio::test]
    async fn test_command_routes_to_actor_and_reply_returns() {
        let mut hub = hub_with(HubConfig {
            actors: vec![ActorSpec {
                governed: false,
                ..actor_spec("toy")
            }],
            ..Default::default()
        });
        let mut actor_rx = connect_actor(&mut hub, 10, "toy");
        let mut cmdr_rx = connect_commander(&mut hub, 1);

        send_line(&mut hub, 1, "7 toy ping");
        let sent = drain(&mut actor_rx);
        assert_eq!(sent, vec!["10 1 ping"]);

        actor_reply(&mut hub, 10, "10 1 : pong=1");
        let got = drain(&mut cmdr_rx);
        assert_any_contains(&got, "7 1 : toy pong=1");

        // The command is gone from every registry; only the hub channel stays.
        assert_eq!(hub.state.commands.len(), 1);
        assert!(hub.state.commands.contains_key(&0));
        assert!(hub.state.actors.get("toy").unwrap().pending.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_target_fails_immediately() {
        let mut hub = hub_with(HubConfig::default());
        let mut cmdr_rx = connect_commander(&mut hub, 1);

        send_line(&mut hub, 1, "3 nosuch ping");
        let got = drain(&mut cmdr_rx);
        assert_any_contains(&got, "3 1 f hub");
        assert_any_contains(&got, "target not connected");
        assert_any_contains(&got, "noTarget=nosuch");
    }

    #[tokio::test]
    async fn test_lock_scenario() {
        // A god locks gcam; a non-god is refused naming the locker; another
        // commander of the god program still gets through.
        let mut hub = hub_with(HubConfig {
            gods: vec!["APO".to_string()],
            actors: vec![actor_spec("gcam")],
            ..Default::default()
        });
        let mut actor_rx = connect_actor(&mut hub, 10, "gcam");

        let mut god_rx = connect_commander(&mut hub, 1);
        send_line(&mut hub, 1, "APO.obs1 1 perms lock gcam");
        let got = drain(&mut god_rx);
        assert_any_contains(&got, "lockedActors=gcam");
        assert_any_contains(&got, "1 1 : perms");

        let mut other_rx = connect_commander(&mut hub, 2);
        send_line(&mut hub, 2, "PU04.obs2 1 gcam expose");
        let got = drain(&mut other_rx);
        assert_any_contains(&got, "NoPermission=gcam");
        assert_any_contains(&got, "locked by APO");
        assert!(drain(&mut actor_rx).is_empty());

        let mut god2_rx = connect_commander(&mut hub, 3);
        send_line(&mut hub, 3, "APO.obs2 1 gcam expose");
        drain(&mut god2_rx);
        assert_eq!(drain(&mut actor_rx), vec!["10 1 expose"]);
    }

    #[tokio::test]
    async fn test_missing_entry_denied_and_diagnosed_once() {
        let mut hub = hub_with(HubConfig {
            actors: vec![actor_spec("toy")],
            ..Default::default()
        });
        let _actor_rx = connect_actor(&mut hub, 10, "toy");

        // A listener watching the hub channel sees the duplicate diagnostic.
        let mut watcher_rx = connect_commander(&mut hub, 3);
        send_line(&mut hub, 3, "1 hub addFilter actors hub");
        drain(&mut watcher_rx);

        let mut cmdr_rx = connect_commander(&mut hub, 1);
        send_line(&mut hub, 1, "PU04.obs2 1 toy ping");
        let got = drain(&mut cmdr_rx);
        assert_any_contains(&got, "NoPermission=toy");
        assert_any_contains(&got, "no authorization entry exists for program PU04");

        let diag = drain(&mut watcher_rx);
        assert_any_contains(&diag, "noAuthEntry=PU04");

        // The second denial is not re-diagnosed.
        send_line(&mut hub, 1, "2 toy ping");
        let got = drain(&mut cmdr_rx);
        assert_any_contains(&got, "NoPermission=toy");
        let diag = drain(&mut watcher_rx);
        assert!(
            !diag.iter().any(|l| l.contains("noAuthEntry")),
            "unexpected repeat diagnostic: {:?}",
            diag
        );
    }

    #[tokio::test]
    async fn test_safe_command_passes_without_entry() {
        let mut hub = hub_with(HubConfig {
            actors: vec![ActorSpec {
                safe_pattern: Some("^(ping|status)\\b".to_string()),
                ..actor_spec("tcc")
            }],
            ..Default::default()
        });
        let mut actor_rx = connect_actor(&mut hub, 10, "tcc");
        let mut cmdr_rx = connect_commander(&mut hub, 1);

        send_line(&mut hub, 1, "PU04.obs2 1 tcc ping");
        assert_eq!(drain(&mut actor_rx), vec!["10 1 ping"]);

        send_line(&mut hub, 1, "2 tcc track 10 20");
        let got = drain(&mut cmdr_rx);
        assert_any_contains(&got, "NoPermission=tcc");
    }

    #[tokio::test]
    async fn test_taster_fanout_by_source() {
        let mut hub = hub_with(HubConfig {
            actors: vec![ActorSpec {
                governed: false,
                ..actor_spec("tcc")
            }],
            ..Default::default()
        });
        let _actor_rx = connect_actor(&mut hub, 10, "tcc");

        let mut owner_rx = connect_commander(&mut hub, 1);
        let mut tcc_watcher_rx = connect_commander(&mut hub, 2);
        send_line(&mut hub, 2, "1 hub addFilter actors tcc");
        drain(&mut tcc_watcher_rx);
        let mut bystander_rx = connect_commander(&mut hub, 3);

        send_line(&mut hub, 1, "5 tcc status");
        actor_reply(&mut hub, 10, "10 1 i Az=121.3");
        drain(&mut owner_rx);

        // Source-based matching is independent of who issued the command.
        let got = drain(&mut tcc_watcher_rx);
        assert_any_contains(&got, "0 0 i tcc Az=121.3");

        // Non-matching listeners hear nothing until the terminal reply,
        // and then only the completion.
        assert!(drain(&mut bystander_rx).is_empty());
        actor_reply(&mut hub, 10, "10 1 : moved=0");
        let got = drain(&mut bystander_rx);
        assert_eq!(got, vec!["0 0 : tcc"]);
    }

    #[tokio::test]
    async fn test_private_reply_keys_only_for_owner() {
        let mut hub = hub_with(HubConfig::default());
        let mut owner_rx = connect_commander(&mut hub, 1);
        let mut watcher_rx = connect_commander(&mut hub, 2);
        send_line(&mut hub, 2, "1 hub addFilter actors hub");
        drain(&mut watcher_rx);

        // Filter state replies are private to the issuing commander.
        send_line(&mut hub, 1, "4 hub setFilter keys exptime");
        let got = drain(&mut owner_rx);
        assert_any_contains(&got, "filterKeys=exptime");

        let got = drain(&mut watcher_rx);
        assert!(
            !got.iter().any(|l| l.contains("filterKeys")),
            "private keys leaked: {:?}",
            got
        );
    }

    #[tokio::test]
    async fn test_actor_disconnect_fails_pending_and_drops_cache() {
        let mut hub = hub_with(HubConfig {
            actors: vec![ActorSpec {
                governed: false,
                ..actor_spec("boss")
            }],
            ..Default::default()
        });
        let _actor_rx = connect_actor(&mut hub, 10, "boss");
        let mut cmdr_rx = connect_commander(&mut hub, 1);

        send_line(&mut hub, 1, "2 boss expose");
        actor_reply(&mut hub, 10, "10 1 i status=exposing");
        drain(&mut cmdr_rx);

        let (matched, _) = hub
            .state
            .kv
            .get_keys("boss", &["status".to_string()]);
        assert_eq!(matched.len(), 1);

        hub.handle_event(HubEvent::ActorClosed {
            conn_id: 10,
            error: None,
        });
        let got = drain(&mut cmdr_rx);
        assert_any_contains(&got, "2 1 f boss");
        assert_any_contains(&got, "actor disconnected");

        // Queries after disconnect must see unmatched keys, not stale data.
        send_line(&mut hub, 1, "3 keys getKeys boss status");
        let got = drain(&mut cmdr_rx);
        assert_any_contains(&got, "keys_boss");
        assert_any_contains(&got, "unmatchedKeys=status");
    }

    #[tokio::test]
    async fn test_keys_word_answers_from_cache() {
        let mut hub = hub_with(HubConfig {
            actors: vec![ActorSpec {
                governed: false,
                ..actor_spec("gcam")
            }],
            ..Default::default()
        });
        let _actor_rx = connect_actor(&mut hub, 10, "gcam");
        let mut cmdr_rx = connect_commander(&mut hub, 1);

        send_line(&mut hub, 1, "1 gcam status");
        actor_reply(&mut hub, 10, "10 1 i ExpTime=5; state=idle");
        actor_reply(&mut hub, 10, "10 1 :");
        drain(&mut cmdr_rx);

        send_line(&mut hub, 1, "2 keys getKeys gcam exptime missing");
        let got = drain(&mut cmdr_rx);
        assert_any_contains(&got, "2 1 i keys_gcam ExpTime=5");
        assert_any_contains(&got, "unmatchedKeys=missing");
    }

    #[tokio::test]
    async fn test_grab_cid_probe_and_init_deferral() {
        let mut hub = hub_with(HubConfig {
            actors: vec![ActorSpec {
                grab_cid: true,
                governed: false,
                init_cmds: vec!["status".to_string()],
                ..actor_spec("gcam")
            }],
            ..Default::default()
        });
        let mut actor_rx = connect_actor(&mut hub, 10, "gcam");

        // Only the probe goes out, under the provisional cid 0.
        assert_eq!(drain(&mut actor_rx), vec!["0 1 ping"]);

        // The first reply announces the actor's own cid; init commands
        // follow under it.
        actor_reply(&mut hub, 10, "7 1 : version=2");
        assert_eq!(drain(&mut actor_rx), vec!["7 2 status"]);
        assert_eq!(hub.state.actors.get("gcam").unwrap().cid, Some(7));
    }

    #[tokio::test]
    async fn test_orphan_reply_surfaces_as_diagnostic() {
        let mut hub = hub_with(HubConfig {
            actors: vec![ActorSpec {
                governed: false,
                ..actor_spec("toy")
            }],
            ..Default::default()
        });
        let _actor_rx = connect_actor(&mut hub, 10, "toy");
        let mut watcher_rx = connect_commander(&mut hub, 1);
        send_line(&mut hub, 1, "1 hub addFilter actors hub toy");
        drain(&mut watcher_rx);

        actor_reply(&mut hub, 10, "10 99 i surprise=1");
        let got = drain(&mut watcher_rx);
        assert_any_contains(&got, "orphanReply=");
        assert_any_contains(&got, "surprise=1");

        // Orphan keys still land in the cache.
        let (matched, _) = hub
            .state
            .kv
            .get_keys("toy", &["surprise".to_string()]);
        assert_eq!(matched.len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_synthesizes_failure() {
        let mut hub = hub_with(HubConfig {
            actors: vec![ActorSpec {
                governed: false,
                ..actor_spec("toy")
            }],
            ..Default::default()
        });
        let _actor_rx = connect_actor(&mut hub, 10, "toy");
        let mut cmdr_rx = connect_commander(&mut hub, 1);

        send_line(&mut hub, 1, "4 toy slow");
        drain(&mut cmdr_rx);
        let &xid = hub
            .state
            .actors
            .get("toy")
            .unwrap()
            .pending
            .values()
            .next()
            .unwrap();

        hub.handle_event(HubEvent::CommandTimeout { xid });
        let got = drain(&mut cmdr_rx);
        assert_any_contains(&got, "4 1 f toy");
        assert_any_contains(&got, "Timeout");

        // A late timeout for the finished command is a no-op.
        hub.handle_event(HubEvent::CommandTimeout { xid });
        assert!(drain(&mut cmdr_rx).is_empty());
    }

    #[tokio::test]
    async fn test_cmd_done_diagnostic_on_completion() {
        let mut hub = hub_with(HubConfig {
            actors: vec![ActorSpec {
                governed: false,
                ..actor_spec("toy")
            }],
            ..Default::default()
        });
        let _actor_rx = connect_actor(&mut hub, 10, "toy");
        let mut watcher_rx = connect_commander(&mut hub, 2);
        send_line(&mut hub, 2, "1 hub addFilter actors hub");
        drain(&mut watcher_rx);

        let mut cmdr_rx = connect_commander(&mut hub, 1);
        send_line(&mut hub, 1, "5 toy ping");
        actor_reply(&mut hub, 10, "10 1 :");
        drain(&mut cmdr_rx);

        let got = drain(&mut watcher_rx);
        assert_any_contains(&got, "cmdDone=");
        assert_any_contains(&got, "target=toy");
    }

    #[tokio::test]
    async fn test_duplicate_actor_name_refused() {
        let mut hub = hub_with(HubConfig {
            actors: vec![ActorSpec {
                governed: false,
                ..actor_spec("toy")
            }],
            ..Default::default()
        });
        let _first_rx = connect_actor(&mut hub, 10, "toy");
        let _second_rx = connect_actor(&mut hub, 11, "toy");

        assert_eq!(hub.state.actors.get("toy").unwrap().conn_id, 10);
        assert!(!hub.state.conns.contains_key(&11));
    }

    #[tokio::test]
    async fn test_vocab_error_becomes_fail_reply() {
        let mut hub = hub_with(HubConfig::default());
        let mut cmdr_rx = connect_commander(&mut hub, 1);

        send_line(&mut hub, 1, "2 perms bogus");
        let got = drain(&mut cmdr_rx);
        assert_any_contains(&got, "2 1 f hub");
        assert_any_contains(&got, "unknown perms verb");
    }

    #[tokio::test]
    async fn test_auth_handshake_flow() {
        let mut hub = auth_hub_with(HubConfig {
            programs: vec![ProgramSpec {
                name: "PU04".to_string(),
                password: Some("sekrit".to_string()),
                actors: vec!["toy".to_string()],
            }],
            ..Default::default()
        });
        let mut cmdr_rx = connect_commander(&mut hub, 1);

        // Nothing routes before login.
        send_line(&mut hub, 1, "1 toy ping");
        let got = drain(&mut cmdr_rx);
        assert_any_contains(&got, "login required");

        send_line(&mut hub, 1, "2 knockKnock");
        let lines = drain(&mut cmdr_rx);
        let nonce = lines
            .iter()
            .find_map(|l| {
                parse_routed_reply(l)
                    .and_then(|r| r.keys.get("nonce").and_then(|v| v.as_scalar()).map(str::to_string))
            })
            .expect("nonce line");

        // A wrong password is refused and leaves the connection unrouted.
        let bad = challenge_response(&nonce, "wrong");
        send_line(
            &mut hub,
            1,
            &format!("3 login program=PU04 username=obs2 password={}", bad),
        );
        let got = drain(&mut cmdr_rx);
        assert_any_contains(&got, "incorrect password");

        let good = challenge_response(&nonce, "sekrit");
        send_line(
            &mut hub,
            1,
            &format!("4 login program=PU04 username=obs2 password={}", good),
        );
        let got = drain(&mut cmdr_rx);
        assert_any_contains(&got, "loggedIn=PU04.obs2");

        // Authenticated commands route under the login identity.
        assert!(hub.state.commanders.contains("PU04.obs2"));
        send_line(&mut hub, 1, "5 hub ping");
        let got = drain(&mut cmdr_rx);
        assert_any_contains(&got, "5 1 : hub");
    }

    #[tokio::test]
    async fn test_login_identity_dedup() {
        let mut hub = auth_hub_with(HubConfig {
            programs: vec![ProgramSpec {
                name: "PU04".to_string(),
                password: Some("sekrit".to_string()),
                actors: Vec::new(),
            }],
            ..Default::default()
        });

        for (conn_id, expected) in [(1u64, "PU04.obs2"), (2u64, "PU04.obs2_2")] {
            let mut rx = connect_commander(&mut hub, conn_id);
            send_line(&mut hub, conn_id, "1 knockKnock");
            let nonce = drain(&mut rx)
                .iter()
                .find_map(|l| {
                    parse_routed_reply(l).and_then(|r| {
                        r.keys.get("nonce").and_then(|v| v.as_scalar()).map(str::to_string)
                    })
                })
                .expect("nonce");
            let response = challenge_response(&nonce, "sekrit");
            send_line(
                &mut hub,
                conn_id,
                &format!("2 login program=PU04 username=obs2 password={}", response),
            );
            let got = drain(&mut rx);
            assert_any_contains(&got, &format!("loggedIn={}", expected));
        }
    }

    #[tokio::test]
    async fn test_logout_stops_routing() {
        let mut hub = auth_hub_with(HubConfig {
            programs: vec![ProgramSpec {
                name: "PU04".to_string(),
                password: Some("sekrit".to_string()),
                actors: Vec::new(),
            }],
            ..Default::default()
        });
        let mut rx = connect_commander(&mut hub, 1);

        send_line(&mut hub, 1, "1 knockKnock");
        let nonce = drain(&mut rx)
            .iter()
            .find_map(|l| {
                parse_routed_reply(l).and_then(|r| {
                    r.keys.get("nonce").and_then(|v| v.as_scalar()).map(str::to_string)
                })
            })
            .unwrap();
        let response = challenge_response(&nonce, "sekrit");
        send_line(
            &mut hub,
            1,
            &format!("2 login program=PU04 username=obs2 password={}", response),
        );
        drain(&mut rx);

        send_line(&mut hub, 1, "3 logout");
        let got = drain(&mut rx);
        assert_any_contains(&got, "loggedOut=");

        send_line(&mut hub, 1, "4 hub ping");
        let got = drain(&mut rx);
        assert_any_contains(&got, "login required");
    }

    #[tokio::test]
    async fn test_shutdown_is_god_only() {
        let mut hub = hub_with(HubConfig {
            gods: vec!["APO".to_string()],
            ..Default::default()
        });
        let mut cmdr_rx = connect_commander(&mut hub, 1);

        send_line(&mut hub, 1, "PU04.obs2 1 hub shutdown");
        let got = drain(&mut cmdr_rx);
        assert_any_contains(&got, "may not shut the hub down");
        assert!(!hub.state.shutdown);

        send_line(&mut hub, 1, "2 hub shutdown");
        drain(&mut cmdr_rx);
        assert!(!hub.state.shutdown);

        let mut god_rx = connect_commander(&mut hub, 2);
        send_line(&mut hub, 2, "APO.obs1 1 hub shutdown");
        drain(&mut god_rx);
        assert!(hub.state.shutdown);
    }

    #[tokio::test]
    async fn test_duplicate_mid_refused() {
        let mut hub = hub_with(HubConfig {
            actors: vec![ActorSpec {
                governed: false,
                ..actor_spec("toy")
            }],
            ..Default::default()
        });
        let mut actor_rx = connect_actor(&mut hub, 10, "toy");
        let mut cmdr_rx = connect_commander(&mut hub, 1);

        send_line(&mut hub, 1, "7 toy first");
        drain(&mut actor_rx);
        send_line(&mut hub, 1, "7 toy second");

        let got = drain(&mut cmdr_rx);
        assert_any_contains(&got, "duplicate message id");
        assert!(drain(&mut actor_rx).is_empty());
    }

    #[tokio::test]
    async fn test_commander_disconnect_abandons_commands() {
        let mut hub = hub_with(HubConfig {
            actors: vec![ActorSpec {
                governed: false,
                ..actor_spec("toy")
            }],
            ..Default::default()
        });
        let _actor_rx = connect_actor(&mut hub, 10, "toy");
        let mut cmdr_rx = connect_commander(&mut hub, 1);
        let mut watcher_rx = connect_commander(&mut hub, 2);
        send_line(&mut hub, 2, "1 hub addFilter actors toy");
        drain(&mut watcher_rx);

        send_line(&mut hub, 1, "3 toy slow");
        drain(&mut cmdr_rx);
        hub.handle_event(HubEvent::CommanderClosed {
            conn_id: 1,
            error: None,
        });

        // The late reply still reaches listeners whose tasters match.
        actor_reply(&mut hub, 10, "10 1 : late=1");
        let got = drain(&mut watcher_rx);
        assert_any_contains(&got, "0 0 : toy late=1");
        assert_eq!(hub.state.commands.len(), 1);
    }

    #[tokio::test]
    async fn test_degraded_line_surfaces_as_warning() {
        let mut hub = hub_with(HubConfig {
            actors: vec![ActorSpec {
                governed: false,
                ..actor_spec("toy")
            }],
            ..Default::default()
        });
        let _actor_rx = connect_actor(&mut hub, 10, "toy");
        let mut watcher_rx = connect_commander(&mut hub, 1);
        send_line(&mut hub, 1, "1 hub addFilter actors toy");
        drain(&mut watcher_rx);

        actor_reply(&mut hub, 10, "complete nonsense");
        let got = drain(&mut watcher_rx);
        assert_any_contains(&got, "RawLine=");
    }
}
