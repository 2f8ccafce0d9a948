//! Hub administration word
//!
//! ```text
//! hub status | actors | commanders | version | ping
//! hub setFilter <dimension> [name...]
//! hub addFilter <dimension> <name...>
//! hub dropFilter <dimension> <name...>
//! hub connect <actor>
//! hub shutdown            (gods only)
//! ```
//!
//! Filter verbs mutate the issuing commander's own taster while the
//! connection stays up. `shutdown` is the one code path that ends the
//! process, and it does so by asking the run loop to stop, not by exiting.

use crate::hub::event::HubEvent;
use crate::hub::state::HubState;
use crate::msg::{Command, KeyValue, KeyValues, Reply, ReplyFlag};
use crate::taster::Dimension;

use super::{name_list, split_verb, PseudoActor, WordError};

/// The `hub` word
pub struct HubWord;

impl PseudoActor for HubWord {
    fn name(&self) -> &'static str {
        "hub"
    }

    fn handle(&self, state: &mut HubState, cmd: &Command) -> Result<Vec<Reply>, WordError> {
        let (verb, rest) = split_verb(&cmd.text);
        match verb.to_ascii_lowercase().as_str() {
            "status" => {
                let mut keys = KeyValues::new();
                keys.insert("actors", KeyValue::from_values(actor_names(state)));
                keys.insert(
                    "commanders",
                    KeyValue::from_values(commander_names(state)),
                );
                keys.insert(
                    "version",
                    KeyValue::Scalar(env!("CARGO_PKG_VERSION").to_string()),
                );
                Ok(info_then_done(cmd, keys))
            }
            "actors" => {
                let mut keys = KeyValues::new();
                keys.insert("actors", KeyValue::from_values(actor_names(state)));
                Ok(info_then_done(cmd, keys))
            }
            "commanders" => {
                let mut keys = KeyValues::new();
                keys.insert(
                    "commanders",
                    KeyValue::from_values(commander_names(state)),
                );
                Ok(info_then_done(cmd, keys))
            }
            "version" => {
                let mut keys = KeyValues::new();
                keys.insert(
                    "version",
                    KeyValue::Scalar(env!("CARGO_PKG_VERSION").to_string()),
                );
                Ok(info_then_done(cmd, keys))
            }
            "ping" => Ok(vec![done(cmd)]),
            "setfilter" => self.mutate_filter(state, cmd, rest, FilterOp::Set),
            "addfilter" => self.mutate_filter(state, cmd, rest, FilterOp::Add),
            "dropfilter" => self.mutate_filter(state, cmd, rest, FilterOp::Drop),
            "connect" => {
                let names = name_list(rest);
                if names.len() != 1 {
                    return Err(WordError::new("usage: hub connect <actor>"));
                }
                let name = &names[0];
                if state.config.actor(name).is_none() {
                    return Err(WordError::new(format!("no configured actor {}", name)));
                }
                if state.actors.contains(name) {
                    return Err(WordError::new(format!("actor {} already connected", name)));
                }
                let _ = state.events_tx.try_send(HubEvent::DialActor {
                    name: name.clone(),
                });
                Ok(vec![done(cmd)])
            }
            "shutdown" => {
                if !state.gate.is_god(cmd.program()) {
                    return Err(WordError::new(format!(
                        "program {} may not shut the hub down",
                        cmd.program()
                    )));
                }
                tracing::warn!(by = %cmd.commander, "shutdown requested");
                state.shutdown = true;
                Ok(vec![done(cmd)])
            }
            "" => Err(WordError::new(
                "usage: hub status|actors|commanders|version|ping|setFilter|addFilter|dropFilter|connect|shutdown",
            )),
            other => Err(WordError::new(format!("unknown hub verb {}", other))),
        }
    }
}

enum FilterOp {
    Set,
    Add,
    Drop,
}

impl HubWord {
    fn mutate_filter(
        &self,
        state: &mut HubState,
        cmd: &Command,
        rest: &str,
        op: FilterOp,
    ) -> Result<Vec<Reply>, WordError> {
        let mut names = name_list(rest);
        if names.is_empty() {
            return Err(WordError::new("filter verbs need a dimension"));
        }
        let dimension = Dimension::from_name(&names.remove(0))
            .ok_or_else(|| WordError::new("dimension must be actors, commanders, or keys"))?;

        let commander = state
            .commanders
            .get_mut(&cmd.commander)
            .ok_or_else(|| WordError::new("issuing commander is gone"))?;

        match op {
            FilterOp::Set => commander.taster.set(dimension, names.into_iter()),
            FilterOp::Add => {
                for name in &names {
                    commander.taster.add(dimension, name);
                }
            }
            FilterOp::Drop => {
                for name in &names {
                    commander.taster.remove(dimension, name);
                }
            }
        }

        let mut keys = KeyValues::new();
        keys.insert(
            "filterActors",
            KeyValue::from_values(commander.taster.dimension(Dimension::Actors)),
        );
        keys.insert(
            "filterCommanders",
            KeyValue::from_values(commander.taster.dimension(Dimension::Commanders)),
        );
        keys.insert(
            "filterKeys",
            KeyValue::from_values(commander.taster.dimension(Dimension::Keywords)),
        );
        let mut replies = info_then_done(cmd, keys);
        // Filter state is connection-local; no reason to broadcast it.
        replies[0].broadcast = false;
        Ok(replies)
    }
}

fn actor_names(state: &HubState) -> Vec<String> {
    state.actors.names().map(str::to_string).collect()
}

fn commander_names(state: &HubState) -> Vec<String> {
    state
        .commanders
        .iter()
        .filter(|(_, c)| c.is_routable())
        .map(|(name, _)| name.to_string())
        .collect()
}

fn done(cmd: &Command) -> Reply {
    Reply::new(cmd.xid, ReplyFlag::Done, "hub", KeyValues::new())
}

fn info_then_done(cmd: &Command, keys: KeyValues) -> Vec<Reply> {
    vec![
        Reply::new(cmd.xid, ReplyFlag::Info, "hub", keys),
        done(cmd),
    ]
}
