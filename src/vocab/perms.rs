//! Permission management word
//!
//! ```text
//! perms status
//! perms lock <actor...>          (gods only)
//! perms unlock <actor...>        (gods only)
//! perms register <program> [actor...]   (gods only; duplicate is a warning no-op)
//! perms drop <program>           (gods only)
//! perms add <program> <actor...>      (gods only)
//! perms remove <program> <actor...>   (gods only)
//! ```
//!
//! Mutations broadcast the updated table state so every listener tracking
//! permission keywords stays current.

use crate::hub::state::HubState;
use crate::msg::{Command, KeyValue, KeyValues, Reply, ReplyFlag};

use super::{name_list, split_verb, PseudoActor, WordError};

/// The `perms` word
pub struct PermsWord;

impl PseudoActor for PermsWord {
    fn name(&self) -> &'static str {
        "perms"
    }

    fn handle(&self, state: &mut HubState, cmd: &Command) -> Result<Vec<Reply>, WordError> {
        let (verb, rest) = split_verb(&cmd.text);
        match verb.to_ascii_lowercase().as_str() {
            "status" => Ok(status_replies(state, cmd)),
            "lock" => {
                require_god(state, cmd)?;
                let actors = require_names(rest, "lock needs actor names")?;
                for actor in &actors {
                    state.gate.lock(actor, cmd.program());
                    tracing::info!(actor = %actor, by = %cmd.commander, "actor locked");
                }
                Ok(with_done(locked_reply(state, cmd)))
            }
            "unlock" => {
                require_god(state, cmd)?;
                let actors = require_names(rest, "unlock needs actor names")?;
                for actor in &actors {
                    state.gate.unlock(actor);
                    tracing::info!(actor = %actor, by = %cmd.commander, "actor unlocked");
                }
                Ok(with_done(locked_reply(state, cmd)))
            }
            "register" => {
                require_god(state, cmd)?;
                let mut names = require_names(rest, "register needs a program name")?;
                let program = names.remove(0);
                if state.gate.register_program(&program, names.into_iter()) {
                    Ok(with_done(program_reply(state, cmd, &program)))
                } else {
                    // Already registered: report, change nothing.
                    let mut keys = KeyValues::new();
                    keys.insert(
                        "alreadyRegistered",
                        KeyValue::Scalar(program.clone()),
                    );
                    Ok(vec![
                        Reply::new(cmd.xid, ReplyFlag::Warn, self.name(), keys),
                        done(cmd),
                    ])
                }
            }
            "drop" => {
                require_god(state, cmd)?;
                let names = require_names(rest, "drop needs a program name")?;
                let program = &names[0];
                if !state.gate.drop_program(program) {
                    return Err(WordError::new(format!("unknown program {}", program)));
                }
                let mut keys = KeyValues::new();
                keys.insert("droppedProgram", KeyValue::Scalar(program.clone()));
                Ok(vec![
                    Reply::new(cmd.xid, ReplyFlag::Info, self.name(), keys),
                    done(cmd),
                ])
            }
            "add" => {
                require_god(state, cmd)?;
                let mut names = require_names(rest, "add needs a program and actors")?;
                let program = names.remove(0);
                for actor in &names {
                    if !state.gate.add_actor_to(&program, actor) {
                        return Err(WordError::new(format!("unknown program {}", program)));
                    }
                }
                Ok(with_done(program_reply(state, cmd, &program)))
            }
            "remove" => {
                require_god(state, cmd)?;
                let mut names = require_names(rest, "remove needs a program and actors")?;
                let program = names.remove(0);
                for actor in &names {
                    if !state.gate.remove_actor_from(&program, actor) {
                        return Err(WordError::new(format!("unknown program {}", program)));
                    }
                }
                Ok(with_done(program_reply(state, cmd, &program)))
            }
            "" => Err(WordError::new("usage: perms status|lock|unlock|register|drop|add|remove")),
            other => Err(WordError::new(format!("unknown perms verb {}", other))),
        }
    }
}

fn require_god(state: &HubState, cmd: &Command) -> Result<(), WordError> {
    if state.gate.is_god(cmd.program()) {
        Ok(())
    } else {
        Err(WordError::new(format!(
            "program {} may not administer permissions",
            cmd.program()
        )))
    }
}

fn require_names(rest: &str, usage: &str) -> Result<Vec<String>, WordError> {
    let names = name_list(rest);
    if names.is_empty() {
        Err(WordError::new(usage))
    } else {
        Ok(names)
    }
}

fn done(cmd: &Command) -> Reply {
    Reply::new(cmd.xid, ReplyFlag::Done, "perms", KeyValues::new())
}

fn with_done(reply: Reply) -> Vec<Reply> {
    let terminal = Reply::new(reply.xid, ReplyFlag::Done, "perms", KeyValues::new());
    vec![reply, terminal]
}

fn locked_reply(state: &HubState, cmd: &Command) -> Reply {
    let mut keys = KeyValues::new();
    keys.insert(
        "lockedActors",
        KeyValue::from_values(state.gate.locked_actors()),
    );
    Reply::new(cmd.xid, ReplyFlag::Info, "perms", keys)
}

fn program_reply(state: &HubState, cmd: &Command, program: &str) -> Reply {
    let mut keys = KeyValues::new();
    for (name, actors) in state.gate.program_table() {
        if name.eq_ignore_ascii_case(program) {
            keys.insert("program", KeyValue::Scalar(name));
            keys.insert("authorized", KeyValue::from_values(actors));
        }
    }
    Reply::new(cmd.xid, ReplyFlag::Info, "perms", keys)
}

fn status_replies(state: &HubState, cmd: &Command) -> Vec<Reply> {
    let mut replies = vec![locked_reply(state, cmd)];
    for (program, actors) in state.gate.program_table() {
        let mut keys = KeyValues::new();
        keys.insert("program", KeyValue::Scalar(program));
        keys.insert("authorized", KeyValue::from_values(actors));
        replies.push(Reply::new(cmd.xid, ReplyFlag::Info, "perms", keys));
    }
    replies.push(done(cmd));
    replies
}
