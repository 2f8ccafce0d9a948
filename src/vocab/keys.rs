//! Keyword cache lookup word
//!
//! ```text
//! keys getKeys <actor> <keyword...>
//! keys sources
//! ```
//!
//! Answers come from the hub's cache, not the instrument, so a lookup never
//! disturbs a running actor. Replies are relabeled with source
//! `keys_<actor>` so listeners can tell a cached answer from a live report;
//! the router maps the pseudo-source back to the actor for cache purposes.

use crate::hub::state::HubState;
use crate::msg::{Command, KeyValue, KeyValues, Reply, ReplyFlag};

use super::{name_list, split_verb, PseudoActor, WordError};

/// Prefix of the relabeled reply source
pub const SOURCE_PREFIX: &str = "keys_";

/// The `keys` word
pub struct KeysWord;

impl PseudoActor for KeysWord {
    fn name(&self) -> &'static str {
        "keys"
    }

    fn handle(&self, state: &mut HubState, cmd: &Command) -> Result<Vec<Reply>, WordError> {
        let (verb, rest) = split_verb(&cmd.text);
        match verb.to_ascii_lowercase().as_str() {
            "getkeys" => {
                let mut names = name_list(rest);
                if names.len() < 2 {
                    return Err(WordError::new("usage: keys getKeys <actor> <keyword...>"));
                }
                let actor = names.remove(0);
                Ok(get_keys_replies(state, cmd, &actor, &names))
            }
            "sources" => {
                let mut keys = KeyValues::new();
                keys.insert("sources", KeyValue::from_values(state.kv.sources()));
                Ok(vec![
                    Reply::new(cmd.xid, ReplyFlag::Info, self.name(), keys),
                    Reply::new(cmd.xid, ReplyFlag::Done, self.name(), KeyValues::new()),
                ])
            }
            "" => Err(WordError::new("usage: keys getKeys|sources")),
            other => Err(WordError::new(format!("unknown keys verb {}", other))),
        }
    }
}

fn get_keys_replies(
    state: &HubState,
    cmd: &Command,
    actor: &str,
    names: &[String],
) -> Vec<Reply> {
    let source = format!("{}{}", SOURCE_PREFIX, actor);
    let (matched, unmatched) = state.kv.get_keys(actor, names);
    let mut replies = Vec::new();

    if !matched.is_empty() {
        let mut keys = KeyValues::new();
        for (name, entry) in matched {
            keys.insert(name, entry.value);
        }
        replies.push(Reply::new(cmd.xid, ReplyFlag::Info, source.clone(), keys));
    }

    if unmatched.is_empty() {
        replies.push(Reply::new(
            cmd.xid,
            ReplyFlag::Done,
            source,
            KeyValues::new(),
        ));
    } else {
        let mut keys = KeyValues::new();
        keys.insert("unmatchedKeys", KeyValue::from_values(unmatched));
        replies.push(Reply::new(cmd.xid, ReplyFlag::Warn, source.clone(), keys));
        replies.push(Reply::new(
            cmd.xid,
            ReplyFlag::Done,
            source,
            KeyValues::new(),
        ));
    }
    replies
}

/// Map a `keys_<actor>` pseudo-source back to the actor it answers for.
/// Returns `None` for ordinary sources.
pub fn cache_source(source: &str) -> Option<&str> {
    if source.len() > SOURCE_PREFIX.len()
        && source[..SOURCE_PREFIX.len()].eq_ignore_ascii_case(SOURCE_PREFIX)
    {
        Some(&source[SOURCE_PREFIX.len()..])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_source_mapping() {
        assert_eq!(cache_source("keys_gcam"), Some("gcam"));
        assert_eq!(cache_source("KEYS_gcam"), Some("gcam"));
        assert_eq!(cache_source("keys_"), None);
        assert_eq!(cache_source("gcam"), None);
        assert_eq!(cache_source("keysgcam"), None);
    }
}
