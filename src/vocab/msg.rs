//! Operator messaging word
//!
//! `msg <anything>` broadcasts the text to every listener whose taster
//! accepts the `msg` source or the `message` keyword. The hub adds the
//! sender's identity so recipients know who is talking.

use crate::hub::state::HubState;
use crate::msg::{Command, KeyValue, KeyValues, Reply, ReplyFlag};

use super::{PseudoActor, WordError};

/// The `msg` word
pub struct MsgWord;

impl PseudoActor for MsgWord {
    fn name(&self) -> &'static str {
        "msg"
    }

    fn handle(&self, _state: &mut HubState, cmd: &Command) -> Result<Vec<Reply>, WordError> {
        let text = cmd.text.trim();
        if text.is_empty() {
            return Err(WordError::new("usage: msg <text>"));
        }

        let mut keys = KeyValues::new();
        keys.insert("from", KeyValue::Scalar(cmd.commander.clone()));
        keys.insert("message", KeyValue::Scalar(text.to_string()));

        Ok(vec![
            Reply::new(cmd.xid, ReplyFlag::Info, self.name(), keys),
            Reply::new(cmd.xid, ReplyFlag::Done, self.name(), KeyValues::new()),
        ])
    }
}
