//! Vocabulary words: in-process pseudo-actors
//!
//! A vocabulary word is addressed exactly like a remote actor but handled
//! inside the hub: permission management (`perms`), keyword cache lookup
//! (`keys`), operator messaging (`msg`), and hub administration (`hub`).
//! Words are resolved from a registry built once at startup; swapping an
//! entry swaps the behavior.
//!
//! A handler returns the replies to fan out; returning an error converts to
//! a failing terminal reply carrying the error text, so a handler bug can
//! never take the hub down.

pub mod hubctl;
pub mod keys;
pub mod msg;
pub mod perms;

use std::collections::HashMap;

use crate::hub::state::HubState;
use crate::msg::{Command, Reply};

/// Error from a vocabulary word handler; becomes a failing reply
#[derive(Debug, Clone)]
pub struct WordError(pub String);

impl WordError {
    /// Build from anything displayable
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl std::fmt::Display for WordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for WordError {}

/// One in-process command handler
pub trait PseudoActor: Send {
    /// Name the word is addressed by
    fn name(&self) -> &'static str;

    /// Handle one command, returning the replies to fan out. The final
    /// reply is expected to carry a terminal flag.
    fn handle(&self, state: &mut HubState, cmd: &Command) -> Result<Vec<Reply>, WordError>;
}

/// Registry of vocabulary words, resolved at startup
pub struct Vocabulary {
    words: HashMap<String, Box<dyn PseudoActor>>,
}

impl Vocabulary {
    /// Build an empty registry
    pub fn new() -> Self {
        Self {
            words: HashMap::new(),
        }
    }

    /// Build the standard word set
    pub fn standard() -> Self {
        let mut vocab = Self::new();
        vocab.register(Box::new(perms::PermsWord));
        vocab.register(Box::new(keys::KeysWord));
        vocab.register(Box::new(msg::MsgWord));
        vocab.register(Box::new(hubctl::HubWord));
        vocab
    }

    /// Install (or replace) one word
    pub fn register(&mut self, word: Box<dyn PseudoActor>) {
        self.words.insert(word.name().to_ascii_lowercase(), word);
    }

    /// Resolve a word by name
    pub fn get(&self, name: &str) -> Option<&dyn PseudoActor> {
        self.words
            .get(&name.to_ascii_lowercase())
            .map(|w| w.as_ref())
    }

    /// True if a word with this name exists
    pub fn contains(&self, name: &str) -> bool {
        self.words.contains_key(&name.to_ascii_lowercase())
    }

    /// Registered word names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.words.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::standard()
    }
}

/// Split command text into its verb and the remainder
pub fn split_verb(text: &str) -> (&str, &str) {
    let text = text.trim();
    match text.find(char::is_whitespace) {
        Some(idx) => (&text[..idx], text[idx..].trim_start()),
        None => (text, ""),
    }
}

/// Split remaining text into whitespace-separated names
pub fn name_list(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_string).collect()
}
