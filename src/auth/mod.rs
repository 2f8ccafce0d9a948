//! Authorization gate
//!
//! Answers "may commander X command actor Y with command Z?". The decision
//! chain, in precedence order:
//!
//! 1. locked actors admit god programs only;
//! 2. actors outside the governed set pass through unchecked;
//! 3. an actor's safe-command pattern admits anyone;
//! 4. the bootstrap bypass programs admit everything;
//! 5. otherwise the program table decides; a god program is implicitly a
//!    member of every actor's set, including actors registered later.
//!
//! A program with no table entry is denied by default, and the first such
//! denial per program is flagged so the router can warn loudly: a missing
//! entry usually means a configuration gap, not an intruder.

pub mod login;

use std::collections::{HashMap, HashSet};

use regex::Regex;

pub use login::{AuthPhase, LoginOutcome, LoginTable};

/// Outcome of an access check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    /// The command may be forwarded
    Granted,
    /// The command must be refused
    Denied(DenyReason),
}

/// Why an access check refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// The actor is locked; `by` names the program that locked it
    Locked { by: String },
    /// The program has no authorization entry at all; `first` marks the
    /// first refusal for this program since it was last seen
    NoEntry { first: bool },
    /// The program has an entry but the actor is not in its set
    NotAuthorized,
}

/// Program-to-actor permission table
#[derive(Debug, Default)]
pub struct PermGate {
    /// program (lowercase) -> authorized actor names (lowercase)
    programs: HashMap<String, HashSet<String>>,
    /// Display case of each known program
    program_names: HashMap<String, String>,
    /// Actors subject to governance at all
    governed: HashSet<String>,
    /// Locked actors mapped to the program that locked them
    locked: HashMap<String, String>,
    /// Programs with unconditional access to every actor
    gods: HashSet<String>,
    /// Bootstrap programs that bypass the table entirely
    bypass: HashSet<String>,
    /// Per-actor safe-command patterns anybody may run
    safe_patterns: HashMap<String, Regex>,
    /// Programs already warned about a missing table entry
    warned: HashSet<String>,
}

impl PermGate {
    /// Create an empty gate
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a program a god. Gods are implicitly authorized for every
    /// actor, including actors that do not exist yet.
    pub fn add_god(&mut self, program: &str) {
        self.gods.insert(fold(program));
    }

    /// Declare a bootstrap bypass program
    pub fn add_bypass(&mut self, program: &str) {
        self.bypass.insert(fold(program));
    }

    /// Bring an actor under governance, optionally with a safe-command pattern
    pub fn govern_actor(&mut self, actor: &str, safe_pattern: Option<Regex>) {
        self.governed.insert(fold(actor));
        if let Some(pattern) = safe_pattern {
            self.safe_patterns.insert(fold(actor), pattern);
        }
    }

    /// True if the actor is subject to governance
    pub fn is_governed(&self, actor: &str) -> bool {
        self.governed.contains(&fold(actor))
    }

    /// Register a program with an initial actor set.
    ///
    /// Returns false (a no-op) when the program already exists; the caller
    /// reports that as a warning, not an error.
    pub fn register_program(
        &mut self,
        program: &str,
        actors: impl IntoIterator<Item = String>,
    ) -> bool {
        let folded = fold(program);
        if self.programs.contains_key(&folded) {
            return false;
        }
        self.program_names.insert(folded.clone(), program.to_string());
        self.programs
            .insert(folded.clone(), actors.into_iter().map(|a| fold(&a)).collect());
        self.warned.remove(&folded);
        true
    }

    /// Remove a program's entry entirely
    pub fn drop_program(&mut self, program: &str) -> bool {
        let folded = fold(program);
        self.program_names.remove(&folded);
        self.programs.remove(&folded).is_some()
    }

    /// True if the program has a table entry
    pub fn has_program(&self, program: &str) -> bool {
        self.programs.contains_key(&fold(program))
    }

    /// Grant a program access to an actor; false when the program is unknown
    pub fn add_actor_to(&mut self, program: &str, actor: &str) -> bool {
        match self.programs.get_mut(&fold(program)) {
            Some(set) => {
                set.insert(fold(actor));
                true
            }
            None => false,
        }
    }

    /// Revoke a program's access to an actor; false when the program is unknown
    pub fn remove_actor_from(&mut self, program: &str, actor: &str) -> bool {
        match self.programs.get_mut(&fold(program)) {
            Some(set) => {
                set.remove(&fold(actor));
                true
            }
            None => false,
        }
    }

    /// Lock an actor: god programs only until unlocked. `by` records the
    /// locking program for the denial warning.
    pub fn lock(&mut self, actor: &str, by: &str) {
        self.locked.insert(fold(actor), by.to_string());
    }

    /// Unlock an actor
    pub fn unlock(&mut self, actor: &str) {
        self.locked.remove(&fold(actor));
    }

    /// True if the actor is locked
    pub fn is_locked(&self, actor: &str) -> bool {
        self.locked.contains_key(&fold(actor))
    }

    /// True if the program is a god
    pub fn is_god(&self, program: &str) -> bool {
        self.gods.contains(&fold(program))
    }

    /// The access decision; see the module docs for the precedence chain
    pub fn check_access(&mut self, program: &str, actor: &str, text: &str) -> Access {
        let program_key = fold(program);
        let actor_key = fold(actor);

        if let Some(by) = self.locked.get(&actor_key) {
            if self.gods.contains(&program_key) {
                return Access::Granted;
            }
            return Access::Denied(DenyReason::Locked { by: by.clone() });
        }

        if !self.governed.contains(&actor_key) {
            return Access::Granted;
        }

        if let Some(pattern) = self.safe_patterns.get(&actor_key) {
            if pattern.is_match(text.trim()) {
                return Access::Granted;
            }
        }

        if self.bypass.contains(&program_key) || self.gods.contains(&program_key) {
            return Access::Granted;
        }

        match self.programs.get(&program_key) {
            None => {
                let first = self.warned.insert(program_key);
                Access::Denied(DenyReason::NoEntry { first })
            }
            Some(actors) => {
                if actors.contains(&actor_key) {
                    Access::Granted
                } else {
                    Access::Denied(DenyReason::NotAuthorized)
                }
            }
        }
    }

    /// Snapshot of locked actors, sorted
    pub fn locked_actors(&self) -> Vec<String> {
        let mut names: Vec<String> = self.locked.keys().cloned().collect();
        names.sort();
        names
    }

    /// Snapshot of the program table as `(program, sorted actors)`, sorted
    /// by program
    pub fn program_table(&self) -> Vec<(String, Vec<String>)> {
        let mut table: Vec<(String, Vec<String>)> = self
            .programs
            .iter()
            .map(|(folded, actors)| {
                let display = self
                    .program_names
                    .get(folded)
                    .cloned()
                    .unwrap_or_else(|| folded.clone());
                let mut actors: Vec<String> = actors.iter().cloned().collect();
                actors.sort();
                (display, actors)
            })
            .collect();
        table.sort();
        table
    }
}

fn fold(name: &str) -> String {
    name.to_ascii_lowercase()
}
