//! Hub configuration
//!
//! Loaded once at startup from a TOML file. The config supplies everything
//! the hub cannot learn from its peers: where to listen, which actors to dial
//! and how to talk to them, the program permission and password tables, and
//! the god/bypass program lists.
//!
//! ```toml
//! [listen]
//! commanders = "0.0.0.0:6093"
//! needs_auth = true
//!
//! [[actor]]
//! name = "tcc"
//! addr = "tcc25m:2500"
//! safe_pattern = "^(ping|status)\\b"
//!
//! [[program]]
//! name = "PU04"
//! password = "sekrit"
//! actors = ["toy", "gcam"]
//!
//! gods = ["APO"]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::codec::CodecKind;
use crate::error::ConfigError;

/// Default commander listen address
pub const DEFAULT_LISTEN: &str = "127.0.0.1:6093";

/// Complete hub configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct HubConfig {
    /// Listener settings
    #[serde(default)]
    pub listen: ListenConfig,

    /// Actors the hub dials at startup
    #[serde(default, rename = "actor")]
    pub actors: Vec<ActorSpec>,

    /// Program permission/password entries
    #[serde(default, rename = "program")]
    pub programs: Vec<ProgramSpec>,

    /// Programs with unconditional access to every actor
    #[serde(default)]
    pub gods: Vec<String>,

    /// Bootstrap programs that bypass the permission table
    #[serde(default = "default_bypass")]
    pub bypass: Vec<String>,

    /// Directory for image scratch files (system temp dir when unset)
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

/// Listener settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenConfig {
    /// Commander listen address
    #[serde(default = "default_listen_addr")]
    pub commanders: String,

    /// Whether commanders must complete the login handshake
    #[serde(default = "default_true")]
    pub needs_auth: bool,

    /// Program identity assigned to unauthenticated commanders
    #[serde(default = "default_local_program")]
    pub program: String,
}

/// One actor the hub connects to
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActorSpec {
    /// Actor name; also its keyword namespace
    pub name: String,

    /// host:port to dial
    pub addr: String,

    /// Reply codec the actor speaks
    #[serde(default)]
    pub codec: CodecKind,

    /// Whether the permission table governs this actor at all
    #[serde(default = "default_true")]
    pub governed: bool,

    /// Commands anyone may send regardless of the table (regex)
    #[serde(default)]
    pub safe_pattern: Option<String>,

    /// Actor announces its own connection id in its first reply
    #[serde(default)]
    pub grab_cid: bool,

    /// Commands sent once the connection is up
    #[serde(default)]
    pub init_cmds: Vec<String>,

    /// Per-command reply deadline in seconds (no deadline when unset)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// One program entry in the permission and password tables
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProgramSpec {
    /// Program name (the part of "program.user" before the dot)
    pub name: String,

    /// Login password; programs without one cannot authenticate
    #[serde(default)]
    pub password: Option<String>,

    /// Actors the program is initially authorized for
    #[serde(default)]
    pub actors: Vec<String>,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            commanders: default_listen_addr(),
            needs_auth: true,
            program: default_local_program(),
        }
    }
}

impl HubConfig {
    /// Load a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        let config: HubConfig = toml::from_str(&text).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the parts that must be well-formed before the hub starts
    pub fn validate(&self) -> Result<(), ConfigError> {
        for actor in &self.actors {
            if let Some(pattern) = &actor.safe_pattern {
                Regex::new(pattern)
                    .map_err(|e| ConfigError::BadPattern(pattern.clone(), e))?;
            }
        }
        Ok(())
    }

    /// The scratch directory for image payloads
    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Look up an actor spec by name
    pub fn actor(&self, name: &str) -> Option<&ActorSpec> {
        self.actors
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }
}

impl ActorSpec {
    /// Compiled safe-command pattern, if configured.
    ///
    /// `validate()` has already rejected bad patterns by the time this runs.
    pub fn safe_regex(&self) -> Option<Regex> {
        self.safe_pattern
            .as_deref()
            .and_then(|p| Regex::new(p).ok())
    }

    /// Reply deadline as a duration
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN.to_string()
}

fn default_local_program() -> String {
    "local".to_string()
}

fn default_bypass() -> Vec<String> {
    vec!["hub".to_string()]
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HubConfig::default();
        assert!(config.actors.is_empty());
        assert_eq!(config.listen.commanders, DEFAULT_LISTEN);
        assert!(config.listen.needs_auth);
    }

    #[test]
    fn test_parse_full_config() {
        let text = r#"
            gods = ["APO"]
            bypass = ["hub"]

            [listen]
            commanders = "0.0.0.0:6093"
            needs_auth = false
            program = "internal"

            [[actor]]
            name = "tcc"
            addr = "localhost:2500"
            safe_pattern = "^(ping|status)\\b"
            init_cmds = ["status"]
            timeout_secs = 30

            [[actor]]
            name = "gcam"
            addr = "localhost:2600"
            codec = "binary"
            grab_cid = true

            [[program]]
            name = "PU04"
            password = "sekrit"
            actors = ["toy"]
        "#;
        let config: HubConfig = toml::from_str(text).unwrap();
        config.validate().unwrap();

        assert_eq!(config.gods, vec!["APO"]);
        assert!(!config.listen.needs_auth);
        assert_eq!(config.actors.len(), 2);

        let tcc = config.actor("TCC").unwrap();
        assert!(tcc.governed);
        assert_eq!(tcc.timeout(), Some(Duration::from_secs(30)));
        assert!(tcc.safe_regex().unwrap().is_match("ping"));

        let gcam = config.actor("gcam").unwrap();
        assert_eq!(gcam.codec, CodecKind::Binary);
        assert!(gcam.grab_cid);

        assert_eq!(config.programs[0].name, "PU04");
        assert_eq!(config.programs[0].actors, vec!["toy"]);
    }

    #[test]
    fn test_bad_safe_pattern_rejected() {
        let text = r#"
            [[actor]]
            name = "tcc"
            addr = "localhost:2500"
            safe_pattern = "("
        "#;
        let config: HubConfig = toml::from_str(text).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BadPattern(_, _))
        ));
    }

    #[test]
    fn test_bypass_defaults_to_hub() {
        let config: HubConfig = toml::from_str("").unwrap();
        assert_eq!(config.bypass, vec!["hub"]);
    }
}
