//! Commander login handshake
//!
//! Commander connections that require authentication walk a three-state
//! machine:
//!
//! ```text
//! NotConnected --knockKnock--> Connecting { nonce } --login--> Connected
//!       ^                                                          |
//!       '------------------------- logout -------------------------'
//! ```
//!
//! `knockKnock` hands the client a freshly generated nonce. The client
//! answers with `login program=P username=U password=H` where `H` is the
//! lowercase hex SHA-256 of the nonce concatenated with the stored password.
//! The password itself never crosses the wire.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

/// Authentication state of one commander connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthPhase {
    /// No handshake started, or logged out
    NotConnected,
    /// knockKnock answered; waiting for login
    Connecting { nonce: String },
    /// Login accepted
    Connected,
}

impl AuthPhase {
    /// True once login has been accepted
    pub fn is_connected(&self) -> bool {
        matches!(self, AuthPhase::Connected)
    }
}

/// Outcome of a login attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Credentials verified
    Accepted,
    /// No handshake in progress (login before knockKnock)
    NoChallenge,
    /// Program is not in the password table
    UnknownProgram,
    /// Challenge response did not verify
    IncorrectPassword,
}

impl LoginOutcome {
    /// Human-readable refusal reason, `None` when accepted
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            LoginOutcome::Accepted => None,
            LoginOutcome::NoChallenge => Some("no challenge outstanding"),
            LoginOutcome::UnknownProgram => Some("unknown program"),
            LoginOutcome::IncorrectPassword => Some("incorrect password"),
        }
    }
}

/// Program-keyed password table
#[derive(Debug, Default)]
pub struct LoginTable {
    passwords: HashMap<String, String>,
}

impl LoginTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a program's password
    pub fn add_program(&mut self, program: &str, password: &str) {
        self.passwords
            .insert(program.to_ascii_lowercase(), password.to_string());
    }

    /// Generate a fresh nonce for a knockKnock
    pub fn make_nonce(&self) -> String {
        format!("{:016x}{:016x}", rand::random::<u64>(), rand::random::<u64>())
    }

    /// Verify a login attempt against an outstanding nonce
    pub fn verify(&self, phase: &AuthPhase, program: &str, response: &str) -> LoginOutcome {
        let nonce = match phase {
            AuthPhase::Connecting { nonce } => nonce,
            _ => return LoginOutcome::NoChallenge,
        };
        let password = match self.passwords.get(&program.to_ascii_lowercase()) {
            Some(p) => p,
            None => return LoginOutcome::UnknownProgram,
        };
        if challenge_response(nonce, password) == response.to_ascii_lowercase() {
            LoginOutcome::Accepted
        } else {
            LoginOutcome::IncorrectPassword
        }
    }
}

/// Compute the expected challenge response for a nonce and password
pub fn challenge_response(nonce: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(nonce.as_bytes());
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> LoginTable {
        let mut table = LoginTable::new();
        table.add_program("PU04", "sekrit");
        table
    }

    #[test]
    fn test_successful_login() {
        let table = table();
        let nonce = table.make_nonce();
        let phase = AuthPhase::Connecting {
            nonce: nonce.clone(),
        };

        let response = challenge_response(&nonce, "sekrit");
        assert_eq!(table.verify(&phase, "pu04", &response), LoginOutcome::Accepted);
    }

    #[test]
    fn test_wrong_password() {
        let table = table();
        let nonce = table.make_nonce();
        let phase = AuthPhase::Connecting {
            nonce: nonce.clone(),
        };

        let response = challenge_response(&nonce, "guess");
        assert_eq!(
            table.verify(&phase, "PU04", &response),
            LoginOutcome::IncorrectPassword
        );
    }

    #[test]
    fn test_unknown_program() {
        let table = table();
        let phase = AuthPhase::Connecting {
            nonce: "abc".into(),
        };
        assert_eq!(
            table.verify(&phase, "GHOST", "whatever"),
            LoginOutcome::UnknownProgram
        );
    }

    #[test]
    fn test_login_without_challenge() {
        let table = table();
        assert_eq!(
            table.verify(&AuthPhase::NotConnected, "PU04", "x"),
            LoginOutcome::NoChallenge
        );
    }

    #[test]
    fn test_nonce_is_fresh() {
        let table = table();
        assert_ne!(table.make_nonce(), table.make_nonce());
    }

    #[test]
    fn test_stale_nonce_fails() {
        let table = table();
        let phase = AuthPhase::Connecting {
            nonce: table.make_nonce(),
        };
        let response = challenge_response(&table.make_nonce(), "sekrit");
        assert_eq!(
            table.verify(&phase, "PU04", &response),
            LoginOutcome::IncorrectPassword
        );
    }
}
