//! Shared-secret gate in front of the command set.
//!
//! A fresh connection is unauthenticated. Its first accepted line must have
//! the form `<secret>|<rest>`; `<rest>` may be empty or carry the first
//! command. The secret travels and is compared in plain text, which is what
//! deployed clients speak.

use std::fmt;

use crate::command::Command;

/// Separator between the secret and the piggybacked command.
pub const AUTH_SEPARATOR: char = '|';

/// Outcome of feeding one line through the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Not authenticated and the line carried no valid secret
    Rejected,
    /// The line authenticated the session, optionally carrying a command
    Granted(Option<Command>),
    /// The session was already authenticated
    Command(Command),
}

/// Per-connection authentication state machine.
#[derive(Clone)]
pub struct AuthGate {
    secret: String,
    authenticated: bool,
}

impl AuthGate {
    /// Creates an unauthenticated gate for the given shared secret.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            authenticated: false,
        }
    }

    /// Returns true once a valid secret has been presented.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Processes one inbound line.
    pub fn admit(&mut self, line: &str) -> Admission {
        let line = line.trim();

        if self.authenticated {
            return Admission::Command(Command::parse(line));
        }

        match strip_secret(line, &self.secret) {
            Some(rest) => {
                self.authenticated = true;
                let rest = rest.trim();
                if rest.is_empty() {
                    Admission::Granted(None)
                } else {
                    Admission::Granted(Some(Command::parse(rest)))
                }
            }
            None => Admission::Rejected,
        }
    }
}

impl fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthGate")
            .field("secret", &"<redacted>")
            .field("authenticated", &self.authenticated)
            .finish()
    }
}

/// Returns what follows `<secret>|`, or `None` if the line does not start with it.
fn strip_secret<'a>(line: &'a str, secret: &str) -> Option<&'a str> {
    line.strip_prefix(secret)?.strip_prefix(AUTH_SEPARATOR)
}
