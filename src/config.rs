//! Immutable description of one replication run.
//!
//! Everything here is plain data built once, before any connection is opened. The parsers accept
//! the command line forms `host[:port]`, `user:password` and alternating mailbox names.

use std::fmt;

use crate::client_builder::{ConnectionMode, IMAPS_PORT};
use crate::error::{Error, Result};
use crate::types::Role;

/// Login name and password for one server.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// The login name.
    pub username: String,
    /// The password, sent in the clear inside the (possibly encrypted) `LOGIN` command.
    pub password: String,
}

impl Credentials {
    /// Parse `user:password`. The password may itself contain `:`. An empty string means the
    /// server is to be used without logging in.
    pub fn parse(s: &str) -> Result<Option<Credentials>> {
        if s.is_empty() {
            return Ok(None);
        }
        match s.split_once(':') {
            Some((username, password)) if !username.is_empty() => Ok(Some(Credentials {
                username: username.to_string(),
                password: password.to_string(),
            })),
            _ => Err(Error::Config(format!(
                "credentials must look like user:password, got {:?}",
                s.split(':').next().unwrap_or_default()
            ))),
        }
    }
}

// never print the password
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One IMAP server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// How the connection is secured.
    pub mode: ConnectionMode,
    /// `None` for servers that need no `LOGIN` (e.g. pre-authenticated connections).
    pub credentials: Option<Credentials>,
}

impl Endpoint {
    /// Parse `host[:port]`; the port defaults to 993.
    pub fn parse(s: &str) -> Result<Endpoint> {
        let (host, port) = match s.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .map_err(|_| Error::Config(format!("invalid port in {:?}", s)))?;
                (host, port)
            }
            None => (s, IMAPS_PORT),
        };
        if host.is_empty() {
            return Err(Error::Config(format!("missing host name in {:?}", s)));
        }
        Ok(Endpoint {
            host: host.to_string(),
            port,
            mode: ConnectionMode::Auto,
            credentials: None,
        })
    }

    /// Secure the connection as given.
    pub fn with_mode(mut self, mode: ConnectionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Log in with these credentials after connecting.
    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.credentials {
            Some(ref c) => write!(f, "{}@{}:{}", c.username, self.host, self.port),
            None => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

/// A source mailbox and the destination mailbox its messages go to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MailboxPair {
    /// Full path on the source server.
    pub source: String,
    /// Full path on the destination server.
    pub destination: String,
}

impl MailboxPair {
    /// Pair up a source and a destination path.
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        MailboxPair {
            source: source.into(),
            destination: destination.into(),
        }
    }

    /// Turn `[src1, dst1, src2, dst2, ...]` into pairs, in order.
    pub fn parse_list<S: AsRef<str>>(names: &[S]) -> Result<Vec<MailboxPair>> {
        if names.is_empty() {
            return Err(Error::Config("no mailboxes given".to_string()));
        }
        if names.len() % 2 != 0 {
            return Err(Error::Config(format!(
                "mailboxes must be given in source/destination pairs, got {} names",
                names.len()
            )));
        }
        Ok(names
            .chunks(2)
            .map(|pair| MailboxPair::new(pair[0].as_ref(), pair[1].as_ref()))
            .collect())
    }
}

impl fmt::Display for MailboxPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.destination)
    }
}

/// Everything a [`Session`](crate::Session) needs to know, fixed for the whole run.
#[derive(Clone, Debug)]
pub struct ReplicationConfig {
    /// Where messages are read from.
    pub source: Endpoint,
    /// Where messages are appended to.
    pub destination: Endpoint,
    /// What goes where, processed in order.
    pub mapping: Vec<MailboxPair>,
    /// Create destination mailboxes that can not be selected.
    pub create_mailboxes: bool,
    /// Also copy every mailbox below each source mailbox.
    pub recurse: bool,
    /// Leave out this many messages at the start of every mailbox.
    pub skip: u32,
    /// Copy at most this many messages per mailbox; 0 means no limit.
    pub limit: u32,
}

impl ReplicationConfig {
    /// A configuration with the defaults of the command line tool: no creation, no recursion,
    /// nothing skipped and no limit.
    pub fn new(source: Endpoint, destination: Endpoint, mapping: Vec<MailboxPair>) -> Self {
        ReplicationConfig {
            source,
            destination,
            mapping,
            create_mailboxes: false,
            recurse: false,
            skip: 0,
            limit: 0,
        }
    }

    /// The endpoint for the given role.
    pub fn endpoint(&self, role: Role) -> &Endpoint {
        match role {
            Role::Source => &self.source,
            Role::Destination => &self.destination,
        }
    }

    /// Check the values that can not be expressed in the types.
    pub fn validate(&self) -> Result<()> {
        if self.mapping.is_empty() {
            return Err(Error::Config("no mailboxes given".to_string()));
        }
        for pair in &self.mapping {
            // only the hierarchy root may copy onto the destination's root
            if pair.destination.is_empty() && !(self.recurse && pair.source.is_empty()) {
                return Err(Error::Config(format!(
                    "empty destination mailbox for {:?}",
                    pair.source
                )));
            }
        }
        Ok(())
    }
}
