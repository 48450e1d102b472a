//! Copy mailboxes from one IMAP server to another.
//!
//! Messages are read from the source with `EXAMINE` and `BODY.PEEK[]`, so nothing on the source
//! changes, and appended to the destination together with their flags and internal date. Mailbox
//! hierarchies can be copied recursively between servers that use different hierarchy
//! delimiters.
//!
//! # Usage
//!
//! A [`Session`] owns one connection to each server and copies the mailbox pairs of a
//! [`ReplicationConfig`] in order:
//!
//! ```no_run
//! use imapcopy::{Credentials, Endpoint, MailboxPair, ReplicationConfig, Session};
//!
//! fn main() -> imapcopy::Result<()> {
//!     let source = Endpoint::parse("imap.example.com")?
//!         .with_credentials(Credentials::parse("joe:secret")?);
//!     let destination = Endpoint::parse("mail.example.org:993")?
//!         .with_credentials(Credentials::parse("joe@example.org:secret")?);
//!
//!     let mut config = ReplicationConfig::new(
//!         source,
//!         destination,
//!         vec![MailboxPair::new("INBOX", "Archive/INBOX")],
//!     );
//!     config.create_mailboxes = true;
//!     config.recurse = true;
//!
//!     let mut session = Session::connect(config)?;
//!     let report = session.run()?;
//!     println!("{}", report);
//!     Ok(())
//! }
//! ```
//!
//! The session logs out of both servers when it is dropped. Progress is reported through
//! [`tracing`](https://docs.rs/tracing) events; wire traffic is logged at `trace` level with
//! `LOGIN` arguments masked.
//!
//! A single connection can also be driven directly through [`Client`], which is generic over its
//! stream and speaks exactly the commands a copy needs.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod parse;
pub mod types;

pub mod client;
mod client_builder;
pub mod config;
mod conn;
pub mod error;
pub mod hierarchy;
pub mod replicator;
mod session;

pub use crate::client::Client;
pub use crate::client_builder::{ClientBuilder, ConnectionMode, IMAPS_PORT};
pub use crate::config::{Credentials, Endpoint, MailboxPair, ReplicationConfig};
pub use crate::conn::{Connection, ImapConnection};
pub use crate::error::{Error, Result};
pub use crate::parse::{format_internal_date, parse_internal_date};
pub use crate::replicator::{MailboxSummary, Replicator};
pub use crate::session::{Report, Session};
pub use crate::types::*;

#[cfg(test)]
mod mock_stream;
