use std::fmt;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::client::Client;
use crate::client_builder::ClientBuilder;
use crate::config::{Endpoint, MailboxPair, ReplicationConfig};
use crate::conn::Connection;
use crate::error::{Error, Result};
use crate::hierarchy;
use crate::replicator::{MailboxSummary, Replicator};
use crate::types::Role;

/// The outcome of [`Session::run`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Report {
    /// Every mailbox that was copied, in the order it was copied.
    pub mailboxes: Vec<MailboxSummary>,
    /// Mailboxes that were abandoned because the destination refused a message.
    pub abandoned: Vec<MailboxPair>,
}

impl Report {
    /// Messages copied over all mailboxes.
    pub fn copied(&self) -> u64 {
        self.mailboxes.iter().map(|m| u64::from(m.copied)).sum()
    }

    /// Messages that could not be fetched, over all mailboxes.
    pub fn failed(&self) -> u64 {
        self.mailboxes.iter().map(|m| u64::from(m.failed)).sum()
    }

    /// Whether every mailbox was copied without losing a message.
    pub fn is_complete(&self) -> bool {
        self.abandoned.is_empty() && self.failed() == 0
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "copied {} messages in {} mailboxes",
            self.copied(),
            self.mailboxes.len()
        )?;
        if self.failed() > 0 {
            write!(f, ", {} messages could not be read", self.failed())?;
        }
        if !self.abandoned.is_empty() {
            write!(f, ", {} mailboxes abandoned", self.abandoned.len())?;
        }
        Ok(())
    }
}

/// Both connections of a replication run, and the run itself.
///
/// The source is only ever `EXAMINE`d. Both connections are logged out when the session is
/// dropped, whether [`Session::run`] finished, failed or was never called.
pub struct Session<S: Read + Write, D: Read + Write> {
    pub(crate) source: Client<S>,
    pub(crate) destination: Client<D>,
    config: ReplicationConfig,
    interrupt: Arc<AtomicBool>,
}

impl Session<Connection, Connection> {
    /// Connect and log in to the source, then the destination.
    pub fn connect(config: ReplicationConfig) -> Result<Self> {
        config.validate()?;

        let mut source = open(Role::Source, &config.source)?;
        let destination = match open(Role::Destination, &config.destination) {
            Ok(destination) => destination,
            Err(e) => {
                if let Err(le) = source.disconnect() {
                    warn!("logging out of source failed: {}", le);
                }
                return Err(e);
            }
        };

        Session::new(source, destination, config)
    }
}

fn open(role: Role, endpoint: &Endpoint) -> Result<Client<Connection>> {
    let mut client = ClientBuilder::new(&endpoint.host, endpoint.port)
        .mode(endpoint.mode)
        .connect()
        .map_err(|e| Error::Connect {
            role,
            source: Box::new(e),
        })?
        .with_role(role);

    if let Some(ref credentials) = endpoint.credentials {
        if let Err(e) = client.login(&credentials.username, &credentials.password) {
            if let Err(le) = client.logout() {
                warn!("logging out of {} failed: {}", role, le);
            }
            return Err(Error::Connect {
                role,
                source: Box::new(e),
            });
        }
    }
    info!("connected to {} {}", role, endpoint);
    Ok(client)
}

impl<S: Read + Write, D: Read + Write> Session<S, D> {
    /// Start a session over two connections that are past the greeting (and logged in, where
    /// that is needed), and learn each server's hierarchy delimiter.
    pub fn new(
        source: Client<S>,
        destination: Client<D>,
        config: ReplicationConfig,
    ) -> Result<Self> {
        let mut session = Session {
            source: source.with_role(Role::Source),
            destination: destination.with_role(Role::Destination),
            config,
            interrupt: Arc::new(AtomicBool::new(false)),
        };

        let names = session.source.discover_delimiter()?;
        info!(
            "source has {} mailboxes, hierarchy delimiter {:?}",
            names.len(),
            session.source.delimiter()
        );
        let names = session.destination.discover_delimiter()?;
        info!(
            "destination has {} mailboxes, hierarchy delimiter {:?}",
            names.len(),
            session.destination.delimiter()
        );
        Ok(session)
    }

    /// Stop the run between two messages once `flag` is set, e.g. from a signal handler.
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = flag;
        self
    }

    /// The configuration this session runs with.
    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// The connection messages are read from.
    pub fn source(&self) -> &Client<S> {
        &self.source
    }

    /// The connection messages are appended to.
    pub fn destination(&self) -> &Client<D> {
        &self.destination
    }

    /// Copy every mailbox pair of the configuration, in order.
    ///
    /// With recursion on, each pair is followed by the pairs for all mailboxes below its source,
    /// parents first. A mailbox is copied before the mailboxes below it are listed. Without
    /// recursion an entry with an empty source path has nothing to copy and is skipped.
    ///
    /// A mailbox whose destination refuses a message is abandoned and the run moves on to the
    /// next one; every other failure ends the run.
    pub fn run(&mut self) -> Result<Report> {
        let Session {
            source,
            destination,
            config,
            interrupt,
        } = self;

        let replicator = Replicator::new(config).with_interrupt(interrupt.clone());
        let destination_delimiter =
            hierarchy::destination_delimiter(source.delimiter(), destination.delimiter());
        let mut report = Report::default();

        for entry in &config.mapping {
            if interrupt.load(Ordering::SeqCst) {
                return Err(Error::Interrupted);
            }

            if !config.recurse {
                if entry.source.is_empty() {
                    info!("{} names no source mailbox and recursion is off, skipping", entry);
                    continue;
                }
                copy_one(&replicator, source, destination, entry, &mut report)?;
                continue;
            }

            debug!("copying {} and everything below it", entry);
            hierarchy::walk(source, entry, destination_delimiter, |source, pair| {
                if interrupt.load(Ordering::SeqCst) {
                    return Err(Error::Interrupted);
                }
                copy_one(&replicator, source, &mut *destination, pair, &mut report)
            })?;
        }

        info!("{}", report);
        Ok(report)
    }

    /// Close any selected mailbox and log out of both servers. Calling this again does nothing.
    pub fn disconnect(&mut self) -> Result<()> {
        let source = self.source.disconnect();
        let destination = self.destination.disconnect();
        source.and(destination)
    }
}

/// Copy one pair, noting it as abandoned when only that mailbox is lost.
fn copy_one<S: Read + Write, D: Read + Write>(
    replicator: &Replicator,
    source: &mut Client<S>,
    destination: &mut Client<D>,
    pair: &MailboxPair,
    report: &mut Report,
) -> Result<()> {
    match replicator.replicate(source, destination, pair) {
        Ok(summary) => report.mailboxes.push(summary),
        Err(e) if !e.aborts_session() => {
            error!("{}; continuing with the next mailbox", e);
            report.abandoned.push(pair.clone());
        }
        Err(e) => {
            error!("copying {} failed: {}", pair, e);
            return Err(e);
        }
    }
    Ok(())
}

impl<S: Read + Write, D: Read + Write> Drop for Session<S, D> {
    fn drop(&mut self) {
        // nothing to do about a failed logout but to say so
        if let Err(e) = self.source.disconnect() {
            warn!("logging out of source failed: {}", e);
        }
        if let Err(e) = self.destination.disconnect() {
            warn!("logging out of destination failed: {}", e);
        }
    }
}
