//! Copying the messages of one source mailbox into one destination mailbox.

use std::fmt;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::client::Client;
use crate::config::{MailboxPair, ReplicationConfig};
use crate::error::{Error, Result};
use crate::types::{Created, Role, Seq};

/// What happened to one mailbox pair.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MailboxSummary {
    /// The source mailbox.
    pub source: String,
    /// The destination mailbox.
    pub destination: String,
    /// Messages in the source mailbox when it was searched.
    pub total: u32,
    /// Messages looked at, skipped ones included.
    pub examined: u32,
    /// Messages appended to the destination.
    pub copied: u32,
    /// Messages that could not be fetched and were left out.
    pub failed: u32,
}

impl fmt::Display for MailboxSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {}: copied {} of {} messages ({} examined, {} failed)",
            self.source, self.destination, self.copied, self.total, self.examined, self.failed
        )
    }
}

/// Copies mailboxes according to the per-mailbox options of a run.
#[derive(Clone, Debug, Default)]
pub struct Replicator {
    create_mailboxes: bool,
    skip: u32,
    limit: u32,
    interrupt: Option<Arc<AtomicBool>>,
}

impl Replicator {
    /// Take the per-mailbox options from `config`.
    pub fn new(config: &ReplicationConfig) -> Self {
        Replicator {
            create_mailboxes: config.create_mailboxes,
            skip: config.skip,
            limit: config.limit,
            interrupt: None,
        }
    }

    /// Stop with [`Error::Interrupted`] before the next message once `flag` is set.
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    fn interrupted(&self) -> bool {
        self.interrupt
            .as_ref()
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Copy the messages of `pair.source` into `pair.destination`.
    ///
    /// The first `skip` messages (by sequence number) are passed over, and at most `limit`
    /// messages are copied when a limit is set. Messages that can not be fetched are logged and
    /// counted as failed; a message the destination refuses ends this mailbox with
    /// [`Error::Append`]. Both mailboxes are closed again when every message has been handled.
    pub fn replicate<S, D>(
        &self,
        source: &mut Client<S>,
        destination: &mut Client<D>,
        pair: &MailboxPair,
    ) -> Result<MailboxSummary>
    where
        S: Read + Write,
        D: Read + Write,
    {
        source.examine(&pair.source).map_err(|e| match e {
            e if e.is_refusal() => {
                warn!("{}", e);
                Error::MailboxNotFound {
                    role: Role::Source,
                    mailbox: pair.source.clone(),
                }
            }
            e => e,
        })?;
        debug!("opened source mailbox {} read-only", pair.source);

        self.open_destination(destination, &pair.destination)?;
        debug!("opened destination mailbox {}", pair.destination);

        let messages = source.search_all()?;
        let mut summary = MailboxSummary {
            source: pair.source.clone(),
            destination: pair.destination.clone(),
            total: messages.len() as u32,
            ..MailboxSummary::default()
        };
        info!(
            "copying {} -> {}: {} messages",
            pair.source, pair.destination, summary.total
        );

        for message in messages {
            if self.interrupted() {
                return Err(Error::Interrupted);
            }

            summary.examined += 1;
            if summary.examined <= self.skip {
                debug!(
                    "skipping message {} of {} ({}/{})",
                    message, pair.source, summary.examined, self.skip
                );
                continue;
            }

            if !self.copy_message(source, destination, pair, message, &mut summary)? {
                continue;
            }

            if self.limit > 0 && summary.copied >= self.limit {
                info!(
                    "copied {} messages from {}, stopping at the limit",
                    summary.copied, pair.source
                );
                break;
            }
        }

        source.close()?;
        destination.close()?;
        info!("{}", summary);
        Ok(summary)
    }

    /// Fetch one message and append it. Returns whether it was copied.
    fn copy_message<S, D>(
        &self,
        source: &mut Client<S>,
        destination: &mut Client<D>,
        pair: &MailboxPair,
        message: Seq,
        summary: &mut MailboxSummary,
    ) -> Result<bool>
    where
        S: Read + Write,
        D: Read + Write,
    {
        let record = match source.fetch(message) {
            Ok(record) => record,
            Err(e) if e.is_refusal() || matches!(e, Error::Parse(_)) => {
                summary.failed += 1;
                let e = Error::Fetch {
                    mailbox: pair.source.clone(),
                    message,
                    source: Box::new(e),
                };
                error!(
                    "{} (examined {}, copied {}, failed {})",
                    e, summary.examined, summary.copied, summary.failed
                );
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let flags = record.settable_flags();
        let appended = destination
            .append(
                &pair.destination,
                flags.as_deref(),
                record.internal_date.as_ref(),
                &record.payload,
            )
            .map_err(|e| match e {
                e if e.is_refusal() || matches!(e, Error::Validate(_)) => Error::Append {
                    mailbox: pair.destination.clone(),
                    message,
                    source: Box::new(e),
                },
                e => e,
            })?;

        summary.copied += 1;
        info!(
            "copied message {} of {} ({} examined, {} copied, {} bytes, sha256 {}, {})",
            message,
            pair.source,
            summary.examined,
            summary.copied,
            record.payload.len(),
            record.fingerprint(),
            appended
        );
        Ok(true)
    }

    /// Select the destination mailbox, creating it first if that is allowed.
    fn open_destination<D: Read + Write>(
        &self,
        destination: &mut Client<D>,
        mailbox: &str,
    ) -> Result<()> {
        let not_found = || Error::MailboxNotFound {
            role: Role::Destination,
            mailbox: mailbox.to_string(),
        };

        match destination.select(mailbox) {
            Ok(_) => return Ok(()),
            Err(e) if e.is_refusal() && self.create_mailboxes => {
                debug!("couldn't select {}: {}", mailbox, e);
            }
            Err(e) if e.is_refusal() => {
                warn!("{}", e);
                return Err(not_found());
            }
            Err(e) => return Err(e),
        }

        match destination.create(mailbox) {
            Ok(Created::Created) => info!("created destination mailbox {}", mailbox),
            Ok(Created::AlreadyExists) => {
                debug!("destination mailbox {} exists already", mailbox)
            }
            Err(e) if e.is_refusal() => {
                return Err(Error::Create {
                    mailbox: mailbox.to_string(),
                    source: Box::new(e),
                })
            }
            Err(e) => return Err(e),
        }

        match destination.subscribe(mailbox) {
            Ok(()) => {}
            Err(e) if e.is_refusal() => warn!("couldn't subscribe to {}: {}", mailbox, e),
            Err(e) => return Err(e),
        }

        destination.select(mailbox).map(|_| ()).map_err(|e| {
            if e.is_refusal() {
                warn!("{}", e);
                not_found()
            } else {
                e
            }
        })
    }
}
