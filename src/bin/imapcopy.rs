//! Copy IMAP mailboxes, with their flags and internal dates, from one server to another.

use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use imapcopy::{
    ConnectionMode, Credentials, Endpoint, Error, MailboxPair, ReplicationConfig, Session,
};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const EXIT_FAILURE: u8 = 1;
const EXIT_MAILBOX_NOT_FOUND: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "imapcopy", version)]
#[command(about = "Copy IMAP mailboxes from one server to another")]
struct Args {
    /// Source server, host[:port] (port defaults to 993)
    source: String,

    /// Source login as user:password; empty for no login
    source_auth: String,

    /// Destination server, host[:port] (port defaults to 993)
    destination: String,

    /// Destination login as user:password; empty for no login
    destination_auth: String,

    /// Source and destination mailbox names, alternating
    #[arg(required = true, value_name = "SOURCE DESTINATION")]
    mailboxes: Vec<String>,

    /// Create destination mailboxes that don't exist
    #[arg(short = 'c', long)]
    create_mailboxes: bool,

    /// Also copy every mailbox below each source mailbox
    #[arg(short, long)]
    recurse: bool,

    /// Leave out the first N messages of every mailbox
    #[arg(short, long, value_name = "N", default_value_t = 0)]
    skip: u32,

    /// Copy at most N messages per mailbox (0 for all)
    #[arg(short, long, value_name = "N", default_value_t = 0)]
    limit: u32,

    /// Only report errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Report every protocol step
    #[arg(short, long)]
    verbose: bool,

    /// How to secure the source connection: auto, tls, starttls or plaintext
    #[arg(long, value_name = "MODE", default_value = "auto")]
    source_mode: ConnectionMode,

    /// How to secure the destination connection: auto, tls, starttls or plaintext
    #[arg(long, value_name = "MODE", default_value = "auto")]
    destination_mode: ConnectionMode,
}

impl Args {
    fn config(&self) -> imapcopy::Result<ReplicationConfig> {
        let source = Endpoint::parse(&self.source)?
            .with_mode(self.source_mode)
            .with_credentials(Credentials::parse(&self.source_auth)?);
        let destination = Endpoint::parse(&self.destination)?
            .with_mode(self.destination_mode)
            .with_credentials(Credentials::parse(&self.destination_auth)?);

        let mut config = ReplicationConfig::new(
            source,
            destination,
            MailboxPair::parse_list(&self.mailboxes)?,
        );
        config.create_mailboxes = self.create_mailboxes;
        config.recurse = self.recurse;
        config.skip = self.skip;
        config.limit = self.limit;
        config.validate()?;
        Ok(config)
    }

    fn log_level(&self) -> &'static str {
        if self.quiet {
            "error"
        } else if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}

fn init_logging(args: &Args) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Set the returned flag on SIGINT or SIGTERM. A second signal exits at once.
fn interrupt_flag() -> anyhow::Result<Arc<AtomicBool>> {
    let interrupted = Arc::new(AtomicBool::new(false));
    for sig in [SIGINT, SIGTERM] {
        // registered first, so it sees the flag as it was before this signal
        flag::register_conditional_shutdown(sig, i32::from(EXIT_INTERRUPTED), interrupted.clone())
            .context("installing signal handler")?;
        flag::register(sig, interrupted.clone()).context("installing signal handler")?;
    }
    Ok(interrupted)
}

fn run(args: &Args) -> anyhow::Result<()> {
    let config = args.config()?;
    let interrupted = interrupt_flag()?;

    let mut session = Session::connect(config)?.with_interrupt(interrupted);
    let report = session.run()?;
    session.disconnect()?;

    if !report.abandoned.is_empty() {
        let names: Vec<String> = report.abandoned.iter().map(ToString::to_string).collect();
        bail!("not all messages could be copied to {}", names.join(", "));
    }
    info!("done: {}", report);
    Ok(())
}

fn exit_code(e: &anyhow::Error) -> u8 {
    match e.downcast_ref::<Error>() {
        Some(Error::MailboxNotFound { .. }) => EXIT_MAILBOX_NOT_FOUND,
        Some(Error::Interrupted) => EXIT_INTERRUPTED,
        _ => EXIT_FAILURE,
    }
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(EXIT_FAILURE)
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    init_logging(&args);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}
