//! IMAP transfer error types.

use std::io::Error as IoError;
use std::result;

#[cfg(feature = "native-tls")]
use native_tls::Error as TlsError;
#[cfg(feature = "native-tls")]
use native_tls::HandshakeError as TlsHandshakeError;
use bufstream::IntoInnerError as BufError;
use thiserror::Error;

use crate::types::{Role, Seq};

/// A convenience wrapper around `Result` for `imapcopy::Error`.
pub type Result<T> = result::Result<T, Error>;

/// A set of errors that can occur while talking to either server or moving messages between them.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// An `io::Error` that occurred while trying to read or write to a network stream.
    #[error("{0}")]
    Io(#[from] IoError),
    /// An error from the TLS library, either during the handshake or while managing the socket.
    #[error("TLS error: {0}")]
    Tls(String),
    /// A BAD response from the IMAP server.
    #[error("Bad Response: {0}")]
    Bad(String),
    /// A NO response from the IMAP server.
    #[error("No Response: {0}")]
    No(String),
    /// The connection was terminated unexpectedly.
    #[error("Connection Lost")]
    ConnectionLost,
    /// Error parsing a server response.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// Command inputs were not valid [IMAP
    /// strings](https://tools.ietf.org/html/rfc3501#section-4.3).
    #[error(transparent)]
    Validate(#[from] ValidateError),
    /// A command was issued in a connection state that does not allow it, e.g. `FETCH` without a
    /// selected mailbox.
    #[error("{0} is not allowed in the current connection state")]
    State(&'static str),
    /// Connecting to or authenticating at one of the endpoints failed.
    #[error("could not connect to {role}: {source}")]
    Connect {
        /// Which endpoint failed.
        role: Role,
        /// What went wrong.
        source: Box<Error>,
    },
    /// A mailbox could not be opened, and was not (or could not be) created.
    #[error("couldn't open {role} mailbox {mailbox}")]
    MailboxNotFound {
        /// Which endpoint the mailbox lives on.
        role: Role,
        /// The full mailbox path.
        mailbox: String,
    },
    /// A destination mailbox could not be created.
    #[error("couldn't create destination mailbox {mailbox}: {source}")]
    Create {
        /// The full mailbox path.
        mailbox: String,
        /// What the server said.
        source: Box<Error>,
    },
    /// A single message could not be fetched from the source.
    #[error("couldn't fetch message {message} from {mailbox}: {source}")]
    Fetch {
        /// The source mailbox.
        mailbox: String,
        /// Sequence number of the message.
        message: Seq,
        /// What went wrong.
        source: Box<Error>,
    },
    /// A single message could not be appended to the destination.
    #[error("couldn't append message {message} to {mailbox}: {source}")]
    Append {
        /// The destination mailbox.
        mailbox: String,
        /// Sequence number of the message on the source.
        message: Seq,
        /// What went wrong.
        source: Box<Error>,
    },
    /// The run was stopped by an external interrupt.
    #[error("interrupted")]
    Interrupted,
    /// The configuration handed to the engine was not usable.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error must stop the whole replication run.
    ///
    /// Fetch failures only cost one message and append failures only cost the current mailbox;
    /// everything else (lost connections, missing mailboxes, failed creates) ends the session.
    pub fn aborts_session(&self) -> bool {
        !matches!(self, Error::Fetch { .. } | Error::Append { .. })
    }

    /// Whether this error came from the server refusing a command, as opposed to the transport.
    pub(crate) fn is_refusal(&self) -> bool {
        matches!(self, Error::No(_) | Error::Bad(_))
    }
}

impl<T> From<BufError<T>> for Error {
    fn from(err: BufError<T>) -> Error {
        Error::Io(err.into())
    }
}

#[cfg(feature = "native-tls")]
impl<T: std::fmt::Debug + 'static> From<TlsHandshakeError<T>> for Error {
    fn from(err: TlsHandshakeError<T>) -> Error {
        Error::Tls(err.to_string())
    }
}

#[cfg(feature = "native-tls")]
impl From<TlsError> for Error {
    fn from(err: TlsError) -> Error {
        Error::Tls(err.to_string())
    }
}

/// An error occured while trying to parse a server response.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// Indicates an error parsing the status response. Such as OK, NO, and BAD.
    #[error("Unable to parse status response")]
    Invalid(Vec<u8>),
    /// A `FETCH` response did not carry the message content.
    #[error("No message content in FETCH response for message {0}")]
    MissingPayload(Seq),
}

/// An [invalid character](https://tools.ietf.org/html/rfc3501#section-4.3) was found in a command
/// argument.
#[derive(Debug, Error)]
#[error("Invalid character in input: {0:?}")]
pub struct ValidateError(pub char);
