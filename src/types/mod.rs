//! This module contains types used throughout the transfer engine.

use std::fmt;

/// From section [2.3.1.1 of RFC 3501](https://tools.ietf.org/html/rfc3501#section-2.3.1.1).
///
/// A 32-bit value assigned to each message, which when used with the unique identifier validity
/// value forms a 64-bit value that will not refer to any other message in the mailbox or any
/// subsequent mailbox with the same name forever. Only reported back by servers that support
/// [`UIDPLUS`](https://tools.ietf.org/html/rfc4315); see [`Appended`].
pub type Uid = u32;

/// From section [2.3.1.2 of RFC 3501](https://tools.ietf.org/html/rfc3501#section-2.3.1.2).
///
/// A relative position from 1 to the number of messages in the mailbox.
/// This position is ordered by ascending unique identifier.
///
/// Message sequence numbers can be reassigned during the session, for example when a message is
/// expunged, and are only meaningful while the mailbox stays selected. The transfer engine
/// therefore never carries them from one selection of a mailbox to the next.
pub type Seq = u32;

/// Which of the two servers a connection, mailbox or error belongs to.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum Role {
    /// The server messages are read from.
    Source,
    /// The server messages are appended to.
    Destination,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Role::Source => write!(f, "source"),
            Role::Destination => write!(f, "destination"),
        }
    }
}

/// Outcome of a [`CREATE`](https://tools.ietf.org/html/rfc3501#section-6.3.3) command.
///
/// A mailbox that is already there is as good as a freshly created one for the purpose of
/// appending to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Created {
    /// The server created the mailbox.
    Created,
    /// The server reported that the mailbox exists already.
    AlreadyExists,
}

mod appended;
pub use self::appended::Appended;

mod flag;
pub use self::flag::Flag;

mod fetch;
pub use self::fetch::MessageRecord;

mod mailbox;
pub use self::mailbox::Mailbox;

mod name;
pub use self::name::{Name, NameAttribute};
