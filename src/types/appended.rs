use std::fmt;

/// Meta-information about a message, as returned by
/// [`APPEND`](https://tools.ietf.org/html/rfc3501#section-6.3.11).
/// Note that `APPEND` only returns any data if the server supports
/// [`UIDPLUS`](https://tools.ietf.org/html/rfc4315).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct Appended {
    /// The unique identifier validity value of the mailbox that the message was appended to.
    pub uid_validity: Option<u32>,

    /// The unique identifier the destination assigned to the message.
    pub uid: Option<u32>,
}

impl fmt::Display for Appended {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.uid_validity, self.uid) {
            (Some(validity), Some(uid)) => write!(f, "uid {} (validity {})", uid, validity),
            _ => write!(f, "no uid reported"),
        }
    }
}
