use chrono::{DateTime, FixedOffset};
use sha2::{Digest, Sha256};

use super::{Flag, Seq};

/// One message as read from the source mailbox: what `FETCH (FLAGS INTERNALDATE BODY.PEEK[])`
/// returned for it.
///
/// A record only lives for a single fetch/append cycle. `flags` and `internal_date` are `None`
/// when the server left them out of its reply (or sent something unparseable); they are then
/// left out of the `APPEND` as well, so the destination applies its own defaults.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MessageRecord {
    /// The ordinal number of this message in its containing mailbox.
    pub message: Seq,

    /// Flags set on the message, if the server reported them. An empty list means the server
    /// reported `FLAGS ()`.
    pub flags: Option<Vec<Flag>>,

    /// The server's arrival time for the message.
    pub internal_date: Option<DateTime<FixedOffset>>,

    /// The raw RFC 822 message.
    pub payload: Vec<u8>,
}

impl MessageRecord {
    /// Lowercase hex SHA-256 of the raw payload, logged for every copied message so a transfer
    /// can be audited afterwards.
    pub fn fingerprint(&self) -> String {
        format!("{:x}", Sha256::digest(&self.payload))
    }

    /// Flags that may be passed on to `APPEND`.
    pub fn settable_flags(&self) -> Option<Vec<&Flag>> {
        self.flags
            .as_ref()
            .map(|flags| flags.iter().filter(|f| f.is_settable()).collect())
    }
}
