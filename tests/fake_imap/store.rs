//! Test data model for the fake IMAP server.
//!
//! ```ignore
//! let store = StoreBuilder::new('/')
//!     .mailbox("INBOX")
//!         .message(&["\\Seen"], "01-Mar-2021 10:00:00 +0000", b"Subject: hi\r\n\r\nhi")
//!     .container("Lists")
//!     .mailbox("Lists/rust")
//!     .build();
//! ```

/// One message in a mailbox.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredMessage {
    pub flags: Vec<String>,
    pub internal_date: Option<String>,
    pub body: Vec<u8>,
}

/// A named mailbox. Containers are listed as `\Noselect` and can not be opened.
#[derive(Clone, Debug)]
pub struct StoredMailbox {
    pub name: String,
    pub selectable: bool,
    pub messages: Vec<StoredMessage>,
}

/// Everything one fake server holds.
#[derive(Clone, Debug)]
pub struct Store {
    pub delimiter: Option<char>,
    pub mailboxes: Vec<StoredMailbox>,
    pub subscriptions: Vec<String>,
    /// Answer `CREATE` with `NO`.
    pub refuse_create: bool,
    /// Answer `APPEND` with `NO [OVERQUOTA]` once a mailbox holds this many messages.
    pub quota: Option<usize>,
}

impl Store {
    pub fn get(&self, name: &str) -> Option<&StoredMailbox> {
        self.mailboxes.iter().find(|m| m.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut StoredMailbox> {
        self.mailboxes.iter_mut().find(|m| m.name == name)
    }

    /// Messages of a mailbox, or an empty slice if there is no such mailbox.
    pub fn messages(&self, name: &str) -> &[StoredMessage] {
        self.get(name).map(|m| m.messages.as_slice()).unwrap_or(&[])
    }

    pub fn names(&self) -> Vec<&str> {
        self.mailboxes.iter().map(|m| m.name.as_str()).collect()
    }
}

pub struct StoreBuilder {
    store: Store,
}

impl StoreBuilder {
    pub fn new(delimiter: char) -> Self {
        Self::with_delimiter(Some(delimiter))
    }

    pub fn flat() -> Self {
        Self::with_delimiter(None)
    }

    fn with_delimiter(delimiter: Option<char>) -> Self {
        StoreBuilder {
            store: Store {
                delimiter,
                mailboxes: Vec::new(),
                subscriptions: Vec::new(),
                refuse_create: false,
                quota: None,
            },
        }
    }

    /// Add a mailbox. Subsequent `.message()` calls add to it.
    pub fn mailbox(mut self, name: &str) -> Self {
        self.store.mailboxes.push(StoredMailbox {
            name: name.to_string(),
            selectable: true,
            messages: Vec::new(),
        });
        self
    }

    /// Add a `\Noselect` container.
    pub fn container(mut self, name: &str) -> Self {
        self.store.mailboxes.push(StoredMailbox {
            name: name.to_string(),
            selectable: false,
            messages: Vec::new(),
        });
        self
    }

    /// Add a message to the most recently added mailbox.
    pub fn message(mut self, flags: &[&str], internal_date: &str, body: &[u8]) -> Self {
        let mailbox = self
            .store
            .mailboxes
            .last_mut()
            .expect("call .mailbox() before .message()");
        mailbox.messages.push(StoredMessage {
            flags: flags.iter().map(|f| f.to_string()).collect(),
            internal_date: Some(internal_date.to_string()),
            body: body.to_vec(),
        });
        self
    }

    /// Add `n` plain messages numbered from 1, with bodies `Subject: <i>`.
    pub fn numbered(mut self, n: usize) -> Self {
        for i in 1..=n {
            let body = format!("Subject: {}\r\n\r\nmessage {}\r\n", i, i);
            self = self.message(&[], "01-Jan-2020 00:00:00 +0000", body.as_bytes());
        }
        self
    }

    pub fn refuse_create(mut self) -> Self {
        self.store.refuse_create = true;
        self
    }

    pub fn quota(mut self, messages: usize) -> Self {
        self.store.quota = Some(messages);
        self
    }

    pub fn build(self) -> Store {
        self.store
    }
}
