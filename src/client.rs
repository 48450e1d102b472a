use bufstream::BufStream;
use chrono::{DateTime, FixedOffset};
use std::io::{BufRead, Read, Write};
use tracing::{debug, trace, warn};

use super::error::{Error, ParseError, Result, ValidateError};
use super::parse::{
    format_internal_date, literal_len, parse_appended, parse_fetch, parse_ids, parse_mailbox,
    parse_names, parse_status_line, Status, StatusLine,
};
use super::types::*;

static TAG_PREFIX: &str = "a";
const INITIAL_TAG: u32 = 0;
const CR: u8 = 0x0d;
const LF: u8 = 0x0a;

/// The items requested for every transferred message. `BODY.PEEK[]` leaves `\Seen` alone even on
/// servers that ignore the read-only state of an `EXAMINE`d mailbox.
const FETCH_ITEMS: &str = "(FLAGS INTERNALDATE BODY.PEEK[])";

macro_rules! quote {
    ($x:expr) => {
        format!("\"{}\"", $x.replace(r"\", r"\\").replace("\"", "\\\""))
    };
}

fn validate_str(value: &str) -> Result<String> {
    let quoted = quote!(value);
    if quoted.find('\n').is_some() {
        return Err(Error::Validate(ValidateError('\n')));
    }
    if quoted.find('\r').is_some() {
        return Err(Error::Validate(ValidateError('\r')));
    }
    Ok(quoted)
}

/// Where a connection is in the [IMAP state
/// machine](https://tools.ietf.org/html/rfc3501#section-3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum State {
    /// Connected, greeting read, no `LOGIN` yet.
    NotAuthenticated,
    /// Logged in (or pre-authenticated), no mailbox selected.
    Authenticated,
    /// A mailbox is selected.
    Selected {
        /// The selected mailbox.
        mailbox: String,
        /// Whether it was opened with `EXAMINE`.
        read_only: bool,
    },
    /// `LOGOUT` has been sent; the connection is unusable.
    LoggedOut,
}

/// A connection to one IMAP server, and the only thing in this crate that speaks the protocol.
///
/// Commands are sent one at a time and their responses read to completion before the next one
/// goes out. The client keeps track of the protocol state, so that [`Client::close`] and
/// [`Client::disconnect`] can be called at any time, and remembers the server's hierarchy
/// delimiter once [`Client::discover_delimiter`] has run.
pub struct Client<T: Read + Write> {
    stream: BufStream<T>,
    tag: u32,
    state: State,
    delimiter: Option<char>,
    role: Option<Role>,
}

impl<T: Read + Write> Client<T> {
    /// Creates a new client with the underlying stream.
    ///
    /// This method does not read the server greeting; call [`Client::read_greeting`] first if
    /// the stream is fresh.
    pub fn new(stream: T) -> Client<T> {
        Client {
            stream: BufStream::new(stream),
            tag: INITIAL_TAG,
            state: State::NotAuthenticated,
            delimiter: None,
            role: None,
        }
    }

    /// Tag this connection with the endpoint it talks to, for log output.
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    /// Carry the protocol state over to a client on a new stream, as after `STARTTLS`.
    pub(crate) fn with_state(mut self, state: State) -> Self {
        self.state = state;
        self
    }

    /// The endpoint this connection talks to, if known.
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// The current protocol state.
    pub fn state(&self) -> &State {
        &self.state
    }

    /// The hierarchy delimiter found by [`Client::discover_delimiter`]. `None` if discovery has
    /// not run, or if the server uses a flat namespace.
    pub fn delimiter(&self) -> Option<char> {
        self.delimiter
    }

    /// Read the server greeting. A `PREAUTH` greeting moves the connection straight into the
    /// authenticated state; a `BYE` greeting means the server turned us away.
    pub fn read_greeting(&mut self) -> Result<()> {
        let mut v = Vec::new();
        self.read_logical_line(&mut v)?;
        let (_, greeting) =
            parse_status_line(&v).ok_or_else(|| Error::Parse(ParseError::Invalid(v.clone())))?;
        match greeting.status {
            Status::PreAuth => {
                debug!("{} greeted us pre-authenticated", self.label());
                self.state = State::Authenticated;
                Ok(())
            }
            Status::Ok => Ok(()),
            Status::Bye => Err(Error::ConnectionLost),
            Status::No | Status::Bad => greeting.into_result().map(|_| ()),
        }
    }

    /// Log in to the IMAP server.
    pub fn login(&mut self, username: &str, password: &str) -> Result<()> {
        if self.state == State::Authenticated {
            debug!("{} is pre-authenticated, not logging in", self.label());
            return Ok(());
        }
        self.run_command_and_check_ok(&format!(
            "LOGIN {} {}",
            validate_str(username)?,
            validate_str(password)?
        ))?;
        self.state = State::Authenticated;
        Ok(())
    }

    /// The `LIST` command returns a subset of names from the complete set
    /// of all names available to the client.
    pub fn list(&mut self, reference_name: &str, mailbox_pattern: &str) -> Result<Vec<Name>> {
        let (lines, _) = self.run_command_and_read_response(&format!(
            "LIST {} {}",
            validate_str(reference_name)?,
            validate_str(mailbox_pattern)?
        ))?;
        parse_names(&lines)
    }

    /// List every mailbox on the server and remember the hierarchy delimiter of the first one.
    ///
    /// Must run once right after connecting, before any path is split or joined for this
    /// server. The delimiter is fixed from then on.
    pub fn discover_delimiter(&mut self) -> Result<Vec<Name>> {
        let names = self.list("", "*")?;
        self.delimiter = names.first().and_then(Name::delimiter);
        debug!(
            "{} uses hierarchy delimiter {:?}",
            self.label(),
            self.delimiter
        );
        Ok(names)
    }

    /// Selects a mailbox for reading and appending.
    pub fn select(&mut self, mailbox_name: &str) -> Result<Mailbox> {
        self.open("SELECT", mailbox_name, false)
    }

    /// Examine is identical to Select, but the selected mailbox is identified as read-only.
    pub fn examine(&mut self, mailbox_name: &str) -> Result<Mailbox> {
        self.open("EXAMINE", mailbox_name, true)
    }

    fn open(
        &mut self,
        command: &'static str,
        mailbox_name: &str,
        read_only: bool,
    ) -> Result<Mailbox> {
        self.ensure_connected(command)?;
        let command = format!("{} {}", command, validate_str(mailbox_name)?);
        // a failed SELECT still deselects whatever was selected before
        self.state = State::Authenticated;
        let (lines, done) = self.run_command_and_read_response(&command)?;
        let mailbox = parse_mailbox(&lines, &done)?;
        self.state = State::Selected {
            mailbox: mailbox_name.to_string(),
            read_only: read_only || mailbox.read_only,
        };
        Ok(mailbox)
    }

    /// Create creates a mailbox with the given name.
    ///
    /// A server that answers `NO [ALREADYEXISTS]` (or a `NO` that says as much in words, as
    /// servers predating [RFC 5530](https://tools.ietf.org/html/rfc5530) do) is reported as
    /// [`Created::AlreadyExists`] rather than as an error.
    pub fn create(&mut self, mailbox_name: &str) -> Result<Created> {
        self.ensure_connected("CREATE")?;
        self.run_command(&format!("CREATE {}", validate_str(mailbox_name)?))?;
        let (_, done) = self.read_response_raw()?;
        if done.status == Status::No
            && (done.has_code("ALREADYEXISTS") || says_exists(&done.information))
        {
            return Ok(Created::AlreadyExists);
        }
        done.into_result().map(|_| Created::Created)
    }

    /// Subscribe adds the specified mailbox name to the server's set of "active" or "subscribed"
    /// mailboxes.
    pub fn subscribe(&mut self, mailbox: &str) -> Result<()> {
        self.run_command_and_check_ok(&format!("SUBSCRIBE {}", validate_str(mailbox)?))
    }

    /// Sequence numbers of every message in the selected mailbox, ascending.
    pub fn search_all(&mut self) -> Result<Vec<Seq>> {
        self.ensure_selected("SEARCH")?;
        let (lines, _) = self.run_command_and_read_response("SEARCH ALL")?;
        parse_ids(&lines)
    }

    /// Fetch the flags, internal date and full content of one message of the selected mailbox.
    pub fn fetch(&mut self, message: Seq) -> Result<MessageRecord> {
        self.ensure_selected("FETCH")?;
        let (lines, _) =
            self.run_command_and_read_response(&format!("FETCH {} {}", message, FETCH_ITEMS))?;
        parse_fetch(&lines, message)
    }

    /// The `APPEND` command adds a mail to a mailbox.
    ///
    /// `flags` and `internal_date` are only sent when given; leaving them out lets the server
    /// pick its defaults (usually no flags and the current time).
    pub fn append(
        &mut self,
        mailbox: &str,
        flags: Option<&[&Flag]>,
        internal_date: Option<&DateTime<FixedOffset>>,
        content: &[u8],
    ) -> Result<Appended> {
        self.ensure_connected("APPEND")?;
        let mut command = format!("APPEND {}", validate_str(mailbox)?);
        if let Some(flags) = flags {
            let flags: Vec<String> = flags.iter().map(|f| f.to_string()).collect();
            command.push_str(&format!(" ({})", flags.join(" ")));
        }
        if let Some(date) = internal_date {
            command.push_str(&format!(" \"{}\"", format_internal_date(date)));
        }
        command.push_str(&format!(" {{{}}}", content.len()));
        self.run_command(&command)?;

        loop {
            let mut v = Vec::new();
            self.read_logical_line(&mut v)?;
            if v.starts_with(b"+") {
                break;
            }
            if v.starts_with(b"* ") {
                continue;
            }
            // the server refused the literal; what we read is (or precedes) the completion
            let done = self.read_response_onto(&mut v)?;
            done.into_result()?;
            return Err(Error::Bad("server did not accept the message".to_string()));
        }

        self.stream.write_all(content)?;
        self.stream.write_all(&[CR, LF])?;
        self.stream.flush()?;
        trace!("{} C: <{} octets>", self.label(), content.len());

        let (_, done) = self.read_response()?;
        Ok(parse_appended(&done))
    }

    /// Leave the selected mailbox, if any. Nothing is sent when no mailbox is selected.
    pub fn close(&mut self) -> Result<()> {
        if let State::Selected { .. } = self.state {
            self.run_command_and_check_ok("CLOSE")?;
            self.state = State::Authenticated;
        }
        Ok(())
    }

    /// Logout informs the server that the client is done with the connection.
    pub fn logout(&mut self) -> Result<()> {
        let result = self.run_command_and_check_ok("LOGOUT");
        self.state = State::LoggedOut;
        result
    }

    /// Close the selected mailbox and log out. Safe to call more than once; after the first
    /// call nothing more is sent.
    pub fn disconnect(&mut self) -> Result<()> {
        if self.state == State::LoggedOut {
            return Ok(());
        }
        if let Err(e) = self.close() {
            warn!("{}: closing mailbox before logout failed: {}", self.label(), e);
        }
        self.logout()
    }

    /// Runs a command and checks if it returns OK.
    pub fn run_command_and_check_ok(&mut self, command: &str) -> Result<()> {
        self.run_command_and_read_response(command).map(|_| ())
    }

    /// Runs any command passed to it.
    pub fn run_command(&mut self, untagged_command: &str) -> Result<()> {
        let command = self.create_command(untagged_command);
        self.write_line(command.as_bytes())
    }

    /// Run a command and return its untagged data, failing on a `NO` or `BAD` completion.
    pub(crate) fn run_command_and_read_response(
        &mut self,
        untagged_command: &str,
    ) -> Result<(Vec<u8>, StatusLine)> {
        self.run_command(untagged_command)?;
        self.read_response()
    }

    #[cfg(test)]
    pub(crate) fn get_ref(&self) -> &T {
        self.stream.get_ref()
    }

    /// Hand back the underlying stream, e.g. to wrap it in TLS after `STARTTLS`.
    pub(crate) fn into_inner(self) -> Result<T> {
        Ok(self.stream.into_inner()?)
    }

    fn ensure_connected(&self, command: &'static str) -> Result<()> {
        match self.state {
            State::LoggedOut => Err(Error::State(command)),
            _ => Ok(()),
        }
    }

    fn ensure_selected(&self, command: &'static str) -> Result<()> {
        match self.state {
            State::Selected { .. } => Ok(()),
            _ => Err(Error::State(command)),
        }
    }

    fn read_response(&mut self) -> Result<(Vec<u8>, StatusLine)> {
        let (data, done) = self.read_response_raw()?;
        let done = done.into_result()?;
        Ok((data, done))
    }

    fn read_response_raw(&mut self) -> Result<(Vec<u8>, StatusLine)> {
        let mut v = Vec::new();
        let done = self.read_response_onto(&mut v)?;
        Ok((v, done))
    }

    /// Read untagged data onto `data` until the completion of the last command arrives. The
    /// completion line itself is not kept in `data`. If `data` already holds a line, it is
    /// checked first.
    fn read_response_onto(&mut self, data: &mut Vec<u8>) -> Result<StatusLine> {
        let match_tag = format!("{}{} ", TAG_PREFIX, self.tag);
        let mut pending = if data.is_empty() { None } else { Some(0) };

        loop {
            let line_start = match pending.take() {
                Some(start) => start,
                None => {
                    let start = data.len();
                    self.read_logical_line(data)?;
                    start
                }
            };

            let line = &data[line_start..];
            if line.starts_with(b"* ") || line.starts_with(b"+") {
                continue;
            }
            if !line.starts_with(match_tag.as_bytes()) {
                warn!(
                    "{}: ignoring response for another command: {}",
                    self.label(),
                    String::from_utf8_lossy(line).trim_end()
                );
                data.truncate(line_start);
                continue;
            }

            let done = match parse_status_line(line) {
                Some((_, done)) => done,
                None => return Err(Error::Parse(ParseError::Invalid(line.to_vec()))),
            };
            data.truncate(line_start);
            return Ok(done);
        }
    }

    /// Read one response line, including any literals it announces and the rest of the line
    /// after them.
    fn read_logical_line(&mut self, into: &mut Vec<u8>) -> Result<()> {
        loop {
            let start = into.len();
            self.readline(into)?;
            let len = match literal_len(&into[start..]) {
                Some(len) => len,
                None => return Ok(()),
            };
            let at = into.len();
            into.resize(at + len, 0);
            self.stream.read_exact(&mut into[at..])?;
            trace!("{} S: <{} octets>", self.label(), len);
        }
    }

    fn readline(&mut self, into: &mut Vec<u8>) -> Result<usize> {
        let start = into.len();
        let read = self.stream.read_until(LF, into)?;
        if read == 0 {
            return Err(Error::ConnectionLost);
        }

        trace!(
            "{} S: {}",
            self.label(),
            String::from_utf8_lossy(&into[start..]).trim_end()
        );
        Ok(read)
    }

    fn create_command(&mut self, command: &str) -> String {
        self.tag += 1;
        format!("{}{} {}", TAG_PREFIX, self.tag, command)
    }

    fn write_line(&mut self, buf: &[u8]) -> Result<()> {
        self.stream.write_all(buf)?;
        self.stream.write_all(&[CR, LF])?;
        self.stream.flush()?;

        let line = String::from_utf8_lossy(buf);
        match line.find(" LOGIN ") {
            Some(at) => trace!("{} C: {} LOGIN <redacted>", self.label(), &line[..at]),
            None => trace!("{} C: {}", self.label(), line),
        }
        Ok(())
    }

    fn label(&self) -> String {
        match self.role {
            Some(role) => role.to_string(),
            None => "imap".to_string(),
        }
    }
}

/// Whether a `NO` text reports that the mailbox is already there, as opposed to e.g. its parent
/// missing.
fn says_exists(information: &str) -> bool {
    let text = information.to_ascii_lowercase();
    text.contains("exist")
        && !["not exist", "n't exist", "no such", "nonexist", "non-exist"]
            .iter()
            .any(|negation| text.contains(negation))
}
