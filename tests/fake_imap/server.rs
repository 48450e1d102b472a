//! TCP side of the fake IMAP server.
//!
//! Every client command is one line `<tag> <COMMAND> <args>\r\n`; `APPEND` is the only command a
//! copy sends with a literal, announced as `{n}` at the end of the line. The server answers it
//! with a `+` continuation before reading the `n` bytes, or with a tagged `NO` instead when the
//! mailbox is missing.

use super::store::{Store, StoredMessage};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

/// Password that makes `LOGIN` fail.
pub const WRONG_PASSWORD: &str = "wrong";

/// A fake IMAP server on `127.0.0.1` with an OS-assigned port.
///
/// The accept loop runs on a background thread for as long as the test process lives; each
/// connection gets a thread of its own.
pub struct FakeImapServer {
    port: u16,
    store: Arc<Mutex<Store>>,
    log: Arc<Mutex<Vec<String>>>,
}

impl FakeImapServer {
    pub fn start(store: Store) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind to ephemeral port");
        let port = listener.local_addr().unwrap().port();
        let store = Arc::new(Mutex::new(store));
        let log = Arc::new(Mutex::new(Vec::new()));

        {
            let store = store.clone();
            let log = log.clone();
            thread::spawn(move || {
                for stream in listener.incoming() {
                    let Ok(stream) = stream else { break };
                    let store = store.clone();
                    let log = log.clone();
                    thread::spawn(move || {
                        let _ = Connection::new(stream, store, log).serve();
                    });
                }
            });
        }

        FakeImapServer { port, store, log }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `127.0.0.1:<port>`, as the command line takes it.
    pub fn address(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    /// A copy of the current mailbox state.
    pub fn store(&self) -> Store {
        self.store.lock().unwrap().clone()
    }

    /// Every command received so far, over all connections, without tags. `LOGIN` arguments
    /// are kept, so tests can check what was sent.
    pub fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Just the command names.
    pub fn verbs(&self) -> Vec<String> {
        self.commands()
            .iter()
            .map(|c| c.split(' ').next().unwrap_or_default().to_string())
            .collect()
    }
}

struct Connection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    store: Arc<Mutex<Store>>,
    log: Arc<Mutex<Vec<String>>>,
    selected: Option<String>,
}

impl Connection {
    fn new(stream: TcpStream, store: Arc<Mutex<Store>>, log: Arc<Mutex<Vec<String>>>) -> Self {
        let writer = stream.try_clone().expect("clone tcp stream");
        Connection {
            reader: BufReader::new(stream),
            writer,
            store,
            log,
            selected: None,
        }
    }

    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.writer.write_all(data)?;
        self.writer.flush()
    }

    fn line(&mut self, line: &str) -> io::Result<()> {
        self.send(format!("{}\r\n", line).as_bytes())
    }

    fn serve(mut self) -> io::Result<()> {
        self.line("* OK [CAPABILITY IMAP4rev1 UIDPLUS] Fake server ready")?;

        loop {
            let mut raw = String::new();
            if self.reader.read_line(&mut raw)? == 0 {
                return Ok(());
            }
            let line = raw.trim_end_matches(['\r', '\n']);
            let Some((tag, rest)) = line.split_once(' ') else {
                self.line("* BAD missing command")?;
                continue;
            };
            let (verb, args) = rest.split_once(' ').unwrap_or((rest, ""));
            let verb = verb.to_ascii_uppercase();
            self.log.lock().unwrap().push(rest.to_string());

            let args = split_args(args);
            match verb.as_str() {
                "LOGIN" => self.login(tag, &args)?,
                "LIST" => self.list(tag, &args)?,
                "SELECT" => self.select(tag, &args, false)?,
                "EXAMINE" => self.select(tag, &args, true)?,
                "CREATE" => self.create(tag, &args)?,
                "SUBSCRIBE" => self.subscribe(tag, &args)?,
                "SEARCH" => self.search(tag)?,
                "FETCH" => self.fetch(tag, &args)?,
                "APPEND" => self.append(tag, &args)?,
                "CLOSE" => {
                    self.selected = None;
                    self.line(&format!("{} OK CLOSE completed", tag))?;
                }
                "LOGOUT" => {
                    self.line("* BYE Logging out")?;
                    self.line(&format!("{} OK LOGOUT completed", tag))?;
                    return Ok(());
                }
                _ => self.line(&format!("{} BAD unknown command", tag))?,
            }
        }
    }

    fn login(&mut self, tag: &str, args: &[String]) -> io::Result<()> {
        if args.get(1).map(String::as_str) == Some(WRONG_PASSWORD) {
            self.line(&format!(
                "{} NO [AUTHENTICATIONFAILED] Authentication failed.",
                tag
            ))
        } else {
            self.line(&format!("{} OK Logged in", tag))
        }
    }

    fn list(&mut self, tag: &str, args: &[String]) -> io::Result<()> {
        let pattern = args.get(1).cloned().unwrap_or_default();
        let store = self.store.lock().unwrap().clone();
        let delimiter = store.delimiter;
        let quoted_delimiter = match delimiter {
            Some(d) => format!("\"{}\"", d),
            None => "NIL".to_string(),
        };

        for mailbox in &store.mailboxes {
            if !glob(pattern.as_bytes(), mailbox.name.as_bytes(), delimiter) {
                continue;
            }
            let attributes = if mailbox.selectable { "" } else { "\\Noselect" };
            self.line(&format!(
                "* LIST ({}) {} {}",
                attributes,
                quoted_delimiter,
                quote(&mailbox.name)
            ))?;
        }
        self.line(&format!("{} OK LIST completed", tag))
    }

    fn select(&mut self, tag: &str, args: &[String], read_only: bool) -> io::Result<()> {
        let name = args.first().cloned().unwrap_or_default();
        let exists = {
            let store = self.store.lock().unwrap();
            store
                .get(&name)
                .filter(|m| m.selectable)
                .map(|m| m.messages.len())
        };
        let Some(exists) = exists else {
            self.selected = None;
            return self.line(&format!("{} NO Mailbox doesn't exist: {}", tag, name));
        };

        self.line("* FLAGS (\\Answered \\Flagged \\Deleted \\Seen \\Draft)")?;
        self.line(&format!("* {} EXISTS", exists))?;
        self.line("* 0 RECENT")?;
        self.line("* OK [UIDVALIDITY 1] UIDs valid")?;
        self.line(&format!("* OK [UIDNEXT {}] Predicted next UID", exists + 1))?;
        self.selected = Some(name);
        let access = if read_only { "READ-ONLY" } else { "READ-WRITE" };
        self.line(&format!("{} OK [{}] Select completed", tag, access))
    }

    fn create(&mut self, tag: &str, args: &[String]) -> io::Result<()> {
        let name = args.first().cloned().unwrap_or_default();
        let reply = {
            let mut store = self.store.lock().unwrap();
            if store.refuse_create {
                format!("{} NO [NOPERM] Permission denied", tag)
            } else if store.get(&name).is_some() {
                format!("{} NO [ALREADYEXISTS] Mailbox already exists", tag)
            } else {
                store.mailboxes.push(super::store::StoredMailbox {
                    name,
                    selectable: true,
                    messages: Vec::new(),
                });
                format!("{} OK CREATE completed", tag)
            }
        };
        self.line(&reply)
    }

    fn subscribe(&mut self, tag: &str, args: &[String]) -> io::Result<()> {
        let name = args.first().cloned().unwrap_or_default();
        self.store.lock().unwrap().subscriptions.push(name);
        self.line(&format!("{} OK SUBSCRIBE completed", tag))
    }

    fn search(&mut self, tag: &str) -> io::Result<()> {
        let Some(selected) = self.selected.clone() else {
            return self.line(&format!("{} BAD No mailbox selected", tag));
        };
        let count = self.store.lock().unwrap().messages(&selected).len();
        let ids: Vec<String> = (1..=count).map(|i| i.to_string()).collect();
        if ids.is_empty() {
            self.line("* SEARCH")?;
        } else {
            self.line(&format!("* SEARCH {}", ids.join(" ")))?;
        }
        self.line(&format!("{} OK SEARCH completed", tag))
    }

    fn fetch(&mut self, tag: &str, args: &[String]) -> io::Result<()> {
        let Some(selected) = self.selected.clone() else {
            return self.line(&format!("{} BAD No mailbox selected", tag));
        };
        let n = args.first().and_then(|n| n.parse::<usize>().ok()).unwrap_or(0);
        let message = match n.checked_sub(1) {
            Some(i) => {
                let store = self.store.lock().unwrap();
                store.messages(&selected).get(i).cloned()
            }
            None => None,
        };
        let Some(message) = message else {
            return self.line(&format!("{} NO No such message", tag));
        };

        let mut response = format!("* {} FETCH (FLAGS ({})", n, message.flags.join(" "));
        if let Some(ref date) = message.internal_date {
            response.push_str(&format!(" INTERNALDATE \"{}\"", date));
        }
        response.push_str(&format!(" BODY[] {{{}}}\r\n", message.body.len()));
        let mut bytes = response.into_bytes();
        bytes.extend_from_slice(&message.body);
        bytes.extend_from_slice(b")\r\n");
        self.send(&bytes)?;
        self.line(&format!("{} OK FETCH completed", tag))
    }

    fn append(&mut self, tag: &str, args: &[String]) -> io::Result<()> {
        if args.len() < 2 {
            return self.line(&format!("{} BAD Missing arguments", tag));
        }
        let name = args[0].clone();
        let size = args
            .last()
            .and_then(|l| l.strip_prefix('{'))
            .and_then(|l| l.strip_suffix('}'))
            .and_then(|l| l.parse::<usize>().ok());
        let Some(size) = size else {
            return self.line(&format!("{} BAD Missing literal", tag));
        };

        let (exists, over_quota) = {
            let store = self.store.lock().unwrap();
            let held = store.get(&name).map(|m| m.messages.len());
            (
                held.is_some(),
                matches!((held, store.quota), (Some(held), Some(quota)) if held >= quota),
            )
        };
        if !exists {
            return self.line(&format!("{} NO [TRYCREATE] Mailbox doesn't exist", tag));
        }

        self.line("+ Ready for literal data")?;
        let mut body = vec![0; size];
        self.reader.read_exact(&mut body)?;
        let mut crlf = String::new();
        self.reader.read_line(&mut crlf)?;

        if over_quota {
            return self.line(&format!("{} NO [OVERQUOTA] Quota exceeded", tag));
        }

        let mut flags = Vec::new();
        let mut internal_date = None;
        for arg in &args[1..args.len() - 1] {
            if let Some(list) = arg.strip_prefix('(').and_then(|a| a.strip_suffix(')')) {
                flags = list.split_whitespace().map(str::to_string).collect();
            } else {
                internal_date = Some(arg.clone());
            }
        }

        let uid = {
            let mut store = self.store.lock().unwrap();
            let mailbox = store.get_mut(&name).expect("checked above");
            mailbox.messages.push(StoredMessage {
                flags,
                internal_date,
                body,
            });
            mailbox.messages.len()
        };
        self.line(&format!("{} OK [APPENDUID 1 {}] APPEND completed", tag, uid))
    }
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Split command arguments into quoted strings (unquoted), parenthesised lists (kept with their
/// parentheses) and atoms.
fn split_args(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut chars = s.chars().peekable();
    loop {
        while chars.peek() == Some(&' ') {
            chars.next();
        }
        let Some(&c) = chars.peek() else { break };
        let mut arg = String::new();
        match c {
            '"' => {
                chars.next();
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => arg.extend(chars.next()),
                        '"' => break,
                        c => arg.push(c),
                    }
                }
            }
            '(' => {
                let mut depth = 0;
                for c in chars.by_ref() {
                    arg.push(c);
                    match c {
                        '(' => depth += 1,
                        ')' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                }
            }
            _ => {
                while let Some(&c) = chars.peek() {
                    if c == ' ' {
                        break;
                    }
                    arg.push(c);
                    chars.next();
                }
            }
        }
        out.push(arg);
    }
    out
}

/// `LIST` pattern matching: `*` matches anything, `%` anything but the delimiter.
fn glob(pattern: &[u8], name: &[u8], delimiter: Option<char>) -> bool {
    match pattern.split_first() {
        None => name.is_empty(),
        Some((b'*', rest)) => (0..=name.len()).any(|i| glob(rest, &name[i..], delimiter)),
        Some((b'%', rest)) => {
            for i in 0..=name.len() {
                if glob(rest, &name[i..], delimiter) {
                    return true;
                }
                if i < name.len() && delimiter == Some(name[i] as char) {
                    return false;
                }
            }
            false
        }
        Some((c, rest)) => name.first() == Some(c) && glob(rest, &name[1..], delimiter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_are_split() {
        assert_eq!(
            split_args(r#""Archive/My \"Box\"" (\Seen \Flagged) "01-Mar-2021 10:00:00 +0000" {12}"#),
            vec![
                "Archive/My \"Box\"",
                "(\\Seen \\Flagged)",
                "01-Mar-2021 10:00:00 +0000",
                "{12}",
            ]
        );
    }

    #[test]
    fn list_patterns() {
        assert!(glob(b"*", b"INBOX/Work", Some('/')));
        assert!(glob(b"INBOX/%", b"INBOX/Work", Some('/')));
        assert!(!glob(b"INBOX/%", b"INBOX/Work/2020", Some('/')));
        assert!(!glob(b"INBOX/%", b"INBOX", Some('/')));
        assert!(glob(b"%", b"INBOX", Some('/')));
        assert!(!glob(b"%", b"INBOX/Work", Some('/')));
    }
}
