//! Decoding of server responses.
//!
//! Everything the client reads before the tagged completion line is handed to one of the
//! `parse_*` functions below. They all go through the same tokenizer, so quoted strings, `NIL`,
//! counted literals and nested lists are understood wherever they appear. Anything that does not
//! tokenize is skipped line by line rather than failing the whole response; a response only
//! fails to parse when it does not even end in a line break.

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone};
use lazy_static::lazy_static;
use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take, take_until, take_while1},
    character::complete::{char, crlf, digit1, space0, space1},
    combinator::{map, map_res},
    multi::separated_list0,
    sequence::{delimited, preceded, terminated, tuple},
    IResult,
};
use regex::Regex;
use std::str;
use tracing::{debug, warn};

use super::error::{Error, ParseError, Result};
use super::types::*;

lazy_static! {
    static ref LITERAL_RE: regex::bytes::Regex =
        regex::bytes::Regex::new(r"\{(\d+)\}\r\n$").unwrap();
    static ref INTERNALDATE_RE: Regex = Regex::new(
        r"^ ?(\d{1,2})-([A-Za-z]{3})-(\d{4}) (\d{2}):(\d{2}):(\d{2}) ([+-])(\d{2})(\d{2})$"
    )
    .unwrap();
    static ref UIDVALIDITY_RE: Regex = Regex::new(r"(?i)^UIDVALIDITY (\d+)$").unwrap();
    static ref UIDNEXT_RE: Regex = Regex::new(r"(?i)^UIDNEXT (\d+)$").unwrap();
    static ref APPENDUID_RE: Regex = Regex::new(r"(?i)^APPENDUID (\d+) (\d+)$").unwrap();
}

/// Zones further out than this are not in use anywhere; treat them as a mangled timestamp.
const MAX_ZONE_HOURS: i32 = 14;

/// A single syntactic element of a response line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Token<'a> {
    Atom(&'a str),
    Quoted(String),
    Literal(&'a [u8]),
    Nil,
    List(Vec<Token<'a>>),
}

impl<'a> Token<'a> {
    fn as_atom(&self) -> Option<&'a str> {
        match *self {
            Token::Atom(a) => Some(a),
            _ => None,
        }
    }

    fn as_number(&self) -> Option<u32> {
        self.as_atom().and_then(|a| a.parse().ok())
    }

    /// The value of an `astring` or `nstring`: atoms, quoted strings and literals.
    fn as_string(&self) -> Option<String> {
        match *self {
            Token::Atom(a) => Some(a.to_string()),
            Token::Quoted(ref s) => Some(s.clone()),
            Token::Literal(l) => Some(String::from_utf8_lossy(l).into_owned()),
            _ => None,
        }
    }
}

/// Completion state of a command, or of an untagged status response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Status {
    Ok,
    No,
    Bad,
    PreAuth,
    Bye,
}

/// A parsed `OK`/`NO`/`BAD`/`PREAUTH`/`BYE` line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct StatusLine {
    pub(crate) status: Status,
    /// The bracketed response code, without the brackets.
    pub(crate) code: Option<String>,
    pub(crate) information: String,
}

impl StatusLine {
    /// Turn a failed completion into the matching error.
    pub(crate) fn into_result(self) -> Result<StatusLine> {
        let explain = |s: &StatusLine| {
            if s.information.is_empty() {
                "no explanation given".to_string()
            } else {
                s.information.clone()
            }
        };
        match self.status {
            Status::Ok | Status::PreAuth => Ok(self),
            Status::No => Err(Error::No(explain(&self))),
            Status::Bad => Err(Error::Bad(explain(&self))),
            Status::Bye => Err(Error::ConnectionLost),
        }
    }

    pub(crate) fn has_code(&self, name: &str) -> bool {
        self.code
            .as_deref()
            .map(|c| c.split(' ').next() == Some(name) || c.eq_ignore_ascii_case(name))
            .unwrap_or(false)
    }
}

/// One untagged response.
#[derive(Debug, PartialEq, Eq)]
enum Response<'a> {
    Status(StatusLine),
    List(Name),
    Search(Vec<Seq>),
    Fetch(Seq, Vec<Token<'a>>),
    Exists(u32),
    Recent(u32),
    Flags(Vec<Flag>),
    Other(Vec<Token<'a>>),
    Unparsed(&'a [u8]),
}

fn is_atom_char(c: u8) -> bool {
    c > 0x20 && c != 0x7f && !matches!(c, b'(' | b')' | b'{' | b'"')
}

fn atom(i: &[u8]) -> IResult<&[u8], Token<'_>> {
    map(map_res(take_while1(is_atom_char), str::from_utf8), |a: &str| {
        if a.eq_ignore_ascii_case("NIL") {
            Token::Nil
        } else {
            Token::Atom(a)
        }
    })(i)
}

fn quoted(i: &[u8]) -> IResult<&[u8], String> {
    let (mut rest, _) = char('"')(i)?;
    let mut out = Vec::new();
    loop {
        match rest.split_first() {
            Some((b'"', r)) => {
                return Ok((r, String::from_utf8_lossy(&out).into_owned()));
            }
            Some((b'\\', r)) => match r.split_first() {
                Some((c, r)) => {
                    out.push(*c);
                    rest = r;
                }
                None => break,
            },
            Some((b'\r', _)) | Some((b'\n', _)) | None => break,
            Some((c, r)) => {
                out.push(*c);
                rest = r;
            }
        }
    }
    Err(nom::Err::Error(nom::error::Error::new(
        i,
        nom::error::ErrorKind::Escaped,
    )))
}

fn number(i: &[u8]) -> IResult<&[u8], u32> {
    map_res(map_res(digit1, str::from_utf8), str::parse::<u32>)(i)
}

fn literal(i: &[u8]) -> IResult<&[u8], &[u8]> {
    let (i, len) = delimited(char('{'), number, tuple((char('}'), crlf)))(i)?;
    take(len)(i)
}

fn list(i: &[u8]) -> IResult<&[u8], Vec<Token<'_>>> {
    delimited(
        terminated(char('('), space0),
        separated_list0(space1, token),
        preceded(space0, char(')')),
    )(i)
}

fn token(i: &[u8]) -> IResult<&[u8], Token<'_>> {
    alt((
        map(list, Token::List),
        map(quoted, Token::Quoted),
        map(literal, Token::Literal),
        atom,
    ))(i)
}

fn status(i: &[u8]) -> IResult<&[u8], Status> {
    alt((
        map(tag_no_case("OK"), |_| Status::Ok),
        map(tag_no_case("NO"), |_| Status::No),
        map(tag_no_case("BAD"), |_| Status::Bad),
        map(tag_no_case("PREAUTH"), |_| Status::PreAuth),
        map(tag_no_case("BYE"), |_| Status::Bye),
    ))(i)
}

fn rest_of_line(i: &[u8]) -> IResult<&[u8], &[u8]> {
    terminated(take_until("\r\n"), crlf)(i)
}

/// `OK [CODE args] human readable text\r\n`, after the tag.
fn status_tail(i: &[u8]) -> IResult<&[u8], StatusLine> {
    let (i, status) = status(i)?;
    let (i, text) = alt((
        preceded(char(' '), rest_of_line),
        terminated(take(0usize), crlf),
    ))(i)?;
    let text = String::from_utf8_lossy(text);
    let text = text.trim();

    let (code, information) = match text.strip_prefix('[').and_then(|t| t.split_once(']')) {
        Some((code, info)) => (Some(code.to_string()), info.trim().to_string()),
        None => (None, text.to_string()),
    };

    Ok((
        i,
        StatusLine {
            status,
            code,
            information,
        },
    ))
}

fn untagged_status(i: &[u8]) -> IResult<&[u8], Response<'_>> {
    map(preceded(tag("* "), status_tail), Response::Status)(i)
}

fn untagged_data(i: &[u8]) -> IResult<&[u8], Response<'_>> {
    map(
        delimited(
            tag("* "),
            separated_list0(space1, token),
            terminated(space0, crlf),
        ),
        classify,
    )(i)
}

fn unparsed(i: &[u8]) -> IResult<&[u8], Response<'_>> {
    map(rest_of_line, Response::Unparsed)(i)
}

fn response(i: &[u8]) -> IResult<&[u8], Response<'_>> {
    alt((untagged_status, untagged_data, unparsed))(i)
}

fn classify(mut tokens: Vec<Token<'_>>) -> Response<'_> {
    let first = tokens.first().and_then(Token::as_atom).unwrap_or("");

    if first.eq_ignore_ascii_case("LIST") {
        if let Some(name) = name_from_tokens(&tokens[1..]) {
            return Response::List(name);
        }
    } else if first.eq_ignore_ascii_case("SEARCH") {
        return Response::Search(tokens[1..].iter().filter_map(Token::as_number).collect());
    } else if first.eq_ignore_ascii_case("FLAGS") {
        if let Some(Token::List(flags)) = tokens.get(1) {
            return Response::Flags(flags_from_tokens(flags));
        }
    } else if let Some(n) = tokens.first().and_then(Token::as_number) {
        let kind = tokens
            .get(1)
            .and_then(Token::as_atom)
            .map(str::to_ascii_uppercase);
        match kind.as_deref() {
            Some("EXISTS") => return Response::Exists(n),
            Some("RECENT") => return Response::Recent(n),
            Some("FETCH") if matches!(tokens.get(2), Some(Token::List(_))) => {
                if let Some(Token::List(items)) = tokens.pop() {
                    return Response::Fetch(n, items);
                }
            }
            _ => {}
        }
    }

    Response::Other(tokens)
}

fn name_from_tokens(tokens: &[Token<'_>]) -> Option<Name> {
    let (attributes, delimiter, name) = match tokens {
        [Token::List(attrs), delim, name] => (attrs, delim, name),
        _ => return None,
    };

    let delimiter = match *delimiter {
        Token::Nil => None,
        ref d => d.as_string().and_then(|d| d.chars().next()),
    };

    Some(Name {
        attributes: attributes
            .iter()
            .filter_map(Token::as_atom)
            .map(NameAttribute::from)
            .collect(),
        delimiter,
        name: name.as_string()?,
    })
}

fn flags_from_tokens(tokens: &[Token<'_>]) -> Vec<Flag> {
    tokens.iter().filter_map(Token::as_atom).map(Flag::from).collect()
}

fn parse_many(lines: &[u8]) -> Result<Vec<Response<'_>>> {
    let mut lines = lines;
    let mut responses = Vec::new();
    while !lines.is_empty() {
        match response(lines) {
            Ok((rest, resp)) => {
                if let Response::Unparsed(line) = resp {
                    debug!("skipping unparseable response: {}", String::from_utf8_lossy(line));
                }
                responses.push(resp);
                lines = rest;
            }
            Err(_) => return Err(Error::Parse(ParseError::Invalid(lines.to_vec()))),
        }
    }
    Ok(responses)
}

/// Parse the tagged (or untagged) completion line of a command.
///
/// Returns the tag (`*` for untagged lines) and the status.
pub(crate) fn parse_status_line(line: &[u8]) -> Option<(String, StatusLine)> {
    let parsed: IResult<&[u8], (&[u8], StatusLine)> =
        tuple((terminated(take_while1(is_atom_char), char(' ')), status_tail))(line);
    match parsed {
        Ok((_, (tag, status))) => Some((String::from_utf8_lossy(tag).into_owned(), status)),
        Err(_) => None,
    }
}

/// If a response line announces a literal (`{n}\r\n` at its very end), the size of it.
pub(crate) fn literal_len(line: &[u8]) -> Option<usize> {
    LITERAL_RE
        .captures(line)
        .and_then(|cap| cap.get(1))
        .and_then(|n| str::from_utf8(n.as_bytes()).ok())
        .and_then(|n| n.parse().ok())
}

/// Parse the names returned by a `LIST` command.
pub(crate) fn parse_names(lines: &[u8]) -> Result<Vec<Name>> {
    Ok(parse_many(lines)?
        .into_iter()
        .filter_map(|resp| match resp {
            Response::List(name) => Some(name),
            _ => None,
        })
        .collect())
}

/// Parse the message numbers returned by a `SEARCH` command, in ascending order.
pub(crate) fn parse_ids(lines: &[u8]) -> Result<Vec<Seq>> {
    let mut ids: Vec<Seq> = parse_many(lines)?
        .into_iter()
        .filter_map(|resp| match resp {
            Response::Search(ids) => Some(ids),
            _ => None,
        })
        .flatten()
        .collect();
    ids.sort_unstable();
    ids.dedup();
    Ok(ids)
}

/// Parse the response to `FETCH <message> (FLAGS INTERNALDATE BODY.PEEK[])`.
///
/// Servers are free to order the items as they like, and to split them over several `FETCH`
/// responses (for instance an unsolicited flag update before the one carrying the body), so
/// every `FETCH` for `message` is scanned for the items by name. Items that are missing, or that
/// carry a value of the wrong shape, come back as `None`.
pub(crate) fn parse_fetch(lines: &[u8], message: Seq) -> Result<MessageRecord> {
    let mut flags = None;
    let mut internal_date = None;
    let mut payload = None;

    for resp in parse_many(lines)? {
        let items = match resp {
            Response::Fetch(n, items) if n == message => items,
            _ => continue,
        };

        let mut items = items.iter();
        while let Some(item) = items.next() {
            let name = match item.as_atom() {
                Some(name) => name.to_ascii_uppercase(),
                None => continue,
            };
            let value = match items.next() {
                Some(v) => v,
                None => break,
            };

            match (name.as_str(), value) {
                ("FLAGS", Token::List(list)) => flags = Some(flags_from_tokens(list)),
                ("INTERNALDATE", Token::Quoted(date)) => {
                    internal_date = parse_internal_date(date);
                    if internal_date.is_none() {
                        warn!(
                            "ignoring malformed INTERNALDATE {:?} of message {}",
                            date, message
                        );
                    }
                }
                ("RFC822", v) | ("BODY[]", v) => match *v {
                    Token::Literal(l) => payload = Some(l.to_vec()),
                    Token::Quoted(ref q) => payload = Some(q.clone().into_bytes()),
                    _ => {}
                },
                _ => {}
            }
        }
    }

    Ok(MessageRecord {
        message,
        flags,
        internal_date,
        payload: payload.ok_or(ParseError::MissingPayload(message))?,
    })
}

/// Parse the untagged data of a `SELECT` or `EXAMINE`, plus the code of its completion.
pub(crate) fn parse_mailbox(lines: &[u8], done: &StatusLine) -> Result<Mailbox> {
    let mut mailbox = Mailbox {
        read_only: done.has_code("READ-ONLY"),
        ..Mailbox::default()
    };

    for resp in parse_many(lines)? {
        match resp {
            Response::Exists(n) => mailbox.exists = n,
            Response::Recent(n) => mailbox.recent = n,
            Response::Flags(flags) => mailbox.flags = flags,
            Response::Status(StatusLine {
                code: Some(code), ..
            }) => {
                if let Some(cap) = UIDVALIDITY_RE.captures(&code) {
                    mailbox.uid_validity = cap[1].parse().ok();
                } else if let Some(cap) = UIDNEXT_RE.captures(&code) {
                    mailbox.uid_next = cap[1].parse().ok();
                } else if let Some(flags) = code
                    .strip_prefix("PERMANENTFLAGS ")
                    .and_then(|f| f.strip_prefix('('))
                    .and_then(|f| f.strip_suffix(')'))
                {
                    mailbox.permanent_flags = flags.split_whitespace().map(Flag::from).collect();
                }
            }
            _ => {}
        }
    }

    Ok(mailbox)
}

/// Pull the `APPENDUID` code out of the completion of an `APPEND`, if the server sent one.
pub(crate) fn parse_appended(done: &StatusLine) -> Appended {
    done.code
        .as_deref()
        .and_then(|code| APPENDUID_RE.captures(code))
        .map(|cap| Appended {
            uid_validity: cap[1].parse().ok(),
            uid: cap[2].parse().ok(),
        })
        .unwrap_or_default()
}

/// Parse an IMAP `date-time`, e.g. `17-Jul-1996 02:44:25 -0700`.
///
/// Anything that does not validate, including zone offsets no real zone uses, is rejected
/// rather than repaired.
pub fn parse_internal_date(s: &str) -> Option<DateTime<FixedOffset>> {
    let cap = INTERNALDATE_RE.captures(s)?;
    let num = |i: usize| cap[i].parse::<u32>().ok();

    let month = match cap[2].to_ascii_lowercase().as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    let year = cap[3].parse::<i32>().ok()?;
    let local = NaiveDate::from_ymd_opt(year, month, num(1)?)?.and_hms_opt(
        num(4)?,
        num(5)?,
        num(6)?,
    )?;

    let hours = cap[8].parse::<i32>().ok()?;
    let minutes = cap[9].parse::<i32>().ok()?;
    if hours > MAX_ZONE_HOURS || minutes >= 60 {
        return None;
    }
    let mut offset = hours * 3600 + minutes * 60;
    if &cap[7] == "-" {
        offset = -offset;
    }

    FixedOffset::east_opt(offset)?
        .from_local_datetime(&local)
        .single()
}

/// Format a timestamp as an IMAP `date-time`, without the surrounding quotes.
pub fn format_internal_date(date: &DateTime<FixedOffset>) -> String {
    date.format("%d-%b-%Y %H:%M:%S %z").to_string()
}
