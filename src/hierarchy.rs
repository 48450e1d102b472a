//! Walking a mailbox pair's whole subtree, one pair per mailbox.
//!
//! Source paths are split on the source server's delimiter and destination paths are joined with
//! the destination server's, so a tree can move between servers that disagree on the separator.

use std::io::{Read, Write};
use tracing::{debug, warn};

use crate::client::Client;
use crate::config::MailboxPair;
use crate::error::Result;
use crate::types::Name;

/// No real hierarchy is this deep; anything deeper is a server listing a mailbox below itself.
pub const MAX_DEPTH: usize = 32;

/// A mailbox found below another one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Child {
    /// Where it is copied from and to.
    pub pair: MailboxPair,
    /// `false` for `\Noselect` containers, which are descended into but hold no messages.
    pub selectable: bool,
}

/// The segments of `path`. Without a delimiter the whole path is a single segment.
pub fn split_path(path: &str, delimiter: Option<char>) -> Vec<&str> {
    match delimiter {
        Some(d) => path.split(d).collect(),
        None => vec![path],
    }
}

/// `parent` extended by one segment. A child of the empty path is just the segment.
pub fn join_path(parent: &str, segment: &str, delimiter: char) -> String {
    if parent.is_empty() {
        segment.to_string()
    } else {
        format!("{}{}{}", parent, delimiter, segment)
    }
}

/// The delimiter to build destination paths with.
///
/// Falls back to the source delimiter for flat destinations, which then get literal separators
/// inside their mailbox names.
pub fn destination_delimiter(source: Option<char>, destination: Option<char>) -> Option<char> {
    match (source, destination) {
        (_, Some(d)) => Some(d),
        (Some(s), None) => {
            warn!(
                "destination reported no hierarchy delimiter, using the source's {:?}",
                s
            );
            Some(s)
        }
        (None, None) => None,
    }
}

/// The list pattern for the mailboxes directly below `parent`.
fn child_pattern(parent: &str, delimiter: char) -> String {
    if parent.is_empty() {
        "%".to_string()
    } else {
        format!("{}{}%", parent, delimiter)
    }
}

/// Pick the direct children of `parent` out of a listing, and work out their destinations.
///
/// Names that are not exactly one level below the parent are ignored, as is the parent itself,
/// which some servers include in the answer to `LIST "" "parent/%"`.
pub fn child_pairs(
    names: &[Name],
    parent: &MailboxPair,
    source_delimiter: Option<char>,
    destination_delimiter: Option<char>,
) -> Vec<Child> {
    let src = match source_delimiter {
        Some(d) => d,
        None => return Vec::new(),
    };
    let dst = destination_delimiter.unwrap_or(src);

    let (prefix, depth) = if parent.source.is_empty() {
        (String::new(), 0)
    } else {
        (
            format!("{}{}", parent.source, src),
            split_path(&parent.source, Some(src)).len(),
        )
    };

    names
        .iter()
        .filter(|name| name.name() != parent.source && name.name().starts_with(&prefix))
        .filter_map(|name| {
            let segments = split_path(name.name(), Some(src));
            if segments.len() != depth + 1 {
                return None;
            }
            let segment = segments.last()?;
            if segment.is_empty() {
                return None;
            }
            Some(Child {
                pair: MailboxPair::new(
                    name.name(),
                    join_path(&parent.destination, segment, dst),
                ),
                selectable: name.is_selectable(),
            })
        })
        .collect()
}

/// List and pair up the mailboxes directly below `parent` on the source.
pub fn children<T: Read + Write>(
    source: &mut Client<T>,
    parent: &MailboxPair,
    destination_delimiter: Option<char>,
) -> Result<Vec<Child>> {
    let delimiter = match source.delimiter() {
        Some(d) => d,
        None => {
            debug!("source namespace is flat, {} has no children", parent.source);
            return Ok(Vec::new());
        }
    };
    let names = source.list("", &child_pattern(&parent.source, delimiter))?;
    Ok(child_pairs(
        &names,
        parent,
        Some(delimiter),
        destination_delimiter,
    ))
}

/// Visit `root` and then every mailbox below it, parents before their children, depth first and
/// siblings in the order the server lists them.
///
/// A mailbox is visited before its children are listed, so `visit` is done with a mailbox before
/// the walk asks the server what lies below it. An empty source path only stands for the top of
/// the hierarchy and is not visited itself, and neither are `\Noselect` containers.
pub fn walk<T, F>(
    source: &mut Client<T>,
    root: &MailboxPair,
    destination_delimiter: Option<char>,
    mut visit: F,
) -> Result<()>
where
    T: Read + Write,
    F: FnMut(&mut Client<T>, &MailboxPair) -> Result<()>,
{
    if !root.source.is_empty() {
        visit(source, root)?;
    }
    descend(source, root, destination_delimiter, 0, &mut visit)
}

fn descend<T, F>(
    source: &mut Client<T>,
    parent: &MailboxPair,
    destination_delimiter: Option<char>,
    depth: usize,
    visit: &mut F,
) -> Result<()>
where
    T: Read + Write,
    F: FnMut(&mut Client<T>, &MailboxPair) -> Result<()>,
{
    if depth >= MAX_DEPTH {
        warn!(
            "not descending below {}: more than {} levels deep",
            parent.source, MAX_DEPTH
        );
        return Ok(());
    }

    for child in children(source, parent, destination_delimiter)? {
        if child.selectable {
            visit(source, &child.pair)?;
        } else {
            debug!("{} can not hold messages, only descending", child.pair.source);
        }
        descend(source, &child.pair, destination_delimiter, depth + 1, visit)?;
    }
    Ok(())
}
