//! Blocking in-process IMAP server for end-to-end tests.
//!
//! It speaks just the commands a copy uses, over plain TCP:
//!
//! greeting -> LOGIN -> LIST / SELECT / EXAMINE / CREATE / SUBSCRIBE / SEARCH / FETCH / APPEND
//! -> CLOSE -> LOGOUT
//!
//! - `server` -- TCP listener, one thread per connection, command dispatch
//! - `store` -- the mailboxes a server holds, with a builder for fixtures

#![allow(dead_code)]

mod server;
pub mod store;

pub use server::FakeImapServer;
pub use store::StoreBuilder;
