//-
// Copyright (c) 2024, The Localmail Developers
//
// This file is part of Localmail.
//
// Localmail is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Localmail is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along with
// Localmail. If not, see <http://www.gnu.org/licenses/>.

//! The IMAP-facing account surface.
//!
//! An IMAP library drives a logged-in session through an `Account`, which
//! answers the mailbox-management commands, and through the `Mailbox` it
//! gets back from `select`. There is exactly one mailbox, shared by every
//! account, so most management commands have nothing to do, but they still
//! have to answer rather than fail.

use std::sync::Arc;

use log::info;

use super::mailbox::{Mailbox, INBOX};
use super::model::*;
use crate::support::error::Error;

/// Mailbox-management capabilities a logged-in IMAP session needs.
pub trait Account {
    /// List the mailboxes matching `pattern` under `reference`.
    fn list_mailboxes(
        &self,
        reference: &str,
        pattern: &str,
    ) -> Vec<(String, Arc<Mailbox>)>;

    /// Open the mailbox at `path` for reading (and writing if `read_write`).
    fn select(&self, path: &str, read_write: bool)
        -> Result<Arc<Mailbox>, Error>;

    fn create(&self, path: &str) -> Result<(), Error>;

    fn delete(&self, path: &str) -> Result<(), Error>;

    fn rename(&self, old_name: &str, new_name: &str) -> Result<(), Error>;

    fn is_subscribed(&self, path: &str) -> bool;

    fn subscribe(&self, path: &str) -> Result<bool, Error>;

    fn unsubscribe(&self, path: &str) -> Result<bool, Error>;
}

/// An account whose every path resolves to the same shared INBOX.
#[derive(Clone, Debug)]
pub struct InboxAccount {
    user: Option<String>,
    mailbox: Arc<Mailbox>,
}

impl InboxAccount {
    pub fn new(user: Option<String>, mailbox: Arc<Mailbox>) -> Self {
        InboxAccount { user, mailbox }
    }

    /// The name the session logged in with, or `None` if anonymous.
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }
}

impl Account for InboxAccount {
    fn list_mailboxes(
        &self,
        _reference: &str,
        _pattern: &str,
    ) -> Vec<(String, Arc<Mailbox>)> {
        vec![(INBOX.to_owned(), Arc::clone(&self.mailbox))]
    }

    fn select(
        &self,
        _path: &str,
        _read_write: bool,
    ) -> Result<Arc<Mailbox>, Error> {
        Ok(Arc::clone(&self.mailbox))
    }

    fn create(&self, _path: &str) -> Result<(), Error> {
        Ok(())
    }

    fn delete(&self, _path: &str) -> Result<(), Error> {
        Err(Error::PermissionDenied)
    }

    fn rename(&self, _old_name: &str, _new_name: &str) -> Result<(), Error> {
        Ok(())
    }

    fn is_subscribed(&self, _path: &str) -> bool {
        true
    }

    fn subscribe(&self, _path: &str) -> Result<bool, Error> {
        Ok(true)
    }

    fn unsubscribe(&self, _path: &str) -> Result<bool, Error> {
        Ok(true)
    }
}

/// Credentials as presented by a client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Credentials {
    Anonymous,
    Password { user: String, password: String },
}

/// Hands out accounts to anyone who asks.
///
/// Any user name and password is accepted, as is anonymous access. Whether
/// a protocol requires a login at all before touching the mailbox is up to
/// the protocol layer.
#[derive(Clone, Debug)]
pub struct Realm {
    mailbox: Arc<Mailbox>,
}

impl Realm {
    pub fn new(mailbox: Arc<Mailbox>) -> Self {
        Realm { mailbox }
    }

    pub fn authenticate(&self, credentials: Credentials) -> InboxAccount {
        let user = match credentials {
            Credentials::Anonymous => None,
            Credentials::Password { user, .. } => Some(user),
        };
        info!(
            "Accepted login for {}",
            user.as_deref().unwrap_or("anonymous")
        );
        InboxAccount::new(user, Arc::clone(&self.mailbox))
    }

    pub fn login(&self, user: &str, password: &str) -> InboxAccount {
        self.authenticate(Credentials::Password {
            user: user.to_owned(),
            password: password.to_owned(),
        })
    }

    pub fn mailbox(&self) -> &Arc<Mailbox> {
        &self.mailbox
    }
}

/// Per-session selection state.
///
/// A session starts out with nothing selected. `select` may be called any
/// number of times; every message operation before the first one fails with
/// `NoMailboxSelected`.
///
/// Selecting without `read_write` is IMAP `EXAMINE`: flags cannot be stored
/// and nothing is ever expunged until the next `select`.
#[derive(Debug)]
pub struct Session<A> {
    account: A,
    selected: Option<Arc<Mailbox>>,
    read_only: bool,
}

impl<A: Account> Session<A> {
    pub fn new(account: A) -> Self {
        Session {
            account,
            selected: None,
            read_only: false,
        }
    }

    pub fn account(&self) -> &A {
        &self.account
    }

    pub fn is_selected(&self) -> bool {
        self.selected.is_some()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Select the mailbox at `path` and return its message count.
    pub fn select(
        &mut self,
        path: &str,
        read_write: bool,
    ) -> Result<usize, Error> {
        let mailbox = self.account.select(path, read_write)?;
        let exists = mailbox.exists();
        self.selected = Some(mailbox);
        self.read_only = !read_write;
        Ok(exists)
    }

    /// Leave the selected state, expunging first as IMAP `CLOSE` does
    /// unless the mailbox was selected read-only.
    pub fn close(&mut self) -> Result<(), Error> {
        let mailbox = self.selected()?;
        if !self.read_only {
            mailbox.expunge();
        }
        self.selected = None;
        Ok(())
    }

    /// Leave the selected state without expunging.
    pub fn unselect(&mut self) -> Result<(), Error> {
        self.selected()?;
        self.selected = None;
        Ok(())
    }

    pub fn fetch(
        &self,
        set: &str,
        by_uid: bool,
    ) -> Result<Vec<FetchedMessage>, Error> {
        self.selected()?.fetch(set, by_uid)
    }

    pub fn store(
        &self,
        set: &str,
        by_uid: bool,
        flags: &[Flag],
        mode: StoreMode,
    ) -> Result<Vec<FlagUpdate>, Error> {
        self.writable()?.store(set, by_uid, flags, mode)
    }

    pub fn search(
        &self,
        query: &str,
        by_uid: bool,
    ) -> Result<Vec<u32>, Error> {
        self.selected()?.search(query, by_uid)
    }

    pub fn expunge(&self) -> Result<Vec<Seqnum>, Error> {
        Ok(self.writable()?.expunge())
    }

    fn selected(&self) -> Result<&Arc<Mailbox>, Error> {
        self.selected.as_ref().ok_or(Error::NoMailboxSelected)
    }

    fn writable(&self) -> Result<&Arc<Mailbox>, Error> {
        let mailbox = self.selected()?;
        if self.read_only {
            Err(Error::MailboxReadOnly)
        } else {
            Ok(mailbox)
        }
    }
}
