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

//! The mailbox façade.
//!
//! `Mailbox` is the only thing protocol sessions and mail ingestion ever
//! touch. It owns the message store and flag table, and every operation
//! runs entirely inside one critical section so that no caller can observe
//! another caller's operation half-done. Sequence numbers are recomputed
//! from the store inside that same critical section on every call.
//!
//! When the mailbox is backed by an mbox file, appends take the file's lock
//! first and the state lock second, and the state lock is never held while
//! writing to the file.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::prelude::*;
use log::{debug, info};

use super::flag_table::FlagTable;
use super::mbox::{self, MboxWriter};
use super::message_store::MessageStore;
use super::model::*;
use super::search::{self, SearchQuery};
use super::sequence_index::SequenceIndex;
use crate::support::error::Error;

/// The name of the one and only mailbox.
pub const INBOX: &str = "INBOX";

#[derive(Debug, Default)]
struct MailboxState {
    store: MessageStore,
    flags: FlagTable,
}

#[derive(Debug, Default)]
pub struct Mailbox {
    state: Mutex<MailboxState>,
    backing: Option<Mutex<MboxWriter>>,
}

impl Mailbox {
    /// Create a new, empty mailbox with no backing file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mailbox pre-populated from the mbox file at `path`.
    ///
    /// Messages in the file are appended in file order, so the first one
    /// gets UID 1. A missing file is treated as empty. If `persist_appends`
    /// is set, every later append is also written to the end of the file.
    pub fn from_mbox(
        path: &Path,
        persist_appends: bool,
    ) -> Result<Self, Error> {
        let mut this = Self::new();
        let uids = this.prepopulate(mbox::read_messages(path)?)?;
        info!(
            "Pre-populated {} with {} message(s) from '{}'",
            INBOX,
            uids.len(),
            path.display()
        );

        if persist_appends {
            this.backing = Some(Mutex::new(MboxWriter::open(path)?));
        }

        Ok(this)
    }

    /// Append `messages` in order without writing them to any backing file.
    ///
    /// Meant to run before the mailbox is shared with any session.
    pub fn prepopulate(
        &self,
        messages: impl IntoIterator<Item = Vec<u8>>,
    ) -> Result<Vec<Uid>, Error> {
        let mut state = self.lock();
        messages
            .into_iter()
            .map(|raw| state.append(Arc::from(raw), &[], Utc::now()))
            .collect()
    }

    /// Deliver a message with no flags.
    ///
    /// `raw` is stored exactly as given, and is what `fetch` returns.
    pub fn append(&self, raw: impl Into<Arc<[u8]>>) -> Result<Uid, Error> {
        self.append_with_flags(raw, &[], Utc::now())
    }

    /// Deliver a message with an initial set of flags and a given internal
    /// date, as the IMAP `APPEND` command can.
    pub fn append_with_flags(
        &self,
        raw: impl Into<Arc<[u8]>>,
        flags: &[Flag],
        internal_date: DateTime<Utc>,
    ) -> Result<Uid, Error> {
        let raw = raw.into();

        let mut backing = self.backing.as_ref().map(|b| {
            b.lock().expect("mailbox backing file lock poisoned")
        });
        if let Some(ref mut writer) = backing {
            // Appends are serialised by the backing lock, so a UID that is
            // available now will still be available below.
            self.lock().store.next_uid().ok_or(Error::MailboxFull)?;
            writer
                .append(&raw, internal_date)
                .map_err(Error::ResourceExhausted)?;
        }

        let size = raw.len();
        let uid = self.lock().append(raw, flags, internal_date)?;
        debug!("Appended UID {} ({} bytes) to {}", uid, size, INBOX);
        Ok(uid)
    }

    /// Return the messages in `set`, interpreted as sequence numbers or, if
    /// `by_uid`, as UIDs.
    ///
    /// Numbers which do not currently name a message contribute nothing to
    /// the result.
    pub fn fetch(
        &self,
        set: &str,
        by_uid: bool,
    ) -> Result<Vec<FetchedMessage>, Error> {
        let state = self.lock();
        let index = SequenceIndex::of(&state.store);
        let hits = index.resolve(set, by_uid)?;

        Ok(hits
            .into_iter()
            .filter_map(|(seqnum, uid)| {
                let message = state.store.get(uid).ok()?;
                Some(FetchedMessage {
                    seqnum,
                    uid,
                    flags: state.flags.flags_of(uid),
                    internal_date: message.internal_date,
                    raw: Arc::clone(&message.raw),
                })
            })
            .collect())
    }

    /// Update the flags of every message in `set` and return the resulting
    /// flags of each.
    pub fn store(
        &self,
        set: &str,
        by_uid: bool,
        flags: &[Flag],
        mode: StoreMode,
    ) -> Result<Vec<FlagUpdate>, Error> {
        let mut state = self.lock();
        let index = SequenceIndex::of(&state.store);
        let hits = index.resolve(set, by_uid)?;

        let mut updates = Vec::with_capacity(hits.len());
        for (seqnum, uid) in hits {
            let result = state.flags.set_flags(uid, flags, mode)?.clone();
            updates.push(FlagUpdate {
                seqnum,
                uid,
                flags: result,
            });
        }

        debug!(
            "{:?} {:?} on {} message(s) in {}",
            mode,
            flags,
            updates.len(),
            INBOX
        );
        Ok(updates)
    }

    /// Run a textual search query; see `SearchQuery::parse`.
    ///
    /// Returns sequence numbers, or UIDs if `by_uid`, in ascending order.
    pub fn search(
        &self,
        query: &str,
        by_uid: bool,
    ) -> Result<Vec<u32>, Error> {
        let query = SearchQuery::parse(query)?;
        let hits = self.search_query(&query)?;
        Ok(hits
            .into_iter()
            .map(|(seqnum, uid)| {
                if by_uid {
                    u32::from(uid)
                } else {
                    u32::from(seqnum)
                }
            })
            .collect())
    }

    /// Run an already-parsed search query, returning both numbers of every
    /// hit.
    pub fn search_query(
        &self,
        query: &SearchQuery,
    ) -> Result<Vec<(Seqnum, Uid)>, Error> {
        let state = self.lock();
        let snapshot = state.store.list_ascending_by_uid();
        let index = SequenceIndex::from_snapshot(&snapshot);
        search::search(query, &snapshot, &index, &state.flags)
    }

    /// Permanently remove every message flagged `\Deleted`.
    ///
    /// Returns the sequence numbers of the removed messages as they were
    /// immediately before each removal, in descending order. Sent to the
    /// client one `EXPUNGE` response at a time in this order, every number
    /// stays valid while the client processes the rest.
    pub fn expunge(&self) -> Vec<Seqnum> {
        self.expunge_matching(|_| true)
    }

    /// Like `expunge`, but only considers messages whose UID is in `uids`.
    pub fn uid_expunge(&self, uids: &str) -> Result<Vec<Seqnum>, Error> {
        let mut state = self.lock();
        let index = SequenceIndex::of(&state.store);
        let in_set = index
            .resolve(uids, true)?
            .into_iter()
            .map(|(_, uid)| uid)
            .collect::<Vec<_>>();
        Ok(state.expunge(&index, |uid| in_set.binary_search(&uid).is_ok()))
    }

    fn expunge_matching(
        &self,
        filter: impl FnMut(Uid) -> bool,
    ) -> Vec<Seqnum> {
        let mut state = self.lock();
        let index = SequenceIndex::of(&state.store);
        state.expunge(&index, filter)
    }

    /// The number of messages currently in the mailbox.
    pub fn exists(&self) -> usize {
        self.lock().store.len()
    }

    /// The UID the next append will get, if any are left.
    pub fn next_uid(&self) -> Option<Uid> {
        self.lock().store.next_uid()
    }

    /// A read-only point-in-time view of the mailbox.
    pub fn summary(&self) -> MailboxSummary {
        let state = self.lock();
        let snapshot = state.store.list_ascending_by_uid();
        let index = SequenceIndex::from_snapshot(&snapshot);

        MailboxSummary {
            next_uid: state.store.next_uid(),
            messages: index
                .seqnums_uids()
                .zip(&snapshot)
                .map(|((seqnum, uid), message)| MessageSummary {
                    seqnum,
                    uid,
                    flags: state.flags.flags_of(uid),
                    size: message.size(),
                    internal_date: message.internal_date,
                })
                .collect(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MailboxState> {
        // A panic while the lock is held may have left the store and flag
        // table out of step, so poisoning is not recovered from.
        self.state.lock().expect("mailbox state lock poisoned")
    }
}

impl MailboxState {
    fn append(
        &mut self,
        raw: Arc<[u8]>,
        flags: &[Flag],
        internal_date: DateTime<Utc>,
    ) -> Result<Uid, Error> {
        let uid = self.store.append(raw, internal_date)?;
        self.flags.insert(uid);
        if !flags.is_empty() {
            self.flags.set_flags(uid, flags, StoreMode::Replace)?;
        }
        Ok(uid)
    }

    fn expunge(
        &mut self,
        index: &SequenceIndex,
        mut filter: impl FnMut(Uid) -> bool,
    ) -> Vec<Seqnum> {
        let doomed = index
            .seqnums_uids()
            .filter(|&(_, uid)| {
                self.flags.test_flag(uid, &Flag::Deleted) && filter(uid)
            })
            .collect::<Vec<_>>();

        // Highest first: removing a message shifts every higher sequence
        // number down by one, but leaves the lower ones alone.
        let mut expunged = Vec::with_capacity(doomed.len());
        for (seqnum, uid) in doomed.into_iter().rev() {
            if self.store.remove(uid).is_ok() {
                self.flags.forget(uid);
                expunged.push(seqnum);
            }
        }

        if !expunged.is_empty() {
            info!("Expunged {} message(s) from {}", expunged.len(), INBOX);
        }

        expunged
    }
}
