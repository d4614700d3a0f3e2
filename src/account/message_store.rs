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

//! The ordered collection of messages and UID allocation.
//!
//! Nothing here knows about flags or sequence numbers; see `flag_table` and
//! `sequence_index` for those.

use std::sync::Arc;

use chrono::prelude::*;

use super::model::*;
use crate::support::error::Error;

#[derive(Debug)]
pub struct MessageStore {
    /// Live messages, sorted ascending by UID.
    ///
    /// New messages always get the greatest UID so far, so appending keeps
    /// this sorted without any extra work.
    messages: Vec<Arc<Message>>,
    /// The UID the next append will receive, or `None` once the UID space
    /// is used up.
    next_uid: Option<Uid>,
}

impl Default for MessageStore {
    fn default() -> Self {
        MessageStore {
            messages: Vec::new(),
            next_uid: Some(Uid::MIN),
        }
    }
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `raw` as a new message at the tail and return its UID.
    ///
    /// The only failure is running out of UIDs, in which case nothing is
    /// changed.
    pub fn append(
        &mut self,
        raw: Arc<[u8]>,
        internal_date: DateTime<Utc>,
    ) -> Result<Uid, Error> {
        let uid = self.next_uid.ok_or(Error::MailboxFull)?;
        self.next_uid = uid.next();
        self.messages.push(Arc::new(Message {
            uid,
            raw,
            internal_date,
        }));
        Ok(uid)
    }

    pub fn get(&self, uid: Uid) -> Result<&Arc<Message>, Error> {
        self.position(uid).map(|ix| &self.messages[ix])
    }

    /// Return a point-in-time snapshot of all live messages, ascending by
    /// UID.
    ///
    /// The snapshot shares message bodies with the store but is otherwise
    /// independent of it; later removals do not affect it.
    pub fn list_ascending_by_uid(&self) -> Vec<Arc<Message>> {
        self.messages.clone()
    }

    /// Permanently remove the message with the given UID.
    pub fn remove(&mut self, uid: Uid) -> Result<Arc<Message>, Error> {
        let ix = self.position(uid)?;
        Ok(self.messages.remove(ix))
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The UID the next append will be assigned.
    pub fn next_uid(&self) -> Option<Uid> {
        self.next_uid
    }

    /// The greatest UID of any live message.
    pub fn max_uid(&self) -> Option<Uid> {
        self.messages.last().map(|m| m.uid)
    }

    fn position(&self, uid: Uid) -> Result<usize, Error> {
        self.messages
            .binary_search_by_key(&uid, |m| m.uid)
            .map_err(|_| Error::NxMessage)
    }
}
