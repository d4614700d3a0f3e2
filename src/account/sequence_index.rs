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

//! Translation between sequence numbers and UIDs.
//!
//! There is no persistent sequence number state anywhere. An index is
//! computed from the message store each time one is needed and discarded
//! when the operation that needed it completes, so it can never disagree
//! with the store.

use std::sync::Arc;

use super::message_store::MessageStore;
use super::model::*;
use crate::support::error::Error;

#[derive(Clone, Debug, Default)]
pub struct SequenceIndex {
    /// The UIDs of the live messages. Sequence numbers correspond (with bias
    /// 1) to the indices of this array.
    uids: Vec<Uid>,
}

impl SequenceIndex {
    /// Rank the live messages of `store` as it currently stands.
    pub fn of(store: &MessageStore) -> Self {
        Self::from_snapshot(&store.list_ascending_by_uid())
    }

    /// Rank an ascending-by-UID snapshot.
    pub fn from_snapshot(messages: &[Arc<Message>]) -> Self {
        SequenceIndex {
            uids: messages.iter().map(|m| m.uid).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.uids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uids.is_empty()
    }

    /// The sequence number `*` refers to, if any message exists.
    pub fn max_seqnum(&self) -> Option<Seqnum> {
        self.uids.len().checked_sub(1).and_then(Seqnum::from_index)
    }

    /// The greatest live UID, which is what `*` means in a UID set.
    pub fn max_uid(&self) -> Option<Uid> {
        self.uids.last().copied()
    }

    pub fn sequence_number_of(&self, uid: Uid) -> Option<Seqnum> {
        self.uids
            .binary_search(&uid)
            .ok()
            .and_then(Seqnum::from_index)
    }

    pub fn uid_of_sequence(&self, seqnum: Seqnum) -> Option<Uid> {
        self.uids.get(seqnum.to_index()).copied()
    }

    /// Iterate all live messages as `(Seqnum, Uid)` pairs in ascending
    /// order.
    pub fn seqnums_uids(&self) -> impl Iterator<Item = (Seqnum, Uid)> + '_ {
        self.uids
            .iter()
            .enumerate()
            .filter_map(|(ix, &uid)| Seqnum::from_index(ix).map(|s| (s, uid)))
    }

    /// Resolve an IMAP sequence set (or UID set if `by_uid`) against the
    /// current ranking.
    ///
    /// Elements naming sequence numbers beyond the end of the mailbox, or
    /// UIDs which were never assigned or have been expunged, are silently
    /// dropped, so the result may be empty. Only syntactically invalid sets
    /// are an error.
    ///
    /// The result is ascending by sequence number (and therefore also by
    /// UID).
    pub fn resolve(
        &self,
        raw: &str,
        by_uid: bool,
    ) -> Result<Vec<(Seqnum, Uid)>, Error> {
        let bad = || Error::BadSequenceSet(raw.to_owned());

        if by_uid {
            let set = SeqRange::<Uid>::parse(raw, self.max_uid())
                .ok_or_else(bad)?;
            Ok(self
                .seqnums_uids()
                .filter(|&(_, uid)| set.contains(uid))
                .collect())
        } else {
            let set = SeqRange::<Seqnum>::parse(raw, self.max_seqnum())
                .ok_or_else(bad)?;
            Ok(self
                .seqnums_uids()
                .filter(|&(seqnum, _)| set.contains(seqnum))
                .collect())
        }
    }
}
