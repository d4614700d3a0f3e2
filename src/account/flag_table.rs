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

//! Per-message flag state, keyed by UID.

use std::collections::{BTreeSet, HashMap};

use super::model::*;
use crate::support::error::Error;

#[derive(Debug, Default)]
pub struct FlagTable {
    flags: HashMap<Uid, BTreeSet<Flag>>,
}

impl FlagTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a newly appended message with no flags.
    pub fn insert(&mut self, uid: Uid) {
        self.flags.insert(uid, BTreeSet::new());
    }

    /// Stop tracking an expunged message.
    pub fn forget(&mut self, uid: Uid) {
        self.flags.remove(&uid);
    }

    /// Apply `flags` to the message according to `mode` and return the
    /// resulting flag set.
    pub fn set_flags(
        &mut self,
        uid: Uid,
        flags: &[Flag],
        mode: StoreMode,
    ) -> Result<&BTreeSet<Flag>, Error> {
        let current = self.flags.get_mut(&uid).ok_or(Error::NxMessage)?;
        match mode {
            StoreMode::Replace => {
                *current = flags.iter().cloned().collect();
            }
            StoreMode::Add => {
                current.extend(flags.iter().cloned());
            }
            StoreMode::Remove => {
                for flag in flags {
                    current.remove(flag);
                }
            }
        }

        Ok(current)
    }

    /// Return the flags currently on the message.
    ///
    /// A UID that is not tracked has no flags.
    pub fn flags_of(&self, uid: Uid) -> BTreeSet<Flag> {
        self.flags.get(&uid).cloned().unwrap_or_default()
    }

    pub fn test_flag(&self, uid: Uid, flag: &Flag) -> bool {
        self.flags
            .get(&uid)
            .map(|f| f.contains(flag))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn set(flags: &[Flag]) -> BTreeSet<Flag> {
        flags.iter().cloned().collect()
    }

    #[test]
    fn store_modes() {
        let mut table = FlagTable::new();
        let uid = Uid::u(1);
        table.insert(uid);
        assert!(table.flags_of(uid).is_empty());

        table.set_flags(uid, &[Flag::Seen], StoreMode::Add).unwrap();
        assert_eq!(
            &set(&[Flag::Seen, Flag::Deleted]),
            table
                .set_flags(uid, &[Flag::Deleted], StoreMode::Add)
                .unwrap()
        );

        assert_eq!(
            &set(&[Flag::Deleted]),
            table
                .set_flags(uid, &[Flag::Deleted], StoreMode::Replace)
                .unwrap()
        );

        table
            .set_flags(uid, &[Flag::Seen, Flag::Deleted], StoreMode::Add)
            .unwrap();
        assert_eq!(
            &set(&[Flag::Deleted]),
            table
                .set_flags(uid, &[Flag::Seen], StoreMode::Remove)
                .unwrap()
        );

        assert!(table.test_flag(uid, &Flag::Deleted));
        assert!(!table.test_flag(uid, &Flag::Seen));
    }

    #[test]
    fn keywords_are_opaque() {
        let mut table = FlagTable::new();
        let uid = Uid::u(3);
        table.insert(uid);

        let kw = Flag::Keyword("$Junk".to_owned());
        table
            .set_flags(uid, &[kw.clone(), Flag::Flagged], StoreMode::Replace)
            .unwrap();
        assert_eq!(set(&[Flag::Flagged, kw]), table.flags_of(uid));
    }

    #[test]
    fn untracked_uid() {
        let mut table = FlagTable::new();
        assert_matches!(
            Err(Error::NxMessage),
            table.set_flags(Uid::u(1), &[Flag::Seen], StoreMode::Add)
        );
        assert!(table.flags_of(Uid::u(1)).is_empty());

        table.insert(Uid::u(1));
        table.set_flags(Uid::u(1), &[Flag::Seen], StoreMode::Add).unwrap();
        table.forget(Uid::u(1));
        assert!(!table.test_flag(Uid::u(1), &Flag::Seen));
    }
}
