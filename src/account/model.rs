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

use std::collections::{BTreeMap, BTreeSet};
use std::convert::TryInto;
use std::fmt;
use std::marker::PhantomData;
use std::num::NonZeroU32;
use std::ops::Bound::{Excluded, Included, Unbounded};
use std::str::FromStr;
use std::sync::Arc;

use chrono::prelude::*;

use crate::support::error::Error;

/// Uniquely identifies a message within the mailbox.
///
/// UIDs start at 1 and increase monotonically as messages are appended.
/// UIDs are never reused, not even after the message they named has been
/// expunged.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uid(pub NonZeroU32);

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Uid({})", self.0.get())
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.get())
    }
}

impl Uid {
    // Unsafe because new() isn't const for some reason
    pub const MIN: Self = unsafe { Uid(NonZeroU32::new_unchecked(1)) };
    pub const MAX: Self = unsafe { Uid(NonZeroU32::new_unchecked(u32::MAX)) };

    pub fn of(uid: u32) -> Option<Self> {
        NonZeroU32::new(uid).map(Uid)
    }

    pub fn next(self) -> Option<Self> {
        self.0.get().checked_add(1).and_then(Uid::of)
    }

    #[cfg(test)]
    pub fn u(uid: u32) -> Self {
        Uid::of(uid).unwrap()
    }
}

impl From<Uid> for u32 {
    fn from(uid: Uid) -> u32 {
        uid.0.get()
    }
}

/// The 1-based rank of a live message among all live messages, ordered by
/// UID.
///
/// Sequence numbers are never stored. They are derived from the message
/// store whenever they are needed, so they shift down as soon as a message
/// with a lower UID is expunged.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Seqnum(pub NonZeroU32);

impl fmt::Debug for Seqnum {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Seqnum({})", self.0.get())
    }
}

impl fmt::Display for Seqnum {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.get())
    }
}

impl Seqnum {
    // Unsafe because new() isn't const for some reason
    pub const MIN: Self = unsafe { Seqnum(NonZeroU32::new_unchecked(1)) };

    pub fn of(seqnum: u32) -> Option<Self> {
        NonZeroU32::new(seqnum).map(Seqnum)
    }

    #[cfg(test)]
    pub fn u(seqnum: u32) -> Self {
        Seqnum::of(seqnum).unwrap()
    }

    pub fn to_index(self) -> usize {
        self.0.get() as usize - 1
    }

    /// Returns `None` if `ix` is beyond what a sequence number can express.
    pub fn from_index(ix: usize) -> Option<Self> {
        ix.checked_add(1)
            .and_then(|n| n.try_into().ok())
            .and_then(Seqnum::of)
    }
}

impl From<Seqnum> for u32 {
    fn from(seqnum: Seqnum) -> u32 {
        seqnum.0.get()
    }
}

/// A "sequence set range" of sequence numbers or UIDs.
///
/// Internally, this is maintained as a minimal sorted set of inclusive ranges.
/// It does not maintain information on the original fragmentation, ordering,
/// or duplication.
///
/// `*` is substituted at parse time, so a parsed set is only meaningful
/// against the mailbox state it was parsed for.
#[derive(Clone, PartialEq, Eq)]
pub struct SeqRange<T> {
    parts: BTreeMap<u32, u32>,
    _t: PhantomData<T>,
}

impl<T> SeqRange<T> {
    /// Create a new, empty range.
    pub fn new() -> Self {
        SeqRange {
            parts: BTreeMap::new(),
            _t: PhantomData,
        }
    }
}

impl<T: Into<u32>> SeqRange<T> {
    /// Append a single item to this range.
    ///
    /// The item must be strictly greater than all other items already
    /// inserted.
    pub fn append(&mut self, item: T) {
        let item: u32 = item.into();

        if let Some(end) = self.parts.values_mut().next_back() {
            assert!(item > *end);

            if item == *end + 1 {
                *end = item;
                return;
            }
        }

        self.parts.insert(item, item);
    }

    fn insert_raw(&mut self, start_incl: u32, mut end_incl: u32) {
        // Swallow any later ranges this one overlaps or touches.
        loop {
            let following = self
                .parts
                .range((Excluded(start_incl), Unbounded))
                .next()
                .map(|(&start, &end)| (start, end));

            match following {
                Some((following_start, following_end))
                    if following_start - 1 <= end_incl =>
                {
                    end_incl = end_incl.max(following_end);
                    self.parts.remove(&following_start);
                }
                _ => break,
            }
        }

        let preceding = self
            .parts
            .range((Unbounded, Included(end_incl)))
            .next_back()
            .map(|(&start, &end)| (start, end));
        if let Some((preceding_start, preceding_end)) = preceding {
            if preceding_end.saturating_add(1) >= start_incl {
                if start_incl < preceding_start {
                    self.parts.remove(&preceding_start);
                    self.parts.insert(start_incl, end_incl.max(preceding_end));
                } else {
                    self.parts
                        .insert(preceding_start, end_incl.max(preceding_end));
                }
                return;
            }
        }

        self.parts.insert(start_incl, end_incl);
    }

    /// Return whether the given item is present in this set.
    pub fn contains(&self, v: T) -> bool {
        let v: u32 = v.into();
        self.parts
            .range(..=v)
            .next_back()
            .filter(|&(_, &end)| end >= v)
            .is_some()
    }

    /// Parse the IMAP format of a sequence set.
    ///
    /// `splat` is the value substituted for `*`. It is `None` when the
    /// mailbox is empty, in which case any element using `*` matches
    /// nothing rather than failing.
    ///
    /// Returns `None` if the syntax is invalid, including the use of `0`.
    pub fn parse(raw: &str, splat: Option<T>) -> Option<Self> {
        fn do_parse(r: &str, splat: Option<u32>) -> Option<Option<u32>> {
            if "*" == r {
                Some(splat)
            } else if !r.is_empty() && r.bytes().all(|b| b.is_ascii_digit())
            {
                r.parse().ok().filter(|&v| v > 0).map(Some)
            } else {
                None
            }
        }

        let splat = splat.map(Into::into);

        let mut this = Self::new();
        for part in raw.split(',') {
            let mut subs = part.split(':');
            match (subs.next(), subs.next(), subs.next()) {
                (Some(only), None, None) => {
                    if let Some(only) = do_parse(only, splat)? {
                        this.insert_raw(only, only);
                    }
                }
                (Some(start), Some(end), None) => {
                    let start = do_parse(start, splat)?;
                    let end = do_parse(end, splat)?;
                    if let (Some(start), Some(end)) = (start, end) {
                        // RFC 3501 allows the endpoints to be in either order
                        this.insert_raw(start.min(end), end.max(start));
                    }
                }
                _ => return None,
            }
        }

        Some(this)
    }
}

impl<T> fmt::Display for SeqRange<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (ix, (&start, &end)) in self.parts.iter().enumerate() {
            let delim = if 0 == ix { "" } else { "," };

            if start == end {
                write!(f, "{}{}", delim, start)?;
            } else {
                write!(f, "{}{}:{}", delim, start, end)?;
            }
        }

        Ok(())
    }
}

impl fmt::Debug for SeqRange<Seqnum> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[Seqnum {}]", self)
    }
}

impl fmt::Debug for SeqRange<Uid> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[Uid {}]", self)
    }
}

impl<T> Default for SeqRange<T> {
    fn default() -> Self {
        SeqRange::new()
    }
}

/// A message flag.
///
/// System flags are represented as top-level enum values. Anything else,
/// including backslash flags this crate has no name for, is held verbatim
/// in the `Keyword` case.
///
/// The `Display` format of this type is the exact string value that would be
/// sent over the wire. `FromStr` does the reverse conversion, and also
/// understands non-standard casing of the system flags.
///
/// Only `\Deleted` means anything to the mailbox itself: it marks a message
/// for removal by expunge.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Flag {
    Answered,
    Deleted,
    Draft,
    Flagged,
    Seen,
    Keyword(String),
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Flag::Answered => write!(f, "\\Answered"),
            Flag::Deleted => write!(f, "\\Deleted"),
            Flag::Draft => write!(f, "\\Draft"),
            Flag::Flagged => write!(f, "\\Flagged"),
            Flag::Seen => write!(f, "\\Seen"),
            Flag::Keyword(ref kw) => write!(f, "{}", kw),
        }
    }
}

impl fmt::Debug for Flag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        <Flag as fmt::Display>::fmt(self, f)
    }
}

impl FromStr for Flag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        if s.eq_ignore_ascii_case("\\answered") {
            Ok(Flag::Answered)
        } else if s.eq_ignore_ascii_case("\\deleted") {
            Ok(Flag::Deleted)
        } else if s.eq_ignore_ascii_case("\\draft") {
            Ok(Flag::Draft)
        } else if s.eq_ignore_ascii_case("\\flagged") {
            Ok(Flag::Flagged)
        } else if s.eq_ignore_ascii_case("\\seen") {
            Ok(Flag::Seen)
        } else if is_flag_atom(s) {
            Ok(Flag::Keyword(s.to_owned()))
        } else {
            Err(Error::BadFlag(s.to_owned()))
        }
    }
}

/// Whether `s` can travel over the wire as a flag without quoting.
///
/// A single leading backslash is permitted; `atom-specials` are not.
fn is_flag_atom(s: &str) -> bool {
    let body = s.strip_prefix('\\').unwrap_or(s);
    !body.is_empty()
        && body.bytes().all(|b| {
            b > b' '
                && b < 0x7f
                && !matches!(
                    b,
                    b'(' | b')' | b'{' | b'%' | b'*' | b'"' | b'\\' | b']'
                )
        })
}

/// Parse a whitespace-separated flag list, optionally wrapped in
/// parentheses, e.g. `(\Seen \Deleted)`.
pub fn parse_flag_list(raw: &str) -> Result<Vec<Flag>, Error> {
    let trimmed = raw.trim();
    let inner = if let Some(rest) = trimmed.strip_prefix('(') {
        rest.strip_suffix(')')
            .ok_or_else(|| Error::BadFlag(raw.to_owned()))?
    } else if trimmed.ends_with(')') {
        return Err(Error::BadFlag(raw.to_owned()));
    } else {
        trimmed
    };

    inner.split_whitespace().map(str::parse).collect()
}

/// How a `STORE` applies its flag list to each message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreMode {
    /// `FLAGS`: the message ends up with exactly the given flags.
    Replace,
    /// `+FLAGS`: the given flags are added to whatever is already set.
    Add,
    /// `-FLAGS`: the given flags are cleared, others are left alone.
    Remove,
}

/// A message as held by the message store.
///
/// The raw bytes are shared so that fetch results can outlive the lock
/// they were assembled under without copying the message.
#[derive(Clone, Debug)]
pub struct Message {
    pub uid: Uid,
    pub raw: Arc<[u8]>,
    pub internal_date: DateTime<Utc>,
}

impl Message {
    pub fn size(&self) -> usize {
        self.raw.len()
    }
}

/// One entry of a `fetch` result.
#[derive(Clone, Debug)]
pub struct FetchedMessage {
    pub seqnum: Seqnum,
    pub uid: Uid,
    pub flags: BTreeSet<Flag>,
    pub internal_date: DateTime<Utc>,
    /// Exactly the octets handed to `append`.
    pub raw: Arc<[u8]>,
}

/// One entry of a `store` result, used by the protocol layer to send the
/// resulting `FETCH (FLAGS ...)` notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlagUpdate {
    pub seqnum: Seqnum,
    pub uid: Uid,
    pub flags: BTreeSet<Flag>,
}

/// Read-only view of the mailbox for the status page.
#[derive(Clone, Debug, Default)]
pub struct MailboxSummary {
    pub next_uid: Option<Uid>,
    pub messages: Vec<MessageSummary>,
}

impl MailboxSummary {
    pub fn exists(&self) -> usize {
        self.messages.len()
    }
}

#[derive(Clone, Debug)]
pub struct MessageSummary {
    pub seqnum: Seqnum,
    pub uid: Uid,
    pub flags: BTreeSet<Flag>,
    pub size: usize,
    pub internal_date: DateTime<Utc>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn seqrange_parse() {
        fn p(s: &str, splat: Option<u32>) -> Option<String> {
            SeqRange::<Seqnum>::parse(s, splat.map(Seqnum::u))
                .map(|r| r.to_string())
        }

        assert_eq!(Some("1:5".to_owned()), p("1:*", Some(5)));
        assert_eq!(Some("1,3,5".to_owned()), p("1,3,5", Some(5)));
        assert_eq!(Some("5".to_owned()), p("*", Some(5)));
        assert_eq!(Some("3:7".to_owned()), p("7:3", Some(5)));
        assert_eq!(Some("5:10".to_owned()), p("10:*", Some(5)));
        assert_eq!(Some("1:4".to_owned()), p("1,2,3:4", Some(9)));
        assert_eq!(Some("".to_owned()), p("*", None));
        assert_eq!(Some("".to_owned()), p("1:*", None));

        assert_eq!(None, p("", Some(5)));
        assert_eq!(None, p("0", Some(5)));
        assert_eq!(None, p("1:0", Some(5)));
        assert_eq!(None, p("abc", Some(5)));
        assert_eq!(None, p("1:2:3", Some(5)));
        assert_eq!(None, p("1,,2", Some(5)));
        assert_eq!(None, p("+1", Some(5)));
    }

    #[test]
    fn seqrange_merging_and_contains() {
        let r = SeqRange::<Uid>::parse("10:12,1:2,3,11:20", None).unwrap();
        assert_eq!("1:3,10:20", r.to_string());

        assert!(r.contains(Uid::u(2)));
        assert!(!r.contains(Uid::u(4)));
        assert!(r.contains(Uid::u(20)));
        assert!(!r.contains(Uid::u(21)));

        let mut r = SeqRange::<Uid>::new();
        r.append(Uid::u(1));
        r.append(Uid::u(2));
        r.append(Uid::u(4));
        assert_eq!("1:2,4", r.to_string());
        assert!(r.contains(Uid::u(4)));
        assert!(!r.contains(Uid::u(3)));
    }

    #[test]
    fn flag_parsing() {
        assert_eq!(Flag::Deleted, "\\deleted".parse::<Flag>().unwrap());
        assert_eq!(Flag::Seen, "\\SEEN".parse::<Flag>().unwrap());
        assert_eq!(
            Flag::Keyword("$Forwarded".to_owned()),
            "$Forwarded".parse::<Flag>().unwrap()
        );
        assert_eq!(
            Flag::Keyword("\\Important".to_owned()),
            "\\Important".parse::<Flag>().unwrap()
        );
        assert_matches!(Err(Error::BadFlag(_)), "".parse::<Flag>());
        assert_matches!(Err(Error::BadFlag(_)), "a(b".parse::<Flag>());
        assert_matches!(Err(Error::BadFlag(_)), "\\\\x".parse::<Flag>());

        assert_eq!("\\Answered", Flag::Answered.to_string());
        assert_eq!("foo", Flag::Keyword("foo".to_owned()).to_string());
    }

    #[test]
    fn flag_list_parsing() {
        assert_eq!(
            vec![Flag::Seen, Flag::Deleted],
            parse_flag_list("(\\Seen \\Deleted)").unwrap()
        );
        assert_eq!(vec![Flag::Deleted], parse_flag_list("\\Deleted").unwrap());
        assert!(parse_flag_list("()").unwrap().is_empty());
        assert_matches!(Err(Error::BadFlag(_)), parse_flag_list("(\\Seen"));
    }
}
