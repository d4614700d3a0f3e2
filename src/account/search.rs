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

//! The `SEARCH` query language.
//!
//! A query is parsed into a `SearchQuery` tree without reference to any
//! mailbox state. Running it compiles the tree into a postfix list of `Op`s
//! against the current sequence index (so that sequence sets and `*` mean
//! what they mean right now), then evaluates that list once per message.

use std::sync::Arc;

use super::flag_table::FlagTable;
use super::model::*;
use super::sequence_index::SequenceIndex;
use crate::support::error::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SearchQuery {
    All,
    /// The message has the given flag.
    Flag(Flag),
    Not(Box<SearchQuery>),
    Or(Box<SearchQuery>, Box<SearchQuery>),
    /// Every sub-query matches.
    And(Vec<SearchQuery>),
    Larger(u32),
    Smaller(u32),
    /// A sequence set, kept in raw form until it can be resolved against the
    /// mailbox.
    SequenceSet(String),
    /// A UID set, kept in raw form until it can be resolved against the
    /// mailbox.
    UidSet(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    Atom(String),
}

fn tokenise(raw: &str) -> Result<Vec<Token>, Error> {
    let mut tokens = Vec::new();
    let mut chars = raw.char_indices().peekable();

    while let Some(&(start, ch)) = chars.peek() {
        match ch {
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some((_, '"')) => break,
                        Some((_, '\\')) => match chars.next() {
                            Some((_, c)) => s.push(c),
                            None => break,
                        },
                        Some((_, c)) => s.push(c),
                        None => {
                            return Err(Error::SearchSyntax(
                                "unterminated quoted string".to_owned(),
                            ))
                        }
                    }
                }
                tokens.push(Token::Atom(s));
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            _ => {
                let mut end = raw.len();
                while let Some(&(ix, c)) = chars.peek() {
                    if c.is_whitespace() || '(' == c || ')' == c {
                        end = ix;
                        break;
                    }
                    chars.next();
                }
                tokens.push(Token::Atom(raw[start..end].to_owned()));
            }
        }
    }

    Ok(tokens)
}

/// How deeply keys may nest inside `NOT`, `OR` and parentheses.
const MAX_NESTING: usize = 100;

struct Parser {
    tokens: std::vec::IntoIter<Token>,
    depth: usize,
}

impl Parser {
    fn next_atom(&mut self, after: &str) -> Result<String, Error> {
        match self.tokens.next() {
            Some(Token::Atom(a)) => Ok(a),
            _ => Err(Error::SearchSyntax(format!(
                "{} requires an argument",
                after
            ))),
        }
    }

    fn number(&mut self, after: &str) -> Result<u32, Error> {
        let raw = self.next_atom(after)?;
        raw.parse().map_err(|_| {
            Error::SearchSyntax(format!("{} {:?}: not a number", after, raw))
        })
    }

    fn flag(&mut self, after: &str) -> Result<Flag, Error> {
        let raw = self.next_atom(after)?;
        raw.parse()
            .map_err(|_| Error::SearchSyntax(format!("bad flag {:?}", raw)))
    }

    /// Parse keys until `Close` (if `nested`) or end of input.
    fn key_list(&mut self, nested: bool) -> Result<Vec<SearchQuery>, Error> {
        let mut keys = Vec::new();
        loop {
            match self.tokens.next() {
                None if nested => {
                    return Err(Error::SearchSyntax(
                        "unbalanced parentheses".to_owned(),
                    ))
                }
                None => break,
                Some(Token::Close) if nested => break,
                Some(Token::Close) => {
                    return Err(Error::SearchSyntax(
                        "unbalanced parentheses".to_owned(),
                    ))
                }
                Some(token) => keys.push(self.key_from(token)?),
            }
        }

        if keys.is_empty() {
            return Err(Error::SearchSyntax("empty search key".to_owned()));
        }

        Ok(keys)
    }

    fn key(&mut self, after: &str) -> Result<SearchQuery, Error> {
        match self.tokens.next() {
            Some(token) => self.key_from(token),
            None => Err(Error::SearchSyntax(format!(
                "{} requires a search key",
                after
            ))),
        }
    }

    fn key_from(&mut self, token: Token) -> Result<SearchQuery, Error> {
        if self.depth >= MAX_NESTING {
            return Err(Error::SearchSyntax(
                "search keys nested too deeply".to_owned(),
            ));
        }

        self.depth += 1;
        let key = self.key_at_depth(token);
        self.depth -= 1;
        key
    }

    fn key_at_depth(&mut self, token: Token) -> Result<SearchQuery, Error> {
        let atom = match token {
            Token::Open => return self.key_list(true).map(conjunction),
            Token::Close => {
                return Err(Error::SearchSyntax(
                    "unbalanced parentheses".to_owned(),
                ))
            }
            Token::Atom(atom) => atom,
        };

        let not = |q| SearchQuery::Not(Box::new(q));
        let key = atom.to_ascii_uppercase();
        Ok(match &key[..] {
            "ALL" => SearchQuery::All,
            "ANSWERED" => SearchQuery::Flag(Flag::Answered),
            "DELETED" => SearchQuery::Flag(Flag::Deleted),
            "DRAFT" => SearchQuery::Flag(Flag::Draft),
            "FLAGGED" => SearchQuery::Flag(Flag::Flagged),
            "SEEN" => SearchQuery::Flag(Flag::Seen),
            "UNANSWERED" => not(SearchQuery::Flag(Flag::Answered)),
            "UNDELETED" => not(SearchQuery::Flag(Flag::Deleted)),
            "UNDRAFT" => not(SearchQuery::Flag(Flag::Draft)),
            "UNFLAGGED" => not(SearchQuery::Flag(Flag::Flagged)),
            "UNSEEN" => not(SearchQuery::Flag(Flag::Seen)),
            "KEYWORD" => SearchQuery::Flag(self.flag("KEYWORD")?),
            "UNKEYWORD" => not(SearchQuery::Flag(self.flag("UNKEYWORD")?)),
            "NOT" => not(self.key("NOT")?),
            "OR" => {
                let a = self.key("OR")?;
                let b = self.key("OR")?;
                SearchQuery::Or(Box::new(a), Box::new(b))
            }
            "LARGER" => SearchQuery::Larger(self.number("LARGER")?),
            "SMALLER" => SearchQuery::Smaller(self.number("SMALLER")?),
            "UID" => {
                let set = self.next_atom("UID")?;
                check_set_syntax(&set)?;
                SearchQuery::UidSet(set)
            }
            _ if atom.starts_with('\\') => SearchQuery::Flag(
                atom.parse().map_err(|_| {
                    Error::SearchSyntax(format!("bad flag {:?}", atom))
                })?,
            ),
            _ if atom.starts_with(|c: char| c.is_ascii_digit() || '*' == c) =>
            {
                check_set_syntax(&atom)?;
                SearchQuery::SequenceSet(atom)
            }
            _ => {
                return Err(Error::SearchSyntax(format!(
                    "unrecognised search key {:?}",
                    atom
                )))
            }
        })
    }
}

fn conjunction(mut keys: Vec<SearchQuery>) -> SearchQuery {
    if 1 == keys.len() {
        keys.pop().unwrap_or(SearchQuery::All)
    } else {
        SearchQuery::And(keys)
    }
}

fn check_set_syntax(raw: &str) -> Result<(), Error> {
    SeqRange::<Uid>::parse(raw, Some(Uid::MIN))
        .map(|_| ())
        .ok_or_else(|| {
            Error::SearchSyntax(format!("bad sequence set {:?}", raw))
        })
}

impl SearchQuery {
    /// Parse a textual query such as `(NOT DELETED)`.
    ///
    /// A top-level list of several keys is a conjunction, as is a
    /// parenthesised list.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let mut parser = Parser {
            tokens: tokenise(raw)?.into_iter(),
            depth: 0,
        };
        parser.key_list(false).map(conjunction)
    }
}

#[derive(Debug)]
enum Op {
    True,
    And,
    Or,
    Not,
    Flag(Flag),
    /// Size comparison: true if `size < n` when the flag is set, `size > n`
    /// otherwise.
    SizeCompare(u32, bool),
    UidIn(SeqRange<Uid>),
}

fn compile(
    dst: &mut Vec<Op>,
    query: &SearchQuery,
    index: &SequenceIndex,
) -> Result<(), Error> {
    match *query {
        SearchQuery::All => dst.push(Op::True),
        SearchQuery::Flag(ref flag) => dst.push(Op::Flag(flag.clone())),
        SearchQuery::Not(ref sub) => {
            compile(dst, sub, index)?;
            dst.push(Op::Not);
        }
        SearchQuery::Or(ref a, ref b) => {
            compile(dst, a, index)?;
            compile(dst, b, index)?;
            dst.push(Op::Or);
        }
        SearchQuery::And(ref subs) => {
            if subs.is_empty() {
                dst.push(Op::True);
            }

            for (ix, sub) in subs.iter().enumerate() {
                compile(dst, sub, index)?;
                if 0 != ix {
                    dst.push(Op::And);
                }
            }
        }
        SearchQuery::Larger(n) => dst.push(Op::SizeCompare(n, false)),
        SearchQuery::Smaller(n) => dst.push(Op::SizeCompare(n, true)),
        SearchQuery::SequenceSet(ref raw) => {
            dst.push(Op::UidIn(resolve_to_uids(index, raw, false)?))
        }
        SearchQuery::UidSet(ref raw) => {
            dst.push(Op::UidIn(resolve_to_uids(index, raw, true)?))
        }
    }

    Ok(())
}

fn resolve_to_uids(
    index: &SequenceIndex,
    raw: &str,
    by_uid: bool,
) -> Result<SeqRange<Uid>, Error> {
    let mut uids = SeqRange::new();
    for (_, uid) in index
        .resolve(raw, by_uid)
        .map_err(|e| Error::SearchSyntax(e.to_string()))?
    {
        uids.append(uid);
    }
    Ok(uids)
}

fn eval(ops: &[Op], message: &Message, flags: &FlagTable) -> bool {
    let mut stack: Vec<bool> = Vec::with_capacity(4);
    for op in ops {
        let v = match *op {
            Op::True => true,
            Op::And => {
                let b = stack.pop().unwrap_or(true);
                let a = stack.pop().unwrap_or(true);
                a && b
            }
            Op::Or => {
                let b = stack.pop().unwrap_or(false);
                let a = stack.pop().unwrap_or(false);
                a || b
            }
            Op::Not => !stack.pop().unwrap_or(false),
            Op::Flag(ref flag) => flags.test_flag(message.uid, flag),
            Op::SizeCompare(n, less) => {
                let size = message.size() as u64;
                if less {
                    size < u64::from(n)
                } else {
                    size > u64::from(n)
                }
            }
            Op::UidIn(ref uids) => uids.contains(message.uid),
        };
        stack.push(v);
    }

    stack.pop().unwrap_or(false)
}

/// Evaluate `query` against a snapshot of the mailbox.
///
/// `snapshot` must be the ascending-by-UID list `index` was built from.
/// Returns every matching message in ascending order; no match is an empty
/// result, not an error.
pub fn search(
    query: &SearchQuery,
    snapshot: &[Arc<Message>],
    index: &SequenceIndex,
    flags: &FlagTable,
) -> Result<Vec<(Seqnum, Uid)>, Error> {
    let mut ops = Vec::new();
    compile(&mut ops, query, index)?;

    Ok(index
        .seqnums_uids()
        .zip(snapshot)
        .filter(|&(_, message)| eval(&ops, message, flags))
        .map(|(pair, _)| pair)
        .collect())
}

#[cfg(test)]
mod test {
    use chrono::prelude::*;

    use super::super::message_store::MessageStore;
    use super::*;

    fn parse(raw: &str) -> SearchQuery {
        SearchQuery::parse(raw).unwrap()
    }

    #[test]
    fn parse_core_grammar() {
        assert_eq!(SearchQuery::All, parse("ALL"));
        assert_eq!(SearchQuery::All, parse("(ALL)"));
        assert_eq!(SearchQuery::Flag(Flag::Deleted), parse("(DELETED)"));
        assert_eq!(
            SearchQuery::Not(Box::new(SearchQuery::Flag(Flag::Deleted))),
            parse("(NOT DELETED)")
        );
        assert_eq!(
            SearchQuery::And(vec![
                SearchQuery::Flag(Flag::Seen),
                SearchQuery::Not(Box::new(SearchQuery::Flag(Flag::Deleted))),
            ]),
            parse("(seen not deleted)")
        );
        assert_eq!(
            SearchQuery::And(vec![
                SearchQuery::Flag(Flag::Seen),
                SearchQuery::Flag(Flag::Flagged),
            ]),
            parse("SEEN FLAGGED")
        );
        assert_eq!(SearchQuery::Flag(Flag::Seen), parse("\\Seen"));
    }

    #[test]
    fn parse_extensions() {
        assert_eq!(
            SearchQuery::Or(
                Box::new(SearchQuery::Flag(Flag::Seen)),
                Box::new(SearchQuery::Larger(100)),
            ),
            parse("OR SEEN LARGER 100")
        );
        assert_eq!(
            SearchQuery::Flag(Flag::Keyword("$Junk".to_owned())),
            parse("KEYWORD $Junk")
        );
        assert_eq!(
            SearchQuery::Not(Box::new(SearchQuery::Flag(Flag::Keyword(
                "$Junk".to_owned()
            )))),
            parse("UNKEYWORD \"$Junk\"")
        );
        assert_eq!(SearchQuery::UidSet("2:*".to_owned()), parse("UID 2:*"));
        assert_eq!(
            SearchQuery::SequenceSet("1,3".to_owned()),
            parse("1,3")
        );
    }

    #[test]
    fn parse_errors() {
        for bad in &[
            "",
            "()",
            "BOGUS",
            "(DELETED",
            "DELETED)",
            "NOT",
            "OR SEEN",
            "LARGER many",
            "KEYWORD",
            "UID",
            "UID x",
            "KEYWORD \"a b\"",
            "0:3",
            "\"unterminated",
        ] {
            assert_matches!(
                Err(Error::SearchSyntax(_)),
                SearchQuery::parse(bad)
            );
        }
    }

    #[test]
    fn deep_nesting_rejected() {
        let not_chain = "NOT ".repeat(200_000) + "DELETED";
        assert_matches!(
            Err(Error::SearchSyntax(_)),
            SearchQuery::parse(&not_chain)
        );

        let parens = "(".repeat(100_000) + "ALL" + &")".repeat(100_000);
        assert_matches!(
            Err(Error::SearchSyntax(_)),
            SearchQuery::parse(&parens)
        );

        let or_chain = "OR SEEN ".repeat(100_000) + "DELETED";
        assert_matches!(
            Err(Error::SearchSyntax(_)),
            SearchQuery::parse(&or_chain)
        );

        let shallow = "NOT ".repeat(MAX_NESTING - 1) + "DELETED";
        assert!(SearchQuery::parse(&shallow).is_ok());
    }

    struct Fixture {
        store: MessageStore,
        flags: FlagTable,
    }

    impl Fixture {
        fn new(bodies: &[&str]) -> Self {
            let mut store = MessageStore::new();
            let mut flags = FlagTable::new();
            for body in bodies {
                let uid = store
                    .append(Arc::from(body.as_bytes()), Utc::now())
                    .unwrap();
                flags.insert(uid);
            }
            Fixture { store, flags }
        }

        fn run(&self, raw: &str) -> Vec<(Seqnum, Uid)> {
            let snapshot = self.store.list_ascending_by_uid();
            let index = SequenceIndex::from_snapshot(&snapshot);
            search(&parse(raw), &snapshot, &index, &self.flags).unwrap()
        }

        fn seqnums(&self, raw: &str) -> Vec<u32> {
            self.run(raw).into_iter().map(|(s, _)| s.into()).collect()
        }

        fn uids(&self, raw: &str) -> Vec<u32> {
            self.run(raw).into_iter().map(|(_, u)| u.into()).collect()
        }
    }

    #[test]
    fn search_deleted() {
        let mut f = Fixture::new(&["one", "two"]);
        f.flags
            .set_flags(Uid::u(1), &[Flag::Deleted], StoreMode::Add)
            .unwrap();

        assert_eq!(vec![1, 2], f.seqnums("ALL"));
        assert_eq!(vec![1], f.seqnums("(DELETED)"));
        assert_eq!(vec![2], f.seqnums("(NOT DELETED)"));
        assert_eq!(vec![2], f.seqnums("UNDELETED"));
    }

    #[test]
    fn search_numbering_after_removal() {
        let mut f = Fixture::new(&["a", "b", "c"]);
        f.store.remove(Uid::u(1)).unwrap();
        f.flags.forget(Uid::u(1));
        f.flags
            .set_flags(Uid::u(3), &[Flag::Seen], StoreMode::Add)
            .unwrap();

        assert_eq!(vec![2], f.seqnums("SEEN"));
        assert_eq!(vec![3], f.uids("SEEN"));
        assert_eq!(vec![2, 3], f.uids("ALL"));
        assert_eq!(vec![3], f.uids("*"));
        assert_eq!(vec![3], f.uids("UID 3:*"));
        assert_eq!(vec![2], f.uids("1"));
    }

    #[test]
    fn search_size_and_or() {
        let mut f = Fixture::new(&["x", "xxxxxxxxxx", "xxxxx"]);
        f.flags
            .set_flags(Uid::u(1), &[Flag::Flagged], StoreMode::Add)
            .unwrap();

        assert_eq!(vec![2], f.seqnums("LARGER 5"));
        assert_eq!(vec![1], f.seqnums("SMALLER 5"));
        assert_eq!(vec![1, 2], f.seqnums("OR FLAGGED LARGER 9"));
        assert_eq!(vec![3], f.seqnums("NOT OR FLAGGED LARGER 9"));
        assert_eq!(vec![3], f.seqnums("(UNFLAGGED SMALLER 9)"));
    }

    #[test]
    fn search_empty_mailbox() {
        let f = Fixture::new(&[]);
        for query in &["ALL", "(DELETED)", "(NOT DELETED)", "1:*", "UID *"] {
            assert!(f.seqnums(query).is_empty());
        }
    }
}
