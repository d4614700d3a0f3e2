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

//! Reading and appending to mbox files.
//!
//! An mbox file can be used to pre-seed the mailbox before the server starts
//! accepting connections, and optionally to record every later delivery.
//! Lines in message bodies which look like a `From ` separator are quoted
//! mboxrd-style (`>From `, `>>From `, ...) so that reading back a file this
//! module wrote yields exactly the bytes that were appended.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use chrono::prelude::*;
use log::{debug, warn};

const SEPARATOR: &[u8] = b"From ";

/// Read every message in the mbox file at `path`, in file order.
///
/// A file that does not exist holds no messages.
pub fn read_messages(path: &Path) -> io::Result<Vec<Vec<u8>>> {
    match fs::read(path) {
        Ok(data) => {
            let messages = split(&data);
            debug!(
                "Read {} message(s) from '{}'",
                messages.len(),
                path.display()
            );
            Ok(messages)
        }
        Err(e) if io::ErrorKind::NotFound == e.kind() => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

/// Split raw mbox content into the messages it contains.
pub fn split(data: &[u8]) -> Vec<Vec<u8>> {
    let mut starts = Vec::new();
    if data.starts_with(SEPARATOR) {
        starts.push(0);
    }
    for nl in memchr::memchr_iter(b'\n', data) {
        if data[nl + 1..].starts_with(SEPARATOR) {
            starts.push(nl + 1);
        }
    }

    match starts.first() {
        None if !data.is_empty() => {
            warn!("mbox data has no 'From ' separator line; ignoring it");
        }
        Some(&first) if first > 0 => {
            warn!("Ignoring {} byte(s) before first mbox separator", first);
        }
        _ => (),
    }

    starts
        .iter()
        .enumerate()
        .map(|(ix, &start)| {
            let end = starts.get(ix + 1).copied().unwrap_or(data.len());
            let chunk = &data[start..end];
            let body_start = memchr::memchr(b'\n', chunk)
                .map(|nl| nl + 1)
                .unwrap_or(chunk.len());
            unquote(strip_separator_blank(&chunk[body_start..]))
        })
        .collect()
}

/// Drop the blank line which separates a message from the next `From `
/// line.
fn strip_separator_blank(body: &[u8]) -> &[u8] {
    if body.ends_with(b"\r\n\r\n") {
        &body[..body.len() - 2]
    } else if body.ends_with(b"\n\n") {
        &body[..body.len() - 1]
    } else {
        body
    }
}

fn is_quoted_separator(line: &[u8]) -> bool {
    let unquoted = line
        .iter()
        .position(|&b| b'>' != b)
        .map(|ix| &line[ix..])
        .unwrap_or(&[]);
    unquoted.starts_with(SEPARATOR)
}

fn unquote(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len());
    for line in body.split_inclusive(|&b| b'\n' == b) {
        if line.starts_with(b">") && is_quoted_separator(line) {
            out.extend_from_slice(&line[1..]);
        } else {
            out.extend_from_slice(line);
        }
    }
    out
}

fn quote(body: &[u8], dst: &mut Vec<u8>) {
    for line in body.split_inclusive(|&b| b'\n' == b) {
        if is_quoted_separator(line) {
            dst.push(b'>');
        }
        dst.extend_from_slice(line);
    }
}

/// Encode a single message as an mbox entry.
pub fn encode(raw: &[u8], date: DateTime<Utc>) -> Vec<u8> {
    let mut entry = Vec::with_capacity(raw.len() + 64);
    // Writing to a Vec cannot fail
    let _ = writeln!(
        entry,
        "From localmail@localhost {}",
        date.format("%a %b %e %H:%M:%S %Y")
    );
    quote(raw, &mut entry);
    if !raw.is_empty() && !raw.ends_with(b"\n") {
        entry.push(b'\n');
    }
    entry.push(b'\n');
    entry
}

/// Appends messages to an mbox file.
#[derive(Debug)]
pub struct MboxWriter {
    file: fs::File,
}

impl MboxWriter {
    /// Open `path` for appending, creating it if it does not exist.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(MboxWriter { file })
    }

    /// Durably append one message.
    pub fn append(
        &mut self,
        raw: &[u8],
        date: DateTime<Utc>,
    ) -> io::Result<()> {
        self.file.write_all(&encode(raw, date))?;
        self.file.flush()?;
        self.file.sync_data()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn split_with_blank_separator_lines() {
        let data = b"From MAILER-DAEMON Thu Jan  1 00:00:00 2024\n\
                     Subject: Test\n\
                     From: from@test.org\n\
                     To: to@test.org\n\
                     \n\
                     \n\
                     From MAILER-DAEMON Thu Jan  1 00:00:01 2024\n\
                     Subject: Second\n\
                     \n\
                     body\n\
                     \n";

        let messages = split(data);
        assert_eq!(2, messages.len());
        assert_eq!(
            &b"Subject: Test\nFrom: from@test.org\nTo: to@test.org\n\n"[..],
            &messages[0][..]
        );
        assert_eq!(&b"Subject: Second\n\nbody\n"[..], &messages[1][..]);
    }

    #[test]
    fn split_ignores_leading_garbage_and_empty_input() {
        assert!(split(b"").is_empty());
        assert!(split(b"not an mbox\n").is_empty());

        let messages = split(b"junk\nFrom x\nA: b\n\n");
        assert_eq!(vec![b"A: b\n".to_vec()], messages);
    }

    #[test]
    fn from_lines_round_trip() {
        let raw = b"Subject: quoting\r\n\r\nFrom here\r\n>From there\r\n";
        let entry = encode(raw, Utc::now());
        assert!(entry.windows(13).any(|w| w == b"\n>From here\r\n"));
        assert!(entry.windows(15).any(|w| w == b"\n>>From there\r\n"));

        let mut file = entry.clone();
        file.extend_from_slice(&encode(b"Subject: 2\n\n", Utc::now()));
        let messages = split(&file);
        assert_eq!(2, messages.len());
        assert_eq!(&raw[..], &messages[0][..]);
        assert_eq!(&b"Subject: 2\n\n"[..], &messages[1][..]);
    }

    #[test]
    fn writer_appends_in_order() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("inbox.mbox");

        assert!(read_messages(&path).unwrap().is_empty());

        let mut writer = MboxWriter::open(&path).unwrap();
        writer.append(b"Subject: 1\n\none", Utc::now()).unwrap();
        writer.append(b"Subject: 2\n\ntwo\n", Utc::now()).unwrap();
        drop(writer);

        let mut writer = MboxWriter::open(&path).unwrap();
        writer.append(b"Subject: 3\n\nthree\n", Utc::now()).unwrap();

        assert_eq!(
            vec![
                b"Subject: 1\n\none\n".to_vec(),
                b"Subject: 2\n\ntwo\n".to_vec(),
                b"Subject: 3\n\nthree\n".to_vec(),
            ],
            read_messages(&path).unwrap()
        );
    }
}
