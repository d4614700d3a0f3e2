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

use std::io::{self, Write};

use super::main::DumpSubcommand;
use crate::account::mailbox::Mailbox;
use crate::support::error::Error;

pub(super) fn dump(cmd: DumpSubcommand) {
    if !cmd.mbox.is_file() {
        fatal!(EX_NOINPUT, "'{}' is not a file", cmd.mbox.display());
    }

    let mailbox = match Mailbox::from_mbox(&cmd.mbox, false) {
        Ok(mailbox) => mailbox,
        Err(e) => {
            fatal!(EX_IOERR, "Error reading '{}': {}", cmd.mbox.display(), e)
        }
    };

    let hits = match mailbox.search(&cmd.search, true) {
        Ok(hits) => hits,
        Err(e @ Error::SearchSyntax(_)) => fatal!(EX_USAGE, "{}", e),
        Err(e) => fatal!(EX_SOFTWARE, "Search failed: {}", e),
    };

    let messages = match mailbox.fetch("1:*", true) {
        Ok(messages) => messages,
        Err(e) => fatal!(EX_SOFTWARE, "Fetch failed: {}", e),
    };

    let stdout = io::stdout();
    let mut stdout = stdout.lock();
    for message in messages {
        if hits.binary_search(&u32::from(message.uid)).is_err() {
            continue;
        }

        let line = writeln!(
            stdout,
            "{}\t{}\t{}\t{}",
            message.seqnum,
            message.uid,
            message.raw.len(),
            subject_of(&message.raw).unwrap_or_default(),
        );
        if let Err(e) = line {
            // Most likely a closed pipe
            if io::ErrorKind::BrokenPipe == e.kind() {
                return;
            }
            fatal!(EX_IOERR, "Error writing output: {}", e);
        }
    }
}

/// Extract the `Subject` header of `raw`, unfolded, if there is one.
fn subject_of(raw: &[u8]) -> Option<String> {
    let mut subject: Option<String> = None;
    for line in raw.split(|&b| b'\n' == b) {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            break;
        }

        let is_continuation = matches!(line.first(), Some(b' ') | Some(b'\t'));
        if let Some(ref mut s) = subject {
            if !is_continuation {
                break;
            }
            s.push(' ');
            s.push_str(String::from_utf8_lossy(line).trim());
        } else if line.len() > 8 && line[..8].eq_ignore_ascii_case(b"subject:")
        {
            subject =
                Some(String::from_utf8_lossy(&line[8..]).trim().to_owned());
        }
    }

    subject
}
