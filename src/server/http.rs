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

//! The HTTP status page.
//!
//! Any request on the HTTP port, whatever its method or path, gets a single
//! HTML page describing the current contents of the mailbox. This is meant
//! for a human poking at a test run from a browser, not for machines; test
//! code should look at the mailbox directly.

use std::fmt::Write as _;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use log::debug;

use super::{ConnectionContext, ConnectionHandler};
use crate::account::mailbox::INBOX;
use crate::account::model::MailboxSummary;

/// Requests with a head larger than this are answered without reading the
/// rest.
const MAX_REQUEST_HEAD: usize = 8192;
const READ_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, Default)]
pub struct StatusPage;

impl ConnectionHandler for StatusPage {
    fn handle(
        &self,
        mut stream: TcpStream,
        context: &ConnectionContext,
    ) -> io::Result<()> {
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        let request_line = read_request_head(&mut stream)?;
        debug!("{} {}", context.log_prefix, request_line);

        let body = render(&context.mailbox.summary());
        write!(
            stream,
            "HTTP/1.0 200 OK\r\n\
             Content-Type: text/html; charset=utf-8\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\
             \r\n",
            body.len()
        )?;
        stream.write_all(body.as_bytes())?;
        stream.flush()
    }
}

/// Consume the request up to the blank line ending its head and return the
/// request line.
fn read_request_head(stream: &mut impl Read) -> io::Result<String> {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while head.len() < MAX_REQUEST_HEAD
        && !head.windows(4).any(|w| b"\r\n\r\n" == w)
    {
        let n = stream.read(&mut buf)?;
        if 0 == n {
            break;
        }
        head.extend_from_slice(&buf[..n]);
    }

    let line_end = memchr::memchr(b'\n', &head).unwrap_or(head.len());
    Ok(String::from_utf8_lossy(&head[..line_end]).trim().to_owned())
}

/// Render the status page for `summary`.
pub fn render(summary: &MailboxSummary) -> String {
    let mut html = String::new();
    // Writing to a String cannot fail
    let _ = write!(
        html,
        "<!DOCTYPE html>\n\
         <html><head><meta charset=\"utf-8\"><title>localmail</title></head>\n\
         <body>\n<h1>{}</h1>\n<p>{} message(s), next UID {}</p>\n",
        INBOX,
        summary.exists(),
        summary
            .next_uid
            .map(|uid| uid.to_string())
            .unwrap_or_else(|| "(exhausted)".to_owned()),
    );

    if !summary.messages.is_empty() {
        html.push_str(
            "<table>\n<tr><th>#</th><th>UID</th><th>Flags</th>\
             <th>Size</th><th>Date</th></tr>\n",
        );
        for message in &summary.messages {
            let flags = message
                .flags
                .iter()
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
                .join(" ");
            let _ = writeln!(
                html,
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td>\
                 <td>{}</td></tr>",
                message.seqnum,
                message.uid,
                escape(&flags),
                message.size,
                message.internal_date.to_rfc2822(),
            );
        }
        html.push_str("</table>\n");
    }

    html.push_str("</body></html>\n");
    html
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod test {
    use std::collections::BTreeSet;

    use chrono::prelude::*;

    use super::*;
    use crate::account::model::*;

    #[test]
    fn render_empty_mailbox() {
        let html = render(&MailboxSummary {
            next_uid: Some(Uid::MIN),
            messages: vec![],
        });
        assert!(html.contains("<h1>INBOX</h1>"));
        assert!(html.contains("0 message(s), next UID 1"));
        assert!(!html.contains("<table>"));
    }

    #[test]
    fn render_messages() {
        let date = Utc.ymd(2024, 3, 4).and_hms(5, 6, 7);
        let html = render(&MailboxSummary {
            next_uid: Some(Uid::u(8)),
            messages: vec![
                MessageSummary {
                    seqnum: Seqnum::u(1),
                    uid: Uid::u(3),
                    flags: BTreeSet::new(),
                    size: 42,
                    internal_date: date,
                },
                MessageSummary {
                    seqnum: Seqnum::u(2),
                    uid: Uid::u(7),
                    flags: vec![Flag::Seen, Flag::Keyword("<b>&".to_owned())]
                        .into_iter()
                        .collect(),
                    size: 9,
                    internal_date: date,
                },
            ],
        });

        assert!(html.contains("2 message(s), next UID 8"));
        assert!(html.contains(
            "<tr><td>1</td><td>3</td><td></td><td>42</td>\
             <td>Mon, 04 Mar 2024 05:06:07 +0000</td></tr>"
        ));
        assert!(html.contains("<td>\\Seen &lt;b&gt;&amp;</td>"));
    }

    #[test]
    fn request_head_stops_at_blank_line() {
        let mut request: &[u8] =
            b"GET /anything HTTP/1.1\r\nHost: x\r\n\r\nleftover";
        assert_eq!(
            "GET /anything HTTP/1.1",
            read_request_head(&mut request).unwrap()
        );

        let mut request: &[u8] = b"";
        assert_eq!("", read_request_head(&mut request).unwrap());
    }
}
