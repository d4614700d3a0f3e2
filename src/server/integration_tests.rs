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

//! Tests which run a real server on ephemeral ports and talk to it over TCP.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{Shutdown, TcpStream};

use super::*;
use crate::account::account::Session;
use crate::account::mailbox::INBOX;
use crate::account::model::*;

/// Stores everything the client sends before half-closing as one message.
struct Deliver;

impl ConnectionHandler for Deliver {
    fn handle(
        &self,
        mut stream: TcpStream,
        context: &ConnectionContext,
    ) -> io::Result<()> {
        let mut raw = Vec::new();
        stream.read_to_end(&mut raw)?;
        match context.mailbox.append(raw) {
            Ok(uid) => writeln!(stream, "250 {}", uid),
            Err(e) => writeln!(stream, "452 {}", e),
        }
    }
}

/// Logs in with the user name and password on the first line, selects the
/// INBOX and replies with its size.
struct Probe;

impl ConnectionHandler for Probe {
    fn handle(
        &self,
        mut stream: TcpStream,
        context: &ConnectionContext,
    ) -> io::Result<()> {
        let mut reader = BufReader::new(stream.try_clone()?);
        let mut line = String::new();
        reader.read_line(&mut line)?;

        let mut words = line.split_whitespace();
        let user = words.next().unwrap_or("");
        let password = words.next().unwrap_or("");
        let account = context.realm.login(user, password);
        context.log_prefix.set_user(user.to_owned());

        let mut session = Session::new(account);
        let exists = session
            .select(INBOX, true)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        writeln!(stream, "* {} EXISTS", exists)
    }
}

fn port(port: Option<u16>) -> u16 {
    port.expect("protocol not being served")
}

fn deliver(port: u16, message: &[u8]) -> String {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream.write_all(message).unwrap();
    stream.shutdown(Shutdown::Write).unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();
    response
}

fn fetch_status_page(port: u16) -> String {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream.write_all(b"GET / HTTP/1.0\r\n\r\n").unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();
    response
}

#[test]
fn deliver_and_inspect() {
    crate::init_test_log();

    let server = Server::start(
        &SystemConfig::ephemeral(),
        Handlers::new().smtp(Deliver).imap(Probe),
    )
    .unwrap();
    let ports = server.ports();
    assert_ne!(Some(0), ports.smtp);
    assert_ne!(Some(0), ports.imap);
    assert_ne!(Some(0), ports.http);

    let raw = b"Subject: Test\r\nFrom: from@test.org\r\n\r\nHello\r\n";
    assert_eq!("250 1\n", deliver(port(ports.smtp), raw));
    assert_eq!("250 2\n", deliver(port(ports.smtp), b"Subject: Two\r\n\r\n"));

    let fetched = server.mailbox().fetch("1", false).unwrap();
    assert_eq!(&raw[..], &fetched[0].raw[..]);

    let mut probe =
        TcpStream::connect(("127.0.0.1", port(ports.imap))).unwrap();
    probe.write_all(b"anyone anything\r\n").unwrap();
    let mut response = String::new();
    probe.read_to_string(&mut response).unwrap();
    assert_eq!("* 2 EXISTS\n", response);

    server
        .mailbox()
        .store("2", false, &[Flag::Seen], StoreMode::Add)
        .unwrap();
    let page = fetch_status_page(port(ports.http));
    assert!(page.starts_with("HTTP/1.0 200 OK\r\n"));
    assert!(page.contains("2 message(s), next UID 3"));
    assert!(page.contains("<td>\\Seen</td>"));

    server.stop();
}

#[test]
fn only_configured_protocols_listen() {
    let mut config = SystemConfig::ephemeral();
    config.http.enabled = false;

    let server = Server::start(&config, Handlers::new().smtp(Deliver)).unwrap();
    let ports = server.ports();
    assert!(ports.smtp.is_some());
    assert_eq!(None, ports.imap);
    assert_eq!(None, ports.http);
    server.stop();
}

#[test]
fn stop_closes_listeners() {
    let server =
        Server::start(&SystemConfig::ephemeral(), Handlers::new()).unwrap();
    let http = port(server.ports().http);
    assert!(fetch_status_page(http).contains("0 message(s)"));

    server.stop();
    assert!(TcpStream::connect(("127.0.0.1", http)).is_err());
}

#[test]
fn bind_conflict_is_an_error() {
    let first =
        Server::start(&SystemConfig::ephemeral(), Handlers::new()).unwrap();

    let mut config = SystemConfig::ephemeral();
    config.http.port = port(first.ports().http);
    assert_matches!(
        Err(Error::Io(_)),
        Server::start(&config, Handlers::new().smtp(Deliver))
    );

    first.stop();
}

#[test]
fn prepopulated_from_mbox() {
    crate::init_test_log();

    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("seed.mbox");
    std::fs::write(
        &path,
        b"From MAILER-DAEMON Thu Jan  1 00:00:00 2024\n\
          Subject: Seeded\n\
          \n\
          one\n\
          \n\
          From MAILER-DAEMON Thu Jan  1 00:00:00 2024\n\
          Subject: Seeded again\n\
          \n\
          two\n",
    )
    .unwrap();

    let mut config = SystemConfig::ephemeral();
    config.mailbox.mbox_path = Some(path.clone());
    config.mailbox.persist_appends = true;

    let server = Server::start(&config, Handlers::new().smtp(Deliver)).unwrap();
    assert_eq!(2, server.mailbox().exists());
    assert_eq!(
        &b"Subject: Seeded again\n\ntwo\n"[..],
        &server.mailbox().fetch("2", true).unwrap()[0].raw[..]
    );

    assert_eq!(
        "250 3\n",
        deliver(port(server.ports().smtp), b"Subject: Live\n\nthree\n")
    );
    server.stop();

    let on_disk = crate::account::mbox::read_messages(&path).unwrap();
    assert_eq!(3, on_disk.len());
    assert_eq!(&b"Subject: Live\n\nthree\n"[..], &on_disk[2][..]);
}

#[test]
fn missing_mbox_file_is_an_empty_mailbox() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut config = SystemConfig::ephemeral();
    config.http.enabled = false;
    config.mailbox.mbox_path = Some(dir.path().join("nx.mbox"));

    let server = Server::start(&config, Handlers::new()).unwrap();
    assert_eq!(0, server.mailbox().exists());
    assert_eq!(Some(Uid::MIN), server.mailbox().next_uid());
}
