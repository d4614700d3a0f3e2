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

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

/// Tracks text that should be included at the start of every log statement
/// about one connection.
///
/// Clones of a `LogPrefix` share the same underlying data, so a protocol
/// handler that learns the user name after login updates the prefix seen by
/// everything else holding the connection's prefix.
#[derive(Clone)]
pub struct LogPrefix {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Clone)]
struct Inner {
    protocol: String,
    peer: Option<SocketAddr>,
    user: Option<String>,
}

impl LogPrefix {
    pub fn new(protocol: String) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                protocol,
                peer: None,
                user: None,
            })),
        }
    }

    pub fn for_peer(protocol: &str, peer: Option<SocketAddr>) -> Self {
        let this = Self::new(protocol.to_owned());
        this.inner.lock().unwrap().peer = peer;
        this
    }

    pub fn set_user(&self, user: String) {
        self.inner.lock().unwrap().user = Some(sanitise(user));
    }

    pub fn user(&self) -> Option<String> {
        self.inner.lock().unwrap().user.clone()
    }
}

impl fmt::Display for LogPrefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        write!(f, "{}", inner.protocol)?;
        if let Some(peer) = inner.peer {
            write!(f, ":{}", peer)?;
        }
        if let Some(ref user) = inner.user {
            write!(f, "[{}]", user)?;
        }
        Ok(())
    }
}

impl fmt::Debug for LogPrefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "LogPrefix({})", self)
    }
}

fn sanitise(mut s: String) -> String {
    s.retain(|c| !c.is_control());
    if let Some((truncate_len, _)) = s.char_indices().nth(64) {
        s.truncate(truncate_len);
    }

    s
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display_forms() {
        let prefix = LogPrefix::new("smtp".to_owned());
        assert_eq!("smtp", prefix.to_string());

        let peer = "127.0.0.1:4321".parse().unwrap();
        let prefix = LogPrefix::for_peer("imap", Some(peer));
        assert_eq!("imap:127.0.0.1:4321", prefix.to_string());

        let shared = prefix.clone();
        shared.set_user("al\nice".to_owned());
        assert_eq!("imap:127.0.0.1:4321[alice]", prefix.to_string());
        assert_eq!(Some("alice".to_owned()), prefix.user());
    }

    #[test]
    fn long_user_names_are_truncated() {
        let prefix = LogPrefix::new("imap".to_owned());
        prefix.set_user("x".repeat(100));
        assert_eq!(Some("x".repeat(64)), prefix.user());
    }
}
