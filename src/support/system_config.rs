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

//! Server configuration.

use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::Error;

/// The complete configuration of a localmail server.
///
/// This is usually read from a `localmail.toml` file, but every field has a
/// default, so an empty file (or no file at all) gives a working server on
/// the conventional test ports.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SystemConfig {
    /// The address all listeners bind to.
    ///
    /// This defaults to the loopback address. There is no authentication of
    /// any kind, so think twice before exposing it to anything else.
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    #[serde(default)]
    pub smtp: SmtpConfig,

    #[serde(default)]
    pub imap: ImapConfig,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub mailbox: MailboxConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SmtpConfig {
    /// The port to listen for SMTP on. 0 picks an ephemeral port.
    pub port: u16,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        SmtpConfig { port: 2025 }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ImapConfig {
    /// The port to listen for IMAP on. 0 picks an ephemeral port.
    pub port: u16,
}

impl Default for ImapConfig {
    fn default() -> Self {
        ImapConfig { port: 2143 }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Whether to serve the status page at all.
    pub enabled: bool,
    /// The port to serve the status page on. 0 picks an ephemeral port.
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            enabled: true,
            port: 8880,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MailboxConfig {
    /// If set, an mbox file whose messages are loaded into the mailbox before
    /// any connection is accepted. A file that does not exist is fine.
    pub mbox_path: Option<PathBuf>,

    /// If true (and `mbox_path` is set), every message delivered after
    /// startup is also appended to the mbox file.
    pub persist_appends: bool,
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

impl Default for SystemConfig {
    fn default() -> Self {
        SystemConfig {
            bind_address: default_bind_address(),
            smtp: SmtpConfig::default(),
            imap: ImapConfig::default(),
            http: HttpConfig::default(),
            mailbox: MailboxConfig::default(),
        }
    }
}

impl SystemConfig {
    /// A configuration for tests: loopback, ephemeral ports, no mbox.
    pub fn ephemeral() -> Self {
        SystemConfig {
            smtp: SmtpConfig { port: 0 },
            imap: ImapConfig { port: 0 },
            http: HttpConfig {
                enabled: true,
                port: 0,
            },
            ..Self::default()
        }
    }

    /// Load the configuration file at `path`.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let data = fs::read(path)?;
        Ok(toml::from_slice(&data)?)
    }
}
