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

use std::path::{Path, PathBuf};

use structopt::StructOpt;

use crate::support::sysexits::*;
use crate::support::system_config::SystemConfig;

#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
enum Command {
    Serve(ServeSubcommand),
    Dump(DumpSubcommand),
}

/// Run a server over a single in-memory INBOX until interrupted.
///
/// The mailbox can be pre-seeded from an mbox file. Settings given on the
/// command line override those in the configuration file. If a file named
/// `logging.toml` exists next to the configuration file, it is used to
/// configure log4rs; otherwise everything at level INFO and above is logged
/// to standard error.
///
/// The command-line server speaks only the HTTP status protocol, so nothing
/// is ever delivered to it. SMTP and IMAP, and with them the `[smtp]`,
/// `[imap]` and `persist_appends` settings, only take effect when localmail
/// is embedded as a library together with handlers for those protocols.
#[derive(StructOpt)]
pub(super) struct ServeSubcommand {
    /// Path to `localmail.toml`.
    #[structopt(long, parse(from_os_str))]
    pub(super) config: Option<PathBuf>,

    /// Serve the status page on this port (0 for any free port).
    #[structopt(long)]
    pub(super) http_port: Option<u16>,

    /// Pre-seed the mailbox from this mbox file.
    #[structopt(long, parse(from_os_str))]
    pub(super) mbox: Option<PathBuf>,
}

/// Load an mbox file into a fresh mailbox and list its messages.
///
/// One line is printed per message: sequence number, UID, size in bytes,
/// and subject. With `--search`, only messages matching the IMAP-style query
/// are listed, e.g. `--search 'OR (LARGER 1000) (UID 4:*)'`.
#[derive(StructOpt)]
pub(super) struct DumpSubcommand {
    /// The mbox file to read.
    #[structopt(long, parse(from_os_str))]
    pub(super) mbox: PathBuf,

    /// Only list messages matching this search query.
    #[structopt(long, default_value = "ALL")]
    pub(super) search: String,
}

pub fn main() {
    // Clap exits with status 1 instead of EX_USAGE if we use the more concise
    // API
    let cmd = Command::from_clap(&match Command::clap().get_matches_safe() {
        Ok(matches) => matches,
        Err(
            e @ clap::Error {
                kind: clap::ErrorKind::HelpDisplayed,
                ..
            },
        )
        | Err(
            e @ clap::Error {
                kind: clap::ErrorKind::VersionDisplayed,
                ..
            },
        ) => {
            println!("{}", e.message);
            return;
        }
        Err(e) => {
            eprintln!("{}", e.message);
            EX_USAGE.exit()
        }
    });

    match cmd {
        Command::Serve(cmd) => {
            let config = load_config(&cmd);
            init_log(cmd.config.as_deref());
            super::serve::serve(config);
        }
        Command::Dump(cmd) => {
            crate::init_simple_log();
            super::dump::dump(cmd);
        }
    }
}

fn load_config(cmd: &ServeSubcommand) -> SystemConfig {
    let mut config = match cmd.config {
        Some(ref path) => match SystemConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error in config file '{}': {}", path.display(), e);
                EX_CONFIG.exit()
            }
        },
        None => SystemConfig::default(),
    };

    if let Some(port) = cmd.http_port {
        config.http.port = port;
    }
    if let Some(ref mbox) = cmd.mbox {
        config.mailbox.mbox_path = Some(mbox.clone());
    }

    config
}

fn init_log(config_path: Option<&Path>) {
    let log_config_file = config_path
        .and_then(Path::parent)
        .map(|dir| dir.join("logging.toml"));

    match log_config_file {
        Some(ref path) if path.is_file() => {
            if let Err(e) =
                log4rs::init_file(path, log4rs::file::Deserializers::new())
            {
                eprintln!("Error in '{}': {}", path.display(), e);
                EX_CONFIG.exit();
            }
        }
        _ => crate::init_simple_log(),
    }
}
