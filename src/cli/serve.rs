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

use log::info;

use crate::server::{Handlers, Server};
use crate::support::error::Error;
use crate::support::system_config::SystemConfig;

pub fn serve(config: SystemConfig) {
    let server = match Server::start(&config, Handlers::new()) {
        Ok(server) => server,
        Err(e @ Error::ResourceExhausted(_)) | Err(e @ Error::Io(_)) => {
            fatal!(EX_UNAVAILABLE, "Failed to start server: {}", e)
        }
        Err(e) => fatal!(EX_SOFTWARE, "Failed to start server: {}", e),
    };

    let ports = server.ports();
    info!(
        "Serving {} message(s); status page on {}",
        server.mailbox().exists(),
        ports
            .http
            .map(|port| format!("http://{}:{}/", config.bind_address, port))
            .unwrap_or_else(|| "(disabled)".to_owned())
    );

    server.wait();
}
