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

//! Listening sockets and the server lifecycle.
//!
//! `Server::start` builds the one shared mailbox, binds every listener and
//! returns once all of them are accepting connections. Each listener runs on
//! its own thread and hands every accepted connection to a fresh thread
//! running its `ConnectionHandler`.
//!
//! The SMTP and IMAP wire protocols are not implemented here. They are
//! plugged in as `ConnectionHandler`s by the embedding application; a
//! listener is only bound for a protocol that has one. The HTTP status page
//! is built in.

pub mod http;

#[cfg(test)]
mod integration_tests;

use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use log::{error, info, warn};

use crate::account::account::Realm;
use crate::account::mailbox::Mailbox;
use crate::support::error::Error;
use crate::support::log_prefix::LogPrefix;
use crate::support::system_config::SystemConfig;

/// How long an idle listener waits between checks for the stop signal.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Serves one accepted connection of some protocol.
///
/// `handle` runs on a thread dedicated to the connection and should return
/// when the client disconnects. Errors are logged and otherwise ignored.
pub trait ConnectionHandler: Send + Sync + 'static {
    fn handle(
        &self,
        stream: TcpStream,
        context: &ConnectionContext,
    ) -> io::Result<()>;
}

/// Everything a connection handler may touch.
#[derive(Clone, Debug)]
pub struct ConnectionContext {
    pub mailbox: Arc<Mailbox>,
    pub realm: Realm,
    pub log_prefix: LogPrefix,
    pub peer: SocketAddr,
}

/// The protocol front-ends to serve.
#[derive(Clone, Default)]
pub struct Handlers {
    pub smtp: Option<Arc<dyn ConnectionHandler>>,
    pub imap: Option<Arc<dyn ConnectionHandler>>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn smtp(mut self, handler: impl ConnectionHandler) -> Self {
        self.smtp = Some(Arc::new(handler));
        self
    }

    pub fn imap(mut self, handler: impl ConnectionHandler) -> Self {
        self.imap = Some(Arc::new(handler));
        self
    }
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("smtp", &self.smtp.is_some())
            .field("imap", &self.imap.is_some())
            .finish()
    }
}

/// The ports the listeners actually bound, which differ from the configured
/// ones when those were 0. A protocol that is not being served has `None`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ServerPorts {
    pub smtp: Option<u16>,
    pub imap: Option<u16>,
    pub http: Option<u16>,
}

pub struct Server;

impl Server {
    /// Start serving according to `config`.
    ///
    /// If `config` names an mbox file, its messages are loaded before any
    /// listener is bound. Fails if the mbox file cannot be read or any
    /// listener cannot be bound; in the latter case, listeners already
    /// started are stopped again.
    pub fn start(
        config: &SystemConfig,
        handlers: Handlers,
    ) -> Result<RunningServer, Error> {
        let mailbox = Arc::new(match config.mailbox.mbox_path {
            Some(ref path) => {
                Mailbox::from_mbox(path, config.mailbox.persist_appends)?
            }
            None => Mailbox::new(),
        });
        Self::start_with_mailbox(config, handlers, mailbox)
    }

    /// Start serving an existing mailbox. `config.mailbox` is ignored.
    pub fn start_with_mailbox(
        config: &SystemConfig,
        handlers: Handlers,
        mailbox: Arc<Mailbox>,
    ) -> Result<RunningServer, Error> {
        let (stop_tx, stop_rx) = channel::bounded::<()>(0);
        let realm = Realm::new(Arc::clone(&mailbox));
        // Constructed first so that an early return stops and joins
        // whatever was already started.
        let mut running = RunningServer {
            ports: ServerPorts::default(),
            mailbox,
            stop: Some(stop_tx),
            listeners: Vec::new(),
        };

        let bind = |protocol: &'static str,
                    port: u16,
                    handler: Arc<dyn ConnectionHandler>| {
            Listener::bind(
                protocol,
                SocketAddr::new(config.bind_address, port),
                handler,
                realm.clone(),
                stop_rx.clone(),
            )
        };

        if let Some(handler) = handlers.smtp {
            let listener = bind("smtp", config.smtp.port, handler)?;
            running.ports.smtp = Some(running.spawn(listener)?);
        }
        if let Some(handler) = handlers.imap {
            let listener = bind("imap", config.imap.port, handler)?;
            running.ports.imap = Some(running.spawn(listener)?);
        }
        if config.http.enabled {
            let page: Arc<dyn ConnectionHandler> =
                Arc::new(http::StatusPage);
            let listener = bind("http", config.http.port, page)?;
            running.ports.http = Some(running.spawn(listener)?);
        }

        Ok(running)
    }
}

/// A started server. Dropping it stops it as well.
pub struct RunningServer {
    ports: ServerPorts,
    mailbox: Arc<Mailbox>,
    stop: Option<Sender<()>>,
    listeners: Vec<thread::JoinHandle<()>>,
}

impl RunningServer {
    pub fn ports(&self) -> ServerPorts {
        self.ports
    }

    /// The mailbox all connections share.
    pub fn mailbox(&self) -> &Arc<Mailbox> {
        &self.mailbox
    }

    fn spawn(&mut self, listener: Listener) -> Result<u16, Error> {
        let port = listener.port;
        let thread = thread::Builder::new()
            .name(format!("{}-listener", listener.protocol))
            .spawn(move || listener.run())?;
        self.listeners.push(thread);
        Ok(port)
    }

    /// Serve until the process is terminated.
    pub fn wait(mut self) {
        for listener in self.listeners.drain(..) {
            let _ = listener.join();
        }
    }

    /// Stop accepting connections and wait for every listener to close.
    ///
    /// Connections already accepted are left to run to completion.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the only sender disconnects every listener's receiver
        if self.stop.take().is_none() {
            return;
        }

        for listener in self.listeners.drain(..) {
            if listener.join().is_err() {
                error!("A listener thread panicked");
            }
        }
        info!("Server stopped");
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for RunningServer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RunningServer")
            .field("ports", &self.ports)
            .field("running", &self.stop.is_some())
            .finish()
    }
}

struct Listener {
    protocol: &'static str,
    port: u16,
    socket: TcpListener,
    handler: Arc<dyn ConnectionHandler>,
    realm: Realm,
    stop: Receiver<()>,
}

impl Listener {
    fn bind(
        protocol: &'static str,
        addr: SocketAddr,
        handler: Arc<dyn ConnectionHandler>,
        realm: Realm,
        stop: Receiver<()>,
    ) -> Result<Self, Error> {
        let socket = TcpListener::bind(addr)?;
        // Accept is polled so that the stop signal is noticed
        socket.set_nonblocking(true)?;
        let port = socket.local_addr()?.port();
        info!("Listening for {} on {}:{}", protocol, addr.ip(), port);

        Ok(Listener {
            protocol,
            port,
            socket,
            handler,
            realm,
            stop,
        })
    }

    fn run(self) {
        loop {
            match self.socket.accept() {
                Ok((stream, peer)) => self.dispatch(stream, peer),
                Err(e) if io::ErrorKind::WouldBlock == e.kind() => {
                    if self.stop_requested() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(
                        "{} Failed to accept connection: {}",
                        self.protocol, e
                    );
                    if self.stop_requested() {
                        break;
                    }
                }
            }
        }

        info!(
            "Stopped listening for {} on port {}",
            self.protocol, self.port
        );
    }

    /// Wait a little for the stop signal.
    fn stop_requested(&self) -> bool {
        match self.stop.recv_timeout(STOP_POLL_INTERVAL) {
            Err(RecvTimeoutError::Timeout) => false,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        }
    }

    fn dispatch(&self, stream: TcpStream, peer: SocketAddr) {
        let context = ConnectionContext {
            mailbox: Arc::clone(self.realm.mailbox()),
            realm: self.realm.clone(),
            log_prefix: LogPrefix::for_peer(self.protocol, Some(peer)),
            peer,
        };
        let handler = Arc::clone(&self.handler);

        let spawned = thread::Builder::new()
            .name(format!("{}-{}", self.protocol, peer))
            .spawn(move || {
                info!("{} Accepted connection", context.log_prefix);
                // The accepted socket may inherit the listener's
                // non-blocking mode on some platforms
                let result = stream
                    .set_nonblocking(false)
                    .and_then(|()| handler.handle(stream, &context));
                match result {
                    Ok(()) => info!(
                        "{} Connection closed normally",
                        context.log_prefix
                    ),
                    Err(e) => warn!(
                        "{} Connection error: {}",
                        context.log_prefix, e
                    ),
                }
            });

        if let Err(e) = spawned {
            error!(
                "{} Failed to start connection thread for {}: {}",
                self.protocol, peer, e
            );
        }
    }
}
