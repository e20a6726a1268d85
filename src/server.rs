// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! RESP2 front end: accepts client connections and feeds each command to
//! the [`Dispatcher`].
//!
//! One tokio task per connection; commands on a connection are handled
//! strictly in order, one reply each. Connection lifecycle is observable
//! through [`ServerHooks`].

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use redis_protocol::codec::Resp2;
use redis_protocol::resp2::types::BytesFrame;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::dispatch::{AfterReply, Command, Dispatcher, Reply};

/// A framed client connection.
pub type Connection = Framed<TcpStream, Resp2>;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// A connection handed off by `DETACH`. The owner writes any further
/// replies itself.
pub struct DetachedConn {
    pub peer: SocketAddr,
    pub framed: Connection,
    /// Reply owed to the client for the `DETACH` itself
    pub pending: Reply,
}

impl DetachedConn {
    pub async fn write(&mut self, reply: Reply) -> Result<(), ServerError> {
        send(&mut self.framed, reply).await
    }

    /// Write the owed reply and close.
    pub async fn finish(mut self) -> Result<(), ServerError> {
        let pending = std::mem::replace(&mut self.pending, Reply::Nil);
        self.write(pending).await
    }
}

/// Connection lifecycle callbacks.
pub trait ServerHooks: Send + Sync + 'static {
    /// Admission control. Returning false drops the connection unanswered.
    fn on_accept(&self, _peer: SocketAddr) -> bool {
        true
    }

    /// Connection ended (client gone, QUIT, or an I/O or protocol error).
    fn on_close(&self, _peer: SocketAddr, _error: Option<&ServerError>) {}

    /// Takes ownership of a detached connection.
    fn on_detach(&self, conn: DetachedConn);
}

/// Accepts everything, logs lifecycle, answers detached connections with
/// their pending reply and closes them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHooks;

impl ServerHooks for LoggingHooks {
    fn on_accept(&self, peer: SocketAddr) -> bool {
        debug!(%peer, "Accepted connection");
        true
    }

    fn on_close(&self, peer: SocketAddr, error: Option<&ServerError>) {
        match error {
            Some(e) => debug!(%peer, error = %e, "Connection closed with error"),
            None => debug!(%peer, "Connection closed"),
        }
    }

    fn on_detach(&self, conn: DetachedConn) {
        let peer = conn.peer;
        debug!(%peer, "Connection detached");
        tokio::spawn(async move {
            if let Err(e) = conn.finish().await {
                warn!(%peer, error = %e, "Failed to answer detached connection");
            }
        });
    }
}

pub struct ProxyServer {
    listener: TcpListener,
    dispatcher: Dispatcher,
    hooks: Arc<dyn ServerHooks>,
}

impl ProxyServer {
    /// Bind the listen address. Failure here is fatal for the process.
    pub async fn bind(addr: &str, dispatcher: Dispatcher) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).await.map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        Ok(Self {
            listener,
            dispatcher,
            hooks: Arc::new(LoggingHooks),
        })
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: impl ServerHooks) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until the process exits.
    pub async fn serve(self) -> Result<(), ServerError> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves. In-flight connections are left to
    /// finish on their own tasks.
    pub async fn serve_with_shutdown(self, shutdown: impl Future<Output = ()>) -> Result<(), ServerError> {
        info!(addr = %self.local_addr()?, "Proxy listening");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting connections");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    let (socket, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "Accept failed");
                            continue;
                        }
                    };
                    if !self.hooks.on_accept(peer) {
                        continue;
                    }
                    let _ = socket.set_nodelay(true);

                    let dispatcher = self.dispatcher.clone();
                    let hooks = self.hooks.clone();
                    tokio::spawn(async move {
                        crate::metrics::connection_opened();
                        let framed = Framed::new(socket, Resp2::default());
                        let result = handle_connection(framed, peer, &dispatcher).await;
                        crate::metrics::connection_closed();
                        match result {
                            Ok(Some(detached)) => hooks.on_detach(detached),
                            Ok(None) => hooks.on_close(peer, None),
                            Err(e) => hooks.on_close(peer, Some(&e)),
                        }
                    });
                }
            }
        }
    }
}

/// Read-dispatch-reply loop. Returns the connection if it was detached.
async fn handle_connection(
    mut framed: Connection,
    peer: SocketAddr,
    dispatcher: &Dispatcher,
) -> Result<Option<DetachedConn>, ServerError> {
    while let Some(frame) = framed.next().await {
        let frame = frame.map_err(|e| ServerError::Protocol(e.to_string()))?;
        let cmd = match parse_command(frame) {
            Ok(Some(cmd)) => cmd,
            Ok(None) => continue,
            Err(reply) => {
                send(&mut framed, reply).await?;
                continue;
            }
        };

        let outcome = dispatcher.dispatch(&cmd).await;
        match outcome.after {
            AfterReply::Continue => send(&mut framed, outcome.reply).await?,
            AfterReply::Close => {
                send(&mut framed, outcome.reply).await?;
                return Ok(None);
            }
            AfterReply::Detach => {
                return Ok(Some(DetachedConn {
                    peer,
                    framed,
                    pending: outcome.reply,
                }))
            }
        }
    }
    Ok(None)
}

async fn send(framed: &mut Connection, reply: Reply) -> Result<(), ServerError> {
    framed
        .send(reply.into_frame())
        .await
        .map_err(|e| ServerError::Protocol(e.to_string()))
}

/// Turn a request frame into a command. Empty arrays are ignored; anything
/// else malformed gets an error reply.
fn parse_command(frame: BytesFrame) -> Result<Option<Command>, Reply> {
    let BytesFrame::Array(parts) = frame else {
        return Err(Reply::error("ERR Protocol error: expected array"));
    };
    if parts.is_empty() {
        return Ok(None);
    }

    parts
        .into_iter()
        .map(|part| match part {
            BytesFrame::BulkString(b) | BytesFrame::SimpleString(b) => Ok(b),
            BytesFrame::Integer(i) => Ok(Bytes::from(i.to_string())),
            _ => Err(Reply::error("ERR Protocol error: expected bulk string")),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(|args| Some(Command::new(args)))
}
