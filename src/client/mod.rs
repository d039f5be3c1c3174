//! Beanstalkd client.
//!
//! A `Client` owns one connection and the session state that goes with it.
//! Methods take `&self`: a mutex serializes whole request/reply cycles, so a
//! client can be shared between tasks, but the protocol still only ever has
//! one command in flight.
//!
//! The operations are grouped by concern:
//! - `jobs`: put, reserve, delete, release, bury, touch, kick, peek
//! - `tubes`: use, watch, ignore, list-tubes, pause-tube
//! - `stats`: stats, stats-job, stats-tube

mod jobs;
mod stats;
mod tubes;

pub use jobs::Job;
pub use stats::{StatValue, StatsRecord};

use crate::connection::{ClientOptions, Connection};
use crate::error::{Error, Result};
use crate::protocol::{Command, Reply};
use crate::session::Session;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

/// Connection plus the session state the server keeps for it.
struct Inner<S> {
    conn: Connection<S>,
    session: Session,
}

/// A client for one beanstalkd connection.
pub struct Client<S = TcpStream> {
    inner: Mutex<Inner<S>>,
    /// Flipped once by `close`; in-flight exchanges watch it.
    closed: watch::Sender<bool>,
}

impl Client<TcpStream> {
    /// Connect with default timeouts.
    pub async fn connect(addr: &str) -> Result<Self> {
        Self::connect_with(addr, ClientOptions::default()).await
    }

    /// Connect with explicit timeouts.
    pub async fn connect_with(addr: &str, options: ClientOptions) -> Result<Self> {
        let conn = Connection::connect(addr, &options).await?;
        debug!(address = addr, "Client connected");
        Ok(Self::from_connection(conn))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Client<S> {
    /// Run the protocol over an already established stream.
    pub fn from_stream(stream: S, options: ClientOptions) -> Self {
        Self::from_connection(Connection::new(stream, options.io_timeout))
    }

    fn from_connection(conn: Connection<S>) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            inner: Mutex::new(Inner {
                conn,
                session: Session::new(),
            }),
            closed,
        }
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Close the connection.
    ///
    /// Any exchange in flight (typically a reserve parked on the server) is
    /// interrupted and fails with a connection error; later calls fail with
    /// `Error::Closed`. Calling this more than once is harmless.
    pub async fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        let mut inner = self.inner.lock().await;
        inner.conn.close().await;
        debug!("Client closed");
    }

    /// Resolves once `close` has been called.
    async fn closing(&self) {
        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// Perform one request/reply cycle and hand the reply to `handle`
    /// together with the session, all under the connection lock.
    ///
    /// `wait` is forwarded to the transport: the extra time the server may
    /// take to answer, or `None` for no bound at all.
    async fn call<T, F>(&self, command: Command<'_>, wait: Option<Duration>, handle: F) -> Result<T>
    where
        F: FnOnce(Reply, &mut Session) -> Result<T>,
    {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        let mut inner = tokio::select! {
            guard = self.inner.lock() => guard,
            _ = self.closing() => return Err(Error::Closed),
        };
        let Inner { conn, session } = &mut *inner;

        let outcome = tokio::select! {
            reply = conn.round_trip(&command, wait) => Some(reply),
            _ = self.closing() => None,
        };
        let reply = match outcome {
            Some(reply) => reply?,
            None => {
                debug!(command = command.name(), "Exchange interrupted by close");
                conn.abandon();
                return Err(Error::aborted());
            }
        };

        let result = handle(reply, session);
        if let Err(Error::Protocol(msg)) = &result {
            warn!(command = command.name(), error = %msg, "Unexpected reply");
            conn.abandon();
        }
        result
    }
}
