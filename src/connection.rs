//! Transport for a single beanstalkd connection.
//!
//! Owns the stream and the read buffer, writes one encoded command, and
//! reads until exactly one reply has been framed. Every write is bounded by
//! the I/O deadline; every read by the I/O deadline plus whatever protocol
//! wait the command asked the server for.
//!
//! Any I/O error, EOF, deadline expiry or framing violation moves the
//! connection to `Broken`. The stream may hold a partial frame at that point,
//! so nothing is ever read from it again.

use crate::error::{Error, Result};
use crate::protocol::{parse, pending_body_len, Command, ParseResult, Reply};
use bytes::{Buf, BytesMut};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream};
use tracing::{debug, trace, warn};

/// Port beanstalkd listens on by default.
pub const DEFAULT_PORT: u16 = 11300;

/// Read buffer size
const BUFFER_SIZE: usize = 16 * 1024;

/// Idle time before the kernel starts probing a silent peer.
const KEEPALIVE_IDLE: Duration = Duration::from_secs(30);

/// Timeouts applied by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    /// Bound on establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Minimum deadline for every read and write, on top of any wait the
    /// command itself requests.
    pub io_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(5),
        }
    }
}

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Ready for the next command.
    Open,
    /// A transport failure happened, or an exchange was cut short; the
    /// stream is out of sync.
    Broken,
    /// Closed by the caller; the stream has been dropped.
    Closed,
}

/// A single server connection.
#[derive(Debug)]
pub struct Connection<S> {
    stream: Option<S>,
    buffer: BytesMut,
    state: ConnState,
    io_timeout: Duration,
}

impl Connection<TcpStream> {
    /// Resolve `addr` and dial each address in turn until one answers.
    pub async fn connect(addr: &str, options: &ClientOptions) -> Result<Self> {
        let mut last_err = None;

        for resolved in tokio::net::lookup_host(addr).await? {
            match tokio::time::timeout(options.connect_timeout, dial(resolved)).await {
                Ok(Ok(stream)) => {
                    debug!(peer = %resolved, "Connected");
                    return Ok(Connection::new(stream, options.io_timeout));
                }
                Ok(Err(e)) => {
                    debug!(peer = %resolved, error = %e, "Connect failed");
                    last_err = Some(e);
                }
                Err(_) => {
                    debug!(peer = %resolved, "Connect timed out");
                    last_err = Some(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("connect to {} timed out", resolved),
                    ));
                }
            }
        }

        Err(Error::Connection(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} did not resolve to any address", addr),
            )
        })))
    }
}

/// Open a TCP stream with Nagle disabled and keepalive probing enabled.
async fn dial(addr: SocketAddr) -> io::Result<TcpStream> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_nodelay(true)?;
    socket.set_keepalive(true)?;
    socket.set_tcp_keepalive(&socket2::TcpKeepalive::new().with_time(KEEPALIVE_IDLE))?;
    socket.set_nonblocking(true)?;

    let socket = TcpSocket::from_std_stream(socket.into());
    socket.connect(addr).await
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    /// Wrap an already connected stream.
    pub fn new(stream: S, io_timeout: Duration) -> Self {
        Self {
            stream: Some(stream),
            buffer: BytesMut::with_capacity(BUFFER_SIZE),
            state: ConnState::Open,
            io_timeout,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Send `command` and read its reply.
    ///
    /// `wait` is the time the server may legitimately take before answering
    /// (the reserve timeout); `None` means the server may hold the reply
    /// indefinitely.
    pub async fn round_trip(&mut self, command: &Command<'_>, wait: Option<Duration>) -> Result<Reply> {
        match self.state {
            ConnState::Open => {}
            ConnState::Broken => return Err(Error::broken()),
            ConnState::Closed => return Err(Error::Closed),
        }

        // Broken until the whole reply is in: a dropped exchange must not
        // hand its reply to the next command.
        self.state = ConnState::Broken;
        let result = self.exchange(command, wait).await;
        match &result {
            Ok(_) => self.state = ConnState::Open,
            Err(e) => warn!(command = command.name(), error = %e, "Connection failed"),
        }
        result
    }

    async fn exchange(&mut self, command: &Command<'_>, wait: Option<Duration>) -> Result<Reply> {
        let stream = self.stream.as_mut().ok_or(Error::Closed)?;
        let frame = command.encode();

        trace!(command = command.name(), bytes = frame.len(), "Sending command");
        tokio::time::timeout(self.io_timeout, async {
            stream.write_all(&frame).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| Error::timed_out("sending command"))??;

        let buffer = &mut self.buffer;
        match wait {
            Some(wait) => {
                let deadline = wait.saturating_add(self.io_timeout);
                tokio::time::timeout(deadline, read_reply(stream, buffer))
                    .await
                    .map_err(|_| Error::timed_out("reading reply"))?
            }
            None => read_reply(stream, buffer).await,
        }
    }

    /// Give up on an exchange that was interrupted midway.
    pub fn abandon(&mut self) {
        if self.state == ConnState::Open {
            self.state = ConnState::Broken;
        }
    }

    /// Say goodbye if the stream is still in sync, then drop it.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if self.state == ConnState::Open {
                let quit = Command::Quit.encode();
                let _ = tokio::time::timeout(self.io_timeout, async {
                    stream.write_all(&quit).await?;
                    stream.shutdown().await
                })
                .await;
            }
        }
        self.buffer.clear();
        self.state = ConnState::Closed;
    }
}

/// Read until one whole reply is buffered, then split it off.
async fn read_reply<S: AsyncRead + Unpin>(stream: &mut S, buffer: &mut BytesMut) -> Result<Reply> {
    loop {
        match parse(&buffer[..]) {
            ParseResult::Complete(reply, consumed) => {
                buffer.advance(consumed);
                trace!(status = reply.status.keyword(), "Received reply");
                return Ok(reply);
            }
            ParseResult::Incomplete => {
                if let Some(needed) = pending_body_len(&buffer[..]) {
                    buffer.reserve(needed);
                }
                let n = stream.read_buf(buffer).await?;
                if n == 0 {
                    return Err(Error::Connection(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "server closed the connection",
                    )));
                }
            }
            ParseResult::Error(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Status;
    use tokio::net::TcpListener;
    use tokio_test::io::Builder;

    const IO: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn test_round_trip() {
        let mock = Builder::new()
            .write(b"delete 5\r\n")
            .read(b"DELETED\r\n")
            .build();
        let mut conn = Connection::new(mock, IO);

        let reply = conn
            .round_trip(&Command::Delete { id: 5 }, Some(Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(reply.status, Status::Deleted);
        assert_eq!(conn.state(), ConnState::Open);
    }

    #[tokio::test]
    async fn test_body_split_across_reads() {
        let mock = Builder::new()
            .write(b"reserve-with-timeout 0\r\n")
            .read(b"RESERVED 3 11\r\nhel")
            .read(b"lo\r\nwor")
            .read(b"ld\r\n")
            .build();
        let mut conn = Connection::new(mock, IO);

        let reply = conn
            .round_trip(&Command::ReserveWithTimeout { seconds: 0 }, Some(Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(reply.status, Status::Reserved);
        assert_eq!(reply.body.as_deref(), Some(&b"hello\r\nworld"[..]));
    }

    #[tokio::test]
    async fn test_eof_breaks_connection() {
        let mock = Builder::new().write(b"stats\r\n").read(b"OK 10\r\nabc").build();
        let mut conn = Connection::new(mock, IO);

        match conn.round_trip(&Command::Stats, Some(Duration::ZERO)).await {
            Err(Error::Connection(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(conn.state(), ConnState::Broken);

        // Never touches the stream again
        match conn.round_trip(&Command::Stats, Some(Duration::ZERO)).await {
            Err(Error::Connection(e)) => assert_eq!(e.kind(), io::ErrorKind::NotConnected),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_framing_error_breaks_connection() {
        let mock = Builder::new()
            .write(b"peek 1\r\n")
            .read(b"FOUND 1 2\r\nabcd")
            .build();
        let mut conn = Connection::new(mock, IO);

        let err = conn
            .round_trip(&Command::Peek { id: 1 }, Some(Duration::ZERO))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert_eq!(conn.state(), ConnState::Broken);
    }

    #[tokio::test]
    async fn test_read_deadline() {
        let (client, _server) = tokio::io::duplex(1024);
        let mut conn = Connection::new(client, Duration::from_millis(50));

        match conn.round_trip(&Command::Stats, Some(Duration::ZERO)).await {
            Err(Error::Connection(e)) => assert_eq!(e.kind(), io::ErrorKind::TimedOut),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(conn.state(), ConnState::Broken);
    }

    #[tokio::test]
    async fn test_wait_extends_deadline() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut conn = Connection::new(client, Duration::from_millis(50));

        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let n = server.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"reserve-with-timeout 1\r\n");
            tokio::time::sleep(Duration::from_millis(200)).await;
            server.write_all(b"TIMED_OUT\r\n").await.unwrap();
            server
        });

        let reply = conn
            .round_trip(
                &Command::ReserveWithTimeout { seconds: 1 },
                Some(Duration::from_secs(1)),
            )
            .await
            .unwrap();
        assert_eq!(reply.status, Status::TimedOut);
        assert_eq!(conn.state(), ConnState::Open);
        drop(responder.await.unwrap());
    }

    #[tokio::test]
    async fn test_dropped_exchange_breaks_connection() {
        let (client, _server) = tokio::io::duplex(1024);
        let mut conn = Connection::new(client, IO);

        let cut_short = tokio::time::timeout(
            Duration::from_millis(20),
            conn.round_trip(&Command::Delete { id: 1 }, Some(Duration::ZERO)),
        )
        .await;
        assert!(cut_short.is_err());
        assert_eq!(conn.state(), ConnState::Broken);

        match conn.round_trip(&Command::Delete { id: 2 }, Some(Duration::ZERO)).await {
            Err(Error::Connection(e)) => assert_eq!(e.kind(), io::ErrorKind::NotConnected),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_oversized_body_breaks_connection() {
        let mock = Builder::new()
            .write(b"stats\r\n")
            .read(b"OK 100000000000000\r\n")
            .build();
        let mut conn = Connection::new(mock, IO);

        let err = conn
            .round_trip(&Command::Stats, Some(Duration::ZERO))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert_eq!(conn.state(), ConnState::Broken);
    }

    #[tokio::test]
    async fn test_close_sends_quit() {
        let mock = Builder::new().write(b"quit\r\n").build();
        let mut conn = Connection::new(mock, IO);

        conn.close().await;
        assert_eq!(conn.state(), ConnState::Closed);
        assert!(matches!(
            conn.round_trip(&Command::Stats, Some(Duration::ZERO)).await,
            Err(Error::Closed)
        ));

        // Idempotent
        conn.close().await;
        assert_eq!(conn.state(), ConnState::Closed);
    }

    #[tokio::test]
    async fn test_close_after_abandon_skips_quit() {
        let mock = Builder::new().build();
        let mut conn = Connection::new(mock, IO);

        conn.abandon();
        assert_eq!(conn.state(), ConnState::Broken);
        conn.close().await;
        assert_eq!(conn.state(), ConnState::Closed);
    }

    #[tokio::test]
    async fn test_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let conn = Connection::connect(&addr, &ClientOptions::default())
            .await
            .unwrap();
        assert_eq!(conn.state(), ConnState::Open);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        match Connection::connect(&addr, &ClientOptions::default()).await {
            Err(Error::Connection(_)) => {}
            other => panic!("unexpected: {:?}", other.map(|c| c.state())),
        }
    }
}
