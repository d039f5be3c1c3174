//! Client error types.
//!
//! Every server reply that is not the one an operation expects is turned into
//! exactly one of these variants by the reply classifier. Transport failures
//! (`Connection`, and `Protocol` raised while decoding) leave the connection
//! unusable; the rest are ordinary outcomes the caller may act on.

use crate::protocol::ParseError;
use std::fmt;
use std::io;

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by the server that are not tied to a single job or tube.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerError {
    /// The job body was not followed by `\r\n`.
    ExpectedCrlf,
    /// The server is in drain mode and refuses new jobs.
    Draining,
    /// The server could not allocate memory for the request.
    OutOfMemory,
    /// A bug in the server.
    InternalError,
    /// The command line was malformed.
    BadFormat,
    /// The server does not know the command.
    UnknownCommand,
}

impl ServerError {
    /// Wire keyword for this condition.
    pub fn keyword(&self) -> &'static str {
        match self {
            ServerError::ExpectedCrlf => "EXPECTED_CRLF",
            ServerError::Draining => "DRAINING",
            ServerError::OutOfMemory => "OUT_OF_MEMORY",
            ServerError::InternalError => "INTERNAL_ERROR",
            ServerError::BadFormat => "BAD_FORMAT",
            ServerError::UnknownCommand => "UNKNOWN_COMMAND",
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Errors that can occur in the client.
#[derive(Debug)]
pub enum Error {
    /// Dial or I/O failure, including deadline expiry and mid-operation
    /// disconnects.
    Connection(io::Error),
    /// The server sent a reply that violates the framing or that no
    /// operation expects.
    Protocol(String),
    /// `reserve` waited for the requested time without finding a job.
    Timeout,
    /// A job reserved by this client is about to hit its TTR.
    DeadlineSoon,
    /// The job or tube does not exist, or the job is not reserved by this
    /// client.
    NotFound,
    /// The server buried the job instead of queueing it. Carries the job id
    /// when the server reports one (on `put`).
    Buried(Option<u64>),
    /// Attempted to ignore the only watched tube.
    NotIgnored,
    /// The job body is larger than the server's `max-job-size`.
    JobTooBig,
    /// The client was closed.
    Closed,
    /// A server-side condition not specific to the request's job or tube.
    Server(ServerError),
    /// A tube name was rejected before it was sent.
    InvalidName(String),
}

impl Error {
    /// Whether this error left the connection unusable.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Protocol(_) | Error::Closed)
    }

    pub(crate) fn timed_out(what: &str) -> Self {
        Error::Connection(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("deadline elapsed while {what}"),
        ))
    }

    pub(crate) fn broken() -> Self {
        Error::Connection(io::Error::new(
            io::ErrorKind::NotConnected,
            "connection failed earlier and can no longer be used",
        ))
    }

    pub(crate) fn aborted() -> Self {
        Error::Connection(io::Error::new(
            io::ErrorKind::ConnectionAborted,
            "connection closed while awaiting reply",
        ))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "connection error: {}", e),
            Error::Protocol(msg) => write!(f, "protocol error: {}", msg),
            Error::Timeout => write!(f, "timed out waiting for a job"),
            Error::DeadlineSoon => write!(f, "deadline soon on a reserved job"),
            Error::NotFound => write!(f, "job or tube not found"),
            Error::Buried(Some(id)) => write!(f, "job {} buried", id),
            Error::Buried(None) => write!(f, "job buried"),
            Error::NotIgnored => write!(f, "cannot ignore the only watched tube"),
            Error::JobTooBig => write!(f, "job body too big"),
            Error::Closed => write!(f, "client closed"),
            Error::Server(e) => write!(f, "server error: {}", e),
            Error::InvalidName(name) => write!(f, "invalid tube name: {:?}", name),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Connection(err)
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        Error::Protocol(err.to_string())
    }
}
