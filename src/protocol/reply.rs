//! Beanstalk reply parser and status classifier.
//!
//! A reply is one `\r\n`-terminated line: a status keyword followed by
//! space-separated arguments. `RESERVED`, `FOUND` and `OK` announce a body
//! whose length is their last argument; the body is read by that exact byte
//! count and must be followed by `\r\n`.

use crate::error::{Error, Result, ServerError};
use bytes::Bytes;
use std::fmt;
use std::str;

/// Longest reply line accepted before the terminator.
pub const MAX_LINE_LENGTH: usize = 1024;

/// Largest body a reply may announce. Well above any `max-job-size` a
/// server is run with.
pub const MAX_BODY_LENGTH: usize = 64 * 1024 * 1024;

/// Server status keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Inserted,
    Reserved,
    Deleted,
    Released,
    Buried,
    Touched,
    Using,
    Watching,
    Found,
    Kicked,
    Paused,
    Ok,
    NotFound,
    TimedOut,
    DeadlineSoon,
    NotIgnored,
    JobTooBig,
    ExpectedCrlf,
    Draining,
    OutOfMemory,
    InternalError,
    BadFormat,
    UnknownCommand,
    /// Any keyword this client does not know
    Unknown(String),
}

impl Status {
    pub fn from_keyword(keyword: &str) -> Status {
        match keyword {
            "INSERTED" => Status::Inserted,
            "RESERVED" => Status::Reserved,
            "DELETED" => Status::Deleted,
            "RELEASED" => Status::Released,
            "BURIED" => Status::Buried,
            "TOUCHED" => Status::Touched,
            "USING" => Status::Using,
            "WATCHING" => Status::Watching,
            "FOUND" => Status::Found,
            "KICKED" => Status::Kicked,
            "PAUSED" => Status::Paused,
            "OK" => Status::Ok,
            "NOT_FOUND" => Status::NotFound,
            "TIMED_OUT" => Status::TimedOut,
            "DEADLINE_SOON" => Status::DeadlineSoon,
            "NOT_IGNORED" => Status::NotIgnored,
            "JOB_TOO_BIG" => Status::JobTooBig,
            "EXPECTED_CRLF" => Status::ExpectedCrlf,
            "DRAINING" => Status::Draining,
            "OUT_OF_MEMORY" => Status::OutOfMemory,
            "INTERNAL_ERROR" => Status::InternalError,
            "BAD_FORMAT" => Status::BadFormat,
            "UNKNOWN_COMMAND" => Status::UnknownCommand,
            other => Status::Unknown(other.to_string()),
        }
    }

    pub fn keyword(&self) -> &str {
        match self {
            Status::Inserted => "INSERTED",
            Status::Reserved => "RESERVED",
            Status::Deleted => "DELETED",
            Status::Released => "RELEASED",
            Status::Buried => "BURIED",
            Status::Touched => "TOUCHED",
            Status::Using => "USING",
            Status::Watching => "WATCHING",
            Status::Found => "FOUND",
            Status::Kicked => "KICKED",
            Status::Paused => "PAUSED",
            Status::Ok => "OK",
            Status::NotFound => "NOT_FOUND",
            Status::TimedOut => "TIMED_OUT",
            Status::DeadlineSoon => "DEADLINE_SOON",
            Status::NotIgnored => "NOT_IGNORED",
            Status::JobTooBig => "JOB_TOO_BIG",
            Status::ExpectedCrlf => "EXPECTED_CRLF",
            Status::Draining => "DRAINING",
            Status::OutOfMemory => "OUT_OF_MEMORY",
            Status::InternalError => "INTERNAL_ERROR",
            Status::BadFormat => "BAD_FORMAT",
            Status::UnknownCommand => "UNKNOWN_COMMAND",
            Status::Unknown(keyword) => keyword,
        }
    }

    /// Position of the body length among the arguments, for statuses that
    /// carry a body.
    fn body_len_index(&self) -> Option<usize> {
        match self {
            Status::Reserved | Status::Found => Some(1),
            Status::Ok => Some(0),
            _ => None,
        }
    }
}

/// A decoded server reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: Status,
    pub args: Vec<String>,
    pub body: Option<Bytes>,
}

impl Reply {
    /// Pass the reply through if it carries `expected`, otherwise classify it
    /// into the matching error.
    pub fn expect(self, expected: Status) -> Result<Reply> {
        if self.status == expected {
            Ok(self)
        } else {
            Err(self.into_error())
        }
    }

    /// Map a reply the caller did not expect to its error kind.
    pub fn into_error(self) -> Error {
        match self.status {
            Status::NotFound => Error::NotFound,
            Status::TimedOut => Error::Timeout,
            Status::DeadlineSoon => Error::DeadlineSoon,
            Status::Buried => Error::Buried(self.args.first().and_then(|a| a.parse().ok())),
            Status::NotIgnored => Error::NotIgnored,
            Status::JobTooBig => Error::JobTooBig,
            Status::ExpectedCrlf => Error::Server(ServerError::ExpectedCrlf),
            Status::Draining => Error::Server(ServerError::Draining),
            Status::OutOfMemory => Error::Server(ServerError::OutOfMemory),
            Status::InternalError => Error::Server(ServerError::InternalError),
            Status::BadFormat => Error::Server(ServerError::BadFormat),
            Status::UnknownCommand => Error::Server(ServerError::UnknownCommand),
            Status::Inserted
            | Status::Reserved
            | Status::Deleted
            | Status::Released
            | Status::Touched
            | Status::Using
            | Status::Watching
            | Status::Found
            | Status::Kicked
            | Status::Paused
            | Status::Ok => {
                Error::Protocol(format!("unexpected reply {}", self.status.keyword()))
            }
            Status::Unknown(keyword) => Error::Protocol(format!("unknown reply {:?}", keyword)),
        }
    }

    /// Argument at `index` as text.
    pub fn arg(&self, index: usize) -> Result<&str> {
        self.args.get(index).map(String::as_str).ok_or_else(|| {
            Error::Protocol(format!(
                "{} reply missing argument {}",
                self.status.keyword(),
                index
            ))
        })
    }

    /// Argument at `index` as an unsigned integer.
    pub fn number(&self, index: usize) -> Result<u64> {
        let arg = self.arg(index)?;
        arg.parse().map_err(|_| {
            Error::Protocol(format!(
                "{} reply has non-numeric argument {:?}",
                self.status.keyword(),
                arg
            ))
        })
    }

    /// Take the body out of a reply that must carry one.
    pub fn into_body(self) -> Result<Bytes> {
        match self.body {
            Some(body) => Ok(body),
            None => Err(Error::Protocol(format!(
                "{} reply has no body",
                self.status.keyword()
            ))),
        }
    }
}

/// Reply framing errors
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    /// No terminator within `MAX_LINE_LENGTH` bytes
    LineTooLong,
    /// Reply line is not valid UTF-8
    InvalidUtf8,
    /// Reply line has no status keyword
    Empty,
    /// Body-carrying reply with the wrong number of arguments
    BadArity(String),
    /// Body length is not a number
    InvalidLength(String),
    /// Body not followed by \r\n
    MissingCrlf,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::LineTooLong => {
                write!(f, "reply line longer than {} bytes", MAX_LINE_LENGTH)
            }
            ParseError::InvalidUtf8 => write!(f, "invalid UTF-8 in reply line"),
            ParseError::Empty => write!(f, "empty reply line"),
            ParseError::BadArity(line) => write!(f, "wrong number of arguments: {}", line),
            ParseError::InvalidLength(len) => write!(f, "invalid body length: {}", len),
            ParseError::MissingCrlf => write!(f, "body must end with \\r\\n"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Parse result
#[derive(Debug)]
pub enum ParseResult {
    /// A whole reply (line plus any body) with bytes consumed
    Complete(Reply, usize),
    /// Need more data
    Incomplete,
    /// The framing is violated; the connection cannot be resynchronized
    Error(ParseError),
}

/// Parse a reply from the front of `buffer`.
pub fn parse(buffer: &[u8]) -> ParseResult {
    let window = &buffer[..buffer.len().min(MAX_LINE_LENGTH + 2)];
    let line_end = match find_crlf(window) {
        Some(pos) => pos,
        None if buffer.len() >= MAX_LINE_LENGTH + 2 => {
            return ParseResult::Error(ParseError::LineTooLong)
        }
        None => return ParseResult::Incomplete,
    };

    let line = match str::from_utf8(&buffer[..line_end]) {
        Ok(s) => s,
        Err(_) => return ParseResult::Error(ParseError::InvalidUtf8),
    };

    let mut parts = line.split_ascii_whitespace();
    let status = match parts.next() {
        Some(keyword) => Status::from_keyword(keyword),
        None => return ParseResult::Error(ParseError::Empty),
    };
    let args: Vec<String> = parts.map(str::to_string).collect();
    let line_len = line_end + 2;

    let len_index = match status.body_len_index() {
        Some(index) => index,
        None => {
            return ParseResult::Complete(
                Reply {
                    status,
                    args,
                    body: None,
                },
                line_len,
            )
        }
    };

    if args.len() != len_index + 1 {
        return ParseResult::Error(ParseError::BadArity(line.to_string()));
    }
    let len = match args[len_index].parse::<usize>() {
        Ok(n) if n <= MAX_BODY_LENGTH => n,
        _ => return ParseResult::Error(ParseError::InvalidLength(args[len_index].clone())),
    };

    let data_start = line_len;
    let data_end = data_start + len;
    let total_len = data_end + 2;

    if buffer.len() < total_len {
        return ParseResult::Incomplete;
    }

    if buffer[data_end] != b'\r' || buffer[data_end + 1] != b'\n' {
        return ParseResult::Error(ParseError::MissingCrlf);
    }

    let body = Bytes::copy_from_slice(&buffer[data_start..data_end]);
    ParseResult::Complete(
        Reply {
            status,
            args,
            body: Some(body),
        },
        total_len,
    )
}

/// Number of bytes a body-carrying reply still needs, if the header line is
/// already buffered. Lets the transport reserve buffer space up front.
pub fn pending_body_len(buffer: &[u8]) -> Option<usize> {
    let window = &buffer[..buffer.len().min(MAX_LINE_LENGTH + 2)];
    let line_end = find_crlf(window)?;
    let line = str::from_utf8(&buffer[..line_end]).ok()?;
    let mut parts = line.split_ascii_whitespace();
    let index = Status::from_keyword(parts.next()?).body_len_index()?;
    let len: usize = parts.nth(index)?.parse().ok()?;
    if len > MAX_BODY_LENGTH {
        return None;
    }
    let total = line_end + 2 + len + 2;
    Some(total.saturating_sub(buffer.len()))
}

/// Find \r\n in buffer, returning the position of \r.
fn find_crlf(buffer: &[u8]) -> Option<usize> {
    (0..buffer.len().saturating_sub(1)).find(|&i| buffer[i] == b'\r' && buffer[i + 1] == b'\n')
}
