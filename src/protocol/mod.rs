//! Beanstalk wire protocol.
//!
//! Commands and replies are ASCII lines ending in `\r\n`. Job bodies travel
//! after their line as a length-prefixed block:
//!
//! ```text
//! put 1 0 60 5\r\nhello\r\n      ->  INSERTED 12\r\n
//! reserve-with-timeout 5\r\n     ->  RESERVED 12 5\r\nhello\r\n
//! list-tubes\r\n                 ->  OK 14\r\n---\n- default\n\r\n
//! ```
//!
//! The declared length is authoritative: bodies may contain `\r\n`.

pub mod command;
pub mod reply;
pub mod yaml;

pub use command::Command;
pub use reply::{
    parse, pending_body_len, ParseError, ParseResult, Reply, Status, MAX_BODY_LENGTH,
    MAX_LINE_LENGTH,
};
