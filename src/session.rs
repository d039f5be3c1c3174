//! Per-connection session state.
//!
//! The server remembers, for each connection, the tube `put` targets and the
//! set of tubes `reserve` draws from. The client mirrors both so callers can
//! inspect them without a round trip. The mirror only changes after the
//! server has acknowledged the command that changes it.

use crate::error::{Error, Result};

/// Tube every connection starts out using and watching.
pub const DEFAULT_TUBE: &str = "default";

/// Longest tube name the server accepts.
pub const MAX_TUBE_NAME_LENGTH: usize = 200;

/// Check a tube name against the server's naming rules.
///
/// Names are 1 to 200 bytes of ASCII letters, digits and `-+/;.$_()`, and
/// may not start with a hyphen.
pub fn validate_tube_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_TUBE_NAME_LENGTH
        && !name.starts_with('-')
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-+/;.$_()".contains(&b));

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidName(name.to_string()))
    }
}

/// Use tube and watch set of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Tube targeted by put. Never empty.
    used: String,
    /// Tubes considered by reserve, in the order they were watched. Never
    /// empty.
    watched: Vec<String>,
}

impl Session {
    /// Session of a freshly opened connection.
    pub fn new() -> Self {
        Self {
            used: DEFAULT_TUBE.to_string(),
            watched: vec![DEFAULT_TUBE.to_string()],
        }
    }

    pub fn used(&self) -> &str {
        &self.used
    }

    pub fn watched(&self) -> &[String] {
        &self.watched
    }

    pub fn is_watching(&self, tube: &str) -> bool {
        self.watched.iter().any(|t| t == tube)
    }

    /// Record a `USING` acknowledgement.
    pub fn set_used(&mut self, tube: &str) {
        self.used = tube.to_string();
    }

    /// Record a `WATCHING` acknowledgement for `watch`.
    ///
    /// Returns `false` if the tube was already watched.
    pub fn watch(&mut self, tube: &str) -> bool {
        if self.is_watching(tube) {
            return false;
        }
        self.watched.push(tube.to_string());
        true
    }

    /// Record a `WATCHING` acknowledgement for `ignore`.
    ///
    /// Returns `false` if the tube was not watched. The last watched tube is
    /// never removed; the server refuses that with `NOT_IGNORED` before this
    /// is reached.
    pub fn ignore(&mut self, tube: &str) -> bool {
        if self.watched.len() < 2 {
            return false;
        }
        let before = self.watched.len();
        self.watched.retain(|t| t != tube);
        self.watched.len() != before
    }

    /// Whether the mirrored watch set agrees with the count the server
    /// reported.
    pub fn agrees_with(&self, server_count: u64) -> bool {
        self.watched.len() as u64 == server_count
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session() {
        let session = Session::new();
        assert_eq!(session.used(), "default");
        assert_eq!(session.watched(), ["default"]);
        assert!(session.agrees_with(1));
    }

    #[test]
    fn test_watch_and_ignore() {
        let mut session = Session::new();

        assert!(session.watch("emails"));
        assert!(!session.watch("emails"));
        assert_eq!(session.watched(), ["default", "emails"]);

        assert!(session.ignore("default"));
        assert_eq!(session.watched(), ["emails"]);

        // Last tube stays
        assert!(!session.ignore("emails"));
        assert_eq!(session.watched(), ["emails"]);
    }

    #[test]
    fn test_ignore_unwatched() {
        let mut session = Session::new();
        session.watch("a");
        assert!(!session.ignore("b"));
        assert_eq!(session.watched().len(), 2);
    }

    #[test]
    fn test_set_used() {
        let mut session = Session::new();
        session.set_used("test-tube");
        assert_eq!(session.used(), "test-tube");
        assert_eq!(session.watched(), ["default"]);
    }

    #[test]
    fn test_valid_tube_names() {
        for name in ["default", "test-tube", "a", "x+y/z;1.$_(2)", "A9"] {
            assert!(validate_tube_name(name).is_ok(), "{name} should be valid");
        }
        let longest = "t".repeat(MAX_TUBE_NAME_LENGTH);
        assert!(validate_tube_name(&longest).is_ok());
    }

    #[test]
    fn test_invalid_tube_names() {
        let too_long = "t".repeat(MAX_TUBE_NAME_LENGTH + 1);
        for name in ["", "-leading", "has space", "new\r\nline", "ümlaut", too_long.as_str()] {
            match validate_tube_name(name) {
                Err(Error::InvalidName(n)) => assert_eq!(n, name),
                other => panic!("expected InvalidName for {:?}: {:?}", name, other),
            }
        }
    }
}
