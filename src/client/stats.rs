//! Statistics commands and their decoded records.

use super::Client;
use crate::error::Result;
use crate::protocol::{yaml, Command, Status};
use crate::session::validate_tube_name;
use std::collections::btree_map::{self, BTreeMap};
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

/// One value from a stats document.
#[derive(Debug, Clone, PartialEq)]
pub enum StatValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl StatValue {
    /// Type a raw value as the server wrote it. Quoted values are always
    /// text, even when they look numeric.
    pub fn parse(raw: &str) -> StatValue {
        let unquoted = yaml::unquote(raw);
        if unquoted.len() != raw.len() {
            return StatValue::Text(unquoted.to_string());
        }
        if let Ok(n) = raw.parse::<i64>() {
            return StatValue::Integer(n);
        }
        let numeric_start = raw
            .bytes()
            .next()
            .map_or(false, |b| b.is_ascii_digit() || b == b'-');
        if numeric_start {
            if let Ok(x) = raw.parse::<f64>() {
                return StatValue::Float(x);
            }
        }
        StatValue::Text(raw.to_string())
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            StatValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric value, widening integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StatValue::Integer(n) => Some(*n as f64),
            StatValue::Float(x) => Some(*x),
            StatValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StatValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for StatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatValue::Integer(n) => write!(f, "{}", n),
            StatValue::Float(x) => write!(f, "{}", x),
            StatValue::Text(s) => f.write_str(s),
        }
    }
}

/// A decoded `stats`, `stats-job` or `stats-tube` document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsRecord {
    fields: BTreeMap<String, StatValue>,
}

impl StatsRecord {
    /// Decode an `OK` body. Malformed lines are skipped.
    pub fn from_body(body: &[u8]) -> Self {
        let fields = yaml::parse_dict(body)
            .into_iter()
            .map(|(key, raw)| {
                let value = StatValue::parse(&raw);
                (key, value)
            })
            .collect();
        Self { fields }
    }

    pub fn get(&self, key: &str) -> Option<&StatValue> {
        self.fields.get(key)
    }

    /// Integer field, or `None` if absent or not an integer.
    pub fn integer(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(StatValue::as_i64)
    }

    /// Text field, or `None` if absent or numeric.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(StatValue::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fields in key order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, StatValue> {
        self.fields.iter()
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Client<S> {
    /// Server-wide statistics.
    pub async fn stats(&self) -> Result<StatsRecord> {
        self.stats_call(Command::Stats).await
    }

    /// Statistics for one job.
    pub async fn stats_job(&self, id: u64) -> Result<StatsRecord> {
        self.stats_call(Command::StatsJob { id }).await
    }

    /// Statistics for one tube.
    pub async fn stats_tube(&self, tube: &str) -> Result<StatsRecord> {
        validate_tube_name(tube)?;
        self.stats_call(Command::StatsTube { tube }).await
    }

    async fn stats_call(&self, command: Command<'_>) -> Result<StatsRecord> {
        self.call(command, Some(Duration::ZERO), |reply, _| {
            let body = reply.expect(Status::Ok)?.into_body()?;
            Ok(StatsRecord::from_body(&body))
        })
        .await
    }
}
