//! Beanstalk command encoder.
//!
//! Every command is a single ASCII line ending in `\r\n`. `put` is the only
//! command that carries a body: exactly `<bytes>` octets follow the line,
//! then another `\r\n`.

use bytes::BytesMut;

/// A command to send to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Command<'a> {
    /// Insert a job into the used tube
    Put {
        priority: u32,
        delay: u64,
        ttr: u64,
        body: &'a [u8],
    },

    /// Select the tube for subsequent puts
    Use { tube: &'a str },

    /// Reserve with no protocol timeout
    Reserve,

    /// Reserve, giving up after `seconds`
    ReserveWithTimeout { seconds: u64 },

    /// Reserve a specific job
    ReserveJob { id: u64 },

    Delete { id: u64 },

    Release { id: u64, priority: u32, delay: u64 },

    Bury { id: u64, priority: u32 },

    Touch { id: u64 },

    Watch { tube: &'a str },

    Ignore { tube: &'a str },

    Peek { id: u64 },

    PeekReady,

    PeekDelayed,

    PeekBuried,

    /// Kick up to `bound` jobs in the used tube
    Kick { bound: u64 },

    KickJob { id: u64 },

    StatsJob { id: u64 },

    StatsTube { tube: &'a str },

    Stats,

    ListTubes,

    ListTubeUsed,

    ListTubesWatched,

    /// Delay reservations from a tube for `delay` seconds
    PauseTube { tube: &'a str, delay: u64 },

    /// Ask the server to close the connection
    Quit,
}

impl Command<'_> {
    /// Wire name of the command.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Put { .. } => "put",
            Command::Use { .. } => "use",
            Command::Reserve => "reserve",
            Command::ReserveWithTimeout { .. } => "reserve-with-timeout",
            Command::ReserveJob { .. } => "reserve-job",
            Command::Delete { .. } => "delete",
            Command::Release { .. } => "release",
            Command::Bury { .. } => "bury",
            Command::Touch { .. } => "touch",
            Command::Watch { .. } => "watch",
            Command::Ignore { .. } => "ignore",
            Command::Peek { .. } => "peek",
            Command::PeekReady => "peek-ready",
            Command::PeekDelayed => "peek-delayed",
            Command::PeekBuried => "peek-buried",
            Command::Kick { .. } => "kick",
            Command::KickJob { .. } => "kick-job",
            Command::StatsJob { .. } => "stats-job",
            Command::StatsTube { .. } => "stats-tube",
            Command::Stats => "stats",
            Command::ListTubes => "list-tubes",
            Command::ListTubeUsed => "list-tube-used",
            Command::ListTubesWatched => "list-tubes-watched",
            Command::PauseTube { .. } => "pause-tube",
            Command::Quit => "quit",
        }
    }

    /// Encode a command to bytes
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf
    }

    /// Encode a command into an existing buffer
    pub fn encode_into(&self, buf: &mut BytesMut) {
        let line = match self {
            Command::Put {
                priority,
                delay,
                ttr,
                body,
            } => format!("put {} {} {} {}", priority, delay, ttr, body.len()),
            Command::Use { tube } => format!("use {}", tube),
            Command::ReserveWithTimeout { seconds } => {
                format!("reserve-with-timeout {}", seconds)
            }
            Command::ReserveJob { id } => format!("reserve-job {}", id),
            Command::Delete { id } => format!("delete {}", id),
            Command::Release {
                id,
                priority,
                delay,
            } => format!("release {} {} {}", id, priority, delay),
            Command::Bury { id, priority } => format!("bury {} {}", id, priority),
            Command::Touch { id } => format!("touch {}", id),
            Command::Watch { tube } => format!("watch {}", tube),
            Command::Ignore { tube } => format!("ignore {}", tube),
            Command::Peek { id } => format!("peek {}", id),
            Command::Kick { bound } => format!("kick {}", bound),
            Command::KickJob { id } => format!("kick-job {}", id),
            Command::StatsJob { id } => format!("stats-job {}", id),
            Command::StatsTube { tube } => format!("stats-tube {}", tube),
            Command::PauseTube { tube, delay } => format!("pause-tube {} {}", tube, delay),
            Command::Reserve
            | Command::PeekReady
            | Command::PeekDelayed
            | Command::PeekBuried
            | Command::Stats
            | Command::ListTubes
            | Command::ListTubeUsed
            | Command::ListTubesWatched
            | Command::Quit => self.name().to_string(),
        };

        buf.reserve(line.len() + 2);
        buf.extend_from_slice(line.as_bytes());
        buf.extend_from_slice(b"\r\n");

        if let Command::Put { body, .. } = self {
            buf.reserve(body.len() + 2);
            buf.extend_from_slice(body);
            buf.extend_from_slice(b"\r\n");
        }
    }
}
