//! Job operations: producing, reserving and settling jobs.
//!
//! Delays and TTRs travel as whole seconds; sub-second parts of a
//! `Duration` are truncated.

use super::Client;
use crate::error::{Error, Result};
use crate::protocol::{Command, Reply, Status};
use crate::session::Session;
use bytes::Bytes;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

/// A job handed out by reserve or peek.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Server-assigned id, unique while the job exists.
    pub id: u64,
    /// Body exactly as it was put.
    pub body: Bytes,
}

impl Job {
    /// Build a job from a `RESERVED <id> <bytes>` or `FOUND <id> <bytes>`
    /// reply.
    fn from_reply(reply: Reply) -> Result<Job> {
        let id = reply.number(0)?;
        let body = reply.into_body()?;
        Ok(Job { id, body })
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Client<S> {
    /// Put a job into the used tube and return its id.
    ///
    /// Fails with `Error::Buried` when the server had to bury the job for
    /// lack of memory, and with `Error::JobTooBig` when `body` is larger than
    /// the server's `max-job-size`.
    pub async fn put(&self, body: &[u8], priority: u32, delay: Duration, ttr: Duration) -> Result<u64> {
        let command = Command::Put {
            priority,
            delay: delay.as_secs(),
            ttr: ttr.as_secs(),
            body,
        };
        self.call(command, Some(Duration::ZERO), |reply, session| {
            let id = reply.expect(Status::Inserted)?.number(0)?;
            debug!(id, tube = session.used(), bytes = body.len(), "Job inserted");
            Ok(id)
        })
        .await
    }

    /// Reserve a job from the watched tubes, waiting at most `timeout`.
    ///
    /// A zero timeout polls: it returns a ready job or `Error::Timeout`
    /// without waiting. `Error::DeadlineSoon` means a job this client already
    /// holds is about to time out and should be settled first.
    pub async fn reserve(&self, timeout: Duration) -> Result<Job> {
        let seconds = timeout.as_secs();
        let command = Command::ReserveWithTimeout { seconds };
        self.call(command, Some(Duration::from_secs(seconds)), reserved)
            .await
    }

    /// Reserve a job, waiting for as long as it takes.
    ///
    /// Only `close` can interrupt the wait.
    pub async fn reserve_blocking(&self) -> Result<Job> {
        self.call(Command::Reserve, None, reserved).await
    }

    /// Reserve the job with the given id, whatever its state.
    pub async fn reserve_job(&self, id: u64) -> Result<Job> {
        self.call(Command::ReserveJob { id }, Some(Duration::ZERO), reserved)
            .await
    }

    /// Delete a job reserved by this client (or a ready, delayed or buried
    /// job).
    pub async fn delete(&self, id: u64) -> Result<()> {
        self.call(Command::Delete { id }, Some(Duration::ZERO), |reply, _| {
            reply.expect(Status::Deleted)?;
            debug!(id, "Job deleted");
            Ok(())
        })
        .await
    }

    /// Put a reserved job back into the ready (or, with a delay, delayed)
    /// queue.
    pub async fn release(&self, id: u64, priority: u32, delay: Duration) -> Result<()> {
        let command = Command::Release {
            id,
            priority,
            delay: delay.as_secs(),
        };
        self.call(command, Some(Duration::ZERO), |reply, _| {
            reply.expect(Status::Released)?;
            debug!(id, priority, "Job released");
            Ok(())
        })
        .await
    }

    /// Bury a reserved job.
    pub async fn bury(&self, id: u64, priority: u32) -> Result<()> {
        let command = Command::Bury { id, priority };
        self.call(command, Some(Duration::ZERO), |reply, _| {
            reply.expect(Status::Buried)?;
            debug!(id, "Job buried");
            Ok(())
        })
        .await
    }

    /// Restart the TTR clock of a reserved job.
    pub async fn touch(&self, id: u64) -> Result<()> {
        self.call(Command::Touch { id }, Some(Duration::ZERO), |reply, _| {
            reply.expect(Status::Touched)?;
            Ok(())
        })
        .await
    }

    /// Move up to `bound` jobs of the used tube back to ready: buried jobs
    /// if there are any, delayed jobs otherwise. Returns how many moved.
    pub async fn kick(&self, bound: u64) -> Result<u64> {
        self.call(Command::Kick { bound }, Some(Duration::ZERO), |reply, session| {
            let kicked = reply.expect(Status::Kicked)?.number(0)?;
            debug!(kicked, tube = session.used(), "Jobs kicked");
            Ok(kicked)
        })
        .await
    }

    /// Move a single buried or delayed job back to ready.
    pub async fn kick_job(&self, id: u64) -> Result<()> {
        self.call(Command::KickJob { id }, Some(Duration::ZERO), |reply, _| {
            reply.expect(Status::Kicked)?;
            Ok(())
        })
        .await
    }

    /// Inspect a job without reserving it.
    pub async fn peek(&self, id: u64) -> Result<Job> {
        self.call(Command::Peek { id }, Some(Duration::ZERO), found)
            .await
    }

    /// Inspect the next ready job of the used tube.
    pub async fn peek_ready(&self) -> Result<Job> {
        self.call(Command::PeekReady, Some(Duration::ZERO), found)
            .await
    }

    /// Inspect the delayed job of the used tube closest to becoming ready.
    pub async fn peek_delayed(&self) -> Result<Job> {
        self.call(Command::PeekDelayed, Some(Duration::ZERO), found)
            .await
    }

    /// Inspect the next buried job of the used tube.
    pub async fn peek_buried(&self) -> Result<Job> {
        self.call(Command::PeekBuried, Some(Duration::ZERO), found)
            .await
    }
}

fn reserved(reply: Reply, _: &mut Session) -> Result<Job> {
    match reply.expect(Status::Reserved) {
        Ok(reply) => {
            let job = Job::from_reply(reply)?;
            debug!(id = job.id, bytes = job.body.len(), "Job reserved");
            Ok(job)
        }
        Err(Error::DeadlineSoon) => {
            warn!("Reserved job close to its TTR deadline");
            Err(Error::DeadlineSoon)
        }
        Err(e) => Err(e),
    }
}

fn found(reply: Reply, _: &mut Session) -> Result<Job> {
    Job::from_reply(reply.expect(Status::Found)?)
}
