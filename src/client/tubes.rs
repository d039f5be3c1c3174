//! Tube operations: choosing where jobs go and where they come from.

use super::Client;
use crate::error::{Error, Result};
use crate::protocol::{yaml, Command, Status};
use crate::session::validate_tube_name;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

impl<S: AsyncRead + AsyncWrite + Unpin> Client<S> {
    /// Direct subsequent puts to `tube`, creating it on the server if needed.
    pub async fn use_tube(&self, tube: &str) -> Result<String> {
        validate_tube_name(tube)?;
        self.call(Command::Use { tube }, Some(Duration::ZERO), |reply, session| {
            let reply = reply.expect(Status::Using)?;
            let using = reply.arg(0)?;
            if using != tube {
                return Err(Error::Protocol(format!(
                    "asked to use {:?} but server is using {:?}",
                    tube, using
                )));
            }
            session.set_used(tube);
            debug!(tube, "Using tube");
            Ok(using.to_string())
        })
        .await
    }

    /// Add `tube` to the watch set. Returns the number of watched tubes.
    pub async fn watch(&self, tube: &str) -> Result<u64> {
        validate_tube_name(tube)?;
        self.call(Command::Watch { tube }, Some(Duration::ZERO), |reply, session| {
            let count = reply.expect(Status::Watching)?.number(0)?;
            session.watch(tube);
            if !session.agrees_with(count) {
                warn!(count, local = session.watched().len(), "Watch set out of step with server");
            }
            debug!(tube, count, "Watching tube");
            Ok(count)
        })
        .await
    }

    /// Remove `tube` from the watch set. Returns the number of watched tubes.
    ///
    /// Fails with `Error::NotIgnored`, leaving the watch set as it was, when
    /// `tube` is the only tube watched.
    pub async fn ignore(&self, tube: &str) -> Result<u64> {
        validate_tube_name(tube)?;
        self.call(Command::Ignore { tube }, Some(Duration::ZERO), |reply, session| {
            let count = reply.expect(Status::Watching)?.number(0)?;
            session.ignore(tube);
            if !session.agrees_with(count) {
                warn!(count, local = session.watched().len(), "Watch set out of step with server");
            }
            debug!(tube, count, "Ignoring tube");
            Ok(count)
        })
        .await
    }

    /// Names of all tubes that exist on the server.
    pub async fn list_tubes(&self) -> Result<Vec<String>> {
        self.call(Command::ListTubes, Some(Duration::ZERO), |reply, _| {
            let body = reply.expect(Status::Ok)?.into_body()?;
            Ok(yaml::parse_list(&body))
        })
        .await
    }

    /// The tube this connection puts into, as the server sees it.
    pub async fn list_tube_used(&self) -> Result<String> {
        self.call(Command::ListTubeUsed, Some(Duration::ZERO), |reply, _| {
            let reply = reply.expect(Status::Using)?;
            Ok(reply.arg(0)?.to_string())
        })
        .await
    }

    /// The tubes this connection reserves from, as the server sees them.
    pub async fn list_watched_tubes(&self) -> Result<Vec<String>> {
        self.call(Command::ListTubesWatched, Some(Duration::ZERO), |reply, _| {
            let body = reply.expect(Status::Ok)?.into_body()?;
            Ok(yaml::parse_list(&body))
        })
        .await
    }

    /// Hold back reservations from `tube` for `delay`.
    pub async fn pause_tube(&self, tube: &str, delay: Duration) -> Result<()> {
        validate_tube_name(tube)?;
        let command = Command::PauseTube {
            tube,
            delay: delay.as_secs(),
        };
        self.call(command, Some(Duration::ZERO), |reply, _| {
            reply.expect(Status::Paused)?;
            debug!(tube, delay_secs = delay.as_secs(), "Tube paused");
            Ok(())
        })
        .await
    }

    /// The used tube as last acknowledged by the server. No round trip.
    pub async fn used_tube(&self) -> String {
        self.inner.lock().await.session.used().to_string()
    }

    /// The watch set as last acknowledged by the server. No round trip.
    pub async fn watched_tubes(&self) -> Vec<String> {
        self.inner.lock().await.session.watched().to_vec()
    }
}
