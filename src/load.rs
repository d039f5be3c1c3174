//! Virtual users driving the server through the two scenarios.
//!
//! Before any virtual user starts, leftover jobs are drained from the
//! `default` tube and the named tube. Every virtual user then owns one
//! connection and, per iteration, runs:
//! - default tube: put, reserve, delete, an empty `reserve(0)`, list-tubes
//! - named tube: use, put, list-tubes, watch, reserve, delete, ignore,
//!   stats, stats-tube
//!
//! Each step is a check. Failures are logged and counted, never fatal; a
//! virtual user only stops early once its connection is gone.

use crate::config::Config;
use beanstalk_client::{Client, ClientOptions, Error, Job, Result, DEFAULT_TUBE};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

const DEFAULT_BODY: &[u8] = b"Hello, Beanstalkd!";
const TUBE_BODY: &[u8] = b"Job in new tube";
const PRIORITY: u32 = 1;
const TTR: Duration = Duration::from_secs(60);

/// How often a virtual user hands back someone else's job before giving up
/// on finding its own.
const FOREIGN_JOB_RETRIES: usize = 8;

/// What each iteration does.
#[derive(Debug, Clone)]
pub struct Plan {
    pub reserve_timeout: Duration,
    pub tube: String,
    /// Other virtual users share the tubes, so the default tube may hold
    /// their jobs.
    pub shared: bool,
}

impl Plan {
    pub fn from_config(config: &Config) -> Self {
        Self {
            reserve_timeout: config.reserve_timeout,
            tube: config.tube.clone(),
            shared: config.vus > 1,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Checks {
    pub passed: u64,
    pub failed: u64,
}

/// Outcome of the whole run.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Summary {
    pub vus: usize,
    /// Iterations completed across all virtual users.
    pub iterations: u64,
    pub checks: Checks,
    pub elapsed: Duration,
}

impl Summary {
    pub fn is_success(&self) -> bool {
        self.checks.failed == 0
    }

    fn absorb(&mut self, iterations: u64, checks: Checks) {
        self.iterations += iterations;
        self.checks.passed += checks.passed;
        self.checks.failed += checks.failed;
    }
}

/// Run every virtual user to completion.
pub async fn run(config: &Config) -> Summary {
    let plan = Arc::new(Plan::from_config(config));
    let options = config.client_options();
    let started = Instant::now();

    let mut summary = Summary {
        vus: config.vus,
        ..Default::default()
    };
    summary.absorb(0, prepare(&config.address, options, &plan).await);

    let mut tasks = JoinSet::new();
    for id in 0..config.vus {
        let plan = Arc::clone(&plan);
        let address = config.address.clone();
        let iterations = config.iterations;
        tasks.spawn(async move { run_vu(id, &address, options, &plan, iterations).await });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((iterations, checks)) => summary.absorb(iterations, checks),
            Err(e) => {
                warn!(error = %e, "Virtual user task failed");
                summary.absorb(0, Checks { passed: 0, failed: 1 });
            }
        }
    }
    summary.elapsed = started.elapsed();
    summary
}

/// Drain the tubes the scenarios use so leftovers from earlier runs do not
/// show up as someone else's jobs.
async fn prepare(address: &str, options: ClientOptions, plan: &Plan) -> Checks {
    let client = match Client::connect_with(address, options).await {
        Ok(client) => client,
        Err(e) => {
            warn!(address, error = %e, "Failed to connect for cleanup");
            return Checks { passed: 0, failed: 1 };
        }
    };
    let checks = drain_tubes(&client, &[DEFAULT_TUBE, plan.tube.as_str()]).await;
    client.close().await;
    checks
}

/// Delete every ready job in `tubes`, one check per tube.
async fn drain_tubes<S: AsyncRead + AsyncWrite + Unpin>(client: &Client<S>, tubes: &[&str]) -> Checks {
    let mut checks = Checks::default();
    for tube in tubes {
        match drain_tube(client, tube).await {
            Ok(deleted) => {
                checks.passed += 1;
                info!(tube, deleted, "Tube drained");
            }
            Err(e) => {
                checks.failed += 1;
                warn!(tube, error = %e, "Failed to drain tube");
                if e.is_transport() {
                    break;
                }
            }
        }
    }
    checks
}

async fn drain_tube<S: AsyncRead + AsyncWrite + Unpin>(client: &Client<S>, tube: &str) -> Result<u64> {
    let watching = client.watched_tubes().await.iter().any(|t| t == tube);
    if !watching {
        client.watch(tube).await?;
    }

    let mut deleted = 0;
    loop {
        match client.reserve(Duration::ZERO).await {
            Ok(job) => {
                client.delete(job.id).await?;
                deleted += 1;
            }
            Err(Error::Timeout) => break,
            Err(e) => return Err(e),
        }
    }

    if !watching {
        client.ignore(tube).await?;
    }
    Ok(deleted)
}

async fn run_vu(
    id: usize,
    address: &str,
    options: ClientOptions,
    plan: &Plan,
    iterations: u64,
) -> (u64, Checks) {
    let client = match Client::connect_with(address, options).await {
        Ok(client) => client,
        Err(e) => {
            warn!(vu = id, address, error = %e, "Failed to connect");
            return (0, Checks { passed: 0, failed: 1 });
        }
    };

    let mut vu = VirtualUser::new(id, &client, plan);
    let completed = vu.run(iterations).await;
    let checks = vu.checks;
    client.close().await;
    debug!(vu = id, completed, passed = checks.passed, failed = checks.failed, "Virtual user done");
    (completed, checks)
}

struct VirtualUser<'a, S> {
    id: usize,
    client: &'a Client<S>,
    plan: &'a Plan,
    checks: Checks,
    /// Set once the connection is unusable.
    broken: bool,
}

impl<'a, S: AsyncRead + AsyncWrite + Unpin> VirtualUser<'a, S> {
    fn new(id: usize, client: &'a Client<S>, plan: &'a Plan) -> Self {
        Self {
            id,
            client,
            plan,
            checks: Checks::default(),
            broken: false,
        }
    }

    /// Returns the number of iterations completed.
    async fn run(&mut self, iterations: u64) -> u64 {
        let mut completed = 0;
        for iteration in 0..iterations {
            self.default_tube().await;
            self.named_tube().await;
            if self.broken {
                warn!(vu = self.id, iteration, "Connection lost, stopping");
                break;
            }
            completed += 1;
        }
        completed
    }

    fn check(&mut self, name: &str, ok: bool) -> bool {
        if ok {
            self.checks.passed += 1;
        } else {
            self.checks.failed += 1;
            warn!(vu = self.id, check = name, "Check failed");
        }
        ok
    }

    fn record<T>(&mut self, name: &str, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => {
                self.checks.passed += 1;
                Some(value)
            }
            Err(e) => {
                self.checks.failed += 1;
                self.broken |= e.is_transport();
                warn!(vu = self.id, check = name, error = %e, "Check failed");
                None
            }
        }
    }

    async fn default_tube(&mut self) {
        if self.broken {
            return;
        }
        let put = self
            .client
            .put(DEFAULT_BODY, PRIORITY, Duration::ZERO, TTR)
            .await;
        let Some(id) = self.record("put to default tube", put) else {
            return;
        };
        let Some(job) = self.reserve_own(id).await else {
            return;
        };
        self.check("default tube body", &job.body[..] == DEFAULT_BODY);
        let deleted = self.client.delete(job.id).await;
        if self.record("delete from default tube", deleted).is_none() {
            return;
        }

        match self.client.reserve(Duration::ZERO).await {
            Err(Error::Timeout) => {
                self.check("default tube drained", true);
            }
            Ok(job) if self.plan.shared => {
                // Belongs to another virtual user
                let released = self.client.release(job.id, PRIORITY, Duration::ZERO).await;
                self.record("release foreign job", released);
            }
            Ok(job) => {
                debug!(vu = self.id, id = job.id, "Unexpected job left in default tube");
                self.check("default tube drained", false);
            }
            Err(e) => {
                self.record::<()>("default tube drained", Err(e));
            }
        }
        if self.broken {
            return;
        }

        self.tube_listed(DEFAULT_TUBE).await;
    }

    /// Check that `tube` shows up in list-tubes.
    async fn tube_listed(&mut self, tube: &str) {
        let listed = self.client.list_tubes().await;
        if let Some(tubes) = self.record("list tubes", listed) {
            self.check(&format!("tube {} listed", tube), tubes.iter().any(|t| t == tube));
        }
    }

    async fn named_tube(&mut self) {
        if self.broken {
            return;
        }
        let tube = self.plan.tube.clone();
        self.named_tube_round_trip(&tube).await;
        if self.broken {
            return;
        }

        if self.client.watched_tubes().await.contains(&tube) {
            let ignored = self.client.ignore(&tube).await;
            if let Some(count) = self.record("ignore tube", ignored) {
                self.check("watching default only", count == 1);
            }
        }
        if self.broken {
            return;
        }
        self.statistics(&tube).await;
        if self.broken {
            return;
        }
        if self.client.used_tube().await != DEFAULT_TUBE {
            let restored = self.client.use_tube(DEFAULT_TUBE).await;
            self.record("use default tube", restored);
        }
    }

    async fn statistics(&mut self, tube: &str) {
        let stats = self.client.stats().await;
        if let Some(record) = self.record("server stats", stats) {
            self.check("server stats reported", !record.is_empty());
        }
        if self.broken {
            return;
        }
        let stats = self.client.stats_tube(tube).await;
        if let Some(record) = self.record("tube stats", stats) {
            self.check("tube stats name", record.text("name") == Some(tube));
        }
    }

    async fn named_tube_round_trip(&mut self, tube: &str) {
        let used = self.client.use_tube(tube).await;
        if self.record("use tube", used).is_none() {
            return;
        }
        let put = self.client.put(TUBE_BODY, PRIORITY, Duration::ZERO, TTR).await;
        let Some(id) = self.record("put to named tube", put) else {
            return;
        };
        self.tube_listed(tube).await;
        if self.broken {
            return;
        }
        let watched = self.client.watch(tube).await;
        match self.record("watch tube", watched) {
            Some(count) => {
                self.check("watching two tubes", count == 2);
            }
            None => return,
        }
        let Some(job) = self.reserve_own(id).await else {
            return;
        };
        self.check("named tube body", &job.body[..] == TUBE_BODY);
        let deleted = self.client.delete(job.id).await;
        self.record("delete from named tube", deleted);
    }

    /// Reserve until the job put as `id` comes back, releasing any other
    /// job in the way.
    async fn reserve_own(&mut self, id: u64) -> Option<Job> {
        for _ in 0..=FOREIGN_JOB_RETRIES {
            let reserved = self.client.reserve(self.plan.reserve_timeout).await;
            let job = match reserved {
                Ok(job) => job,
                Err(e) => {
                    self.record::<()>("reserve", Err(e));
                    return None;
                }
            };
            if job.id == id {
                self.check("reserve own job", true);
                return Some(job);
            }

            debug!(vu = self.id, want = id, got = job.id, "Reserved a foreign job");
            let released = self.client.release(job.id, PRIORITY, Duration::ZERO).await;
            if let Err(e) = released {
                self.record::<()>("release foreign job", Err(e));
                return None;
            }
        }
        self.check("reserve own job", false);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::{Builder, Mock};

    fn plan(shared: bool) -> Plan {
        Plan {
            reserve_timeout: Duration::from_secs(5),
            tube: "test-tube".to_string(),
            shared,
        }
    }

    fn client(mock: Mock) -> Client<Mock> {
        Client::from_stream(mock, ClientOptions::default())
    }

    /// An `OK` reply carrying `body`.
    fn ok(body: &str) -> Vec<u8> {
        format!("OK {}\r\n{}\r\n", body.len(), body).into_bytes()
    }

    #[tokio::test]
    async fn test_default_tube_scenario() {
        let mock = Builder::new()
            .write(b"put 1 0 60 18\r\nHello, Beanstalkd!\r\n")
            .read(b"INSERTED 1\r\n")
            .write(b"reserve-with-timeout 5\r\n")
            .read(b"RESERVED 1 18\r\nHello, Beanstalkd!\r\n")
            .write(b"delete 1\r\n")
            .read(b"DELETED\r\n")
            .write(b"reserve-with-timeout 0\r\n")
            .read(b"TIMED_OUT\r\n")
            .write(b"list-tubes\r\n")
            .read(&ok("---\n- default\n"))
            .build();
        let client = client(mock);
        let plan = plan(false);
        let mut vu = VirtualUser::new(0, &client, &plan);

        vu.default_tube().await;
        assert_eq!(vu.checks, Checks { passed: 7, failed: 0 });
    }

    #[tokio::test]
    async fn test_missing_tube_fails_check() {
        let mock = Builder::new()
            .write(b"put 1 0 60 18\r\nHello, Beanstalkd!\r\n")
            .read(b"INSERTED 1\r\n")
            .write(b"reserve-with-timeout 5\r\n")
            .read(b"RESERVED 1 18\r\nHello, Beanstalkd!\r\n")
            .write(b"delete 1\r\n")
            .read(b"DELETED\r\n")
            .write(b"reserve-with-timeout 0\r\n")
            .read(b"TIMED_OUT\r\n")
            .write(b"list-tubes\r\n")
            .read(&ok("---\n- other\n"))
            .build();
        let client = client(mock);
        let plan = plan(false);
        let mut vu = VirtualUser::new(0, &client, &plan);

        vu.default_tube().await;
        assert_eq!(vu.checks, Checks { passed: 6, failed: 1 });
        assert!(!vu.broken);
    }

    #[tokio::test]
    async fn test_named_tube_scenario() {
        let mock = Builder::new()
            .write(b"use test-tube\r\n")
            .read(b"USING test-tube\r\n")
            .write(b"put 1 0 60 15\r\nJob in new tube\r\n")
            .read(b"INSERTED 2\r\n")
            .write(b"list-tubes\r\n")
            .read(&ok("---\n- default\n- test-tube\n"))
            .write(b"watch test-tube\r\n")
            .read(b"WATCHING 2\r\n")
            .write(b"reserve-with-timeout 5\r\n")
            .read(b"RESERVED 2 15\r\nJob in new tube\r\n")
            .write(b"delete 2\r\n")
            .read(b"DELETED\r\n")
            .write(b"ignore test-tube\r\n")
            .read(b"WATCHING 1\r\n")
            .write(b"stats\r\n")
            .read(&ok("---\ncurrent-jobs-ready: 0\ntotal-jobs: 2\n"))
            .write(b"stats-tube test-tube\r\n")
            .read(&ok("---\nname: test-tube\ncurrent-jobs-ready: 0\n"))
            .write(b"use default\r\n")
            .read(b"USING default\r\n")
            .build();
        let client = client(mock);
        let plan = plan(false);
        let mut vu = VirtualUser::new(0, &client, &plan);

        vu.named_tube().await;
        assert_eq!(vu.checks, Checks { passed: 16, failed: 0 });
        assert_eq!(client.used_tube().await, "default");
        assert_eq!(client.watched_tubes().await, vec!["default"]);
    }

    #[tokio::test]
    async fn test_foreign_jobs_are_released() {
        let mock = Builder::new()
            .write(b"put 1 0 60 18\r\nHello, Beanstalkd!\r\n")
            .read(b"INSERTED 4\r\n")
            .write(b"reserve-with-timeout 5\r\n")
            .read(b"RESERVED 3 18\r\nHello, Beanstalkd!\r\n")
            .write(b"release 3 1 0\r\n")
            .read(b"RELEASED\r\n")
            .write(b"reserve-with-timeout 5\r\n")
            .read(b"RESERVED 4 18\r\nHello, Beanstalkd!\r\n")
            .write(b"delete 4\r\n")
            .read(b"DELETED\r\n")
            .write(b"reserve-with-timeout 0\r\n")
            .read(b"RESERVED 5 18\r\nHello, Beanstalkd!\r\n")
            .write(b"release 5 1 0\r\n")
            .read(b"RELEASED\r\n")
            .write(b"list-tubes\r\n")
            .read(&ok("---\n- default\n"))
            .build();
        let client = client(mock);
        let plan = plan(true);
        let mut vu = VirtualUser::new(0, &client, &plan);

        vu.default_tube().await;
        assert_eq!(vu.checks, Checks { passed: 7, failed: 0 });
    }

    #[tokio::test]
    async fn test_drain_tubes() {
        let mock = Builder::new()
            .write(b"reserve-with-timeout 0\r\n")
            .read(b"RESERVED 3 1\r\nx\r\n")
            .write(b"delete 3\r\n")
            .read(b"DELETED\r\n")
            .write(b"reserve-with-timeout 0\r\n")
            .read(b"TIMED_OUT\r\n")
            .write(b"watch test-tube\r\n")
            .read(b"WATCHING 2\r\n")
            .write(b"reserve-with-timeout 0\r\n")
            .read(b"RESERVED 9 1\r\ny\r\n")
            .write(b"delete 9\r\n")
            .read(b"DELETED\r\n")
            .write(b"reserve-with-timeout 0\r\n")
            .read(b"TIMED_OUT\r\n")
            .write(b"ignore test-tube\r\n")
            .read(b"WATCHING 1\r\n")
            .build();
        let client = client(mock);

        let checks = drain_tubes(&client, &["default", "test-tube"]).await;
        assert_eq!(checks, Checks { passed: 2, failed: 0 });
        assert_eq!(client.watched_tubes().await, vec!["default"]);
    }

    #[tokio::test]
    async fn test_drain_stops_on_lost_connection() {
        let mock = Builder::new()
            .write(b"reserve-with-timeout 0\r\n")
            .read(b"HUH\r\n")
            .build();
        let client = client(mock);

        let checks = drain_tubes(&client, &["default", "test-tube"]).await;
        assert_eq!(checks, Checks { passed: 0, failed: 1 });
    }

    #[tokio::test]
    async fn test_failed_step_is_counted() {
        let mock = Builder::new()
            .write(b"put 1 0 60 18\r\nHello, Beanstalkd!\r\n")
            .read(b"DRAINING\r\n")
            .build();
        let client = client(mock);
        let plan = plan(false);
        let mut vu = VirtualUser::new(0, &client, &plan);

        vu.default_tube().await;
        assert_eq!(vu.checks, Checks { passed: 0, failed: 1 });
        assert!(!vu.broken);
    }

    #[tokio::test]
    async fn test_lost_connection_stops_user() {
        let mock = Builder::new()
            .write(b"put 1 0 60 18\r\nHello, Beanstalkd!\r\n")
            .read(b"HUH\r\n")
            .build();
        let client = client(mock);
        let plan = plan(false);
        let mut vu = VirtualUser::new(0, &client, &plan);

        assert_eq!(vu.run(3).await, 0);
        assert!(vu.broken);
        assert_eq!(vu.checks, Checks { passed: 0, failed: 1 });
    }

    #[test]
    fn test_summary() {
        let mut summary = Summary::default();
        summary.absorb(2, Checks { passed: 30, failed: 0 });
        assert!(summary.is_success());
        summary.absorb(1, Checks { passed: 10, failed: 2 });
        assert_eq!(summary.iterations, 3);
        assert_eq!(summary.checks, Checks { passed: 40, failed: 2 });
        assert!(!summary.is_success());
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let (completed, checks) =
            run_vu(0, &address, ClientOptions::default(), &plan(false), 1).await;
        assert_eq!(completed, 0);
        assert_eq!(checks, Checks { passed: 0, failed: 1 });

        let checks = prepare(&address, ClientOptions::default(), &plan(false)).await;
        assert_eq!(checks, Checks { passed: 0, failed: 1 });
    }
}
