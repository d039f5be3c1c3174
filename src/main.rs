//! beanstalk-load: a load driver for beanstalkd
//!
//! Spawns a number of virtual users, each with its own connection, and has
//! every one of them run the put/reserve/delete scenarios for a number of
//! iterations. Each protocol step is a check; the process exits non-zero
//! when any check failed.
//!
//! Configuration via CLI arguments or TOML file.

mod config;
mod load;

use config::Config;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        address = %config.address,
        vus = config.vus,
        iterations = config.iterations,
        tube = %config.tube,
        workers = ?config.workers,
        "Starting beanstalk load run"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.build()?;

    let summary = runtime.block_on(load::run(&config));

    info!(
        vus = summary.vus,
        iterations = summary.iterations,
        checks_passed = summary.checks.passed,
        checks_failed = summary.checks.failed,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "Load run finished"
    );

    if summary.is_success() {
        Ok(())
    } else {
        error!(failed = summary.checks.failed, "Load run had failing checks");
        let total = summary.checks.passed + summary.checks.failed;
        Err(format!("{} of {} checks failed", summary.checks.failed, total).into())
    }
}
