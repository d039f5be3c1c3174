//! beanstalk-client: an async client for the beanstalkd work queue.
//!
//! The client speaks the beanstalk text protocol over TCP:
//! - Job lifecycle: put, reserve, delete, release, bury, touch, kick, peek
//! - Tube selection: use, watch, ignore, pause-tube and the list commands
//! - Server, tube and job statistics
//!
//! ```no_run
//! # async fn demo() -> beanstalk_client::Result<()> {
//! use beanstalk_client::Client;
//! use std::time::Duration;
//!
//! let client = Client::connect("127.0.0.1:11300").await?;
//! let id = client.put(b"hello", 1, Duration::ZERO, Duration::from_secs(60)).await?;
//! let job = client.reserve(Duration::from_secs(5)).await?;
//! assert_eq!(job.id, id);
//! client.delete(job.id).await?;
//! client.close().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod session;

pub use client::{Client, Job, StatValue, StatsRecord};
pub use connection::{ClientOptions, DEFAULT_PORT};
pub use error::{Error, Result, ServerError};
pub use session::{Session, DEFAULT_TUBE};
