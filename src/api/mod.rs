//! Driver side: builds rules, spawns stub server processes and configures them over their
//! control channel.

use crate::common::channel;
use std::path::PathBuf;
use thiserror::Error;

mod ack;
mod builder;
mod driver;
mod supervisor;

pub use ack::AckWaiter;
pub use builder::{ConfigurationBatch, Endpoint, RuleBuilder};
pub use driver::{Driver, DriverConfig, DriverState, Stub, StubHandle, DEFAULT_ACK_TIMEOUT};
pub use supervisor::{ChildGuard, ProcessSupervisor};

#[derive(Error, Debug)]
pub enum Error {
    #[error("rule for '{0}' does not declare an action")]
    MissingAction(String),
    #[error("rule for '{0}' serves a file but the file path is empty")]
    EmptyFilePath(String),
    #[error("invalid rewrite destination '{0}': {1}")]
    InvalidRewriteUrl(String, String),
    #[error("rule for '{0}' declares an invalid HTTP status code {1}")]
    InvalidStatusCode(String, u16),
    #[error("cannot spawn stub server {0}: {1}")]
    SpawnError(PathBuf, std::io::Error),
    #[error("stub server control channel failed: {0}")]
    ChannelError(channel::Error),
    #[error("timed out waiting for stub server acknowledgements ({received} of {expected} received)")]
    AckTimeout { expected: usize, received: usize },
    #[error("stub server exited before acknowledging its configuration")]
    ServerExited,
}
