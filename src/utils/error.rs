//! The `error` module defines the error types used across `devsync`.
//!
//! Each layer has its own enum so callers can tell a corrupted config file
//! from a lock that could not be taken, or a protocol mismatch from a closed
//! queue. Only the variants listed as fatal in [`ContextError`] ever stop the
//! router.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// Failures of the on-disk stores (device config and timestamp file).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("config file {0} not found")]
    NotFound(PathBuf),

    #[error("config file {0} is empty")]
    EmptyFile(PathBuf),

    #[error("cannot parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("no essential defaults defined, {0} cannot be reset")]
    NoDefaults(PathBuf),

    #[error("timed out acquiring lock {path} after {elapsed_ms}ms")]
    LockTimeout { path: PathBuf, elapsed_ms: u64 },

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot serialize record: {0}")]
    Serialize(String),
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Missing, empty or unparseable files. These are recovered by rewriting
    /// the defaults instead of being reported to the caller.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::EmptyFile(_) | Self::Parse { .. }
        )
    }
}

/// Failures while building the session configuration at process start.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("required bootstrap key `{0}` is missing")]
    MissingKey(&'static str),

    #[error("cannot resolve network interface {iface}: {source}")]
    Interface {
        iface: String,
        #[source]
        source: io::Error,
    },

    #[error("session config is regenerated on every run and cannot be written")]
    ReadOnly,

    #[error(transparent)]
    Source(#[from] config::ConfigError),
}

/// Wire-level protocol violations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unrecognized command: {0}")]
    UnrecognizedCommand(String),
}

/// Inbound wire messages the transport could not turn into an event.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("unsupported topic format: {0}")]
    Topic(String),

    #[error("malformed message body: {0}")]
    Body(#[from] serde_json::Error),
}

/// Anything that escapes a single event's handling. The router stops on all of these.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0} queue is closed")]
    QueueClosed(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("router thread could not be spawned: {0}")]
    Spawn(#[source] io::Error),

    #[error("router still running after {0:?}")]
    JoinTimeout(Duration),

    #[error("router thread panicked")]
    Panicked,
}

/// Failures of the device-facing handle.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("internal queue is closed")]
    QueueClosed,
}
