//! The `store` module keeps device state on disk.
//!
//! - `device`: the YAML-backed device configuration with plain, nested and
//!   destructive updates and automatic recovery to the essential defaults.
//! - `timestamp`: the single persisted counter used for anti-replay checks.
//! - `lock`: the advisory file lock both of them take around disk access.
//! - `record`: the record type and its merge/filter rules.

pub mod device;
pub mod lock;
pub mod record;
pub mod timestamp;

pub use device::{DeviceConfig, default_essentials};
pub use lock::FileLock;
pub use record::Record;
pub use timestamp::TimestampGuard;
