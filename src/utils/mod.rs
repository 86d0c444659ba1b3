//! The `utils` module provides the definitions shared across `devsync`:
//! the per-layer error types and the logging setup.

pub mod error;
pub mod logging;
