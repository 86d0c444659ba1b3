//! The `router` module drains the internal queue on a dedicated thread and
//! hands each event to a fresh protocol context.

pub mod engine;

pub use engine::{Router, RouterHandle, RouterState};
