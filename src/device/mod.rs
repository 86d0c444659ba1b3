//! Device-facing side of the runtime.

pub mod handle;

pub use handle::DeviceHandle;
