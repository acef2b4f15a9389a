//! Live connection tracking for the diagnostics sampler.

pub mod addr;
mod registry;
mod tracked;

pub use registry::{ConnInfo, ConnRegistry, Registration};
pub use tracked::{TrackedConn, TransportConn};
