//! Event kinds and the in-process backend bus observers subscribe to.

mod bus;
mod kinds;

pub use bus::EventBus;
pub use kinds::*;
