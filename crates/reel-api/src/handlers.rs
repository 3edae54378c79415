//! Request handlers.

pub mod health;
pub mod queue;
pub mod videos;

pub use health::*;
pub use queue::*;
pub use videos::*;
