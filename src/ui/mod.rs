//! Terminal-facing output: the logger and the sinks it writes to

pub mod logger;
pub mod sink;

pub use logger::*;
pub use sink::*;
