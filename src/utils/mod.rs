//! Shared helpers

mod logger;
mod timer;

pub use logger::{default_filter, init_logger, LogLevel};
pub use timer::{Stopwatch, Timer};
