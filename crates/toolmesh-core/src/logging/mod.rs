//! Logging abstractions
//!
//! Components take an `Arc<dyn Logger>`; binaries pick the backend.

mod traits;
mod noop;
mod console;
mod tracing_logger;

pub use traits::{Logger, SharedLogger};
pub use noop::NoOpLogger;
pub use console::{ConsoleLogger, LogLevel};
pub use tracing_logger::TracingLogger;
