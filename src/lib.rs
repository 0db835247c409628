pub mod config;
pub mod driver;
mod logging;
pub mod matcher;
pub mod report;
pub mod session;
pub mod signals;
pub mod suite;
pub mod telemetry;

pub use logging::{init_logging, log_debug, log_debug_content, log_file_path, log_panic};
