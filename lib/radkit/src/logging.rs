pub use slog::{crit, debug, error, info, o, trace, warn, Discard, Logger};

use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::{Build, Config, LoggerConfig};
use std::error::Error;
use std::path::Path;

/// Builds the default terminal logger: debug level on stderr.
pub fn init() -> Logger {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(Severity::Debug);
    builder.destination(Destination::Stderr);

    builder.build().expect("Error building terminal logger")
}

/// Builds a logger from a sloggers TOML config file.
pub fn from_config<P: AsRef<Path>>(path: P) -> Result<Logger, Box<dyn Error>> {
    let config: LoggerConfig = serdeconv::from_toml_file(path)?;
    let logger = config.build_logger()?;

    Ok(logger)
}
