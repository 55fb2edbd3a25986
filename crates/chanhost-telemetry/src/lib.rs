//! Chanhost Telemetry - logging for the extension host.
//!
//! # Example
//!
//! ```rust,no_run
//! use chanhost_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), chanhost_telemetry::TelemetryError> {
//! let config = LogConfig::new("debug")
//!     .with_format(LogFormat::Compact)
//!     .with_directive("chanhost_extensions=trace");
//!
//! setup_logging(&config)?;
//! tracing::info!("registry starting");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{
    FileLogConfig, FileRotation, LogConfig, LogFormat, LogTarget, setup_default_logging,
    setup_logging,
};
