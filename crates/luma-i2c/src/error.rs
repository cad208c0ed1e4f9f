//! Error types for the I2C output plugin
use thiserror::Error;

/// I2C plugin errors
#[derive(Error, Debug)]
pub enum I2cError {
    /// Opening or configuring the bus device failed
    #[error("failed to configure {device}: {reason}")]
    BusSetup {
        /// Device path that failed to come up
        device: String,
        /// What went wrong
        reason: String,
    },

    /// A bus transfer delivered fewer bytes than requested
    #[error("short write on {device}: wrote {written} of {expected} bytes")]
    ShortWrite {
        /// Device path the write was issued on
        device: String,
        /// Bytes the kernel reported as transferred
        written: usize,
        /// Bytes handed to the transfer
        expected: usize,
    },

    /// GPIO pin export or setup failed
    #[error("GPIO pin {pin} setup failed: {source}")]
    GpioSetup {
        /// The sysfs pin number
        pin: u16,
        /// Underlying filesystem error
        source: std::io::Error,
    },

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Preferences file could not be read or written
    #[error("preferences I/O error: {0}")]
    Preferences(#[from] std::io::Error),

    /// Preferences file could not be parsed
    #[error("preferences format error: {0}")]
    PreferencesFormat(#[from] serde_json::Error),
}

/// Result type for I2C plugin operations
pub type Result<T> = std::result::Result<T, I2cError>;
