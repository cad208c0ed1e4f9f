//! Luma I2C - Pixel Output Plugin
//!
//! This crate drives strings of addressable LEDs (WS2801, LPD8806, P9813,
//! APA102, and APA102 with per-pixel brightness) from DMX universes, over a
//! single I2C bus multiplexed across up to 32 logical outputs.
//!
//! ## Architecture
//!
//! DMX frames enter per output through [`I2cOutput::write_dmx`], which picks
//! the encoder for the output's active personality. The encoder borrows a
//! buffer from the device's [`Backend`] (checkout), writes the chipset's wire
//! format into it, and publishes it (commit). A single worker thread per
//! backend drains pending buffers onto the bus through the [`I2cWriter`].
//! Frames committed faster than the bus can drain are superseded in place and
//! surface in the `i2c-drops` counter.
//!
//! ## Modules
//!
//! - [`backend`] - producer/consumer engine between ports and the bus writer
//! - [`encoder`] - per-chipset wire format encoders
//! - [`output`] - per-output responder state (personality, address, label)
//! - [`device`] - per-bus-device wiring and preference persistence
//! - [`writer`] - the bus device writer
//! - [`gpio`] - sysfs GPIO select lines for the hardware backend
//! - [`config`] - the validated preference store
//! - [`metrics`] - exported counters
//! - [`testing`] - fakes for the writer and the backend

#![warn(missing_docs)]

pub mod backend;
pub mod config;
pub mod device;
pub mod encoder;
pub mod error;
pub mod gpio;
pub mod metrics;
pub mod output;
pub mod personality;
pub mod testing;
pub mod writer;

pub use backend::{
    Backend, CheckedOut, HardwareBackend, HardwareBackendOptions, SoftwareBackend,
    SoftwareBackendOptions,
};
pub use config::{Preferences, Validator};
pub use device::I2cDevice;
pub use error::{I2cError, Result};
pub use metrics::ExportMap;
pub use output::{I2cOutput, I2cOutputOptions, Uid, UidAllocator};
pub use personality::Personality;
pub use writer::{I2cDev, I2cWriter, I2cWriterOptions};
