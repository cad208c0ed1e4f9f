//! Per-output responder state
//!
//! Each logical output on a bus is an independently configurable responder:
//! it has a personality (which chipset encoder runs), a pixel count, a DMX
//! start address, a device label, and an identify mode. Remote configuration
//! reaches these fields through the getters and setters below; the DMX path
//! enters through [`I2cOutput::write_dmx`].

use std::fmt;
use std::sync::Arc;

use luma_dmx::{DmxBuffer, DMX_MAX_SLOT_VALUE, DMX_UNIVERSE_SIZE};
use tracing::info;

use crate::backend::Backend;
use crate::device::filename_from_path;
use crate::encoder;
use crate::personality::Personality;

/// ESTA manufacturer id used for this plugin's responder UIDs.
pub const LUMA_ESTA_ID: u16 = 0x4C4D;

/// A responder UID: ESTA manufacturer id plus a per-responder device id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Uid {
    /// ESTA manufacturer id.
    pub esta_id: u16,
    /// Device id, unique per responder under one manufacturer id.
    pub device_id: u32,
}

impl Uid {
    /// Create a UID from its two halves.
    pub fn new(esta_id: u16, device_id: u32) -> Self {
        Self { esta_id, device_id }
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:08x}", self.esta_id, self.device_id)
    }
}

/// Hands out sequential UIDs under one manufacturer id.
#[derive(Debug)]
pub struct UidAllocator {
    esta_id: u16,
    next_device_id: u32,
}

impl UidAllocator {
    /// Start allocating at `first_device_id`.
    pub fn new(esta_id: u16, first_device_id: u32) -> Self {
        Self {
            esta_id,
            next_device_id: first_device_id,
        }
    }

    /// Allocate the next UID, or `None` once the device id space is used up.
    pub fn allocate_next(&mut self) -> Option<Uid> {
        if self.next_device_id == u32::MAX {
            return None;
        }
        let uid = Uid::new(self.esta_id, self.next_device_id);
        self.next_device_id += 1;
        Some(uid)
    }
}

impl Default for UidAllocator {
    fn default() -> Self {
        Self::new(LUMA_ESTA_ID, 1)
    }
}

/// Options for one [`I2cOutput`].
#[derive(Debug, Clone)]
pub struct I2cOutputOptions {
    /// Label shown to the operator; persisted across runs.
    pub device_label: String,
    /// Number of LEDs on the string.
    pub pixel_count: u16,
    /// The logical output this state drives.
    pub output_number: u8,
}

impl I2cOutputOptions {
    /// Defaults for `output_number` on the named bus device: a 25 pixel
    /// string with a generic label.
    pub fn new(output_number: u8, device_name: &str) -> Self {
        Self {
            device_label: format!("I2C Device - {device_name}"),
            pixel_count: 25,
            output_number,
        }
    }
}

/// The configurable state of one logical output.
pub struct I2cOutput {
    backend: Arc<dyn Backend>,
    output_number: u8,
    device_name: String,
    uid: Uid,
    pixel_count: u16,
    device_label: String,
    start_address: u16,
    identify_mode: bool,
    personality: Personality,
}

impl I2cOutput {
    /// Create the state for one output of `backend`.
    pub fn new(uid: Uid, backend: Arc<dyn Backend>, options: I2cOutputOptions) -> Self {
        let device_name = filename_from_path(&backend.device_path());
        Self {
            backend,
            output_number: options.output_number,
            device_name,
            uid,
            pixel_count: options.pixel_count,
            device_label: options.device_label,
            start_address: 1,
            identify_mode: false,
            personality: Personality::default(),
        }
    }

    /// The logical output number this state drives.
    pub fn output_number(&self) -> u8 {
        self.output_number
    }

    /// This responder's UID.
    pub fn uid(&self) -> Uid {
        self.uid
    }

    /// The operator-visible label.
    pub fn device_label(&self) -> &str {
        &self.device_label
    }

    /// Set the operator-visible label.
    pub fn set_device_label(&mut self, device_label: impl Into<String>) -> bool {
        self.device_label = device_label.into();
        true
    }

    /// The active personality number (1-10).
    pub fn personality(&self) -> u8 {
        self.personality.number()
    }

    /// Switch personality by number. Fails for unknown numbers. The start
    /// address is not revalidated; an address that no longer fits simply
    /// rejects the next change.
    pub fn set_personality(&mut self, number: u8) -> bool {
        match Personality::from_number(number) {
            Some(personality) => {
                self.personality = personality;
                true
            }
            None => false,
        }
    }

    /// The DMX start address (1-512).
    pub fn start_address(&self) -> u16 {
        self.start_address
    }

    /// Set the DMX start address. Fails when the personality's footprint is
    /// zero or would run past the end of the universe.
    pub fn set_start_address(&mut self, address: u16) -> bool {
        let footprint = self.personality.footprint(self.pixel_count);
        if footprint == 0 || footprint > DMX_UNIVERSE_SIZE as u32 {
            return false;
        }
        let last_valid = DMX_UNIVERSE_SIZE as u32 - footprint + 1;
        if address == 0 || u32::from(address) > last_valid {
            return false;
        }
        self.start_address = address;
        true
    }

    /// Number of LEDs on the string.
    pub fn pixel_count(&self) -> u16 {
        self.pixel_count
    }

    /// Whether identify mode is on.
    pub fn identify_mode(&self) -> bool {
        self.identify_mode
    }

    /// Switch identify mode. On a transition the string is driven fully on
    /// (entering) or blacked out (leaving) through the normal encoder.
    pub fn set_identify(&mut self, on: bool) {
        if self.identify_mode == on {
            return;
        }
        self.identify_mode = on;
        info!(
            "I2C {} identify mode {}",
            self.device_name,
            if on { "on" } else { "off" }
        );
        let mut identify_buffer = DmxBuffer::new();
        if on {
            identify_buffer.set_range_to_value(0, DMX_MAX_SLOT_VALUE, DMX_UNIVERSE_SIZE);
        } else {
            identify_buffer.blackout();
        }
        self.internal_write_dmx(&identify_buffer);
    }

    /// Send one DMX frame to the string. While identify mode is on, frames
    /// from the universe are accepted but not written.
    pub fn write_dmx(&self, buffer: &DmxBuffer) -> bool {
        if self.identify_mode {
            return true;
        }
        self.internal_write_dmx(buffer)
    }

    fn internal_write_dmx(&self, buffer: &DmxBuffer) -> bool {
        encoder::encode(
            self.personality,
            self.backend.as_ref(),
            self.output_number,
            buffer,
            self.start_address,
            self.pixel_count,
        );
        true
    }

    /// One-line description of this output for the operator.
    pub fn description(&self) -> String {
        format!(
            "Output {}, {}, {} slots @ {}. ({})",
            self.output_number,
            self.personality.description(),
            self.personality.footprint(self.pixel_count),
            self.start_address,
            self.uid
        )
    }
}
