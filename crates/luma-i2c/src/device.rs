//! The per-bus device glue
//!
//! One [`I2cDevice`] exists per physical bus device file. It reads the
//! device's preferences, builds the writer and the configured backend,
//! creates one [`I2cOutput`] per logical output, routes DMX frames to them,
//! and writes the per-output state back to the preferences on shutdown.

use std::path::Path;
use std::sync::Arc;

use luma_dmx::DmxBuffer;
use tracing::{info, warn};

use crate::backend::{
    Backend, HardwareBackend, HardwareBackendOptions, SoftwareBackend, SoftwareBackendOptions,
};
use crate::config::{Preferences, Validator};
use crate::error::Result;
use crate::metrics::ExportMap;
use crate::output::{I2cOutput, I2cOutputOptions, UidAllocator};
use crate::writer::{I2cDev, I2cWriter, I2cWriterOptions};

/// Preference value selecting the GPIO-demultiplexed backend.
pub const HARDWARE_BACKEND: &str = "hardware";
/// Preference value selecting the concatenating backend.
pub const SOFTWARE_BACKEND: &str = "software";

/// Upper bound for the configured bus speed, in Hz.
pub const MAX_I2C_SPEED: u32 = 32_000_000;
/// Upper bound for the software backend's output count.
pub const MAX_PORT_COUNT: u8 = 32;
/// Highest accepted sysfs GPIO pin number.
pub const MAX_GPIO_PIN: u16 = 1023;

/// The file name of a device path, or the path itself when it has none.
pub(crate) fn filename_from_path(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

fn device_key(device_name: &str, suffix: &str) -> String {
    format!("{device_name}-{suffix}")
}

fn port_key(device_name: &str, port: u8, suffix: &str) -> String {
    format!("{device_name}-{port}-{suffix}")
}

fn set_defaults(prefs: &mut Preferences, device_name: &str) {
    prefs.set_default(
        &device_key(device_name, "backend"),
        Validator::OneOf(&[HARDWARE_BACKEND, SOFTWARE_BACKEND]),
        SOFTWARE_BACKEND,
    );
    prefs.set_default(
        &device_key(device_name, "i2c-speed"),
        Validator::UIntRange(0, MAX_I2C_SPEED),
        "1000000",
    );
    prefs.set_default(
        &device_key(device_name, "i2c-ce-high"),
        Validator::Bool,
        "false",
    );
    prefs.set_default(
        &device_key(device_name, "ports"),
        Validator::UIntRange(1, MAX_PORT_COUNT as u32),
        "1",
    );
    prefs.set_default(
        &device_key(device_name, "sync-port"),
        Validator::IntRange(-2, MAX_PORT_COUNT as i32),
        "0",
    );
}

pub(crate) fn populate_writer_options(
    prefs: &Preferences,
    device_name: &str,
) -> I2cWriterOptions {
    let mut options = I2cWriterOptions::default();
    if let Some(speed) = prefs.get_parsed(&device_key(device_name, "i2c-speed")) {
        options.i2c_speed = speed;
    }
    if let Some(ce_high) = prefs.get_parsed(&device_key(device_name, "i2c-ce-high")) {
        options.cs_enable_high = ce_high;
    }
    options
}

pub(crate) fn populate_hardware_options(
    prefs: &Preferences,
    device_name: &str,
) -> HardwareBackendOptions {
    let mut options = HardwareBackendOptions::default();
    for value in prefs.get_multiple(&device_key(device_name, "gpio-pin")) {
        let pin: u16 = match value.parse() {
            Ok(pin) => pin,
            Err(_) => {
                warn!("Invalid GPIO pin {}", value);
                continue;
            }
        };
        if pin > MAX_GPIO_PIN {
            warn!("Invalid GPIO pin {}, must be <= {}", value, MAX_GPIO_PIN);
            continue;
        }
        options.gpio_pins.push(pin);
    }
    options
}

pub(crate) fn populate_software_options(
    prefs: &Preferences,
    device_name: &str,
) -> SoftwareBackendOptions {
    let mut options = SoftwareBackendOptions::default();
    if let Some(outputs) = prefs.get_parsed(&device_key(device_name, "ports")) {
        options.outputs = outputs;
    }
    if let Some(sync_output) = prefs.get_parsed(&device_key(device_name, "sync-port")) {
        options.sync_output = sync_output;
    }
    // -2 designates the last output.
    if options.sync_output == -2 {
        options.sync_output = i16::from(options.outputs) - 1;
    }
    options
}

/// One physical bus device with its backend and logical outputs.
pub struct I2cDevice {
    device_name: String,
    backend: Arc<dyn Backend>,
    outputs: Vec<I2cOutput>,
}

impl I2cDevice {
    /// Build the device for `device_path`, constructing the real bus writer.
    /// Installs validated defaults into `prefs`.
    pub fn new(
        prefs: &mut Preferences,
        device_path: &str,
        export_map: &ExportMap,
        uid_allocator: &mut UidAllocator,
    ) -> Self {
        let device_name = filename_from_path(device_path);
        set_defaults(prefs, &device_name);
        let writer_options = populate_writer_options(prefs, &device_name);
        let writer = Arc::new(I2cDev::new(device_path, &writer_options, export_map));
        Self::with_writer(prefs, writer, export_map, uid_allocator)
    }

    /// Build the device over an existing writer. This is the seam the tests
    /// use to substitute a fake bus.
    pub fn with_writer(
        prefs: &mut Preferences,
        writer: Arc<dyn I2cWriter>,
        export_map: &ExportMap,
        uid_allocator: &mut UidAllocator,
    ) -> Self {
        let device_name = filename_from_path(writer.device_path());
        set_defaults(prefs, &device_name);

        let backend_type = prefs
            .get(&device_key(&device_name, "backend"))
            .unwrap_or(SOFTWARE_BACKEND)
            .to_string();

        let (backend, port_count): (Arc<dyn Backend>, u8) =
            if backend_type == HARDWARE_BACKEND {
                let options = populate_hardware_options(prefs, &device_name);
                let backend = HardwareBackend::new(&options, writer, export_map);
                let port_count = backend.output_count();
                info!("{}, hardware backend, {} ports", device_name, port_count);
                (Arc::new(backend), port_count)
            } else {
                if backend_type != SOFTWARE_BACKEND {
                    warn!(
                        "Unknown backend type '{}' for I2C device {}",
                        backend_type, device_name
                    );
                }
                let options = populate_software_options(prefs, &device_name);
                let backend = SoftwareBackend::new(&options, writer, export_map);
                let port_count = backend.output_count();
                info!("{}, software backend, {} ports", device_name, port_count);
                (Arc::new(backend), port_count)
            };

        let mut outputs = Vec::with_capacity(port_count as usize);
        for port in 0..port_count {
            let mut options = I2cOutputOptions::new(port, &device_name);
            if let Some(label) = prefs.get(&port_key(&device_name, port, "device-label")) {
                options.device_label = label.to_string();
            }
            if let Some(pixel_count) =
                prefs.get_parsed(&port_key(&device_name, port, "pixel-count"))
            {
                options.pixel_count = pixel_count;
            }

            let Some(uid) = uid_allocator.allocate_next() else {
                warn!(
                    "Insufficient UIDs remaining to allocate a UID for I2C port {}",
                    port
                );
                continue;
            };
            outputs.push(I2cOutput::new(uid, Arc::clone(&backend), options));
        }

        Self {
            device_name,
            backend,
            outputs,
        }
    }

    /// The device id: the file name of the bus device path.
    pub fn device_id(&self) -> &str {
        &self.device_name
    }

    /// The display name of this device.
    pub fn name(&self) -> String {
        format!("I2C Device {}", self.device_name)
    }

    /// Start the backend worker and apply the persisted per-port settings.
    /// On failure the device must not be registered; no ports come up.
    pub fn start(&mut self, prefs: &Preferences) -> Result<()> {
        self.backend.init()?;

        for output in &mut self.outputs {
            let port = output.output_number();
            if let Some(personality) =
                prefs.get_parsed(&port_key(&self.device_name, port, "personality"))
            {
                output.set_personality(personality);
            }
            if let Some(address) =
                prefs.get_parsed(&port_key(&self.device_name, port, "dmx-address"))
            {
                output.set_start_address(address);
            }
        }
        Ok(())
    }

    /// Persist the per-port state and save the preferences.
    pub fn stop(&self, prefs: &mut Preferences) -> Result<()> {
        for output in &self.outputs {
            let port = output.output_number();
            prefs.set(
                port_key(&self.device_name, port, "device-label"),
                output.device_label(),
            );
            prefs.set(
                port_key(&self.device_name, port, "personality"),
                output.personality().to_string(),
            );
            prefs.set(
                port_key(&self.device_name, port, "dmx-address"),
                output.start_address().to_string(),
            );
            prefs.set(
                port_key(&self.device_name, port, "pixel-count"),
                output.pixel_count().to_string(),
            );
        }
        prefs.save()
    }

    /// Route one DMX frame to `port`. Unknown ports report failure.
    pub fn write_dmx(&self, port: u8, buffer: &DmxBuffer) -> bool {
        match self.outputs.get(port as usize) {
            Some(output) => output.write_dmx(buffer),
            None => false,
        }
    }

    /// The per-port responder states.
    pub fn outputs(&self) -> &[I2cOutput] {
        &self.outputs
    }

    /// Mutable access to the per-port responder states, for the
    /// configuration surface.
    pub fn outputs_mut(&mut self) -> &mut [I2cOutput] {
        &mut self.outputs
    }
}
