//! sysfs GPIO lines
//!
//! The hardware backend selects the active demultiplexer output by driving a
//! handful of GPIO pins. Pins are exported through the sysfs interface and
//! kept open for the lifetime of the backend.

use std::fs::File;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{I2cError, Result};

const GPIO_SYSFS_BASE: &str = "/sys/class/gpio";

/// One exported GPIO pin, drivable high or low.
pub struct GpioPin {
    pin: u16,
    value: File,
    // Last driven level, to skip redundant sysfs writes.
    state: Option<bool>,
}

impl GpioPin {
    /// Export `pin` and configure it as an output.
    pub fn export(pin: u16) -> Result<Self> {
        Self::export_at(Path::new(GPIO_SYSFS_BASE), pin)
    }

    /// Export `pin` under an alternative sysfs root. Split out so tests can
    /// point at a scratch directory.
    pub fn export_at(base: &Path, pin: u16) -> Result<Self> {
        let gpio_err = |source: std::io::Error| I2cError::GpioSetup { pin, source };

        // A pin that is already exported reports EBUSY; that is fine, we
        // still own its direction and value below.
        match std::fs::write(base.join("export"), pin.to_string()) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::ResourceBusy => {}
            Err(err) => return Err(gpio_err(err)),
        }

        let pin_dir: PathBuf = base.join(format!("gpio{pin}"));
        std::fs::write(pin_dir.join("direction"), "out").map_err(gpio_err)?;

        let value = File::options()
            .write(true)
            .open(pin_dir.join("value"))
            .map_err(gpio_err)?;

        debug!("Exported GPIO pin {} as output", pin);
        Ok(Self {
            pin,
            value,
            state: None,
        })
    }

    /// The sysfs pin number.
    pub fn pin(&self) -> u16 {
        self.pin
    }

    /// Drive the pin high or low. Unchanged levels are not rewritten.
    pub fn set(&mut self, high: bool) -> Result<()> {
        if self.state == Some(high) {
            return Ok(());
        }
        let level: &[u8] = if high { b"1" } else { b"0" };
        self.value
            .write_all(level)
            .map_err(|source| I2cError::GpioSetup {
                pin: self.pin,
                source,
            })?;
        self.state = Some(high);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fake_sysfs(pin: u16) -> tempfile::TempDir {
        let base = tempfile::tempdir().unwrap();
        fs::write(base.path().join("export"), "").unwrap();
        let pin_dir = base.path().join(format!("gpio{pin}"));
        fs::create_dir(&pin_dir).unwrap();
        fs::write(pin_dir.join("direction"), "").unwrap();
        fs::write(pin_dir.join("value"), "").unwrap();
        base
    }

    #[test]
    fn test_export_and_drive() {
        let base = fake_sysfs(4);
        let mut pin = GpioPin::export_at(base.path(), 4).unwrap();
        assert_eq!(pin.pin(), 4);

        pin.set(true).unwrap();
        pin.set(false).unwrap();

        assert_eq!(
            fs::read_to_string(base.path().join("export")).unwrap(),
            "4"
        );
        assert_eq!(
            fs::read_to_string(base.path().join("gpio4/direction")).unwrap(),
            "out"
        );
    }

    #[test]
    fn test_missing_pin_fails() {
        let base = fake_sysfs(4);
        assert!(GpioPin::export_at(base.path(), 7).is_err());
    }
}
