//! The I2C bus writer
//!
//! [`I2cDev`] owns the `/dev/i2cdev*` character device and pushes completed
//! frame buffers onto the bus, one blocking transfer per call. The device is
//! configured once during [`I2cWriter::init`]: write mode (CE polarity), 8
//! bits per word, and the maximum bus speed. Writes are never retried here;
//! the next committed frame drives the next attempt.

use std::fs::File;
use std::os::unix::io::AsRawFd;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::{I2cError, Result};
use crate::metrics::{ExportMap, UIntMap, I2C_ERROR_VAR, I2C_WRITE_VAR};

const I2C_BITS_PER_WORD: u8 = 8;
const I2C_MODE: u8 = 0;
/// Mode bit selecting an active-high chip-enable line.
const I2C_MODE_CE_HIGH: u8 = 0x01;

// ioctl encoding for the i2cdev character device. Same _IOW layout the
// kernel uses: nr in bits 0-7, magic in 8-15, argument size in 16-29,
// direction in 30-31.
const IOC_WRITE: libc::c_ulong = 1;
const I2C_IOC_MAGIC: libc::c_ulong = b'k' as libc::c_ulong;

const fn ioc_w(nr: libc::c_ulong, size: libc::c_ulong) -> libc::c_ulong {
    (IOC_WRITE << 30) | (size << 16) | (I2C_IOC_MAGIC << 8) | nr
}

const I2C_IOC_WR_MODE: libc::c_ulong = ioc_w(1, 1);
const I2C_IOC_WR_BITS_PER_WORD: libc::c_ulong = ioc_w(3, 1);
const I2C_IOC_WR_MAX_SPEED_HZ: libc::c_ulong = ioc_w(4, 4);

/// One transfer descriptor for `I2C_IOC_MESSAGE(1)`.
#[repr(C)]
#[derive(Default)]
struct I2cIocTransfer {
    tx_buf: u64,
    rx_buf: u64,
    len: u32,
    speed_hz: u32,
    delay_usecs: u16,
    bits_per_word: u8,
    cs_change: u8,
    tx_nbits: u8,
    rx_nbits: u8,
    word_delay_usecs: u8,
    pad: u8,
}

const fn i2c_ioc_message(count: libc::c_ulong) -> libc::c_ulong {
    ioc_w(0, count * std::mem::size_of::<I2cIocTransfer>() as libc::c_ulong)
}

/// The sink interface the backends write through.
///
/// Implemented by [`I2cDev`] for real hardware and by
/// [`FakeI2cWriter`](crate::testing::FakeI2cWriter) in tests.
pub trait I2cWriter: Send + Sync {
    /// Path of the bus device this writer drives.
    fn device_path(&self) -> &str;

    /// Open and configure the device. Called once before the backend's
    /// worker starts.
    fn init(&self) -> Result<()>;

    /// Push one complete buffer onto the bus in a single blocking transfer.
    fn write(&self, data: &[u8]) -> Result<()>;
}

/// Options for [`I2cDev`].
#[derive(Debug, Clone)]
pub struct I2cWriterOptions {
    /// Maximum bus speed in Hz.
    pub i2c_speed: u32,
    /// Drive the chip-enable line active-high.
    pub cs_enable_high: bool,
}

impl Default for I2cWriterOptions {
    fn default() -> Self {
        Self {
            i2c_speed: 1_000_000,
            cs_enable_high: false,
        }
    }
}

/// Writer for a Linux i2cdev character device.
pub struct I2cDev {
    device_path: String,
    i2c_speed: u32,
    cs_enable_high: bool,
    fd: Mutex<Option<File>>,
    write_map: UIntMap,
    error_map: UIntMap,
}

impl I2cDev {
    /// Create a writer for `device_path`. The device is not opened until
    /// [`I2cWriter::init`].
    pub fn new(
        device_path: impl Into<String>,
        options: &I2cWriterOptions,
        export_map: &ExportMap,
    ) -> Self {
        let device_path = device_path.into();
        info!(
            "Created I2C writer {} with speed {}, CE high {}",
            device_path, options.i2c_speed, options.cs_enable_high
        );
        let write_map = export_map.uint_map(I2C_WRITE_VAR);
        let error_map = export_map.uint_map(I2C_ERROR_VAR);
        write_map.set(&device_path, 0);
        error_map.set(&device_path, 0);
        Self {
            device_path,
            i2c_speed: options.i2c_speed,
            cs_enable_high: options.cs_enable_high,
            fd: Mutex::new(None),
            write_map,
            error_map,
        }
    }

    fn setup_ioctl(
        &self,
        fd: libc::c_int,
        request: libc::c_ulong,
        arg: *const libc::c_void,
        what: &str,
    ) -> Result<()> {
        // SAFETY: fd is an open descriptor and arg points at a live value of
        // the size encoded in the request.
        let ret = unsafe { libc::ioctl(fd, request, arg) };
        if ret < 0 {
            warn!("Failed to set {} for {}", what, self.device_path);
            return Err(I2cError::BusSetup {
                device: self.device_path.clone(),
                reason: format!("{}: {}", what, std::io::Error::last_os_error()),
            });
        }
        Ok(())
    }
}

impl I2cWriter for I2cDev {
    fn device_path(&self) -> &str {
        &self.device_path
    }

    fn init(&self) -> Result<()> {
        let file = File::options()
            .read(true)
            .write(true)
            .open(&self.device_path)
            .map_err(|err| I2cError::BusSetup {
                device: self.device_path.clone(),
                reason: err.to_string(),
            })?;
        let fd = file.as_raw_fd();

        let mut mode = I2C_MODE;
        if self.cs_enable_high {
            mode |= I2C_MODE_CE_HIGH;
        }
        self.setup_ioctl(
            fd,
            I2C_IOC_WR_MODE,
            &mode as *const u8 as *const libc::c_void,
            "I2C_IOC_WR_MODE",
        )?;

        let bits_per_word = I2C_BITS_PER_WORD;
        self.setup_ioctl(
            fd,
            I2C_IOC_WR_BITS_PER_WORD,
            &bits_per_word as *const u8 as *const libc::c_void,
            "I2C_IOC_WR_BITS_PER_WORD",
        )?;

        let speed = self.i2c_speed;
        self.setup_ioctl(
            fd,
            I2C_IOC_WR_MAX_SPEED_HZ,
            &speed as *const u32 as *const libc::c_void,
            "I2C_IOC_WR_MAX_SPEED_HZ",
        )?;

        // The descriptor is only retained once every parameter stuck.
        *self.fd.lock() = Some(file);
        Ok(())
    }

    fn write(&self, data: &[u8]) -> Result<()> {
        let fd = self.fd.lock();
        let file = fd.as_ref().ok_or_else(|| I2cError::BusSetup {
            device: self.device_path.clone(),
            reason: "device not initialized".to_string(),
        })?;

        self.write_map.increment(&self.device_path);

        let transfer = I2cIocTransfer {
            tx_buf: data.as_ptr() as u64,
            len: data.len() as u32,
            ..Default::default()
        };

        // SAFETY: the transfer references `data`, which outlives the call;
        // the request size matches one I2cIocTransfer.
        let written = unsafe {
            libc::ioctl(
                file.as_raw_fd(),
                i2c_ioc_message(1),
                &transfer as *const I2cIocTransfer,
            )
        };
        if written != data.len() as libc::c_int {
            warn!(
                "Failed to write all the I2C data to {}: {}",
                self.device_path,
                std::io::Error::last_os_error()
            );
            self.error_map.increment(&self.device_path);
            return Err(I2cError::ShortWrite {
                device: self.device_path.clone(),
                written: written.max(0) as usize,
                expected: data.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ioctl_encoding_matches_kernel_layout() {
        // _IOW('k', 1, u8) and friends, as the i2cdev header defines them.
        assert_eq!(I2C_IOC_WR_MODE, 0x4001_6B01);
        assert_eq!(I2C_IOC_WR_BITS_PER_WORD, 0x4001_6B03);
        assert_eq!(I2C_IOC_WR_MAX_SPEED_HZ, 0x4004_6B04);
        // One transfer descriptor is 32 bytes.
        assert_eq!(std::mem::size_of::<I2cIocTransfer>(), 32);
        assert_eq!(i2c_ioc_message(1), 0x4020_6B00);
    }

    #[test]
    fn test_write_before_init_fails() {
        let writer = I2cDev::new(
            "/dev/i2c-test-missing",
            &I2cWriterOptions::default(),
            &ExportMap::new(),
        );
        assert!(writer.write(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_init_missing_device_fails() {
        let writer = I2cDev::new(
            "/dev/luma-i2c-does-not-exist",
            &I2cWriterOptions::default(),
            &ExportMap::new(),
        );
        assert!(writer.init().is_err());
    }

    #[test]
    fn test_default_options() {
        let options = I2cWriterOptions::default();
        assert_eq!(options.i2c_speed, 1_000_000);
        assert!(!options.cs_enable_high);
    }
}
