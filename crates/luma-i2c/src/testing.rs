//! Test doubles
//!
//! [`FakeI2cWriter`] stands in for the bus device and lets tests stall the
//! worker thread mid-write; [`FakeBackend`] records checkout/commit traffic
//! so the encoders can be verified byte for byte. Both live in the library
//! (not behind `cfg(test)`) so the daemon's integration tests can reuse them.

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::backend::{Backend, CheckedOut};
use crate::error::Result;
use crate::writer::I2cWriter;

#[derive(Default)]
struct FakeWriterState {
    write_pending: bool,
    writes: u64,
    data: Vec<u8>,
}

/// An [`I2cWriter`] that records writes instead of touching hardware.
///
/// `block` makes subsequent writes stall inside [`I2cWriter::write`] after
/// recording their data, which is how the drop-accounting tests hold the
/// worker thread in a known place.
pub struct FakeI2cWriter {
    device_path: String,
    state: Mutex<FakeWriterState>,
    state_cond: Condvar,
    blocked: Mutex<bool>,
    blocked_cond: Condvar,
}

impl FakeI2cWriter {
    /// Create a fake writer reporting `device_path`.
    pub fn new(device_path: impl Into<String>) -> Self {
        Self {
            device_path: device_path.into(),
            state: Mutex::new(FakeWriterState::default()),
            state_cond: Condvar::new(),
            blocked: Mutex::new(false),
            blocked_cond: Condvar::new(),
        }
    }

    /// Make the next writes stall after recording their data.
    pub fn block(&self) {
        *self.blocked.lock() = true;
    }

    /// Release writes stalled by [`Self::block`].
    pub fn unblock(&self) {
        *self.blocked.lock() = false;
        self.blocked_cond.notify_all();
    }

    /// Forget that a write happened, so [`Self::wait_for_write`] waits for
    /// the next one.
    pub fn reset_write(&self) {
        self.state.lock().write_pending = false;
    }

    /// Block until a write has been recorded since the last
    /// [`Self::reset_write`].
    pub fn wait_for_write(&self) {
        let mut state = self.state.lock();
        while !state.write_pending {
            self.state_cond.wait(&mut state);
        }
    }

    /// Number of writes recorded so far.
    pub fn write_count(&self) -> u64 {
        self.state.lock().writes
    }

    /// Length of the most recent write.
    pub fn last_write_size(&self) -> usize {
        self.state.lock().data.len()
    }

    /// The bytes of the most recent write.
    pub fn last_write(&self) -> Vec<u8> {
        self.state.lock().data.clone()
    }

    /// Assert that the most recent write carried exactly `expected`.
    ///
    /// # Panics
    ///
    /// Panics when the recorded bytes differ.
    pub fn check_data_matches(&self, expected: &[u8]) {
        let state = self.state.lock();
        assert_eq!(state.data, expected, "last I2C write does not match");
    }
}

impl I2cWriter for FakeI2cWriter {
    fn device_path(&self) -> &str {
        &self.device_path
    }

    fn init(&self) -> Result<()> {
        Ok(())
    }

    fn write(&self, data: &[u8]) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.data.clear();
            state.data.extend_from_slice(data);
            state.writes += 1;
            state.write_pending = true;
        }
        // The write is visible before we stall, so tests can synchronize on
        // a blocked worker.
        self.state_cond.notify_all();

        let mut blocked = self.blocked.lock();
        while *blocked {
            self.blocked_cond.wait(&mut blocked);
        }
        Ok(())
    }
}

struct FakeOutput {
    data: Vec<u8>,
    latch_bytes: usize,
    commits: usize,
}

/// A [`Backend`] that keeps frames in memory and counts commits.
pub struct FakeBackend {
    output_count: u8,
    outputs: Mutex<Vec<FakeOutput>>,
}

impl FakeBackend {
    /// Create a fake backend with `output_count` outputs.
    pub fn new(output_count: u8) -> Self {
        let outputs = (0..output_count)
            .map(|_| FakeOutput {
                data: Vec::new(),
                latch_bytes: 0,
                commits: 0,
            })
            .collect();
        Self {
            output_count,
            outputs: Mutex::new(outputs),
        }
    }

    /// Payload bytes of the last checkout for `output`.
    pub fn data(&self, output: u8) -> Vec<u8> {
        self.outputs.lock()[output as usize].data.clone()
    }

    /// Latch bytes requested by the last checkout for `output`.
    pub fn latch_bytes(&self, output: u8) -> usize {
        self.outputs.lock()[output as usize].latch_bytes
    }

    /// Number of commits seen for `output`.
    pub fn commit_count(&self, output: u8) -> usize {
        self.outputs.lock()[output as usize].commits
    }
}

impl Backend for FakeBackend {
    fn checkout(&self, output: u8, length: usize, latch_bytes: usize) -> Option<CheckedOut<'_>> {
        if output >= self.output_count {
            return None;
        }
        let mut outputs = self.outputs.lock();
        let entry = &mut outputs[output as usize];
        // Same length keeps the previous contents, mirroring the real
        // backends' buffer reuse.
        if entry.data.len() != length {
            entry.data = vec![0; length];
        }
        entry.latch_bytes = latch_bytes;
        Some(MutexGuard::map(outputs, |outputs| {
            outputs[output as usize].data.as_mut_slice()
        }))
    }

    fn commit(&self, output: u8) {
        if output >= self.output_count {
            return;
        }
        self.outputs.lock()[output as usize].commits += 1;
    }

    fn init(&self) -> Result<()> {
        Ok(())
    }

    fn device_path(&self) -> String {
        "/dev/test".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_writer_records_writes() {
        let writer = FakeI2cWriter::new("/dev/test");
        writer.write(&[1, 2, 3]).unwrap();
        assert_eq!(writer.write_count(), 1);
        assert_eq!(writer.last_write_size(), 3);
        writer.check_data_matches(&[1, 2, 3]);
    }

    #[test]
    fn test_fake_writer_wait_and_reset() {
        let writer = FakeI2cWriter::new("/dev/test");
        writer.write(&[9]).unwrap();
        // Returns immediately, a write is pending.
        writer.wait_for_write();
        writer.reset_write();
        writer.write(&[8]).unwrap();
        writer.wait_for_write();
        assert_eq!(writer.write_count(), 2);
    }

    #[test]
    fn test_fake_backend_rejects_invalid_output() {
        let backend = FakeBackend::new(2);
        assert!(backend.checkout(2, 8, 0).is_none());
        backend.commit(2);
        assert_eq!(backend.commit_count(0), 0);
    }

    #[test]
    fn test_fake_backend_preserves_same_length_buffer() {
        let backend = FakeBackend::new(1);
        {
            let mut out = backend.checkout(0, 4, 0).unwrap();
            out.copy_from_slice(&[1, 2, 3, 4]);
        }
        {
            let mut out = backend.checkout(0, 4, 0).unwrap();
            assert_eq!(&out[..], &[1, 2, 3, 4]);
            out[0] = 9;
        }
        assert_eq!(backend.data(0), vec![9, 2, 3, 4]);
    }
}
