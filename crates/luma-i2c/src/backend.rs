//! The multiplexing backends
//!
//! A backend sits between the DMX-producing ports and the single bus writer
//! thread. Producers borrow a per-output scratch buffer with
//! [`Backend::checkout`], fill it, and publish it with [`Backend::commit`];
//! the worker thread picks up pending buffers and pushes them through the
//! [`I2cWriter`].
//!
//! Two multiplexing strategies exist:
//! - [`HardwareBackend`]: one buffer per output, demultiplexed on the wire by
//!   GPIO-driven select pins.
//! - [`SoftwareBackend`]: all outputs concatenated into one buffer that is
//!   written in a single bus transaction, optionally gated on a designated
//!   sync output.
//!
//! A commit that lands while the previous frame for the same slot is still
//! waiting supersedes it and counts one drop in `i2c-drops`; the engine always
//! converges to writing the most recently committed bytes.

use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, MappedMutexGuard, Mutex, MutexGuard};
use tracing::{info, warn};

use crate::error::{I2cError, Result};
use crate::gpio::GpioPin;
use crate::metrics::{ExportMap, UIntMap, I2C_DROP_VAR};
use crate::writer::I2cWriter;

/// Exclusive view of one output's payload region, handed out by
/// [`Backend::checkout`]. The backend lock is held for as long as the guard
/// lives; drop it before calling [`Backend::commit`].
pub type CheckedOut<'a> = MappedMutexGuard<'a, [u8]>;

/// The producer contract shared by both multiplexing strategies.
pub trait Backend: Send + Sync {
    /// Borrow `length` writable payload bytes for `output`, with
    /// `latch_bytes` of zeros guaranteed to trail the payload on the wire.
    ///
    /// Returns `None` when `output` is outside this backend's range. The
    /// payload keeps the bytes of the previous checkout unless it had to be
    /// reallocated, so callers must not assume zeroed contents.
    fn checkout(&self, output: u8, length: usize, latch_bytes: usize) -> Option<CheckedOut<'_>>;

    /// Publish the buffer last checked out for `output` and wake the worker.
    /// If the previous frame for this slot is still unconsumed it is
    /// superseded and one drop is counted.
    fn commit(&self, output: u8);

    /// Open the bus (and any select pins) and start the worker thread.
    fn init(&self) -> Result<()>;

    /// Path of the underlying bus device.
    fn device_path(&self) -> String;
}

// ---------------------------------------------------------------------------
// Hardware backend
// ---------------------------------------------------------------------------

/// Options for [`HardwareBackend`].
#[derive(Debug, Clone, Default)]
pub struct HardwareBackendOptions {
    /// GPIO pins driving the demultiplexer select lines. Bit `k` of the
    /// output number is driven onto `gpio_pins[k]`, so the number of outputs
    /// is `2 ^ gpio_pins.len()`.
    pub gpio_pins: Vec<u16>,
}

/// One output's frame storage.
///
/// `data.len()` is the capacity, grown monotonically; `size` is the logical
/// payload length of the current frame. Growing reallocates zero-filled,
/// shrinking keeps the allocation and the stale tail bytes.
struct OutputBuffer {
    data: Vec<u8>,
    size: usize,
    latch_bytes: usize,
    pending: bool,
}

impl OutputBuffer {
    fn new() -> Self {
        Self {
            data: Vec::new(),
            size: 0,
            latch_bytes: 0,
            pending: false,
        }
    }

    fn resize(&mut self, length: usize, latch_bytes: usize) {
        if length > self.data.len() {
            self.data = vec![0; length];
        }
        self.size = length;
        self.latch_bytes = latch_bytes;
    }
}

struct HardwareState {
    outputs: Vec<OutputBuffer>,
    exit: bool,
}

struct HardwareShared {
    state: Mutex<HardwareState>,
    cond: Condvar,
}

/// Backend multiplexing outputs through an external demultiplexer selected by
/// GPIO pins.
pub struct HardwareBackend {
    writer: Arc<dyn I2cWriter>,
    drop_map: UIntMap,
    output_count: u8,
    gpio_pins: Vec<u16>,
    shared: Arc<HardwareShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl HardwareBackend {
    /// Create a hardware backend over `writer`. With no GPIO pins there is a
    /// single output and no select lines to drive.
    pub fn new(
        options: &HardwareBackendOptions,
        writer: Arc<dyn I2cWriter>,
        export_map: &ExportMap,
    ) -> Self {
        let output_count = 1u8 << options.gpio_pins.len();
        let outputs = (0..output_count).map(|_| OutputBuffer::new()).collect();
        let drop_map = export_map.uint_map(I2C_DROP_VAR);
        drop_map.set(writer.device_path(), 0);
        Self {
            writer,
            drop_map,
            output_count,
            gpio_pins: options.gpio_pins.clone(),
            shared: Arc::new(HardwareShared {
                state: Mutex::new(HardwareState {
                    outputs,
                    exit: false,
                }),
                cond: Condvar::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Number of logical outputs.
    pub fn output_count(&self) -> u8 {
        self.output_count
    }
}

impl Backend for HardwareBackend {
    fn checkout(&self, output: u8, length: usize, latch_bytes: usize) -> Option<CheckedOut<'_>> {
        if output >= self.output_count {
            return None;
        }
        let mut state = self.shared.state.lock();
        state.outputs[output as usize].resize(length, latch_bytes);
        Some(MutexGuard::map(state, |state| {
            &mut state.outputs[output as usize].data[..length]
        }))
    }

    fn commit(&self, output: u8) {
        if output >= self.output_count {
            return;
        }
        {
            let mut state = self.shared.state.lock();
            let buffer = &mut state.outputs[output as usize];
            if buffer.pending {
                self.drop_map.increment(self.writer.device_path());
            } else {
                buffer.pending = true;
            }
        }
        self.shared.cond.notify_one();
    }

    fn init(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        self.writer.init()?;

        let mut pins = Vec::with_capacity(self.gpio_pins.len());
        for &pin in &self.gpio_pins {
            pins.push(GpioPin::export(pin)?);
        }

        let shared = Arc::clone(&self.shared);
        let writer = Arc::clone(&self.writer);
        let handle = std::thread::Builder::new()
            .name("i2c-hw-writer".to_string())
            .spawn(move || hardware_worker(shared, writer, pins))
            .map_err(|err| I2cError::Config(format!("failed to spawn worker thread: {err}")))?;
        *worker = Some(handle);
        info!(
            "{}: hardware backend started with {} outputs",
            self.writer.device_path(),
            self.output_count
        );
        Ok(())
    }

    fn device_path(&self) -> String {
        self.writer.device_path().to_string()
    }
}

impl Drop for HardwareBackend {
    fn drop(&mut self) {
        self.shared.state.lock().exit = true;
        self.shared.cond.notify_all();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

fn hardware_worker(
    shared: Arc<HardwareShared>,
    writer: Arc<dyn I2cWriter>,
    mut pins: Vec<GpioPin>,
) {
    let mut scratch: Vec<u8> = Vec::new();
    loop {
        let output;
        {
            let mut state = shared.state.lock();
            loop {
                if state.exit {
                    return;
                }
                if let Some(index) = state.outputs.iter().position(|buffer| buffer.pending) {
                    output = index;
                    break;
                }
                shared.cond.wait(&mut state);
            }

            // Snapshot under the lock, write outside it.
            let buffer = &mut state.outputs[output];
            buffer.pending = false;
            scratch.clear();
            scratch.extend_from_slice(&buffer.data[..buffer.size]);
            scratch.resize(buffer.size + buffer.latch_bytes, 0);
        }

        for (bit, pin) in pins.iter_mut().enumerate() {
            if let Err(err) = pin.set(output & (1 << bit) != 0) {
                warn!("Failed to drive GPIO pin {}: {}", pin.pin(), err);
            }
        }

        if let Err(err) = writer.write(&scratch) {
            warn!("I2C write failed: {err}");
        }
    }
}

// ---------------------------------------------------------------------------
// Software backend
// ---------------------------------------------------------------------------

/// Options for [`SoftwareBackend`].
#[derive(Debug, Clone)]
pub struct SoftwareBackendOptions {
    /// Number of logical outputs concatenated into the shared buffer.
    pub outputs: u8,
    /// The output whose commit flushes the buffer to the bus. `-1` flushes on
    /// every commit.
    pub sync_output: i16,
}

impl Default for SoftwareBackendOptions {
    fn default() -> Self {
        Self {
            outputs: 1,
            sync_output: 0,
        }
    }
}

struct SoftwareState {
    /// All outputs' frames, each occupying a contiguous payload+latch region.
    buffer: Vec<u8>,
    output_sizes: Vec<usize>,
    latch_bytes: Vec<usize>,
    write_pending: bool,
    exit: bool,
}

impl SoftwareState {
    fn region_offset(&self, output: usize) -> usize {
        (0..output)
            .map(|i| self.output_sizes[i] + self.latch_bytes[i])
            .sum()
    }

    /// Re-layout the buffer for a changed output size or latch count. Other
    /// outputs keep their bytes; the changed output's region starts zeroed.
    fn relayout(&mut self, output: usize, length: usize, latch_bytes: usize) {
        let old_offsets: Vec<usize> = (0..self.output_sizes.len())
            .map(|i| self.region_offset(i))
            .collect();

        self.output_sizes[output] = length;
        self.latch_bytes[output] = latch_bytes;

        let total: usize = (0..self.output_sizes.len())
            .map(|i| self.output_sizes[i] + self.latch_bytes[i])
            .sum();
        let mut buffer = vec![0u8; total];
        let mut offset = 0;
        for i in 0..self.output_sizes.len() {
            if i != output {
                let old_start = old_offsets[i];
                let keep = self.output_sizes[i];
                buffer[offset..offset + keep]
                    .copy_from_slice(&self.buffer[old_start..old_start + keep]);
            }
            offset += self.output_sizes[i] + self.latch_bytes[i];
        }
        self.buffer = buffer;
    }
}

struct SoftwareShared {
    state: Mutex<SoftwareState>,
    cond: Condvar,
}

/// Backend concatenating every output into one buffer written in a single bus
/// transaction.
pub struct SoftwareBackend {
    writer: Arc<dyn I2cWriter>,
    drop_map: UIntMap,
    output_count: u8,
    sync_output: i16,
    shared: Arc<SoftwareShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SoftwareBackend {
    /// Create a software backend over `writer`.
    pub fn new(
        options: &SoftwareBackendOptions,
        writer: Arc<dyn I2cWriter>,
        export_map: &ExportMap,
    ) -> Self {
        let output_count = options.outputs;
        let drop_map = export_map.uint_map(I2C_DROP_VAR);
        drop_map.set(writer.device_path(), 0);
        Self {
            writer,
            drop_map,
            output_count,
            sync_output: options.sync_output,
            shared: Arc::new(SoftwareShared {
                state: Mutex::new(SoftwareState {
                    buffer: Vec::new(),
                    output_sizes: vec![0; output_count as usize],
                    latch_bytes: vec![0; output_count as usize],
                    write_pending: false,
                    exit: false,
                }),
                cond: Condvar::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Number of logical outputs.
    pub fn output_count(&self) -> u8 {
        self.output_count
    }
}

impl Backend for SoftwareBackend {
    fn checkout(&self, output: u8, length: usize, latch_bytes: usize) -> Option<CheckedOut<'_>> {
        if output >= self.output_count {
            return None;
        }
        let output = output as usize;
        let mut state = self.shared.state.lock();
        if length != state.output_sizes[output] || latch_bytes != state.latch_bytes[output] {
            state.relayout(output, length, latch_bytes);
        }
        let offset = state.region_offset(output);
        Some(MutexGuard::map(state, move |state| {
            &mut state.buffer[offset..offset + length]
        }))
    }

    fn commit(&self, output: u8) {
        if output >= self.output_count {
            return;
        }
        // Commits to non-sync outputs only stage their bytes; the frame goes
        // out when the sync output commits.
        if self.sync_output >= 0 && i16::from(output) != self.sync_output {
            return;
        }
        {
            let mut state = self.shared.state.lock();
            if state.write_pending {
                self.drop_map.increment(self.writer.device_path());
            } else {
                state.write_pending = true;
            }
        }
        self.shared.cond.notify_one();
    }

    fn init(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        self.writer.init()?;

        let shared = Arc::clone(&self.shared);
        let writer = Arc::clone(&self.writer);
        let handle = std::thread::Builder::new()
            .name("i2c-sw-writer".to_string())
            .spawn(move || software_worker(shared, writer))
            .map_err(|err| I2cError::Config(format!("failed to spawn worker thread: {err}")))?;
        *worker = Some(handle);
        info!(
            "{}: software backend started with {} outputs, sync output {}",
            self.writer.device_path(),
            self.output_count,
            self.sync_output
        );
        Ok(())
    }

    fn device_path(&self) -> String {
        self.writer.device_path().to_string()
    }
}

impl Drop for SoftwareBackend {
    fn drop(&mut self) {
        self.shared.state.lock().exit = true;
        self.shared.cond.notify_all();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

fn software_worker(shared: Arc<SoftwareShared>, writer: Arc<dyn I2cWriter>) {
    let mut scratch: Vec<u8> = Vec::new();
    loop {
        {
            let mut state = shared.state.lock();
            while !state.exit && !state.write_pending {
                shared.cond.wait(&mut state);
            }
            if state.exit {
                return;
            }
            state.write_pending = false;
            scratch.clear();
            scratch.extend_from_slice(&state.buffer);
        }

        if let Err(err) = writer.write(&scratch) {
            warn!("I2C write failed: {err}");
        }
    }
}
