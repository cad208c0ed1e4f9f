//! DMX frame buffer

use serde::{Deserialize, Serialize};

use crate::DMX_UNIVERSE_SIZE;

/// A single DMX512 frame, holding between 0 and 512 slot values.
///
/// Slots are indexed from 0 here; the 1-based addressing used by fixtures is
/// applied by the callers that hold a DMX start address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmxBuffer {
    data: Vec<u8>,
}

impl DmxBuffer {
    /// Create an empty frame.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a frame from raw slot data. Input longer than a universe is
    /// truncated to 512 slots.
    pub fn from_slice(data: &[u8]) -> Self {
        let len = data.len().min(DMX_UNIVERSE_SIZE);
        Self {
            data: data[..len].to_vec(),
        }
    }

    /// The number of slots in this frame.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Whether the frame contains no slots.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get a single slot value. Out of range slots read as 0.
    pub fn get(&self, slot: usize) -> u8 {
        self.data.get(slot).copied().unwrap_or(0)
    }

    /// Copy slots starting at `offset` into `dst`.
    ///
    /// Returns the number of slots actually copied, which is less than
    /// `dst.len()` when the frame runs out of data. Bytes of `dst` past the
    /// returned count are left untouched.
    pub fn get_range(&self, offset: usize, dst: &mut [u8]) -> usize {
        if offset >= self.data.len() {
            return 0;
        }
        let available = &self.data[offset..];
        let count = dst.len().min(available.len());
        dst[..count].copy_from_slice(&available[..count]);
        count
    }

    /// Replace the frame contents with `data`, truncated to one universe.
    pub fn set_from_slice(&mut self, data: &[u8]) {
        let len = data.len().min(DMX_UNIVERSE_SIZE);
        self.data.clear();
        self.data.extend_from_slice(&data[..len]);
    }

    /// Set `count` slots starting at `offset` to `value`, growing the frame
    /// as required (capped at one universe).
    pub fn set_range_to_value(&mut self, offset: usize, value: u8, count: usize) {
        let end = (offset + count).min(DMX_UNIVERSE_SIZE);
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        for slot in &mut self.data[offset..end] {
            *slot = value;
        }
    }

    /// Set the frame to a full universe of zeros.
    pub fn blackout(&mut self) {
        self.data.clear();
        self.data.resize(DMX_UNIVERSE_SIZE, 0);
    }

    /// The raw slot data.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}
