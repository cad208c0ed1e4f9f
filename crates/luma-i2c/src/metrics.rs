//! Exported plugin counters
//!
//! The daemon scrapes plugin health through named unsigned counter maps. This
//! plugin exports three, each keyed by bus device path:
//! - `i2c-drops`: frames superseded before the writer thread consumed them
//! - `i2c-writes`: bus write attempts
//! - `i2c-write-errors`: short or failed bus writes

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

/// Counter map tracking dropped frames.
pub const I2C_DROP_VAR: &str = "i2c-drops";

/// Counter map tracking bus write attempts.
pub const I2C_WRITE_VAR: &str = "i2c-writes";

/// Counter map tracking short or failed bus writes.
pub const I2C_ERROR_VAR: &str = "i2c-write-errors";

/// A set of named unsigned counter maps shared with the host daemon.
///
/// Cloning is cheap and every clone observes the same counters.
#[derive(Debug, Clone, Default)]
pub struct ExportMap {
    vars: Arc<Mutex<HashMap<String, HashMap<String, u64>>>>,
}

impl ExportMap {
    /// Create an empty export map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a handle to the counter map named `var`, creating it if needed.
    pub fn uint_map(&self, var: &str) -> UIntMap {
        self.vars
            .lock()
            .entry(var.to_string())
            .or_default();
        UIntMap {
            var: var.to_string(),
            vars: Arc::clone(&self.vars),
        }
    }

    /// Read a counter. Missing vars and keys read as 0.
    pub fn get(&self, var: &str, key: &str) -> u64 {
        self.vars
            .lock()
            .get(var)
            .and_then(|map| map.get(key))
            .copied()
            .unwrap_or(0)
    }
}

/// A handle onto one named counter map inside an [`ExportMap`].
#[derive(Debug, Clone)]
pub struct UIntMap {
    var: String,
    vars: Arc<Mutex<HashMap<String, HashMap<String, u64>>>>,
}

impl UIntMap {
    /// Set the counter for `key` to `value`.
    pub fn set(&self, key: &str, value: u64) {
        let mut vars = self.vars.lock();
        let map = vars.entry(self.var.clone()).or_default();
        map.insert(key.to_string(), value);
    }

    /// Increment the counter for `key` by one.
    pub fn increment(&self, key: &str) {
        let mut vars = self.vars.lock();
        let map = vars.entry(self.var.clone()).or_default();
        *map.entry(key.to_string()).or_insert(0) += 1;
    }

    /// Read the counter for `key`. Missing keys read as 0.
    pub fn get(&self, key: &str) -> u64 {
        self.vars
            .lock()
            .get(&self.var)
            .and_then(|map| map.get(key))
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_counter_reads_zero() {
        let export_map = ExportMap::new();
        assert_eq!(export_map.get(I2C_DROP_VAR, "/dev/i2cdev0.0"), 0);
    }

    #[test]
    fn test_increment_and_get() {
        let export_map = ExportMap::new();
        let drops = export_map.uint_map(I2C_DROP_VAR);
        drops.set("/dev/i2cdev0.0", 0);
        drops.increment("/dev/i2cdev0.0");
        drops.increment("/dev/i2cdev0.0");
        assert_eq!(drops.get("/dev/i2cdev0.0"), 2);
        assert_eq!(export_map.get(I2C_DROP_VAR, "/dev/i2cdev0.0"), 2);
    }

    #[test]
    fn test_clones_share_state() {
        let export_map = ExportMap::new();
        let writes = export_map.uint_map(I2C_WRITE_VAR);
        let alias = writes.clone();
        writes.increment("/dev/i2cdev1.0");
        alias.increment("/dev/i2cdev1.0");
        assert_eq!(writes.get("/dev/i2cdev1.0"), 2);
    }

    #[test]
    fn test_vars_are_independent() {
        let export_map = ExportMap::new();
        let writes = export_map.uint_map(I2C_WRITE_VAR);
        let errors = export_map.uint_map(I2C_ERROR_VAR);
        writes.increment("/dev/i2cdev0.0");
        assert_eq!(errors.get("/dev/i2cdev0.0"), 0);
    }
}
