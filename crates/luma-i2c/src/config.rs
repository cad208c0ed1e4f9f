//! Plugin preferences
//!
//! The daemon hands every plugin a string-keyed preference store. Keys can
//! carry multiple values (GPIO pin lists do); defaults are installed with a
//! validator so that a hand-edited file with an out-of-range value falls back
//! to the default instead of poisoning startup. The store round-trips
//! through a JSON file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::Result;

/// Validation applied when installing a default for a preference key.
#[derive(Debug, Clone)]
pub enum Validator {
    /// Value must be one of the listed strings.
    OneOf(&'static [&'static str]),
    /// Value must parse as an unsigned integer within the range (inclusive).
    UIntRange(u32, u32),
    /// Value must parse as a signed integer within the range (inclusive).
    IntRange(i32, i32),
    /// Value must be `true` or `false`.
    Bool,
}

impl Validator {
    /// Whether `value` passes this validator.
    pub fn is_valid(&self, value: &str) -> bool {
        match self {
            Self::OneOf(allowed) => allowed.contains(&value),
            Self::UIntRange(min, max) => value
                .parse::<u32>()
                .map(|parsed| parsed >= *min && parsed <= *max)
                .unwrap_or(false),
            Self::IntRange(min, max) => value
                .parse::<i32>()
                .map(|parsed| parsed >= *min && parsed <= *max)
                .unwrap_or(false),
            Self::Bool => matches!(value, "true" | "false"),
        }
    }
}

/// A string-keyed, multi-valued preference store.
#[derive(Debug, Clone, Default)]
pub struct Preferences {
    values: BTreeMap<String, Vec<String>>,
    path: Option<PathBuf>,
}

impl Preferences {
    /// Create an empty, unbacked store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a store from `path`. A missing file yields an empty store that
    /// will be created on the first save.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            values,
            path: Some(path),
        })
    }

    /// Write the store back to its backing file. Unbacked stores save
    /// nowhere and succeed.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let contents = serde_json::to_string_pretty(&self.values)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// The backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether `key` has at least one value.
    pub fn has_key(&self, key: &str) -> bool {
        self.values.get(key).is_some_and(|values| !values.is_empty())
    }

    /// The first value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// All values for `key`.
    pub fn get_multiple(&self, key: &str) -> &[String] {
        self.values.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Replace the values of `key` with a single value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), vec![value.into()]);
    }

    /// Append a value to `key`.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.entry(key.into()).or_default().push(value.into());
    }

    /// Install `default` for `key` unless a value passing `validator` is
    /// already present. An invalid existing value is replaced and reported.
    pub fn set_default(&mut self, key: &str, validator: Validator, default: impl Into<String>) {
        if let Some(existing) = self.get(key) {
            if validator.is_valid(existing) {
                return;
            }
            warn!(
                "Invalid value '{}' for {}, falling back to default",
                existing, key
            );
        }
        self.set(key, default);
    }

    /// Parse the first value of `key`, logging and returning `None` when the
    /// value is missing or does not parse.
    pub fn get_parsed<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        let value = self.get(key)?;
        match value.parse() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                warn!("Invalid integer value '{}' for {}", value, key);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_default_keeps_valid_value() {
        let mut prefs = Preferences::new();
        prefs.set("speed", "2000000");
        prefs.set_default("speed", Validator::UIntRange(0, 32_000_000), "1000000");
        assert_eq!(prefs.get("speed"), Some("2000000"));
    }

    #[test]
    fn test_set_default_replaces_invalid_value() {
        let mut prefs = Preferences::new();
        prefs.set("speed", "not-a-number");
        prefs.set_default("speed", Validator::UIntRange(0, 32_000_000), "1000000");
        assert_eq!(prefs.get("speed"), Some("1000000"));

        prefs.set("speed", "99000000");
        prefs.set_default("speed", Validator::UIntRange(0, 32_000_000), "1000000");
        assert_eq!(prefs.get("speed"), Some("1000000"));
    }

    #[test]
    fn test_set_default_fills_missing_value() {
        let mut prefs = Preferences::new();
        prefs.set_default("backend", Validator::OneOf(&["hardware", "software"]), "software");
        assert_eq!(prefs.get("backend"), Some("software"));
    }

    #[test]
    fn test_validators() {
        assert!(Validator::Bool.is_valid("true"));
        assert!(!Validator::Bool.is_valid("yes"));
        assert!(Validator::IntRange(-2, 32).is_valid("-2"));
        assert!(!Validator::IntRange(-2, 32).is_valid("33"));
        assert!(Validator::OneOf(&["a", "b"]).is_valid("b"));
        assert!(!Validator::UIntRange(1, 32).is_valid("-1"));
    }

    #[test]
    fn test_multiple_values() {
        let mut prefs = Preferences::new();
        prefs.add("pins", "1");
        prefs.add("pins", "2");
        assert_eq!(prefs.get_multiple("pins"), ["1", "2"]);
        assert_eq!(prefs.get("pins"), Some("1"));
    }

    #[test]
    fn test_get_parsed_rejects_garbage() {
        let mut prefs = Preferences::new();
        prefs.set("ports", "eight");
        assert_eq!(prefs.get_parsed::<u8>("ports"), None);
        prefs.set("ports", "8");
        assert_eq!(prefs.get_parsed::<u8>("ports"), Some(8));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("i2c.conf");

        let mut prefs = Preferences::load(&path).unwrap();
        prefs.set("backend", "software");
        prefs.add("pins", "4");
        prefs.add("pins", "17");
        prefs.save().unwrap();

        let reloaded = Preferences::load(&path).unwrap();
        assert_eq!(reloaded.get("backend"), Some("software"));
        assert_eq!(reloaded.get_multiple("pins"), ["4", "17"]);
    }
}
