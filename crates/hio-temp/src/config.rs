// Licensed under the MIT License.

use std::path::PathBuf;
use std::time::Duration;

use hio_store::{Error, Result};

/// The fraction of `ram_pool_size` at which the cleaner is scheduled.
pub const HIGH: f64 = 0.9;

/// The fraction of `ram_pool_size` the pressure-based cleaner phase drains down to.
pub const LOW: f64 = 0.8;

/// How often, in bytes written, a disk-backed writer re-checks free space.
pub const CHECK_DISK_EVERY: u64 = 4096;

/// The minimum padded container size used by the padding wrapper.
pub const MIN_PADDED: u64 = hio_wrap::MIN_PADDED;

/// The default maximum age a RAM-backed entry is allowed before the cleaner's
/// age-based phase migrates it regardless of pool pressure.
pub const RAM_MAX_AGE: Duration = Duration::from_secs(5 * 60);

/// Tunables for the temp-container subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory new disk-backed temp files are created under.
    pub temp_dir: PathBuf,
    /// Filename prefix for temp files created by this process.
    pub temp_prefix: String,
    /// Containers above this declared size are never RAM-eligible.
    pub max_single_ram: u64,
    /// The global soft cap on RAM bytes in use across all temp containers.
    pub ram_pool_size: u64,
    /// The minimum free space, in bytes, to maintain on the temp filesystem.
    pub min_disk_space: u64,
    /// Whether disk-backed temp buckets are wrapped with padding and encryption.
    pub encrypt_temp_buckets: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir(),
            temp_prefix: "hio-".to_owned(),
            max_single_ram: 1024 * 1024,
            ram_pool_size: 64 * 1024 * 1024,
            min_disk_space: 16 * 1024 * 1024,
            encrypt_temp_buckets: false,
        }
    }
}

impl Config {
    /// Checks internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `max_single_ram > ram_pool_size`, or if
    /// `temp_dir` is empty.
    pub fn validate(&self) -> Result<()> {
        if self.max_single_ram > self.ram_pool_size {
            return Err(Error::InvalidConfig(format!(
                "max_single_ram ({}) must be <= ram_pool_size ({})",
                self.max_single_ram, self.ram_pool_size
            )));
        }
        if self.temp_dir.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("temp_dir must not be empty".to_owned()));
        }
        Ok(())
    }

    /// Builds a config from any [`ConfigSource`], falling back to [`Config::default`]
    /// for fields the source does not provide.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a field is present but cannot be parsed, or
    /// if the assembled config fails [`Config::validate`].
    pub fn from_field_set(source: &impl ConfigSource) -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            temp_dir: source
                .get("temp_dir")
                .map_or_else(|| defaults.temp_dir.clone(), PathBuf::from),
            temp_prefix: source
                .get("temp_prefix")
                .map_or_else(|| defaults.temp_prefix.clone(), str::to_owned),
            max_single_ram: parse_field(source, "max_single_ram", defaults.max_single_ram)?,
            ram_pool_size: parse_field(source, "ram_pool_size", defaults.ram_pool_size)?,
            min_disk_space: parse_field(source, "min_disk_space", defaults.min_disk_space)?,
            encrypt_temp_buckets: parse_field(
                source,
                "encrypt_temp_buckets",
                defaults.encrypt_temp_buckets,
            )?,
        };
        config.validate()?;
        Ok(config)
    }
}

fn parse_field<T: std::str::FromStr>(source: &impl ConfigSource, key: &str, default: T) -> Result<T> {
    match source.get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| Error::InvalidConfig(format!("field {key:?} has an invalid value: {raw:?}"))),
        None => Ok(default),
    }
}

/// A minimal key-value lookup that an external field-set collaborator can implement, so
/// this crate does not need to depend on it directly.
pub trait ConfigSource {
    /// Returns the raw string value for `key`, if present.
    fn get(&self, key: &str) -> Option<&str>;
}

impl ConfigSource for std::collections::HashMap<String, String> {
    fn get(&self, key: &str) -> Option<&str> {
        std::collections::HashMap::get(self, key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn oversized_ram_ceiling_is_rejected() {
        let config = Config {
            max_single_ram: 100,
            ram_pool_size: 50,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn from_field_set_parses_overrides_and_keeps_defaults() {
        let mut fields = std::collections::HashMap::new();
        fields.insert("max_single_ram".to_owned(), "2048".to_owned());
        let config = Config::from_field_set(&fields).unwrap();
        assert_eq!(config.max_single_ram, 2048);
        assert_eq!(config.ram_pool_size, Config::default().ram_pool_size);
    }

    #[test]
    fn from_field_set_rejects_unparsable_value() {
        let mut fields = std::collections::HashMap::new();
        fields.insert("max_single_ram".to_owned(), "not-a-number".to_owned());
        assert!(matches!(Config::from_field_set(&fields), Err(Error::InvalidConfig(_))));
    }
}
