//! Key-value configuration reader.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Configuration file name used when no explicit path is given.
pub const DEFAULT_CONFIG_FILE: &str = "config.properties";

/// Sorter and tape device settings loaded from a properties file.
///
/// The file holds one `key=value` pair per line where every value is a
/// non-negative integer. Lines starting with `#` are comments; malformed
/// lines are ignored. A missing file yields an empty configuration, so every
/// lookup falls back to its default.
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    params: HashMap<String, u64>,
}

impl Configuration {
    /// Creates an empty configuration; every property resolves to its default.
    pub fn new() -> Self {
        Configuration::default()
    }

    /// Reads a configuration from the given properties file.
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        let mut config = Configuration::new();

        let content = match fs::read_to_string(path.as_ref()) {
            Ok(content) => content,
            Err(err) => {
                log::debug!(
                    "configuration file {} not read ({}), using defaults",
                    path.as_ref().display(),
                    err
                );
                return config;
            }
        };

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = match line.split_once('=') {
                Some(pair) => pair,
                None => continue,
            };
            match value.trim().parse::<u64>() {
                Ok(value) => {
                    config.params.insert(key.trim().to_string(), value);
                }
                Err(_) => continue,
            }
        }

        return config;
    }

    /// Returns the value stored under `key` or the provided default.
    pub fn get(&self, key: &str, default_value: u64) -> u64 {
        self.params.get(key).copied().unwrap_or(default_value)
    }

    /// Sets a property, overriding the file-provided value if any.
    pub fn set(&mut self, key: impl Into<String>, value: u64) {
        self.params.insert(key.into(), value);
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use super::{Configuration, DEFAULT_CONFIG_FILE};

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = Configuration::from_file("no-such-file.properties");

        assert_eq!(config.get("memory_limit", 42), 42);
    }

    #[test]
    fn test_reads_properties() {
        let file = write_config("memory_limit=1024\nmax_thread_count=4\n");

        let config = Configuration::from_file(file.path());

        assert_eq!(config.get("memory_limit", 0), 1024);
        assert_eq!(config.get("max_thread_count", 0), 4);
    }

    #[test]
    fn test_skips_comments_and_malformed_lines() {
        let file = write_config(
            "# a comment\nmemory_limit=2048\nnot a pair\nread_duration=oops\n\nmove_duration=5\n",
        );

        let config = Configuration::from_file(file.path());

        assert_eq!(config.get("memory_limit", 0), 2048);
        assert_eq!(config.get("read_duration", 7), 7);
        assert_eq!(config.get("move_duration", 1), 5);
    }

    #[test]
    fn test_trims_whitespace() {
        let file = write_config("  memory_limit = 512  \n");

        let config = Configuration::from_file(file.path());

        assert_eq!(config.get("memory_limit", 0), 512);
    }

    #[test]
    fn test_set_overrides() {
        let mut config = Configuration::new();

        config.set("max_merging_group_size", 2);

        assert_eq!(config.get("max_merging_group_size", 50), 2);
    }

    #[test]
    fn test_default_file_name() {
        assert_eq!(DEFAULT_CONFIG_FILE, "config.properties");
    }
}
