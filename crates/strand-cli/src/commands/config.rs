//! Configuration loading for the CLI

use anyhow::{Context, Result};
use std::path::Path;
use strand_core::StrandConfig;
use tracing::debug;

/// Defaults, then `path` if given, then `STRAND_*` variables, then validation
pub fn load(path: Option<&Path>) -> Result<StrandConfig> {
    let config = StrandConfig::load(path).with_context(|| match path {
        Some(path) => format!("loading configuration from {}", path.display()),
        None => "loading default configuration".to_string(),
    })?;
    debug!(?config, "Configuration loaded");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_file_values_override_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[partitions]\ncount = 7\n\n[gossip]\nmax_events = 10").unwrap();

        let config = load(Some(file.path())).unwrap();
        assert_eq!(config.partitions.count, 7);
        assert_eq!(config.gossip.max_events, 10);
        assert_eq!(config.transactions, StrandConfig::default().transactions);
    }

    #[test]
    fn test_invalid_file_is_reported_with_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[partitions]\ncount = 0").unwrap();

        let err = load(Some(file.path())).unwrap_err();
        assert!(format!("{err:#}").contains("partitions.count"));
    }

    #[test]
    fn test_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
