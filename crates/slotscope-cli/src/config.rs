//! Settings file handling
//!
//! ```toml
//! rpc_url = "http://localhost:8545"
//!
//! [resolver]
//! max_depth = 20
//!
//! [reader]
//! concurrency = 8
//! retries = 5
//! ```
//!
//! Command-line flags take precedence over the file.

use crate::cli::Cli;
use crate::formatters::{read_file, CliError, CliResult};
use serde::{Deserialize, Serialize};
use slotscope_core::{ReaderConfig, ResolverConfig};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub rpc_url: Option<String>,
    pub resolver: ResolverConfig,
    pub reader: ReaderConfig,
}

impl Settings {
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = read_file(path)?;
        toml::from_str(&content)
            .map_err(|e| CliError::Configuration(format!("{}: {}", path.display(), e)))
    }

    /// The file (if any) with command-line overrides applied
    pub fn from_cli(cli: &Cli) -> CliResult<Self> {
        let mut settings = match &cli.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        settings.apply(cli);
        Ok(settings)
    }

    fn apply(&mut self, cli: &Cli) {
        if let Some(url) = &cli.rpc_url {
            self.rpc_url = Some(url.clone());
        }
        if let Some(depth) = cli.max_depth {
            self.resolver.max_depth = depth;
        }
        if let Some(concurrency) = cli.concurrency {
            self.reader.concurrency = concurrency;
        }
        if let Some(retries) = cli.retries {
            self.reader.retries = retries;
        }
        if let Some(timeout) = cli.timeout_ms {
            self.reader.timeout_ms = timeout;
        }
        if cli.expand_arrays {
            self.reader.expand_dynamic_arrays = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    #[test]
    fn test_flags_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "rpc_url = \"http://file:8545\"\n[resolver]\nmax_depth = 5\n[reader]\nretries = 7\nconcurrency = 2"
        )
        .unwrap();

        let path = file.path().to_string_lossy().to_string();
        let cli = Cli::parse_from(["slotscope", "model.json", "--config", &path, "--retries", "1"]);
        let settings = Settings::from_cli(&cli).unwrap();

        assert_eq!(settings.rpc_url.as_deref(), Some("http://file:8545"));
        assert_eq!(settings.resolver.max_depth, 5);
        assert_eq!(settings.reader.retries, 1);
        assert_eq!(settings.reader.concurrency, 2);
        assert_eq!(settings.reader.timeout_ms, ReaderConfig::default().timeout_ms);
    }

    #[test]
    fn test_missing_file() {
        let cli = Cli::parse_from(["slotscope", "model.json", "--config", "/nonexistent/slotscope.toml"]);
        assert!(matches!(Settings::from_cli(&cli), Err(CliError::FileNotFound(_))));
    }

    #[test]
    fn test_invalid_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[reader\nretries = ").unwrap();
        assert!(matches!(Settings::load(file.path()), Err(CliError::Configuration(_))));
    }
}
