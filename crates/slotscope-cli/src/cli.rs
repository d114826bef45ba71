//! Command-line interface definitions for the slotscope CLI tool
//!
//! This module contains the clap structures for argument parsing.

use clap::{Parser, ValueEnum};
use slotscope_core::BlockTag;
use std::path::PathBuf;

/// Persisted layout artifact format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ArtifactFormat {
    #[default]
    #[value(name = "json")]
    Json,
    #[value(name = "toml")]
    Toml,
}

impl ArtifactFormat {
    pub fn default_file_name(&self) -> &'static str {
        match self {
            ArtifactFormat::Json => "storage_layout.json",
            ArtifactFormat::Toml => "storage_layout.toml",
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "slotscope")]
#[command(about = "Read Solidity storage layouts and values directly from a node")]
#[command(version)]
#[command(after_help = "Examples:\n  \
    slotscope model.json 0xabc.. --contract-name Token --variable-name balances --key 0xdef.. --rpc-url $RPC --value\n  \
    slotscope model.json --contract-name Token --layout\n  \
    slotscope model.json 0xabc.. --contract-name Token --table-storage-value --rpc-url $RPC")]
pub struct Cli {
    /// Contract model JSON file
    #[arg(value_name = "MODEL")]
    pub model: PathBuf,

    /// Target contract address, optionally prefixed with a network (`mainnet:0x..`)
    #[arg(value_name = "ADDRESS")]
    pub address: Option<String>,

    /// Restrict to one contract of the model
    #[arg(long)]
    pub contract_name: Option<String>,

    /// Variable whose slot (and value) is returned
    #[arg(long)]
    pub variable_name: Option<String>,

    /// Mapping key or array index for the variable
    #[arg(long)]
    pub key: Option<String>,

    /// Second-level key or index (nested mapping, multidimensional array)
    #[arg(long)]
    pub deep_key: Option<String>,

    /// Struct member reached after the keys
    #[arg(long)]
    pub struct_var: Option<String>,

    /// Full access path, e.g. 'positions[3].owner'
    #[arg(long, conflicts_with_all = ["variable_name", "key", "deep_key", "struct_var"])]
    pub query: Option<String>,

    /// JSON-RPC endpoint of an Ethereum node
    #[arg(long)]
    pub rpc_url: Option<String>,

    /// Address holding the storage (proxy); defaults to ADDRESS
    #[arg(long)]
    pub storage_address: Option<String>,

    /// Block number or `latest`
    #[arg(long)]
    pub block: Option<BlockTag>,

    /// Resolve the full layout and write it to a file
    #[arg(long)]
    pub layout: bool,

    /// Read values from the node
    #[arg(long)]
    pub value: bool,

    /// Print a table of the storage layout
    #[arg(long)]
    pub table_storage_layout: bool,

    /// Print a table of the storage layout with values
    #[arg(long)]
    pub table_storage_value: bool,

    /// Add one record per dynamic array element once lengths are read
    #[arg(long)]
    pub expand_arrays: bool,

    /// Only log errors
    #[arg(long, conflicts_with = "verbose")]
    pub silent: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Maximum access path depth
    #[arg(long)]
    pub max_depth: Option<usize>,

    /// Concurrent storage reads
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Retries per failed read
    #[arg(long)]
    pub retries: Option<u32>,

    /// Per-attempt read timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// TOML file with resolver/reader settings
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Layout artifact path (defaults to storage_layout.<format>)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Layout artifact format
    #[arg(long, value_enum, default_value_t = ArtifactFormat::Json)]
    pub format: ArtifactFormat,
}

impl Cli {
    /// Whether values have to be read from a node
    pub fn wants_values(&self) -> bool {
        self.value || self.table_storage_value
    }

    /// Whether the whole layout is resolved rather than one variable
    pub fn wants_full_layout(&self) -> bool {
        self.layout || self.table_storage_layout || self.table_storage_value
    }

    pub fn log_level(&self) -> tracing::Level {
        if self.verbose {
            tracing::Level::DEBUG
        } else if self.silent {
            tracing::Level::ERROR
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_target_flags() {
        let cli = Cli::parse_from([
            "slotscope",
            "model.json",
            "0x00000000000000000000000000000000000000aa",
            "--contract-name",
            "Token",
            "--variable-name",
            "balances",
            "--key",
            "0x01",
            "--block",
            "100",
        ]);
        assert_eq!(cli.variable_name.as_deref(), Some("balances"));
        assert_eq!(cli.block, Some(BlockTag::Number(100)));
        assert!(!cli.wants_values());
        assert_eq!(cli.log_level(), tracing::Level::INFO);
    }

    #[test]
    fn test_query_conflicts_with_variable() {
        let result = Cli::try_parse_from([
            "slotscope",
            "model.json",
            "--variable-name",
            "x",
            "--query",
            "x[1]",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_table_with_values_implies_full_layout() {
        let cli = Cli::parse_from(["slotscope", "model.json", "--table-storage-value", "--silent"]);
        assert!(cli.wants_values());
        assert!(cli.wants_full_layout());
        assert_eq!(cli.log_level(), tracing::Level::ERROR);
    }
}
