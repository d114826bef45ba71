//! Command implementation
//!
//! Resolves either the full layout of the selected contracts or the records
//! of one target variable, optionally reads values from a node, then prints
//! tables or record lines and writes the layout artifact.

use crate::cli::Cli;
use crate::config::Settings;
use crate::formatters::{layout_table, record_line, value_table, write_artifact, CliError};
use alloy_primitives::Address;
use anyhow::{Context, Result};
use slotscope_core::{ChainContext, LayoutStore, SlotScopeError};
use slotscope_ethereum::{fetch_values, ContractModel, StorageLayoutResolver};
use std::str::FromStr;
use tracing::{info, warn};

pub async fn run(cli: &Cli) -> Result<()> {
    let settings = Settings::from_cli(cli)?;
    let model = ContractModel::from_file(&cli.model)
        .with_context(|| format!("Failed to load contract model {}", cli.model.display()))?;
    let contracts = select_contracts(cli, &model)?;
    let resolver = StorageLayoutResolver::new(&model, settings.resolver.clone());

    let mut store = if cli.wants_full_layout() {
        resolver.resolve_full_layout(&contracts)?
    } else {
        resolve_target(cli, &resolver, &contracts)?
    };

    if cli.wants_values() {
        let ctx = chain_context(cli, &settings)?;
        let summary = fetch_values(&mut store, &ctx, settings.reader.clone()).await?;
        if summary.failed > 0 {
            warn!(failed = summary.failed, "Some values could not be read");
        }
    }

    if cli.table_storage_layout {
        println!("{}", layout_table(&store));
        return Ok(());
    }
    if cli.table_storage_value {
        println!("{}", value_table(&store));
        return Ok(());
    }

    if !cli.layout {
        for record in store.iter() {
            println!("{}", record_line(record));
        }
    }
    if write_artifact(&store, cli.format, cli.output.as_deref())?.is_none() && cli.layout {
        info!("Layout has a single record, no file written");
    }
    Ok(())
}

/// Contracts named on the command line, or every contract of the model
fn select_contracts(cli: &Cli, model: &ContractModel) -> Result<Vec<String>> {
    match &cli.contract_name {
        Some(name) => {
            model.contract(name)?;
            Ok(vec![name.clone()])
        }
        None => Ok(model.names()),
    }
}

/// Records of the requested variable in every selected contract declaring it
fn resolve_target(cli: &Cli, resolver: &StorageLayoutResolver<'_>, contracts: &[String]) -> Result<LayoutStore> {
    if cli.query.is_none() && cli.variable_name.is_none() {
        return Err(CliError::InvalidArgument(
            "--variable-name or --query is required unless a layout or table is requested".to_string(),
        )
        .into());
    }

    let mut store = LayoutStore::new();
    let mut not_found = None;
    for contract in contracts {
        let result = match &cli.query {
            Some(query) => resolver.resolve_query(contract, query),
            None => resolver.resolve_target(
                contract,
                cli.variable_name.as_deref().unwrap_or_default(),
                cli.key.as_deref(),
                cli.deep_key.as_deref(),
                cli.struct_var.as_deref(),
            ),
        };
        match result {
            Ok(found) => store.merge(found)?,
            Err(e @ SlotScopeError::VariableNotFound { .. }) => not_found = Some(e),
            Err(e) => return Err(e.into()),
        }
    }

    match not_found {
        Some(e) if store.is_empty() => Err(e.into()),
        _ => Ok(store),
    }
}

/// Chain context for value retrieval
fn chain_context(cli: &Cli, settings: &Settings) -> Result<ChainContext> {
    let raw = cli
        .address
        .as_deref()
        .ok_or_else(|| CliError::InvalidArgument("ADDRESS is required to read values".to_string()))?;
    let mut ctx = ChainContext::new(parse_address(raw)?);
    if let Some(url) = &settings.rpc_url {
        ctx = ctx.with_rpc_url(url.clone());
    }
    if let Some(storage) = &cli.storage_address {
        ctx = ctx.with_storage_address(parse_address(storage)?);
    }
    if let Some(block) = cli.block {
        ctx = ctx.with_block(block);
    }
    Ok(ctx)
}

/// Parse an address, dropping a `network:` prefix
fn parse_address(raw: &str) -> Result<Address, CliError> {
    let bare = raw.rsplit(':').next().unwrap_or(raw).trim();
    Address::from_str(bare).map_err(|e| CliError::InvalidArgument(format!("Invalid address '{}': {}", raw, e)))
}
