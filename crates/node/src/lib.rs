//! `xid-sync`: imports and exports block dumps against the chain database.

pub mod config;
pub mod dump;
pub mod error;
pub mod report;
pub mod store;
pub mod sync;

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use xid_chainstate::persistent::schema_version;
use xid_chainstate::{
    BlockValidator, Blockchain, ChainContext, PersistentBlockchainCache, ValidationFlags,
};
use xid_consensus::consensus_params;
use xid_log as logging;

use crate::config::{Backend, CliAction, Config, SyncCommand};
use crate::dump::DumpReader;
use crate::store::{SchemaState, Store};

pub use crate::error::SyncError;
pub use crate::sync::{export_dump, import_dump, ExportOptions, ImportSummary};

type Chain = Blockchain<PersistentBlockchainCache<Store>>;

pub async fn run_entry() -> Result<(), String> {
    let config = match config::parse_args()? {
        CliAction::Run(config) => config,
        CliAction::PrintHelp => {
            println!("{}", config::usage());
            return Ok(());
        }
        CliAction::PrintVersion => {
            println!("xid-sync {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
    };
    run(config).await
}

async fn run(config: Config) -> Result<(), String> {
    logging::init(logging::LogConfig {
        level: config.log_level,
        format: config.log_format,
        timestamps: config.log_timestamps,
    });
    for key in &config.unsupported_conf_keys {
        xid_log::log_warn!(
            "Warning: ignoring unsupported key '{key}' in {}",
            config.conf_path.display()
        );
    }

    // Opened before the chain so a bad dump header leaves the database alone.
    let dump = match &config.command {
        SyncCommand::Import { path, .. } => {
            let file = File::open(path)
                .map_err(|err| format!("failed to open {}: {err}", path.display()))?;
            Some(DumpReader::open(BufReader::new(file)).map_err(|err| err.to_string())?)
        }
        _ => None,
    };

    let _lock = match config.backend {
        Backend::Fjall => Some(store::lock_data_dir(&config.data_dir)?),
        Backend::Memory => None,
    };
    let store = store::open_store(&config)?;
    let (allow_rebuild, force_rebuild) = match &config.command {
        SyncCommand::Import { rebuild, .. } => (true, *rebuild),
        _ => (false, false),
    };
    if let SchemaState::Rebuilt { previous } =
        store::prepare_schema(&store, allow_rebuild, force_rebuild)?
    {
        xid_log::log_info!(
            "rebuilt {} database (previous schema {})",
            config.network.as_str(),
            previous.map_or_else(|| "none".to_string(), |version| version.to_string())
        );
    }
    let schema = schema_version(&store).map_err(|err| err.to_string())?;

    let chain = Arc::new(open_chain(&config, store)?);
    let tip = chain.tip().map_err(|err| err.to_string())?;
    xid_log::log_info!(
        "{} chain at block {} ({} side chains)",
        config.network.as_str(),
        tip.index,
        chain.alternative_count().map_err(|err| err.to_string())?
    );

    match (config.command.clone(), dump) {
        (SyncCommand::Import { path, .. }, Some(reader)) => {
            let cancel = Arc::new(AtomicBool::new(false));
            spawn_signal_handler(Arc::clone(&cancel));
            xid_log::log_info!(
                "importing {} blocks from {}",
                reader.block_count(),
                path.display()
            );
            let summary = {
                let chain = Arc::clone(&chain);
                tokio::task::spawn_blocking(move || {
                    sync::import_dump(chain.as_ref(), reader, &cancel).map_err(|err| err.to_string())
                })
                .await
                .map_err(|err| format!("import task failed: {err}"))??
            };
            print_report(&chain, schema, Some(&summary))
        }
        (
            SyncCommand::Export {
                path,
                start,
                count,
                batch_size,
                checkpoint_density,
            },
            _,
        ) => {
            let options = ExportOptions {
                batch_size,
                checkpoint_density,
            };
            let file = File::create(&path)
                .map_err(|err| format!("failed to create {}: {err}", path.display()))?;
            let written = {
                let chain = Arc::clone(&chain);
                tokio::task::spawn_blocking(move || {
                    sync::export_dump(chain.as_ref(), BufWriter::new(file), start, count, options)
                        .map(|(_, written)| written)
                        .map_err(|err| err.to_string())
                })
                .await
                .map_err(|err| format!("export task failed: {err}"))??
            };
            println!("wrote {written} blocks to {}", path.display());
            Ok(())
        }
        (SyncCommand::Info, _) => print_report(&chain, schema, None),
        (SyncCommand::Import { .. }, None) => Err("import dump was not opened".to_string()),
    }
}

fn open_chain(config: &Config, store: Store) -> Result<Chain, String> {
    let mut context =
        ChainContext::new(consensus_params(config.network)).map_err(|err| err.to_string())?;
    if let Some(path) = &config.checkpoints_file {
        let loaded = context
            .checkpoints
            .load_from_file(path)
            .map_err(|err| format!("failed to load checkpoints from {}: {err}", path.display()))?;
        xid_log::log_info!("loaded {loaded} checkpoints from {}", path.display());
    }
    context.checkpoints.set_enabled(config.checkpoints_enabled);
    if config.skip_pow {
        xid_log::log_warn!("Warning: proof-of-work checks are disabled");
    }
    let validator = BlockValidator::new(Arc::new(context)).with_flags(ValidationFlags {
        check_pow: !config.skip_pow,
        ..ValidationFlags::default()
    });
    if config.prune {
        xid_log::log_info!(
            "pruning transactions deeper than {} blocks",
            validator.context().params.pruning_depth
        );
    }
    let cache = PersistentBlockchainCache::open(store).map_err(|err| err.to_string())?;
    Blockchain::with_validator(validator, cache)
        .map(|chain| chain.with_pruning(config.prune))
        .map_err(|err| err.to_string())
}

fn print_report(
    chain: &Chain,
    schema: Option<u32>,
    summary: Option<&ImportSummary>,
) -> Result<(), String> {
    let report = sync::chain_report(chain, schema, summary)?;
    let text = serde_json::to_string_pretty(&report).map_err(|err| err.to_string())?;
    println!("{text}");
    Ok(())
}

/// Sets `cancel` on SIGINT or SIGTERM. The import loop stops at the next
/// block boundary.
fn spawn_signal_handler(cancel: Arc<AtomicBool>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {},
                        _ = sigterm.recv() => {},
                    }
                }
                Err(err) => {
                    xid_log::log_warn!("failed to install SIGTERM handler: {err}");
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }

        xid_log::log_info!("Signal received; stopping after the current block.");
        cancel.store(true, Ordering::Relaxed);
    });
}
