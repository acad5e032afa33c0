//! Dump import and export against a [`Blockchain`].

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crossbeam_channel::bounded;
use serde::Serialize;
use serde_json::Value;
use xid_chainstate::{AddBlockOutcome, Blockchain, BlockchainCache, CacheError, ChainError};
use xid_consensus::hash256_to_hex;

use crate::dump::{BatchItem, DumpReader, DumpWriter, DEFAULT_CHECKPOINT_DENSITY};
use crate::error::SyncError;
use crate::report::{ReportBuilder, ReportError};

/// Batches decoded ahead of validation.
const READ_AHEAD_BATCHES: usize = 4;
const PROGRESS_INTERVAL: u64 = 10_000;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ImportSummary {
    pub announced: u64,
    pub added: u64,
    pub alternative: u64,
    pub reorganizations: u64,
    pub already_known: u64,
    /// Batches stepped over because the chain already held all their blocks.
    pub skipped_batches: u64,
    pub checkpoints: u64,
    /// Stopped early by the cancel flag; every block before the stop is kept.
    pub interrupted: bool,
}

/// How [`export_dump`] cuts the chain into batches.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExportOptions {
    pub batch_size: u32,
    pub checkpoint_density: u32,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            checkpoint_density: DEFAULT_CHECKPOINT_DENSITY,
        }
    }
}

pub const DEFAULT_BATCH_SIZE: u32 = 256;

pub fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

/// Replays the blocks of `reader` through full validation. Batches the chain
/// already holds are stepped over; the checkpoints of every other batch are
/// added before its blocks. Stops at the first block that is rejected or does
/// not connect. `cancel` is checked between blocks.
pub fn import_dump<C, R>(
    chain: &Blockchain<C>,
    mut reader: DumpReader<R>,
    cancel: &AtomicBool,
) -> Result<ImportSummary, SyncError>
where
    C: BlockchainCache,
    R: Read + Send + 'static,
{
    let mut summary = ImportSummary {
        announced: reader.block_count(),
        ..ImportSummary::default()
    };
    let known_top = Arc::new(AtomicU32::new(chain.tip()?.index));
    let (tx, rx) = bounded::<Result<BatchItem, SyncError>>(READ_AHEAD_BATCHES);
    let handle = {
        let known_top = Arc::clone(&known_top);
        thread::Builder::new()
            .name("dump-reader".to_string())
            .spawn(move || loop {
                let top = known_top.load(Ordering::Relaxed);
                let item = reader.next_batch(|info| info.last_index() <= top);
                let done = !matches!(item, Ok(Some(_)));
                let Some(item) = item.transpose() else {
                    break;
                };
                if tx.send(item).is_err() || done {
                    break;
                }
            })?
    };

    let started = Instant::now();
    let mut position = 0u64;
    let mut outcome = Ok(());
    'batches: for item in rx.iter() {
        let batch = match item {
            Ok(BatchItem::Read(batch)) => batch,
            Ok(BatchItem::Skipped(info)) => {
                xid_log::log_debug!(
                    "skipping known dump batch {}..={}",
                    info.start_index,
                    info.last_index()
                );
                summary.skipped_batches += 1;
                summary.already_known += u64::from(info.count);
                position += u64::from(info.count);
                continue;
            }
            Err(err) => {
                outcome = Err(err);
                break;
            }
        };
        let start = batch.info.start_index;
        for (&index, hash) in &batch.info.checkpoints {
            if let Err(error) = chain.add_checkpoint(index, *hash) {
                let at = position + u64::from(index.saturating_sub(start));
                outcome = Err(chain_failure(error, at));
                break 'batches;
            }
            summary.checkpoints += 1;
        }

        let top = match chain.tip() {
            Ok(tip) => tip.index,
            Err(err) => {
                outcome = Err(SyncError::Chain(err));
                break;
            }
        };
        for (offset, raw) in (0u32..).zip(&batch.blocks) {
            if cancel.load(Ordering::Relaxed) {
                xid_log::log_warn!("import interrupted after {position} blocks");
                summary.interrupted = true;
                break 'batches;
            }
            if start + offset <= top {
                summary.already_known += 1;
                position += 1;
                continue;
            }
            match chain.add_block(raw, unix_now_secs()) {
                Ok(AddBlockOutcome::AddedToMain) => summary.added += 1,
                Ok(AddBlockOutcome::AddedToAlternative) => summary.alternative += 1,
                Ok(AddBlockOutcome::Reorganized { popped, pushed }) => {
                    xid_log::log_info!(
                        "dump block {position} reorganized the chain ({popped} out, {pushed} in)"
                    );
                    summary.reorganizations += 1;
                }
                Ok(AddBlockOutcome::AlreadyExists) => summary.already_known += 1,
                Ok(AddBlockOutcome::Orphaned) => {
                    outcome = Err(SyncError::Orphaned { position });
                    break 'batches;
                }
                Err(error) => {
                    outcome = Err(chain_failure(error, position));
                    break 'batches;
                }
            }
            position += 1;
            if position % PROGRESS_INTERVAL == 0 {
                xid_log::log_info!(
                    "imported {position}/{} blocks ({:.1}s)",
                    summary.announced,
                    started.elapsed().as_secs_f64()
                );
            }
        }
        match chain.tip() {
            Ok(tip) => known_top.store(tip.index, Ordering::Relaxed),
            Err(err) => {
                outcome = Err(SyncError::Chain(err));
                break;
            }
        }
    }
    // Unblocks the reader if it is waiting on a full channel.
    drop(rx);
    if handle.join().is_err() {
        xid_log::log_error!("dump reader thread panicked");
    }
    outcome?;

    xid_log::log_info!(
        "import finished: {} added, {} on side chains, {} reorganizations, {} already known ({} batches skipped)",
        summary.added,
        summary.alternative,
        summary.reorganizations,
        summary.already_known,
        summary.skipped_batches
    );
    Ok(summary)
}

fn chain_failure(error: ChainError, position: u64) -> SyncError {
    if error.is_fatal() {
        SyncError::Chain(error)
    } else {
        SyncError::Rejected { position, error }
    }
}

/// Writes main-chain blocks `start..start + count` (clamped to the tip), one
/// dump batch per `options.batch_size` blocks. Returns the number of blocks
/// written.
pub fn export_dump<C, W>(
    chain: &Blockchain<C>,
    writer: W,
    start: u32,
    count: Option<u32>,
    options: ExportOptions,
) -> Result<(W, u64), SyncError>
where
    C: BlockchainCache,
    W: Write,
{
    let top = chain.tip()?.index;
    if start > top {
        return Err(SyncError::EmptyRange { start, top });
    }
    let available = top - start + 1;
    let total = count.map_or(available, |count| count.min(available));
    let end = start + total;
    let batch_size = options.batch_size.max(1);

    let mut dump = DumpWriter::new(writer, u64::from(total))?
        .with_checkpoint_density(options.checkpoint_density);
    let mut next = start;
    while next < end {
        let batch = (end - next).min(batch_size);
        let blocks = chain
            .with_main(|main| main.blocks(next, batch))?
            .map_err(|err| SyncError::Chain(err.into()))?;
        if blocks.len() != batch as usize {
            return Err(SyncError::Chain(ChainError::Cache(CacheError::BlockOutOfRange {
                index: next + blocks.len() as u32,
            })));
        }
        dump.write_batch(next, &blocks)?;
        next += batch;
    }
    let written = dump.written();
    let writer = dump.finish()?;
    xid_log::log_info!("exported blocks {start}..{end} ({written} blocks)");
    Ok((writer, written))
}

/// JSON summary of the chain tip, upgrade state and checkpoints.
pub fn chain_report<C: BlockchainCache>(
    chain: &Blockchain<C>,
    schema_version: Option<u32>,
    import: Option<&ImportSummary>,
) -> Result<Value, String> {
    let context = chain.context();
    let tip = chain.tip().map_err(|err| err.to_string())?;
    let next_index = tip.index + 1;
    let current_version = context.block_version(next_index);
    let next_version = context.upgrades.next_version(current_version);
    let votes = match next_version {
        Some(version) => Some(chain.upgrade_votes(version).map_err(|err| err.to_string())?),
        None => None,
    };
    let alternatives = chain.alternative_count().map_err(|err| err.to_string())?;
    let checkpoints = chain.checkpoints().map_err(|err| err.to_string())?;

    let build = || -> Result<Value, ReportError> {
        let mut report = ReportBuilder::new();
        report.value("network", context.params.network.as_str())?;
        report.value("schema_version", schema_version)?;
        report
            .begin_object("tip")?
            .value("index", tip.index)?
            .value("hash", hash256_to_hex(&tip.info.hash))?
            .value("timestamp", tip.info.timestamp)?
            .value("major_version", tip.info.major_version)?
            .value("cumulative_difficulty", tip.info.cumulative_difficulty)?
            .value("already_generated_coins", tip.info.already_generated_coins)?
            .value(
                "already_generated_transactions",
                tip.info.already_generated_transactions,
            )?
            .end()?;
        report
            .begin_object("upgrades")?
            .value("next_block_version", current_version)?
            .value("pending_version", next_version)?
            .value("votes", votes)?
            .value("voting_window", context.params.upgrade_voting_window)?
            .end()?;
        report
            .begin_object("checkpoints")?
            .value("enabled", checkpoints.is_enabled())?
            .value("top", checkpoints.top_checkpoint_index())?
            .begin_array("heights")?;
        for height in checkpoints.checkpoint_heights() {
            report.push(height)?;
        }
        report.end()?.end()?;
        report.value("alternative_chains", alternatives)?;
        if let Some(summary) = import {
            report.value("import", serde_json::to_value(summary).unwrap_or(Value::Null))?;
        }
        report.finish()
    };
    build().map_err(|err| format!("failed to build report: {err}"))
}
