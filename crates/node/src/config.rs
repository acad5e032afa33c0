//! Command line and `xid.conf` handling for `xid-sync`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use xid_consensus::Network;
use xid_log as logging;
use xid_storage::fjall::{Compression, FjallOptions};

use crate::dump::DEFAULT_CHECKPOINT_DENSITY;
use crate::sync::DEFAULT_BATCH_SIZE;

pub const DEFAULT_DATA_DIR: &str = "data";
pub const CONF_FILE_NAME: &str = "xid.conf";
const DEFAULT_DB_CACHE_MB: u64 = 256;
const DEFAULT_DB_WRITE_BUFFER_MB: u64 = 512;
const DEFAULT_DB_JOURNAL_MB: u64 = 1024;
const MIB: u64 = 1024 * 1024;
/// Smallest batch an export may cut the chain into.
const MIN_EXPORT_BATCH: u32 = 100;

const SUPPORTED_CONF_KEYS: &[&str] = &[
    "backend",
    "checkpoints",
    "checkpointsfile",
    "dbcache",
    "dbcompression",
    "dbjournal",
    "dbwritebuffer",
    "logformat",
    "loglevel",
    "logtimestamps",
    "network",
    "prune",
];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Backend {
    Memory,
    Fjall,
}

impl Backend {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "memory" => Some(Self::Memory),
            "fjall" => Some(Self::Fjall),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SyncCommand {
    /// Replay a dump into the chain database. `rebuild` wipes it first.
    Import { path: PathBuf, rebuild: bool },
    /// Write main-chain blocks from `start` to a dump.
    Export {
        path: PathBuf,
        start: u32,
        count: Option<u32>,
        batch_size: u32,
        checkpoint_density: u32,
    },
    Info,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub backend: Backend,
    pub data_dir: PathBuf,
    pub conf_path: PathBuf,
    pub network: Network,
    pub command: SyncCommand,
    pub checkpoints_enabled: bool,
    pub checkpoints_file: Option<PathBuf>,
    /// Drop signatures of transactions buried deeper than the pruning depth.
    pub prune: bool,
    /// Testing only.
    pub skip_pow: bool,
    pub log_level: logging::Level,
    pub log_format: logging::Format,
    pub log_timestamps: bool,
    pub db_cache_bytes: u64,
    pub db_write_buffer_bytes: u64,
    pub db_journal_bytes: u64,
    pub db_compression: Compression,
    /// Keys in the config file this build ignores.
    pub unsupported_conf_keys: Vec<String>,
}

impl Config {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("db").join(self.network.as_str())
    }

    pub fn fjall_options(&self) -> FjallOptions {
        FjallOptions {
            cache_bytes: Some(self.db_cache_bytes),
            write_buffer_bytes: Some(self.db_write_buffer_bytes),
            journal_bytes: Some(self.db_journal_bytes),
            compression: self.db_compression,
            ..FjallOptions::default()
        }
    }
}

#[derive(Debug)]
pub enum CliAction {
    Run(Config),
    PrintHelp,
    PrintVersion,
}

pub fn parse_args() -> Result<CliAction, String> {
    parse_args_from(std::env::args().skip(1))
}

pub fn parse_args_from<I>(raw_args: I) -> Result<CliAction, String>
where
    I: IntoIterator<Item = String>,
{
    let mut backend = Backend::Fjall;
    let mut backend_set = false;
    let mut data_dir: Option<PathBuf> = None;
    let mut conf_path: Option<PathBuf> = None;
    let mut network = Network::Mainnet;
    let mut network_set = false;
    let mut checkpoints_enabled = true;
    let mut checkpoints_set = false;
    let mut checkpoints_file: Option<PathBuf> = None;
    let mut skip_pow = false;
    let mut prune = false;
    let mut prune_set = false;
    let mut log_level = logging::Level::Info;
    let mut log_level_set = false;
    let mut log_format = logging::Format::Text;
    let mut log_format_set = false;
    let mut log_timestamps = true;
    let mut log_timestamps_set = false;
    let mut db_cache_mb = DEFAULT_DB_CACHE_MB;
    let mut db_cache_set = false;
    let mut db_write_buffer_mb = DEFAULT_DB_WRITE_BUFFER_MB;
    let mut db_write_buffer_set = false;
    let mut db_journal_mb = DEFAULT_DB_JOURNAL_MB;
    let mut db_journal_set = false;
    let mut db_compression = Compression::default();
    let mut db_compression_set = false;
    let mut rebuild = false;
    let mut start: u32 = 0;
    let mut count: Option<u32> = None;
    let mut batch_size: Option<u32> = None;
    let mut checkpoint_density: Option<u32> = None;

    let mut args = raw_args.into_iter();
    let command = match args.next().as_deref() {
        None | Some("help") | Some("--help") | Some("-h") => return Ok(CliAction::PrintHelp),
        Some("version") | Some("--version") | Some("-V") => return Ok(CliAction::PrintVersion),
        Some("import") => "import",
        Some("export") => "export",
        Some("info") => "info",
        Some(other) => return Err(format!("unknown command '{other}'\n{}", usage())),
    };
    let mut path: Option<PathBuf> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--backend" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --backend\n{}", usage()))?;
                backend = Backend::parse(&value)
                    .ok_or_else(|| format!("invalid backend '{value}'\n{}", usage()))?;
                backend_set = true;
            }
            "--data-dir" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --data-dir\n{}", usage()))?;
                data_dir = Some(PathBuf::from(value));
            }
            "--conf" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --conf\n{}", usage()))?;
                conf_path = Some(PathBuf::from(value));
            }
            "--network" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --network\n{}", usage()))?;
                network = Network::from_name(&value)
                    .ok_or_else(|| format!("invalid network '{value}'\n{}", usage()))?;
                network_set = true;
            }
            "--checkpoints-file" => {
                let value = args.next().ok_or_else(|| {
                    format!("missing value for --checkpoints-file\n{}", usage())
                })?;
                checkpoints_file = Some(PathBuf::from(value));
            }
            "--no-checkpoints" => {
                checkpoints_enabled = false;
                checkpoints_set = true;
            }
            "--skip-pow" => skip_pow = true,
            "--prune" => {
                prune = true;
                prune_set = true;
            }
            "--no-prune" => {
                prune = false;
                prune_set = true;
            }
            "--rebuild" => rebuild = true,
            "--start" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --start\n{}", usage()))?;
                start = value
                    .parse::<u32>()
                    .map_err(|_| format!("invalid start height '{value}'\n{}", usage()))?;
            }
            "--count" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --count\n{}", usage()))?;
                count = Some(
                    value
                        .parse::<u32>()
                        .map_err(|_| format!("invalid block count '{value}'\n{}", usage()))?,
                );
            }
            "--batch-size" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --batch-size\n{}", usage()))?;
                batch_size = Some(
                    value
                        .parse::<u32>()
                        .ok()
                        .filter(|size| *size >= MIN_EXPORT_BATCH)
                        .ok_or_else(|| {
                            format!(
                                "invalid batch size '{value}' (at least {MIN_EXPORT_BATCH})\n{}",
                                usage()
                            )
                        })?,
                );
            }
            "--checkpoint-density" => {
                let value = args.next().ok_or_else(|| {
                    format!("missing value for --checkpoint-density\n{}", usage())
                })?;
                checkpoint_density = Some(
                    value
                        .parse::<u32>()
                        .ok()
                        .filter(|density| *density > 0)
                        .ok_or_else(|| {
                            format!("invalid checkpoint density '{value}'\n{}", usage())
                        })?,
                );
            }
            "--log-level" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --log-level\n{}", usage()))?;
                log_level = logging::Level::parse(&value)
                    .ok_or_else(|| format!("invalid log level '{value}'\n{}", usage()))?;
                log_level_set = true;
            }
            "--log-format" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --log-format\n{}", usage()))?;
                log_format = logging::Format::parse(&value)
                    .ok_or_else(|| format!("invalid log format '{value}'\n{}", usage()))?;
                log_format_set = true;
            }
            "--log-timestamps" => {
                log_timestamps = true;
                log_timestamps_set = true;
            }
            "--no-log-timestamps" => {
                log_timestamps = false;
                log_timestamps_set = true;
            }
            "--db-cache-mb" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --db-cache-mb\n{}", usage()))?;
                db_cache_mb = value
                    .parse::<u64>()
                    .map_err(|_| format!("invalid db cache '{value}'\n{}", usage()))?;
                db_cache_set = true;
            }
            "--db-write-buffer-mb" => {
                let value = args.next().ok_or_else(|| {
                    format!("missing value for --db-write-buffer-mb\n{}", usage())
                })?;
                db_write_buffer_mb = value
                    .parse::<u64>()
                    .map_err(|_| format!("invalid db write buffer '{value}'\n{}", usage()))?;
                db_write_buffer_set = true;
            }
            "--db-journal-mb" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --db-journal-mb\n{}", usage()))?;
                db_journal_mb = value
                    .parse::<u64>()
                    .map_err(|_| format!("invalid db journal '{value}'\n{}", usage()))?;
                db_journal_set = true;
            }
            "--db-compression" => {
                let value = args.next().ok_or_else(|| {
                    format!("missing value for --db-compression\n{}", usage())
                })?;
                db_compression = Compression::parse(&value).ok_or_else(|| {
                    format!("invalid db compression '{value}' (expected none|lz4)\n{}", usage())
                })?;
                db_compression_set = true;
            }
            "--help" | "-h" => return Ok(CliAction::PrintHelp),
            other if other.starts_with("--") => {
                return Err(format!("unknown argument '{other}'\n{}", usage()));
            }
            other => {
                if path.is_some() {
                    return Err(format!("unexpected argument '{other}'\n{}", usage()));
                }
                path = Some(PathBuf::from(other));
            }
        }
    }

    let data_dir = data_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
    let conf_file = conf_path.unwrap_or_else(|| data_dir.join(CONF_FILE_NAME));
    let mut unsupported_conf_keys = Vec::new();
    if let Some(conf) = load_conf(&conf_file)? {
        let last = |key: &str| conf.get(key).and_then(|values| values.last()).cloned();
        let invalid = |key: &str, raw: &str| format!("invalid {key} '{raw}' in {}", conf_file.display());

        if !network_set {
            if let Some(raw) = last("network") {
                network = Network::from_name(&raw).ok_or_else(|| invalid("network", &raw))?;
            }
        }
        if !backend_set {
            if let Some(raw) = last("backend") {
                backend = Backend::parse(&raw).ok_or_else(|| invalid("backend", &raw))?;
            }
        }
        if !checkpoints_set {
            if let Some(raw) = last("checkpoints") {
                checkpoints_enabled =
                    parse_conf_bool(&raw).ok_or_else(|| invalid("checkpoints", &raw))?;
            }
        }
        if checkpoints_file.is_none() {
            checkpoints_file = last("checkpointsfile").map(PathBuf::from);
        }
        if !prune_set {
            if let Some(raw) = last("prune") {
                prune = parse_conf_bool(&raw).ok_or_else(|| invalid("prune", &raw))?;
            }
        }
        if !log_level_set {
            if let Some(raw) = last("loglevel") {
                log_level = logging::Level::parse(&raw).ok_or_else(|| invalid("loglevel", &raw))?;
            }
        }
        if !log_format_set {
            if let Some(raw) = last("logformat") {
                log_format =
                    logging::Format::parse(&raw).ok_or_else(|| invalid("logformat", &raw))?;
            }
        }
        if !log_timestamps_set {
            if let Some(raw) = last("logtimestamps") {
                log_timestamps =
                    parse_conf_bool(&raw).ok_or_else(|| invalid("logtimestamps", &raw))?;
            }
        }
        if !db_cache_set {
            if let Some(raw) = last("dbcache") {
                db_cache_mb = raw.parse::<u64>().map_err(|_| invalid("dbcache", &raw))?;
            }
        }
        if !db_write_buffer_set {
            if let Some(raw) = last("dbwritebuffer") {
                db_write_buffer_mb = raw
                    .parse::<u64>()
                    .map_err(|_| invalid("dbwritebuffer", &raw))?;
            }
        }
        if !db_journal_set {
            if let Some(raw) = last("dbjournal") {
                db_journal_mb = raw.parse::<u64>().map_err(|_| invalid("dbjournal", &raw))?;
            }
        }
        if !db_compression_set {
            if let Some(raw) = last("dbcompression") {
                db_compression =
                    Compression::parse(&raw).ok_or_else(|| invalid("dbcompression", &raw))?;
            }
        }

        let mut unsupported: Vec<String> = conf
            .keys()
            .filter(|key| !SUPPORTED_CONF_KEYS.contains(&key.as_str()))
            .cloned()
            .collect();
        unsupported.sort();
        unsupported_conf_keys = unsupported;
    }

    if command != "export" && (batch_size.is_some() || checkpoint_density.is_some()) {
        return Err(format!(
            "--batch-size and --checkpoint-density only apply to export\n{}",
            usage()
        ));
    }
    let command = match command {
        "import" => SyncCommand::Import {
            path: path.ok_or_else(|| format!("import needs a dump path\n{}", usage()))?,
            rebuild,
        },
        "export" => SyncCommand::Export {
            path: path.ok_or_else(|| format!("export needs a dump path\n{}", usage()))?,
            start,
            count,
            batch_size: batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            checkpoint_density: checkpoint_density.unwrap_or(DEFAULT_CHECKPOINT_DENSITY),
        },
        _ => SyncCommand::Info,
    };

    Ok(CliAction::Run(Config {
        backend,
        data_dir,
        conf_path: conf_file,
        network,
        command,
        checkpoints_enabled,
        checkpoints_file,
        prune,
        skip_pow,
        log_level,
        log_format,
        log_timestamps,
        db_cache_bytes: db_cache_mb.saturating_mul(MIB),
        db_write_buffer_bytes: db_write_buffer_mb.saturating_mul(MIB),
        db_journal_bytes: db_journal_mb.saturating_mul(MIB),
        db_compression,
        unsupported_conf_keys,
    }))
}

/// Reads `key=value` lines. A missing file is not an error.
pub fn load_conf(path: &Path) -> Result<Option<HashMap<String, Vec<String>>>, String> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(format!("failed to read {}: {err}", path.display())),
    };

    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for raw_line in contents.lines() {
        let mut line = raw_line.trim();
        if let Some(idx) = line.find('#') {
            line = &line[..idx];
        }
        line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = match line.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => (line, "1"),
        };
        if key.is_empty() {
            continue;
        }
        out.entry(key.to_ascii_lowercase())
            .or_default()
            .push(value.to_string());
    }
    Ok(Some(out))
}

fn parse_conf_bool(value: &str) -> Option<bool> {
    let value = value.trim();
    if value.is_empty() {
        return Some(true);
    }
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

pub fn usage() -> String {
    [
        "Usage:",
        "  xid-sync import <dump> [options]",
        "  xid-sync export <dump> [--start N] [--count N] [--batch-size N] [--checkpoint-density N] [options]",
        "  xid-sync info [options]",
        "",
        "Commands:",
        "  import   Replay a block dump into the chain database",
        "  export   Write main-chain blocks to a block dump",
        "  info     Print a JSON summary of the chain database",
        "  help     Print this help and exit",
        "  version  Print version and exit",
        "",
        "Options:",
        "  --backend  Storage backend to use (memory|fjall) (default: fjall)",
        "  --data-dir  Base data directory (default: ./data)",
        "  --conf  Config file path (default: <data-dir>/xid.conf)",
        "  --network  Network selection (mainnet|stagenet|testnet|localnet) (default: mainnet)",
        "  --rebuild  Wipe the chain database before importing",
        "  --start  First block height to export (default: 0)",
        "  --count  Number of blocks to export (default: up to the tip)",
        "  --batch-size  Blocks per dump batch, at least 100 (default: 256)",
        "  --checkpoint-density  Blocks between checkpoints embedded in a batch (default: 100)",
        "  --checkpoints-file  Extra checkpoints as index,hash lines",
        "  --no-checkpoints  Disable checkpoint enforcement",
        "  --prune  Prune signatures of deeply buried transactions",
        "  --no-prune  Keep every signature (default)",
        "  --skip-pow  Skip proof-of-work checks (testing only)",
        "  --log-level  Log verbosity (error|warn|info|debug|trace) (default: info)",
        "  --log-format  Log output format (text|json) (default: text)",
        "  --log-timestamps  Enable timestamps in text logs (default: on)",
        "  --no-log-timestamps  Disable timestamps in text logs",
        "  --db-cache-mb  Fjall block cache size in MiB (default: 256)",
        "  --db-write-buffer-mb  Fjall max write buffer in MiB (default: 512)",
        "  --db-journal-mb  Fjall max journaling size in MiB (default: 1024)",
        "  --db-compression  Fjall block compression (none|lz4) (default: lz4)",
    ]
    .join("\n")
}
