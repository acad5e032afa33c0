use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use fjall::PersistMode;
use fjall::{Batch, CompressionType, Config, Keyspace, PartitionCreateOptions, PartitionHandle};

use crate::{Column, KeyValueStore, PrefixVisitor, StoreError, WriteBatch, WriteOp};

const SLOW_COMMIT_THRESHOLD: Duration = Duration::from_millis(500);
const SLOW_COMMIT_LOG_INTERVAL_SECS: u64 = 30;
const WRITE_BUFFER_RELIEF_LOG_INTERVAL_SECS: u64 = 30;
const WRITE_BUFFER_RELIEF_COOLDOWN_SECS: u64 = 1;
const WRITE_BUFFER_HIGH_WATERMARK_PCT: u64 = 90;

static LAST_SLOW_COMMIT_LOG_SECS: AtomicU64 = AtomicU64::new(0);
static LAST_WRITE_BUFFER_RELIEF_LOG_SECS: AtomicU64 = AtomicU64::new(0);

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Compression {
    None,
    #[default]
    Lz4,
}

impl Compression {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => Some(Compression::None),
            "lz4" => Some(Compression::Lz4),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Lz4 => "lz4",
        }
    }

    fn fjall_type(self) -> CompressionType {
        match self {
            Compression::None => CompressionType::None,
            Compression::Lz4 => CompressionType::Lz4,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct FjallOptions {
    pub cache_bytes: Option<u64>,
    pub write_buffer_bytes: Option<u64>,
    pub journal_bytes: Option<u64>,
    pub memtable_bytes: Option<u32>,
    pub fsync_ms: Option<u16>,
    pub compression: Compression,
}

impl FjallOptions {
    fn apply_config(&self, mut config: Config) -> Config {
        if let Some(bytes) = self.cache_bytes {
            config = config.cache_size(bytes);
        }
        if let Some(bytes) = self.write_buffer_bytes {
            config = config.max_write_buffer_size(bytes);
        }
        if let Some(bytes) = self.journal_bytes {
            config = config.max_journaling_size(bytes);
        }
        if let Some(ms) = self.fsync_ms {
            config = config.fsync_ms(Some(ms));
        }
        config
    }

    fn partition_options(&self) -> PartitionCreateOptions {
        let mut options =
            PartitionCreateOptions::default().compression(self.compression.fjall_type());
        if let Some(bytes) = self.memtable_bytes {
            options = options.max_memtable_size(bytes);
        }
        options
    }
}

/// Disk-backed store, one fjall partition per column.
pub struct FjallStore {
    keyspace: Keyspace,
    partitions: Vec<PartitionHandle>,
    max_write_buffer_bytes: Option<u64>,
    last_pressure_relief_secs: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FjallStats {
    pub write_buffer_bytes: u64,
    pub journal_count: u64,
    pub journal_disk_space_bytes: u64,
}

impl FjallStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_options(path, FjallOptions::default())
    }

    pub fn open_with_options(
        path: impl AsRef<Path>,
        options: FjallOptions,
    ) -> Result<Self, StoreError> {
        let config = options.apply_config(Config::new(path));
        let keyspace = config.open().map_err(map_err)?;
        let partition_options = options.partition_options();
        let mut partitions = Vec::with_capacity(Column::ALL.len());
        for column in Column::ALL {
            let handle = keyspace
                .open_partition(column.as_str(), partition_options.clone())
                .map_err(map_err)?;
            partitions.push(handle);
        }
        Ok(Self {
            keyspace,
            partitions,
            max_write_buffer_bytes: options.write_buffer_bytes,
            last_pressure_relief_secs: AtomicU64::new(0),
        })
    }

    fn partition(&self, column: Column) -> Result<&PartitionHandle, StoreError> {
        self.partitions
            .get(column.index())
            .ok_or_else(|| StoreError::Backend(format!("missing partition {}", column.as_str())))
    }

    pub fn stats(&self) -> FjallStats {
        FjallStats {
            write_buffer_bytes: self.keyspace.write_buffer_size(),
            journal_count: self.keyspace.journal_count() as u64,
            journal_disk_space_bytes: self.keyspace.journal_disk_space(),
        }
    }

    /// Forces buffered writes to disk.
    pub fn persist(&self) -> Result<(), StoreError> {
        self.keyspace.persist(PersistMode::SyncAll).map_err(map_err)
    }

    fn maybe_relieve_write_buffer_pressure(&self, touched: u32) {
        let Some(limit) = self.max_write_buffer_bytes else {
            return;
        };
        if limit == 0 {
            return;
        }
        let current = self.keyspace.write_buffer_size();
        let watermark = limit.saturating_mul(WRITE_BUFFER_HIGH_WATERMARK_PCT) / 100;
        if current == 0 || current < watermark {
            return;
        }

        let now = unix_secs();
        let last = self.last_pressure_relief_secs.load(Ordering::Relaxed);
        if now.saturating_sub(last) < WRITE_BUFFER_RELIEF_COOLDOWN_SECS {
            return;
        }
        let _ = self.last_pressure_relief_secs.compare_exchange(
            last,
            now,
            Ordering::Relaxed,
            Ordering::Relaxed,
        );

        let rotated = Column::ALL
            .iter()
            .filter(|column| touched & column.bit() != 0)
            .filter_map(|column| self.partition(*column).ok())
            .any(|partition| matches!(partition.rotate_memtable(), Ok(true)));

        if rotated {
            let last = LAST_WRITE_BUFFER_RELIEF_LOG_SECS.load(Ordering::Relaxed);
            if now.saturating_sub(last) >= WRITE_BUFFER_RELIEF_LOG_INTERVAL_SECS
                && LAST_WRITE_BUFFER_RELIEF_LOG_SECS
                    .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
            {
                xid_log::log_warn!(
                    "Fjall write buffer pressure {pressure:.1}% ({current}B/{limit}B); rotating memtables",
                    pressure = current as f64 / limit as f64 * 100.0,
                );
            }
        }
    }
}

impl KeyValueStore for FjallStore {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let partition = self.partition(column)?;
        let value = partition.get(key).map_err(map_err)?;
        Ok(value.map(|bytes| bytes.to_vec()))
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let partition = self.partition(column)?;
        partition.insert(key, value).map_err(map_err)?;
        Ok(())
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
        let partition = self.partition(column)?;
        partition.remove(key).map_err(map_err)?;
        Ok(())
    }

    fn scan_prefix(
        &self,
        column: Column,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let partition = self.partition(column)?;
        let mut results = Vec::new();
        for entry in partition.prefix(prefix) {
            let (key, value) = entry.map_err(map_err)?;
            results.push((key.to_vec(), value.to_vec()));
        }
        Ok(results)
    }

    fn for_each_prefix<'a>(
        &self,
        column: Column,
        prefix: &[u8],
        visitor: &mut PrefixVisitor<'a>,
    ) -> Result<(), StoreError> {
        let partition = self.partition(column)?;
        for entry in partition.prefix(prefix) {
            let (key, value) = entry.map_err(map_err)?;
            visitor(key.as_ref(), value.as_ref())?;
        }
        Ok(())
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut touched: u32 = 0;
        let mut fjall_batch = Batch::with_capacity(self.keyspace.clone(), batch.len())
            .durability(Some(PersistMode::Buffer));
        for op in batch.iter() {
            match op {
                WriteOp::Put { column, key, value } => {
                    touched |= column.bit();
                    let partition = self.partition(*column)?;
                    fjall_batch.insert(partition, key.as_slice(), value.as_slice());
                }
                WriteOp::Delete { column, key } => {
                    touched |= column.bit();
                    let partition = self.partition(*column)?;
                    fjall_batch.remove(partition, key.as_slice());
                }
            }
        }
        self.maybe_relieve_write_buffer_pressure(touched);

        let commit_start = Instant::now();
        fjall_batch.commit().map_err(map_err)?;
        let elapsed = commit_start.elapsed();
        if elapsed >= SLOW_COMMIT_THRESHOLD {
            let now = unix_secs();
            let last = LAST_SLOW_COMMIT_LOG_SECS.load(Ordering::Relaxed);
            if now.saturating_sub(last) >= SLOW_COMMIT_LOG_INTERVAL_SECS
                && LAST_SLOW_COMMIT_LOG_SECS
                    .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
            {
                xid_log::log_warn!(
                    "Fjall write_batch commit took {}ms (ops {}, write_buffer {}B, journals {})",
                    elapsed.as_millis(),
                    batch.len(),
                    self.keyspace.write_buffer_size(),
                    self.keyspace.journal_count(),
                );
            }
        }
        Ok(())
    }
}

fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn map_err(err: fjall::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}
