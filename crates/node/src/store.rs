//! Chain database: backend selection, data dir lock and schema checks.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use fs2::FileExt;
use xid_chainstate::persistent::schema_version;
use xid_chainstate::{check_schema_version, CacheError, CURRENT_DB_SCHEME_VERSION};
use xid_storage::fjall::FjallStore;
use xid_storage::memory::MemoryStore;
use xid_storage::{Column, KeyValueStore, PrefixVisitor, ScanResult, StoreError, WriteBatch};

use crate::config::{Backend, Config};

const DATA_DIR_LOCK_FILE_NAME: &str = ".lock";

pub enum Store {
    Memory(MemoryStore),
    Fjall(FjallStore),
}

impl KeyValueStore for Store {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        match self {
            Store::Memory(store) => store.get(column, key),
            Store::Fjall(store) => store.get(column, key),
        }
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        match self {
            Store::Memory(store) => store.put(column, key, value),
            Store::Fjall(store) => store.put(column, key, value),
        }
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
        match self {
            Store::Memory(store) => store.delete(column, key),
            Store::Fjall(store) => store.delete(column, key),
        }
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        match self {
            Store::Memory(store) => store.scan_prefix(column, prefix),
            Store::Fjall(store) => store.scan_prefix(column, prefix),
        }
    }

    fn for_each_prefix<'a>(
        &self,
        column: Column,
        prefix: &[u8],
        visitor: &mut PrefixVisitor<'a>,
    ) -> Result<(), StoreError> {
        match self {
            Store::Memory(store) => store.for_each_prefix(column, prefix, visitor),
            Store::Fjall(store) => store.for_each_prefix(column, prefix, visitor),
        }
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        match self {
            Store::Memory(store) => store.write_batch(batch),
            Store::Fjall(store) => store.write_batch(batch),
        }
    }
}

pub fn open_store(config: &Config) -> Result<Store, String> {
    match config.backend {
        Backend::Memory => Ok(Store::Memory(MemoryStore::new())),
        Backend::Fjall => {
            let db_path = config.db_path();
            fs::create_dir_all(&db_path)
                .map_err(|err| format!("failed to create {}: {err}", db_path.display()))?;
            if config.db_journal_bytes < config.db_write_buffer_bytes {
                xid_log::log_warn!(
                    "Warning: --db-journal-mb ({}) is below --db-write-buffer-mb ({}); fjall may halt writes when journals fill",
                    config.db_journal_bytes / (1024 * 1024),
                    config.db_write_buffer_bytes / (1024 * 1024),
                );
            }
            let store = FjallStore::open_with_options(&db_path, config.fjall_options())
                .map_err(|err| format!("failed to open {}: {err}", db_path.display()))?;
            xid_log::log_debug!(
                "opened fjall store at {} (compression {})",
                db_path.display(),
                config.db_compression.as_str()
            );
            Ok(Store::Fjall(store))
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SchemaState {
    Current,
    /// The store was wiped and stamped with the current schema.
    Rebuilt { previous: Option<u32> },
}

/// Makes sure `store` carries the current schema. An outdated store is
/// wiped when `allow_rebuild` is set and refused otherwise; `force` wipes
/// unconditionally. A store from a newer release is always refused.
pub fn prepare_schema<S: KeyValueStore + ?Sized>(
    store: &S,
    allow_rebuild: bool,
    force: bool,
) -> Result<SchemaState, String> {
    let previous = schema_version(store).map_err(|err| err.to_string())?;
    if !force {
        match check_schema_version(store) {
            Ok(true) => return Ok(SchemaState::Current),
            Ok(false) if !allow_rebuild => {
                return Err(format!(
                    "database schema version {} is older than {CURRENT_DB_SCHEME_VERSION}; run import with --rebuild to recreate it",
                    previous.unwrap_or(0)
                ));
            }
            Ok(false) => {
                xid_log::log_warn!(
                    "database schema version {} is outdated; rebuilding",
                    previous.unwrap_or(0)
                );
            }
            Err(err @ CacheError::SchemaTooNew { .. }) => {
                return Err(format!("{err}; use a newer xid-sync"));
            }
            Err(err) => return Err(err.to_string()),
        }
    }

    xid_storage::wipe(store).map_err(|err| format!("failed to wipe database: {err}"))?;
    if !check_schema_version(store).map_err(|err| err.to_string())? {
        return Err(format!(
            "database still reports schema version {} after the wipe",
            schema_version(store)
                .map_err(|err| err.to_string())?
                .unwrap_or(0)
        ));
    }
    xid_log::log_info!("database reinitialized with schema version {CURRENT_DB_SCHEME_VERSION}");
    Ok(SchemaState::Rebuilt { previous })
}

pub struct DataDirLock {
    _file: File,
}

pub fn lock_data_dir(data_dir: &Path) -> Result<DataDirLock, String> {
    fs::create_dir_all(data_dir)
        .map_err(|err| format!("failed to create {}: {err}", data_dir.display()))?;
    let lock_path = data_dir.join(DATA_DIR_LOCK_FILE_NAME);
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|err| format!("failed to open lock file {}: {err}", lock_path.display()))?;

    match file.try_lock_exclusive() {
        Ok(()) => {
            let pid = std::process::id();
            let _ = file.set_len(0);
            let _ = file.seek(SeekFrom::Start(0));
            let _ = writeln!(file, "pid={pid}");
            let _ = file.flush();
            Ok(DataDirLock { _file: file })
        }
        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
            let mut holder = String::new();
            let _ =
                File::open(&lock_path).and_then(|mut reader| reader.read_to_string(&mut holder));
            let holder = holder.trim();
            Err(format!(
                "data dir {} is already locked (another xid-sync may be running); lock file {}{}",
                data_dir.display(),
                lock_path.display(),
                if holder.is_empty() {
                    String::new()
                } else {
                    format!(" ({holder})")
                }
            ))
        }
        Err(err) => Err(format!(
            "failed to lock data dir {} (lock file {}): {err}",
            data_dir.display(),
            lock_path.display()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xid_chainstate::persistent::DB_SCHEME_VERSION_KEY;

    #[test]
    fn outdated_schema_needs_rebuild_permission() {
        let store = MemoryStore::new();
        store
            .put(Column::Meta, DB_SCHEME_VERSION_KEY, &1u32.to_le_bytes())
            .expect("stamp old");
        store.put(Column::BlockInfo, b"stale", b"x").expect("stale row");

        let err = prepare_schema(&store, false, false).expect_err("refused");
        assert!(err.contains("--rebuild"));
        assert!(store.get(Column::BlockInfo, b"stale").expect("get").is_some());

        assert_eq!(
            prepare_schema(&store, true, false).expect("rebuild"),
            SchemaState::Rebuilt { previous: Some(1) }
        );
        assert!(store.get(Column::BlockInfo, b"stale").expect("get").is_none());
        assert_eq!(
            schema_version(&store).expect("version"),
            Some(CURRENT_DB_SCHEME_VERSION)
        );
        assert_eq!(
            prepare_schema(&store, false, false).expect("current"),
            SchemaState::Current
        );
    }

    #[test]
    fn newer_schema_is_refused_even_with_force_off() {
        let store = MemoryStore::new();
        store
            .put(
                Column::Meta,
                DB_SCHEME_VERSION_KEY,
                &(CURRENT_DB_SCHEME_VERSION + 1).to_le_bytes(),
            )
            .expect("stamp new");
        assert!(prepare_schema(&store, true, false).is_err());
        assert_eq!(
            prepare_schema(&store, false, true).expect("forced"),
            SchemaState::Rebuilt {
                previous: Some(CURRENT_DB_SCHEME_VERSION + 1)
            }
        );
    }

    /// Store whose columns cannot be cleared.
    struct UnclearableStore(MemoryStore);

    impl KeyValueStore for UnclearableStore {
        fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
            self.0.get(column, key)
        }

        fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
            self.0.put(column, key, value)
        }

        fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
            self.0.delete(column, key)
        }

        fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
            self.0.scan_prefix(column, prefix)
        }

        fn for_each_prefix<'a>(
            &self,
            column: Column,
            prefix: &[u8],
            visitor: &mut PrefixVisitor<'a>,
        ) -> Result<(), StoreError> {
            self.0.for_each_prefix(column, prefix, visitor)
        }

        fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
            self.0.write_batch(batch)
        }

        fn clear_column(&self, _column: Column) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[test]
    fn rebuild_fails_when_the_old_schema_survives_the_wipe() {
        let store = UnclearableStore(MemoryStore::new());
        store
            .put(Column::Meta, DB_SCHEME_VERSION_KEY, &1u32.to_le_bytes())
            .expect("stamp old");

        let err = prepare_schema(&store, true, false).expect_err("stale schema kept");
        assert!(err.contains("schema version 1 after the wipe"), "{err}");
        assert_eq!(schema_version(&store).expect("version"), Some(1));
    }

    #[test]
    fn data_dir_lock_is_exclusive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lock = lock_data_dir(dir.path()).expect("first lock");
        let err = match lock_data_dir(dir.path()) {
            Ok(_) => panic!("second lock acquired"),
            Err(err) => err,
        };
        assert!(err.contains("already locked"));
        drop(lock);
        lock_data_dir(dir.path()).expect("relock");
    }
}
