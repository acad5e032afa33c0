#![cfg(feature = "fjall")]

use std::collections::HashSet;

use xid_storage::fjall::{Compression, FjallOptions, FjallStore};
use xid_storage::{wipe, Column, KeyValueStore, WriteBatch};

#[test]
fn fjall_smoke_roundtrip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FjallStore::open(dir.path()).expect("open fjall");
    store.put(Column::Meta, b"key", b"value").expect("put");
    assert_eq!(
        store.get(Column::Meta, b"key").expect("get"),
        Some(b"value".to_vec())
    );

    store
        .put(Column::BlockHash, b"prefix:1", b"a")
        .expect("put prefix");
    store
        .put(Column::BlockHash, b"prefix:2", b"b")
        .expect("put prefix");
    let keys: HashSet<_> = store
        .scan_prefix(Column::BlockHash, b"prefix:")
        .expect("scan")
        .into_iter()
        .collect();
    assert_eq!(
        keys,
        HashSet::from([
            (b"prefix:1".to_vec(), b"a".to_vec()),
            (b"prefix:2".to_vec(), b"b".to_vec()),
        ])
    );

    let mut batch = WriteBatch::new();
    batch.put(Column::Meta, b"batch".as_slice(), b"ok".as_slice());
    batch.delete(Column::Meta, b"key".as_slice());
    store.write_batch(&batch).expect("batch commit");

    assert!(store.get(Column::Meta, b"key").expect("get").is_none());
    assert_eq!(
        store.get(Column::Meta, b"batch").expect("get"),
        Some(b"ok".to_vec())
    );
}

#[test]
fn reopen_keeps_data_and_wipe_clears_it() {
    let dir = tempfile::tempdir().expect("tempdir");
    let options = FjallOptions {
        compression: Compression::None,
        ..FjallOptions::default()
    };
    {
        let store = FjallStore::open_with_options(dir.path(), options.clone()).expect("open");
        store.put(Column::RawBlock, &[0, 0, 0, 1], b"raw").expect("put");
        store.persist().expect("persist");
    }
    let store = FjallStore::open_with_options(dir.path(), options).expect("reopen");
    assert_eq!(
        store.get(Column::RawBlock, &[0, 0, 0, 1]).expect("get"),
        Some(b"raw".to_vec())
    );
    wipe(&store).expect("wipe");
    assert!(store
        .scan_prefix(Column::RawBlock, &[])
        .expect("scan")
        .is_empty());
}
