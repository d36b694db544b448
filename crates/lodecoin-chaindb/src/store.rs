//! Typed wrapper over the RocksDB store.
//!
//! The chain database keeps four sub-databases as column families. Writes
//! are staged in a batch and land atomically and durably on commit;
//! readers run against a snapshot and see a consistent state.

use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, Snapshot, WriteBatch,
    WriteOptions, DB,
};
use std::path::Path;

/// The named sub-databases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    /// Singleton records: file-info pointer, main-chain tip hash.
    Meta,
    /// The UTXO set, keyed by outpoint.
    Coin,
    /// Block index entries, keyed by block hash.
    Index,
    /// The set of chain leaves (side-chain heads plus the tip).
    Tip,
}

impl Column {
    const ALL: [Column; 4] = [Column::Meta, Column::Coin, Column::Index, Column::Tip];

    fn name(self) -> &'static str {
        match self {
            Column::Meta => "meta",
            Column::Coin => "coin",
            Column::Index => "index",
            Column::Tip => "tip",
        }
    }
}

/// Handle to the on-disk store.
pub struct Store {
    db: DB,
}

impl Store {
    /// Opens (creating if necessary) the store and its sub-databases.
    pub fn open(path: &Path) -> Result<Self, rocksdb::Error> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = Column::ALL
            .iter()
            .map(|column| ColumnFamilyDescriptor::new(column.name(), Options::default()));

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self { db })
    }

    fn cf(&self, column: Column) -> &ColumnFamily {
        self.db
            .cf_handle(column.name())
            .expect("column families are created at open; qed")
    }

    /// Opens a read transaction over a consistent snapshot.
    pub fn read(&self) -> ReadTxn<'_> {
        ReadTxn {
            store: self,
            snapshot: self.db.snapshot(),
        }
    }

    /// Opens a write transaction. Dropping it without committing aborts.
    pub fn write(&self) -> WriteTxn<'_> {
        WriteTxn {
            store: self,
            batch: WriteBatch::default(),
        }
    }
}

/// A snapshot read transaction.
pub struct ReadTxn<'a> {
    store: &'a Store,
    snapshot: Snapshot<'a>,
}

impl ReadTxn<'_> {
    pub fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, rocksdb::Error> {
        self.snapshot.get_cf(self.store.cf(column), key)
    }

    /// Cursor over every record of `column`, in key order.
    pub fn iter(
        &self,
        column: Column,
    ) -> impl Iterator<Item = Result<(Box<[u8]>, Box<[u8]>), rocksdb::Error>> + '_ {
        self.snapshot
            .iterator_cf(self.store.cf(column), IteratorMode::Start)
    }
}

/// A write transaction: a batch of puts and deletes applied atomically.
pub struct WriteTxn<'a> {
    store: &'a Store,
    batch: WriteBatch,
}

impl WriteTxn<'_> {
    pub fn put(&mut self, column: Column, key: &[u8], value: &[u8]) {
        self.batch.put_cf(self.store.cf(column), key, value);
    }

    pub fn del(&mut self, column: Column, key: &[u8]) {
        self.batch.delete_cf(self.store.cf(column), key);
    }

    /// Atomically applies the batch; the write is durable on return.
    pub fn commit(self) -> Result<(), rocksdb::Error> {
        let mut opts = WriteOptions::default();
        opts.set_sync(true);
        self.store.db.write_opt(self.batch, &opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_isolation() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();

        let mut txn = store.write();
        txn.put(Column::Meta, b"a", b"1");
        txn.commit().unwrap();

        let read = store.read();
        assert_eq!(read.get(Column::Meta, b"a").unwrap(), Some(b"1".to_vec()));

        // A later commit is invisible to the open snapshot.
        let mut txn = store.write();
        txn.put(Column::Meta, b"a", b"2");
        txn.commit().unwrap();
        assert_eq!(read.get(Column::Meta, b"a").unwrap(), Some(b"1".to_vec()));

        drop(read);
        let read = store.read();
        assert_eq!(read.get(Column::Meta, b"a").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn dropped_batch_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();

        let mut txn = store.write();
        txn.put(Column::Index, b"k", b"v");
        drop(txn);

        assert_eq!(store.read().get(Column::Index, b"k").unwrap(), None);
    }

    #[test]
    fn columns_are_disjoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();

        let mut txn = store.write();
        txn.put(Column::Coin, b"k", b"coin");
        txn.put(Column::Tip, b"k", b"tip");
        txn.commit().unwrap();

        let read = store.read();
        assert_eq!(read.get(Column::Coin, b"k").unwrap(), Some(b"coin".to_vec()));
        assert_eq!(read.get(Column::Tip, b"k").unwrap(), Some(b"tip".to_vec()));
        assert_eq!(read.get(Column::Meta, b"k").unwrap(), None);
        assert_eq!(read.iter(Column::Coin).count(), 1);
    }
}
