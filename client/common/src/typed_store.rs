//! Type-safe column-family access on top of RocksDB.
//!
//! RocksDB only knows raw bytes and string-named column families. This module
//! layers three things on top:
//!
//! 1. A [`DbCodec`] abstraction for encoding keys and values, with
//!    [`ScaleDbCodec`] (SCALE) as the codec used by every store in this
//!    workspace.
//! 2. Strongly-typed column-family definitions ([`TypedCf`],
//!    [`ScaleEncodedCf`], [`SingleScaleEncodedValueCf`]) so a column family's
//!    key and value types are fixed at compile time.
//! 3. A buffered write context ([`TypedDbContext`] with
//!    [`BufferedWriteSupport`]) that accumulates puts/deletes in a
//!    [`WriteBatch`] overlay and commits them atomically on flush, so every
//!    store mutator is a single atomic batch.

use codec::{Decode, Encode};
use rocksdb::{
    AsColumnFamilyRef, ColumnFamily, DBPinnableSlice, IteratorMode, WriteBatch, DB,
};
use std::{
    cell::{Ref, RefCell},
    collections::BTreeMap,
    marker::PhantomData,
};

use crate::rocksdb::{open_database, SchemaError, SchemaHistory};

/// Defines how a type is encoded to and decoded from bytes for storage.
pub trait DbCodec<T> {
    /// Encode a value to bytes.
    fn encode(value: &T) -> Vec<u8>;

    /// Decode a value from bytes.
    fn decode(bytes: &[u8]) -> T;
}

/// A [`DbCodec`] backed by the SCALE codec.
#[derive(Clone)]
pub struct ScaleDbCodec;

impl<T> DbCodec<T> for ScaleDbCodec
where
    T: Encode + Decode,
{
    fn encode(value: &T) -> Vec<u8> {
        value.encode()
    }

    fn decode(bytes: &[u8]) -> T {
        T::decode(&mut &bytes[..]).expect("ScaleDbCodec: Failed to decode value")
    }
}

/// A typed RocksDB column family.
///
/// Implemented on empty structs so each column family carries its key/value
/// types and codec in the type system.
pub trait TypedCf {
    /// Type of the key.
    type Key;
    /// Type of the value.
    type Value;

    /// Codec for the keys.
    type KeyCodec: DbCodec<Self::Key>;
    /// Codec for the values.
    type ValueCodec: DbCodec<Self::Value>;

    /// Column family name (as known to the DB).
    const NAME: &'static str;
}

/// Convenience trait for column families whose key and value both SCALE
/// encode/decode.
pub trait ScaleEncodedCf {
    type Key: Encode + Decode;
    type Value: Encode + Decode;

    const SCALE_ENCODED_NAME: &'static str;
}

impl<K: Encode + Decode, V: Encode + Decode, S: ScaleEncodedCf<Key = K, Value = V>> TypedCf for S {
    type Key = K;
    type Value = V;

    type KeyCodec = ScaleDbCodec;
    type ValueCodec = ScaleDbCodec;

    const NAME: &'static str = Self::SCALE_ENCODED_NAME;
}

/// Convenience trait for a column family holding a single SCALE-encoded value
/// (a durable global variable). The key is the unit type.
pub trait SingleScaleEncodedValueCf {
    type Value: Encode + Decode;

    const SINGLE_SCALE_ENCODED_VALUE_NAME: &'static str;
}

impl<V: Encode + Decode, S: SingleScaleEncodedValueCf<Value = V>> ScaleEncodedCf for S {
    type Key = ();
    type Value = V;

    const SCALE_ENCODED_NAME: &'static str = Self::SINGLE_SCALE_ENCODED_VALUE_NAME;
}

/// A RocksDB write buffer used for batching.
#[derive(Default)]
pub struct WriteBuffer {
    write_batch: RefCell<WriteBatch>,
}

impl WriteBuffer {
    /// Updates the key of the column family with a value.
    pub fn put(&self, cf: &ColumnFamily, key: Vec<u8>, value: Vec<u8>) {
        self.write_batch.borrow_mut().put_cf(cf, key, value);
    }

    /// Deletes the key of the column family.
    pub fn delete(&self, cf: &ColumnFamily, key: Vec<u8>) {
        self.write_batch.borrow_mut().delete_cf(cf, key);
    }

    /// Clears the write buffer and returns the previous contents to be flushed.
    pub fn flip(&self) -> WriteBatch {
        self.write_batch.replace(WriteBatch::default())
    }
}

/// Read operations of a RocksDB database.
pub trait ReadableRocks {
    /// Resolves the column family by name.
    fn cf_handle(&self, name: &str) -> &ColumnFamily;

    /// Gets a single value by key.
    fn get_pinned_cf(
        &self,
        cf: &impl AsColumnFamilyRef,
        key: impl AsRef<[u8]>,
    ) -> Option<DBPinnableSlice<'_>>;

    /// Gets an iterator over the column family.
    fn iterator_cf<'a>(
        &'a self,
        cf: &impl AsColumnFamilyRef,
        mode: IteratorMode,
    ) -> impl Iterator<Item = (Box<[u8]>, Box<[u8]>)> + 'a;
}

/// A write-supporting interface of a RocksDB database.
pub trait WriteableRocks: ReadableRocks {
    /// Atomically writes the given batch of updates.
    fn write(&self, batch: WriteBatch);
}

/// Internal wrapper tying a [`TypedCf`] to its resolved RocksDB handle.
struct CfHandle<'r, CF: TypedCf> {
    handle: &'r ColumnFamily,
    phantom: PhantomData<CF>,
}

impl<'r, CF: TypedCf> CfHandle<'r, CF> {
    pub fn resolve<R: ReadableRocks>(rocks: &'r R, _cf: &CF) -> Self {
        let handle = rocks.cf_handle(CF::NAME);
        Self {
            handle,
            phantom: PhantomData,
        }
    }
}

/// Write-enabling marker trait used with [`TypedDbContext`].
pub trait WriteSupport {}

/// No write support: a read-only context.
pub struct NoWriteSupport;

impl WriteSupport for NoWriteSupport {}

/// A higher-level database context.
///
/// All reads see the current DB state plus any local overlay writes; write
/// capabilities depend on the chosen [`WriteSupport`].
pub struct TypedDbContext<'r, R: ReadableRocks, W: WriteSupport> {
    rocks: &'r R,
    overlay: DbOverlay,
    write_support: W,
}

impl<'r, R: ReadableRocks, W: WriteSupport> TypedDbContext<'r, R, W> {
    pub fn new(rocks: &'r R, write_support: W) -> Self {
        Self {
            rocks,
            overlay: DbOverlay::new(),
            write_support,
        }
    }
}

/// Buffered write support.
///
/// Writes accumulate in the buffer and become visible to the DB only on
/// [`flush`](TypedDbContext::flush) (explicit, or implicit on [`Drop`]).
pub struct BufferedWriteSupport<'r, R: WriteableRocks> {
    buffer: WriteBuffer,
    rocks: &'r R,
}

impl<'r, R: WriteableRocks> BufferedWriteSupport<'r, R> {
    pub fn new(rocks: &'r R) -> Self {
        Self {
            buffer: WriteBuffer::default(),
            rocks,
        }
    }

    fn flush(&self) {
        let write_batch = self.buffer.flip();
        if !write_batch.is_empty() {
            self.rocks.write(write_batch);
        }
    }
}

impl<'r, R: WriteableRocks> WriteSupport for BufferedWriteSupport<'r, R> {}

impl<'r, R: WriteableRocks> Drop for BufferedWriteSupport<'r, R> {
    fn drop(&mut self) {
        self.flush();
    }
}

impl<'r, R: WriteableRocks> TypedDbContext<'r, R, BufferedWriteSupport<'r, R>> {
    /// Explicitly flushes the write buffer and clears the overlay.
    pub fn flush(&self) {
        self.write_support.flush();
        self.overlay.cfs.borrow_mut().clear();
    }
}

/// A typed, per-column-family API bound to a [`TypedDbContext`].
pub struct TypedCfApi<'r, 'o, 'w, CF: TypedCf, R: ReadableRocks, W: WriteSupport> {
    cf: CfHandle<'r, CF>,
    rocks: &'r R,
    cf_overlay: Ref<'o, DbCfOverlay>,
    write_support: &'w W,
}

impl<'r, 'o, 'w, CF: TypedCf, R: ReadableRocks, W: WriteSupport> TypedCfApi<'r, 'o, 'w, CF, R, W> {
    fn new(
        cf: CfHandle<'r, CF>,
        rocks: &'r R,
        cf_overlay: Ref<'o, DbCfOverlay>,
        write_support: &'w W,
    ) -> Self {
        Self {
            cf,
            rocks,
            cf_overlay,
            write_support,
        }
    }

    /// Gets value by key.
    pub fn get(&self, key: &CF::Key) -> Option<CF::Value> {
        match self.cf_overlay.get(CF::KeyCodec::encode(key)) {
            Some(DbCfOverlayValueOp::Put(value)) => {
                return Some(CF::ValueCodec::decode(&value));
            }
            Some(DbCfOverlayValueOp::Delete) => {
                return None;
            }
            None => {}
        }

        self.rocks
            .get_pinned_cf(self.cf.handle, CF::KeyCodec::encode(key).as_slice())
            .map(|pinnable_slice| CF::ValueCodec::decode(pinnable_slice.as_ref()))
    }

    /// Iterates over every entry of the column family, in key-byte order.
    ///
    /// Only committed entries are visible; flush the context first when
    /// iteration must observe buffered writes.
    pub fn iterate(&'r self) -> impl Iterator<Item = (CF::Key, CF::Value)> + 'r {
        self.rocks
            .iterator_cf(self.cf.handle, IteratorMode::Start)
            .map(|(key, value)| (CF::KeyCodec::decode(&key), CF::ValueCodec::decode(&value)))
    }
}

impl<'r, 'o, 'w, CF: TypedCf, R: WriteableRocks>
    TypedCfApi<'r, 'o, 'w, CF, R, BufferedWriteSupport<'r, R>>
{
    /// Updates the key with a value.
    pub fn put(&self, key: &CF::Key, value: &CF::Value) {
        let key_bytes = CF::KeyCodec::encode(key);
        let value_bytes = CF::ValueCodec::encode(value);
        self.write_support
            .buffer
            .put(self.cf.handle, key_bytes.clone(), value_bytes.clone());
        self.cf_overlay.put(key_bytes, value_bytes);
    }

    /// Deletes the key.
    pub fn delete(&self, key: &CF::Key) {
        let key_bytes = CF::KeyCodec::encode(key);
        self.write_support
            .buffer
            .delete(self.cf.handle, key_bytes.clone());
        self.cf_overlay.delete(key_bytes);
    }
}

impl<'r, R: ReadableRocks, W: WriteSupport> TypedDbContext<'r, R, W> {
    /// Returns a typed helper scoped at the given column family.
    pub fn cf<CF: TypedCf>(&self, typed_cf: &CF) -> TypedCfApi<'r, '_, '_, CF, R, W> {
        let overlay_cf_ref = self.overlay.cf(CF::NAME);

        TypedCfApi::new(
            CfHandle::resolve(self.rocks, typed_cf),
            self.rocks,
            overlay_cf_ref,
            &self.write_support,
        )
    }
}

/// A RocksDB wrapper implementing [`ReadableRocks`] and [`WriteableRocks`].
pub struct TypedRocksDB {
    pub db: DB,
}

impl TypedRocksDB {
    /// Opens a RocksDB database against the store's schema history.
    ///
    /// Newly required column families are created transparently on existing
    /// databases, retired ones are dropped, and a database stamped by a
    /// newer build is refused. Stores that never changed schema pass
    /// [`SchemaHistory::empty`].
    pub fn open(
        path: &str,
        current_column_families: &[&str],
        history: &SchemaHistory,
    ) -> Result<Self, SchemaError> {
        let db = open_database(path, current_column_families, history)?;
        Ok(Self { db })
    }
}

impl ReadableRocks for TypedRocksDB {
    fn cf_handle(&self, name: &str) -> &ColumnFamily {
        self.db.cf_handle(name).expect(name)
    }

    fn get_pinned_cf(
        &self,
        cf: &impl AsColumnFamilyRef,
        key: impl AsRef<[u8]>,
    ) -> Option<DBPinnableSlice<'_>> {
        self.db.get_pinned_cf(cf, key).expect("DB get by key")
    }

    fn iterator_cf<'a>(
        &'a self,
        cf: &impl AsColumnFamilyRef,
        mode: IteratorMode,
    ) -> impl Iterator<Item = (Box<[u8]>, Box<[u8]>)> + 'a {
        self.db
            .iterator_cf(cf, mode)
            .map(|result| result.expect("DB iterator"))
    }
}

impl WriteableRocks for TypedRocksDB {
    fn write(&self, batch: WriteBatch) {
        self.db.write(batch).expect("DB write batch");
    }
}

/// A pending key-value operation in the overlay.
#[derive(Debug, Clone)]
pub enum DbCfOverlayValueOp {
    Put(Vec<u8>),
    Delete,
}

/// A key in the overlay.
#[derive(Debug, Clone, Eq, PartialEq, PartialOrd, Ord)]
pub struct DbCfOverlayKey {
    pub key: Vec<u8>,
}

impl DbCfOverlayKey {
    pub fn new(key: Vec<u8>) -> Self {
        Self { key }
    }
}

/// In-memory overlay for all column families of a context.
pub struct DbOverlay {
    pub cfs: RefCell<BTreeMap<String, DbCfOverlay>>,
}

impl DbOverlay {
    pub fn new() -> Self {
        Self {
            cfs: RefCell::new(BTreeMap::new()),
        }
    }

    pub fn cf(&self, cf: &str) -> Ref<'_, DbCfOverlay> {
        if !self.cfs.borrow().contains_key(cf) {
            self.cfs
                .borrow_mut()
                .insert(cf.to_string(), DbCfOverlay::new());
        }
        Ref::map(self.cfs.borrow(), |cfs| cfs.get(cf).expect("Overlay CF"))
    }
}

impl Default for DbOverlay {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory overlay for a single column family.
pub struct DbCfOverlay {
    pub key_value: RefCell<BTreeMap<DbCfOverlayKey, DbCfOverlayValueOp>>,
}

impl DbCfOverlay {
    pub fn new() -> Self {
        Self {
            key_value: RefCell::new(BTreeMap::new()),
        }
    }

    pub fn get(&self, key: Vec<u8>) -> Option<DbCfOverlayValueOp> {
        self.key_value
            .borrow()
            .get(&DbCfOverlayKey::new(key))
            .cloned()
    }

    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) {
        self.key_value
            .borrow_mut()
            .insert(DbCfOverlayKey::new(key), DbCfOverlayValueOp::Put(value));
    }

    pub fn delete(&self, key: Vec<u8>) {
        self.key_value
            .borrow_mut()
            .insert(DbCfOverlayKey::new(key), DbCfOverlayValueOp::Delete);
    }
}

impl Default for DbCfOverlay {
    fn default() -> Self {
        Self::new()
    }
}
