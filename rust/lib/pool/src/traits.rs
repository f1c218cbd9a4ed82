use crate::error::PoolError;

/// Metadata returned by [`IoContext::stat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectStat {
    pub size: u64,
}

/// Unordered listing of object names in a pool.
pub type ObjectIter = Box<dyn Iterator<Item = Result<String, PoolError>> + Send>;

/// Cluster is a connected object-storage backend.
///
/// Objects live in named pools. Each pool is a flat namespace: object names
/// are opaque strings with no path semantics, and listing a pool yields every
/// name in no particular order.
pub trait Cluster: Send + Sync {
    /// Open an I/O context scoped to one pool. The context is released when
    /// dropped.
    fn open_context(&self, pool: &str) -> Result<Box<dyn IoContext>, PoolError>;

    /// Create a pool. No-op if it already exists.
    fn create_pool(&self, pool: &str) -> Result<(), PoolError>;

    /// List pool names, sorted.
    fn list_pools(&self) -> Result<Vec<String>, PoolError>;

    /// Shut the connection down. Later `open_context` calls fail with
    /// `PoolError::Shutdown`. Calling it twice is harmless.
    fn shutdown(&self);
}

/// IoContext performs object operations against a single pool.
pub trait IoContext: Send {
    /// Name of the pool this context is bound to.
    fn pool(&self) -> &str;

    /// Write `data` at `offset`, creating the object if needed. Bytes past the
    /// written range are kept.
    fn write(&self, oid: &str, data: &[u8], offset: u64) -> Result<(), PoolError>;

    /// Replace the whole object with `data`.
    fn write_full(&self, oid: &str, data: &[u8]) -> Result<(), PoolError>;

    /// Read up to `buf.len()` bytes starting at `offset`. Returns the number of
    /// bytes read; a short count means the end of the object was reached.
    fn read(&self, oid: &str, buf: &mut [u8], offset: u64) -> Result<usize, PoolError>;

    /// Remove an object. Returns `PoolError::NotFound` if it does not exist.
    fn remove(&self, oid: &str) -> Result<(), PoolError>;

    /// Stat an object. Returns `PoolError::NotFound` if it does not exist.
    fn stat(&self, oid: &str) -> Result<ObjectStat, PoolError>;

    /// List all object names in the pool, unordered and unfiltered.
    fn objects(&self) -> Result<ObjectIter, PoolError>;
}
