use crate::batch::Batch;
use crate::error::DatastoreError;
use crate::key::Key;
use crate::query::{Query, Results};

/// Datastore is the generic key-value interface.
///
/// Keys are hierarchical paths (`/a/b/c`); values are opaque bytes of any
/// length, including empty.
pub trait Datastore: Send + Sync {
    /// Store a value, replacing any previous one.
    fn put(&self, key: &Key, value: &[u8]) -> Result<(), DatastoreError>;

    /// Fetch a value. Returns `DatastoreError::NotFound` if the key is absent.
    fn get(&self, key: &Key) -> Result<Vec<u8>, DatastoreError>;

    /// Whether the key exists. Absence is `Ok(false)`, not an error.
    fn has(&self, key: &Key) -> Result<bool, DatastoreError>;

    /// Byte length of the stored value. `DatastoreError::NotFound` if absent.
    fn get_size(&self, key: &Key) -> Result<usize, DatastoreError>;

    /// Delete a key. Returns `DatastoreError::NotFound` if it was absent.
    fn delete(&self, key: &Key) -> Result<(), DatastoreError>;

    /// Run a query. Results are produced lazily.
    fn query(&self, query: Query) -> Result<Results, DatastoreError>;
}

/// Datastores that can hand out a [`Batch`].
pub trait Batching: Datastore {
    fn batch(&self) -> Result<Batch<'_>, DatastoreError>;
}
