use tracing::{debug, warn};

use crate::error::DatastoreError;
use crate::key::Key;
use crate::traits::Datastore;

/// A queued batch operation.
#[derive(Debug, Clone, PartialEq, Eq)]
enum BatchOp {
    Put { key: Key, value: Vec<u8> },
    Delete { key: Key },
}

/// Batch queues puts and deletes and applies them on `commit`.
///
/// There is no transaction: operations are applied one at a time, in the
/// order they were queued, and the first failure stops the commit. Operations
/// applied before the failure stay applied.
pub struct Batch<'a> {
    ds: &'a dyn Datastore,
    ops: Vec<BatchOp>,
}

impl<'a> Batch<'a> {
    pub fn new(ds: &'a dyn Datastore) -> Self {
        Self {
            ds,
            ops: Vec::new(),
        }
    }

    pub fn put(&mut self, key: Key, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put {
            key,
            value: value.into(),
        });
    }

    pub fn delete(&mut self, key: Key) {
        self.ops.push(BatchOp::Delete { key });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Apply all queued operations in order.
    pub fn commit(self) -> Result<(), DatastoreError> {
        let total = self.ops.len();
        for (applied, op) in self.ops.iter().enumerate() {
            let result = match op {
                BatchOp::Put { key, value } => self.ds.put(key, value),
                BatchOp::Delete { key } => self.ds.delete(key),
            };
            if let Err(e) = result {
                warn!(applied, total, "batch commit stopped: {}", e);
                return Err(e);
            }
        }
        debug!(total, "batch committed");
        Ok(())
    }
}
