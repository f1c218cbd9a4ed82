use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::trace;

use crate::error::PoolError;
use crate::traits::{Cluster, IoContext, ObjectIter, ObjectStat};

#[derive(Default)]
struct MemState {
    pools: HashMap<String, HashMap<String, Vec<u8>>>,
    shut_down: bool,
}

/// MemCluster is a process-local Cluster keeping every pool in memory.
///
/// Clones share the same pools, so several datastores (or a test and the
/// datastore under test) can observe each other's writes.
#[derive(Clone, Default)]
pub struct MemCluster {
    state: Arc<RwLock<MemState>>,
}

impl MemCluster {
    /// Create an empty cluster with no pools.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cluster with the given pools already present.
    pub fn with_pools(pools: &[&str]) -> Self {
        let cluster = Self::new();
        {
            let mut state = write_state(&cluster.state);
            for pool in pools {
                state.pools.entry(pool.to_string()).or_default();
            }
        }
        cluster
    }

    /// Whether `shutdown` has been called.
    pub fn is_shut_down(&self) -> bool {
        read_state(&self.state).shut_down
    }
}

impl Cluster for MemCluster {
    fn open_context(&self, pool: &str) -> Result<Box<dyn IoContext>, PoolError> {
        let state = read_state(&self.state);
        if state.shut_down {
            return Err(PoolError::Shutdown);
        }
        if !state.pools.contains_key(pool) {
            return Err(PoolError::PoolNotFound(pool.to_string()));
        }
        trace!(pool, "memory io context opened");
        Ok(Box::new(MemContext {
            pool: pool.to_string(),
            state: Arc::clone(&self.state),
        }))
    }

    fn create_pool(&self, pool: &str) -> Result<(), PoolError> {
        let mut state = write_state(&self.state);
        if state.shut_down {
            return Err(PoolError::Shutdown);
        }
        state.pools.entry(pool.to_string()).or_default();
        Ok(())
    }

    fn list_pools(&self) -> Result<Vec<String>, PoolError> {
        let mut pools: Vec<String> = read_state(&self.state).pools.keys().cloned().collect();
        pools.sort();
        Ok(pools)
    }

    fn shutdown(&self) {
        write_state(&self.state).shut_down = true;
    }
}

struct MemContext {
    pool: String,
    state: Arc<RwLock<MemState>>,
}

impl MemContext {
    fn with_pool<R>(
        &self,
        f: impl FnOnce(&HashMap<String, Vec<u8>>) -> Result<R, PoolError>,
    ) -> Result<R, PoolError> {
        let state = read_state(&self.state);
        let objects = state
            .pools
            .get(&self.pool)
            .ok_or_else(|| PoolError::PoolNotFound(self.pool.clone()))?;
        f(objects)
    }

    fn with_pool_mut<R>(
        &self,
        f: impl FnOnce(&mut HashMap<String, Vec<u8>>) -> Result<R, PoolError>,
    ) -> Result<R, PoolError> {
        let mut state = write_state(&self.state);
        let objects = state
            .pools
            .get_mut(&self.pool)
            .ok_or_else(|| PoolError::PoolNotFound(self.pool.clone()))?;
        f(objects)
    }
}

impl IoContext for MemContext {
    fn pool(&self) -> &str {
        &self.pool
    }

    fn write(&self, oid: &str, data: &[u8], offset: u64) -> Result<(), PoolError> {
        self.with_pool_mut(|objects| {
            let object = objects.entry(oid.to_string()).or_default();
            let start = offset as usize;
            let end = start + data.len();
            if object.len() < end {
                object.resize(end, 0);
            }
            object[start..end].copy_from_slice(data);
            Ok(())
        })
    }

    fn write_full(&self, oid: &str, data: &[u8]) -> Result<(), PoolError> {
        self.with_pool_mut(|objects| {
            objects.insert(oid.to_string(), data.to_vec());
            Ok(())
        })
    }

    fn read(&self, oid: &str, buf: &mut [u8], offset: u64) -> Result<usize, PoolError> {
        self.with_pool(|objects| {
            let object = objects
                .get(oid)
                .ok_or_else(|| PoolError::NotFound(oid.to_string()))?;
            let start = offset as usize;
            if start >= object.len() {
                return Ok(0);
            }
            let count = buf.len().min(object.len() - start);
            buf[..count].copy_from_slice(&object[start..start + count]);
            Ok(count)
        })
    }

    fn remove(&self, oid: &str) -> Result<(), PoolError> {
        self.with_pool_mut(|objects| match objects.remove(oid) {
            Some(_) => Ok(()),
            None => Err(PoolError::NotFound(oid.to_string())),
        })
    }

    fn stat(&self, oid: &str) -> Result<ObjectStat, PoolError> {
        self.with_pool(|objects| {
            objects
                .get(oid)
                .map(|object| ObjectStat {
                    size: object.len() as u64,
                })
                .ok_or_else(|| PoolError::NotFound(oid.to_string()))
        })
    }

    fn objects(&self) -> Result<ObjectIter, PoolError> {
        // Snapshot of the names; HashMap order is already arbitrary.
        let names: Vec<String> = self.with_pool(|objects| Ok(objects.keys().cloned().collect()))?;
        Ok(Box::new(names.into_iter().map(Ok)))
    }
}

impl Drop for MemContext {
    fn drop(&mut self) {
        trace!(pool = %self.pool, "memory io context released");
    }
}

// The guarded maps stay consistent even if a holder panicked, so poisoning is
// not treated as an error.
fn read_state(state: &RwLock<MemState>) -> RwLockReadGuard<'_, MemState> {
    state.read().unwrap_or_else(|e| e.into_inner())
}

fn write_state(state: &RwLock<MemState>) -> RwLockWriteGuard<'_, MemState> {
    state.write().unwrap_or_else(|e| e.into_inner())
}
