use std::path::Path;
use std::sync::mpsc::{self, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use radoskv_pool::{Cluster, IoContext, PoolError};
use tracing::{debug, trace, warn};

use crate::batch::Batch;
use crate::chunked::{read_object, write_object};
use crate::error::DatastoreError;
use crate::key::Key;
use crate::options::DatastoreOptions;
use crate::query::{Entry, Query, QueryResult, ResultIter, Results, naive_query_apply};
use crate::traits::{Batching, Datastore};

/// PoolDatastore maps the [`Datastore`] interface onto one pool of an object
/// cluster.
///
/// Keys are used verbatim as object names. Every operation opens a fresh
/// context on the pool and releases it before returning; all of them are
/// serialized by a single lock held from context open to release.
///
/// Queries are the exception. The listing runs on a worker thread that owns
/// its own context outside the lock and feeds a bounded channel. For
/// value-hydrating queries the worker reads each value through the same
/// locked path as [`get`](Datastore::get), so a query interleaves with
/// concurrent writes and sees no consistent snapshot.
pub struct PoolDatastore {
    inner: Arc<Inner>,
}

struct Inner {
    pool: String,
    options: DatastoreOptions,
    /// `None` once closed.
    conn: Mutex<Option<Arc<dyn Cluster>>>,
    /// Whether `close` shuts the cluster down, or only drops our handle.
    owns_connection: bool,
}

impl PoolDatastore {
    /// Connect with the config file at `config_path` and bind to `pool`.
    ///
    /// The config is read once; failures (unreadable or malformed file,
    /// connection refused, missing pool) are returned immediately and not
    /// retried.
    pub fn open(config_path: impl AsRef<Path>, pool: &str) -> Result<Self, DatastoreError> {
        let path = config_path.as_ref();
        let options = DatastoreOptions::load(path)?;
        Self::open_with_options(path, pool, options)
    }

    /// Like [`open`](Self::open), with explicit adapter options instead of the
    /// config file's `[datastore]` table.
    pub fn open_with_options(
        config_path: impl AsRef<Path>,
        pool: &str,
        options: DatastoreOptions,
    ) -> Result<Self, DatastoreError> {
        let path = config_path.as_ref();
        let cluster = radoskv_pool::connect(path).map_err(|e| {
            warn!("failed to connect with config {:?}: {}", path, e);
            DatastoreError::Connection(e.to_string())
        })?;
        match Self::build(Arc::clone(&cluster), pool, options, true) {
            Ok(ds) => Ok(ds),
            Err(e) => {
                cluster.shutdown();
                Err(e)
            }
        }
    }

    /// Bind to `pool` on an existing cluster handle. `close` releases only
    /// this datastore's handle; the cluster stays up for its other users.
    pub fn with_cluster(
        cluster: Arc<dyn Cluster>,
        pool: &str,
        options: DatastoreOptions,
    ) -> Result<Self, DatastoreError> {
        Self::build(cluster, pool, options, false)
    }

    fn build(
        cluster: Arc<dyn Cluster>,
        pool: &str,
        options: DatastoreOptions,
        owns_connection: bool,
    ) -> Result<Self, DatastoreError> {
        options.validate()?;

        // Make sure the pool is reachable before handing out the datastore.
        let ctx = cluster
            .open_context(pool)
            .map_err(|e| DatastoreError::Context(e.to_string()))?;
        drop(ctx);

        debug!(pool, ?options, "datastore opened");
        Ok(Self {
            inner: Arc::new(Inner {
                pool: pool.to_string(),
                options,
                conn: Mutex::new(Some(cluster)),
                owns_connection,
            }),
        })
    }

    pub fn pool(&self) -> &str {
        &self.inner.pool
    }

    pub fn options(&self) -> &DatastoreOptions {
        &self.inner.options
    }

    /// Release the connection. Later operations fail with
    /// `DatastoreError::Closed`; closing again is a no-op.
    ///
    /// Running query workers keep their listing context until they finish or
    /// their consumer goes away.
    pub fn close(&self) -> Result<(), DatastoreError> {
        let mut conn = self.inner.lock();
        match conn.take() {
            Some(cluster) => {
                if self.inner.owns_connection {
                    cluster.shutdown();
                }
                debug!(pool = %self.inner.pool, "datastore closed");
            }
            None => warn!(pool = %self.inner.pool, "datastore already closed"),
        }
        Ok(())
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Option<Arc<dyn Cluster>>> {
        // Nothing the guard protects can be left half-updated.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `f` with a fresh context, holding the lock from open to release.
    fn with_context<R>(
        &self,
        f: impl FnOnce(&dyn IoContext) -> Result<R, PoolError>,
    ) -> Result<R, DatastoreError> {
        let conn = self.lock();
        let cluster = conn.as_ref().ok_or(DatastoreError::Closed)?;
        let ctx = cluster.open_context(&self.pool)?;
        let result = f(ctx.as_ref());
        drop(ctx);
        drop(conn);
        Ok(result?)
    }

    /// Open a context that outlives the lock.
    fn detached_context(&self) -> Result<Box<dyn IoContext>, DatastoreError> {
        let conn = self.lock();
        let cluster = conn.as_ref().ok_or(DatastoreError::Closed)?;
        Ok(cluster.open_context(&self.pool)?)
    }

    fn get(&self, oid: &str) -> Result<Vec<u8>, DatastoreError> {
        let chunk_size = self.options.read_chunk_size;
        self.with_context(|ctx| read_object(ctx, oid, chunk_size))
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if !self.owns_connection {
            return;
        }
        let conn = self.conn.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(cluster) = conn.take() {
            cluster.shutdown();
            debug!(pool = %self.pool, "datastore dropped without close");
        }
    }
}

impl Datastore for PoolDatastore {
    fn put(&self, key: &Key, value: &[u8]) -> Result<(), DatastoreError> {
        let max_write_size = self.inner.options.max_write_size;
        self.inner
            .with_context(|ctx| write_object(ctx, key.as_str(), value, max_write_size))
    }

    fn get(&self, key: &Key) -> Result<Vec<u8>, DatastoreError> {
        self.inner.get(key.as_str())
    }

    fn has(&self, key: &Key) -> Result<bool, DatastoreError> {
        self.inner.with_context(|ctx| match ctx.stat(key.as_str()) {
            Ok(_) => Ok(true),
            Err(PoolError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        })
    }

    fn get_size(&self, key: &Key) -> Result<usize, DatastoreError> {
        let stat = self.inner.with_context(|ctx| ctx.stat(key.as_str()))?;
        object_len(key.as_str(), stat.size)
    }

    fn delete(&self, key: &Key) -> Result<(), DatastoreError> {
        self.inner.with_context(|ctx| ctx.remove(key.as_str()))
    }

    fn query(&self, query: Query) -> Result<Results, DatastoreError> {
        let ctx = self.inner.detached_context()?;
        let (tx, rx) = mpsc::sync_channel(self.inner.options.query_buffer);

        let worker = QueryWorker {
            inner: Arc::clone(&self.inner),
            ctx,
            prefix: query.prefix.clone(),
            keys_only: query.keys_only,
            returns_sizes: query.returns_sizes,
            tx,
        };
        thread::Builder::new()
            .name(format!("radoskv-query-{}", self.inner.pool))
            .spawn(move || worker.run())
            .map_err(|e| DatastoreError::Query(format!("failed to spawn query worker: {}", e)))?;

        debug!(pool = %self.inner.pool, prefix = %query.prefix, keys_only = query.keys_only, "query started");
        let source: ResultIter = Box::new(rx.into_iter());
        let iter = naive_query_apply(&query, source);
        Ok(Results::new(query, iter))
    }
}

impl Batching for PoolDatastore {
    fn batch(&self) -> Result<Batch<'_>, DatastoreError> {
        Ok(Batch::new(self))
    }
}

/// Lists a pool and streams matching entries into a bounded channel.
///
/// Owns its context for its whole life; the context is released when `run`
/// returns, which happens on exhaustion, on the first error, or as soon as a
/// send finds the consumer gone.
struct QueryWorker {
    inner: Arc<Inner>,
    ctx: Box<dyn IoContext>,
    prefix: String,
    keys_only: bool,
    returns_sizes: bool,
    tx: SyncSender<QueryResult>,
}

impl QueryWorker {
    fn run(self) {
        let objects = match self.ctx.objects() {
            Ok(objects) => objects,
            Err(e) => {
                warn!(pool = %self.inner.pool, "query worker: failed to fetch object iterator: {}", e);
                let _ = self.tx.send(Err(DatastoreError::Query(format!(
                    "failed to fetch object iterator: {}",
                    e
                ))));
                return;
            }
        };

        let mut sent = 0usize;
        for name in objects {
            let name = match name {
                Ok(name) => name,
                Err(e) => {
                    warn!(pool = %self.inner.pool, "query worker: listing failed: {}", e);
                    let _ = self
                        .tx
                        .send(Err(DatastoreError::Query(format!("object listing failed: {}", e))));
                    return;
                }
            };
            if !name.starts_with(&self.prefix) {
                continue;
            }

            let entry = match self.entry(name) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(pool = %self.inner.pool, "query worker: {}", e);
                    let _ = self.tx.send(Err(e));
                    return;
                }
            };
            if self.tx.send(Ok(entry)).is_err() {
                trace!(pool = %self.inner.pool, sent, "query consumer went away");
                return;
            }
            sent += 1;
        }
        debug!(pool = %self.inner.pool, sent, "query worker finished");
    }

    fn entry(&self, name: String) -> Result<Entry, DatastoreError> {
        if self.keys_only {
            let mut entry = Entry::key_only(name);
            if self.returns_sizes {
                let size = self
                    .ctx
                    .stat(&entry.key)
                    .map_err(DatastoreError::from)
                    .and_then(|stat| object_len(&entry.key, stat.size))
                    .map_err(|e| {
                        DatastoreError::Query(format!("failed to stat key '{}': {}", entry.key, e))
                    })?;
                entry.size = Some(size);
            }
            return Ok(entry);
        }

        match self.inner.get(&name) {
            Ok(value) => Ok(Entry::with_value(name, value)),
            Err(e) => Err(DatastoreError::Query(format!(
                "failed to fetch value for key '{}': {}",
                name, e
            ))),
        }
    }
}

/// Object size as a value length on this platform.
fn object_len(oid: &str, size: u64) -> Result<usize, DatastoreError> {
    usize::try_from(size).map_err(|_| {
        DatastoreError::Io(format!("object '{}' is too large to address: {} bytes", oid, size))
    })
}

#[cfg(test)]
mod tests {
    use radoskv_pool::{MemCluster, ObjectIter, ObjectStat};

    use super::*;
    use crate::query::OrderByKey;

    /// Failures a [`FaultyCluster`] injects into every context it opens.
    #[derive(Debug, Clone, Default)]
    struct Faults {
        /// `objects()` itself fails.
        listing: bool,
        /// The listing yields this many names, then an error.
        listing_breaks_after: Option<usize>,
        /// Reads of this object fail.
        read: Option<&'static str>,
        /// Stats of this object fail.
        stat: Option<&'static str>,
    }

    struct FaultyCluster {
        inner: MemCluster,
        faults: Faults,
    }

    impl Cluster for FaultyCluster {
        fn open_context(&self, pool: &str) -> Result<Box<dyn IoContext>, PoolError> {
            Ok(Box::new(FaultyContext {
                inner: self.inner.open_context(pool)?,
                faults: self.faults.clone(),
            }))
        }
        fn create_pool(&self, pool: &str) -> Result<(), PoolError> {
            self.inner.create_pool(pool)
        }
        fn list_pools(&self) -> Result<Vec<String>, PoolError> {
            self.inner.list_pools()
        }
        fn shutdown(&self) {
            self.inner.shutdown()
        }
    }

    struct FaultyContext {
        inner: Box<dyn IoContext>,
        faults: Faults,
    }

    impl IoContext for FaultyContext {
        fn pool(&self) -> &str {
            self.inner.pool()
        }
        fn write(&self, oid: &str, data: &[u8], offset: u64) -> Result<(), PoolError> {
            self.inner.write(oid, data, offset)
        }
        fn write_full(&self, oid: &str, data: &[u8]) -> Result<(), PoolError> {
            self.inner.write_full(oid, data)
        }
        fn read(&self, oid: &str, buf: &mut [u8], offset: u64) -> Result<usize, PoolError> {
            if self.faults.read == Some(oid) {
                return Err(PoolError::Io("eio".to_string()));
            }
            self.inner.read(oid, buf, offset)
        }
        fn remove(&self, oid: &str) -> Result<(), PoolError> {
            self.inner.remove(oid)
        }
        fn stat(&self, oid: &str) -> Result<ObjectStat, PoolError> {
            if self.faults.stat == Some(oid) {
                return Err(PoolError::Io("eio".to_string()));
            }
            self.inner.stat(oid)
        }
        fn objects(&self) -> Result<ObjectIter, PoolError> {
            if self.faults.listing {
                return Err(PoolError::Io("listing unavailable".to_string()));
            }
            let names = self.inner.objects()?;
            match self.faults.listing_breaks_after {
                Some(n) => Ok(Box::new(names.take(n).chain(std::iter::once(Err(
                    PoolError::Io("listing interrupted".to_string()),
                ))))),
                None => Ok(names),
            }
        }
    }

    /// Datastore over pool "data" holding `/a`, `/bad`, `/c`, `/d`.
    fn faulty_ds(faults: Faults) -> PoolDatastore {
        let inner = MemCluster::with_pools(&["data"]);
        let cluster = Arc::new(FaultyCluster { inner, faults });
        let ds = PoolDatastore::with_cluster(cluster, "data", DatastoreOptions::default()).unwrap();
        for key in ["/a", "/bad", "/c", "/d"] {
            ds.put(&Key::new(key), key.as_bytes()).unwrap();
        }
        ds
    }

    /// Drain a stream that must end in exactly one error, returning the
    /// entries before it and the error.
    fn drain_to_error(mut results: Results) -> (Vec<Entry>, DatastoreError) {
        let mut entries = Vec::new();
        loop {
            match results.next() {
                Some(Ok(entry)) => entries.push(entry),
                Some(Err(e)) => {
                    assert!(results.next().is_none(), "stream continued after error");
                    return (entries, e);
                }
                None => panic!("stream ended without an error"),
            }
        }
    }

    fn assert_not_blocked(ds: &PoolDatastore) {
        let key = Key::new("/later");
        ds.put(&key, b"later").unwrap();
        assert_eq!(ds.get(&key).unwrap(), b"later");
    }

    #[test]
    fn listing_failure_is_single_error() {
        let ds = faulty_ds(Faults {
            listing: true,
            ..Default::default()
        });
        let (entries, err) = drain_to_error(ds.query(Query::new()).unwrap());
        assert!(entries.is_empty());
        assert!(
            matches!(&err, DatastoreError::Query(msg) if msg.contains("failed to fetch object iterator")),
            "{:?}",
            err
        );
        assert_not_blocked(&ds);
    }

    #[test]
    fn broken_listing_ends_stream() {
        let ds = faulty_ds(Faults {
            listing_breaks_after: Some(2),
            ..Default::default()
        });
        let (entries, err) =
            drain_to_error(ds.query(Query::new().with_keys_only(true)).unwrap());
        assert_eq!(entries.len(), 2);
        assert!(
            matches!(&err, DatastoreError::Query(msg) if msg.contains("listing interrupted")),
            "{:?}",
            err
        );
        assert_not_blocked(&ds);
    }

    #[test]
    fn hydration_failure_ends_stream() {
        let ds = faulty_ds(Faults {
            read: Some("/bad"),
            ..Default::default()
        });
        let (entries, err) = drain_to_error(ds.query(Query::new()).unwrap());
        assert!(entries.iter().all(|e| e.key != "/bad"));
        assert!(
            matches!(&err, DatastoreError::Query(msg) if msg.contains("'/bad'")),
            "{:?}",
            err
        );

        // Ordering drains the source first, so the error is the only item.
        let (entries, err) =
            drain_to_error(ds.query(Query::new().with_order(OrderByKey)).unwrap());
        assert!(entries.is_empty());
        assert!(matches!(err, DatastoreError::Query(_)));
        assert_not_blocked(&ds);
    }

    #[test]
    fn size_stat_failure_ends_stream() {
        let ds = faulty_ds(Faults {
            stat: Some("/bad"),
            ..Default::default()
        });
        let query = Query::new().with_keys_only(true).with_returns_sizes(true);
        let (entries, err) = drain_to_error(ds.query(query).unwrap());
        assert!(entries.iter().all(|e| e.key != "/bad" && e.size.is_some()));
        assert!(
            matches!(&err, DatastoreError::Query(msg) if msg.contains("failed to stat key '/bad'")),
            "{:?}",
            err
        );

        // Without sizes the stat is never issued.
        let all = ds.query(Query::new().with_keys_only(true)).unwrap().rest().unwrap();
        assert_eq!(all.len(), 4);
        assert_not_blocked(&ds);
    }

    #[test]
    fn object_len_checks_platform_width() {
        assert_eq!(object_len("/k", 42), Ok(42));
        if usize::BITS < u64::BITS {
            assert!(matches!(object_len("/k", u64::MAX), Err(DatastoreError::Io(_))));
        } else {
            assert_eq!(object_len("/k", u64::MAX), Ok(usize::MAX));
        }
    }

    fn make_ds() -> (MemCluster, PoolDatastore) {
        let cluster = MemCluster::with_pools(&["data"]);
        let ds = PoolDatastore::with_cluster(
            Arc::new(cluster.clone()),
            "data",
            DatastoreOptions::default(),
        )
        .unwrap();
        (cluster, ds)
    }

    #[test]
    fn crud_lifecycle() {
        let (_cluster, ds) = make_ds();
        let key = Key::new("/foo");

        ds.put(&key, b"bar").unwrap();
        assert_eq!(ds.get(&key).unwrap(), b"bar");
        assert!(ds.has(&key).unwrap());
        assert_eq!(ds.get_size(&key).unwrap(), 3);

        ds.delete(&key).unwrap();
        assert!(ds.get(&key).unwrap_err().is_not_found());
        assert!(!ds.has(&key).unwrap());
        assert!(ds.get_size(&key).unwrap_err().is_not_found());
        assert!(ds.delete(&key).unwrap_err().is_not_found());
    }

    #[test]
    fn overwrite_with_shorter_value() {
        let (_cluster, ds) = make_ds();
        let key = Key::new("/k");
        ds.put(&key, b"a much longer value").unwrap();
        ds.put(&key, b"short").unwrap();
        assert_eq!(ds.get(&key).unwrap(), b"short");
        assert_eq!(ds.get_size(&key).unwrap(), 5);
    }

    #[test]
    fn unknown_pool_is_context_error() {
        let cluster: Arc<dyn Cluster> = Arc::new(MemCluster::new());
        let err = PoolDatastore::with_cluster(cluster, "nope", DatastoreOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, DatastoreError::Context(_)));
    }

    #[test]
    fn invalid_options_are_rejected() {
        let cluster: Arc<dyn Cluster> = Arc::new(MemCluster::with_pools(&["data"]));
        let options = DatastoreOptions {
            read_chunk_size: 0,
            ..Default::default()
        };
        assert!(PoolDatastore::with_cluster(cluster, "data", options).is_err());
    }

    #[test]
    fn close_is_idempotent_and_blocks_operations() {
        let (cluster, ds) = make_ds();
        ds.close().unwrap();
        ds.close().unwrap();
        assert_eq!(ds.get(&Key::new("/x")), Err(DatastoreError::Closed));
        assert!(matches!(ds.query(Query::new()), Err(DatastoreError::Closed)));
        // Shared cluster handles are not shut down by close.
        assert!(!cluster.is_shut_down());
    }

    #[test]
    fn keys_only_query_with_sizes() {
        let (_cluster, ds) = make_ds();
        ds.put(&Key::new("/a"), b"1234").unwrap();
        ds.put(&Key::new("/b"), b"").unwrap();

        let query = Query::new()
            .with_keys_only(true)
            .with_returns_sizes(true)
            .with_order(OrderByKey);
        let entries = ds.query(query).unwrap().rest().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, "/a");
        assert_eq!(entries[0].value, None);
        assert_eq!(entries[0].size, Some(4));
        assert_eq!(entries[1].size, Some(0));
    }

    #[test]
    fn hydrated_query_carries_values() {
        let (_cluster, ds) = make_ds();
        ds.put(&Key::new("/basic"), b"basicvalue").unwrap();

        let entries = ds
            .query(Query::new().with_prefix("/basic"))
            .unwrap()
            .rest()
            .unwrap();
        assert_eq!(entries, vec![Entry::with_value("/basic", b"basicvalue".to_vec())]);
    }

    #[test]
    fn abandoned_query_releases_worker() {
        let (_cluster, ds) = make_ds();
        let options_buffer = ds.options().query_buffer;
        for i in 0..(options_buffer * 3) {
            ds.put(&Key::new(format!("/item/{:04}", i)), b"v").unwrap();
        }

        let mut results = ds.query(Query::new()).unwrap();
        assert!(results.next().unwrap().is_ok());
        drop(results);

        ds.put(&Key::new("/after"), b"x").unwrap();
        assert_eq!(ds.get(&Key::new("/after")).unwrap(), b"x");
        let count = ds
            .query(Query::new().with_keys_only(true))
            .unwrap()
            .rest()
            .unwrap()
            .len();
        assert_eq!(count, options_buffer * 3 + 1);
    }
}
