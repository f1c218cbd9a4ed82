//! Query types and the naive (client-side) query combinators.
//!
//! The backend can only list every object name in a pool, unordered. A query
//! is therefore answered in two stages:
//!
//! 1. the producer lists names, keeps those starting with `prefix` and
//!    optionally hydrates values, and
//! 2. [`naive_query_apply`] runs filters, orders, offset and limit, in that
//!    order, over the produced stream.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::error::DatastoreError;

/// A single query result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    /// Present unless the query was keys-only.
    pub value: Option<Vec<u8>>,
    /// Value length, when known.
    pub size: Option<usize>,
}

impl Entry {
    pub fn key_only(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
            size: None,
        }
    }

    pub fn with_value(key: impl Into<String>, value: Vec<u8>) -> Self {
        let size = Some(value.len());
        Self {
            key: key.into(),
            value: Some(value),
            size,
        }
    }

    fn value_bytes(&self) -> &[u8] {
        self.value.as_deref().unwrap_or_default()
    }
}

pub type QueryResult = Result<Entry, DatastoreError>;

/// Boxed stream of query results.
pub type ResultIter = Box<dyn Iterator<Item = QueryResult> + Send>;

/// Predicate over entries. All filters of a query must pass.
pub trait Filter: fmt::Debug + Send + Sync {
    fn filter(&self, entry: &Entry) -> bool;
}

/// Comparator over entries. Orders of a query are applied as a chain: later
/// orders only break ties of earlier ones.
pub trait Order: fmt::Debug + Send + Sync {
    fn compare(&self, a: &Entry, b: &Entry) -> Ordering;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
}

impl CompareOp {
    /// Whether `ord` (entry compared to the reference) satisfies this op.
    pub fn matches(self, ord: Ordering) -> bool {
        match self {
            CompareOp::Equal => ord == Ordering::Equal,
            CompareOp::NotEqual => ord != Ordering::Equal,
            CompareOp::GreaterThan => ord == Ordering::Greater,
            CompareOp::GreaterThanOrEqual => ord != Ordering::Less,
            CompareOp::LessThan => ord == Ordering::Less,
            CompareOp::LessThanOrEqual => ord != Ordering::Greater,
        }
    }
}

/// Keep entries whose key compares to `key` as `op` says.
#[derive(Debug, Clone)]
pub struct FilterKeyCompare {
    pub op: CompareOp,
    pub key: String,
}

impl Filter for FilterKeyCompare {
    fn filter(&self, entry: &Entry) -> bool {
        self.op.matches(entry.key.as_str().cmp(self.key.as_str()))
    }
}

/// Keep entries whose value compares to `value` as `op` says. Entries without
/// a value compare as empty.
#[derive(Debug, Clone)]
pub struct FilterValueCompare {
    pub op: CompareOp,
    pub value: Vec<u8>,
}

impl Filter for FilterValueCompare {
    fn filter(&self, entry: &Entry) -> bool {
        self.op.matches(entry.value_bytes().cmp(self.value.as_slice()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OrderByKey;

impl Order for OrderByKey {
    fn compare(&self, a: &Entry, b: &Entry) -> Ordering {
        a.key.cmp(&b.key)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OrderByKeyDescending;

impl Order for OrderByKeyDescending {
    fn compare(&self, a: &Entry, b: &Entry) -> Ordering {
        b.key.cmp(&a.key)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OrderByValue;

impl Order for OrderByValue {
    fn compare(&self, a: &Entry, b: &Entry) -> Ordering {
        a.value_bytes().cmp(b.value_bytes())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OrderByValueDescending;

impl Order for OrderByValueDescending {
    fn compare(&self, a: &Entry, b: &Entry) -> Ordering {
        b.value_bytes().cmp(a.value_bytes())
    }
}

/// A query request.
///
/// `prefix` is a plain string prefix: `/a` matches `/ab` as well as `/a/b`.
/// A `limit` of 0 means unbounded.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub prefix: String,
    pub keys_only: bool,
    /// With `keys_only`, still report each entry's size (from a stat).
    pub returns_sizes: bool,
    pub filters: Vec<Arc<dyn Filter>>,
    pub orders: Vec<Arc<dyn Order>>,
    pub offset: usize,
    pub limit: usize,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_keys_only(mut self, keys_only: bool) -> Self {
        self.keys_only = keys_only;
        self
    }

    pub fn with_returns_sizes(mut self, returns_sizes: bool) -> Self {
        self.returns_sizes = returns_sizes;
        self
    }

    pub fn with_filter(mut self, filter: impl Filter + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    pub fn with_order(mut self, order: impl Order + 'static) -> Self {
        self.orders.push(Arc::new(order));
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// Drop entries rejected by `filter`. Errors pass through.
pub fn naive_filter(iter: ResultIter, filter: Arc<dyn Filter>) -> ResultIter {
    Box::new(iter.filter(move |result| match result {
        Ok(entry) => filter.filter(entry),
        Err(_) => true,
    }))
}

/// Sort the whole stream with the order chain. The source is drained on the
/// first `next`; if it yields an error, that error is the only item.
pub fn naive_order(iter: ResultIter, orders: Vec<Arc<dyn Order>>) -> ResultIter {
    Box::new(NaiveOrder {
        source: Some(iter),
        orders,
        sorted: Vec::new().into_iter(),
    })
}

/// Skip the first `offset` entries.
pub fn naive_offset(iter: ResultIter, offset: usize) -> ResultIter {
    if offset == 0 {
        return iter;
    }
    let mut skipped = 0;
    Box::new(iter.filter(move |result| {
        if result.is_err() || skipped >= offset {
            return true;
        }
        skipped += 1;
        false
    }))
}

/// Yield at most `limit` items. A limit of 0 is unbounded.
pub fn naive_limit(iter: ResultIter, limit: usize) -> ResultIter {
    if limit == 0 {
        return iter;
    }
    Box::new(iter.take(limit))
}

/// Apply the query's filters, orders, offset and limit, in that order.
/// Prefix matching and value hydration are the producer's job.
pub fn naive_query_apply(query: &Query, mut iter: ResultIter) -> ResultIter {
    for filter in &query.filters {
        iter = naive_filter(iter, Arc::clone(filter));
    }
    if !query.orders.is_empty() {
        iter = naive_order(iter, query.orders.clone());
    }
    iter = naive_offset(iter, query.offset);
    naive_limit(iter, query.limit)
}

fn compare_chain(orders: &[Arc<dyn Order>], a: &Entry, b: &Entry) -> Ordering {
    for order in orders {
        let ord = order.compare(a, b);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

struct NaiveOrder {
    source: Option<ResultIter>,
    orders: Vec<Arc<dyn Order>>,
    sorted: std::vec::IntoIter<QueryResult>,
}

impl Iterator for NaiveOrder {
    type Item = QueryResult;

    fn next(&mut self) -> Option<QueryResult> {
        if let Some(source) = self.source.take() {
            let mut entries = Vec::new();
            for result in source {
                match result {
                    Ok(entry) => entries.push(entry),
                    Err(e) => {
                        self.sorted = vec![Err(e)].into_iter();
                        return self.sorted.next();
                    }
                }
            }
            // Stable, so equal entries keep their arrival order.
            entries.sort_by(|a, b| compare_chain(&self.orders, a, b));
            self.sorted = entries.into_iter().map(Ok).collect::<Vec<_>>().into_iter();
        }
        self.sorted.next()
    }
}

/// Results is the lazy, forward-only stream returned by a query.
///
/// It ends at the end of input or right after the first error. Dropping it
/// early tells the producer to stop and release its resources.
pub struct Results {
    query: Query,
    inner: ResultIter,
    done: bool,
}

impl Results {
    pub fn new(query: Query, inner: ResultIter) -> Self {
        Self {
            query,
            inner,
            done: false,
        }
    }

    /// Collect the remaining entries, or return the first error.
    pub fn rest(self) -> Result<Vec<Entry>, DatastoreError> {
        self.collect()
    }
}

impl Iterator for Results {
    type Item = QueryResult;

    fn next(&mut self) -> Option<QueryResult> {
        if self.done {
            return None;
        }
        match self.inner.next() {
            Some(Ok(entry)) => Some(Ok(entry)),
            Some(Err(e)) => {
                self.done = true;
                Some(Err(e))
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}

impl fmt::Debug for Results {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Results")
            .field("query", &self.query)
            .field("done", &self.done)
            .finish()
    }
}
