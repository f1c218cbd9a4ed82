pub mod batch;
pub mod chunked;
pub mod datastore;
pub mod error;
pub mod key;
pub mod options;
pub mod query;
pub mod traits;

pub use batch::Batch;
pub use datastore::PoolDatastore;
pub use error::DatastoreError;
pub use key::Key;
pub use options::DatastoreOptions;
pub use query::{
    CompareOp, Entry, Filter, FilterKeyCompare, FilterValueCompare, Order,
    OrderByKey, OrderByKeyDescending, OrderByValue, OrderByValueDescending, Query, QueryResult,
    Results,
};
pub use traits::{Batching, Datastore};
