use radoskv_pool::PoolError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DatastoreError {
    /// Config unreadable or the cluster connection could not be established.
    #[error("connection error: {0}")]
    Connection(String),

    /// The pool could not be opened.
    #[error("context error: {0}")]
    Context(String),

    /// The key does not exist.
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(String),

    /// The query worker failed; the result stream ends here.
    #[error("query error: {0}")]
    Query(String),

    #[error("datastore is closed")]
    Closed,
}

impl DatastoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DatastoreError::NotFound(_))
    }
}

impl From<PoolError> for DatastoreError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::NotFound(oid) => DatastoreError::NotFound(oid),
            PoolError::Config(_) | PoolError::Connect(_) => {
                DatastoreError::Connection(err.to_string())
            }
            PoolError::PoolNotFound(_) | PoolError::Shutdown => {
                DatastoreError::Context(err.to_string())
            }
            PoolError::Io(msg) => DatastoreError::Io(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_errors_are_normalized() {
        assert_eq!(
            DatastoreError::from(PoolError::NotFound("/k".into())),
            DatastoreError::NotFound("/k".into())
        );
        assert!(matches!(
            DatastoreError::from(PoolError::Config("bad".into())),
            DatastoreError::Connection(_)
        ));
        assert!(matches!(
            DatastoreError::from(PoolError::PoolNotFound("p".into())),
            DatastoreError::Context(_)
        ));
        assert!(matches!(
            DatastoreError::from(PoolError::Shutdown),
            DatastoreError::Context(_)
        ));
        assert_eq!(
            DatastoreError::from(PoolError::Io("disk on fire".into())),
            DatastoreError::Io("disk on fire".into())
        );
    }

    #[test]
    fn not_found_is_distinguishable() {
        assert!(DatastoreError::NotFound("/k".into()).is_not_found());
        assert!(!DatastoreError::Io("x".into()).is_not_found());
        assert!(!DatastoreError::Closed.is_not_found());
    }
}
