mod config;
mod connection;
mod error;
mod models;
/// Store implementation over the MongoDB collections.
pub mod store;

pub use config::MongoConfig;
pub use error::MongoDaoError;
pub use store::MongoSessionStore;

use crate::dao::storage::StorageError;

impl From<MongoDaoError> for StorageError {
    fn from(err: MongoDaoError) -> Self {
        match err {
            MongoDaoError::Missing { kind, id } => StorageError::not_found(kind, id),
            other => StorageError::unavailable(other.to_string(), other),
        }
    }
}
