pub mod error;
pub mod types;

pub use error::{ErrorKind, Result, ShardingError};
pub use types::{ConnectionMode, DataSourceState};
