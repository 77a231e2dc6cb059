use crate::core::{ConnectionMode, Result, ShardingError};
use std::collections::HashMap;
use std::time::Duration;

pub const SQL_SHOW: &str = "sql.show";
pub const EXECUTOR_SIZE: &str = "executor.size";
pub const CONNECTION_MODE: &str = "connection.mode";
pub const DRAIN_TIMEOUT_MILLIS: &str = "context.drain.timeout.millis";

/// Largest worker pool the execution engine can be sized to.
pub const MAX_EXECUTOR_SIZE: usize = tokio::sync::Semaphore::MAX_PERMITS;

/// Runtime properties of a sharding data source
///
/// Built with the builder methods or parsed from a string property bag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardingProperties {
    /// Log logic and actual SQL for every executed statement
    pub sql_show: bool,

    /// Worker pool size, 0 means one worker per available CPU
    pub executor_size: usize,

    /// How physical connections are spent on a statement
    pub connection_mode: ConnectionMode,

    /// How long renew waits for connections to release a retired generation
    pub drain_timeout: Duration,
}

impl ShardingProperties {
    pub fn new() -> Self {
        Self {
            sql_show: false,
            executor_size: 0,
            connection_mode: ConnectionMode::MemoryStrict,
            drain_timeout: Duration::from_secs(5),
        }
    }

    /// Enable or disable SQL logging
    pub fn sql_show(mut self, show: bool) -> Self {
        self.sql_show = show;
        self
    }

    /// Set worker pool size
    pub fn executor_size(mut self, size: usize) -> Self {
        self.executor_size = size;
        self
    }

    /// Set connection mode
    pub fn connection_mode(mut self, mode: ConnectionMode) -> Self {
        self.connection_mode = mode;
        self
    }

    /// Set drain grace period for retired generations
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Parse from a property bag
    ///
    /// Unrecognized keys are ignored. Recognized keys with malformed values are rejected.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::collections::HashMap;
    /// use shardmesh::{ConnectionMode, ShardingProperties};
    ///
    /// let mut props = HashMap::new();
    /// props.insert("executor.size".to_string(), "8".to_string());
    /// props.insert("connection.mode".to_string(), "CONNECTION_STRICT".to_string());
    ///
    /// let parsed = ShardingProperties::from_props(&props).unwrap();
    /// assert_eq!(parsed.executor_size, 8);
    /// assert_eq!(parsed.connection_mode, ConnectionMode::ConnectionStrict);
    /// ```
    pub fn from_props(props: &HashMap<String, String>) -> Result<Self> {
        let mut result = Self::new();

        if let Some(value) = props.get(SQL_SHOW) {
            result.sql_show = value
                .trim()
                .parse::<bool>()
                .map_err(|_| invalid(SQL_SHOW, value))?;
        }

        if let Some(value) = props.get(EXECUTOR_SIZE) {
            result.executor_size = value
                .trim()
                .parse::<usize>()
                .map_err(|_| invalid(EXECUTOR_SIZE, value))?;
        }

        if let Some(value) = props.get(CONNECTION_MODE) {
            result.connection_mode = value
                .parse::<ConnectionMode>()
                .map_err(|_| invalid(CONNECTION_MODE, value))?;
        }

        if let Some(value) = props.get(DRAIN_TIMEOUT_MILLIS) {
            let millis = value
                .trim()
                .parse::<u64>()
                .map_err(|_| invalid(DRAIN_TIMEOUT_MILLIS, value))?;
            result.drain_timeout = Duration::from_millis(millis);
        }

        result.validate()?;
        Ok(result)
    }

    /// Convert back to a property bag
    pub fn to_props(&self) -> HashMap<String, String> {
        let mut props = HashMap::new();
        props.insert(SQL_SHOW.to_string(), self.sql_show.to_string());
        props.insert(EXECUTOR_SIZE.to_string(), self.executor_size.to_string());
        props.insert(CONNECTION_MODE.to_string(), self.connection_mode.to_string());
        props.insert(
            DRAIN_TIMEOUT_MILLIS.to_string(),
            self.drain_timeout.as_millis().to_string(),
        );
        props
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.executor_size > MAX_EXECUTOR_SIZE {
            return Err(invalid(EXECUTOR_SIZE, &self.executor_size.to_string()));
        }
        Ok(())
    }

    /// Worker count after resolving the 0 default
    pub fn effective_executor_size(&self) -> usize {
        resolve_executor_size(self.executor_size)
    }
}

impl Default for ShardingProperties {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn resolve_executor_size(size: usize) -> usize {
    if size > 0 {
        return size;
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn invalid(key: &str, value: &str) -> ShardingError {
    ShardingError::InvalidProperty {
        key: key.to_string(),
        value: value.to_string(),
    }
}
