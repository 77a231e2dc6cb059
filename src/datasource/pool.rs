use super::{DataSource, PhysicalConnection};
use crate::core::{Result, ShardingError};
use async_trait::async_trait;
use log::{debug, warn};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Pool sizing and timeouts of a [`MemoryDataSource`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// How long `acquire` waits for a free slot
    pub connect_timeout: Duration,

    /// Maximum number of connections in pool
    pub max_connections: usize,

    /// Minimum number of connections in pool
    pub min_connections: usize,

    /// Connection idle timeout
    pub idle_timeout: Option<Duration>,

    /// Maximum connection lifetime
    pub max_lifetime: Option<Duration>,
}

impl PoolConfig {
    pub fn new() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            max_connections: 10,
            min_connections: 0,
            idle_timeout: Some(Duration::from_secs(600)),
            max_lifetime: Some(Duration::from_secs(1800)),
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn min_connections(mut self, min: usize) -> Self {
        self.min_connections = min;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = Some(lifetime);
        self
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_connections == 0 {
            return Err("max_connections must be > 0".to_string());
        }

        if self.min_connections > self.max_connections {
            return Err("min_connections cannot exceed max_connections".to_string());
        }

        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection into the in-process backend; records every statement it runs.
struct MemoryConnection {
    id: u64,
    log: Arc<Mutex<Vec<String>>>,
}

struct PooledConnection {
    connection: MemoryConnection,
    created_at: Instant,
    last_used: Instant,
}

impl PooledConnection {
    fn new(connection: MemoryConnection) -> Self {
        let now = Instant::now();
        Self {
            connection,
            created_at: now,
            last_used: now,
        }
    }

    fn is_expired(&self, max_lifetime: Option<Duration>) -> bool {
        max_lifetime.is_some_and(|lifetime| self.created_at.elapsed() > lifetime)
    }

    fn is_idle_too_long(&self, idle_timeout: Option<Duration>) -> bool {
        idle_timeout.is_some_and(|timeout| self.last_used.elapsed() > timeout)
    }
}

/// In-process physical data source backed by a bounded connection pool.
///
/// Serves as the physical-source collaborator for embedding and tests: statements
/// are not interpreted, only recorded, so routing decisions can be asserted.
pub struct MemoryDataSource {
    name: String,
    config: PoolConfig,
    available: Arc<Mutex<VecDeque<PooledConnection>>>,
    total_connections: Arc<AtomicUsize>,
    next_id: AtomicU64,
    log: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
    reachable: AtomicBool,
}

impl MemoryDataSource {
    /// Creates a lazily populated source with default pool settings
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: PoolConfig::default(),
            available: Arc::new(Mutex::new(VecDeque::new())),
            total_connections: Arc::new(AtomicUsize::new(0)),
            next_id: AtomicU64::new(1),
            log: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
            reachable: AtomicBool::new(true),
        }
    }

    /// Creates a source and pre-opens `min_connections` connections
    pub async fn open(name: impl Into<String>, config: PoolConfig) -> Result<Self> {
        config.validate().map_err(ShardingError::Configuration)?;
        let source = Self {
            config,
            ..Self::new(name)
        };
        source.ensure_min_connections().await;
        Ok(source)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Simulates the backend going down or coming back.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Statements executed against this source, in execution order
    pub async fn executed_statements(&self) -> Vec<String> {
        self.log.lock().await.clone()
    }

    pub async fn stats(&self) -> PoolStats {
        let available = self.available.lock().await;
        let total = self.total_connections.load(Ordering::SeqCst);

        PoolStats {
            total_connections: total,
            available_connections: available.len(),
            active_connections: total.saturating_sub(available.len()),
            max_connections: self.config.max_connections,
        }
    }

    async fn try_get_available(&self) -> Option<PooledConnection> {
        let mut available = self.available.lock().await;

        let before = available.len();
        available.retain(|pooled| {
            !pooled.is_expired(self.config.max_lifetime)
                && !pooled.is_idle_too_long(self.config.idle_timeout)
        });
        let removed = before - available.len();
        if removed > 0 {
            self.total_connections.fetch_sub(removed, Ordering::SeqCst);
        }

        available.pop_front()
    }

    fn try_create_connection(&self) -> Option<MemoryConnection> {
        let reserved = self.total_connections.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |total| {
            (total < self.config.max_connections).then_some(total + 1)
        });
        reserved.ok().map(|_| self.new_connection())
    }

    fn new_connection(&self) -> MemoryConnection {
        MemoryConnection {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            log: Arc::clone(&self.log),
        }
    }

    async fn ensure_min_connections(&self) {
        let mut available = self.available.lock().await;
        while self.total_connections.load(Ordering::SeqCst) < self.config.min_connections {
            available.push_back(PooledConnection::new(self.new_connection()));
            self.total_connections.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn guard(&self, connection: MemoryConnection) -> PoolGuard {
        PoolGuard {
            connection: Some(connection),
            pool: Arc::clone(&self.available),
            total_connections: Arc::clone(&self.total_connections),
            closed: Arc::clone(&self.closed),
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) || !self.reachable.load(Ordering::SeqCst) {
            return Err(ShardingError::DataSourceUnavailable(self.name.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl DataSource for MemoryDataSource {
    async fn acquire(&self) -> Result<Box<dyn PhysicalConnection>> {
        let start = Instant::now();

        loop {
            self.check_open()?;

            if let Some(pooled) = self.try_get_available().await {
                return Ok(Box::new(self.guard(pooled.connection)));
            }

            if let Some(connection) = self.try_create_connection() {
                debug!("Data source '{}' opened connection {}", self.name, connection.id);
                return Ok(Box::new(self.guard(connection)));
            }

            if start.elapsed() > self.config.connect_timeout {
                return Err(ShardingError::PoolTimeout(format!(
                    "no connections available in '{}'",
                    self.name
                )));
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut available = self.available.lock().await;
        let idle = available.len();
        available.clear();
        self.total_connections.fetch_sub(idle, Ordering::SeqCst);
        debug!("Data source '{}' closed, released {} idle connection(s)", self.name, idle);
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        self.check_open()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Connection pool statistics
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub total_connections: usize,
    pub available_connections: usize,
    pub active_connections: usize,
    pub max_connections: usize,
}

impl std::fmt::Display for PoolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pool Stats: {}/{} active, {} available, max {}",
            self.active_connections,
            self.total_connections,
            self.available_connections,
            self.max_connections
        )
    }
}

/// RAII guard for pooled connections
///
/// Returns the connection to the pool when dropped, or releases it once the pool is closed
struct PoolGuard {
    connection: Option<MemoryConnection>,
    pool: Arc<Mutex<VecDeque<PooledConnection>>>,
    total_connections: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl PhysicalConnection for PoolGuard {
    async fn execute(&mut self, sql: &str) -> Result<u64> {
        let connection = self
            .connection
            .as_ref()
            .ok_or_else(|| ShardingError::Execution("Connection already returned to pool".into()))?;
        connection.log.lock().await.push(sql.to_string());
        Ok(1)
    }
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            if let Ok(mut pool) = self.pool.try_lock() {
                // close() flips the flag before it drains under this lock
                if self.closed.load(Ordering::SeqCst) {
                    debug!("Releasing connection {} of closed pool", connection.id);
                    self.total_connections.fetch_sub(1, Ordering::SeqCst);
                } else {
                    pool.push_back(PooledConnection::new(connection));
                }
            } else {
                warn!("Pool lock busy while returning connection {}, dropping it", connection.id);
                self.total_connections.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}
