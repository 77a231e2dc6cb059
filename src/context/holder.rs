use super::RuntimeContext;
use crate::config::ShardingProperties;
use crate::connection::ShardingConnection;
use crate::core::{Result, ShardingError};
use crate::datasource::LogicalSourceMap;
use crate::rule::ShardingRuleConfiguration;
use arc_swap::ArcSwap;
use log::{info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Logical database backed by many physical data sources.
///
/// Owns the published [`RuntimeContext`] generation. Readers take a snapshot
/// with a single atomic load; [`renew`](Self::renew) builds the next generation
/// off to the side and publishes it with a single atomic swap.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use shardmesh::{
///     LogicalSource, LogicalSourceMap, MemoryDataSource, ShardingDataSource,
///     ShardingProperties, ShardingRuleConfiguration,
/// };
///
/// # #[tokio::main]
/// # async fn main() -> shardmesh::Result<()> {
/// let mut sources = LogicalSourceMap::new();
/// sources.insert("ds_0".into(), LogicalSource::Plain(Arc::new(MemoryDataSource::new("ds_0"))));
///
/// let data_source = ShardingDataSource::new(
///     sources,
///     ShardingRuleConfiguration::new("sharding"),
///     ShardingProperties::new().executor_size(4),
/// )?;
///
/// let mut conn = data_source.get_connection()?;
/// let results = conn.execute("INSERT INTO t_order VALUES (1)", &["ds_0"]).await?;
/// assert_eq!(results.len(), 1);
///
/// data_source.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct ShardingDataSource {
    current: ArcSwap<RuntimeContext>,
    writer: Mutex<()>,
    closed: AtomicBool,
    next_generation: AtomicU64,
    next_connection_id: AtomicU64,
}

impl ShardingDataSource {
    /// Builds the first generation. Must be called inside a tokio runtime.
    pub fn new(
        sources: LogicalSourceMap,
        rule: ShardingRuleConfiguration,
        props: ShardingProperties,
    ) -> Result<Self> {
        let context = RuntimeContext::build(1, Some(&sources), rule, &props)?;
        Ok(Self {
            current: ArcSwap::from_pointee(context),
            writer: Mutex::new(()),
            closed: AtomicBool::new(false),
            next_generation: AtomicU64::new(2),
            next_connection_id: AtomicU64::new(1),
        })
    }

    /// Snapshot of the published generation.
    pub fn context(&self) -> Arc<RuntimeContext> {
        self.current.load_full()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Opens a logical connection pinned to the published generation.
    pub fn get_connection(&self) -> Result<ShardingConnection> {
        if self.is_closed() {
            return Err(ShardingError::Closed);
        }
        let id = self.next_connection_id.fetch_add(1, Ordering::SeqCst);
        Ok(ShardingConnection::new(id, self.current.load_full()))
    }

    /// Replaces the published generation.
    ///
    /// On failure the previous generation stays published and fully usable.
    /// After the swap the previous generation is retired: renew waits up to its
    /// drain timeout for connections to release it, then shuts its engine down
    /// and closes physical sources the new generation no longer uses.
    pub async fn renew(
        &self,
        sources: LogicalSourceMap,
        rule: ShardingRuleConfiguration,
        props: ShardingProperties,
    ) -> Result<()> {
        let previous = {
            let _writer = self.writer.lock().await;
            if self.is_closed() {
                return Err(ShardingError::Closed);
            }

            let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
            let next = RuntimeContext::build(generation, Some(&sources), rule, &props)?;
            let previous = self.current.load_full();
            next.inherit_routing_state(&previous);
            self.current.store(Arc::new(next));
            info!(
                "Published runtime context generation {} replacing generation {}",
                generation,
                previous.generation()
            );
            previous
        };

        self.retire(previous).await;
        Ok(())
    }

    /// Replaces the disabled-source set of the published generation.
    pub async fn renew_disabled_data_source_names<I, S>(&self, names: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let _writer = self.writer.lock().await;
        if self.is_closed() {
            return Err(ShardingError::Closed);
        }
        self.current.load().renew_disabled_data_source_names(names);
        Ok(())
    }

    /// Toggles the circuit breaker of the published generation.
    pub async fn renew_circuit_breaker_state(&self, broken: bool) -> Result<()> {
        let _writer = self.writer.lock().await;
        if self.is_closed() {
            return Err(ShardingError::Closed);
        }
        self.current.load().renew_circuit_breaker_state(broken);
        Ok(())
    }

    /// Releases the engine and every physical source. Idempotent.
    ///
    /// Waits for an in-flight renew to publish before closing what it published.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _writer = self.writer.lock().await;
        let current = self.current.load_full();
        info!("Closing sharding data source at generation {}", current.generation());
        current.close().await
    }

    async fn retire(&self, previous: Arc<RuntimeContext>) {
        let drain_timeout = self.current.load().drain_timeout();
        let deadline = Instant::now() + drain_timeout;
        while Arc::strong_count(&previous) > 1 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let holders = Arc::strong_count(&previous) - 1;
        if holders > 0 {
            warn!(
                "Generation {} still referenced by {} holder(s) after {:?}, shutting down its engine",
                previous.generation(),
                holders,
                drain_timeout
            );
        }

        previous.engine().shutdown().await;

        let current = self.current.load_full();
        for source in previous.registry().iter() {
            let kept = current
                .registry()
                .get(source.name())
                .is_some_and(|next| next.same_pool(source));
            if kept {
                continue;
            }
            if let Err(err) = source.handle().close().await {
                warn!("Failed to close retired data source '{}': {}", source.name(), err);
            }
        }
        info!("Retired runtime context generation {}", previous.generation());
    }
}
