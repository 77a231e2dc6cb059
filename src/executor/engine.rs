use crate::config::{MAX_EXECUTOR_SIZE, resolve_executor_size};
use crate::core::{Result, ShardingError};
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{OwnedRwLockReadGuard, RwLock, Semaphore};
use tokio::task::{JoinError, JoinHandle};
use tracing::{Instrument, Level, event, info_span};

/// Keeps the engine from finishing shutdown while any unit of a batch is alive.
type Admission = Arc<OwnedRwLockReadGuard<bool>>;

/// Bounded worker pool for per-data-source execution units.
///
/// At most `size` units run at once. Batches hold a shared admission on the
/// engine gate until their last unit finishes, so [`shutdown`](Self::shutdown)
/// stops admitting new batches, waits for admitted ones to drain and only then
/// closes the pool.
pub struct ExecutionEngine {
    size: usize,
    permits: Arc<Semaphore>,
    gate: Arc<RwLock<bool>>,
    handle: Handle,
}

impl ExecutionEngine {
    /// Creates an engine on the current tokio runtime.
    ///
    /// `size == 0` sizes the pool to the available CPU count.
    pub fn new(size: usize) -> Result<Self> {
        let size = resolve_executor_size(size);
        if size > MAX_EXECUTOR_SIZE {
            return Err(ShardingError::EngineConstruction(format!(
                "executor size {} exceeds maximum {}",
                size, MAX_EXECUTOR_SIZE
            )));
        }
        let handle = Handle::try_current().map_err(|err| {
            ShardingError::EngineConstruction(format!("no async runtime available: {}", err))
        })?;

        Ok(Self {
            size,
            permits: Arc::new(Semaphore::new(size)),
            gate: Arc::new(RwLock::new(true)),
            handle,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_shutdown(&self) -> bool {
        self.permits.is_closed()
    }

    /// Runs every unit and returns their outputs in submission order.
    ///
    /// Returns as soon as the first unit fails. Sibling units are not cancelled;
    /// they run to completion in the background and still count against the pool.
    pub async fn execute<T, F>(&self, units: Vec<F>) -> Result<Vec<T>>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let count = units.len();
        let admission = self.admit().await?;
        let mut pending = self.submit(units, admission);
        let mut results: Vec<Option<T>> = std::iter::repeat_with(|| None).take(count).collect();

        async {
            while let Some((index, joined)) = pending.next().await {
                match flatten_join(joined) {
                    Ok(value) => results[index] = Some(value),
                    Err(err) => {
                        event!(Level::WARN, unit = index, error = %err, "execution unit failed");
                        return Err(err);
                    }
                }
            }
            Ok(())
        }
        .instrument(info_span!("engine.execute", units = count))
        .await?;

        Ok(results.into_iter().flatten().collect())
    }

    /// Runs every unit to completion and returns each outcome in submission order.
    ///
    /// For callers that decide themselves whether a failed unit aborts the statement.
    pub async fn execute_settled<T, F>(&self, units: Vec<F>) -> Result<Vec<Result<T>>>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let count = units.len();
        let admission = self.admit().await?;
        let mut pending = self.submit(units, admission);
        let mut results: Vec<Option<Result<T>>> = std::iter::repeat_with(|| None).take(count).collect();

        async {
            while let Some((index, joined)) = pending.next().await {
                results[index] = Some(flatten_join(joined));
            }
        }
        .instrument(info_span!("engine.execute_settled", units = count))
        .await;

        Ok(results.into_iter().flatten().collect())
    }

    /// Stops admitting batches, waits for admitted units to finish, then closes the pool.
    ///
    /// Idempotent.
    pub async fn shutdown(&self) {
        let mut accepting = self.gate.write().await;
        if !*accepting {
            return;
        }
        *accepting = false;
        self.permits.close();
        event!(Level::DEBUG, size = self.size, "execution engine shut down");
    }

    async fn admit(&self) -> Result<Admission> {
        let guard = Arc::clone(&self.gate).read_owned().await;
        if !*guard {
            return Err(ShardingError::EngineShutdown);
        }
        Ok(Arc::new(guard))
    }

    fn submit<T, F>(
        &self,
        units: Vec<F>,
        admission: Admission,
    ) -> FuturesUnordered<impl Future<Output = (usize, std::result::Result<Result<T>, JoinError>)>>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let pending = FuturesUnordered::new();
        for (index, unit) in units.into_iter().enumerate() {
            let handle = self.spawn_unit(unit, Arc::clone(&admission));
            pending.push(async move { (index, handle.await) });
        }
        pending
    }

    fn spawn_unit<T, F>(&self, unit: F, admission: Admission) -> JoinHandle<Result<T>>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        self.handle.spawn(async move {
            let _admission = admission;
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| ShardingError::EngineShutdown)?;
            unit.await
        })
    }
}

fn flatten_join<T>(joined: std::result::Result<Result<T>, JoinError>) -> Result<T> {
    joined.map_err(|err| ShardingError::Execution(format!("execution unit aborted: {}", err)))?
}
