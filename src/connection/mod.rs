use crate::context::RuntimeContext;
use crate::core::{ConnectionMode, Result, ShardingError};
use crate::datasource::DataSource;
use log::info;
use std::collections::HashSet;
use std::sync::Arc;

/// One routed statement slice for a physical data source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlUnit {
    pub data_source: String,
    pub sql: String,
}

impl SqlUnit {
    pub fn new(data_source: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            data_source: data_source.into(),
            sql: sql.into(),
        }
    }
}

/// Outcome of one [`SqlUnit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub data_source: String,
    pub affected_rows: u64,
}

/// Logical connection handle
///
/// Pinned to the runtime generation that was published when it was opened:
/// rule, registry and engine never change underneath it. Routing state
/// (disabled sources, circuit breaker) is read live on every call. Closing
/// releases the generation, so a closed handle never holds up a renew.
pub struct ShardingConnection {
    id: u64,
    context: Option<Arc<RuntimeContext>>,
}

impl ShardingConnection {
    pub(crate) fn new(id: u64, context: Arc<RuntimeContext>) -> Self {
        Self {
            id,
            context: Some(context),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The pinned generation, or an error once the connection is closed.
    pub fn context(&self) -> Result<&RuntimeContext> {
        self.live().map(|context| &**context)
    }

    pub fn is_active(&self) -> bool {
        self.context.is_some()
    }

    /// Physical sources a statement may be routed to right now.
    pub fn available_data_source_names(&self) -> Result<Vec<String>> {
        Ok(self.live()?.available_data_source_names())
    }

    /// Routable members of a high-availability group, primary first.
    ///
    /// With the circuit breaker open only the primary is returned, and a
    /// disabled primary fails fast instead of falling back to a replica.
    pub fn ha_group_targets(&self, group: &str) -> Result<Vec<String>> {
        let context = self.live()?;
        let rule = context
            .rule()
            .high_availability_rule(group)
            .ok_or_else(|| ShardingError::DataSourceNotFound(group.to_string()))?;
        let primary = rule
            .primary_data_source_name()
            .ok_or_else(|| ShardingError::DataSourceUnavailable(group.to_string()))?;

        if context.is_circuit_broken() {
            if context.is_disabled(primary) {
                return Err(ShardingError::DataSourceUnavailable(primary.to_string()));
            }
            return Ok(vec![primary.to_string()]);
        }

        let targets: Vec<String> = std::iter::once(primary)
            .chain(rule.data_source_names.iter().map(String::as_str).filter(|name| *name != primary))
            .filter(|name| !context.is_disabled(name))
            .map(str::to_string)
            .collect();
        if targets.is_empty() {
            return Err(ShardingError::DataSourceUnavailable(group.to_string()));
        }
        Ok(targets)
    }

    /// The one member a statement aimed at a high-availability group runs on.
    ///
    /// The primary while it is enabled, otherwise the first enabled member.
    pub fn ha_group_target(&self, group: &str) -> Result<String> {
        self.ha_group_targets(group)?
            .into_iter()
            .next()
            .ok_or_else(|| ShardingError::DataSourceUnavailable(group.to_string()))
    }

    /// Resolves logical targets to routable physical sources.
    ///
    /// A group name resolves to a single member through
    /// [`ha_group_target`](Self::ha_group_target), disabled physical sources
    /// are skipped, duplicates are dropped.
    pub fn route(&self, targets: &[&str]) -> Result<Vec<String>> {
        let context = self.live()?;
        let mut seen = HashSet::new();
        let mut routed = Vec::new();
        for target in targets {
            let resolved = if context.rule().high_availability_rule(target).is_some() {
                self.ha_group_target(target)?
            } else if context.registry().contains(target) {
                if context.is_disabled(target) {
                    continue;
                }
                target.to_string()
            } else {
                return Err(ShardingError::DataSourceNotFound(target.to_string()));
            };
            if seen.insert(resolved.clone()) {
                routed.push(resolved);
            }
        }

        if routed.is_empty() && !targets.is_empty() {
            return Err(ShardingError::DataSourceUnavailable(targets.join(",")));
        }
        Ok(routed)
    }

    /// Routes `sql` to `targets` and runs it once per routed physical source.
    pub async fn execute(&mut self, sql: &str, targets: &[&str]) -> Result<Vec<ExecutionResult>> {
        if self.live()?.show_sql() {
            info!("Logic SQL: {}", sql);
        }
        let units = self
            .route(targets)?
            .into_iter()
            .map(|data_source| SqlUnit::new(data_source, sql))
            .collect();
        self.execute_units(units).await
    }

    /// Runs already routed units, results in unit order.
    ///
    /// Units aimed at a disabled or unknown source are rejected before anything runs.
    pub async fn execute_units(&mut self, units: Vec<SqlUnit>) -> Result<Vec<ExecutionResult>> {
        let context = Arc::clone(self.live()?);
        let mut handles = Vec::with_capacity(units.len());
        for unit in &units {
            let source = context
                .registry()
                .get(&unit.data_source)
                .ok_or_else(|| ShardingError::DataSourceNotFound(unit.data_source.clone()))?;
            if context.is_disabled(&unit.data_source) {
                return Err(ShardingError::DataSourceUnavailable(unit.data_source.clone()));
            }
            if context.show_sql() {
                info!("Actual SQL: {} ::: {}", unit.data_source, unit.sql);
            }
            handles.push(Arc::clone(source.handle()));
        }

        match context.connection_mode() {
            ConnectionMode::MemoryStrict => execute_per_unit(&context, units, handles).await,
            ConnectionMode::ConnectionStrict => execute_per_data_source(&context, units, handles).await,
        }
    }

    /// Closes the connection and releases its generation. Idempotent.
    pub fn close(&mut self) {
        self.context = None;
    }

    fn live(&self) -> Result<&Arc<RuntimeContext>> {
        self.context
            .as_ref()
            .ok_or_else(|| ShardingError::Execution("Connection is closed".into()))
    }
}

async fn execute_per_unit(
    context: &RuntimeContext,
    units: Vec<SqlUnit>,
    handles: Vec<Arc<dyn DataSource>>,
) -> Result<Vec<ExecutionResult>> {
    let tasks = units
        .into_iter()
        .zip(handles)
        .map(|(unit, handle)| async move {
            let mut connection = handle.acquire().await?;
            let affected_rows = connection.execute(&unit.sql).await?;
            Ok::<_, ShardingError>(ExecutionResult {
                data_source: unit.data_source,
                affected_rows,
            })
        })
        .collect();
    context.engine().execute(tasks).await
}

async fn execute_per_data_source(
    context: &RuntimeContext,
    units: Vec<SqlUnit>,
    handles: Vec<Arc<dyn DataSource>>,
) -> Result<Vec<ExecutionResult>> {
    let count = units.len();
    let mut groups: Vec<(Arc<dyn DataSource>, Vec<(usize, SqlUnit)>)> = Vec::new();
    for (index, (unit, handle)) in units.into_iter().zip(handles).enumerate() {
        match groups.iter_mut().find(|(_, members)| members[0].1.data_source == unit.data_source) {
            Some((_, members)) => members.push((index, unit)),
            None => groups.push((handle, vec![(index, unit)])),
        }
    }

    let tasks = groups
        .into_iter()
        .map(|(handle, members)| async move {
            let mut connection = handle.acquire().await?;
            let mut results = Vec::with_capacity(members.len());
            for (index, unit) in members {
                let affected_rows = connection.execute(&unit.sql).await?;
                results.push((
                    index,
                    ExecutionResult {
                        data_source: unit.data_source,
                        affected_rows,
                    },
                ));
            }
            Ok::<_, ShardingError>(results)
        })
        .collect();

    let mut ordered: Vec<Option<ExecutionResult>> = std::iter::repeat_with(|| None).take(count).collect();
    for (index, result) in context.engine().execute(tasks).await?.into_iter().flatten() {
        ordered[index] = Some(result);
    }
    Ok(ordered.into_iter().flatten().collect())
}
