pub mod holder;

use crate::config::ShardingProperties;
use crate::core::{ConnectionMode, DataSourceState, Result, ShardingError};
use crate::datasource::{DataSourceRegistry, LogicalSource, LogicalSourceMap, flatten};
use crate::executor::ExecutionEngine;
use crate::rule::{ShardingRuleConfiguration, merge};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use im::OrdSet;
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub use holder::ShardingDataSource;

/// One generation of the runtime: merged rule, flattened registry and the engine.
///
/// Immutable once built except for the routing state (disabled names and the
/// circuit-breaker flag), which lives in lock-free cells so it can be updated
/// while connections route against this generation.
pub struct RuntimeContext {
    generation: u64,
    created_at: DateTime<Utc>,
    rule: ShardingRuleConfiguration,
    registry: DataSourceRegistry,
    engine: ExecutionEngine,
    connection_mode: ConnectionMode,
    show_sql: bool,
    drain_timeout: Duration,
    disabled: ArcSwap<OrdSet<String>>,
    circuit_broken: AtomicBool,
}

impl RuntimeContext {
    /// Builds a fully formed generation.
    ///
    /// The engine is created last, so a rejected rule or registry never leaves a pool behind.
    pub fn build(
        generation: u64,
        sources: Option<&LogicalSourceMap>,
        rule: ShardingRuleConfiguration,
        props: &ShardingProperties,
    ) -> Result<Self> {
        props.validate()?;
        check_logical_sources(sources)?;
        let registry = flatten(sources);
        let rule = merge(rule, sources);
        check_rule_against_registry(&rule, &registry)?;
        let engine = ExecutionEngine::new(props.executor_size)?;

        info!(
            "Built runtime context generation {} with {} data source(s), {} high availability group(s), {} worker(s), mode {}",
            generation,
            registry.len(),
            rule.high_availability_rules.len(),
            engine.size(),
            props.connection_mode
        );

        Ok(Self {
            generation,
            created_at: Utc::now(),
            rule,
            registry,
            engine,
            connection_mode: props.connection_mode,
            show_sql: props.sql_show,
            drain_timeout: props.drain_timeout,
            disabled: ArcSwap::from_pointee(OrdSet::new()),
            circuit_broken: AtomicBool::new(false),
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn rule(&self) -> &ShardingRuleConfiguration {
        &self.rule
    }

    pub fn registry(&self) -> &DataSourceRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    pub fn connection_mode(&self) -> ConnectionMode {
        self.connection_mode
    }

    pub fn show_sql(&self) -> bool {
        self.show_sql
    }

    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    /// Replaces the set of physical sources excluded from routing.
    ///
    /// Names unknown to this generation are kept but never match a route.
    pub fn renew_disabled_data_source_names<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: OrdSet<String> = names.into_iter().map(Into::into).collect();
        for name in names.iter().filter(|name| !self.registry.contains(name)) {
            warn!("Disabled data source '{}' is not registered in generation {}", name, self.generation);
        }
        info!("Generation {} disabled data sources: {:?}", self.generation, names);
        self.disabled.store(Arc::new(names));
    }

    pub fn renew_circuit_breaker_state(&self, broken: bool) {
        let previous = self.circuit_broken.swap(broken, Ordering::SeqCst);
        if previous != broken {
            info!("Generation {} circuit breaker {}", self.generation, if broken { "opened" } else { "closed" });
        }
    }

    pub fn disabled_data_source_names(&self) -> OrdSet<String> {
        OrdSet::clone(&self.disabled.load())
    }

    pub fn is_disabled(&self, name: &str) -> bool {
        self.disabled.load().contains(name)
    }

    pub fn is_circuit_broken(&self) -> bool {
        self.circuit_broken.load(Ordering::SeqCst)
    }

    /// Routing state of a registered physical source.
    pub fn data_source_state(&self, name: &str) -> Option<DataSourceState> {
        if !self.registry.contains(name) {
            return None;
        }
        if self.is_disabled(name) {
            Some(DataSourceState::Disabled)
        } else if self.is_circuit_broken() {
            Some(DataSourceState::CircuitBroken)
        } else {
            Some(DataSourceState::Enabled)
        }
    }

    /// Registered physical sources that are not disabled, in name order.
    pub fn available_data_source_names(&self) -> Vec<String> {
        let disabled = self.disabled.load();
        self.registry
            .iter()
            .map(|source| source.name().to_string())
            .filter(|name| !disabled.contains(name))
            .collect()
    }

    /// Health-checks every physical source through the engine.
    pub async fn health_check_all(&self) -> Result<Vec<(String, Result<()>)>> {
        let names = self.registry.names();
        let units = self
            .registry
            .iter()
            .map(|source| {
                let handle = Arc::clone(source.handle());
                async move { handle.health_check().await }
            })
            .collect();
        let outcomes = self.engine.execute_settled(units).await?;
        Ok(names.into_iter().zip(outcomes).collect())
    }

    /// Takes over routing state from the generation this one replaces.
    pub(crate) fn inherit_routing_state(&self, previous: &RuntimeContext) {
        let carried: OrdSet<String> = previous
            .disabled
            .load()
            .iter()
            .filter(|name| self.registry.contains(name))
            .cloned()
            .collect();
        self.disabled.store(Arc::new(carried));
        self.circuit_broken
            .store(previous.is_circuit_broken(), Ordering::SeqCst);
    }

    /// Shuts the engine down and closes every physical source.
    ///
    /// Idempotent. Close failures are logged and the first one is returned after
    /// every source has been attempted.
    pub async fn close(&self) -> Result<()> {
        self.engine.shutdown().await;
        let mut first_error = None;
        for source in self.registry.iter() {
            if let Err(err) = source.handle().close().await {
                warn!("Failed to close data source '{}': {}", source.name(), err);
                first_error.get_or_insert(err);
            }
        }
        debug!("Closed runtime context generation {}", self.generation);
        first_error.map_or(Ok(()), Err)
    }
}

/// Every physical name must be unique across the map and distinct from every
/// group name, and a group must be keyed by its own name.
fn check_logical_sources(sources: Option<&LogicalSourceMap>) -> Result<()> {
    let Some(sources) = sources else {
        return Ok(());
    };
    let mut physical = BTreeSet::new();
    for (key, source) in sources {
        match source {
            LogicalSource::Plain(_) => {
                if !physical.insert(key.as_str()) {
                    return Err(duplicate_physical_name(key));
                }
            }
            LogicalSource::HighAvailability(group) => {
                if group.name() != key.as_str() {
                    return Err(ShardingError::EngineConstruction(format!(
                        "high availability group '{}' is registered under key '{}'",
                        group.name(),
                        key
                    )));
                }
                for member in group.members() {
                    if !physical.insert(member.name()) {
                        return Err(duplicate_physical_name(member.name()));
                    }
                }
            }
        }
    }

    let shadowed = sources
        .iter()
        .filter(|(_, source)| matches!(source, LogicalSource::HighAvailability(_)))
        .find(|(key, _)| physical.contains(key.as_str()));
    if let Some((key, _)) = shadowed {
        return Err(ShardingError::EngineConstruction(format!(
            "high availability group '{}' shares its name with a physical data source",
            key
        )));
    }
    Ok(())
}

fn duplicate_physical_name(name: &str) -> ShardingError {
    ShardingError::EngineConstruction(format!("physical data source '{}' is declared more than once", name))
}

fn check_rule_against_registry(
    rule: &ShardingRuleConfiguration,
    registry: &DataSourceRegistry,
) -> Result<()> {
    for group in &rule.high_availability_rules {
        if group.data_source_names.is_empty() {
            return Err(ShardingError::EngineConstruction(format!(
                "high availability group '{}' has no data sources",
                group.name
            )));
        }
        if let Some(missing) = group
            .data_source_names
            .iter()
            .find(|name| !registry.contains(name))
        {
            return Err(ShardingError::EngineConstruction(format!(
                "high availability group '{}' references unknown data source '{}'",
                group.name, missing
            )));
        }
    }

    for table in &rule.tables {
        if let Some(missing) = table
            .data_source_names()
            .find(|name| !registry.contains(name) && rule.high_availability_rule(name).is_none())
        {
            return Err(ShardingError::EngineConstruction(format!(
                "table '{}' references unknown data source '{}'",
                table.logic_table, missing
            )));
        }
    }

    Ok(())
}
