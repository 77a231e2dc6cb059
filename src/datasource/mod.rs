pub mod pool;
pub mod registry;

use crate::core::Result;
use crate::rule::{HighAvailabilityRuleConfiguration, PrimarySelection};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub use pool::{MemoryDataSource, PoolConfig, PoolStats};
pub use registry::{DataSourceRegistry, flatten};

/// A physical connection handed out by a [`DataSource`].
#[async_trait]
pub trait PhysicalConnection: Send {
    /// Executes one statement, returning the affected row count.
    async fn execute(&mut self, sql: &str) -> Result<u64>;
}

/// Connection-pool collaborator behind every physical source.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Acquires a connection; may wait up to a pool-specific timeout.
    async fn acquire(&self) -> Result<Box<dyn PhysicalConnection>>;

    /// Releases pool resources. Must be idempotent.
    async fn close(&self) -> Result<()>;

    /// Checks that the source is reachable.
    async fn health_check(&self) -> Result<()> {
        self.acquire().await.map(|_| ())
    }

    fn is_closed(&self) -> bool;
}

/// Named handle to a physical connection pool.
#[derive(Clone)]
pub struct PhysicalSource {
    name: String,
    handle: Arc<dyn DataSource>,
}

impl PhysicalSource {
    pub fn new(name: impl Into<String>, handle: Arc<dyn DataSource>) -> Self {
        Self {
            name: name.into(),
            handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> &Arc<dyn DataSource> {
        &self.handle
    }

    /// True if both handles point at the same pool.
    pub fn same_pool(&self, other: &PhysicalSource) -> bool {
        Arc::ptr_eq(&self.handle, &other.handle)
    }
}

impl fmt::Debug for PhysicalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysicalSource")
            .field("name", &self.name)
            .field("closed", &self.handle.is_closed())
            .finish()
    }
}

/// A set of physical sources with a primary-selection and discovery policy.
#[derive(Debug, Clone)]
pub struct HighAvailabilityGroup {
    rule: HighAvailabilityRuleConfiguration,
    members: Vec<PhysicalSource>,
}

impl HighAvailabilityGroup {
    /// Creates a group whose embedded sub-rule lists `members` in order.
    pub fn new(name: impl Into<String>, members: Vec<PhysicalSource>) -> Self {
        let rule = HighAvailabilityRuleConfiguration::new(
            name,
            members.iter().map(|m| m.name().to_string()).collect(),
        );
        Self { rule, members }
    }

    pub fn discovery_type(mut self, discovery_type: impl Into<String>) -> Self {
        self.rule.discovery_type_name = discovery_type.into();
        self
    }

    pub fn primary_selection(mut self, selection: PrimarySelection) -> Self {
        self.rule.primary_selection = selection;
        self
    }

    pub fn name(&self) -> &str {
        &self.rule.name
    }

    pub fn rule(&self) -> &HighAvailabilityRuleConfiguration {
        &self.rule
    }

    pub fn members(&self) -> &[PhysicalSource] {
        &self.members
    }
}

/// A source name visible to routing.
#[derive(Debug, Clone)]
pub enum LogicalSource {
    Plain(Arc<dyn DataSource>),
    HighAvailability(HighAvailabilityGroup),
}

/// Logical source name to source, iterated in name order.
pub type LogicalSourceMap = BTreeMap<String, LogicalSource>;

impl fmt::Debug for dyn DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataSource(closed: {})", self.is_closed())
    }
}
