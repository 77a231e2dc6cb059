// ============================================================================
// ShardMesh Library
// ============================================================================

//! Runtime core of a sharding middleware: one logical database over many
//! physical data sources.
//!
//! [`ShardingDataSource`] publishes a [`RuntimeContext`] generation (merged
//! rule, flattened data-source registry, bounded [`ExecutionEngine`]) and
//! hot-swaps it on [`renew`](ShardingDataSource::renew). Connections pin the
//! generation they were opened on. [`AlterDiscoveryRuleHandler`] validates and
//! commits discovery rule changes against [`MetaDataContexts`].

pub mod config;
pub mod connection;
pub mod context;
pub mod core;
pub mod datasource;
pub mod distsql;
pub mod executor;
pub mod metadata;
pub mod rule;

// Re-export main types for convenience
pub use config::ShardingProperties;
pub use context::{RuntimeContext, ShardingDataSource};
pub use core::{ConnectionMode, DataSourceState, ErrorKind, Result, ShardingError};
pub use executor::ExecutionEngine;

// Re-export data source API
pub use connection::{ExecutionResult, ShardingConnection, SqlUnit};
pub use datasource::{
    DataSource, DataSourceRegistry, HighAvailabilityGroup, LogicalSource, LogicalSourceMap,
    MemoryDataSource, PhysicalConnection, PhysicalSource, PoolConfig, PoolStats, flatten,
};

// Re-export rule and control-plane API
pub use distsql::{
    AlterDiscoveryRuleHandler, AlterDiscoveryRuleStatement, DiscoveryAlgorithm,
    DiscoveryAlgorithmRegistry, DiscoveryRuleSegment, ResponseHeader, UpdateResponseHeader,
};
pub use metadata::{MetaDataContexts, SchemaMetaData};
pub use rule::{
    AlgorithmConfiguration, DiscoveryRuleConfiguration, HighAvailabilityRuleConfiguration,
    PrimarySelection, RuleConfiguration, ShardingRuleConfiguration, TableRuleConfiguration, merge,
};
