use crate::context::RuntimeContext;
use crate::core::{Result, ShardingError};
use crate::rule::{DiscoveryRuleConfiguration, RuleConfiguration};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockWriteGuard};

/// Resources and rule configurations of one logical schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaMetaData {
    name: String,
    resources: BTreeSet<String>,
    rules: Vec<RuleConfiguration>,
    version: u64,
}

impl SchemaMetaData {
    pub fn new<I, S>(name: impl Into<String>, resources: I, rules: Vec<RuleConfiguration>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            resources: resources.into_iter().map(Into::into).collect(),
            rules,
            version: 1,
        }
    }

    /// Schema whose resources are the physical sources of `context` and whose
    /// only rule is its merged sharding rule.
    pub fn from_context(name: impl Into<String>, context: &RuntimeContext) -> Self {
        Self::new(
            name,
            context.registry().names(),
            vec![RuleConfiguration::Sharding(context.rule().clone())],
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resources(&self) -> &BTreeSet<String> {
        &self.resources
    }

    pub fn contains_resource(&self, name: &str) -> bool {
        self.resources.contains(name)
    }

    pub fn rules(&self) -> &[RuleConfiguration] {
        &self.rules
    }

    /// Bumped on every committed rule change.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Position and content of the discovery rule, if the schema has one.
    pub fn discovery_rule(&self) -> Option<(usize, &DiscoveryRuleConfiguration)> {
        self.rules
            .iter()
            .enumerate()
            .find_map(|(index, rule)| rule.as_discovery().map(|config| (index, config)))
    }

    /// Copy with the rule at `index` replaced and the version bumped.
    pub(crate) fn with_rule_replaced(&self, index: usize, rule: RuleConfiguration) -> Self {
        let mut next = self.clone();
        next.rules[index] = rule;
        next.version = self.version.saturating_add(1);
        next
    }
}

/// Metadata of every schema served.
///
/// Readers get `Arc` snapshots; a control-plane writer holds the write guard
/// across validation and commit so a change is applied as one unit.
#[derive(Debug, Default)]
pub struct MetaDataContexts {
    schemas: RwLock<HashMap<String, Arc<SchemaMetaData>>>,
}

impl MetaDataContexts {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_schema(&self, schema: SchemaMetaData) {
        let mut schemas = self.schemas.write().await;
        schemas.insert(schema.name().to_string(), Arc::new(schema));
    }

    pub async fn remove_schema(&self, name: &str) -> Option<Arc<SchemaMetaData>> {
        self.schemas.write().await.remove(name)
    }

    pub async fn schema(&self, name: &str) -> Result<Arc<SchemaMetaData>> {
        self.schemas
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ShardingError::UnknownSchema(name.to_string()))
    }

    pub async fn schema_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.schemas.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<SchemaMetaData>>> {
        self.schemas.write().await
    }
}
