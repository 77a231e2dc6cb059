pub mod algorithm;
pub mod alter_discovery_rule;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use algorithm::{DiscoveryAlgorithm, DiscoveryAlgorithmRegistry};
pub use alter_discovery_rule::AlterDiscoveryRuleHandler;

/// Result of a control-plane statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseHeader {
    Update(UpdateResponseHeader),
}

/// Acknowledges an applied update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateResponseHeader {
    pub affected_rules: usize,
}

impl UpdateResponseHeader {
    pub fn new(affected_rules: usize) -> Self {
        Self { affected_rules }
    }
}

/// New definition of one existing discovery group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryRuleSegment {
    pub name: String,
    pub data_source_names: Vec<String>,
    #[serde(rename = "type")]
    pub discovery_type_name: String,
    #[serde(default)]
    pub props: BTreeMap<String, String>,
}

impl DiscoveryRuleSegment {
    pub fn new<I, S>(name: impl Into<String>, data_source_names: I, discovery_type_name: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            data_source_names: data_source_names.into_iter().map(Into::into).collect(),
            discovery_type_name: discovery_type_name.into(),
            props: BTreeMap::new(),
        }
    }

    pub fn prop(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }
}

/// `ALTER DB_DISCOVERY RULE` request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlterDiscoveryRuleStatement {
    pub rules: Vec<DiscoveryRuleSegment>,
}

impl AlterDiscoveryRuleStatement {
    pub fn new(rules: Vec<DiscoveryRuleSegment>) -> Self {
        Self { rules }
    }

    pub fn rule_names(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|rule| rule.name.as_str())
    }
}
