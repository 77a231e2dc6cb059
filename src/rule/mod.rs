pub mod merger;

use crate::core::{Result, ShardingError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use merger::merge;

/// How the primary of a high-availability group is chosen.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PrimarySelection {
    /// The first listed member is primary.
    #[default]
    FirstMember,
    /// A specific member is primary.
    Named(String),
}

/// One high-availability (discovery) group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighAvailabilityRuleConfiguration {
    pub name: String,
    pub data_source_names: Vec<String>,
    #[serde(default)]
    pub primary_selection: PrimarySelection,
    #[serde(default)]
    pub discovery_type_name: String,
}

impl HighAvailabilityRuleConfiguration {
    pub fn new(name: impl Into<String>, data_source_names: Vec<String>) -> Self {
        Self {
            name: name.into(),
            data_source_names,
            primary_selection: PrimarySelection::FirstMember,
            discovery_type_name: String::new(),
        }
    }

    /// Resolves the primary member.
    ///
    /// A `Named` primary that is not a member falls back to the first member.
    pub fn primary_data_source_name(&self) -> Option<&str> {
        if let PrimarySelection::Named(name) = &self.primary_selection {
            if let Some(found) = self.data_source_names.iter().find(|n| *n == name) {
                return Some(found.as_str());
            }
        }
        self.data_source_names.first().map(String::as_str)
    }
}

/// Logic table placement, `actual_data_nodes` entries are `<data source>.<table>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRuleConfiguration {
    pub logic_table: String,
    pub actual_data_nodes: Vec<String>,
}

impl TableRuleConfiguration {
    /// Data source part of every actual data node
    pub fn data_source_names(&self) -> impl Iterator<Item = &str> {
        self.actual_data_nodes
            .iter()
            .map(|node| node.split_once('.').map_or(node.as_str(), |(ds, _)| ds))
    }
}

/// Top-level sharding rule consumed by the runtime context.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShardingRuleConfiguration {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tables: Vec<TableRuleConfiguration>,
    #[serde(default)]
    pub high_availability_rules: Vec<HighAvailabilityRuleConfiguration>,
}

impl ShardingRuleConfiguration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn high_availability_rule(&self, name: &str) -> Option<&HighAvailabilityRuleConfiguration> {
        self.high_availability_rules.iter().find(|rule| rule.name == name)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ShardingError::InvalidRule(format!("sharding rule: {}", e)))
    }
}

/// A discovery algorithm type with its properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlgorithmConfiguration {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub props: BTreeMap<String, String>,
}

impl AlgorithmConfiguration {
    pub fn new(type_name: impl Into<String>, props: BTreeMap<String, String>) -> Self {
        Self {
            type_name: type_name.into(),
            props,
        }
    }
}

/// Database discovery rule of a schema.
///
/// Each group's `discovery_type_name` is a key into `discovery_types`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiscoveryRuleConfiguration {
    #[serde(default)]
    pub data_sources: Vec<HighAvailabilityRuleConfiguration>,
    #[serde(default)]
    pub discovery_types: BTreeMap<String, AlgorithmConfiguration>,
}

impl DiscoveryRuleConfiguration {
    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.data_sources.iter().map(|group| group.name.as_str())
    }
}

/// Any rule configuration a schema can carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleConfiguration {
    Sharding(ShardingRuleConfiguration),
    Discovery(DiscoveryRuleConfiguration),
}

impl RuleConfiguration {
    pub fn as_discovery(&self) -> Option<&DiscoveryRuleConfiguration> {
        match self {
            Self::Discovery(config) => Some(config),
            _ => None,
        }
    }

    /// Loads a rule tagged by `kind` (`sharding` or `discovery`).
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ShardingError::InvalidRule(format!("rule configuration: {}", e)))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ShardingError::InvalidRule(format!("rule configuration: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorKind;

    #[test]
    fn test_primary_selection() {
        let mut rule = HighAvailabilityRuleConfiguration::new("ha", vec!["ds_0".into(), "ds_1".into()]);
        assert_eq!(rule.primary_data_source_name(), Some("ds_0"));

        rule.primary_selection = PrimarySelection::Named("ds_1".into());
        assert_eq!(rule.primary_data_source_name(), Some("ds_1"));

        rule.primary_selection = PrimarySelection::Named("ds_9".into());
        assert_eq!(rule.primary_data_source_name(), Some("ds_0"));
    }

    #[test]
    fn test_table_rule_data_source_names() {
        let table = TableRuleConfiguration {
            logic_table: "t_order".into(),
            actual_data_nodes: vec!["ds_0.t_order_0".into(), "ds_1.t_order_1".into(), "ds_2".into()],
        };
        assert_eq!(table.data_source_names().collect::<Vec<_>>(), vec!["ds_0", "ds_1", "ds_2"]);
    }

    #[test]
    fn test_rule_configuration_from_json() {
        let json = r#"{
            "kind": "discovery",
            "data_sources": [
                {"name": "ha_group", "data_source_names": ["ds_0", "ds_1"], "discovery_type_name": "ha_group_mgr"}
            ],
            "discovery_types": {"ha_group_mgr": {"type": "MGR", "props": {"group-name": "abc"}}}
        }"#;
        let config = RuleConfiguration::from_json(json).unwrap();
        let discovery = config.as_discovery().unwrap();

        assert_eq!(discovery.group_names().collect::<Vec<_>>(), vec!["ha_group"]);
        assert_eq!(discovery.discovery_types["ha_group_mgr"].type_name, "MGR");
        assert_eq!(discovery.data_sources[0].primary_selection, PrimarySelection::FirstMember);

        let reloaded = RuleConfiguration::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_sharding_rule_from_json() {
        let rule = ShardingRuleConfiguration::from_json(
            r#"{"name": "sharding", "tables": [{"logic_table": "t_order", "actual_data_nodes": ["ha_group.t_order_0"]}]}"#,
        )
        .unwrap();
        assert_eq!(rule.name, "sharding");
        assert!(rule.high_availability_rules.is_empty());
        assert_eq!(rule.tables[0].data_source_names().collect::<Vec<_>>(), vec!["ha_group"]);
    }

    #[test]
    fn test_malformed_json_is_invalid_rule() {
        let err = RuleConfiguration::from_json(r#"{"kind": "replica_query"}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRule);
        let err = ShardingRuleConfiguration::from_json("{").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRule);
    }
}
