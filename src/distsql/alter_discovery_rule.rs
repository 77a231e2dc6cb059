use super::{AlterDiscoveryRuleStatement, DiscoveryAlgorithmRegistry, ResponseHeader, UpdateResponseHeader};
use crate::core::{Result, ShardingError};
use crate::metadata::{MetaDataContexts, SchemaMetaData};
use crate::rule::{AlgorithmConfiguration, DiscoveryRuleConfiguration, RuleConfiguration};
use log::{debug, info};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Applies `ALTER DB_DISCOVERY RULE` to a schema's discovery rule.
///
/// Checks run in a fixed order so a request that fails several of them always
/// reports the same error: group existence, duplicate names, empty groups,
/// resource existence, then algorithm types. Nothing is written unless every
/// check passes; the altered rule is then published with one map insert while
/// the metadata write lock is held.
pub struct AlterDiscoveryRuleHandler {
    metadata: Arc<MetaDataContexts>,
    algorithms: Arc<DiscoveryAlgorithmRegistry>,
}

impl AlterDiscoveryRuleHandler {
    pub fn new(metadata: Arc<MetaDataContexts>, algorithms: Arc<DiscoveryAlgorithmRegistry>) -> Self {
        Self { metadata, algorithms }
    }

    pub async fn execute(&self, schema_name: &str, statement: &AlterDiscoveryRuleStatement) -> Result<ResponseHeader> {
        let mut schemas = self.metadata.write().await;
        let schema = schemas
            .get(schema_name)
            .cloned()
            .ok_or_else(|| ShardingError::UnknownSchema(schema_name.to_string()))?;

        let (index, current) = match schema.discovery_rule() {
            Some(found) => found,
            None => {
                return Err(ShardingError::RuleNotExisted {
                    schema: schema_name.to_string(),
                    rule_names: distinct(statement.rule_names()),
                });
            }
        };

        check_rules_existed(schema_name, current, statement)?;
        check_duplicate_rule_names(schema_name, statement)?;
        check_groups_not_empty(statement)?;
        check_resources_existed(&schema, statement)?;
        self.check_discovery_types(schema_name, statement)?;

        let altered = alter(current, statement);
        let next = schema.with_rule_replaced(index, RuleConfiguration::Discovery(altered));
        info!(
            "Altered discovery rules [{}] of schema '{}', version {} -> {}",
            distinct(statement.rule_names()).join(", "),
            schema_name,
            schema.version(),
            next.version()
        );
        schemas.insert(schema_name.to_string(), Arc::new(next));

        Ok(ResponseHeader::Update(UpdateResponseHeader::new(statement.rules.len())))
    }

    fn check_discovery_types(&self, schema_name: &str, statement: &AlterDiscoveryRuleStatement) -> Result<()> {
        let invalid = distinct(
            statement
                .rules
                .iter()
                .map(|rule| rule.discovery_type_name.as_str())
                .filter(|type_name| !self.algorithms.contains(type_name)),
        );
        if invalid.is_empty() {
            return Ok(());
        }
        Err(ShardingError::InvalidAlgorithmType {
            schema: schema_name.to_string(),
            type_names: invalid,
        })
    }
}

fn check_rules_existed(
    schema_name: &str,
    current: &DiscoveryRuleConfiguration,
    statement: &AlterDiscoveryRuleStatement,
) -> Result<()> {
    let existing: BTreeSet<&str> = current.group_names().collect();
    let missing = distinct(statement.rule_names().filter(|name| !existing.contains(name)));
    if missing.is_empty() {
        return Ok(());
    }
    Err(ShardingError::RuleNotExisted {
        schema: schema_name.to_string(),
        rule_names: missing,
    })
}

fn check_duplicate_rule_names(schema_name: &str, statement: &AlterDiscoveryRuleStatement) -> Result<()> {
    let mut seen = BTreeSet::new();
    let duplicated = distinct(statement.rule_names().filter(|name| !seen.insert(*name)));
    if duplicated.is_empty() {
        return Ok(());
    }
    Err(ShardingError::DuplicateRuleNames {
        schema: schema_name.to_string(),
        rule_names: duplicated,
    })
}

fn check_groups_not_empty(statement: &AlterDiscoveryRuleStatement) -> Result<()> {
    match statement.rules.iter().find(|rule| rule.data_source_names.is_empty()) {
        Some(rule) => Err(ShardingError::InvalidRule(format!(
            "discovery rule '{}' must reference at least one resource",
            rule.name
        ))),
        None => Ok(()),
    }
}

fn check_resources_existed(schema: &SchemaMetaData, statement: &AlterDiscoveryRuleStatement) -> Result<()> {
    let missing = distinct(
        statement
            .rules
            .iter()
            .flat_map(|rule| rule.data_source_names.iter().map(String::as_str))
            .filter(|name| !schema.contains_resource(name)),
    );
    if missing.is_empty() {
        return Ok(());
    }
    Err(ShardingError::ResourceNotExisted {
        schema: schema.name().to_string(),
        resource_names: missing,
    })
}

/// Replaces the named groups in place and rewrites the algorithm map.
fn alter(current: &DiscoveryRuleConfiguration, statement: &AlterDiscoveryRuleStatement) -> DiscoveryRuleConfiguration {
    let mut altered = current.clone();
    let mut replaced_keys = Vec::new();

    for segment in &statement.rules {
        let Some(group) = altered.data_sources.iter_mut().find(|group| group.name == segment.name) else {
            continue;
        };
        let key = discovery_type_key(&segment.name, &segment.discovery_type_name);
        if group.discovery_type_name != key {
            replaced_keys.push(std::mem::take(&mut group.discovery_type_name));
        }
        group.data_source_names = segment.data_source_names.clone();
        group.discovery_type_name = key.clone();
        altered.discovery_types.insert(
            key,
            AlgorithmConfiguration::new(segment.discovery_type_name.clone(), segment.props.clone()),
        );
    }

    for key in replaced_keys {
        let referenced = altered.data_sources.iter().any(|group| group.discovery_type_name == key);
        if !referenced && altered.discovery_types.remove(&key).is_some() {
            debug!("Dropped unused discovery type '{}'", key);
        }
    }
    altered
}

fn discovery_type_key(group_name: &str, type_name: &str) -> String {
    format!("{}_{}", group_name, type_name)
}

/// Names in first-seen order without repeats.
fn distinct<'a>(names: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();
    for name in names {
        if !result.iter().any(|existing| existing == name) {
            result.push(name.to_string());
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorKind;
    use crate::distsql::{DiscoveryAlgorithm, DiscoveryRuleSegment};
    use crate::rule::HighAvailabilityRuleConfiguration;
    use std::collections::BTreeMap;

    struct TestDiscovery;

    impl DiscoveryAlgorithm for TestDiscovery {
        fn type_name(&self) -> &str {
            "TEST"
        }
    }

    fn group(name: &str, members: &[&str], type_key: &str) -> HighAvailabilityRuleConfiguration {
        let mut group = HighAvailabilityRuleConfiguration::new(name, members.iter().map(|m| m.to_string()).collect());
        group.discovery_type_name = type_key.to_string();
        group
    }

    fn discovery_rule(groups: Vec<HighAvailabilityRuleConfiguration>) -> DiscoveryRuleConfiguration {
        let discovery_types = groups
            .iter()
            .filter(|group| !group.discovery_type_name.is_empty())
            .map(|group| {
                (
                    group.discovery_type_name.clone(),
                    AlgorithmConfiguration::new("TEST", BTreeMap::new()),
                )
            })
            .collect();
        DiscoveryRuleConfiguration {
            data_sources: groups,
            discovery_types,
        }
    }

    async fn handler_with(rules: Vec<RuleConfiguration>) -> (AlterDiscoveryRuleHandler, Arc<MetaDataContexts>) {
        let metadata = Arc::new(MetaDataContexts::new());
        metadata
            .add_schema(SchemaMetaData::new("test", ["ds_0", "ds_1", "ds_2"], rules))
            .await;
        let mut algorithms = DiscoveryAlgorithmRegistry::new();
        algorithms.register(Arc::new(TestDiscovery));
        (
            AlterDiscoveryRuleHandler::new(metadata.clone(), Arc::new(algorithms)),
            metadata,
        )
    }

    fn alter_statement(segments: Vec<DiscoveryRuleSegment>) -> AlterDiscoveryRuleStatement {
        AlterDiscoveryRuleStatement::new(segments)
    }

    #[tokio::test]
    async fn test_alter_existing_group() {
        let rule = discovery_rule(vec![group("ha_group", &["ds_0", "ds_1"], "ha_group_TEST")]);
        let (handler, metadata) = handler_with(vec![RuleConfiguration::Discovery(rule)]).await;

        let response = handler
            .execute(
                "test",
                &alter_statement(vec![DiscoveryRuleSegment::new("ha_group", ["ds_0", "ds_1"], "TEST")]),
            )
            .await
            .unwrap();

        assert_eq!(response, ResponseHeader::Update(UpdateResponseHeader::new(1)));
        let schema = metadata.schema("test").await.unwrap();
        assert_eq!(schema.version(), 2);
        let (_, altered) = schema.discovery_rule().unwrap();
        assert_eq!(altered.data_sources[0].data_source_names, vec!["ds_0", "ds_1"]);
        assert_eq!(altered.discovery_types["ha_group_TEST"].type_name, "TEST");
    }

    #[tokio::test]
    async fn test_no_discovery_rule_configured() {
        let (handler, _) = handler_with(Vec::new()).await;

        let err = handler
            .execute(
                "test",
                &alter_statement(vec![DiscoveryRuleSegment::new("ha_group", ["ds_0"], "TEST")]),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::RuleNotExisted);
    }

    #[tokio::test]
    async fn test_discovery_rule_without_groups() {
        let (handler, _) = handler_with(vec![RuleConfiguration::Discovery(DiscoveryRuleConfiguration::default())]).await;

        let err = handler
            .execute(
                "test",
                &alter_statement(vec![DiscoveryRuleSegment::new("ha_group", ["ds_0", "ds_1"], "TEST")]),
            )
            .await
            .unwrap_err();

        match err {
            ShardingError::RuleNotExisted { schema, rule_names } => {
                assert_eq!(schema, "test");
                assert_eq!(rule_names, vec!["ha_group"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_resources_are_listed() {
        let rule = discovery_rule(vec![group("ha_group", &["ds_0", "ds_1"], "ha_group_TEST")]);
        let (handler, metadata) = handler_with(vec![RuleConfiguration::Discovery(rule)]).await;

        let err = handler
            .execute(
                "test",
                &alter_statement(vec![DiscoveryRuleSegment::new("ha_group", ["ds_0", "ds_9", "ds_9"], "TEST")]),
            )
            .await
            .unwrap_err();

        match err {
            ShardingError::ResourceNotExisted { resource_names, .. } => assert_eq!(resource_names, vec!["ds_9"]),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(metadata.schema("test").await.unwrap().version(), 1);
    }

    #[tokio::test]
    async fn test_invalid_discovery_type_after_resources_pass() {
        let rule = discovery_rule(vec![group("ha_group", &["ds_0", "ds_1"], "ha_group_TEST")]);
        let (handler, _) = handler_with(vec![RuleConfiguration::Discovery(rule)]).await;

        let err = handler
            .execute(
                "test",
                &alter_statement(vec![DiscoveryRuleSegment::new("ha_group", ["ds_0", "ds_1"], "notExistType")]),
            )
            .await
            .unwrap_err();
        match err {
            ShardingError::InvalidAlgorithmType { type_names, .. } => assert_eq!(type_names, vec!["notExistType"]),
            other => panic!("unexpected error: {other}"),
        }

        let err = handler
            .execute(
                "test",
                &alter_statement(vec![DiscoveryRuleSegment::new("ha_group", ["ds_9"], "notExistType")]),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceNotExisted);
    }

    #[tokio::test]
    async fn test_rule_existence_checked_before_resources() {
        let rule = discovery_rule(vec![group("ha_group", &["ds_0", "ds_1"], "ha_group_TEST")]);
        let (handler, _) = handler_with(vec![RuleConfiguration::Discovery(rule)]).await;

        let err = handler
            .execute(
                "test",
                &alter_statement(vec![
                    DiscoveryRuleSegment::new("ha_group", ["ds_9"], "notExistType"),
                    DiscoveryRuleSegment::new("missing_group", ["ds_8"], "notExistType"),
                ]),
            )
            .await
            .unwrap_err();

        match err {
            ShardingError::RuleNotExisted { rule_names, .. } => assert_eq!(rule_names, vec!["missing_group"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_and_empty_groups_rejected() {
        let rule = discovery_rule(vec![group("ha_group", &["ds_0", "ds_1"], "ha_group_TEST")]);
        let (handler, _) = handler_with(vec![RuleConfiguration::Discovery(rule)]).await;

        let err = handler
            .execute(
                "test",
                &alter_statement(vec![
                    DiscoveryRuleSegment::new("ha_group", ["ds_0"], "TEST"),
                    DiscoveryRuleSegment::new("ha_group", ["ds_1"], "TEST"),
                ]),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateRuleNames);

        let err = handler
            .execute(
                "test",
                &alter_statement(vec![DiscoveryRuleSegment::new("ha_group", Vec::<String>::new(), "TEST")]),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRule);
    }

    #[tokio::test]
    async fn test_unknown_schema() {
        let (handler, _) = handler_with(Vec::new()).await;

        let err = handler
            .execute("missing", &alter_statement(Vec::new()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownSchema);
    }

    #[tokio::test]
    async fn test_alter_replaces_in_place_and_keeps_other_groups() {
        let rule = discovery_rule(vec![
            group("ha_a", &["ds_0"], "ha_a_TEST"),
            group("ha_b", &["ds_1"], "ha_b_TEST"),
            group("ha_c", &["ds_2"], "ha_c_TEST"),
        ]);
        let sharding = RuleConfiguration::Sharding(crate::rule::ShardingRuleConfiguration::new("sharding"));
        let (_, metadata) = handler_with(vec![sharding.clone(), RuleConfiguration::Discovery(rule)]).await;

        let mut algorithms = DiscoveryAlgorithmRegistry::new();
        algorithms.register(Arc::new(TestDiscovery));
        struct Mgr;
        impl DiscoveryAlgorithm for Mgr {
            fn type_name(&self) -> &str {
                "MGR"
            }
        }
        algorithms.register(Arc::new(Mgr));
        let handler = AlterDiscoveryRuleHandler::new(metadata.clone(), Arc::new(algorithms));

        handler
            .execute(
                "test",
                &alter_statement(vec![
                    DiscoveryRuleSegment::new("ha_b", ["ds_1", "ds_2"], "mgr").prop("group-name", "92504d5b"),
                ]),
            )
            .await
            .unwrap();

        let schema = metadata.schema("test").await.unwrap();
        assert_eq!(schema.rules()[0], sharding);
        let (index, altered) = schema.discovery_rule().unwrap();
        assert_eq!(index, 1);
        assert_eq!(altered.group_names().collect::<Vec<_>>(), vec!["ha_a", "ha_b", "ha_c"]);
        assert_eq!(altered.data_sources[0].data_source_names, vec!["ds_0"]);
        assert_eq!(altered.data_sources[1].data_source_names, vec!["ds_1", "ds_2"]);
        assert_eq!(altered.data_sources[1].discovery_type_name, "ha_b_mgr");
        assert_eq!(altered.discovery_types["ha_b_mgr"].props["group-name"], "92504d5b");
        assert!(!altered.discovery_types.contains_key("ha_b_TEST"));
        assert!(altered.discovery_types.contains_key("ha_a_TEST"));
        assert!(altered.discovery_types.contains_key("ha_c_TEST"));
    }

    #[tokio::test]
    async fn test_shared_discovery_type_survives_when_still_referenced() {
        let rule = discovery_rule(vec![
            group("ha_a", &["ds_0"], "shared"),
            group("ha_b", &["ds_1"], "shared"),
        ]);
        let (handler, metadata) = handler_with(vec![RuleConfiguration::Discovery(rule)]).await;

        handler
            .execute(
                "test",
                &alter_statement(vec![DiscoveryRuleSegment::new("ha_a", ["ds_0"], "TEST")]),
            )
            .await
            .unwrap();

        let schema = metadata.schema("test").await.unwrap();
        let (_, altered) = schema.discovery_rule().unwrap();
        assert!(altered.discovery_types.contains_key("shared"));
        assert!(altered.discovery_types.contains_key("ha_a_TEST"));
    }

    #[test]
    fn test_distinct_keeps_first_seen_order() {
        assert_eq!(distinct(["b", "a", "b", "c", "a"].into_iter()), vec!["b", "a", "c"]);
    }
}
