use super::ShardingRuleConfiguration;
use crate::datasource::{LogicalSource, LogicalSourceMap};

/// Reconciles the sharding rule with high-availability logical sources.
///
/// Explicit high-availability sub-rules win: a candidate that declares any is
/// returned unchanged. Otherwise one sub-rule per high-availability group in
/// `sources` is appended, in logical-name order.
pub fn merge(
    candidate: ShardingRuleConfiguration,
    sources: Option<&LogicalSourceMap>,
) -> ShardingRuleConfiguration {
    let Some(sources) = sources else {
        return candidate;
    };
    if !candidate.high_availability_rules.is_empty() {
        return candidate;
    }

    let mut result = candidate;
    result.high_availability_rules.extend(sources.values().filter_map(|source| match source {
        LogicalSource::HighAvailability(group) => Some(group.rule().clone()),
        LogicalSource::Plain(_) => None,
    }));
    result
}
