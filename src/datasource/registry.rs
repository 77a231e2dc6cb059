use super::{LogicalSource, LogicalSourceMap, PhysicalSource};
use std::collections::BTreeMap;
use std::collections::btree_map;

/// Flattened physical-source name to pool map of one generation.
#[derive(Debug, Clone, Default)]
pub struct DataSourceRegistry {
    sources: BTreeMap<String, PhysicalSource>,
}

impl DataSourceRegistry {
    pub fn get(&self, name: &str) -> Option<&PhysicalSource> {
        self.sources.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.sources.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn iter(&self) -> btree_map::Values<'_, String, PhysicalSource> {
        self.sources.values()
    }
}

/// Expands every high-availability group into its members.
///
/// Plain sources keep their logical name. Group wrappers are dropped; only their
/// member physical sources land in the registry. A missing map yields an empty
/// registry. When two entries resolve to the same physical name the one visited
/// last in name order wins.
pub fn flatten(sources: Option<&LogicalSourceMap>) -> DataSourceRegistry {
    let mut result = BTreeMap::new();
    let Some(sources) = sources else {
        return DataSourceRegistry { sources: result };
    };

    for (name, source) in sources {
        match source {
            LogicalSource::Plain(handle) => {
                result.insert(name.clone(), PhysicalSource::new(name.clone(), handle.clone()));
            }
            LogicalSource::HighAvailability(group) => {
                for member in group.members() {
                    result.insert(member.name().to_string(), member.clone());
                }
            }
        }
    }

    DataSourceRegistry { sources: result }
}
