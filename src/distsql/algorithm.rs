use std::collections::HashMap;
use std::sync::Arc;

/// A database discovery algorithm, looked up by type name.
pub trait DiscoveryAlgorithm: Send + Sync {
    fn type_name(&self) -> &str;
}

/// Registered discovery algorithms. Type names are matched case-insensitively.
#[derive(Default)]
pub struct DiscoveryAlgorithmRegistry {
    algorithms: HashMap<String, Arc<dyn DiscoveryAlgorithm>>,
}

impl DiscoveryAlgorithmRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, algorithm: Arc<dyn DiscoveryAlgorithm>) {
        log::debug!("Registered discovery algorithm: {}", algorithm.type_name());
        self.algorithms
            .insert(algorithm.type_name().to_ascii_uppercase(), algorithm);
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.algorithms.contains_key(&type_name.to_ascii_uppercase())
    }

    pub fn get(&self, type_name: &str) -> Option<Arc<dyn DiscoveryAlgorithm>> {
        self.algorithms.get(&type_name.to_ascii_uppercase()).cloned()
    }

    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .algorithms
            .values()
            .map(|algorithm| algorithm.type_name().to_string())
            .collect();
        names.sort();
        names
    }
}
