use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShardingError {
    #[error("Rule(s) {rule_names:?} do not exist in schema '{schema}'")]
    RuleNotExisted {
        schema: String,
        rule_names: Vec<String>,
    },

    #[error("Resource(s) {resource_names:?} do not exist in schema '{schema}'")]
    ResourceNotExisted {
        schema: String,
        resource_names: Vec<String>,
    },

    #[error("Invalid discovery algorithm type(s) {type_names:?} in schema '{schema}'")]
    InvalidAlgorithmType {
        schema: String,
        type_names: Vec<String>,
    },

    #[error("Duplicate rule name(s) {rule_names:?} in schema '{schema}'")]
    DuplicateRuleNames {
        schema: String,
        rule_names: Vec<String>,
    },

    #[error("Engine construction failed: {0}")]
    EngineConstruction(String),

    #[error("Unknown schema '{0}'")]
    UnknownSchema(String),

    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    #[error("Invalid value '{value}' for property '{key}'")]
    InvalidProperty { key: String, value: String },

    #[error("Invalid data source configuration: {0}")]
    Configuration(String),

    #[error("Data source '{0}' not found")]
    DataSourceNotFound(String),

    #[error("Data source '{0}' is unavailable")]
    DataSourceUnavailable(String),

    #[error("Connection pool timeout: {0}")]
    PoolTimeout(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Execution engine is shut down")]
    EngineShutdown,

    #[error("Sharding data source is closed")]
    Closed,
}

/// Fieldless discriminant of [`ShardingError`].
///
/// Lets control-plane clients branch on the failure kind without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    RuleNotExisted,
    ResourceNotExisted,
    InvalidAlgorithmType,
    DuplicateRuleNames,
    EngineConstruction,
    UnknownSchema,
    InvalidRule,
    InvalidProperty,
    Configuration,
    DataSourceNotFound,
    DataSourceUnavailable,
    PoolTimeout,
    Execution,
    EngineShutdown,
    Closed,
}

impl ShardingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RuleNotExisted { .. } => ErrorKind::RuleNotExisted,
            Self::ResourceNotExisted { .. } => ErrorKind::ResourceNotExisted,
            Self::InvalidAlgorithmType { .. } => ErrorKind::InvalidAlgorithmType,
            Self::DuplicateRuleNames { .. } => ErrorKind::DuplicateRuleNames,
            Self::EngineConstruction(_) => ErrorKind::EngineConstruction,
            Self::UnknownSchema(_) => ErrorKind::UnknownSchema,
            Self::InvalidRule(_) => ErrorKind::InvalidRule,
            Self::InvalidProperty { .. } => ErrorKind::InvalidProperty,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::DataSourceNotFound(_) => ErrorKind::DataSourceNotFound,
            Self::DataSourceUnavailable(_) => ErrorKind::DataSourceUnavailable,
            Self::PoolTimeout(_) => ErrorKind::PoolTimeout,
            Self::Execution(_) => ErrorKind::Execution,
            Self::EngineShutdown => ErrorKind::EngineShutdown,
            Self::Closed => ErrorKind::Closed,
        }
    }
}

pub type Result<T> = std::result::Result<T, ShardingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        let err = ShardingError::ResourceNotExisted {
            schema: "test".into(),
            resource_names: vec!["ds_9".into()],
        };
        assert_eq!(err.kind(), ErrorKind::ResourceNotExisted);
        assert!(err.to_string().contains("ds_9"));
    }
}
