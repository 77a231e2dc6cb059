use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How physical connections are spent on a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionMode {
    /// One physical connection per execution unit, all units in parallel.
    #[default]
    MemoryStrict,
    /// One physical connection per data source, units for that source run serially.
    ConnectionStrict,
}

impl ConnectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MemoryStrict => "MEMORY_STRICT",
            Self::ConnectionStrict => "CONNECTION_STRICT",
        }
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MEMORY_STRICT" => Ok(Self::MemoryStrict),
            "CONNECTION_STRICT" => Ok(Self::ConnectionStrict),
            other => Err(format!("unknown connection mode '{}'", other)),
        }
    }
}

/// Routing health of a physical data source within one generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataSourceState {
    Enabled,
    Disabled,
    CircuitBroken,
}
