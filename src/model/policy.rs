use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How incoming documents interact with an existing target collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WritePolicy {
    /// Drop the target, then insert everything
    Replace,

    /// Upsert by identifier, insert documents without one
    #[default]
    Merge,

    /// Insert only; identifier collisions are skipped
    Append,
}

impl WritePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            WritePolicy::Replace => "replace",
            WritePolicy::Merge => "merge",
            WritePolicy::Append => "append",
        }
    }
}

impl fmt::Display for WritePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WritePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "replace" => Ok(WritePolicy::Replace),
            "merge" => Ok(WritePolicy::Merge),
            "append" => Ok(WritePolicy::Append),
            other => Err(ConfigError::InvalidValue {
                field: "mode".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_policy() {
        assert_eq!("replace".parse::<WritePolicy>().unwrap(), WritePolicy::Replace);
        assert_eq!(" Append ".parse::<WritePolicy>().unwrap(), WritePolicy::Append);
        assert!("upsert".parse::<WritePolicy>().is_err());
    }

    #[test]
    fn test_default_is_merge() {
        assert_eq!(WritePolicy::default(), WritePolicy::Merge);
        assert_eq!(WritePolicy::default().to_string(), "merge");
    }
}
