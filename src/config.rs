use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path};

use crate::{Error, InternalResult};

/// Evaluation limits and engine-wide settings.
///
/// Loaded once at startup and shared read-only by every evaluation. The
/// three counters are independent: the call budget is a monotone total,
/// the other two are live depths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalConfig {
    /// Total node-visit budget for one top-level evaluation.
    #[serde(default = "default_max_call_budget")]
    pub max_call_budget: u64,

    /// Maximum nesting of function calls.
    #[serde(default = "default_max_function_depth")]
    pub max_function_depth: u32,

    /// Maximum tree-walk recursion depth.
    #[serde(default = "default_max_recursion_depth")]
    pub max_recursion_depth: u32,

    /// Maximum depth of indirect (`@`) lock delegation.
    #[serde(default = "default_max_lock_depth")]
    pub max_lock_depth: u32,

    /// Fallback text when no command matches.
    #[serde(default = "default_unknown_command")]
    pub unknown_command: String,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            max_call_budget: default_max_call_budget(),
            max_function_depth: default_max_function_depth(),
            max_recursion_depth: default_max_recursion_depth(),
            max_lock_depth: default_max_lock_depth(),
            unknown_command: default_unknown_command(),
        }
    }
}

impl EvalConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> InternalResult<Self> {
        let file = File::open(path).map_err(|e| Error::internal(e.to_string()))?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader).map_err(|e| Error::internal(e.to_string()))
    }
}

fn default_max_call_budget() -> u64 {
    1_000_000
}

fn default_max_function_depth() -> u32 {
    100
}

fn default_max_recursion_depth() -> u32 {
    100_000
}

fn default_max_lock_depth() -> u32 {
    50
}

fn default_unknown_command() -> String {
    r#"Huh?  (Type "help" for help.)"#.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EvalConfig::default();
        assert_eq!(config.max_call_budget, 1_000_000);
        assert_eq!(config.max_function_depth, 100);
        assert_eq!(config.max_recursion_depth, 100_000);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: EvalConfig = serde_json::from_str(r#"{"max_function_depth": 5}"#).unwrap();
        assert_eq!(config.max_function_depth, 5);
        assert_eq!(config.max_call_budget, 1_000_000);
    }
}
