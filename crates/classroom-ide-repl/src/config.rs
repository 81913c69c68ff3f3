//! Director configuration.

use serde::{Deserialize, Serialize};

/// Requested execution target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplMode {
    /// Backend when connected, local otherwise.
    #[default]
    Auto,
    Backend,
    #[serde(alias = "pyodide", alias = "local")]
    Browser,
}

/// How the prompt reacts to block headers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContinuationPolicy {
    /// Prompt is always `>>> `; every line runs on its own.
    #[default]
    Fixed,
    /// A line ending with `:` starts a block with prompt `... `.
    Colon,
}

/// Project name used when neither the config nor an identity names one.
pub const DEFAULT_PROJECT: &str = "repl";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorConfig {
    pub mode: ReplMode,
    pub continuation: ContinuationPolicy,
    /// Sent as `projectName` when starting a backend session. Unset means
    /// the identity's home project, or [`DEFAULT_PROJECT`] without one.
    pub project_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_uses_defaults() {
        let config: DirectorConfig = serde_json::from_str(r#"{"mode":"pyodide"}"#).unwrap();
        assert_eq!(config.mode, ReplMode::Browser);
        assert_eq!(config.continuation, ContinuationPolicy::Fixed);
        assert_eq!(config.project_name, None);
    }
}
