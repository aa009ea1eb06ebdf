// Runtime configuration
// Loaded from a JSON document such as `invoker.json`; every field is optional

use crate::error::ConfigError;
use crate::layout::EnumRule;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Compiler convention used when sizing enumerations
    pub enum_rule: EnumRule,
    /// Directories tried, in order, before the plain library name
    pub library_search_paths: Vec<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            enum_rule: EnumRule::host(),
            library_search_paths: Vec::new(),
        }
    }
}

impl RuntimeConfig {
    pub fn with_enum_rule(mut self, rule: EnumRule) -> Self {
        self.enum_rule = rule;
        self
    }

    pub fn with_search_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.library_search_paths.push(dir.into());
        self
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json_str(&content)?;
        tracing::debug!(path = %path.display(), rule = ?config.enum_rule, "loaded runtime config");
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = RuntimeConfig::from_json_str("{}").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.enum_rule, EnumRule::host());
    }

    #[test]
    fn test_parse_all_fields() {
        let config = RuntimeConfig::from_json_str(
            r#"{ "enum_rule": "msvc", "library_search_paths": ["/opt/lib", "vendor"] }"#,
        )
        .unwrap();
        assert_eq!(config.enum_rule, EnumRule::Msvc);
        assert_eq!(
            config.library_search_paths,
            vec![PathBuf::from("/opt/lib"), PathBuf::from("vendor")]
        );
    }

    #[test]
    fn test_unknown_rule_is_rejected() {
        let err = RuntimeConfig::from_json_str(r#"{ "enum_rule": "borland" }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = RuntimeConfig::from_file(Path::new("/nonexistent/invoker.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_file_round_trip() {
        let config = RuntimeConfig::default()
            .with_enum_rule(EnumRule::GnuShortEnums)
            .with_search_path("/usr/local/lib");
        let path = std::env::temp_dir().join(format!("invoker-config-{}.json", std::process::id()));
        fs::write(&path, config.to_json_string().unwrap()).unwrap();
        let loaded = RuntimeConfig::from_file(&path).unwrap();
        let _ = fs::remove_file(&path);
        assert_eq!(loaded, config);
    }
}
