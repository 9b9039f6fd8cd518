//! Manipulator configuration (pojo.toml)
//!
//! Every setting has a default, so an empty file (or no file) gives the
//! standard iPOJO names.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while loading a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize TOML
    #[error("Failed to write configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// A setting has an unusable value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Complete manipulator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct ManipulatorConfig {
    /// Names used by the class rewrite
    pub manipulation: ManipulationConfig,

    /// Reference scanning settings
    pub scan: ScanConfig,
}

/// Names injected into manipulated classes
///
/// Class names are binary names (`org/apache/felix/ipojo/InstanceManager`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct ManipulationConfig {
    /// Type of the injected manager reference
    pub manager_type: String,

    /// Field holding the manager
    pub manager_field: String,

    /// Method storing the manager into its field
    pub manager_setter: String,

    /// Debug name of the injected constructor parameter
    pub manager_local_name: String,

    /// Marker interface added to every manipulated class
    pub pojo_interface: String,

    /// Return type of `getComponentInstance()`
    pub component_instance_type: String,
}

impl Default for ManipulationConfig {
    fn default() -> Self {
        Self {
            manager_type: "org/apache/felix/ipojo/InstanceManager".to_string(),
            manager_field: "_cm".to_string(),
            manager_setter: "_setManager".to_string(),
            manager_local_name: "_manager".to_string(),
            pojo_interface: "org/apache/felix/ipojo/Pojo".to_string(),
            component_instance_type: "org/apache/felix/ipojo/ComponentInstance".to_string(),
        }
    }
}

impl ManipulationConfig {
    /// Descriptor of the manager type, `L<manager-type>;`
    pub fn manager_descriptor(&self) -> String {
        format!("L{};", self.manager_type)
    }
}

/// Reference scanner settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct ScanConfig {
    /// Interface identifying bundle activators
    pub activator_type: String,

    /// Package prefixes never reported as imports
    pub excluded_prefixes: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            activator_type: "org/osgi/framework/BundleActivator".to_string(),
            excluded_prefixes: vec!["java.".to_string()],
        }
    }
}

impl ScanConfig {
    /// Whether a dotted package name is excluded from imports
    pub fn is_excluded(&self, package: &str) -> bool {
        self.excluded_prefixes
            .iter()
            .any(|prefix| package.starts_with(prefix.as_str()))
    }
}

impl ManipulatorConfig {
    /// Load a configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse a configuration from a string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: ManipulatorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration to a file
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check that every name is usable in a class file
    pub fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.manipulation;
        for (key, value) in [
            ("manager-type", &m.manager_type),
            ("pojo-interface", &m.pojo_interface),
            ("component-instance-type", &m.component_instance_type),
            ("activator-type", &self.scan.activator_type),
        ] {
            if !is_valid_binary_name(value) {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be a binary class name like org/example/Type, got '{}'",
                    key, value
                )));
            }
        }

        for (key, value) in [
            ("manager-field", &m.manager_field),
            ("manager-setter", &m.manager_setter),
            ("manager-local-name", &m.manager_local_name),
        ] {
            if !is_valid_member_name(value) {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be a plain member name, got '{}'",
                    key, value
                )));
            }
        }

        if self.scan.excluded_prefixes.iter().any(String::is_empty) {
            return Err(ConfigError::ValidationError(
                "excluded-prefixes cannot contain an empty prefix".to_string(),
            ));
        }

        Ok(())
    }
}

fn is_valid_member_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['.', ';', '[', '/', '<', '>'])
}

fn is_valid_binary_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains('.')
        && name
            .split('/')
            .all(|part| !part.is_empty() && is_valid_member_name(part))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ManipulatorConfig::from_str("").unwrap();
        assert_eq!(config, ManipulatorConfig::default());
        assert_eq!(
            config.manipulation.manager_descriptor(),
            "Lorg/apache/felix/ipojo/InstanceManager;"
        );
        assert_eq!(config.manipulation.manager_field, "_cm");
        assert!(config.scan.is_excluded("java.util"));
        assert!(!config.scan.is_excluded("javax.swing"));
    }

    #[test]
    fn test_parse_overrides() {
        let toml = r#"
[manipulation]
manager-type = "org/example/Manager"
manager-field = "__m"

[scan]
excluded-prefixes = ["java.", "javax."]
"#;

        let config = ManipulatorConfig::from_str(toml).unwrap();
        assert_eq!(config.manipulation.manager_type, "org/example/Manager");
        assert_eq!(config.manipulation.manager_field, "__m");
        assert_eq!(config.manipulation.manager_setter, "_setManager");
        assert!(config.scan.is_excluded("javax.swing"));
        assert_eq!(
            config.scan.activator_type,
            "org/osgi/framework/BundleActivator"
        );
    }

    #[test]
    fn test_rejects_dotted_class_name() {
        let toml = r#"
[manipulation]
manager-type = "org.example.Manager"
"#;

        let err = ManipulatorConfig::from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
        assert!(err.to_string().contains("manager-type"));
    }

    #[test]
    fn test_rejects_bad_member_name() {
        let mut config = ManipulatorConfig::default();
        config.manipulation.manager_setter = "<init>".to_string();
        assert!(config.validate().is_err());

        config = ManipulatorConfig::default();
        config.scan.excluded_prefixes.push(String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wrong_value_type_is_a_parse_error() {
        let err = ManipulatorConfig::from_str("[scan]\nactivator-type = 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }
}
