//! Per-project configuration as read from `buildsettings.json`.

use crate::error::{Error, Result};
use crate::layout::{CONFIG_FILE_NAME, DEFAULT_DEPLOYMENT_FILE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Raw shape of the configuration file. Unknown keys are ignored.
#[derive(Debug, Clone, Deserialize, Serialize)]
struct ConfigurationFile {
    servicename: String,
    #[serde(default)]
    cluster: String,
    #[serde(default)]
    deploymentfile: Option<String>,
    #[serde(default)]
    builder: Option<Value>,
}

/// Opaque builder payload discriminated by its `type` field.
///
/// Each builder deserializes its own options from it; the dispatcher only
/// looks at the tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuilderSpec(Value);

impl BuilderSpec {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// The declared builder type. Missing or null `type` reads as `""`.
    pub fn tag(&self) -> &str {
        self.0.get("type").and_then(Value::as_str).unwrap_or("")
    }

    /// Deserialize builder-specific options.
    pub fn options<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.0.clone())
            .map_err(|e| Error::config(format!("Invalid '{}' builder options: {}", self.tag(), e)))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

impl Default for BuilderSpec {
    fn default() -> Self {
        Self(Value::Object(Default::default()))
    }
}

/// A discovered project. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectConfiguration {
    pub service_name: String,
    pub cluster: String,
    pub deployment_file: Option<String>,
    pub builder: BuilderSpec,
    /// Root of the scanned source tree; context paths are relative to it.
    pub source_root: PathBuf,
    /// Directory containing the configuration file, relative to `source_root`.
    pub project_path: PathBuf,
}

impl ProjectConfiguration {
    /// Parse configuration file content found in `project_path`.
    pub fn parse(content: &str, source_root: &Path, project_path: &Path) -> Result<Self> {
        let file: ConfigurationFile = serde_json::from_str(content).map_err(|e| {
            Error::config(format!(
                "Failed to parse {} in {}: {}",
                CONFIG_FILE_NAME,
                project_path.display(),
                e
            ))
        })?;

        if file.servicename.trim().is_empty() {
            return Err(Error::config(format!(
                "Empty servicename in {}",
                project_path.join(CONFIG_FILE_NAME).display()
            )));
        }

        let builder = match file.builder {
            None | Some(Value::Null) => BuilderSpec::default(),
            Some(value @ Value::Object(_)) => {
                match value.get("type") {
                    None | Some(Value::Null) | Some(Value::String(_)) => {}
                    Some(other) => {
                        return Err(Error::config(format!(
                            "Builder type must be a string in {}, got {}",
                            project_path.display(),
                            other
                        )))
                    }
                }
                BuilderSpec::new(value)
            }
            Some(other) => {
                return Err(Error::config(format!(
                    "Builder must be an object in {}, got {}",
                    project_path.display(),
                    other
                )))
            }
        };

        Ok(Self {
            service_name: file.servicename,
            cluster: file.cluster,
            deployment_file: file.deploymentfile.filter(|f| !f.is_empty()),
            builder,
            source_root: source_root.to_path_buf(),
            project_path: normalize_project_path(project_path),
        })
    }

    /// Absolute (or cwd-relative) location of the project directory.
    pub fn project_dir(&self) -> PathBuf {
        self.source_root.join(&self.project_path)
    }

    pub fn config_file_path(&self) -> PathBuf {
        self.project_dir().join(CONFIG_FILE_NAME)
    }

    pub fn deployment_file_path(&self) -> PathBuf {
        self.project_dir().join(
            self.deployment_file
                .as_deref()
                .unwrap_or(DEFAULT_DEPLOYMENT_FILE),
        )
    }
}

fn normalize_project_path(path: &Path) -> PathBuf {
    if path.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        path.to_path_buf()
    }
}
