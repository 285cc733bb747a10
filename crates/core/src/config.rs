use crate::layout::{ExcludedPaths, DIGEST_CACHE_FILE_NAME, SCRATCH_DIR_NAME};
use std::env;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

const DEFAULT_SOURCE_DIR: &str = ".";
const DEFAULT_ARTIFACT_DIR: &str = "./Buildscripts/dist";
const DEFAULT_BUILD_ID: &str = "latest";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_MAX_CONCURRENCY: usize = 4;
const MAX_CONCURRENCY: usize = 32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Failed to parse {field}: {error}")]
    ParseError { field: String, error: String },
}

/// Run-wide settings. Read from the environment first, then overridden by
/// command-line flags.
#[derive(Debug, Clone)]
pub struct DockyardConfig {
    pub source_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub digest_cache_path: PathBuf,
    pub artifact_dir: PathBuf,
    pub build_id: String,
    pub registry: Option<String>,
    pub concurrency: usize,
    pub debug: bool,
    pub log_level: String,
}

fn env_first(keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| env::var(k).ok())
        .find(|v| !v.is_empty())
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(DEFAULT_MAX_CONCURRENCY)
}

impl Default for DockyardConfig {
    fn default() -> Self {
        let source_dir = env_first(&["DOCKYARD_SOURCE_DIR", "BUILD_SOURCESDIRECTORY"])
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SOURCE_DIR));

        let scratch_dir = env_first(&["DOCKYARD_SCRATCH_DIR"])
            .map(PathBuf::from)
            .unwrap_or_else(|| source_dir.join(SCRATCH_DIR_NAME));

        let digest_cache_path = env_first(&["DOCKYARD_DIGEST_CACHE"])
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DIGEST_CACHE_FILE_NAME));

        let artifact_dir = env_first(&["DOCKYARD_ARTIFACT_DIR"])
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ARTIFACT_DIR));

        let build_id = env_first(&["DOCKYARD_BUILD_ID", "BUILD_BUILDID"])
            .unwrap_or_else(|| DEFAULT_BUILD_ID.to_string());

        let registry = env_first(&["DOCKYARD_REGISTRY"]).map(|r| r.trim_end_matches('/').to_string());

        let debug = env::var("DOCKYARD_DEBUG").is_ok();

        let concurrency = if debug {
            1
        } else {
            env_first(&["DOCKYARD_CONCURRENCY"])
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or_else(default_concurrency)
        };

        let log_level = env::var("DOCKYARD_LOG_LEVEL")
            .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string())
            .to_lowercase();

        Self {
            source_dir,
            scratch_dir,
            digest_cache_path,
            artifact_dir,
            build_id,
            registry,
            concurrency,
            debug,
            log_level,
        }
    }
}

impl DockyardConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "Concurrency must be at least 1".to_string(),
            ));
        }
        if self.concurrency > MAX_CONCURRENCY {
            return Err(ConfigError::ValidationFailed(format!(
                "Concurrency cannot exceed {}",
                MAX_CONCURRENCY
            )));
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationFailed(format!(
                    "Invalid log level: {}. Valid options: trace, debug, info, warn, error",
                    self.log_level
                )))
            }
        }

        if self.build_id.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "Build id cannot be empty".to_string(),
            ));
        }
        if self
            .build_id
            .chars()
            .any(|c| c.is_whitespace() || c == '/')
        {
            return Err(ConfigError::ValidationFailed(format!(
                "Build id '{}' cannot contain whitespace or '/'",
                self.build_id
            )));
        }

        Ok(())
    }

    /// Parse a concurrency override coming from a flag or another source.
    pub fn set_concurrency(&mut self, value: &str) -> Result<(), ConfigError> {
        self.concurrency = value.parse::<usize>().map_err(|e| ConfigError::ParseError {
            field: "concurrency".to_string(),
            error: e.to_string(),
        })?;
        Ok(())
    }

    /// Point the run at another source tree. A scratch directory that was
    /// derived from the old source dir moves along with it.
    pub fn set_source_dir(&mut self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        if self.scratch_dir == self.source_dir.join(SCRATCH_DIR_NAME) {
            self.scratch_dir = dir.join(SCRATCH_DIR_NAME);
        }
        self.source_dir = dir;
    }

    /// Everything a run writes, kept out of discovery and build contexts.
    pub fn excluded_paths(&self) -> ExcludedPaths {
        ExcludedPaths::new([&self.scratch_dir, &self.digest_cache_path, &self.artifact_dir])
    }

    /// `<registry>/<service>:<build_id>`, or `<service>:<build_id>` without a registry.
    pub fn image_tag(&self, service: &str) -> String {
        match &self.registry {
            Some(registry) => format!("{}/{}:{}", registry, service, self.build_id),
            None => format!("{}:{}", service, self.build_id),
        }
    }
}

impl fmt::Display for DockyardConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Dockyard Configuration:")?;
        writeln!(f, "  Source Dir: {}", self.source_dir.display())?;
        writeln!(f, "  Scratch Dir: {}", self.scratch_dir.display())?;
        writeln!(f, "  Digest Cache: {}", self.digest_cache_path.display())?;
        writeln!(f, "  Artifact Dir: {}", self.artifact_dir.display())?;
        writeln!(f, "  Build Id: {}", self.build_id)?;
        writeln!(
            f,
            "  Registry: {}",
            self.registry.as_deref().unwrap_or("(none)")
        )?;
        writeln!(f, "  Concurrency: {}", self.concurrency)?;
        writeln!(f, "  Log Level: {}", self.log_level)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    struct EnvGuard {
        key: String,
        old_value: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &str, value: &str) -> Self {
            let old_value = env::var(key).ok();
            env::set_var(key, value);
            Self {
                key: key.to_string(),
                old_value,
            }
        }

        fn remove(key: &str) -> Self {
            let old_value = env::var(key).ok();
            env::remove_var(key);
            Self {
                key: key.to_string(),
                old_value,
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.old_value {
                Some(v) => env::set_var(&self.key, v),
                None => env::remove_var(&self.key),
            }
        }
    }

    fn clean_env() -> Vec<EnvGuard> {
        [
            "DOCKYARD_SOURCE_DIR",
            "BUILD_SOURCESDIRECTORY",
            "DOCKYARD_SCRATCH_DIR",
            "DOCKYARD_DIGEST_CACHE",
            "DOCKYARD_ARTIFACT_DIR",
            "DOCKYARD_BUILD_ID",
            "BUILD_BUILDID",
            "DOCKYARD_REGISTRY",
            "DOCKYARD_CONCURRENCY",
            "DOCKYARD_DEBUG",
            "DOCKYARD_LOG_LEVEL",
        ]
        .iter()
        .map(|k| EnvGuard::remove(k))
        .collect()
    }

    #[test]
    #[serial]
    fn test_default_configuration() {
        let _clean = clean_env();

        let config = DockyardConfig::default();

        assert_eq!(config.source_dir, PathBuf::from("."));
        assert_eq!(config.scratch_dir, PathBuf::from("./.dockyard"));
        assert_eq!(config.digest_cache_path, PathBuf::from(".digestcache"));
        assert_eq!(config.artifact_dir, PathBuf::from(DEFAULT_ARTIFACT_DIR));
        assert_eq!(config.build_id, DEFAULT_BUILD_ID);
        assert_eq!(config.registry, None);
        assert!(config.concurrency >= 1 && config.concurrency <= DEFAULT_MAX_CONCURRENCY);
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_environment_variable_parsing() {
        let _clean = clean_env();
        let _guards = [
            EnvGuard::set("BUILD_SOURCESDIRECTORY", "/agent/src"),
            EnvGuard::set("BUILD_BUILDID", "1234"),
            EnvGuard::set("DOCKYARD_REGISTRY", "registry.local/"),
            EnvGuard::set("DOCKYARD_CONCURRENCY", "8"),
            EnvGuard::set("DOCKYARD_LOG_LEVEL", "DEBUG"),
        ];

        let config = DockyardConfig::default();

        assert_eq!(config.source_dir, PathBuf::from("/agent/src"));
        assert_eq!(config.scratch_dir, PathBuf::from("/agent/src/.dockyard"));
        assert_eq!(config.build_id, "1234");
        assert_eq!(config.registry.as_deref(), Some("registry.local"));
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    #[serial]
    fn test_dockyard_vars_win_over_ci_vars() {
        let _clean = clean_env();
        let _guards = [
            EnvGuard::set("BUILD_BUILDID", "ci"),
            EnvGuard::set("DOCKYARD_BUILD_ID", "local"),
        ];

        assert_eq!(DockyardConfig::default().build_id, "local");
    }

    #[test]
    #[serial]
    fn test_debug_forces_single_worker() {
        let _clean = clean_env();
        let _guards = [
            EnvGuard::set("DOCKYARD_DEBUG", "1"),
            EnvGuard::set("DOCKYARD_CONCURRENCY", "8"),
        ];

        let config = DockyardConfig::default();
        assert!(config.debug);
        assert_eq!(config.concurrency, 1);
    }

    #[test]
    fn test_validation_rejects_zero_concurrency() {
        let config = DockyardConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_excessive_concurrency() {
        let config = DockyardConfig {
            concurrency: 64,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("32"));
    }

    #[test]
    fn test_validation_invalid_log_level() {
        let config = DockyardConfig {
            log_level: "loud".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_build_id() {
        for bad in ["", "a b", "feature/x"] {
            let config = DockyardConfig {
                build_id: bad.to_string(),
                log_level: "info".to_string(),
                concurrency: 1,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "build id {:?} accepted", bad);
        }
    }

    #[test]
    fn test_set_concurrency_parse_error() {
        let mut config = DockyardConfig::default();
        let err = config.set_concurrency("many").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
        config.set_concurrency("3").unwrap();
        assert_eq!(config.concurrency, 3);
    }

    #[test]
    fn test_image_tag() {
        let mut config = DockyardConfig {
            build_id: "42".to_string(),
            registry: None,
            ..Default::default()
        };
        assert_eq!(config.image_tag("api"), "api:42");

        config.registry = Some("reg.io/team".to_string());
        assert_eq!(config.image_tag("api"), "reg.io/team/api:42");
    }

    #[test]
    #[serial]
    fn test_set_source_dir_moves_derived_scratch() {
        let _guards = clean_env();
        let mut config = DockyardConfig::default();
        config.set_source_dir("/repo");
        assert_eq!(config.scratch_dir, PathBuf::from("/repo/.dockyard"));

        config.scratch_dir = PathBuf::from("/var/cache/dockyard");
        config.set_source_dir("/other");
        assert_eq!(config.source_dir, PathBuf::from("/other"));
        assert_eq!(config.scratch_dir, PathBuf::from("/var/cache/dockyard"));
    }

    #[test]
    fn test_config_display() {
        let display = format!("{}", DockyardConfig::default());
        assert!(display.contains("Dockyard Configuration:"));
        assert!(display.contains("Build Id:"));
    }
}
