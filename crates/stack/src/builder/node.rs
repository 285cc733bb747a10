use super::node_version::{detect_node_version, normalize_node_version};
use super::Builder;
use dockyard_core::{BuildArguments, Error, FileSystem, ProjectConfiguration, Result};
use serde::Deserialize;
use tracing::debug;

const NPM_LOCKFILE: &str = "package-lock.json";
const YARN_LOCKFILE: &str = "yarn.lock";

#[derive(Debug, Default, Deserialize)]
struct NodeOptions {
    #[serde(default)]
    nodeversion: Option<String>,
    #[serde(default)]
    buildcommand: Option<String>,
    #[serde(default)]
    runcommand: Option<String>,
    #[serde(default)]
    audit: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PackageManager {
    Npm,
    Yarn,
}

impl PackageManager {
    fn lockfile(self) -> &'static str {
        match self {
            PackageManager::Npm => NPM_LOCKFILE,
            PackageManager::Yarn => YARN_LOCKFILE,
        }
    }

    fn install_command(self) -> &'static str {
        match self {
            PackageManager::Npm => "npm ci",
            PackageManager::Yarn => "yarn install --frozen-lockfile",
        }
    }

    fn audit_command(self) -> &'static str {
        match self {
            PackageManager::Npm => "npm audit",
            PackageManager::Yarn => "yarn audit",
        }
    }
}

/// Builds Node.js services from `package.json` plus exactly one lockfile.
pub struct NodeBuilder;

impl NodeBuilder {
    fn detect_package_manager(
        config: &ProjectConfiguration,
        fs: &dyn FileSystem,
    ) -> Result<PackageManager> {
        let dir = config.project_dir();
        let npm = fs.is_file(&dir.join(NPM_LOCKFILE));
        let yarn = fs.is_file(&dir.join(YARN_LOCKFILE));

        match (npm, yarn) {
            (true, false) => Ok(PackageManager::Npm),
            (false, true) => Ok(PackageManager::Yarn),
            (true, true) => Err(Error::config(format!(
                "Ambiguous package manager for service {}: both {} and {} found in {}",
                config.service_name,
                NPM_LOCKFILE,
                YARN_LOCKFILE,
                config.project_path.display()
            ))),
            (false, false) => Err(Error::layout(format!(
                "No lockfile ({} or {}) found in {}",
                NPM_LOCKFILE,
                YARN_LOCKFILE,
                config.project_path.display()
            ))),
        }
    }

    fn render(
        node_version: &str,
        package_manager: PackageManager,
        audit: bool,
        build_command: Option<&str>,
        run_command: &str,
    ) -> String {
        let mut lines = vec![
            format!("FROM node:{}-alpine", node_version),
            String::new(),
            "WORKDIR /usr/src/app".to_string(),
            format!("COPY package.json {} ./", package_manager.lockfile()),
            String::new(),
            format!("RUN {}", package_manager.install_command()),
        ];
        if audit {
            lines.push(format!("RUN {}", package_manager.audit_command()));
        }
        lines.push(String::new());
        lines.push("COPY . ./".to_string());
        if let Some(build) = build_command {
            lines.push(String::new());
            lines.push(format!("RUN {}", build));
        }
        lines.push(String::new());
        lines.push(format!("CMD {}", run_command));
        lines.push(String::new());
        lines.join("\n")
    }
}

impl Builder for NodeBuilder {
    fn names(&self) -> &'static [&'static str] {
        &["nodejs"]
    }

    fn build_arguments(
        &self,
        config: &ProjectConfiguration,
        fs: &dyn FileSystem,
    ) -> Result<BuildArguments> {
        let options: NodeOptions = config.builder.options()?;

        let run_command = options
            .runcommand
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                Error::config(format!(
                    "Missing runcommand for nodejs service {}",
                    config.service_name
                ))
            })?;

        let package_manager = Self::detect_package_manager(config, fs)?;

        let node_version = match options.nodeversion.as_deref() {
            Some(v) if !v.trim().is_empty() => normalize_node_version(v).ok_or_else(|| {
                Error::config(format!("Invalid nodeversion '{}'", v))
            })?,
            _ => detect_node_version(fs, &config.project_dir()),
        };

        let build_command = options
            .buildcommand
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());

        debug!(
            service = %config.service_name,
            node_version = %node_version,
            package_manager = ?package_manager,
            "Resolved nodejs build arguments"
        );

        let manifest = Self::render(
            &node_version,
            package_manager,
            options.audit,
            build_command,
            run_command,
        );

        Ok(BuildArguments::inline(manifest).with_context(config.project_path.clone(), ""))
    }
}
