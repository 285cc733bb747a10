use super::Builder;
use dockyard_core::build_args::{normalize_relative, to_slash};
use dockyard_core::{BuildArguments, Error, FileSystem, FileType, ProjectConfiguration, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info};

const PROJECT_EXTENSION: &str = "csproj";
const DEFAULT_DOTNET_VERSION: &str = "3.1";
const SDK_IMAGE: &str = "mcr.microsoft.com/dotnet/core/sdk";
const RUNTIME_IMAGE: &str = "mcr.microsoft.com/dotnet/core/runtime";
const ASPNET_IMAGE: &str = "mcr.microsoft.com/dotnet/core/aspnet";
const ASPNET_PACKAGES: &[&str] = &["Microsoft.AspNetCore.App", "Microsoft.AspNetCore.All"];
const BUILD_ROOT: &str = "/src";

#[derive(Debug, Default, Deserialize)]
struct DotnetOptions {
    #[serde(default)]
    dotnetruntime: Option<String>,
    #[serde(default)]
    dotnetversion: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Runtime {
    Runtime,
    AspNet,
}

impl Runtime {
    fn image(self) -> &'static str {
        match self {
            Runtime::Runtime => RUNTIME_IMAGE,
            Runtime::AspNet => ASPNET_IMAGE,
        }
    }

    fn parse(value: &str) -> Result<Self> {
        match value {
            "runtime" => Ok(Runtime::Runtime),
            "aspnet" => Ok(Runtime::AspNet),
            other => Err(Error::config(format!(
                "Invalid dotnetruntime '{}'. Valid options: runtime, aspnet",
                other
            ))),
        }
    }
}

fn project_reference_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"ProjectReference\s+Include="([^"]+)""#).expect("valid regex"))
}

fn package_reference_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"PackageReference\s+Include="([^"]+)""#).expect("valid regex"))
}

/// Builds .NET services from a single `.csproj` and the projects it references.
///
/// Referenced project files are copied and restored before the full sources,
/// so dependency restore stays in its own layer.
pub struct DotnetBuilder;

impl DotnetBuilder {
    fn find_project_file(config: &ProjectConfiguration, fs: &dyn FileSystem) -> Result<PathBuf> {
        let entries = fs.read_dir(&config.project_dir())?;
        let mut project_files: Vec<_> = entries
            .into_iter()
            .filter(|e| e.file_type() == FileType::File)
            .filter(|e| e.extension() == Some(PROJECT_EXTENSION))
            .collect();

        match project_files.len() {
            0 => Err(Error::layout(format!(
                "No .{} file found in {}",
                PROJECT_EXTENSION,
                config.project_path.display()
            ))),
            1 => {
                let name = project_files.remove(0).name;
                relative_to_root(&config.project_path.join(name))
            }
            _ => Err(Error::layout(format!(
                "Ambiguous project descriptor in {}: {}",
                config.project_path.display(),
                project_files
                    .iter()
                    .map(|e| e.file_name())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    /// Walk `ProjectReference` entries depth-first. Returns every referenced
    /// project file once, in discovery order, excluding `project_file` itself.
    fn resolve_references(
        source_root: &Path,
        project_file: &Path,
        fs: &dyn FileSystem,
    ) -> Result<Vec<PathBuf>> {
        let mut seen = HashSet::new();
        seen.insert(project_file.to_path_buf());
        let mut ordered = Vec::new();
        Self::visit(source_root, project_file, fs, &mut seen, &mut ordered)?;
        Ok(ordered)
    }

    fn visit(
        source_root: &Path,
        project_file: &Path,
        fs: &dyn FileSystem,
        seen: &mut HashSet<PathBuf>,
        ordered: &mut Vec<PathBuf>,
    ) -> Result<()> {
        let content = read_project_file(source_root, project_file, fs)?;
        let base = project_file.parent().unwrap_or_else(|| Path::new(""));

        for capture in project_reference_re().captures_iter(&content) {
            let reference = capture[1].replace('\\', "/");
            let resolved = relative_to_root(&base.join(&reference))?;
            if seen.insert(resolved.clone()) {
                ordered.push(resolved.clone());
                Self::visit(source_root, &resolved, fs, seen, ordered)?;
            }
        }
        Ok(())
    }

    fn infer_runtime(
        source_root: &Path,
        project_files: &[PathBuf],
        fs: &dyn FileSystem,
    ) -> Result<Runtime> {
        for project_file in project_files {
            let content = read_project_file(source_root, project_file, fs)?;
            let uses_aspnet = package_reference_re()
                .captures_iter(&content)
                .any(|c| ASPNET_PACKAGES.contains(&&c[1]));
            if uses_aspnet {
                return Ok(Runtime::AspNet);
            }
        }
        Ok(Runtime::Runtime)
    }

    fn render(
        project_file: &Path,
        references: &[PathBuf],
        runtime: Runtime,
        version: &str,
    ) -> String {
        let project_dir = parent_of(project_file);
        let project_name = project_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut lines = vec![
            format!("FROM {}:{} AS build-env", SDK_IMAGE, version),
            String::new(),
            "# Copy csproj and restore as distinct layers".to_string(),
        ];
        for reference in references {
            lines.push(copy_line(reference));
        }
        lines.push(copy_line(project_file));
        lines.push(String::new());
        lines.push(format!("WORKDIR {}", in_build_root(&project_dir)));
        lines.push("RUN dotnet restore".to_string());
        lines.push(String::new());
        lines.push("# Copy everything else and build".to_string());
        for reference in references {
            lines.push(copy_line(&parent_of(reference)));
        }
        lines.push(copy_line(&project_dir));
        lines.push(String::new());
        lines.push("RUN dotnet publish -c Release -o out".to_string());
        lines.push(String::new());
        lines.push("# Build runtime image".to_string());
        lines.push(format!("FROM {}:{}", runtime.image(), version));
        lines.push("WORKDIR /app".to_string());
        lines.push(format!(
            "COPY --from=build-env {}/out .",
            in_build_root(&project_dir)
        ));
        lines.push(format!(
            "ENTRYPOINT [\"dotnet\", \"{}.dll\"]",
            project_name
        ));
        lines.push(String::new());
        lines.join("\n")
    }
}

impl Builder for DotnetBuilder {
    fn names(&self) -> &'static [&'static str] {
        &["dotnet"]
    }

    fn build_arguments(
        &self,
        config: &ProjectConfiguration,
        fs: &dyn FileSystem,
    ) -> Result<BuildArguments> {
        let options: DotnetOptions = config.builder.options()?;
        let explicit_runtime = match options.dotnetruntime.as_deref() {
            None | Some("") => None,
            Some(value) => Some(Runtime::parse(value)?),
        };
        let version = options
            .dotnetversion
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DOTNET_VERSION.to_string());

        let project_file = Self::find_project_file(config, fs)?;
        info!(
            service = %config.service_name,
            project_file = %project_file.display(),
            "Found project file"
        );

        let references = Self::resolve_references(&config.source_root, &project_file, fs)?;
        debug!(service = %config.service_name, references = ?references, "Resolved project references");

        let runtime = match explicit_runtime {
            Some(runtime) => runtime,
            None => {
                let mut all = vec![project_file.clone()];
                all.extend(references.iter().cloned());
                Self::infer_runtime(&config.source_root, &all, fs)?
            }
        };

        let manifest = Self::render(&project_file, &references, runtime, &version);

        let mut dirs: Vec<PathBuf> = std::iter::once(parent_of(&project_file))
            .chain(references.iter().map(|r| parent_of(r)))
            .collect();
        dirs.sort();
        dirs.dedup();

        let mut args = BuildArguments::inline(manifest);
        let mut packed: Vec<PathBuf> = Vec::new();
        for dir in dirs {
            // Sorted order puts ancestors first; nested dirs are already covered.
            if packed.iter().any(|p| dir.starts_with(p)) {
                continue;
            }
            let source = if dir.as_os_str().is_empty() {
                PathBuf::from(".")
            } else {
                dir.clone()
            };
            args = args.with_context(source, dir.clone());
            packed.push(dir);
        }

        Ok(args)
    }
}

fn relative_to_root(path: &Path) -> Result<PathBuf> {
    normalize_relative(path).ok_or_else(|| {
        Error::config(format!(
            "Project reference {} points outside the source tree",
            path.display()
        ))
    })
}

fn read_project_file(source_root: &Path, project_file: &Path, fs: &dyn FileSystem) -> Result<String> {
    fs.read_to_string(&source_root.join(project_file))
        .map_err(|_| Error::layout(format!("Referenced project {} not found", project_file.display())))
}

fn parent_of(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}

fn in_build_root(path: &Path) -> String {
    let rel = to_slash(path);
    if rel.is_empty() {
        BUILD_ROOT.to_string()
    } else {
        format!("{}/{}", BUILD_ROOT, rel)
    }
}

fn copy_line(path: &Path) -> String {
    let rel = to_slash(path);
    let from = if rel.is_empty() { "." } else { rel.as_str() };
    format!("COPY {} {}", from, in_build_root(path))
}
