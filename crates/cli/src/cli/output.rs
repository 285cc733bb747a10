//! Rendering of command results for the terminal or for machines.

use anyhow::{Context, Result};
use dockyard_core::build_args::to_slash;
use dockyard_core::{BuildArguments, ProjectConfiguration};
use dockyard_pipeline::{ProjectOutcome, ReleaseSummary, RunSummary};
use dockyard_stack::builder::normalize_tag;
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Human,
}

/// One row of `dockyard list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListedProject {
    pub service: String,
    pub project_path: String,
    pub cluster: String,
    pub builder: String,
    /// `source -> prefix` pairs, prefix empty for the archive root.
    pub context: Vec<String>,
    pub manifest: Option<String>,
    pub error: Option<String>,
}

impl ListedProject {
    pub fn new(project: &ProjectConfiguration, args: dockyard_core::Result<BuildArguments>) -> Self {
        let (context, manifest, error) = match args {
            Ok(args) => (
                args.context
                    .iter()
                    .map(|(source, prefix)| format!("{} -> /{}", display_path(source), to_slash(prefix)))
                    .collect(),
                args.manifest_selector(),
                None,
            ),
            Err(err) => (Vec::new(), None, Some(err.to_string())),
        };

        Self {
            service: project.service_name.clone(),
            project_path: display_path(&project.project_path),
            cluster: project.cluster.clone(),
            builder: normalize_tag(project.builder.tag()).to_string(),
            context,
            manifest,
            error,
        }
    }
}

fn display_path(path: &Path) -> String {
    match to_slash(path) {
        s if s.is_empty() => ".".to_string(),
        s => s,
    }
}

pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format_projects(&self, projects: &[ListedProject]) -> Result<String> {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(projects).context("Failed to serialize project list")
            }
            OutputFormat::Human => Ok(format_projects_human(projects)),
        }
    }

    pub fn format_summary(&self, summary: &RunSummary) -> Result<String> {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(summary).context("Failed to serialize run summary")
            }
            OutputFormat::Human => Ok(format_summary_human(summary)),
        }
    }

    pub fn format_release(&self, summary: &ReleaseSummary) -> Result<String> {
        match self.format {
            OutputFormat::Json => {
                let outputs: Vec<_> = summary
                    .outputs
                    .iter()
                    .map(|(path, services)| {
                        serde_json::json!({ "path": path.display().to_string(), "services": services })
                    })
                    .collect();
                serde_json::to_string_pretty(&serde_json::json!({
                    "outputs": outputs,
                    "skipped": summary.skipped,
                }))
                .context("Failed to serialize release summary")
            }
            OutputFormat::Human => Ok(format_release_human(summary)),
        }
    }
}

fn format_projects_human(projects: &[ListedProject]) -> String {
    if projects.is_empty() {
        return "No projects found\n".to_string();
    }

    let mut output = String::new();
    for project in projects {
        output.push_str(&format!(
            "{}  ({}, builder: {})\n",
            project.service, project.project_path, project.builder
        ));
        if let Some(error) = &project.error {
            output.push_str(&format!("\u{2514}\u{2500} error: {}\n", error));
            continue;
        }
        if let Some(manifest) = &project.manifest {
            output.push_str(&format!("\u{251C}\u{2500} manifest: {}\n", manifest));
        }
        let last = project.context.len().saturating_sub(1);
        for (i, context) in project.context.iter().enumerate() {
            let branch = if i == last { "\u{2514}" } else { "\u{251C}" };
            output.push_str(&format!("{}\u{2500} context: {}\n", branch, context));
        }
    }
    output
}

fn format_summary_human(summary: &RunSummary) -> String {
    let mut output = String::new();
    for report in &summary.projects {
        match &report.outcome {
            ProjectOutcome::Built(built) => {
                output.push_str(&format!(
                    "\u{2713} {}  {}{}\n",
                    report.service,
                    built.tags.first().map(String::as_str).unwrap_or(""),
                    built
                        .digest
                        .as_deref()
                        .map(|d| format!(" @ {}", d))
                        .unwrap_or_default()
                ));
            }
            ProjectOutcome::Failed { kind, message } => {
                output.push_str(&format!("\u{2717} {}  [{}] {}\n", report.service, kind, message));
            }
        }
    }
    let failed = summary.failed();
    output.push_str(&format!(
        "{} built, {} failed{}\n",
        summary.projects.len() - failed,
        failed,
        if summary.cancelled { ", cancelled" } else { "" }
    ));
    output
}

fn format_release_human(summary: &ReleaseSummary) -> String {
    let mut output = String::new();
    for (path, services) in &summary.outputs {
        output.push_str(&format!("{}: {}\n", path.display(), services.join(", ")));
    }
    if !summary.skipped.is_empty() {
        output.push_str(&format!("skipped: {}\n", summary.skipped.join(", ")));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockyard_core::Error;
    use dockyard_pipeline::{BuiltImage, ProjectReport};
    use std::path::PathBuf;

    fn project(json: &str, path: &str) -> ProjectConfiguration {
        ProjectConfiguration::parse(json, Path::new("/repo"), Path::new(path)).unwrap()
    }

    #[test]
    fn test_listed_project_from_arguments() {
        let project = project(r#"{"servicename": "api", "cluster": "east"}"#, "services/api");
        let args = BuildArguments::file("services/api/Dockerfile").with_context(".", "");

        let listed = ListedProject::new(&project, Ok(args));
        assert_eq!(listed.builder, "manual");
        assert_eq!(listed.project_path, "services/api");
        assert_eq!(listed.context, vec![". -> /".to_string()]);
        assert_eq!(listed.manifest.as_deref(), Some("services/api/Dockerfile"));
        assert!(listed.error.is_none());
    }

    #[test]
    fn test_listed_project_with_error() {
        let project = project(r#"{"servicename": "jobs", "builder": {"type": "rust"}}"#, "jobs");
        let listed = ListedProject::new(&project, Err(Error::config("bad")));

        assert_eq!(listed.builder, "rust");
        assert!(listed.context.is_empty());
        let human = OutputFormatter::new(OutputFormat::Human)
            .format_projects(&[listed])
            .unwrap();
        assert!(human.contains("jobs  (jobs, builder: rust)"));
        assert!(human.contains("error: Configuration error: bad"));
    }

    #[test]
    fn test_projects_json_is_an_array() {
        let project = project(r#"{"servicename": "api"}"#, ".");
        let listed = ListedProject::new(&project, Ok(BuildArguments::inline("FROM x").with_context(".", "")));
        let json = OutputFormatter::new(OutputFormat::Json)
            .format_projects(&[listed])
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0]["service"], "api");
        assert_eq!(value[0]["manifest"], "Dockerfile.generated");
    }

    #[test]
    fn test_summary_human() {
        let summary = RunSummary {
            projects: vec![
                ProjectReport {
                    service: "api".to_string(),
                    project_path: PathBuf::from("api"),
                    duration_ms: 10,
                    outcome: ProjectOutcome::Built(BuiltImage {
                        image_id: Some("sha256:1".to_string()),
                        tags: vec!["reg/api:7".to_string(), "api".to_string()],
                        fingerprint: "abc".to_string(),
                        context_reused: false,
                        digest: Some("sha256:d".to_string()),
                        pushed: true,
                        artifacts: None,
                    }),
                },
                ProjectReport {
                    service: "web".to_string(),
                    project_path: PathBuf::from("web"),
                    duration_ms: 5,
                    outcome: ProjectOutcome::Failed {
                        kind: "build".to_string(),
                        message: "disk full".to_string(),
                    },
                },
            ],
            cancelled: false,
        };

        let text = OutputFormatter::new(OutputFormat::Human)
            .format_summary(&summary)
            .unwrap();
        assert!(text.contains("\u{2713} api  reg/api:7 @ sha256:d"));
        assert!(text.contains("\u{2717} web  [build] disk full"));
        assert!(text.ends_with("1 built, 1 failed\n"));
    }
}
