//! Runs every discovered project through dispatch, packaging, build, push
//! and artifact output.

use crate::artifacts::write_artifacts;
use crate::digest_cache::DigestCache;
use anyhow::{anyhow, Context, Result};
use dockyard_buildkit::{BuildExecutor, CancelCheck, CancellationToken, ContextCache};
use dockyard_core::{DockyardConfig, Error, ExcludedPaths, FileSystem, ProjectConfiguration, RealFileSystem};
use dockyard_stack::BuilderRegistry;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Result of one successfully built project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuiltImage {
    pub image_id: Option<String>,
    pub tags: Vec<String>,
    pub fingerprint: String,
    pub context_reused: bool,
    /// Registry digest, when the image was pushed or found in the digest cache.
    pub digest: Option<String>,
    /// False when the push was skipped because the digest cache already knew the image.
    pub pushed: bool,
    pub artifacts: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ProjectOutcome {
    Built(BuiltImage),
    Failed { kind: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectReport {
    pub service: String,
    pub project_path: PathBuf,
    pub duration_ms: u64,
    pub outcome: ProjectOutcome,
}

impl ProjectReport {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, ProjectOutcome::Built(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Reports in discovery order.
    pub projects: Vec<ProjectReport>,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn failed(&self) -> usize {
        self.projects.iter().filter(|p| !p.succeeded()).count()
    }

    /// `0` when every project built, `1` when at least one failed, `2` when
    /// the run was cancelled.
    pub fn exit_code(&self) -> i32 {
        if self.cancelled {
            2
        } else if self.failed() > 0 {
            1
        } else {
            0
        }
    }
}

pub struct Pipeline {
    config: DockyardConfig,
    excluded: ExcludedPaths,
    registry: Arc<BuilderRegistry>,
    fs: Arc<dyn FileSystem>,
    executor: Arc<BuildExecutor>,
    cancel: CancellationToken,
    only: Option<BTreeSet<String>>,
    push: bool,
    artifacts: bool,
    env: BTreeMap<String, String>,
}

impl Pipeline {
    pub fn new(config: DockyardConfig, executor: BuildExecutor) -> Self {
        Self {
            excluded: config.excluded_paths(),
            config,
            registry: Arc::new(BuilderRegistry::with_defaults()),
            fs: Arc::new(RealFileSystem),
            executor: Arc::new(executor),
            cancel: CancellationToken::new(),
            only: None,
            push: false,
            artifacts: true,
            env: BTreeMap::new(),
        }
    }

    pub fn with_registry(mut self, registry: BuilderRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_filesystem(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Restrict the run to these service names. An empty set means no filter.
    pub fn with_only<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: BTreeSet<String> = services.into_iter().map(Into::into).collect();
        self.only = if set.is_empty() { None } else { Some(set) };
        self
    }

    pub fn with_push(mut self, push: bool) -> Self {
        self.push = push;
        self
    }

    pub fn with_artifacts(mut self, artifacts: bool) -> Self {
        self.artifacts = artifacts;
        self
    }

    /// Variables available to deployment file tokens.
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn config(&self) -> &DockyardConfig {
        &self.config
    }

    /// Process `projects` with bounded parallelism.
    ///
    /// The digest cache is taken by value and handed back with every newly
    /// pushed digest merged in, even when projects failed.
    pub async fn run(
        &self,
        projects: Vec<ProjectConfiguration>,
        mut digests: DigestCache,
    ) -> (RunSummary, DigestCache) {
        let start = Instant::now();

        let selected: Vec<ProjectConfiguration> = projects
            .into_iter()
            .filter(|p| match &self.only {
                Some(only) if !only.contains(&p.service_name) => {
                    debug!(service = %p.service_name, "Not selected, skipping");
                    false
                }
                _ => true,
            })
            .collect();

        info!(
            projects = selected.len(),
            concurrency = self.config.concurrency,
            "Starting build run"
        );

        let cache = &digests;
        let mut reports: Vec<(usize, ProjectReport)> = stream::iter(selected.iter().enumerate())
            .map(|(index, project)| async move { (index, self.process(project, cache).await) })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;
        reports.sort_by_key(|(index, _)| *index);

        let mut summary = RunSummary::default();
        for (_, report) in reports {
            if let ProjectOutcome::Built(BuiltImage {
                image_id: Some(id),
                digest: Some(digest),
                pushed: true,
                ..
            }) = &report.outcome
            {
                digests.insert(id.clone(), digest.clone());
            }
            if let ProjectOutcome::Failed { kind, .. } = &report.outcome {
                if kind == Error::Cancelled.kind() {
                    summary.cancelled = true;
                }
            }
            summary.projects.push(report);
        }
        if self.cancel.is_cancelled() {
            summary.cancelled = true;
        }

        info!(
            built = summary.projects.len() - summary.failed(),
            failed = summary.failed(),
            cancelled = summary.cancelled,
            total_time_ms = start.elapsed().as_millis(),
            "Build run complete"
        );

        (summary, digests)
    }

    async fn process(&self, project: &ProjectConfiguration, digests: &DigestCache) -> ProjectReport {
        let start = Instant::now();
        let outcome = match self.build_project(project, digests).await {
            Ok(built) => ProjectOutcome::Built(built),
            Err(err) => {
                let kind = err
                    .downcast_ref::<Error>()
                    .map(Error::kind)
                    .unwrap_or("internal");
                let message = format!("{:#}", err);
                if kind == Error::Cancelled.kind() {
                    warn!(service = %project.service_name, "Cancelled");
                } else {
                    error!(service = %project.service_name, kind, error = %message, "Project failed");
                }
                ProjectOutcome::Failed {
                    kind: kind.to_string(),
                    message,
                }
            }
        };

        ProjectReport {
            service: project.service_name.clone(),
            project_path: project.project_path.clone(),
            duration_ms: start.elapsed().as_millis() as u64,
            outcome,
        }
    }

    async fn build_project(&self, project: &ProjectConfiguration, digests: &DigestCache) -> Result<BuiltImage> {
        let service = project.service_name.as_str();
        self.cancel.check()?;

        let phase = Instant::now();
        let args = self.registry.build_arguments(project, self.fs.as_ref())?;
        let manifest = args.manifest_selector().ok_or_else(|| {
            Error::config(format!(
                "Manifest for service {} is not inside its build context",
                service
            ))
        })?;
        debug!(service, phase = "dispatch", duration_ms = phase.elapsed().as_millis(), "Phase complete");

        let phase = Instant::now();
        let contexts =
            ContextCache::for_service(&self.config.scratch_dir, service).with_excluded(self.excluded.clone());
        let source_root = project.source_root.clone();
        let cancel = self.cancel.clone();
        let archive = tokio::task::spawn_blocking(move || contexts.get_or_create(&source_root, &args, &cancel))
            .await
            .map_err(|e| anyhow!("Packaging task failed: {}", e))?
            .with_context(|| format!("Failed to package build context for service {}", service))?;
        debug!(
            service,
            phase = "package",
            fingerprint = %archive.fingerprint,
            reused = archive.reused,
            duration_ms = phase.elapsed().as_millis(),
            "Phase complete"
        );

        let tags = vec![self.config.image_tag(service), service.to_string()];
        let outcome = self
            .executor
            .build(service, &archive, &manifest, &tags, &self.cancel)
            .await?;
        if outcome.image_id.is_none() {
            warn!(service, "Build finished without reporting an image id");
        }

        let (digest, pushed) = if self.push {
            self.push_image(service, outcome.image_id.as_deref(), &tags[0], digests)
                .await?
        } else {
            (None, false)
        };

        let artifacts = if self.artifacts {
            let image = match (&digest, &self.config.registry) {
                (Some(digest), Some(registry)) => format!("{}/{}@{}", registry, service, digest),
                _ => tags[0].clone(),
            };
            Some(write_artifacts(&self.config.artifact_dir, project, &image, &self.env)?)
        } else {
            None
        };

        Ok(BuiltImage {
            image_id: outcome.image_id,
            tags: outcome.tags,
            fingerprint: archive.fingerprint,
            context_reused: archive.reused,
            digest,
            pushed,
            artifacts,
        })
    }

    /// Push unless the digest cache already knows this image.
    async fn push_image(
        &self,
        service: &str,
        image_id: Option<&str>,
        tag: &str,
        digests: &DigestCache,
    ) -> Result<(Option<String>, bool)> {
        if let Some(known) = image_id.and_then(|id| digests.get(id)) {
            info!(service, digest = %known, "Image unchanged since last push, skipping");
            return Ok((Some(known.to_string()), false));
        }

        self.cancel.check()?;
        let phase = Instant::now();
        let digest = self
            .executor
            .service()
            .push(tag)
            .await
            .with_context(|| format!("Failed to push {}", tag))?;

        info!(
            service,
            tag,
            digest = digest.as_ref().map(|d| d.to_string()).unwrap_or_default(),
            duration_ms = phase.elapsed().as_millis(),
            "Pushed image"
        );
        Ok((digest.map(|d| d.to_string()), true))
    }
}
