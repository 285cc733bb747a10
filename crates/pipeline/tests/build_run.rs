use async_trait::async_trait;
use dockyard_buildkit::{decode_line, BuildExecutor, BuildRequest, BuildService, CancellationToken, Digest, StatusRecord};
use dockyard_core::{DockyardConfig, ProjectConfiguration, Result};
use dockyard_pipeline::{artifacts, discover, BuiltImage, DigestCache, Pipeline, ProjectOutcome, RunSummary};
use futures_util::stream::{self, BoxStream, StreamExt};
use std::collections::BTreeMap;
use std::fs;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Daemon stand-in. Services whose tag contains "broken" fail with a disk
/// error; everything else reports `sha256:<service>` as its image id.
#[derive(Default)]
struct FakeDaemon {
    builds: Mutex<Vec<String>>,
    tags: Mutex<Vec<(String, String)>>,
    pushes: Mutex<Vec<String>>,
}

fn service_of(tag: &str) -> &str {
    let name = tag.rsplit('/').next().unwrap_or(tag);
    name.split(':').next().unwrap_or(name)
}

#[async_trait]
impl BuildService for FakeDaemon {
    fn build(&self, request: BuildRequest) -> BoxStream<'_, Result<StatusRecord>> {
        self.builds.lock().unwrap().push(request.tag.clone());
        let service = service_of(&request.tag).to_string();
        let lines = if service.contains("broken") {
            vec![
                r#"{"stream":"Step 1/2 : FROM alpine\n"}"#.to_string(),
                r#"{"error":"disk full","errorDetail":{"message":"disk full"}}"#.to_string(),
            ]
        } else {
            vec![
                r#"{"stream":"Step 1/2 : FROM alpine\n"}"#.to_string(),
                format!(r#"{{"aux":{{"ID":"sha256:{}"}}}}"#, service),
                format!(r#"{{"stream":"Successfully tagged {}\n"}}"#, request.tag),
            ]
        };
        let items: Vec<_> = lines.iter().filter_map(|l| decode_line(l)).collect();
        stream::iter(items).boxed()
    }

    async fn tag(&self, image: &str, tag: &str) -> Result<()> {
        self.tags.lock().unwrap().push((image.to_string(), tag.to_string()));
        Ok(())
    }

    async fn push(&self, tag: &str) -> Result<Option<Digest>> {
        self.pushes.lock().unwrap().push(tag.to_string());
        Digest::parse(&format!("sha256:pushed{}", service_of(tag))).map(Some)
    }
}

struct Workspace {
    source: TempDir,
    output: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            source: TempDir::new().unwrap(),
            output: TempDir::new().unwrap(),
        }
    }

    fn write(&self, rel: &str, content: &str) {
        let path = self.source.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn manual(&self, dir: &str, service: &str) {
        self.write(
            &format!("{}/buildsettings.json", dir),
            &format!(
                r#"{{"servicename": "{}", "cluster": "main", "builder": {{"type": "manual", "buildcontext": "projectdir"}}}}"#,
                service
            ),
        );
        self.write(&format!("{}/Dockerfile", dir), "FROM alpine\n");
        self.write(&format!("{}/deployment.yaml", dir), "image: #{image}#\n");
    }

    fn config(&self) -> DockyardConfig {
        let mut config = DockyardConfig::default();
        config.source_dir = self.source.path().to_path_buf();
        config.scratch_dir = self.source.path().join(".dockyard");
        config.artifact_dir = self.output.path().join("dist");
        config.digest_cache_path = self.output.path().join(".digestcache");
        config.build_id = "42".to_string();
        config.registry = Some("registry.local".to_string());
        config.concurrency = 2;
        config
    }

    fn discover(&self) -> Vec<ProjectConfiguration> {
        discover(self.source.path(), &self.config().excluded_paths()).unwrap()
    }

    fn artifact(&self, service: &str) -> String {
        fs::read_to_string(self.output.path().join("dist").join(service).join("deployment.yaml")).unwrap()
    }
}

fn pipeline(ws: &Workspace, daemon: &Arc<FakeDaemon>) -> Pipeline {
    let executor = BuildExecutor::new(daemon.clone()).with_output(true, false);
    Pipeline::new(ws.config(), executor)
}

fn built(summary: &RunSummary, service: &str) -> BuiltImage {
    let report = summary.projects.iter().find(|p| p.service == service).unwrap();
    match &report.outcome {
        ProjectOutcome::Built(built) => built.clone(),
        other => panic!("expected {} to build, got {:?}", service, other),
    }
}

fn failure<'a>(summary: &'a RunSummary, service: &str) -> (&'a str, &'a str) {
    let report = summary.projects.iter().find(|p| p.service == service).unwrap();
    match &report.outcome {
        ProjectOutcome::Failed { kind, message } => (kind.as_str(), message.as_str()),
        other => panic!("expected failure for {}, got {:?}", service, other),
    }
}

#[tokio::test]
async fn test_builds_tags_and_writes_artifacts() {
    let ws = Workspace::new();
    ws.manual("services/api", "api");
    ws.manual("services/web", "web");
    let daemon = Arc::new(FakeDaemon::default());

    let projects = ws.discover();
    let (summary, digests) = pipeline(&ws, &daemon).run(projects, DigestCache::new()).await;

    assert_eq!(summary.exit_code(), 0);
    assert_eq!(summary.projects.len(), 2);
    assert_eq!(summary.projects[0].service, "api");
    assert!(digests.is_empty());

    let mut builds = daemon.builds.lock().unwrap().clone();
    builds.sort();
    assert_eq!(builds, vec!["registry.local/api:42", "registry.local/web:42"]);
    assert!(daemon
        .tags
        .lock()
        .unwrap()
        .contains(&("sha256:api".to_string(), "api".to_string())));
    assert!(daemon.pushes.lock().unwrap().is_empty());

    assert_eq!(ws.artifact("api"), "image: registry.local/api:42\n");
    assert!(ws.output.path().join("dist/web/buildsettings.json").is_file());
}

#[tokio::test]
async fn test_second_run_reuses_packaged_context() {
    let ws = Workspace::new();
    ws.manual("api", "api");
    let daemon = Arc::new(FakeDaemon::default());
    let pipeline = pipeline(&ws, &daemon);

    let (first, _) = pipeline.run(ws.discover(), DigestCache::new()).await;
    let (second, _) = pipeline.run(ws.discover(), DigestCache::new()).await;

    assert!(!built(&first, "api").context_reused);
    assert!(built(&second, "api").context_reused);
    assert_eq!(built(&first, "api").fingerprint, built(&second, "api").fingerprint);

    ws.write("api/main.sh", "echo changed");
    let (third, _) = pipeline.run(ws.discover(), DigestCache::new()).await;
    assert!(!built(&third, "api").context_reused);
}

#[tokio::test]
async fn test_one_failing_project_does_not_stop_others() {
    let ws = Workspace::new();
    ws.manual("api", "api");
    ws.manual("broken", "broken");
    ws.write(
        "web/buildsettings.json",
        r#"{"servicename": "web", "builder": {"type": "nodejs", "runcommand": "node index.js"}}"#,
    );
    ws.write("web/package.json", "{}");
    ws.write(
        "jobs/buildsettings.json",
        r#"{"servicename": "jobs", "builder": {"type": "rust"}}"#,
    );
    let daemon = Arc::new(FakeDaemon::default());

    let projects = ws.discover();
    let (summary, _) = pipeline(&ws, &daemon).run(projects, DigestCache::new()).await;

    assert_eq!(summary.exit_code(), 1);
    assert_eq!(summary.failed(), 3);

    let (kind, message) = failure(&summary, "broken");
    assert_eq!(kind, "build");
    assert_eq!(message, "disk full");
    assert_eq!(failure(&summary, "web").0, "project-layout");
    assert_eq!(failure(&summary, "jobs").0, "no-builder");

    assert!(summary.projects.iter().any(|p| p.service == "api" && p.succeeded()));
    assert!(!ws.output.path().join("dist/broken").exists());
}

#[tokio::test]
async fn test_push_consults_digest_cache() {
    let ws = Workspace::new();
    ws.manual("api", "api");
    let daemon = Arc::new(FakeDaemon::default());
    let pipeline = pipeline(&ws, &daemon).with_push(true);

    let (first, digests) = pipeline.run(ws.discover(), DigestCache::new()).await;
    assert_eq!(first.exit_code(), 0);
    assert_eq!(digests.get("sha256:api"), Some("sha256:pushedapi"));
    assert_eq!(daemon.pushes.lock().unwrap().as_slice(), ["registry.local/api:42"]);
    assert_eq!(ws.artifact("api"), "image: registry.local/api@sha256:pushedapi\n");

    let path = ws.config().digest_cache_path;
    digests.save(&path).unwrap();
    let (second, digests) = pipeline
        .run(ws.discover(), DigestCache::load(&path))
        .await;

    assert_eq!(second.exit_code(), 0);
    assert_eq!(daemon.pushes.lock().unwrap().len(), 1);
    match &second.projects[0].outcome {
        ProjectOutcome::Built(built) => {
            assert!(!built.pushed);
            assert_eq!(built.digest.as_deref(), Some("sha256:pushedapi"));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(digests.len(), 1);
}

#[tokio::test]
async fn test_only_filter_limits_run() {
    let ws = Workspace::new();
    ws.manual("api", "api");
    ws.manual("web", "web");
    let daemon = Arc::new(FakeDaemon::default());

    let (summary, _) = pipeline(&ws, &daemon)
        .with_only(["web"])
        .run(ws.discover(), DigestCache::new())
        .await;

    assert_eq!(summary.projects.len(), 1);
    assert_eq!(summary.projects[0].service, "web");
    assert_eq!(daemon.builds.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_cancelled_run_builds_nothing() {
    let ws = Workspace::new();
    ws.manual("api", "api");
    let daemon = Arc::new(FakeDaemon::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let (summary, _) = pipeline(&ws, &daemon)
        .with_cancellation(cancel)
        .run(ws.discover(), DigestCache::new())
        .await;

    assert!(summary.cancelled);
    assert_eq!(summary.exit_code(), 2);
    assert_eq!(failure(&summary, "api").0, "cancelled");
    assert!(daemon.builds.lock().unwrap().is_empty());
    assert!(!ws.source.path().join(".dockyard").exists());
}

#[tokio::test]
async fn test_artifact_tokens_use_environment() {
    let ws = Workspace::new();
    ws.manual("api", "api");
    ws.write("api/deployment.yaml", "name: #{servicename}#\nenv: #{STAGE}#\nhost: #{HOST}#\n");
    let daemon = Arc::new(FakeDaemon::default());

    let env: BTreeMap<String, String> = [("STAGE".to_string(), "prod".to_string())].into();
    let (summary, _) = pipeline(&ws, &daemon)
        .with_env(env)
        .run(ws.discover(), DigestCache::new())
        .await;

    assert_eq!(summary.exit_code(), 0);
    assert_eq!(ws.artifact("api"), "name: api\nenv: prod\nhost: #{HOST}#\n");
}

#[tokio::test]
async fn test_artifacts_inside_source_tree_are_not_rediscovered() {
    let ws = Workspace::new();
    ws.manual("web", "web");
    let daemon = Arc::new(FakeDaemon::default());

    let mut config = ws.config();
    config.artifact_dir = ws.source.path().join("Buildscripts/dist");
    let excluded = config.excluded_paths();
    let run = |only: &[&str]| {
        let executor = BuildExecutor::new(daemon.clone()).with_output(true, false);
        Pipeline::new(config.clone(), executor).with_only(only.iter().copied())
    };

    artifacts::reset(&config.artifact_dir).unwrap();
    let (first, _) = run(&[])
        .run(discover(ws.source.path(), &excluded).unwrap(), DigestCache::new())
        .await;
    assert_eq!(first.exit_code(), 0);
    assert!(config.artifact_dir.join("web/buildsettings.json").is_file());

    // A filtered run keeps the artifact dir, so the copies are still on disk.
    let projects = discover(ws.source.path(), &excluded).unwrap();
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0].project_path, std::path::PathBuf::from("web"));
    let (filtered, _) = run(&["web"]).run(projects, DigestCache::new()).await;
    assert_eq!(filtered.projects.len(), 1);
    assert_eq!(filtered.exit_code(), 0);

    artifacts::reset(&config.artifact_dir).unwrap();
    let (full, _) = run(&[])
        .run(discover(ws.source.path(), &excluded).unwrap(), DigestCache::new())
        .await;
    assert_eq!(full.projects.len(), 1);
    assert_eq!(full.exit_code(), 0);
    assert_eq!(daemon.builds.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_root_context_reused_across_push_runs() {
    let ws = Workspace::new();
    ws.write(
        "api/buildsettings.json",
        r#"{"servicename": "api", "builder": {"type": "manual"}}"#,
    );
    ws.write("api/Dockerfile", "FROM alpine\n");
    let daemon = Arc::new(FakeDaemon::default());

    let mut config = ws.config();
    config.digest_cache_path = ws.source.path().join(".digestcache");
    config.artifact_dir = ws.source.path().join("Buildscripts/dist");
    let executor = BuildExecutor::new(daemon.clone()).with_output(true, false);
    let pipeline = Pipeline::new(config.clone(), executor).with_push(true);
    let excluded = config.excluded_paths();

    let (first, digests) = pipeline
        .run(discover(ws.source.path(), &excluded).unwrap(), DigestCache::load(&config.digest_cache_path))
        .await;
    digests.save(&config.digest_cache_path).unwrap();
    let (second, _) = pipeline
        .run(discover(ws.source.path(), &excluded).unwrap(), DigestCache::load(&config.digest_cache_path))
        .await;

    let (first, second) = (built(&first, "api"), built(&second, "api"));
    assert!(!first.context_reused);
    assert!(second.context_reused);
    assert_eq!(first.fingerprint, second.fingerprint);
    assert!(!second.pushed);
}

#[tokio::test]
async fn test_dotnet_without_descriptor_creates_no_archive() {
    let ws = Workspace::new();
    ws.write(
        "Api/buildsettings.json",
        r#"{"servicename": "api", "builder": {"type": "dotnet"}}"#,
    );
    ws.write("Api/Program.cs", "class Program {}");
    let daemon = Arc::new(FakeDaemon::default());

    let (summary, _) = pipeline(&ws, &daemon).run(ws.discover(), DigestCache::new()).await;

    assert_eq!(summary.exit_code(), 1);
    assert_eq!(failure(&summary, "api").0, "project-layout");
    assert!(daemon.builds.lock().unwrap().is_empty());

    let contexts = ws.config().scratch_dir.join("api").join("contexts");
    let archives = fs::read_dir(&contexts)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().map_or(false, |x| x == "tar"))
                .count()
        })
        .unwrap_or(0);
    assert_eq!(archives, 0);
}
