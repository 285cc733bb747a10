use bollard::auth::DockerCredentials;
use dockyard_buildkit::{BuildExecutor, CancellationToken, DockerBuildService};
use dockyard_cli::cli::{BuildArgs, CliArgs, Commands, ListArgs, ListedProject, OutputFormat, OutputFormatter, ReleaseArgs};
use dockyard_cli::{init_logging, resolve_level, NAME, VERSION};
use dockyard_core::{DockyardConfig, RealFileSystem};
use dockyard_pipeline::{artifacts, discover, release, DigestCache, Pipeline};
use dockyard_stack::BuilderRegistry;

use clap::Parser;
use std::collections::BTreeMap;
use std::env;
use std::process;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// The run could not start or could not finish as a whole.
const EXIT_FATAL: i32 = 2;

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    let config = DockyardConfig::default();

    let level = resolve_level(args.log_level.as_deref(), args.verbose, args.quiet, &config.log_level);
    init_logging(level, args.log_format);

    debug!("{} v{} starting", NAME, VERSION);

    let exit_code = match &args.command {
        Commands::Build(build_args) => handle_build(build_args, config, &args).await,
        Commands::List(list_args) => handle_list(list_args, config),
        Commands::Release(release_args) => handle_release(release_args, config, args.quiet),
    };

    process::exit(exit_code);
}

fn process_env() -> BTreeMap<String, String> {
    env::vars().collect()
}

fn registry_credentials(args: &BuildArgs, registry: Option<&str>) -> Option<DockerCredentials> {
    let username = args
        .registry_user
        .clone()
        .or_else(|| env::var("DOCKYARD_REGISTRY_USER").ok())
        .filter(|u| !u.is_empty())?;
    let password = args
        .registry_password
        .clone()
        .or_else(|| env::var("DOCKYARD_REGISTRY_PASSWORD").ok())
        .filter(|p| !p.is_empty())?;

    Some(DockerCredentials {
        username: Some(username),
        password: Some(password),
        serveraddress: registry.map(str::to_string),
        ..Default::default()
    })
}

async fn handle_build(args: &BuildArgs, mut config: DockyardConfig, cli: &CliArgs) -> i32 {
    if let Some(dir) = &args.source_dir {
        config.set_source_dir(dir);
    }
    if let Some(registry) = &args.registry {
        config.registry = Some(registry.trim_end_matches('/').to_string());
    }
    if let Some(build_id) = &args.build_id {
        config.build_id = build_id.clone();
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.to_lowercase();
    }
    if let Some(concurrency) = &args.concurrency {
        if let Err(e) = config.set_concurrency(concurrency) {
            error!("Configuration error: {}", e);
            return EXIT_FATAL;
        }
    }
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        eprintln!("\nPlease check your environment variables and command-line arguments.");
        return EXIT_FATAL;
    }
    if args.push && config.registry.is_none() {
        error!("--push needs a registry (--registry or DOCKYARD_REGISTRY)");
        return EXIT_FATAL;
    }
    debug!("{}", config);

    let credentials = registry_credentials(args, config.registry.as_deref());
    if args.push && credentials.is_none() {
        warn!("No registry credentials given, relying on the daemon's login state");
    }

    let service = match DockerBuildService::connect(credentials) {
        Ok(service) => service,
        Err(e) => {
            error!("{}", e);
            return EXIT_FATAL;
        }
    };

    // Clear last run's artifacts before scanning so their copied settings
    // files are never seen. Discovery prunes the directory as well, which
    // covers `--only` runs that keep it.
    let write_artifacts = !args.no_artifacts;
    if write_artifacts && args.only.is_empty() {
        if let Err(e) = artifacts::reset(&config.artifact_dir) {
            error!("Failed to prepare artifact directory: {}", e);
            return EXIT_FATAL;
        }
    }

    let projects = match discover(&config.source_dir, &config.excluded_paths()) {
        Ok(projects) => projects,
        Err(e) => {
            error!("Failed to scan {}: {}", config.source_dir.display(), e);
            return EXIT_FATAL;
        }
    };

    let digest_cache_path = config.digest_cache_path.clone();
    let digests = DigestCache::load(&digest_cache_path);
    debug!(entries = digests.len(), "Digest cache ready");

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling run");
                cancel.cancel();
            }
        });
    }

    let executor = BuildExecutor::new(Arc::new(service)).with_output(cli.quiet, cli.verbose);
    let pipeline = Pipeline::new(config, executor)
        .with_registry(BuilderRegistry::with_defaults())
        .with_filesystem(Arc::new(RealFileSystem))
        .with_cancellation(cancel)
        .with_only(args.only.clone())
        .with_push(args.push)
        .with_artifacts(write_artifacts)
        .with_env(process_env());

    let (summary, digests) = pipeline.run(projects, digests).await;

    if let Err(e) = digests.save(&digest_cache_path) {
        warn!(error = %e, "Could not persist digest cache");
    }

    if !cli.quiet {
        match OutputFormatter::new(OutputFormat::Human).format_summary(&summary) {
            Ok(text) => print!("{}", text),
            Err(e) => error!("{}", e),
        }
    }

    summary.exit_code()
}

fn handle_list(args: &ListArgs, mut config: DockyardConfig) -> i32 {
    if let Some(dir) = &args.source_dir {
        config.set_source_dir(dir);
    }

    let projects = match discover(&config.source_dir, &config.excluded_paths()) {
        Ok(projects) => projects,
        Err(e) => {
            error!("Failed to scan {}: {}", config.source_dir.display(), e);
            return EXIT_FATAL;
        }
    };

    let registry = BuilderRegistry::with_defaults();
    debug!(builders = ?registry.builder_names(), "Registered builders");
    let fs = RealFileSystem;
    let listed: Vec<ListedProject> = projects
        .iter()
        .map(|project| ListedProject::new(project, registry.build_arguments(project, &fs)))
        .collect();

    match OutputFormatter::new(args.format.into()).format_projects(&listed) {
        Ok(text) => {
            print!("{}", text);
            if !text.ends_with('\n') {
                println!();
            }
        }
        Err(e) => {
            error!("{}", e);
            return EXIT_FATAL;
        }
    }

    if listed.iter().any(|p| p.error.is_some()) {
        1
    } else {
        0
    }
}

fn handle_release(args: &ReleaseArgs, config: DockyardConfig, quiet: bool) -> i32 {
    let artifact_dir = args.artifact_dir.clone().unwrap_or(config.artifact_dir);
    info!(path = %artifact_dir.display(), "Assembling release files");

    match release(&artifact_dir, &process_env()) {
        Ok(summary) => {
            if !quiet {
                match OutputFormatter::new(OutputFormat::Human).format_release(&summary) {
                    Ok(text) => print!("{}", text),
                    Err(e) => error!("{}", e),
                }
            }
            0
        }
        Err(e) => {
            error!("Release failed: {:#}", e);
            1
        }
    }
}
