use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Builds container images for every configured project in a source tree
#[derive(Parser, Debug)]
#[command(
    name = "dockyard",
    about = "Builds container images for every configured project in a source tree",
    version,
    long_about = "dockyard finds buildsettings.json files in a source tree, generates or \
                  locates a Dockerfile for each project, packages a cached build context and \
                  builds the image through the local Docker daemon."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value = "text",
        help = "Log line format"
    )]
    pub log_format: LogFormatArg,

    #[arg(short = 'v', long, global = true, help = "Verbose output, including build logs")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Build images for all discovered projects",
        long_about = "Discovers projects, packages their build contexts and builds an image \
                      per project. Optionally pushes to a registry and writes deployment \
                      artifacts.\n\n\
                      Examples:\n  \
                      dockyard build\n  \
                      dockyard build /path/to/repo --only api,web\n  \
                      dockyard build --registry myregistry.azurecr.io --push"
    )]
    Build(BuildArgs),

    #[command(
        about = "List discovered projects and their build contexts",
        long_about = "Runs discovery and builder dispatch without packaging or building.\n\n\
                      Examples:\n  \
                      dockyard list\n  \
                      dockyard list --format json"
    )]
    List(ListArgs),

    #[command(
        about = "Assemble per-cluster deployment files from build artifacts",
        long_about = "Reads the deployment artifacts of a previous build, replaces #{KEY}# \
                      tokens from the environment and writes one <cluster>_deployment.yaml \
                      per cluster.\n\n\
                      Examples:\n  \
                      dockyard release\n  \
                      dockyard release --artifact-dir ./dist"
    )]
    Release(ReleaseArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct BuildArgs {
    #[arg(
        value_name = "PATH",
        help = "Source tree to scan (defaults to DOCKYARD_SOURCE_DIR or the current directory)"
    )]
    pub source_dir: Option<PathBuf>,

    #[arg(
        long,
        value_name = "SERVICES",
        value_delimiter = ',',
        help = "Only build these services (comma separated)"
    )]
    pub only: Vec<String>,

    #[arg(long, help = "Push built images to the registry")]
    pub push: bool,

    #[arg(long, value_name = "HOST", help = "Container registry for image tags")]
    pub registry: Option<String>,

    #[arg(
        long,
        value_name = "USER",
        help = "Registry user (defaults to DOCKYARD_REGISTRY_USER)"
    )]
    pub registry_user: Option<String>,

    #[arg(
        long,
        value_name = "PASSWORD",
        help = "Registry password (defaults to DOCKYARD_REGISTRY_PASSWORD)"
    )]
    pub registry_password: Option<String>,

    #[arg(long, value_name = "ID", help = "Image tag to build")]
    pub build_id: Option<String>,

    #[arg(short = 'j', long, value_name = "N", help = "Projects built in parallel")]
    pub concurrency: Option<String>,

    #[arg(long, help = "Skip writing deployment artifacts")]
    pub no_artifacts: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct ListArgs {
    #[arg(value_name = "PATH", help = "Source tree to scan")]
    pub source_dir: Option<PathBuf>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct ReleaseArgs {
    #[arg(
        long,
        value_name = "DIR",
        help = "Artifact directory (defaults to DOCKYARD_ARTIFACT_DIR)"
    )]
    pub artifact_dir: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormatArg {
    Json,
    Human,
}

impl From<OutputFormatArg> for super::output::OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Json => super::output::OutputFormat::Json,
            OutputFormatArg::Human => super::output::OutputFormat::Human,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormatArg {
    Text,
    Json,
}
