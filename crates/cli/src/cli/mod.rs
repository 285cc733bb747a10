pub mod commands;
pub mod output;

pub use commands::{BuildArgs, CliArgs, Commands, ListArgs, LogFormatArg, ReleaseArgs};
pub use output::{ListedProject, OutputFormat, OutputFormatter};
