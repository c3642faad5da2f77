//! Command-line interface definitions for the `flotilla` binary.
//!
//! The parser structures live here so both the binary and the build script
//! can use them; the build script renders the manual page from them.

use clap::{Parser, Subcommand};

/// Top-level CLI for the `flotilla` binary.
#[derive(Debug, Parser)]
#[command(
    name = "flotilla",
    about = "Manage an Azure container group from a declarative JSON document",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// State file recording the managed group.
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        default_value = "flotilla.state.json"
    )]
    pub(crate) state: String,
    /// Operation to perform.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Subcommands of `flotilla`.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Create the group, or bring it in line with the document.
    #[command(name = "apply")]
    Apply(ApplyCommand),
    /// Re-read the group and update the state file.
    #[command(name = "refresh")]
    Refresh,
    /// Set tags on the managed group in place.
    #[command(name = "tag")]
    Tag(TagCommand),
    /// Delete the managed group.
    #[command(name = "destroy")]
    Destroy,
    /// Start managing an existing group.
    #[command(name = "import")]
    Import(ImportCommand),
    /// Print the attribute table as JSON.
    #[command(name = "schema")]
    Schema,
}

/// Arguments for `flotilla apply`.
#[derive(Debug, Parser)]
pub(crate) struct ApplyCommand {
    /// JSON document describing the container group.
    #[arg(value_name = "DOCUMENT")]
    pub(crate) document: String,
    /// Delete and recreate the group when an immutable attribute changed.
    #[arg(long)]
    pub(crate) replace: bool,
}

/// Arguments for `flotilla tag`.
#[derive(Debug, Parser)]
pub(crate) struct TagCommand {
    /// Tags to set, as `key=value`. An empty value removes the tag.
    #[arg(required = true, value_name = "KEY=VALUE")]
    pub(crate) tags: Vec<String>,
}

/// Arguments for `flotilla import`.
#[derive(Debug, Parser)]
pub(crate) struct ImportCommand {
    /// Full resource id of the container group.
    #[arg(value_name = "ID")]
    pub(crate) id: String,
}
