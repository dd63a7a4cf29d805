use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Directory holding sources and scan history (default: $TOCSCAN_DATA_DIR or ./tocscan-data).
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// More log output (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Source {
        #[command(subcommand)]
        command: SourceCommand,
    },
    /// Fetch the remote listing and reconcile stored chapters.
    Scan(ScanArgs),
    /// Print scan status and the last scan of a source.
    Status(SourceArgs),
    /// Print the stored chapter list of a source.
    Chapters(SourceArgs),
    /// Print every scan record of a source.
    History(SourceArgs),
    /// Print the change log of a source.
    Changes(SourceArgs),
}

#[derive(Debug, Subcommand)]
pub enum SourceCommand {
    /// Create or replace a source from a YAML definition.
    Add(SourceAddArgs),
    /// List registered sources.
    List,
}

#[derive(Debug, Args)]
pub struct SourceAddArgs {
    /// Path to the source definition (YAML).
    #[arg(long)]
    pub file: PathBuf,
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Source id to scan.
    #[arg(long, required_unless_present = "all", conflicts_with = "all")]
    pub source: Option<String>,

    /// Scan every enabled source concurrently.
    #[arg(long)]
    pub all: bool,
}

#[derive(Debug, Args)]
pub struct SourceArgs {
    /// Source id.
    #[arg(long)]
    pub source: String,
}
