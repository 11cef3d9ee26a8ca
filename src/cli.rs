use std::path::PathBuf;

use clap::Parser;

use crate::inject::DeliveryMode;

/// diffreview: AI review of the uncommitted changes in one file
#[derive(Parser, Debug, Clone)]
#[command(name = "diffreview", version, about)]
pub struct Cli {
    /// File to review
    pub file: PathBuf,

    /// One-based line to insert the review at (buffer delivery)
    #[arg(long)]
    pub line: Option<usize>,

    /// Project root to fall back to when no repository sits above the file
    #[arg(long)]
    pub workspace: Option<PathBuf>,

    /// Where to put the review (buffer, automation)
    #[arg(long, value_enum)]
    pub delivery: Option<DeliveryMode>,

    /// Application to type the review into (automation delivery)
    #[arg(long)]
    pub target_app: Option<String>,

    /// Chat model to use
    #[arg(long)]
    pub model: Option<String>,

    /// Path to config file (default: .diffreview.toml if present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Ask whether to preview the review before inserting it
    #[arg(long)]
    pub preview: bool,

    /// Answer yes to every prompt
    #[arg(long, short = 'y')]
    pub yes: bool,
}
