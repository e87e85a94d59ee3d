use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use render_profile_core::DeltaKind;
use render_profile_core::protocol::{Severity, Trend};

#[derive(Parser)]
#[command(
    name = "rpv",
    about = "Compare render profiles and highlight what changed",
    after_help = "\
EXAMPLES:
    rpv week41.log week42.log                      Compare two MoonRay logs
    rpv a.json b.json c.json --baseline 1          Compare against the second profile
    rpv a.log b.log --min-severity significant     Only show significant changes
    rpv a.log b.log --sort-metric time --json      Sorted comparison as JSON"
)]
pub struct Args {
    /// Profiles to compare (JSON profiles or MoonRay render logs)
    #[arg(value_name = "PROFILES", required = true)]
    pub profiles: Vec<PathBuf>,

    /// Index of the baseline profile
    #[arg(short, long, default_value = "0")]
    pub baseline: usize,

    /// TOML file with [engine] and [thresholds] tables
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Only compare these metrics (repeatable; default: all)
    #[arg(short, long = "metric", value_name = "NAME")]
    pub metrics: Vec<String>,

    /// Only show nodes whose name contains this text (case-insensitive)
    #[arg(short, long)]
    pub name: Option<String>,

    /// Only show nodes at or above this severity
    #[arg(long, value_enum)]
    pub min_severity: Option<SeverityArg>,

    /// Only show regressions or improvements
    #[arg(long, value_enum)]
    pub trend: Option<TrendArg>,

    /// Sort siblings by the delta of this metric
    #[arg(long, value_name = "METRIC")]
    pub sort_metric: Option<String>,

    /// Sort by absolute or relative delta
    #[arg(long, value_enum, default_value = "absolute", requires = "sort_metric")]
    pub sort_by: SortBy,

    /// Sort ascending instead of descending
    #[arg(long, requires = "sort_metric")]
    pub ascending: bool,

    /// Candidate slot to sort by (default: first non-baseline profile)
    #[arg(long, requires = "sort_metric")]
    pub sort_slot: Option<usize>,

    /// Skip profiles that fail to parse instead of aborting
    #[arg(long)]
    pub skip_malformed: bool,

    /// Print the comparison as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SeverityArg {
    Negligible,
    Minor,
    Significant,
    Major,
    New,
    Removed,
}

impl From<SeverityArg> for Severity {
    fn from(arg: SeverityArg) -> Self {
        match arg {
            SeverityArg::Negligible => Self::Negligible,
            SeverityArg::Minor => Self::Minor,
            SeverityArg::Significant => Self::Significant,
            SeverityArg::Major => Self::Major,
            SeverityArg::New => Self::New,
            SeverityArg::Removed => Self::Removed,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TrendArg {
    Regression,
    Improvement,
}

impl From<TrendArg> for Trend {
    fn from(arg: TrendArg) -> Self {
        match arg {
            TrendArg::Regression => Self::Regression,
            TrendArg::Improvement => Self::Improvement,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SortBy {
    Absolute,
    Relative,
}

impl From<SortBy> for DeltaKind {
    fn from(arg: SortBy) -> Self {
        match arg {
            SortBy::Absolute => Self::Absolute,
            SortBy::Relative => Self::Relative,
        }
    }
}
