//! # rpv - render profile comparison
//!
//! Loads two or more render profiles, compares them against a baseline and
//! prints the changed parts of the hierarchy.

mod args;
mod renderer;
mod settings;

use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use log::warn;
use render_profile_core::protocol::SharedStr;
use render_profile_core::{ComparisonSession, QueryFilter, SessionError, SortOrder, SortSpec};

use args::Args;
use settings::Settings;

const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            EXIT_ERROR
        }
    });
}

fn run() -> Result<()> {
    let args = Args::parse();
    let settings = match &args.config {
        Some(path) => settings::load(path)?,
        None => Settings::default(),
    };

    let mut session = ComparisonSession::new(settings.engine, settings.thresholds);
    for path in &args.profiles {
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read profile {}", path.display()))?;
        match session.load_bytes(&data, label_for(path)) {
            Ok(_) => {}
            Err(e @ (SessionError::Parse { .. } | SessionError::Malformed { .. }))
                if args.skip_malformed =>
            {
                warn!("skipping {e}");
            }
            Err(e) => return Err(e.into()),
        }
    }
    if session.is_empty() {
        anyhow::bail!("No profiles could be loaded");
    }
    session
        .set_baseline(args.baseline)
        .context("Invalid --baseline")?;

    let metrics: Option<BTreeSet<SharedStr>> = (!args.metrics.is_empty())
        .then(|| args.metrics.iter().map(|m| SharedStr::from(m.as_str())).collect());
    let comparison = session.compare(metrics.as_ref())?;

    let filter = QueryFilter {
        name_contains: args.name.clone(),
        min_severity: args.min_severity.map(Into::into),
        trend: args.trend.map(Into::into),
    };
    let sort = args.sort_metric.as_ref().map(|metric| SortSpec {
        metric: metric.clone(),
        by: args.sort_by.into(),
        slot: args.sort_slot,
        order: if args.ascending {
            SortOrder::Ascending
        } else {
            SortOrder::Descending
        },
    });
    let view = comparison.query(&filter, sort.as_ref());

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if args.json {
        renderer::write_json(&mut out, &comparison, &view)?;
    } else {
        renderer::write_text(&mut out, session.profiles(), &comparison, &view)?;
    }
    out.flush()?;
    Ok(())
}

fn label_for(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
