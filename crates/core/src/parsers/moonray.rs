use render_profile_protocol::{ProfileMeta, RawProfile, RawRecord, SourceFormat};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MoonrayParseError {
    #[error("invalid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("no MCRT time breakdown found")]
    NoBreakdown,
}

/// Marker that identifies a MoonRay render log.
pub const BREAKDOWN_MARKER: &str = "MCRT Time Breakdown";
const RENDER_PREP_MARKER: &str = "Render Prep Stats";
const MEMORY_MARKER: &str = "Memory Summary";

/// `(render mode, requested execution mode)` pairs that mean the renderer
/// fell back from the requested mode.
const FALLBACKS: [(&str, &str); 5] = [
    ("scalar", "xpu"),
    ("vector", "xpu"),
    ("scalar", "vector"),
    ("vector", "auto"),
    ("scalar", "auto"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Breakdown,
    RenderPrep,
    Memory,
}

#[derive(Debug, Default)]
struct LogStats {
    breakdown: Vec<(String, f64)>,
    mcrt_time: Option<f64>,
    totals_memory: Option<f64>,
    render_prep: Vec<(String, f64)>,
    render_prep_time: Option<f64>,
    memory: Vec<(String, f64)>,
    render_prep_memory: Option<f64>,
    pixel_samples: Option<f64>,
    found_breakdown: bool,
}

/// Parse a MoonRay render log into a nested profile.
///
/// The resulting tree is:
///
/// ```text
/// frame                 pixel_samples (millions)
/// ├── Render prep       time (s), one child per prep stage
/// ├── MCRT              time (s), one child per breakdown row
/// └── Memory
///     ├── Render prep memory   memory (GB), one child per summary line
///     └── MCRT memory          memory (GB)
/// ```
///
/// Host, crash and fallback facts go into the profile metadata.
pub fn parse_moonray_log(data: &[u8]) -> Result<RawProfile, MoonrayParseError> {
    let text = std::str::from_utf8(data)?;
    let mut stats = LogStats::default();
    let mut meta = ProfileMeta {
        source_format: SourceFormat::MoonrayLog,
        ..ProfileMeta::default()
    };
    let mut section = Section::None;

    for (number, line) in text.lines().enumerate() {
        let number = number + 1;
        if let Some(mode) = fallback_mode(line) {
            meta.attributes
                .insert("fallback_mode".to_string(), mode.to_string());
        }
        // The breakdown header ends any unterminated prep or memory section.
        if section != Section::Breakdown && line.contains(BREAKDOWN_MARKER) {
            section = Section::Breakdown;
            stats.found_breakdown = true;
            continue;
        }

        match section {
            Section::Breakdown => {
                if line.contains("Totals") {
                    let tokens: Vec<&str> = line.split_whitespace().collect();
                    stats.mcrt_time = tokens
                        .len()
                        .checked_sub(2)
                        .and_then(|i| parse_number(tokens[i]));
                    stats.totals_memory = match (tokens.get(1), tokens.get(2)) {
                        (Some(size), Some(unit)) => gigabytes(size, unit),
                        _ => None,
                    };
                    if stats.mcrt_time.is_none() {
                        log::warn!("moonray log line {number}: unreadable MCRT totals");
                    }
                    section = Section::None;
                } else if line.contains("----") || line.contains("Total") || line.contains("Avg Time per") {
                    continue;
                } else if let Some(row) = breakdown_row(line) {
                    stats.breakdown.push(row);
                } else if !line.trim().is_empty() {
                    log::debug!("moonray log line {number}: skipped breakdown row {line:?}");
                }
            }
            Section::RenderPrep => {
                if line.contains("Total render prep") {
                    stats.render_prep_time = line.split_whitespace().last().and_then(seconds);
                    section = Section::None;
                } else if let Some((name, value)) = line.split_once('=') {
                    match value.split_whitespace().last().and_then(seconds) {
                        Some(secs) => stats.render_prep.push((name.trim().to_string(), secs)),
                        None => log::warn!("moonray log line {number}: unreadable stage time {line:?}"),
                    }
                }
            }
            Section::Memory => {
                if line.contains("Total memory") {
                    stats.render_prep_memory = size_at_end(line);
                    section = Section::None;
                } else if let Some((name, _)) = line.split_once('=') {
                    match size_at_end(line) {
                        Some(gb) => stats.memory.push((name.trim().to_string(), gb)),
                        None => log::warn!("moonray log line {number}: unreadable memory size {line:?}"),
                    }
                }
            }
            Section::None => {
                if line.contains(RENDER_PREP_MARKER) {
                    section = Section::RenderPrep;
                } else if line.contains(MEMORY_MARKER) {
                    section = Section::Memory;
                } else if line.contains("Pixel samples") && !line.contains("Pixel samples sqrt") {
                    stats.pixel_samples = line
                        .split_once('=')
                        .and_then(|(_, value)| parse_number(&value.replace(' ', "")))
                        .map(|samples| samples / 1_000_000.0);
                } else if line.contains("Host name") {
                    if let Some((_, host)) = line.split_once('=') {
                        meta.host = Some(host.replace(' ', "").trim().to_string());
                    }
                } else if line.contains("Wrote") {
                    if !meta.attributes.contains_key("output_image")
                        && let Some(image) = line.split_whitespace().nth(1)
                        && image.ends_with("Image.exr")
                    {
                        meta.attributes
                            .insert("output_image".to_string(), image.to_string());
                    }
                } else if line.contains("-- Callstack:") {
                    meta.crashed = true;
                }
            }
        }
    }

    if !stats.found_breakdown {
        return Err(MoonrayParseError::NoBreakdown);
    }
    log::debug!(
        "moonray log: {} breakdown rows, {} prep stages, {} memory lines",
        stats.breakdown.len(),
        stats.render_prep.len(),
        stats.memory.len()
    );
    Ok(RawProfile {
        meta,
        root: build_root(stats),
    })
}

fn build_root(stats: LogStats) -> RawRecord {
    let mut root = RawRecord::new("frame");
    if let Some(samples) = stats.pixel_samples {
        root = root.with_metric("pixel_samples", samples);
    }

    let mut prep = RawRecord::new("Render prep");
    if let Some(total) = stats.render_prep_time {
        prep = prep.with_metric("time", total);
    }
    for (name, secs) in stats.render_prep {
        prep = prep.with_child(RawRecord::new(name).with_metric("time", secs));
    }

    let mut mcrt = RawRecord::new("MCRT");
    if let Some(total) = stats.mcrt_time {
        mcrt = mcrt.with_metric("time", total);
    }
    for (name, secs) in stats.breakdown {
        mcrt = mcrt.with_child(RawRecord::new(name).with_metric("time", secs));
    }

    let mut prep_memory = RawRecord::new("Render prep memory");
    if let Some(total) = stats.render_prep_memory {
        prep_memory = prep_memory.with_metric("memory", total);
    }
    for (name, gb) in stats.memory {
        prep_memory = prep_memory.with_child(RawRecord::new(name).with_metric("memory", gb));
    }
    let mut memory = RawRecord::new("Memory").with_child(prep_memory);
    if let Some(totals) = stats.totals_memory {
        let mcrt_memory = totals - stats.render_prep_memory.unwrap_or(0.0);
        if mcrt_memory < 0.0 {
            log::warn!("moonray log: MCRT totals memory {totals} GB is below render prep memory");
        }
        memory = memory.with_child(RawRecord::new("MCRT memory").with_metric("memory", mcrt_memory.max(0.0)));
    }

    root.with_child(prep).with_child(mcrt).with_child(memory)
}

/// `Executing a <mode> render since execution mode was set to <requested>.`
fn fallback_mode(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("Executing a ")?;
    let (mode, requested) = rest.split_once(" render since execution mode was set to ")?;
    let requested = requested.split('.').next().unwrap_or(requested).trim();
    FALLBACKS
        .iter()
        .any(|&(m, r)| m == mode && r == requested)
        .then_some(mode)
}

/// Breakdown rows carry the stat name after `|` and the time second to last.
fn breakdown_row(line: &str) -> Option<(String, f64)> {
    let (_, rest) = line.split_once('|')?;
    let rest = rest.strip_prefix(' ').unwrap_or(rest);
    let name = match rest.find("  ") {
        Some(end) => &rest[..end],
        None => rest,
    }
    .trim();
    if name.is_empty() {
        return None;
    }
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let time = parse_number(tokens.get(tokens.len().checked_sub(2)?)?)?;
    Some((name.to_string(), time))
}

fn parse_number(token: &str) -> Option<f64> {
    let value: f64 = token.trim().replace(',', "").parse().ok()?;
    (value.is_finite() && value >= 0.0).then_some(value)
}

/// `h:m:s` (fractional seconds allowed) to seconds.
fn seconds(time: &str) -> Option<f64> {
    let mut parts = time.rsplitn(3, ':');
    let secs = parse_number(parts.next()?)?;
    let minutes = parse_number(parts.next()?)?;
    let hours = parse_number(parts.next()?)?;
    Some(secs + minutes * 60.0 + hours * 3600.0)
}

fn gigabytes(size: &str, unit: &str) -> Option<f64> {
    let size = parse_number(size)?;
    match unit {
        "GB" => Some(size),
        "MB" => Some(size / 1024.0),
        "KB" => Some(size / 1024.0 / 1024.0),
        _ => None,
    }
}

fn size_at_end(line: &str) -> Option<f64> {
    let mut tokens = line.split_whitespace().rev();
    let unit = tokens.next()?;
    let size = tokens.next()?;
    gigabytes(size, unit)
}
