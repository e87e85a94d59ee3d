pub mod json;
pub mod moonray;

use render_profile_protocol::{ProfileMeta, RawProfile, RecordTable};
use thiserror::Error;

use crate::config::EngineConfig;
use crate::model::{MalformedProfile, ProfileTree, build_tree, build_tree_from_table};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("json: {0}")]
    Json(#[from] json::JsonParseError),
    #[error("moonray: {0}")]
    Moonray(#[from] moonray::MoonrayParseError),
    #[error("unable to detect format")]
    UnknownFormat,
}

/// A parsed profile in whichever shape its reader produced.
#[derive(Debug, Clone)]
pub enum RawInput {
    Nested(RawProfile),
    Table(RecordTable),
}

impl RawInput {
    pub fn meta(&self) -> &ProfileMeta {
        match self {
            Self::Nested(profile) => &profile.meta,
            Self::Table(table) => &table.meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut ProfileMeta {
        match self {
            Self::Nested(profile) => &mut profile.meta,
            Self::Table(table) => &mut table.meta,
        }
    }

    /// Normalize into a `ProfileTree`.
    pub fn build(&self, config: &EngineConfig) -> Result<ProfileTree, MalformedProfile> {
        match self {
            Self::Nested(profile) => build_tree(profile, config),
            Self::Table(table) => build_tree_from_table(table, config),
        }
    }
}

impl From<RawProfile> for RawInput {
    fn from(profile: RawProfile) -> Self {
        Self::Nested(profile)
    }
}

impl From<RecordTable> for RawInput {
    fn from(table: RecordTable) -> Self {
        Self::Table(table)
    }
}

/// Auto-detect the profile format and parse it.
///
/// Detection strategy:
/// 1. A document starting with `{` is a JSON profile (nested, bare record or
///    record table, told apart by its top-level keys).
/// 2. Text containing an MCRT time breakdown is a MoonRay render log.
pub fn parse_auto(data: &[u8], config: &EngineConfig) -> Result<RawInput, ParseError> {
    let first = data.iter().copied().find(|b| !b.is_ascii_whitespace());
    if first == Some(b'{') {
        return Ok(json::parse_json_profile(data, config.max_depth)?);
    }

    if let Ok(text) = std::str::from_utf8(data)
        && text.contains(moonray::BREAKDOWN_MARKER)
    {
        return Ok(moonray::parse_moonray_log(data)?.into());
    }

    Err(ParseError::UnknownFormat)
}
