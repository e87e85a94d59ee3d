use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Profile-level metadata carried alongside a tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileMeta {
    /// Human-readable source label (file name, custom name, week, …).
    #[serde(default)]
    pub label: Option<String>,
    /// When the profile was produced, as reported by the source.
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Frame or job identifier.
    #[serde(default)]
    pub frame: Option<String>,
    #[serde(default)]
    pub source_format: SourceFormat,
    /// Render host, if the source reports one.
    #[serde(default)]
    pub host: Option<String>,
    /// The render crashed before finishing (partial statistics).
    #[serde(default)]
    pub crashed: bool,
    /// Free-form facts the reader found (output image, fallback mode, …).
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl ProfileMeta {
    /// Metadata with only a label set.
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::default()
        }
    }

    /// Label for display, falling back to the frame id.
    pub fn display_label(&self) -> &str {
        self.label
            .as_deref()
            .or(self.frame.as_deref())
            .unwrap_or("<unnamed>")
    }
}

/// The format a profile was read from. Informational only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceFormat {
    NestedJson,
    RecordTable,
    MoonrayLog,
    #[default]
    Unknown,
}

impl std::fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NestedJson => write!(f, "Nested JSON"),
            Self::RecordTable => write!(f, "Record table"),
            Self::MoonrayLog => write!(f, "MoonRay log"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}
