use serde::{Deserialize, Serialize};

/// A percentage that may be undefined because its denominator was zero.
///
/// Values are in percent units (`75.0` means 75 %). `Undefined` is never
/// represented as NaN or infinity and must not be confused with 0 %.
/// Serializes as a number, or `null` when undefined.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "Option<f64>", into = "Option<f64>")]
pub enum Percent {
    Defined(f64),
    Undefined,
}

impl Percent {
    /// `part / whole` as a percentage, undefined when `whole` is zero or the
    /// ratio does not fit in a finite `f64`.
    pub fn of(part: f64, whole: f64) -> Self {
        if whole == 0.0 {
            return Self::Undefined;
        }
        let value = part / whole * 100.0;
        if value.is_finite() {
            Self::Defined(value)
        } else {
            Self::Undefined
        }
    }

    pub fn value(self) -> Option<f64> {
        match self {
            Self::Defined(v) => Some(v),
            Self::Undefined => None,
        }
    }

    pub fn is_undefined(self) -> bool {
        matches!(self, Self::Undefined)
    }
}

impl From<Option<f64>> for Percent {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Self::Undefined, Self::Defined)
    }
}

impl From<Percent> for Option<f64> {
    fn from(value: Percent) -> Self {
        value.value()
    }
}

impl std::fmt::Display for Percent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Defined(v) => write!(f, "{v:+.1}%"),
            Self::Undefined => write!(f, "n/a"),
        }
    }
}

/// How much a node changed between the baseline and a candidate.
///
/// Ordered by importance: structural changes (`New`, `Removed`) rank above
/// every numeric classification, so subtree maxima surface them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Negligible,
    Minor,
    Significant,
    Major,
    /// Cost appeared where the baseline had none (zero or absent).
    New,
    /// Present in the baseline, gone from the candidate.
    Removed,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Negligible => "negligible",
            Self::Minor => "minor",
            Self::Significant => "significant",
            Self::Major => "major",
            Self::New => "new",
            Self::Removed => "removed",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a non-negligible change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Regression,
    Improvement,
}

/// Which trends occur at a node (or anywhere in its subtree).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendFlags {
    pub regressed: bool,
    pub improved: bool,
}

impl TrendFlags {
    pub fn with(mut self, trend: Trend) -> Self {
        match trend {
            Trend::Regression => self.regressed = true,
            Trend::Improvement => self.improved = true,
        }
        self
    }

    pub fn union(self, other: Self) -> Self {
        Self {
            regressed: self.regressed || other.regressed,
            improved: self.improved || other.improved,
        }
    }

    pub fn contains(self, trend: Trend) -> bool {
        match trend {
            Trend::Regression => self.regressed,
            Trend::Improvement => self.improved,
        }
    }
}
