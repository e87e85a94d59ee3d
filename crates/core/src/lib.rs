//! Comparison engine for render profiles.
//!
//! ```text
//!   RawRecord ─▶ ProfileTree ─┐
//!   RawRecord ─▶ ProfileTree ─┼─▶ MergedTree ─▶ MergedAggregates ─▶ MergedDiff ─▶ QueryView
//!   RawRecord ─▶ ProfileTree ─┘     (merge)        (aggregate)         (diff)       (query)
//! ```
//!
//! Trees are immutable once built. Everything derived from them (aggregates,
//! diffs, query indexes) is a side table keyed by node id, so a comparison can
//! be recomputed with different settings without touching the inputs.

pub mod aggregate;
pub mod config;
pub mod diff;
pub mod merge;
pub mod model;
pub mod parsers;
pub mod query;
pub mod session;

pub use aggregate::{
    AggregateResult, MergedAggregates, MetricStats, SlotSpread, TreeAggregates, aggregate,
    aggregate_merged,
};
pub use config::{
    ConfigError, EngineConfig, MetricPolicy, Reconcile, SeverityThresholds, ThresholdConfig,
    ValueKind,
};
pub use diff::{DiffError, DiffResult, MergedDiff, MetricDelta, SlotDiff, SlotPresence, diff};
pub use merge::{DuplicateIdentity, MergeError, MergeOutput, MergedId, MergedNode, MergedTree, merge};
pub use model::{
    MalformedProfile, NodeId, NodeKey, ProfileNode, ProfileTree, TreeWarning, build_tree,
    build_tree_from_table,
};
pub use parsers::{ParseError, RawInput, parse_auto};
pub use query::{DeltaKind, QueryFilter, QueryIndex, QueryView, SortOrder, SortSpec, ViewNode};
pub use session::{Comparison, ComparisonSession, ProfileEntry, SessionError};

pub use render_profile_protocol as protocol;
