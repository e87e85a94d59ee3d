pub mod meta;
pub mod record;
pub mod severity;
pub mod shared_str;

pub use meta::{ProfileMeta, SourceFormat};
pub use record::{RawProfile, RawRecord, RecordTable, TableRecord};
pub use severity::{Percent, Severity, Trend, TrendFlags};
pub use shared_str::SharedStr;
