use render_profile_protocol::{RawProfile, RawRecord, RecordTable, SourceFormat};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use super::RawInput;

#[derive(Debug, Error)]
pub enum JsonParseError {
    #[error("invalid JSON: {0}")]
    Syntax(#[from] serde_json::Error),
    #[error("nesting depth {depth} exceeds the limit of {limit}")]
    TooDeep { depth: usize, limit: usize },
    #[error("not a render profile: {0}")]
    Shape(&'static str),
}

/// Deepest JSON nesting accepted for a tree of `max_depth` levels. Each
/// record level costs an object plus its `children` array, and the wrapper
/// and metric mappings add a few more.
pub fn nesting_limit(max_depth: usize) -> usize {
    max_depth.saturating_mul(2).saturating_add(8)
}

/// Maximum bracket nesting of a JSON document, ignoring brackets in strings.
///
/// Runs before parsing so an adversarially deep document is rejected without
/// recursing into it.
pub fn nesting_depth(data: &[u8]) -> usize {
    let mut depth = 0usize;
    let mut deepest = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for &byte in data {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' | b'[' => {
                depth += 1;
                deepest = deepest.max(depth);
            }
            b'}' | b']' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    deepest
}

/// Parse a JSON profile in any of the accepted shapes:
///
/// - `{ "meta": {...}, "root": {record} }` (nested profile)
/// - `{ "meta": {...}, "root": id, "records": [...] }` (record table)
/// - a bare `{ "name": ..., "children": [...] }` record
pub fn parse_json_profile(data: &[u8], max_depth: usize) -> Result<RawInput, JsonParseError> {
    let depth = nesting_depth(data);
    let limit = nesting_limit(max_depth);
    if depth > limit {
        return Err(JsonParseError::TooDeep { depth, limit });
    }

    let mut deserializer = serde_json::Deserializer::from_slice(data);
    deserializer.disable_recursion_limit();
    let value = Value::deserialize(&mut deserializer)?;
    deserializer.end()?;

    let Some(obj) = value.as_object() else {
        return Err(JsonParseError::Shape("top level is not an object"));
    };

    if obj.contains_key("records") && obj.get("root").is_some_and(Value::is_u64) {
        let mut table: RecordTable = serde_json::from_value(value)?;
        if table.meta.source_format == SourceFormat::Unknown {
            table.meta.source_format = SourceFormat::RecordTable;
        }
        return Ok(RawInput::Table(table));
    }

    if obj.get("root").is_some_and(Value::is_object) {
        let mut profile: RawProfile = serde_json::from_value(value)?;
        if profile.meta.source_format == SourceFormat::Unknown {
            profile.meta.source_format = SourceFormat::NestedJson;
        }
        return Ok(RawInput::Nested(profile));
    }

    if obj.get("name").is_some_and(Value::is_string) {
        let root: RawRecord = serde_json::from_value(value)?;
        let mut profile = RawProfile {
            meta: Default::default(),
            root,
        };
        profile.meta.source_format = SourceFormat::NestedJson;
        return Ok(RawInput::Nested(profile));
    }

    Err(JsonParseError::Shape("expected a `root` or a `name` key"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_scan_ignores_strings() {
        assert_eq!(nesting_depth(br#"{"a": [1, {"b": 2}]}"#), 3);
        assert_eq!(nesting_depth(br#"{"name": "[[[{{{", "x": "\"{"}"#), 1);
        assert_eq!(nesting_depth(b"42"), 0);
    }

    #[test]
    fn parse_nested_profile() {
        let input = br#"{
            "meta": { "label": "shot_010" },
            "root": {
                "name": "frame",
                "children": [
                    { "name": "MCRT", "metrics": { "time": 12.5 } },
                    { "name": "Render prep", "metrics": { "time": { "self": 1.0, "total": 3.0 } } }
                ]
            }
        }"#;
        let input = parse_json_profile(input, 256).unwrap();
        assert_eq!(input.meta().label.as_deref(), Some("shot_010"));
        assert_eq!(input.meta().source_format, SourceFormat::NestedJson);
        let RawInput::Nested(profile) = input else {
            panic!("expected a nested profile");
        };
        assert_eq!(profile.root.children.len(), 2);
    }

    #[test]
    fn parse_bare_record() {
        let input = br#"{ "name": "frame", "metrics": { "time": 1 } }"#;
        let input = parse_json_profile(input, 256).unwrap();
        assert!(matches!(input, RawInput::Nested(ref p) if p.root.name == "frame"));
    }

    #[test]
    fn parse_record_table() {
        let input = br#"{
            "root": 1,
            "records": [
                { "id": 1, "name": "frame", "children": [2] },
                { "id": 2, "name": "MCRT", "metrics": { "time": 4 } }
            ]
        }"#;
        let input = parse_json_profile(input, 256).unwrap();
        assert_eq!(input.meta().source_format, SourceFormat::RecordTable);
        assert!(matches!(input, RawInput::Table(ref t) if t.records.len() == 2));
    }

    #[test]
    fn rejects_deep_documents_before_parsing() {
        let mut doc = String::new();
        for _ in 0..100 {
            doc.push_str(r#"{"name":"n","children":["#);
        }
        doc.push_str(r#"{"name":"leaf"}"#);
        for _ in 0..100 {
            doc.push_str("]}");
        }
        let err = parse_json_profile(doc.as_bytes(), 10).unwrap_err();
        assert!(matches!(err, JsonParseError::TooDeep { limit: 28, .. }));
        assert!(parse_json_profile(doc.as_bytes(), 256).is_ok());
    }

    #[test]
    fn rejects_other_json() {
        assert!(matches!(
            parse_json_profile(b"[1, 2]", 256),
            Err(JsonParseError::Shape(_))
        ));
        assert!(matches!(
            parse_json_profile(br#"{"traceEvents": []}"#, 256),
            Err(JsonParseError::Shape(_))
        ));
        assert!(matches!(
            parse_json_profile(b"{", 256),
            Err(JsonParseError::Syntax(_))
        ));
    }
}
