//! Value types flowing through rules
//!
//! - RuleData: the `inputData` a rule transforms (plain JSON)
//! - MetaData: the pipeline-level `inputMetaData` carried alongside it
//! - WireMeta: the serializable subset of MetaData that may cross into a worker

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, RuleError};

/// Data transformed by rules
pub type RuleData = Value;

/// Deepest array/object nesting that may cross into a worker
///
/// Leaves headroom under serde_json's decode recursion limit for the job envelope.
pub const MAX_WIRE_DEPTH: usize = 100;

/// Array/object nesting depth of `value`; scalars are 0
pub fn nesting_depth(value: &Value) -> usize {
    let mut deepest = 0;
    let mut pending = vec![(value, 0usize)];
    while let Some((value, depth)) = pending.pop() {
        match value {
            Value::Array(items) => {
                deepest = deepest.max(depth + 1);
                pending.extend(items.iter().map(|v| (v, depth + 1)));
            },
            Value::Object(map) => {
                deepest = deepest.max(depth + 1);
                pending.extend(map.values().map(|v| (v, depth + 1)));
            },
            _ => {},
        }
    }
    deepest
}

/// Whether `value` can be decoded on the worker side
pub fn fits_wire(value: &Value) -> bool {
    nesting_depth(value) <= MAX_WIRE_DEPTH
}

pub(crate) fn check_wire_depth(value: &Value, what: &str) -> Result<()> {
    if fits_wire(value) {
        Ok(())
    } else {
        Err(RuleError::SerializationError(format!(
            "{} nested deeper than {} levels cannot be sent to a worker",
            what, MAX_WIRE_DEPTH
        )))
    }
}

/// Metadata accompanying a pipeline invocation
#[derive(Debug, Clone, Default)]
pub enum MetaData {
    /// No metadata supplied
    #[default]
    Empty,
    /// Plain JSON metadata (separators, bounds, options)
    Data(Value),
    /// Compiled regular expression; never leaves the calling thread
    Pattern(Regex),
}

impl MetaData {
    pub fn data(value: impl Into<Value>) -> Self {
        MetaData::Data(value.into())
    }

    /// Compile a pattern argument
    pub fn pattern(source: &str) -> Result<Self> {
        Regex::new(source)
            .map(MetaData::Pattern)
            .map_err(|e| RuleError::Config(format!("Invalid pattern '{}': {}", source, e)))
    }

    pub fn as_data(&self) -> Option<&Value> {
        match self {
            MetaData::Data(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_pattern(&self) -> Option<&Regex> {
        match self {
            MetaData::Pattern(re) => Some(re),
            _ => None,
        }
    }

    /// Whether this metadata can be handed to a worker
    pub fn is_transferable(&self) -> bool {
        match self {
            MetaData::Empty => true,
            MetaData::Data(value) => fits_wire(value),
            MetaData::Pattern(_) => false,
        }
    }

    pub fn kind(&self) -> MetaKind {
        match self {
            MetaData::Empty => MetaKind::None,
            MetaData::Data(_) => MetaKind::Data,
            MetaData::Pattern(_) => MetaKind::Pattern,
        }
    }
}

impl From<Value> for MetaData {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => MetaData::Empty,
            other => MetaData::Data(other),
        }
    }
}

/// Kind of metadata a rule signature accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetaKind {
    None,
    Data,
    Pattern,
}

impl std::fmt::Display for MetaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MetaKind::None => "none",
            MetaKind::Data => "data",
            MetaKind::Pattern => "pattern",
        };
        f.write_str(s)
    }
}

/// Serializable metadata sent to workers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum WireMeta {
    Empty,
    Data(Value),
}

impl TryFrom<&MetaData> for WireMeta {
    type Error = RuleError;

    fn try_from(meta: &MetaData) -> Result<Self> {
        match meta {
            MetaData::Empty => Ok(WireMeta::Empty),
            MetaData::Data(value) => {
                check_wire_depth(value, "metadata")?;
                Ok(WireMeta::Data(value.clone()))
            },
            MetaData::Pattern(re) => Err(RuleError::SerializationError(format!(
                "pattern metadata /{}/ cannot be sent to a worker",
                re.as_str()
            ))),
        }
    }
}

impl From<WireMeta> for MetaData {
    fn from(wire: WireMeta) -> Self {
        match wire {
            WireMeta::Empty => MetaData::Empty,
            WireMeta::Data(value) => MetaData::Data(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_null_becomes_empty_metadata() {
        assert!(matches!(MetaData::from(Value::Null), MetaData::Empty));
        assert_eq!(MetaData::from(json!(",")).kind(), MetaKind::Data);
    }

    #[test]
    fn test_pattern_is_not_transferable() {
        let meta = MetaData::pattern(r"\d+").unwrap();
        assert!(!meta.is_transferable());

        let err = WireMeta::try_from(&meta).unwrap_err();
        assert!(matches!(err, RuleError::SerializationError(_)));
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        assert!(MetaData::pattern("(unclosed").is_err());
    }

    fn nested(levels: usize) -> Value {
        (0..levels).fold(json!(1), |inner, _| json!([inner]))
    }

    #[test]
    fn test_nesting_depth() {
        assert_eq!(nesting_depth(&json!("flat")), 0);
        assert_eq!(nesting_depth(&json!([])), 1);
        assert_eq!(nesting_depth(&json!({"a": [1, {"b": []}]})), 4);
        assert_eq!(nesting_depth(&nested(200)), 200);
    }

    #[test]
    fn test_deep_metadata_stays_local() {
        assert!(MetaData::data(nested(MAX_WIRE_DEPTH)).is_transferable());

        let deep = MetaData::data(nested(MAX_WIRE_DEPTH + 1));
        assert!(!deep.is_transferable());
        let err = WireMeta::try_from(&deep).unwrap_err();
        assert!(matches!(err, RuleError::SerializationError(_)));
    }

    #[test]
    fn test_wire_meta_encoding() {
        let wire = WireMeta::try_from(&MetaData::data(json!({"min": 1}))).unwrap();
        let encoded = serde_json::to_value(&wire).unwrap();
        assert_eq!(encoded, json!({"kind": "data", "value": {"min": 1}}));
    }
}
