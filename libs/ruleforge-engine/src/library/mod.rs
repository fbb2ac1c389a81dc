//! Standard rule library
//!
//! Plain data transformations registered in the catalog. Each body takes the
//! current `inputData`, the pipeline metadata and a context for calling the rules
//! it depends on.

pub mod arrays;
pub mod math;
pub mod strings;

use serde_json::Value;

use crate::catalog::RuleId;
use crate::error::{Result, RuleError};

pub(crate) fn expect_str(rule: RuleId, data: &Value) -> Result<&str> {
    data.as_str().ok_or_else(|| {
        RuleError::invalid_input(rule, format!("expected a string, got {}", kind_of(data)))
    })
}

pub(crate) fn expect_array(rule: RuleId, data: Value) -> Result<Vec<Value>> {
    match data {
        Value::Array(items) => Ok(items),
        other => Err(RuleError::invalid_input(
            rule,
            format!("expected an array, got {}", kind_of(&other)),
        )),
    }
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
