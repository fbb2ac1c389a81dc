//! arrayParsing rules

use rustc_hash::FxHashSet;
use serde_json::Value;
use std::cmp::Ordering;

use super::{expect_array, kind_of};
use crate::catalog::RuleId;
use crate::context::RuleContext;
use crate::error::{Result, RuleError};
use crate::types::{MetaData, RuleData};

const DEFAULT_SEPARATOR: &str = ",";

pub fn array_length(_ctx: &RuleContext<'_>, data: RuleData, _meta: &MetaData) -> Result<RuleData> {
    let items = expect_array(RuleId::ArrayLength, data)?;
    Ok(Value::from(items.len()))
}

pub fn reverse_array(_ctx: &RuleContext<'_>, data: RuleData, _meta: &MetaData) -> Result<RuleData> {
    let mut items = expect_array(RuleId::ReverseArray, data)?;
    items.reverse();
    Ok(Value::Array(items))
}

/// Flatten one level of nesting
pub fn flatten_array(_ctx: &RuleContext<'_>, data: RuleData, _meta: &MetaData) -> Result<RuleData> {
    let items = expect_array(RuleId::FlattenArray, data)?;
    let mut flat = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Array(inner) => flat.extend(inner),
            other => flat.push(other),
        }
    }
    Ok(Value::Array(flat))
}

/// Drop repeated elements, keeping the first occurrence
pub fn dedupe_array(_ctx: &RuleContext<'_>, data: RuleData, _meta: &MetaData) -> Result<RuleData> {
    let items = expect_array(RuleId::DedupeArray, data)?;
    let mut seen = FxHashSet::default();
    let unique = items
        .into_iter()
        .filter(|item| seen.insert(item.to_string()))
        .collect();
    Ok(Value::Array(unique))
}

/// Numbers sort numerically, strings lexically; mixed arrays are rejected
pub fn sort_array(_ctx: &RuleContext<'_>, data: RuleData, _meta: &MetaData) -> Result<RuleData> {
    let mut items = expect_array(RuleId::SortArray, data)?;

    if items.iter().all(Value::is_number) {
        items.sort_by(|a, b| {
            let (a, b) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        });
    } else if items.iter().all(Value::is_string) {
        items.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
    } else {
        let kinds: FxHashSet<&str> = items.iter().map(kind_of).collect();
        let mut kinds: Vec<&str> = kinds.into_iter().collect();
        kinds.sort_unstable();
        return Err(RuleError::invalid_input(
            RuleId::SortArray,
            format!("cannot sort mixed elements ({})", kinds.join(", ")),
        ));
    }

    Ok(Value::Array(items))
}

/// Join elements with the separator carried in the metadata (default ",")
pub fn join_array(_ctx: &RuleContext<'_>, data: RuleData, meta: &MetaData) -> Result<RuleData> {
    let items = expect_array(RuleId::JoinArray, data)?;
    let separator = match meta.as_data() {
        Some(Value::String(sep)) => sep.as_str(),
        Some(other) => {
            return Err(RuleError::invalid_input(
                RuleId::JoinArray,
                format!("separator must be a string, got {}", kind_of(other)),
            ))
        },
        None => DEFAULT_SEPARATOR,
    };

    let parts: Vec<String> = items
        .iter()
        .map(|item| match item {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();
    Ok(Value::from(parts.join(separator)))
}

pub fn unique_sorted(ctx: &RuleContext<'_>, data: RuleData, meta: &MetaData) -> Result<RuleData> {
    ctx.process_rules_internal(data, meta, &[RuleId::DedupeArray, RuleId::SortArray])
}

pub fn normalize_array(ctx: &RuleContext<'_>, data: RuleData, meta: &MetaData) -> Result<RuleData> {
    let items = expect_array(RuleId::NormalizeArray, data)?;
    let normalized = items
        .into_iter()
        .map(|item| ctx.call(RuleId::NormalizeValue, item, meta))
        .collect::<Result<Vec<_>>>()?;
    Ok(Value::Array(normalized))
}

/// Flatten every level of nesting
pub fn deep_flatten(ctx: &RuleContext<'_>, data: RuleData, meta: &MetaData) -> Result<RuleData> {
    let items = expect_array(RuleId::DeepFlatten, data)?;
    let mut flat = Vec::with_capacity(items.len());
    for item in items {
        if item.is_array() {
            let inner = ctx.call(RuleId::DeepFlatten, item, meta)?;
            flat.extend(expect_array(RuleId::DeepFlatten, inner)?);
        } else {
            flat.push(item);
        }
    }
    Ok(Value::Array(flat))
}
