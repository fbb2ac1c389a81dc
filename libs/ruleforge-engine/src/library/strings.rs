//! stringParsing rules

use serde_json::Value;

use super::expect_str;
use crate::catalog::RuleId;
use crate::context::RuleContext;
use crate::error::{Result, RuleError};
use crate::types::{MetaData, RuleData};

pub fn trim_whitespace(
    _ctx: &RuleContext<'_>,
    data: RuleData,
    _meta: &MetaData,
) -> Result<RuleData> {
    let s = expect_str(RuleId::TrimWhitespace, &data)?;
    Ok(Value::from(s.trim()))
}

pub fn to_upper_case(_ctx: &RuleContext<'_>, data: RuleData, _meta: &MetaData) -> Result<RuleData> {
    let s = expect_str(RuleId::ToUpperCase, &data)?;
    Ok(Value::from(s.to_uppercase()))
}

pub fn to_lower_case(_ctx: &RuleContext<'_>, data: RuleData, _meta: &MetaData) -> Result<RuleData> {
    let s = expect_str(RuleId::ToLowerCase, &data)?;
    Ok(Value::from(s.to_lowercase()))
}

pub fn reverse_string(
    _ctx: &RuleContext<'_>,
    data: RuleData,
    _meta: &MetaData,
) -> Result<RuleData> {
    let s = expect_str(RuleId::ReverseString, &data)?;
    Ok(Value::from(s.chars().rev().collect::<String>()))
}

pub fn count_characters(
    _ctx: &RuleContext<'_>,
    data: RuleData,
    _meta: &MetaData,
) -> Result<RuleData> {
    let s = expect_str(RuleId::CountCharacters, &data)?;
    Ok(Value::from(s.chars().count()))
}

pub fn split_words(_ctx: &RuleContext<'_>, data: RuleData, _meta: &MetaData) -> Result<RuleData> {
    let s = expect_str(RuleId::SplitWords, &data)?;
    Ok(Value::Array(s.split_whitespace().map(Value::from).collect()))
}

/// Words separated by single spaces
pub fn collapse_whitespace(
    ctx: &RuleContext<'_>,
    data: RuleData,
    _meta: &MetaData,
) -> Result<RuleData> {
    expect_str(RuleId::CollapseWhitespace, &data)?;
    ctx.process_rules_internal(
        data,
        &MetaData::data(" "),
        &[RuleId::SplitWords, RuleId::JoinArray],
    )
}

pub fn word_count(ctx: &RuleContext<'_>, data: RuleData, meta: &MetaData) -> Result<RuleData> {
    expect_str(RuleId::WordCount, &data)?;
    ctx.process_rules_internal(data, meta, &[RuleId::SplitWords, RuleId::ArrayLength])
}

/// Remove every match of the pattern carried in the metadata
pub fn strip_matches(_ctx: &RuleContext<'_>, data: RuleData, meta: &MetaData) -> Result<RuleData> {
    let s = expect_str(RuleId::StripMatches, &data)?;
    let pattern = meta.as_pattern().ok_or_else(|| {
        RuleError::invalid_input(
            RuleId::StripMatches,
            format!("expected pattern metadata, got {}", meta.kind()),
        )
    })?;
    Ok(Value::from(pattern.replace_all(s, "").into_owned()))
}

/// Strings trimmed and lowercased, arrays normalized element-wise
pub fn normalize_value(ctx: &RuleContext<'_>, data: RuleData, meta: &MetaData) -> Result<RuleData> {
    match data {
        Value::String(s) => Ok(Value::from(s.trim().to_lowercase())),
        Value::Array(_) => ctx.call(RuleId::NormalizeArray, data, meta),
        other => Ok(other),
    }
}
