//! mathOperations rules
//!
//! Integers stay integers while they fit in i64; anything else is computed as f64.

use serde_json::{Number, Value};

use super::{expect_array, kind_of};
use crate::catalog::RuleId;
use crate::context::RuleContext;
use crate::error::{Result, RuleError};
use crate::types::{MetaData, RuleData};

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn parse(rule: RuleId, value: &Value) -> Result<Self> {
        if let Some(i) = value.as_i64() {
            return Ok(Num::Int(i));
        }
        value.as_f64().map(Num::Float).ok_or_else(|| {
            RuleError::invalid_input(rule, format!("expected a number, got {}", kind_of(value)))
        })
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }

    fn into_value(self, rule: RuleId) -> Result<Value> {
        match self {
            Num::Int(i) => Ok(Value::from(i)),
            Num::Float(f) => Number::from_f64(f)
                .map(Value::Number)
                .ok_or_else(|| RuleError::invalid_input(rule, "result is not a finite number")),
        }
    }

    fn checked_add(self, other: Num, rule: RuleId) -> Result<Num> {
        match (self, other) {
            (Num::Int(a), Num::Int(b)) => a
                .checked_add(b)
                .map(Num::Int)
                .ok_or_else(|| RuleError::invalid_input(rule, "integer overflow")),
            (a, b) => Ok(Num::Float(a.as_f64() + b.as_f64())),
        }
    }
}

pub fn double(_ctx: &RuleContext<'_>, data: RuleData, _meta: &MetaData) -> Result<RuleData> {
    let rule = RuleId::Double;
    let n = Num::parse(rule, &data)?;
    n.checked_add(n, rule)?.into_value(rule)
}

pub fn add_one(_ctx: &RuleContext<'_>, data: RuleData, _meta: &MetaData) -> Result<RuleData> {
    let rule = RuleId::AddOne;
    Num::parse(rule, &data)?
        .checked_add(Num::Int(1), rule)?
        .into_value(rule)
}

pub fn sum(_ctx: &RuleContext<'_>, data: RuleData, _meta: &MetaData) -> Result<RuleData> {
    let rule = RuleId::Sum;
    let items = expect_array(rule, data)?;
    let mut total = Num::Int(0);
    for item in &items {
        total = total.checked_add(Num::parse(rule, item)?, rule)?;
    }
    total.into_value(rule)
}

/// Mean of a numeric array, built from sum and arrayLength
pub fn average(ctx: &RuleContext<'_>, data: RuleData, meta: &MetaData) -> Result<RuleData> {
    let rule = RuleId::Average;
    if data.as_array().is_some_and(Vec::is_empty) {
        return Err(RuleError::invalid_input(rule, "cannot average an empty array"));
    }

    let total = ctx.call(RuleId::Sum, data.clone(), meta)?;
    let count = ctx.call(RuleId::ArrayLength, data, meta)?;

    let total = Num::parse(rule, &total)?.as_f64();
    let count = Num::parse(rule, &count)?.as_f64();
    Num::Float(total / count).into_value(rule)
}

/// Bound a number by the `{min, max}` carried in the metadata
pub fn clamp(_ctx: &RuleContext<'_>, data: RuleData, meta: &MetaData) -> Result<RuleData> {
    let rule = RuleId::Clamp;
    let bounds = meta
        .as_data()
        .and_then(Value::as_object)
        .ok_or_else(|| RuleError::invalid_input(rule, "expected {min, max} metadata"))?;

    let bound = |key: &str| -> Result<Option<Num>> {
        bounds.get(key).map(|v| Num::parse(rule, v)).transpose()
    };
    let (min, max) = (bound("min")?, bound("max")?);
    if let (Some(lo), Some(hi)) = (min, max) {
        if lo.as_f64() > hi.as_f64() {
            return Err(RuleError::invalid_input(rule, "min is greater than max"));
        }
    }

    let n = Num::parse(rule, &data)?;
    let clamped = match (min, max) {
        (Some(lo), _) if n.as_f64() < lo.as_f64() => lo,
        (_, Some(hi)) if n.as_f64() > hi.as_f64() => hi,
        _ => n,
    };
    clamped.into_value(rule)
}
