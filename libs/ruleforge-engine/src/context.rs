//! Rule execution context
//!
//! A `RuleTable` is the set of rules callable in one execution environment:
//! the whole registry on the calling thread, or just a job's dependency closure
//! inside a worker. `RuleContext` is what a rule body sees while it runs.

use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};

use crate::catalog::RuleId;
use crate::error::{Result, RuleError};
use crate::registry::RuleRegistry;
use crate::types::{MetaData, RuleData};

/// Signature shared by every rule body
pub type RuleFn = fn(&RuleContext<'_>, RuleData, &MetaData) -> Result<RuleData>;

/// Maximum nesting of rule-to-rule calls
pub const MAX_CALL_DEPTH: usize = 128;

/// Rules callable by id in one execution environment
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    functions: FxHashMap<RuleId, RuleFn>,
}

impl RuleTable {
    /// Every rule registered in any namespace
    pub fn from_registry(registry: &RuleRegistry) -> Self {
        Self::from_ids(registry.all_entries().map(|entry| entry.id))
    }

    /// Only the listed rules (a worker's dependency closure)
    pub fn from_ids(ids: impl IntoIterator<Item = RuleId>) -> Self {
        let functions = ids.into_iter().map(|id| (id, id.function())).collect();
        Self { functions }
    }

    pub fn resolve(&self, id: RuleId) -> Result<RuleFn> {
        self.functions
            .get(&id)
            .copied()
            .ok_or_else(|| RuleError::not_found(id))
    }

    pub fn contains(&self, id: RuleId) -> bool {
        self.functions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// Handle passed to rule bodies
///
/// Calls made through the context always execute on the current thread; a rule
/// body never triggers another offload decision.
pub struct RuleContext<'a> {
    table: &'a RuleTable,
    call_path: RefCell<Vec<RuleId>>,
    depth: Cell<usize>,
}

impl<'a> RuleContext<'a> {
    pub fn new(table: &'a RuleTable) -> Self {
        Self {
            table,
            call_path: RefCell::new(Vec::new()),
            depth: Cell::new(0),
        }
    }

    /// Invoke one rule by id
    pub fn call(&self, id: RuleId, data: RuleData, meta: &MetaData) -> Result<RuleData> {
        let function = self.table.resolve(id)?;

        let depth = self.depth.get();
        if depth >= MAX_CALL_DEPTH {
            return Err(RuleError::RuleFailed {
                rule: id.to_string(),
                message: format!("call depth exceeded {}", MAX_CALL_DEPTH),
                stack: self.call_path(),
            });
        }

        self.depth.set(depth + 1);
        self.call_path.borrow_mut().push(id);
        let output = function(self, data, meta)?;
        // Path is only unwound on success so a failure keeps its trace
        self.call_path.borrow_mut().pop();
        self.depth.set(depth);

        Ok(output)
    }

    /// Chain rules on the current thread, feeding each output to the next rule
    pub fn process_rules_internal(
        &self,
        data: RuleData,
        meta: &MetaData,
        pipeline: &[RuleId],
    ) -> Result<RuleData> {
        pipeline
            .iter()
            .try_fold(data, |current, id| self.call(*id, current, meta))
    }

    /// Rules entered but not yet returned, outermost first
    pub fn call_path(&self) -> Vec<String> {
        self.call_path
            .borrow()
            .iter()
            .map(|id| id.to_string())
            .collect()
    }
}

/// Run a rule on the current thread, converting a failure into the structured form
pub fn run_rule(
    table: &RuleTable,
    id: RuleId,
    data: RuleData,
    meta: &MetaData,
) -> Result<RuleData> {
    let ctx = RuleContext::new(table);
    ctx.call(id, data, meta).map_err(|err| match err {
        RuleError::InvalidInput { rule, message } => RuleError::RuleFailed {
            rule: rule.to_string(),
            message,
            stack: ctx.call_path(),
        },
        other => other,
    })
}
