//! Rule Registry - per-namespace rule metadata
//!
//! Holds, for every namespace, the metadata entry of each registered rule:
//! identifier, source location, threadable flag and dependency closure.
//! Entries are immutable once registered. The registry is built during startup
//! and then shared read-only behind an `Arc`.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::catalog::{self, Namespace, RuleId};
use crate::error::{Result, RuleError};
use crate::types::MetaKind;

/// Metadata describing one registered rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleMetadataEntry {
    pub id: RuleId,
    pub source_location: String,
    pub threadable: bool,
    /// Every rule this rule calls internally, directly or indirectly
    pub dependencies: BTreeSet<RuleId>,
}

impl RuleMetadataEntry {
    pub fn namespace(&self) -> Namespace {
        self.id.namespace()
    }

    pub fn meta_kind(&self) -> MetaKind {
        self.id.meta_kind()
    }
}

/// Registration record as supplied by rule-definition modules
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDeclaration {
    pub name: String,
    pub file_path: String,
    #[serde(default)]
    pub threadable: bool,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl TryFrom<RuleDeclaration> for RuleMetadataEntry {
    type Error = RuleError;

    fn try_from(decl: RuleDeclaration) -> Result<Self> {
        let id: RuleId = decl.name.parse()?;
        let dependencies = decl
            .dependencies
            .iter()
            .map(|name| name.parse::<RuleId>())
            .collect::<Result<BTreeSet<_>>>()?;

        Ok(RuleMetadataEntry {
            id,
            source_location: decl.file_path,
            threadable: decl.threadable,
            dependencies,
        })
    }
}

/// Rule metadata tables, one per initialized namespace
#[derive(Debug, Default)]
pub struct RuleRegistry {
    tables: BTreeMap<Namespace, BTreeMap<RuleId, RuleMetadataEntry>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every namespace initialized and the whole catalog registered
    pub fn standard() -> Result<Self> {
        let mut registry = Self::new();
        for ns in Namespace::ALL {
            registry.init_namespace(*ns);
        }

        let mut by_namespace: BTreeMap<Namespace, Vec<RuleMetadataEntry>> = BTreeMap::new();
        for entry in catalog::standard_entries() {
            by_namespace.entry(entry.namespace()).or_default().push(entry);
        }
        for (ns, entries) in by_namespace {
            registry.try_register(ns, entries)?;
        }

        registry.verify_dependencies()?;
        info!(
            "Rule registry ready: {} rules in {} namespaces",
            registry.len(),
            registry.tables.len()
        );
        Ok(registry)
    }

    /// Create the table for a namespace; a no-op if it already exists
    pub fn init_namespace(&mut self, ns: Namespace) {
        self.tables.entry(ns).or_default();
    }

    pub fn is_initialized(&self, ns: Namespace) -> bool {
        self.tables.contains_key(&ns)
    }

    /// Register entries, returning false when the namespace is not initialized
    /// or an entry is rejected. Non-fatal: the caller may retry after init.
    pub fn register(&mut self, ns: Namespace, entries: Vec<RuleMetadataEntry>) -> bool {
        match self.try_register(ns, entries) {
            Ok(added) => {
                debug!("Registered {} rules in {}", added, ns);
                true
            },
            Err(e) => {
                warn!("Rule registration in {} failed: {}", ns, e);
                false
            },
        }
    }

    /// Register external declarations (name/filePath form)
    pub fn register_declarations(
        &mut self,
        ns: Namespace,
        declarations: Vec<RuleDeclaration>,
    ) -> Result<usize> {
        let entries = declarations
            .into_iter()
            .map(RuleMetadataEntry::try_from)
            .collect::<Result<Vec<_>>>()?;
        self.try_register(ns, entries)
    }

    /// Register entries; returns how many were newly added
    ///
    /// The whole batch is validated before anything is appended.
    pub fn try_register(
        &mut self,
        ns: Namespace,
        entries: Vec<RuleMetadataEntry>,
    ) -> Result<usize> {
        if !self.tables.contains_key(&ns) {
            return Err(RuleError::NamespaceNotInitialized(ns));
        }

        for entry in &entries {
            validate_entry(ns, entry)?;
        }

        let Some(table) = self.tables.get_mut(&ns) else {
            return Err(RuleError::NamespaceNotInitialized(ns));
        };

        let mut added = 0;
        for entry in entries {
            match table.get(&entry.id) {
                Some(existing) if *existing == entry => {},
                Some(_) => {
                    warn!(
                        "Rule {} already registered with different metadata; keeping the original",
                        entry.id
                    );
                },
                None => {
                    table.insert(entry.id, entry);
                    added += 1;
                },
            }
        }
        Ok(added)
    }

    pub fn lookup(&self, ns: Namespace, id: RuleId) -> Result<&RuleMetadataEntry> {
        self.tables
            .get(&ns)
            .and_then(|table| table.get(&id))
            .ok_or_else(|| RuleError::not_found(id))
    }

    /// Lookup in the rule's own namespace
    pub fn get(&self, id: RuleId) -> Result<&RuleMetadataEntry> {
        self.lookup(id.namespace(), id)
    }

    pub fn contains(&self, id: RuleId) -> bool {
        self.get(id).is_ok()
    }

    /// Root rule plus every rule reachable through `dependencies`
    ///
    /// Cycles are allowed; each rule is visited once.
    pub fn resolve_closure(&self, ns: Namespace, id: RuleId) -> Result<Vec<&RuleMetadataEntry>> {
        let root = self.lookup(ns, id)?;
        let mut visited: FxHashSet<RuleId> = FxHashSet::default();
        let mut closure = Vec::new();
        let mut pending = vec![root];
        visited.insert(root.id);

        while let Some(entry) = pending.pop() {
            closure.push(entry);
            for dep in &entry.dependencies {
                if visited.insert(*dep) {
                    pending.push(self.get(*dep)?);
                }
            }
        }

        closure.sort_by_key(|entry| entry.id);
        Ok(closure)
    }

    /// Ids of the dependency closure, as shipped with a worker job
    pub fn closure_ids(&self, id: RuleId) -> Result<Vec<RuleId>> {
        Ok(self
            .resolve_closure(id.namespace(), id)?
            .into_iter()
            .map(|entry| entry.id)
            .collect())
    }

    /// Check that every declared dependency is itself registered
    pub fn verify_dependencies(&self) -> Result<()> {
        for entry in self.all_entries() {
            for dep in &entry.dependencies {
                if !self.contains(*dep) {
                    return Err(RuleError::RuleNotFound(format!(
                        "{} (dependency of {})",
                        dep, entry.id
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn entries(&self, ns: Namespace) -> impl Iterator<Item = &RuleMetadataEntry> {
        self.tables.get(&ns).into_iter().flat_map(|table| table.values())
    }

    pub fn all_entries(&self) -> impl Iterator<Item = &RuleMetadataEntry> {
        self.tables.values().flat_map(|table| table.values())
    }

    pub fn namespaces(&self) -> impl Iterator<Item = Namespace> + '_ {
        self.tables.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.tables.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn validate_entry(ns: Namespace, entry: &RuleMetadataEntry) -> Result<()> {
    if entry.namespace() != ns {
        return Err(RuleError::Registration(format!(
            "{} belongs to {}, not {}",
            entry.id,
            entry.namespace(),
            ns
        )));
    }
    if entry.threadable && entry.meta_kind() == MetaKind::Pattern {
        return Err(RuleError::Registration(format!(
            "{} accepts pattern metadata and cannot be threadable",
            entry.id
        )));
    }
    Ok(())
}
