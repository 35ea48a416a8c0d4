//! Capture and hoisting analysis
//!
//! Runs once per compilation unit in two phases:
//!
//! 1. Walk the scope tree, resolve every access to its declaration
//!    (innermost scope first) and note, for each closure boundary the access
//!    crosses, that the variable is free in that closure. Writes that cross a
//!    closure boundary mark the variable as mutated inside a closure.
//! 2. Decide storage for every declaration and build one [`CaptureRecord`]
//!    per closure.
//!
//! A variable is *hoisted* to a heap cell exactly when some closure nested
//! in its defining scope assigns to it (or stores through it). The decision
//! is per variable, so the defining scope and every closure address the same
//! cell. Variables declared in a [`ScopeKind::Global`] scope are persistent
//! and never captured.

use crate::error::CaptureError;
use crate::record::{Capture, CaptureMode, CaptureRecord};
use crate::scope::{AccessKind, ClosureId, Scope, ScopeId, ScopeKind};
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;
use tern_layout::{DescriptorId, Slot, TypeExpr, TypeRegistry};

/// Variable identity: declaring scope plus name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId {
    /// Declaring scope
    pub scope: ScopeId,
    /// Variable name
    pub name: String,
}

impl VarId {
    /// Create a variable id
    pub fn new(scope: ScopeId, name: impl Into<String>) -> Self {
        Self {
            scope,
            name: name.into(),
        }
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.scope)
    }
}

/// Where a variable lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Storage {
    /// Inline in the defining frame
    Stack,
    /// In a heap cell shared by the frame and every capturing closure
    Heap,
    /// Persistent module-level storage
    Global,
}

/// Analysis result for one declared variable
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    /// Variable id
    pub id: VarId,
    /// Storage slot of the declared type
    pub slot: Slot,
    /// Storage class
    pub storage: Storage,
    /// Heap cell descriptor, when hoisted
    pub cell: Option<DescriptorId>,
}

impl Variable {
    /// Whether the variable lives in a heap cell
    pub fn is_hoisted(&self) -> bool {
        self.storage == Storage::Heap
    }
}

/// A resolved access site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessSite {
    /// Scope containing the access
    pub scope: ScopeId,
    /// Access kind
    pub kind: AccessKind,
    /// Innermost closure whose environment supplies the variable, if any
    pub via: Option<ClosureId>,
}

// ============================================================================
// Phase 1: resolution
// ============================================================================

struct Frame {
    id: ScopeId,
    kind: ScopeKind,
    names: FxHashSet<String>,
}

struct PendingDecl {
    id: VarId,
    ty: TypeExpr,
    global: bool,
}

#[derive(Default)]
struct FreeVars {
    order: Vec<VarId>,
    seen: FxHashSet<VarId>,
}

impl FreeVars {
    fn add(&mut self, var: &VarId) {
        if self.seen.insert(var.clone()) {
            self.order.push(var.clone());
        }
    }
}

#[derive(Default)]
struct Collector {
    stack: Vec<Frame>,
    seen_scopes: FxHashSet<ScopeId>,
    parents: FxHashMap<ScopeId, ScopeId>,
    kinds: FxHashMap<ScopeId, ScopeKind>,
    declarations: Vec<PendingDecl>,
    closures: Vec<(ClosureId, ScopeId)>,
    free: FxHashMap<ClosureId, FreeVars>,
    mutated_in_closure: FxHashSet<VarId>,
    sites: FxHashMap<VarId, Vec<AccessSite>>,
}

impl Collector {
    fn visit(&mut self, scope: &Scope) -> Result<(), CaptureError> {
        if !self.seen_scopes.insert(scope.id) {
            return Err(CaptureError::DuplicateScope { scope: scope.id });
        }
        self.kinds.insert(scope.id, scope.kind);
        // A closure at the root has no creation site and gets no record
        if let Some(parent) = self.stack.last() {
            self.parents.insert(scope.id, parent.id);
            if scope.is_closure() {
                self.closures.push((scope.id, parent.id));
            }
        }

        let mut names = FxHashSet::default();
        for decl in &scope.declarations {
            if !names.insert(decl.name.clone()) {
                return Err(CaptureError::DuplicateDeclaration {
                    name: decl.name.clone(),
                    scope: scope.id,
                });
            }
            self.declarations.push(PendingDecl {
                id: VarId::new(scope.id, decl.name.clone()),
                ty: decl.ty.clone(),
                global: scope.kind == ScopeKind::Global,
            });
        }

        self.stack.push(Frame {
            id: scope.id,
            kind: scope.kind,
            names,
        });
        for access in &scope.accesses {
            self.record_access(scope.id, &access.name, access.kind)?;
        }
        for child in &scope.children {
            self.visit(child)?;
        }
        self.stack.pop();
        Ok(())
    }

    fn record_access(
        &mut self,
        scope: ScopeId,
        name: &str,
        kind: AccessKind,
    ) -> Result<(), CaptureError> {
        let depth = self
            .stack
            .iter()
            .rposition(|frame| frame.names.contains(name))
            .ok_or_else(|| CaptureError::UnresolvedVariable {
                name: name.to_string(),
                scope,
            })?;
        let defining = &self.stack[depth];
        let var = VarId::new(defining.id, name);

        let crossed: Vec<ClosureId> = if defining.kind == ScopeKind::Global {
            Vec::new()
        } else {
            self.stack[depth + 1..]
                .iter()
                .filter(|frame| frame.kind == ScopeKind::Closure)
                .map(|frame| frame.id)
                .collect()
        };

        for closure in &crossed {
            self.free.entry(*closure).or_default().add(&var);
        }
        if kind.is_write() && !crossed.is_empty() {
            self.mutated_in_closure.insert(var.clone());
        }
        self.sites.entry(var).or_default().push(AccessSite {
            scope,
            kind,
            via: crossed.last().copied(),
        });
        Ok(())
    }
}

// ============================================================================
// Phase 2: decisions
// ============================================================================

/// Capture analyzer
pub struct CaptureAnalyzer<'r> {
    registry: &'r TypeRegistry,
}

impl<'r> CaptureAnalyzer<'r> {
    /// Create an analyzer that lays out variables with `registry`
    pub fn new(registry: &'r TypeRegistry) -> Self {
        Self { registry }
    }

    /// Analyze a scope tree
    pub fn analyze(&self, root: &Scope) -> Result<CaptureAnalysis, CaptureError> {
        let mut collector = Collector::default();
        collector.visit(root)?;

        let mut variables = FxHashMap::default();
        let mut declared: FxHashMap<ScopeId, Vec<VarId>> = FxHashMap::default();
        let mut hoisted = Vec::new();
        for decl in collector.declarations {
            let slot = self.registry.resolve_slot(&decl.ty)?;
            let storage = if decl.global {
                Storage::Global
            } else if collector.mutated_in_closure.contains(&decl.id) {
                Storage::Heap
            } else {
                Storage::Stack
            };
            let cell = match storage {
                Storage::Heap => Some(self.registry.cell_of(slot)?),
                _ => None,
            };
            if storage == Storage::Heap {
                tracing::debug!(var = %decl.id, "hoisting variable to heap cell");
                hoisted.push(decl.id.clone());
            }
            declared
                .entry(decl.id.scope)
                .or_default()
                .push(decl.id.clone());
            variables.insert(
                decl.id.clone(),
                Variable {
                    id: decl.id,
                    slot,
                    storage,
                    cell,
                },
            );
        }

        let mut records = FxHashMap::default();
        let mut closure_order = Vec::with_capacity(collector.closures.len());
        for (closure, created_in) in collector.closures {
            let free = collector.free.remove(&closure).unwrap_or_default();
            let captures = free
                .order
                .into_iter()
                .map(|var| {
                    let info = &variables[&var];
                    Capture {
                        mode: if info.is_hoisted() {
                            CaptureMode::Hoisted
                        } else {
                            CaptureMode::Copy
                        },
                        slot: info.slot,
                        cell: info.cell,
                        var,
                    }
                })
                .collect();
            let record = CaptureRecord::build(closure, created_in, captures, self.registry)?;
            tracing::debug!(
                %closure,
                captures = record.len(),
                hoisted = record.hoisted().count(),
                "analyzed closure"
            );
            closure_order.push(closure);
            records.insert(closure, record);
        }

        Ok(CaptureAnalysis {
            variables,
            declared,
            parents: collector.parents,
            kinds: collector.kinds,
            records,
            closure_order,
            hoisted,
            sites: collector.sites,
        })
    }
}

/// Result of capture analysis; immutable once built
#[derive(Debug, Clone)]
pub struct CaptureAnalysis {
    variables: FxHashMap<VarId, Variable>,
    declared: FxHashMap<ScopeId, Vec<VarId>>,
    parents: FxHashMap<ScopeId, ScopeId>,
    kinds: FxHashMap<ScopeId, ScopeKind>,
    records: FxHashMap<ClosureId, CaptureRecord>,
    closure_order: Vec<ClosureId>,
    hoisted: Vec<VarId>,
    sites: FxHashMap<VarId, Vec<AccessSite>>,
}

impl CaptureAnalysis {
    /// Storage class of a variable
    pub fn storage_of(&self, var: &VarId) -> Option<Storage> {
        self.variables.get(var).map(|v| v.storage)
    }

    /// Analysis result for a variable
    pub fn variable(&self, var: &VarId) -> Option<&Variable> {
        self.variables.get(var)
    }

    /// Variables declared directly in `scope`, in declaration order
    pub fn variables_in(&self, scope: ScopeId) -> impl Iterator<Item = &Variable> {
        self.declared
            .get(&scope)
            .into_iter()
            .flatten()
            .map(move |id| &self.variables[id])
    }

    /// Resolve `name` as seen from `scope`
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<VarId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let candidate = VarId::new(id, name);
            if self.variables.contains_key(&candidate) {
                return Some(candidate);
            }
            current = self.parents.get(&id).copied();
        }
        None
    }

    /// Kind of a scope
    pub fn scope_kind(&self, scope: ScopeId) -> Option<ScopeKind> {
        self.kinds.get(&scope).copied()
    }

    /// Enclosing scope
    pub fn parent(&self, scope: ScopeId) -> Option<ScopeId> {
        self.parents.get(&scope).copied()
    }

    /// Closure whose body contains `scope` (itself, for closure scopes)
    pub fn enclosing_closure(&self, scope: ScopeId) -> Option<ClosureId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            match self.scope_kind(id)? {
                ScopeKind::Closure => return Some(id),
                ScopeKind::Function | ScopeKind::Global => return None,
                ScopeKind::Block => current = self.parent(id),
            }
        }
        None
    }

    /// Capture record of a closure
    pub fn record(&self, closure: ClosureId) -> Option<&CaptureRecord> {
        self.records.get(&closure)
    }

    /// All capture records, outer closures first
    pub fn records(&self) -> impl Iterator<Item = &CaptureRecord> {
        self.closure_order.iter().map(move |id| &self.records[id])
    }

    /// Hoisted variables in declaration order
    pub fn hoisted(&self) -> impl Iterator<Item = &Variable> {
        self.hoisted.iter().map(move |id| &self.variables[id])
    }

    /// Resolved access sites of a variable, in source order
    pub fn sites(&self, var: &VarId) -> &[AccessSite] {
        self.sites.get(var).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Check that a consumer addresses `var` through its decided storage
    pub fn check_access(&self, var: &VarId, storage: Storage) -> Result<(), CaptureError> {
        let expected = self
            .storage_of(var)
            .ok_or_else(|| CaptureError::UnresolvedVariable {
                name: var.name.clone(),
                scope: var.scope,
            })?;
        if expected == storage {
            Ok(())
        } else {
            Err(CaptureError::StorageMismatch {
                name: var.name.clone(),
                expected,
                found: storage,
            })
        }
    }
}
