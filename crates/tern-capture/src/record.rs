//! Per-closure capture records
//!
//! A [`CaptureRecord`] lists, in first-reference order, every variable a
//! closure needs from its enclosing scopes and how it is carried in the
//! closure environment:
//!
//! - [`CaptureMode::Copy`]: the value is copied into the environment when the
//!   closure is created
//! - [`CaptureMode::Hoisted`]: the environment stores the address of the
//!   variable's shared heap cell

use crate::analysis::VarId;
use crate::scope::{ClosureId, ScopeId};
use rustc_hash::FxHashMap;
use tern_layout::{DescriptorId, LayoutError, Slot, TypeRegistry};

/// How a captured variable is carried in the environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureMode {
    /// Snapshot of the value at closure creation
    Copy,
    /// Address of the variable's heap cell
    Hoisted,
}

/// A single captured variable
#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    /// Captured variable
    pub var: VarId,
    /// Capture mode
    pub mode: CaptureMode,
    /// The variable's own storage slot
    pub slot: Slot,
    /// Heap cell descriptor, for hoisted captures
    pub cell: Option<DescriptorId>,
}

impl Capture {
    /// Name of the captured variable
    pub fn name(&self) -> &str {
        &self.var.name
    }

    /// Slot of the capture's environment field
    pub fn environment_slot(&self) -> Slot {
        match (self.mode, self.cell) {
            (CaptureMode::Hoisted, Some(cell)) => Slot::reference(cell),
            _ => self.slot,
        }
    }
}

/// All captures of one closure
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRecord {
    closure: ClosureId,
    created_in: ScopeId,
    captures: Vec<Capture>,
    indices: FxHashMap<String, usize>,
    environment: DescriptorId,
}

impl CaptureRecord {
    /// Build a record and lay out its environment
    pub(crate) fn build(
        closure: ClosureId,
        created_in: ScopeId,
        captures: Vec<Capture>,
        registry: &TypeRegistry,
    ) -> Result<Self, LayoutError> {
        let indices = captures
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name().to_string(), i))
            .collect();
        let fields: Vec<_> = captures
            .iter()
            .map(|c| (c.name().to_string(), c.environment_slot()))
            .collect();
        let environment = registry.record_of(&fields, None)?;
        Ok(Self {
            closure,
            created_in,
            captures,
            indices,
            environment,
        })
    }

    /// The closure this record belongs to
    pub fn closure(&self) -> ClosureId {
        self.closure
    }

    /// Scope in which the closure value is created
    pub fn created_in(&self) -> ScopeId {
        self.created_in
    }

    /// Captures in first-reference order
    pub fn captures(&self) -> &[Capture] {
        &self.captures
    }

    /// Get a capture by variable name
    pub fn get(&self, name: &str) -> Option<&Capture> {
        self.indices.get(name).map(|&i| &self.captures[i])
    }

    /// Check if a name is captured
    pub fn is_captured(&self, name: &str) -> bool {
        self.indices.contains_key(name)
    }

    /// Captures carried by value
    pub fn copies(&self) -> impl Iterator<Item = &Capture> {
        self.captures.iter().filter(|c| c.mode == CaptureMode::Copy)
    }

    /// Captures carried as cell addresses
    pub fn hoisted(&self) -> impl Iterator<Item = &Capture> {
        self.captures.iter().filter(|c| c.mode == CaptureMode::Hoisted)
    }

    /// Environment fields in layout order
    pub fn environment_fields(&self) -> Vec<(String, Slot)> {
        self.captures
            .iter()
            .map(|c| (c.name().to_string(), c.environment_slot()))
            .collect()
    }

    /// Descriptor of the closure environment record
    pub fn environment_layout(&self) -> DescriptorId {
        self.environment
    }

    /// Number of captures
    pub fn len(&self) -> usize {
        self.captures.len()
    }

    /// Check if the closure captures nothing
    pub fn is_empty(&self) -> bool {
        self.captures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_layout::{Scalar, TypeExpr, POINTER_SIZE};

    fn capture(registry: &TypeRegistry, name: &str, mode: CaptureMode) -> Capture {
        let slot = registry.resolve_slot(&TypeExpr::scalar(Scalar::Int)).unwrap();
        Capture {
            var: VarId::new(ScopeId(0), name),
            mode,
            slot,
            cell: match mode {
                CaptureMode::Hoisted => Some(registry.cell_of(slot).unwrap()),
                CaptureMode::Copy => None,
            },
        }
    }

    #[test]
    fn test_capture_record_lookup() {
        let registry = TypeRegistry::new();
        let record = CaptureRecord::build(
            ScopeId(2),
            ScopeId(1),
            vec![
                capture(&registry, "a", CaptureMode::Copy),
                capture(&registry, "b", CaptureMode::Hoisted),
            ],
            &registry,
        )
        .unwrap();

        assert!(record.is_captured("a"));
        assert!(!record.is_captured("c"));
        assert_eq!(record.get("b").unwrap().mode, CaptureMode::Hoisted);
        assert_eq!(record.copies().count(), 1);
        assert_eq!(record.hoisted().count(), 1);
    }

    #[test]
    fn test_environment_layout() {
        let registry = TypeRegistry::new();
        let record = CaptureRecord::build(
            ScopeId(2),
            ScopeId(1),
            vec![
                capture(&registry, "a", CaptureMode::Copy),
                capture(&registry, "b", CaptureMode::Hoisted),
            ],
            &registry,
        )
        .unwrap();

        let env = registry.descriptor(record.environment_layout()).unwrap();
        let b = env.field("b").unwrap();
        assert!(b.is_ref);
        assert_eq!(b.size, POINTER_SIZE);
        assert_eq!(env.pointer_map().as_slice(), &[b.offset]);
        assert!(!env.field("a").unwrap().is_ref);
    }

    #[test]
    fn test_empty_record() {
        let registry = TypeRegistry::new();
        let record = CaptureRecord::build(ScopeId(2), ScopeId(1), Vec::new(), &registry).unwrap();
        assert!(record.is_empty());
        let env = registry.descriptor(record.environment_layout()).unwrap();
        assert_eq!(env.size(), 0);
    }
}
