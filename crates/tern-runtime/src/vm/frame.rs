//! Activation frames
//!
//! A frame owns the storage of the variables declared by one activation.
//! Stack variables live inline as raw bytes laid out by their descriptor;
//! hoisted variables live in heap cells and the frame keeps only the cell
//! reference. Frames of closures also hold the environment they were
//! entered with.

use crate::gc::{GcRef, RootSource};
use rustc_hash::FxHashMap;
use tern_capture::{ClosureId, ScopeId, VarId};
use tern_layout::Slot;

/// Storage of one variable
#[derive(Debug)]
pub(crate) enum Local {
    /// Bytes held by the frame; `pointers` are the offsets of reference words
    Inline {
        slot: Slot,
        bytes: Box<[u8]>,
        pointers: Box<[usize]>,
    },
    /// Heap cell holding a hoisted variable
    Cell { slot: Slot, cell: GcRef },
}

impl Local {
    pub(crate) fn inline(slot: Slot, size: usize, pointers: &[usize]) -> Self {
        Local::Inline {
            slot,
            bytes: vec![0u8; size].into_boxed_slice(),
            pointers: pointers.into(),
        }
    }

    pub(crate) fn slot(&self) -> Slot {
        match self {
            Local::Inline { slot, .. } | Local::Cell { slot, .. } => *slot,
        }
    }
}

/// Closure activation: which closure, entered with which environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosureInstance {
    /// Closure scope
    pub closure: ClosureId,
    /// Environment object
    pub env: GcRef,
}

/// One activation
#[derive(Debug)]
pub struct Frame {
    scope: ScopeId,
    closure: Option<ClosureInstance>,
    locals: FxHashMap<VarId, Local>,
}

impl Frame {
    pub(crate) fn new(scope: ScopeId, closure: Option<ClosureInstance>) -> Self {
        Self {
            scope,
            closure,
            locals: FxHashMap::default(),
        }
    }

    /// Scope this frame activates
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    /// Closure instance, for closure activations
    pub fn closure(&self) -> Option<ClosureInstance> {
        self.closure
    }

    /// Number of variables with storage in this frame
    pub fn local_count(&self) -> usize {
        self.locals.len()
    }

    pub(crate) fn insert(&mut self, var: VarId, local: Local) {
        self.locals.insert(var, local);
    }

    pub(crate) fn get(&self, var: &VarId) -> Option<&Local> {
        self.locals.get(var)
    }

    pub(crate) fn get_mut(&mut self, var: &VarId) -> Option<&mut Local> {
        self.locals.get_mut(var)
    }

    /// Drop the variables declared by a block that is being left
    pub(crate) fn remove_scope(&mut self, scope: ScopeId) {
        self.locals.retain(|var, _| var.scope != scope);
    }
}

impl RootSource for Frame {
    fn for_each_root(&self, visit: &mut dyn FnMut(usize)) {
        if let Some(instance) = self.closure {
            visit(instance.env.addr());
        }
        for local in self.locals.values() {
            match local {
                Local::Inline {
                    bytes, pointers, ..
                } => {
                    for &offset in pointers.iter() {
                        // SAFETY: pointer offsets were taken from the slot's layout
                        let word =
                            unsafe { (bytes.as_ptr().add(offset) as *const usize).read_unaligned() };
                        visit(word);
                    }
                }
                Local::Cell { cell, .. } => visit(cell.addr()),
            }
        }
    }
}
