//! Mutator runtime
//!
//! [`Runtime`] executes the storage side of a program against the heap:
//! activations with their variables, closures with their environments, and
//! heap objects with their fields and elements. Every decision about where a
//! variable lives comes from capture analysis; the runtime only carries it out.
//!
//! # Variable storage
//!
//! ```text
//! stack variable      frame bytes ─────────── value
//! hoisted variable    frame ──▶ cell ──────── value
//! copy capture        env field ───────────── value (snapshot)
//! hoisted capture     env field ──▶ cell ──── value (shared)
//! ```
//!
//! Frames are roots: every reference word in inline storage, every cell and
//! every closure environment is reported to the collector. References held
//! only by the host must be rooted with [`Runtime::add_root`] or stored in a
//! variable before the next allocation.

pub mod frame;

pub use frame::{ClosureInstance, Frame};

use crate::config::GcConfig;
use crate::error::RuntimeError;
use crate::ffi::marshal::{self, ForeignArg, ForeignArgs, MarshalError};
use crate::gc::{GarbageCollector, GcRef, GcStats, HeapStats, RootSource};
use crate::value::Value;
use frame::Local;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tern_capture::{CaptureAnalysis, CaptureMode, ClosureId, ScopeId, ScopeKind, Storage, VarId};
use tern_layout::{
    DescriptorId, LayoutError, Scalar, Slot, TypeDescriptor, TypeExpr, TypeKind, TypeRegistry,
    CELL_FIELD, POINTER_SIZE,
};

/// Roots owned by the mutator, reported at collection time
struct MutatorRoots<'a> {
    globals: Option<&'a Frame>,
    frames: &'a [Frame],
    pinned: &'a [GcRef],
}

impl RootSource for MutatorRoots<'_> {
    fn for_each_root(&self, visit: &mut dyn FnMut(usize)) {
        if let Some(globals) = self.globals {
            globals.for_each_root(visit);
        }
        for frame in self.frames {
            frame.for_each_root(visit);
        }
        for r in self.pinned {
            visit(r.addr());
        }
    }
}

/// Where a variable's value is stored
enum Location {
    /// Inline in the globals frame
    Global(VarId),
    /// Inline in the current frame
    Frame(VarId),
    /// Inside a heap object (a cell or a hoisted environment field)
    Heap(usize),
    /// Copy-capture field of the running closure's environment; read-only
    Snapshot(VarId, usize),
}

/// A value checked against its destination slot, ready to be written
enum Encoded {
    Ref(Option<GcRef>),
    Scalar(Scalar, Value),
}

impl Encoded {
    /// # Safety
    ///
    /// `ptr` must be valid for writes of the slot's size.
    unsafe fn write(self, ptr: *mut u8) -> Result<(), MarshalError> {
        match self {
            Encoded::Ref(r) => {
                marshal::store_ref(ptr, r);
                Ok(())
            }
            Encoded::Scalar(scalar, value) => marshal::store_scalar(ptr, scalar, value),
        }
    }
}

/// Slot and in-element offset of the value an element holds as a whole
///
/// Scalars hold themselves; cells (the element type of `ref` arrays and the
/// pointee of `ref ref T`) hold their single field.
fn element_slot(desc: &TypeDescriptor) -> Option<(Slot, usize)> {
    if desc.as_scalar().is_some() {
        return Some((Slot::value(desc.id()), 0));
    }
    match desc.fields() {
        [field] if field.name == CELL_FIELD => Some((field.slot(), field.offset)),
        _ => None,
    }
}

fn join_path(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{prefix}.{segment}")
    }
}

/// Whether `path` names `prefix` or something inside it
fn is_under(path: &str, prefix: &str) -> bool {
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// Storage, closures and heap access for one program
#[derive(Debug)]
pub struct Runtime {
    registry: Arc<TypeRegistry>,
    analysis: Arc<CaptureAnalysis>,
    gc: GarbageCollector,
    globals: Option<Frame>,
    frames: Vec<Frame>,
    /// Closure each environment was built for, by payload address
    environments: FxHashMap<usize, ClosureId>,
}

impl Runtime {
    /// Create a runtime for an analyzed program
    pub fn new(
        registry: Arc<TypeRegistry>,
        analysis: Arc<CaptureAnalysis>,
        config: GcConfig,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;
        let gc = GarbageCollector::new(config)?;
        tracing::debug!(
            pool_bytes = config.pool_bytes,
            max_objects = config.max_objects,
            max_bytes = config.max_bytes,
            "runtime created"
        );
        Ok(Self {
            registry,
            analysis,
            gc,
            globals: None,
            frames: Vec::new(),
            environments: FxHashMap::default(),
        })
    }

    /// Type registry
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Capture analysis
    pub fn analysis(&self) -> &Arc<CaptureAnalysis> {
        &self.analysis
    }

    /// Collector
    pub fn gc(&self) -> &GarbageCollector {
        &self.gc
    }

    /// Mutable collector, for threshold changes
    pub fn gc_mut(&mut self) -> &mut GarbageCollector {
        &mut self.gc
    }

    // ===== Activations =====

    /// Create storage for the variables of the global scope
    pub fn define_globals(&mut self, scope: ScopeId) -> Result<(), RuntimeError> {
        match self.analysis.scope_kind(scope) {
            Some(ScopeKind::Global) => {}
            Some(kind) => {
                return Err(RuntimeError::TypeMismatch {
                    expected: "global scope".to_string(),
                    actual: format!("{:?} scope", kind),
                })
            }
            None => return Err(RuntimeError::UnknownScope { scope }),
        }
        self.globals = Some(Frame::new(scope, None));
        self.declare_locals(scope, true)
    }

    /// Activate a function (or a block run as its own activation)
    pub fn push_frame(&mut self, scope: ScopeId) -> Result<(), RuntimeError> {
        match self.analysis.scope_kind(scope) {
            Some(ScopeKind::Function | ScopeKind::Block) => {}
            Some(kind) => {
                return Err(RuntimeError::TypeMismatch {
                    expected: "function scope".to_string(),
                    actual: format!("{:?} scope", kind),
                })
            }
            None => return Err(RuntimeError::UnknownScope { scope }),
        }
        self.activate(Frame::new(scope, None))
    }

    /// Activate a closure with the environment [`Runtime::make_closure`] built
    pub fn enter_closure(&mut self, closure: ClosureId, env: GcRef) -> Result<(), RuntimeError> {
        let record = self
            .analysis
            .record(closure)
            .ok_or(RuntimeError::UnknownScope { scope: closure })?;
        let object = self.gc.heap().resolve(env)?;
        if object.descriptor().id() != record.environment_layout() {
            return Err(RuntimeError::TypeMismatch {
                expected: format!("environment of {}", closure),
                actual: object.descriptor().to_string(),
            });
        }
        // Structurally equal environments of different closures share a layout
        match self.environments.get(&env.addr()) {
            Some(&owner) if owner == closure => {}
            Some(&owner) => {
                return Err(RuntimeError::TypeMismatch {
                    expected: format!("environment of {}", closure),
                    actual: format!("environment of {}", owner),
                })
            }
            None => {
                return Err(RuntimeError::TypeMismatch {
                    expected: format!("environment of {}", closure),
                    actual: "object not built by make_closure".to_string(),
                })
            }
        }
        self.activate(Frame::new(closure, Some(ClosureInstance { closure, env })))
    }

    fn activate(&mut self, frame: Frame) -> Result<(), RuntimeError> {
        let scope = frame.scope();
        self.frames.push(frame);
        if let Err(e) = self.declare_locals(scope, false) {
            self.frames.pop();
            return Err(e);
        }
        tracing::trace!(%scope, depth = self.frames.len(), "frame pushed");
        Ok(())
    }

    /// Leave the current activation
    pub fn pop_frame(&mut self) -> Result<(), RuntimeError> {
        let frame = self.frames.pop().ok_or(RuntimeError::NoFrame)?;
        tracing::trace!(scope = %frame.scope(), depth = self.frames.len(), "frame popped");
        Ok(())
    }

    /// Enter a block of the current activation
    pub fn enter_block(&mut self, scope: ScopeId) -> Result<(), RuntimeError> {
        if self.frames.is_empty() {
            return Err(RuntimeError::NoFrame);
        }
        self.declare_locals(scope, false)
    }

    /// Leave a block of the current activation, dropping its variables
    pub fn exit_block(&mut self, scope: ScopeId) -> Result<(), RuntimeError> {
        self.frames
            .last_mut()
            .ok_or(RuntimeError::NoFrame)?
            .remove_scope(scope);
        Ok(())
    }

    /// Current activation
    pub fn current_frame(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// Number of live activations
    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    fn declare_locals(&mut self, scope: ScopeId, global: bool) -> Result<(), RuntimeError> {
        let analysis = Arc::clone(&self.analysis);
        for var in analysis.variables_in(scope) {
            let local = match var.storage {
                Storage::Stack | Storage::Global => {
                    let (size, pointers) = self.inline_extent(var.slot)?;
                    Local::inline(var.slot, size, &pointers)
                }
                Storage::Heap => {
                    let cell_id = match var.cell {
                        Some(id) => id,
                        None => self.registry.cell_of(var.slot)?,
                    };
                    let desc = self.descriptor(cell_id)?;
                    let cell = self.allocate(&desc, 1, &[])?;
                    Local::Cell {
                        slot: var.slot,
                        cell,
                    }
                }
            };
            let frame = if global {
                self.globals.as_mut()
            } else {
                self.frames.last_mut()
            }
            .ok_or(RuntimeError::NoFrame)?;
            frame.insert(var.id.clone(), local);
        }
        Ok(())
    }

    fn inline_extent(&self, slot: Slot) -> Result<(usize, Vec<usize>), RuntimeError> {
        if slot.is_ref {
            return Ok((POINTER_SIZE, vec![0]));
        }
        let desc = self.descriptor(slot.ty)?;
        Ok((desc.size(), desc.pointer_map().as_slice().to_vec()))
    }

    // ===== Variables =====

    /// Read a scalar or reference variable as seen from `scope`
    pub fn read_var(&self, scope: ScopeId, name: &str) -> Result<Value, RuntimeError> {
        let (location, slot) = self.locate(scope, name)?;
        let ptr = self.address(&location)?;
        self.load(ptr, slot, name)
    }

    /// Assign a scalar or reference variable as seen from `scope`
    pub fn write_var(&mut self, scope: ScopeId, name: &str, value: Value) -> Result<(), RuntimeError> {
        let (location, slot) = self.locate(scope, name)?;
        let encoded = self.encode(slot, value, name)?;
        let ptr = self.address_mut(&location)?;
        // SAFETY: the location holds a slot of this type
        unsafe { encoded.write(ptr)? };
        Ok(())
    }

    /// Store through the reference held by a variable
    pub fn write_through(
        &mut self,
        scope: ScopeId,
        name: &str,
        value: Value,
    ) -> Result<(), RuntimeError> {
        let target = self.deref_var(scope, name)?;
        self.store_element(target, 0, value)
    }

    /// Load through the reference held by a variable
    pub fn read_through(&self, scope: ScopeId, name: &str) -> Result<Value, RuntimeError> {
        let target = self.deref_var(scope, name)?;
        self.load_element(target, 0)
    }

    fn deref_var(&self, scope: ScopeId, name: &str) -> Result<GcRef, RuntimeError> {
        match self.read_var(scope, name)? {
            Value::Ref(Some(r)) => Ok(r),
            Value::Ref(None) => Err(RuntimeError::NullReference {
                name: name.to_string(),
            }),
            other => Err(RuntimeError::TypeMismatch {
                expected: "ref".to_string(),
                actual: other.kind_name().to_string(),
            }),
        }
    }

    fn locate(&self, scope: ScopeId, name: &str) -> Result<(Location, Slot), RuntimeError> {
        let var = self
            .analysis
            .lookup(scope, name)
            .ok_or_else(|| RuntimeError::UnknownLocal {
                name: name.to_string(),
            })?;
        self.locate_var(&var)
    }

    fn locate_var(&self, var: &VarId) -> Result<(Location, Slot), RuntimeError> {
        let unknown = || RuntimeError::UnknownLocal {
            name: var.name.clone(),
        };
        let info = self.analysis.variable(var).ok_or_else(unknown)?;

        if info.storage == Storage::Global {
            let globals = self.globals.as_ref().ok_or_else(unknown)?;
            let local = globals.get(var).ok_or_else(unknown)?;
            return Ok((Location::Global(var.clone()), local.slot()));
        }

        let frame = self.frames.last().ok_or(RuntimeError::NoFrame)?;
        if let Some(local) = frame.get(var) {
            return match local {
                Local::Inline { .. } => {
                    self.analysis.check_access(var, Storage::Stack)?;
                    Ok((Location::Frame(var.clone()), local.slot()))
                }
                Local::Cell { cell, .. } => {
                    self.analysis.check_access(var, Storage::Heap)?;
                    Ok((Location::Heap(cell.addr()), local.slot()))
                }
            };
        }

        let instance = frame.closure().ok_or_else(unknown)?;
        let record = self
            .analysis
            .record(instance.closure)
            .ok_or(RuntimeError::UnknownScope {
                scope: instance.closure,
            })?;
        let capture = record
            .get(&var.name)
            .filter(|c| &c.var == var)
            .ok_or_else(unknown)?;
        let env_desc = self.descriptor(record.environment_layout())?;
        let field = env_desc
            .field(&var.name)
            .ok_or_else(|| RuntimeError::UnknownField {
                field: var.name.clone(),
            })?;
        let addr = instance.env.addr() + field.offset;
        match capture.mode {
            CaptureMode::Copy => Ok((Location::Snapshot(var.clone(), addr), capture.slot)),
            CaptureMode::Hoisted => {
                // SAFETY: hoisted environment fields are reference words
                let cell = unsafe { marshal::load_ref(addr as *const u8) }.ok_or_else(|| {
                    RuntimeError::NullReference {
                        name: var.name.clone(),
                    }
                })?;
                Ok((Location::Heap(cell.addr()), capture.slot))
            }
        }
    }

    fn address(&self, location: &Location) -> Result<*const u8, RuntimeError> {
        let (frame, var) = match location {
            Location::Heap(addr) | Location::Snapshot(_, addr) => return Ok(*addr as *const u8),
            Location::Global(var) => (self.globals.as_ref(), var),
            Location::Frame(var) => (self.frames.last(), var),
        };
        match frame.and_then(|f| f.get(var)) {
            Some(Local::Inline { bytes, .. }) => Ok(bytes.as_ptr()),
            _ => Err(RuntimeError::UnknownLocal {
                name: var.name.clone(),
            }),
        }
    }

    fn address_mut(&mut self, location: &Location) -> Result<*mut u8, RuntimeError> {
        let (frame, var) = match location {
            Location::Heap(addr) => return Ok(*addr as *mut u8),
            Location::Snapshot(var, _) => {
                // A closure never assigns what it copied
                self.analysis.check_access(var, Storage::Heap)?;
                return Err(RuntimeError::UnknownLocal {
                    name: var.name.clone(),
                });
            }
            Location::Global(var) => (self.globals.as_mut(), var),
            Location::Frame(var) => (self.frames.last_mut(), var),
        };
        match frame.and_then(|f| f.get_mut(var)) {
            Some(Local::Inline { bytes, .. }) => Ok(bytes.as_mut_ptr()),
            _ => Err(RuntimeError::UnknownLocal {
                name: var.name.clone(),
            }),
        }
    }

    fn load(&self, ptr: *const u8, slot: Slot, what: &str) -> Result<Value, RuntimeError> {
        let desc = if slot.is_ref {
            None
        } else {
            Some(self.descriptor(slot.ty)?)
        };
        if desc.as_ref().map_or(true, |d| d.as_array().is_some()) {
            // SAFETY: ptr addresses a reference or array handle word
            return Ok(Value::Ref(unsafe { marshal::load_ref(ptr) }));
        }
        let scalar = desc
            .and_then(|d| d.as_scalar())
            .ok_or_else(|| RuntimeError::NotScalar {
                what: what.to_string(),
            })?;
        // SAFETY: ptr addresses a scalar slot of this type
        Ok(unsafe { marshal::load_scalar(ptr, scalar) })
    }

    fn encode(&self, slot: Slot, value: Value, what: &str) -> Result<Encoded, RuntimeError> {
        let desc = if slot.is_ref {
            None
        } else {
            Some(self.descriptor(slot.ty)?)
        };
        if desc.as_ref().map_or(true, |d| d.as_array().is_some()) {
            let r = value.as_gc_ref().ok_or(MarshalError::TypeMismatch {
                expected: "ref",
                found: value.kind_name(),
            })?;
            if let Some(r) = r {
                self.gc.heap().resolve(r)?;
            }
            return Ok(Encoded::Ref(r));
        }
        let scalar = desc
            .and_then(|d| d.as_scalar())
            .ok_or_else(|| RuntimeError::NotScalar {
                what: what.to_string(),
            })?;
        marshal::check_scalar(scalar, value)?;
        Ok(Encoded::Scalar(scalar, value))
    }

    /// Offset and slot of a dotted path inside a value of `desc`
    ///
    /// Record fields are named, union variants are numbered:
    /// `header.len`, `payload.1`.
    fn field_path(&self, desc: &TypeDescriptor, path: &str) -> Result<(usize, Slot), RuntimeError> {
        let unknown = || RuntimeError::UnknownField {
            field: path.to_string(),
        };
        let mut offset = 0;
        let mut slot = Slot::value(desc.id());
        for segment in path.split('.') {
            if slot.is_ref {
                return Err(unknown());
            }
            let current = self.descriptor(slot.ty)?;
            slot = match current.kind() {
                TypeKind::Record(record) => {
                    let field = record.field(segment).ok_or_else(unknown)?;
                    offset += field.offset;
                    field.slot()
                }
                TypeKind::Union(union) => segment
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| union.variants.get(i).copied())
                    .ok_or_else(unknown)?,
                _ => return Err(unknown()),
            };
        }
        Ok((offset, slot))
    }

    /// Check that a literal gives every scalar and reference under `path` a value
    ///
    /// Unions take exactly one variant.
    fn check_initialised(
        &self,
        slot: Slot,
        path: &str,
        given: &[(&str, Value)],
    ) -> Result<(), RuntimeError> {
        let desc = if slot.is_ref {
            None
        } else {
            Some(self.descriptor(slot.ty)?)
        };
        match desc.as_ref().map(|d| d.kind()) {
            Some(TypeKind::Record(record)) => {
                for field in &record.fields {
                    self.check_initialised(field.slot(), &join_path(path, &field.name), given)?;
                }
                Ok(())
            }
            Some(TypeKind::Union(union)) => {
                let chosen: Vec<usize> = (0..union.variants.len())
                    .filter(|i| {
                        let variant = join_path(path, &i.to_string());
                        given.iter().any(|(p, _)| is_under(p, &variant))
                    })
                    .collect();
                match chosen.as_slice() {
                    [i] => self.check_initialised(
                        union.variants[*i],
                        &join_path(path, &i.to_string()),
                        given,
                    ),
                    [] => Err(RuntimeError::MissingField {
                        field: path.to_string(),
                    }),
                    _ => Err(RuntimeError::TypeMismatch {
                        expected: format!("one variant of `{path}`"),
                        actual: format!("{} variants", chosen.len()),
                    }),
                }
            }
            _ if given.iter().any(|(p, _)| *p == path) => Ok(()),
            _ => Err(RuntimeError::MissingField {
                field: path.to_string(),
            }),
        }
    }

    fn descriptor(&self, id: DescriptorId) -> Result<Arc<TypeDescriptor>, RuntimeError> {
        self.registry.descriptor(id).ok_or_else(|| {
            RuntimeError::Layout(LayoutError::UndefinedType {
                name: id.to_string(),
            })
        })
    }

    // ===== Closures =====

    /// Build the environment of a closure created in the current activation
    ///
    /// Copy captures are snapshotted now; hoisted captures store the address
    /// of the variable's cell, so later writes on either side are shared.
    pub fn make_closure(&mut self, closure: ClosureId) -> Result<GcRef, RuntimeError> {
        let analysis = Arc::clone(&self.analysis);
        let record = analysis
            .record(closure)
            .ok_or(RuntimeError::UnknownScope { scope: closure })?;
        let env_desc = self.descriptor(record.environment_layout())?;
        let env = self.allocate(&env_desc, 1, &[])?;

        for capture in record.captures() {
            let field = env_desc
                .field(capture.name())
                .ok_or_else(|| RuntimeError::UnknownField {
                    field: capture.name().to_string(),
                })?;
            // SAFETY: field offsets lie inside the environment payload
            let dst = unsafe { env.as_ptr().add(field.offset) };
            let (location, _) = self.locate_var(&capture.var)?;
            match capture.mode {
                CaptureMode::Copy => {
                    let src = self.address(&location)?;
                    // SAFETY: source and field have the same slot type and size
                    unsafe { std::ptr::copy_nonoverlapping(src, dst, field.size) };
                }
                CaptureMode::Hoisted => {
                    let Location::Heap(cell) = location else {
                        self.analysis.check_access(&capture.var, Storage::Stack)?;
                        return Err(RuntimeError::UnknownLocal {
                            name: capture.name().to_string(),
                        });
                    };
                    // SAFETY: hoisted fields are reference words
                    unsafe { marshal::store_ref(dst, GcRef::from_addr(cell)) };
                }
            }
        }
        if self.environments.len() >= self.gc.heap().live_objects() {
            let heap = self.gc.heap();
            self.environments
                .retain(|&addr, _| GcRef::from_addr(addr).is_some_and(|r| heap.is_live(r)));
        }
        self.environments.insert(env.addr(), closure);
        tracing::trace!(%closure, %env, captures = record.len(), "closure created");
        Ok(env)
    }

    // ===== Heap objects =====

    fn allocate(
        &mut self,
        desc: &Arc<TypeDescriptor>,
        count: usize,
        pinned: &[GcRef],
    ) -> Result<GcRef, RuntimeError> {
        let roots = MutatorRoots {
            globals: self.globals.as_ref(),
            frames: &self.frames,
            pinned,
        };
        let r = self.gc.allocate(desc, count, &roots)?;
        if !desc.has_pointers() {
            // SAFETY: the payload is count * size bytes
            unsafe { std::ptr::write_bytes(r.as_ptr(), 0, count * desc.size()) };
        }
        Ok(r)
    }

    fn element_descriptor(&self, element: &TypeExpr) -> Result<Arc<TypeDescriptor>, RuntimeError> {
        let slot = self.registry.resolve_slot(element)?;
        let id = if slot.is_ref {
            self.registry.cell_of(slot)?
        } else {
            slot.ty
        };
        self.descriptor(id)
    }

    /// Allocate `count` zeroed elements of `element`
    ///
    /// `ref T` elements are stored as cells of one reference each.
    pub fn alloc(&mut self, element: &TypeExpr, count: usize) -> Result<GcRef, RuntimeError> {
        let desc = self.element_descriptor(element)?;
        self.allocate(&desc, count, &[])
    }

    /// Allocate a record from a literal
    ///
    /// Every scalar, reference and array field must be given, inline records
    /// and union variants through dotted paths (`start.x`, `payload.1`).
    /// Exactly one variant of each union is given.
    pub fn alloc_record(
        &mut self,
        record: &TypeExpr,
        fields: &[(&str, Value)],
    ) -> Result<GcRef, RuntimeError> {
        let desc = self.registry.layout(record)?;
        if desc.as_record().is_none() {
            return Err(RuntimeError::TypeMismatch {
                expected: "record".to_string(),
                actual: desc.to_string(),
            });
        }

        let mut encoded = Vec::with_capacity(fields.len());
        for (path, value) in fields {
            let (offset, slot) = self.field_path(&desc, path)?;
            encoded.push((offset, self.encode(slot, *value, path)?));
        }
        self.check_initialised(Slot::value(desc.id()), "", fields)?;

        let pinned: Vec<GcRef> = fields
            .iter()
            .filter_map(|(_, value)| value.as_gc_ref().flatten())
            .collect();
        let obj = self.allocate(&desc, 1, &pinned)?;
        for (offset, value) in encoded {
            // SAFETY: offsets come from the record layout
            unsafe { value.write(obj.as_ptr().add(offset))? };
        }
        Ok(obj)
    }

    /// Allocate an array initialised from `values`
    pub fn alloc_array(
        &mut self,
        element: &TypeExpr,
        values: &[Value],
    ) -> Result<GcRef, RuntimeError> {
        let desc = self.element_descriptor(element)?;
        let (slot, offset) = element_slot(&desc).ok_or_else(|| RuntimeError::NotScalar {
            what: desc.to_string(),
        })?;
        let encoded = values
            .iter()
            .map(|value| self.encode(slot, *value, "element"))
            .collect::<Result<Vec<_>, _>>()?;

        let pinned: Vec<GcRef> = values
            .iter()
            .filter_map(|value| value.as_gc_ref().flatten())
            .collect();
        let arr = self.allocate(&desc, values.len(), &pinned)?;
        for (i, value) in encoded.into_iter().enumerate() {
            // SAFETY: i is below the element count
            unsafe { value.write(arr.as_ptr().add(i * desc.size() + offset))? };
        }
        Ok(arr)
    }

    fn element_ptr(
        &self,
        obj: GcRef,
        index: usize,
    ) -> Result<(*mut u8, Arc<TypeDescriptor>), RuntimeError> {
        let object = self.gc.heap().resolve(obj)?;
        if index >= object.count() {
            return Err(RuntimeError::IndexOutOfBounds {
                index,
                len: object.count(),
            });
        }
        let desc = Arc::clone(object.descriptor());
        // SAFETY: index is below the element count
        let ptr = unsafe { object.payload().add(index * desc.size()) };
        Ok((ptr, desc))
    }

    /// Number of elements of an object
    pub fn length(&self, obj: GcRef) -> Result<usize, RuntimeError> {
        Ok(self.gc.heap().resolve(obj)?.count())
    }

    /// Address of element `index`: `obj + index * element size`
    pub fn element_address(&self, obj: GcRef, index: usize) -> Result<usize, RuntimeError> {
        Ok(self.element_ptr(obj, index)?.0 as usize)
    }

    /// Load element `index` of a scalar or reference array
    pub fn load_element(&self, arr: GcRef, index: usize) -> Result<Value, RuntimeError> {
        let (ptr, desc) = self.element_ptr(arr, index)?;
        let (slot, offset) = element_slot(&desc).ok_or_else(|| RuntimeError::NotScalar {
            what: desc.to_string(),
        })?;
        // SAFETY: offset lies inside the element
        self.load(unsafe { ptr.add(offset) }, slot, "element")
    }

    /// Store element `index` of a scalar or reference array
    pub fn store_element(&mut self, arr: GcRef, index: usize, value: Value) -> Result<(), RuntimeError> {
        let (ptr, desc) = self.element_ptr(arr, index)?;
        let (slot, offset) = element_slot(&desc).ok_or_else(|| RuntimeError::NotScalar {
            what: desc.to_string(),
        })?;
        let encoded = self.encode(slot, value, "element")?;
        // SAFETY: offset lies inside the element
        unsafe { encoded.write(ptr.add(offset))? };
        Ok(())
    }

    /// Load a field of a record object
    ///
    /// `field` may be a dotted path into inline records and union variants.
    pub fn load_field(&self, obj: GcRef, field: &str) -> Result<Value, RuntimeError> {
        self.load_element_field(obj, 0, field)
    }

    /// Store a field of a record object
    pub fn store_field(&mut self, obj: GcRef, field: &str, value: Value) -> Result<(), RuntimeError> {
        self.store_element_field(obj, 0, field, value)
    }

    /// Load a field of element `index` of a record array
    pub fn load_element_field(
        &self,
        arr: GcRef,
        index: usize,
        field: &str,
    ) -> Result<Value, RuntimeError> {
        let (ptr, desc) = self.element_ptr(arr, index)?;
        let (offset, slot) = self.field_path(&desc, field)?;
        // SAFETY: path offsets lie inside the element
        self.load(unsafe { ptr.add(offset) }, slot, field)
    }

    /// Store a field of element `index` of a record array
    pub fn store_element_field(
        &mut self,
        arr: GcRef,
        index: usize,
        field: &str,
        value: Value,
    ) -> Result<(), RuntimeError> {
        let (ptr, desc) = self.element_ptr(arr, index)?;
        let (offset, slot) = self.field_path(&desc, field)?;
        let encoded = self.encode(slot, value, field)?;
        // SAFETY: path offsets lie inside the element
        unsafe { encoded.write(ptr.add(offset))? };
        Ok(())
    }

    /// Size in bytes of a type
    pub fn size_of(&self, ty: &TypeExpr) -> Result<usize, RuntimeError> {
        Ok(self.registry.size_of(ty)?)
    }

    // ===== Foreign calls =====

    /// Marshal variables as arguments of a foreign call
    ///
    /// References are passed as payload addresses. The returned arguments
    /// borrow the runtime, so nothing can be collected until they are dropped.
    pub fn foreign_args(&self, scope: ScopeId, names: &[&str]) -> Result<ForeignArgs<'_>, RuntimeError> {
        let mut args = Vec::with_capacity(names.len());
        for name in names {
            let (location, slot) = self.locate(scope, name)?;
            let ptr = self.address(&location)?;
            let arg = if slot.is_ref {
                // SAFETY: ptr addresses a reference slot
                ForeignArg::from_ref(unsafe { marshal::load_ref(ptr) })
            } else {
                let scalar = self.descriptor(slot.ty)?.as_scalar().ok_or_else(|| {
                    MarshalError::Unmarshallable {
                        what: name.to_string(),
                    }
                })?;
                // SAFETY: ptr addresses a scalar slot of this type
                ForeignArg::from_scalar(scalar, unsafe { marshal::load_scalar(ptr, scalar) })?
            };
            args.push(arg);
        }
        Ok(ForeignArgs::new(args))
    }

    // ===== Collection =====

    /// Run a collection with every frame as a root
    pub fn collect(&mut self) {
        let roots = MutatorRoots {
            globals: self.globals.as_ref(),
            frames: &self.frames,
            pinned: &[],
        };
        self.gc.collect_roots(&roots);
    }

    /// Hold a host reference as a root
    pub fn add_root(&mut self, r: GcRef) {
        self.gc.add_root(r);
    }

    /// Release one hold on a host reference
    pub fn remove_root(&mut self, r: GcRef) -> bool {
        self.gc.remove_root(r)
    }

    /// Check if a reference names a live object
    pub fn is_live(&self, r: GcRef) -> bool {
        self.gc.heap().is_live(r)
    }

    /// Collection statistics
    pub fn stats(&self) -> &GcStats {
        self.gc.stats()
    }

    /// Heap statistics
    pub fn heap_stats(&self) -> HeapStats {
        self.gc.heap_stats()
    }
}
