//! Type registry: structural interning of type descriptors
//!
//! The registry turns [`TypeExpr`] trees into [`TypeDescriptor`]s. Every
//! descriptor is keyed by its *shape* (the kind plus the slots of its
//! children), so two independently written but structurally identical
//! expressions always come back as the same `Arc` instance. Descriptors are
//! never removed: the registry lives as long as the process.
//!
//! # Recursive types
//!
//! Recursion is only possible through named aliases and must cross a `ref`:
//!
//! ```text
//! Node = { value: int, next: ref Node }     ok, `next` is one word
//! Bad  = { value: int, inner: Bad }         LayoutError::UnboundedCycle
//! ```
//!
//! While an alias is being resolved, a direct `ref Alias` reserves a
//! placeholder id which is filled in once the alias body is laid out. Any
//! other `ref` whose pointee uses an alias still being resolved gets a
//! placeholder too; the pointee is laid out once that alias is complete:
//!
//! ```text
//! List = { head: ref { value: int, rest: List } }   List is one word
//! ```

use crate::descriptor::{
    ArrayLayout, DescriptorId, FieldLayout, RecordLayout, Slot, TypeDescriptor, TypeKind,
    UnionLayout,
};
use crate::error::LayoutError;
use crate::expr::{RecordExpr, TypeExpr};
use crate::pointer_map::PointerMap;
use crate::scalar::{Scalar, POINTER_ALIGN, POINTER_SIZE};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;
use std::sync::{Arc, LazyLock};

/// Largest accepted `packed(N)`
pub const MAX_PACKING: u32 = 4096;

/// Name of the single field of a hoisted variable cell
pub const CELL_FIELD: &str = "value";

/// Round `offset` up to the next multiple of `align` (a power of two)
#[inline]
pub fn align_up(offset: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (offset + align - 1) & !(align - 1)
}

/// Structural key used for interning
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Shape {
    Primitive(Scalar),
    Record {
        fields: Vec<(String, Slot)>,
        packing: Option<u32>,
    },
    Union(Vec<Slot>),
    Array(Slot),
}

#[derive(Default)]
struct RegistryInner {
    /// Indexed by `DescriptorId`; `None` only for unfilled placeholders
    descriptors: Vec<Option<Arc<TypeDescriptor>>>,
    shape_to_id: FxHashMap<Shape, DescriptorId>,
    aliases: FxHashMap<String, TypeExpr>,
    resolved_aliases: FxHashMap<String, Slot>,
}

impl RegistryInner {
    fn complete(&self, id: DescriptorId) -> &TypeDescriptor {
        self.descriptors[id.index()]
            .as_deref()
            .expect("value slots always refer to complete descriptors")
    }

    /// (size, align) of a slot
    fn slot_extent(&self, slot: Slot) -> (usize, usize) {
        if slot.is_ref {
            (POINTER_SIZE, POINTER_ALIGN)
        } else {
            let desc = self.complete(slot.ty);
            (desc.size, desc.align)
        }
    }

    /// Append the traced words of a slot stored at `offset`
    fn slot_pointers(&self, slot: Slot, offset: usize, out: &mut Vec<usize>) {
        if slot.is_ref {
            out.push(offset);
        } else {
            self.complete(slot.ty).pointer_map.extend_shifted(offset, out);
        }
    }

    fn reserve(&mut self) -> DescriptorId {
        let id = DescriptorId(self.descriptors.len() as u32);
        self.descriptors.push(None);
        id
    }

    fn intern(&mut self, shape: Shape) -> Result<DescriptorId, LayoutError> {
        if let Some(&id) = self.shape_to_id.get(&shape) {
            return Ok(id);
        }
        let id = DescriptorId(self.descriptors.len() as u32);
        let descriptor = self.build(id, &shape)?;
        tracing::debug!(%descriptor, "interned type descriptor");
        self.descriptors.push(Some(Arc::new(descriptor)));
        self.shape_to_id.insert(shape, id);
        Ok(id)
    }

    /// Fill a reserved placeholder
    fn install(&mut self, id: DescriptorId, shape: Shape) -> Result<(), LayoutError> {
        let descriptor = self.build(id, &shape)?;
        tracing::debug!(%descriptor, "installed recursive type descriptor");
        self.descriptors[id.index()] = Some(Arc::new(descriptor));
        self.shape_to_id.entry(shape).or_insert(id);
        Ok(())
    }

    fn build(&self, id: DescriptorId, shape: &Shape) -> Result<TypeDescriptor, LayoutError> {
        let (kind, size, align, pointer_map) = match shape {
            Shape::Primitive(s) => (
                TypeKind::Primitive(*s),
                s.size(),
                s.align(),
                PointerMap::none(),
            ),
            Shape::Record { fields, packing } => self.layout_record(fields, *packing)?,
            Shape::Union(variants) => self.layout_union(variants)?,
            Shape::Array(element) => {
                let (element_size, _) = self.slot_extent(*element);
                (
                    TypeKind::Array(ArrayLayout {
                        element: *element,
                        element_size,
                    }),
                    POINTER_SIZE,
                    POINTER_ALIGN,
                    // The handle word points at the element buffer
                    PointerMap::single(),
                )
            }
        };
        debug_assert_eq!(size % align, 0);
        Ok(TypeDescriptor {
            id,
            kind,
            size,
            align,
            pointer_map,
        })
    }

    fn layout_record(
        &self,
        fields: &[(String, Slot)],
        packing: Option<u32>,
    ) -> Result<(TypeKind, usize, usize, PointerMap), LayoutError> {
        if let Some(n) = packing {
            if n == 0 || !n.is_power_of_two() || n > MAX_PACKING {
                return Err(LayoutError::InvalidPacking {
                    packing: n,
                    max: MAX_PACKING,
                });
            }
        }

        let mut seen = FxHashSet::default();
        let mut laid_out = Vec::with_capacity(fields.len());
        let mut pointers = Vec::new();
        let mut end = 0usize;
        let mut align = packing.map_or(1, |n| n as usize);

        for (name, slot) in fields {
            if !seen.insert(name.as_str()) {
                return Err(LayoutError::DuplicateField {
                    field: name.clone(),
                });
            }
            let (size, field_align) = self.slot_extent(*slot);
            let offset = match packing {
                Some(n) => {
                    let n = n as usize;
                    if field_align > n {
                        return Err(LayoutError::IncompatiblePacking {
                            field: name.clone(),
                            align: field_align,
                            packing: n as u32,
                        });
                    }
                    align_up(end, n)
                }
                None => {
                    align = align.max(field_align);
                    align_up(end, field_align)
                }
            };
            self.slot_pointers(*slot, offset, &mut pointers);
            laid_out.push(FieldLayout {
                name: name.clone(),
                offset,
                ty: slot.ty,
                is_ref: slot.is_ref,
                size,
            });
            end = offset + size;
        }

        let size = align_up(end, align);
        let kind = TypeKind::Record(RecordLayout {
            fields: laid_out,
            packing,
        });
        Ok((kind, size, align, PointerMap::offsets(pointers)))
    }

    fn layout_union(
        &self,
        variants: &[Slot],
    ) -> Result<(TypeKind, usize, usize, PointerMap), LayoutError> {
        if variants.is_empty() {
            return Err(LayoutError::EmptyUnion);
        }
        let mut size = 0;
        let mut align = 1;
        let mut pointers = Vec::new();
        for slot in variants {
            let (s, a) = self.slot_extent(*slot);
            size = size.max(s);
            align = align.max(a);
            // No tag at runtime: every branch's words are traced
            self.slot_pointers(*slot, 0, &mut pointers);
        }
        let kind = TypeKind::Union(UnionLayout {
            variants: variants.to_vec(),
        });
        Ok((kind, align_up(size, align), align, PointerMap::offsets(pointers)))
    }
}

struct Pending {
    name: String,
    ref_depth: usize,
    placeholder: Option<DescriptorId>,
}

enum AliasBody {
    Shape(Shape),
    Slot(Slot),
}

/// A `ref` pointee laid out after the aliases it depends on
enum Deferred {
    Alias(String),
    Pointee { id: DescriptorId, target: TypeExpr },
}

/// One resolution pass over an expression tree
struct Resolver<'r> {
    reg: &'r mut RegistryInner,
    in_progress: Vec<Pending>,
    ref_depth: usize,
    deferred: Vec<Deferred>,
    deferred_aliases: FxHashMap<String, DescriptorId>,
}

impl<'r> Resolver<'r> {
    fn new(reg: &'r mut RegistryInner) -> Self {
        Self {
            reg,
            in_progress: Vec::new(),
            ref_depth: 0,
            deferred: Vec::new(),
            deferred_aliases: FxHashMap::default(),
        }
    }

    fn is_pending(&self, name: &str) -> bool {
        self.in_progress.iter().any(|p| p.name == name)
    }

    /// Whether laying out `expr` needs an alias that is still being resolved
    fn needs_pending(&self, expr: &TypeExpr, visited: &mut FxHashSet<String>) -> bool {
        match expr {
            TypeExpr::Primitive(_) => false,
            TypeExpr::Named(name) => {
                if self.is_pending(name) {
                    return true;
                }
                if self.reg.resolved_aliases.contains_key(name.as_str())
                    || !visited.insert(name.clone())
                {
                    return false;
                }
                match self.reg.aliases.get(name.as_str()) {
                    Some(body) => self.needs_pending(body, visited),
                    None => false,
                }
            }
            TypeExpr::Ref(target) => match target.as_ref() {
                // Served by a placeholder without looking at the body
                TypeExpr::Named(name)
                    if self.is_pending(name) || self.deferred_aliases.contains_key(name) =>
                {
                    false
                }
                other => self.needs_pending(other, visited),
            },
            TypeExpr::Record(RecordExpr { fields, .. }) => fields
                .iter()
                .any(|field| self.needs_pending(&field.ty, visited)),
            TypeExpr::Union(variants) => variants.iter().any(|v| self.needs_pending(v, visited)),
            TypeExpr::Array(element) => self.needs_pending(element, visited),
        }
    }

    /// Lay out every deferred pointee into its placeholder
    fn drain_deferred(&mut self) -> Result<(), LayoutError> {
        while let Some(deferred) = self.deferred.pop() {
            match deferred {
                Deferred::Alias(name) => {
                    if self.deferred_aliases.contains_key(&name) {
                        self.alias(&name)?;
                    }
                }
                Deferred::Pointee { id, target } => {
                    let shape = match &target {
                        TypeExpr::Ref(_) => cell_shape(self.slot(&target)?),
                        other => self.shape(other)?,
                    };
                    self.reg.install(id, shape)?;
                }
            }
        }
        Ok(())
    }

    fn slot(&mut self, expr: &TypeExpr) -> Result<Slot, LayoutError> {
        match expr {
            TypeExpr::Ref(target) => {
                self.ref_depth += 1;
                let target = self.ref_target(target);
                self.ref_depth -= 1;
                Ok(Slot::reference(target?))
            }
            TypeExpr::Named(name) => self.alias(name),
            other => {
                let shape = self.shape(other)?;
                Ok(Slot::value(self.reg.intern(shape)?))
            }
        }
    }

    fn ref_target(&mut self, target: &TypeExpr) -> Result<DescriptorId, LayoutError> {
        if let TypeExpr::Named(name) = target {
            if let Some(pending) = self.in_progress.iter_mut().find(|p| &p.name == name) {
                let id = match pending.placeholder {
                    Some(id) => id,
                    None => {
                        let id = self.reg.reserve();
                        pending.placeholder = Some(id);
                        id
                    }
                };
                return Ok(id);
            }
            if let Some(&id) = self.deferred_aliases.get(name) {
                return Ok(id);
            }
        }
        if !self.in_progress.is_empty() && self.needs_pending(target, &mut FxHashSet::default()) {
            let id = self.reg.reserve();
            match target {
                TypeExpr::Named(name) => {
                    self.deferred_aliases.insert(name.clone(), id);
                    self.deferred.push(Deferred::Alias(name.clone()));
                }
                other => self.deferred.push(Deferred::Pointee {
                    id,
                    target: other.clone(),
                }),
            }
            return Ok(id);
        }
        let slot = self.slot(target)?;
        if slot.is_ref {
            // `ref ref T` points at a one-word cell holding the inner address
            self.reg.intern(cell_shape(slot))
        } else {
            Ok(slot.ty)
        }
    }

    /// Shape of a non-ref, non-alias expression
    fn shape(&mut self, expr: &TypeExpr) -> Result<Shape, LayoutError> {
        match expr {
            TypeExpr::Primitive(s) => Ok(Shape::Primitive(*s)),
            TypeExpr::Record(RecordExpr { fields, packing }) => {
                let mut slots = Vec::with_capacity(fields.len());
                for field in fields {
                    slots.push((field.name.clone(), self.slot(&field.ty)?));
                }
                Ok(Shape::Record {
                    fields: slots,
                    packing: *packing,
                })
            }
            TypeExpr::Union(variants) => {
                let mut slots = Vec::with_capacity(variants.len());
                for variant in variants {
                    slots.push(self.slot(variant)?);
                }
                Ok(Shape::Union(slots))
            }
            TypeExpr::Array(element) => Ok(Shape::Array(self.slot(element)?)),
            TypeExpr::Ref(_) | TypeExpr::Named(_) => {
                unreachable!("refs and aliases are resolved as slots")
            }
        }
    }

    fn alias(&mut self, name: &str) -> Result<Slot, LayoutError> {
        if let Some(&slot) = self.reg.resolved_aliases.get(name) {
            return Ok(slot);
        }
        if let Some(pending) = self.in_progress.iter().find(|p| p.name == name) {
            return Err(if self.ref_depth > pending.ref_depth {
                LayoutError::RecursiveReference {
                    name: name.to_string(),
                }
            } else {
                LayoutError::UnboundedCycle {
                    name: name.to_string(),
                }
            });
        }
        let body = self
            .reg
            .aliases
            .get(name)
            .cloned()
            .ok_or_else(|| LayoutError::UndefinedType {
                name: name.to_string(),
            })?;

        let deferred = self.deferred_aliases.remove(name);
        self.in_progress.push(Pending {
            name: name.to_string(),
            ref_depth: self.ref_depth,
            placeholder: deferred,
        });
        let body = match &body {
            TypeExpr::Ref(_) | TypeExpr::Named(_) => self.slot(&body).map(AliasBody::Slot),
            other => self.shape(other).map(AliasBody::Shape),
        };
        let placeholder = self.in_progress.pop().and_then(|p| p.placeholder);

        let slot = match (body?, placeholder) {
            (AliasBody::Shape(shape), None) => Slot::value(self.reg.intern(shape)?),
            (AliasBody::Shape(shape), Some(id)) => {
                self.reg.install(id, shape)?;
                Slot::value(id)
            }
            (AliasBody::Slot(slot), None) => slot,
            (AliasBody::Slot(slot), Some(id)) if !slot.is_ref => {
                // `A = B` where B refers back to A: A's placeholder gets B's layout
                let mut copy = self.reg.complete(slot.ty).clone();
                copy.id = id;
                self.reg.descriptors[id.index()] = Some(Arc::new(copy));
                Slot::value(id)
            }
            (AliasBody::Slot(slot), Some(id)) if deferred.is_some() => {
                // The placeholder stands for the pointee of `ref Alias`
                self.reg.install(id, cell_shape(slot))?;
                slot
            }
            (AliasBody::Slot(_), Some(_)) => {
                return Err(LayoutError::RecursiveReference {
                    name: name.to_string(),
                });
            }
        };
        self.reg.resolved_aliases.insert(name.to_string(), slot);
        if self.in_progress.is_empty() {
            self.drain_deferred()?;
        }
        Ok(slot)
    }
}

fn cell_shape(slot: Slot) -> Shape {
    Shape::Record {
        fields: vec![(CELL_FIELD.to_string(), slot)],
        packing: None,
    }
}

/// Registry of type descriptors
///
/// Populated during compilation; lookups afterwards only take the read lock.
pub struct TypeRegistry {
    inner: RwLock<RegistryInner>,
}

impl TypeRegistry {
    /// Create a registry with every scalar pre-interned
    pub fn new() -> Self {
        let mut inner = RegistryInner::default();
        for scalar in Scalar::ALL {
            let id = DescriptorId(inner.descriptors.len() as u32);
            inner.descriptors.push(Some(Arc::new(TypeDescriptor {
                id,
                kind: TypeKind::Primitive(scalar),
                size: scalar.size(),
                align: scalar.align(),
                pointer_map: PointerMap::none(),
            })));
            inner.shape_to_id.insert(Shape::Primitive(scalar), id);
        }
        Self {
            inner: RwLock::new(inner),
        }
    }

    /// Register a named alias
    ///
    /// Redefining an alias with an identical body is a no-op.
    pub fn define_alias(&self, name: impl Into<String>, body: TypeExpr) -> Result<(), LayoutError> {
        let name = name.into();
        let mut inner = self.inner.write();
        match inner.aliases.get(&name) {
            Some(existing) if *existing == body => Ok(()),
            Some(_) => Err(LayoutError::AliasRedefined { name }),
            None => {
                inner.aliases.insert(name, body);
                Ok(())
            }
        }
    }

    /// Body of a named alias
    pub fn alias(&self, name: &str) -> Option<TypeExpr> {
        self.inner.read().aliases.get(name).cloned()
    }

    /// Resolve an expression to its storage slot
    pub fn resolve_slot(&self, expr: &TypeExpr) -> Result<Slot, LayoutError> {
        let mut inner = self.inner.write();
        Resolver::new(&mut inner).slot(expr)
    }

    /// Resolve an expression to its descriptor id (the pointee for `ref T`)
    pub fn resolve(&self, expr: &TypeExpr) -> Result<DescriptorId, LayoutError> {
        self.resolve_slot(expr).map(|slot| slot.ty)
    }

    /// Resolve an expression to its descriptor (the pointee for `ref T`)
    pub fn layout(&self, expr: &TypeExpr) -> Result<Arc<TypeDescriptor>, LayoutError> {
        let id = self.resolve(expr)?;
        self.descriptor(id)
            .ok_or_else(|| LayoutError::RecursiveReference {
                name: expr.to_string(),
            })
    }

    /// `sizeof <TypeExpr>`: bytes occupied by a value of this type
    pub fn size_of(&self, expr: &TypeExpr) -> Result<usize, LayoutError> {
        let slot = self.resolve_slot(expr)?;
        Ok(self.slot_size(slot))
    }

    /// Look up a descriptor by id
    pub fn descriptor(&self, id: DescriptorId) -> Option<Arc<TypeDescriptor>> {
        self.inner
            .read()
            .descriptors
            .get(id.index())
            .and_then(|d| d.clone())
    }

    /// Bytes occupied by a slot
    pub fn slot_size(&self, slot: Slot) -> usize {
        self.inner.read().slot_extent(slot).0
    }

    /// Lay out an unpacked or packed record directly from slots
    ///
    /// Used for closure environments, whose fields come from capture analysis
    /// rather than from source type expressions.
    pub fn record_of(
        &self,
        fields: &[(String, Slot)],
        packing: Option<u32>,
    ) -> Result<DescriptorId, LayoutError> {
        self.inner.write().intern(Shape::Record {
            fields: fields.to_vec(),
            packing,
        })
    }

    /// Descriptor of the heap cell backing a hoisted variable stored as `slot`
    pub fn cell_of(&self, slot: Slot) -> Result<DescriptorId, LayoutError> {
        self.inner.write().intern(cell_shape(slot))
    }

    /// Number of descriptor ids handed out
    pub fn len(&self) -> usize {
        self.inner.read().descriptors.len()
    }

    /// Check if the registry is empty (never true: scalars are pre-interned)
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("TypeRegistry")
            .field("descriptors", &inner.descriptors.len())
            .field("aliases", &inner.aliases.len())
            .finish()
    }
}

static GLOBAL: LazyLock<Arc<TypeRegistry>> = LazyLock::new(|| Arc::new(TypeRegistry::new()));

/// The process-wide registry
///
/// Populated once during compilation/linking and never torn down.
pub fn global() -> Arc<TypeRegistry> {
    Arc::clone(&GLOBAL)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int() -> TypeExpr {
        TypeExpr::scalar(Scalar::Int)
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 4), 0);
        assert_eq!(align_up(1, 4), 4);
        assert_eq!(align_up(4, 4), 4);
        assert_eq!(align_up(5, 8), 8);
    }

    #[test]
    fn test_scalars_preinterned() {
        let registry = TypeRegistry::new();
        assert_eq!(registry.len(), Scalar::ALL.len());
        let id = registry.resolve(&int()).unwrap();
        assert_eq!(registry.len(), Scalar::ALL.len());
        assert_eq!(registry.descriptor(id).unwrap().as_scalar(), Some(Scalar::Int));
    }

    #[test]
    fn test_unpacked_record_padding() {
        let registry = TypeRegistry::new();
        let desc = registry
            .layout(&TypeExpr::record([
                ("a", TypeExpr::scalar(Scalar::UByte)),
                ("b", TypeExpr::scalar(Scalar::Double)),
                ("c", TypeExpr::scalar(Scalar::UShort)),
            ]))
            .unwrap();
        let offsets: Vec<_> = desc.fields().iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 8, 16]);
        assert_eq!(desc.align(), 8);
        assert_eq!(desc.size(), 24);
    }

    #[test]
    fn test_empty_record() {
        let registry = TypeRegistry::new();
        let desc = registry
            .layout(&TypeExpr::record(Vec::<(String, TypeExpr)>::new()))
            .unwrap();
        assert_eq!(desc.size(), 0);
        assert_eq!(desc.align(), 1);
    }

    #[test]
    fn test_ref_to_ref_uses_cell() {
        let registry = TypeRegistry::new();
        let slot = registry
            .resolve_slot(&TypeExpr::reference(TypeExpr::reference(int())))
            .unwrap();
        assert!(slot.is_ref);
        let cell = registry.descriptor(slot.ty).unwrap();
        assert_eq!(cell.fields().len(), 1);
        assert!(cell.fields()[0].is_ref);
        assert_eq!(cell.pointer_map().as_slice(), &[0]);
    }

    #[test]
    fn test_cell_of_value_matches_value_layout() {
        let registry = TypeRegistry::new();
        let slot = registry.resolve_slot(&TypeExpr::scalar(Scalar::Double)).unwrap();
        let cell = registry.descriptor(registry.cell_of(slot).unwrap()).unwrap();
        assert_eq!(cell.size(), 8);
        assert_eq!(cell.field(CELL_FIELD).unwrap().offset, 0);
        assert!(!cell.has_pointers());
    }

    #[test]
    fn test_alias_redefinition() {
        let registry = TypeRegistry::new();
        registry.define_alias("T", int()).unwrap();
        registry.define_alias("T", int()).unwrap();
        assert_eq!(
            registry.define_alias("T", TypeExpr::scalar(Scalar::Long)),
            Err(LayoutError::AliasRedefined {
                name: "T".to_string()
            })
        );
    }
}
