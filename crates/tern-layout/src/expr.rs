//! Normalized type expressions
//!
//! This is the tree the front end hands to the layout engine once aliases,
//! generics and inference have been settled. Only the shape matters here:
//! two expressions that print the same resolve to the same descriptor.

use crate::scalar::Scalar;
use std::fmt;

/// A normalized type expression
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeExpr {
    /// A primitive value type
    Primitive(Scalar),
    /// A record: ordered fields, optionally `packed(N)`
    Record(RecordExpr),
    /// Untagged union storage over the variants
    Union(Vec<TypeExpr>),
    /// Array of the element type (the value is a handle to a heap buffer)
    Array(Box<TypeExpr>),
    /// `ref T`: stored as the address of a `T`
    Ref(Box<TypeExpr>),
    /// A named alias registered with [`TypeRegistry::define_alias`](crate::TypeRegistry::define_alias)
    Named(String),
}

/// Record type expression
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordExpr {
    /// Fields in declaration order
    pub fields: Vec<FieldExpr>,
    /// `packed(N)` directive
    pub packing: Option<u32>,
}

/// A single record field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldExpr {
    /// Field name
    pub name: String,
    /// Field type
    pub ty: TypeExpr,
}

impl FieldExpr {
    /// Create a field
    pub fn new(name: impl Into<String>, ty: TypeExpr) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

impl TypeExpr {
    /// Primitive type
    pub fn scalar(scalar: Scalar) -> Self {
        TypeExpr::Primitive(scalar)
    }

    /// Unpacked record from `(name, type)` pairs
    pub fn record<N, I>(fields: I) -> Self
    where
        N: Into<String>,
        I: IntoIterator<Item = (N, TypeExpr)>,
    {
        TypeExpr::Record(RecordExpr {
            fields: fields
                .into_iter()
                .map(|(name, ty)| FieldExpr::new(name, ty))
                .collect(),
            packing: None,
        })
    }

    /// `packed(N)` record from `(name, type)` pairs
    pub fn packed_record<N, I>(packing: u32, fields: I) -> Self
    where
        N: Into<String>,
        I: IntoIterator<Item = (N, TypeExpr)>,
    {
        match TypeExpr::record(fields) {
            TypeExpr::Record(mut record) => {
                record.packing = Some(packing);
                TypeExpr::Record(record)
            }
            _ => unreachable!(),
        }
    }

    /// Union of the given variants
    pub fn union(variants: impl IntoIterator<Item = TypeExpr>) -> Self {
        TypeExpr::Union(variants.into_iter().collect())
    }

    /// Array of `element`
    pub fn array(element: TypeExpr) -> Self {
        TypeExpr::Array(Box::new(element))
    }

    /// `ref target`
    pub fn reference(target: TypeExpr) -> Self {
        TypeExpr::Ref(Box::new(target))
    }

    /// Reference to a named alias
    pub fn named(name: impl Into<String>) -> Self {
        TypeExpr::Named(name.into())
    }

    /// Whether this expression is a `ref` marker
    pub fn is_ref(&self) -> bool {
        matches!(self, TypeExpr::Ref(_))
    }
}

impl From<Scalar> for TypeExpr {
    fn from(scalar: Scalar) -> Self {
        TypeExpr::Primitive(scalar)
    }
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeExpr::Primitive(s) => write!(f, "{s}"),
            TypeExpr::Record(record) => {
                if let Some(n) = record.packing {
                    write!(f, "packed({n}) ")?;
                }
                f.write_str("{")?;
                for (i, field) in record.fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", field.name, field.ty)?;
                }
                f.write_str("}")
            }
            TypeExpr::Union(variants) => {
                for (i, v) in variants.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" | ")?;
                    }
                    write!(f, "{v}")?;
                }
                Ok(())
            }
            TypeExpr::Array(element) => write!(f, "array of {element}"),
            TypeExpr::Ref(target) => write!(f, "ref {target}"),
            TypeExpr::Named(name) => f.write_str(name),
        }
    }
}
