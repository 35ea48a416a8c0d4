//! Lexical scope tree
//!
//! The front end hands the analyzer one [`Scope`] tree per compilation unit.
//! Each scope lists the variables it declares, the variable accesses that
//! occur directly in it (in source order), and its nested scopes. Closures
//! are scopes of kind [`ScopeKind::Closure`]; the closure is identified by
//! its scope id.

use std::fmt;
use tern_layout::TypeExpr;

/// Scope identifier, assigned by the front end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub u32);

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope#{}", self.0)
    }
}

/// A closure is identified by the scope of its body
pub type ClosureId = ScopeId;

/// Scope kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// Module-level scope; its variables are persistent storage
    Global,
    /// Named function body
    Function,
    /// Nested block inside a function or closure
    Block,
    /// Closure body
    Closure,
}

/// How an access touches a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
    /// Load of the variable's value
    Read,
    /// Plain assignment to the variable
    Assign,
    /// `value at x = ...`: a store through the variable
    WriteThrough,
}

impl AccessKind {
    /// Whether this access mutates the variable
    pub fn is_write(self) -> bool {
        !matches!(self, AccessKind::Read)
    }
}

/// A variable declaration
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    /// Variable name
    pub name: String,
    /// Declared type
    pub ty: TypeExpr,
}

/// A variable access
#[derive(Debug, Clone, PartialEq)]
pub struct Access {
    /// Variable name as written at the access site
    pub name: String,
    /// Access kind
    pub kind: AccessKind,
}

/// A lexical scope
#[derive(Debug, Clone, PartialEq)]
pub struct Scope {
    /// Scope id
    pub id: ScopeId,
    /// Scope kind
    pub kind: ScopeKind,
    /// Variables declared directly in this scope
    pub declarations: Vec<Declaration>,
    /// Accesses occurring directly in this scope, in source order
    pub accesses: Vec<Access>,
    /// Nested scopes, in source order
    pub children: Vec<Scope>,
}

impl Scope {
    /// Create an empty scope
    pub fn new(id: u32, kind: ScopeKind) -> Self {
        Self {
            id: ScopeId(id),
            kind,
            declarations: Vec::new(),
            accesses: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Add a declaration
    pub fn declare(mut self, name: impl Into<String>, ty: TypeExpr) -> Self {
        self.declarations.push(Declaration {
            name: name.into(),
            ty,
        });
        self
    }

    /// Add a read
    pub fn read(self, name: impl Into<String>) -> Self {
        self.access(name, AccessKind::Read)
    }

    /// Add an assignment
    pub fn assign(self, name: impl Into<String>) -> Self {
        self.access(name, AccessKind::Assign)
    }

    /// Add a store through the variable
    pub fn write_through(self, name: impl Into<String>) -> Self {
        self.access(name, AccessKind::WriteThrough)
    }

    /// Add an access of the given kind
    pub fn access(mut self, name: impl Into<String>, kind: AccessKind) -> Self {
        self.accesses.push(Access {
            name: name.into(),
            kind,
        });
        self
    }

    /// Add a nested scope
    pub fn child(mut self, scope: Scope) -> Self {
        self.children.push(scope);
        self
    }

    /// Whether this scope is a closure body
    pub fn is_closure(&self) -> bool {
        self.kind == ScopeKind::Closure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_layout::Scalar;

    #[test]
    fn test_builder() {
        let scope = Scope::new(1, ScopeKind::Function)
            .declare("x", TypeExpr::scalar(Scalar::Int))
            .assign("x")
            .child(Scope::new(2, ScopeKind::Closure).read("x"));

        assert_eq!(scope.id, ScopeId(1));
        assert_eq!(scope.declarations.len(), 1);
        assert_eq!(scope.accesses[0].kind, AccessKind::Assign);
        assert!(scope.children[0].is_closure());
    }

    #[test]
    fn test_access_kind_is_write() {
        assert!(!AccessKind::Read.is_write());
        assert!(AccessKind::Assign.is_write());
        assert!(AccessKind::WriteThrough.is_write());
    }
}
