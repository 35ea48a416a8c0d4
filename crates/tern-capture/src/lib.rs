//! Tern Capture Analysis
//!
//! Decides, for every closure, which enclosing variables it captures and
//! whether each one is copied into the closure environment or shared through
//! a heap cell.
//!
//! ```
//! use tern_capture::{CaptureAnalyzer, CaptureMode, Scope, ScopeId, ScopeKind};
//! use tern_layout::{Scalar, TypeExpr, TypeRegistry};
//!
//! let registry = TypeRegistry::new();
//! let body = Scope::new(0, ScopeKind::Function)
//!     .declare("n", TypeExpr::scalar(Scalar::Int))
//!     .child(Scope::new(1, ScopeKind::Closure).assign("n"));
//!
//! let analysis = CaptureAnalyzer::new(&registry).analyze(&body).unwrap();
//! let record = analysis.record(ScopeId(1)).unwrap();
//! assert_eq!(record.get("n").unwrap().mode, CaptureMode::Hoisted);
//! ```

#![warn(missing_docs)]

pub mod analysis;
pub mod error;
pub mod record;
pub mod scope;

pub use analysis::{AccessSite, CaptureAnalysis, CaptureAnalyzer, Storage, VarId, Variable};
pub use error::CaptureError;
pub use record::{Capture, CaptureMode, CaptureRecord};
pub use scope::{Access, AccessKind, ClosureId, Declaration, Scope, ScopeId, ScopeKind};
