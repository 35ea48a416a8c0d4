//! Tern Runtime
//!
//! This crate provides the memory side of a running Tern program:
//! - Heap and non-moving mark-sweep garbage collector
//! - Frames, hoisted-variable cells and closure environments
//! - Field and element access on heap objects
//! - Marshalling for foreign calls and C layout checks
//!
//! ```
//! use std::sync::Arc;
//! use tern_capture::{CaptureAnalyzer, Scope, ScopeId, ScopeKind};
//! use tern_layout::{Scalar, TypeExpr, TypeRegistry};
//! use tern_runtime::{GcConfig, Runtime, Value};
//!
//! let registry = Arc::new(TypeRegistry::new());
//! let program = Scope::new(0, ScopeKind::Function)
//!     .declare("n", TypeExpr::scalar(Scalar::Int))
//!     .assign("n");
//! let analysis = CaptureAnalyzer::new(&registry).analyze(&program).unwrap();
//!
//! let mut rt = Runtime::new(registry, Arc::new(analysis), GcConfig::default()).unwrap();
//! rt.push_frame(ScopeId(0)).unwrap();
//! rt.write_var(ScopeId(0), "n", Value::Int(42)).unwrap();
//! assert_eq!(rt.read_var(ScopeId(0), "n").unwrap(), Value::Int(42));
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod defaults;
pub mod error;
pub mod ffi;
pub mod gc;
pub mod value;
pub mod vm;

pub use config::{ConfigError, GcConfig};
pub use error::{HeapError, RuntimeError};
pub use ffi::{verify_c_layout, AbiError, CLayout, ForeignArg, ForeignArgs, MarshalError};
pub use gc::{CollectionSummary, GarbageCollector, GcRef, GcStats, HeapStats, RootSet, RootSource};
pub use value::Value;
pub use vm::{ClosureInstance, Frame, Runtime};
