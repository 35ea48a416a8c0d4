//! Capture analysis errors

use crate::analysis::Storage;
use crate::scope::ScopeId;
use tern_layout::LayoutError;
use thiserror::Error;

/// Errors that can occur during capture analysis
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CaptureError {
    /// Access to a name with no visible declaration
    #[error("Unresolved variable `{name}` in {scope}")]
    UnresolvedVariable {
        /// Variable name
        name: String,
        /// Scope containing the access
        scope: ScopeId,
    },

    /// Name declared twice in one scope
    #[error("Variable `{name}` is declared twice in {scope}")]
    DuplicateDeclaration {
        /// Variable name
        name: String,
        /// Declaring scope
        scope: ScopeId,
    },

    /// Two scopes share an id
    #[error("Scope id {scope} appears more than once")]
    DuplicateScope {
        /// Repeated id
        scope: ScopeId,
    },

    /// Variable type could not be laid out
    #[error(transparent)]
    Layout(#[from] LayoutError),

    /// A consumer addressed a variable through the wrong storage class
    #[error("Variable `{name}` lives in {expected:?} storage but was accessed as {found:?}")]
    StorageMismatch {
        /// Variable name
        name: String,
        /// Storage decided by the analysis
        expected: Storage,
        /// Storage the consumer used
        found: Storage,
    },
}
