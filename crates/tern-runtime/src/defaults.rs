//! Default constants for heap and collector configuration.

/// Default memory pool capacity in bytes (16 MB).
pub const DEFAULT_POOL_BYTES: usize = 16 * 1024 * 1024;

/// Default live-object count above which an allocation triggers a collection.
pub const DEFAULT_MAX_OBJECTS: usize = 100_000;

/// Default live payload bytes above which an allocation triggers a collection (1 MB).
pub const DEFAULT_MAX_BYTES: usize = 1024 * 1024;

/// Alignment of the memory pool and of every block carved from it.
pub const POOL_ALIGN: usize = 16;
