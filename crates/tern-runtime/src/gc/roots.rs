//! Collector root tracking
//!
//! Roots are the starting points of marking:
//! - Frame storage, supplied by a [`RootSource`] at collection time
//! - Named persistent globals
//! - Host-held references

use super::ptr::GcRef;
use rustc_hash::FxHashMap;

/// Anything that can enumerate root words
///
/// Words are candidate addresses: the collector follows a word only if it is
/// exactly the payload address of a live object, so implementations may
/// report null or stale words.
pub trait RootSource {
    /// Call `visit` with every root word
    fn for_each_root(&self, visit: &mut dyn FnMut(usize));
}

impl RootSource for () {
    fn for_each_root(&self, _visit: &mut dyn FnMut(usize)) {}
}

impl RootSource for GcRef {
    fn for_each_root(&self, visit: &mut dyn FnMut(usize)) {
        visit(self.addr());
    }
}

impl RootSource for Vec<GcRef> {
    fn for_each_root(&self, visit: &mut dyn FnMut(usize)) {
        for r in self {
            visit(r.addr());
        }
    }
}

/// Roots owned by the collector
#[derive(Debug, Default)]
pub struct RootSet {
    /// Named persistent globals
    globals: FxHashMap<String, GcRef>,

    /// Host-held references with their hold counts
    host_roots: FxHashMap<GcRef, usize>,
}

impl RootSet {
    /// Create an empty root set
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold a reference; may be called more than once for the same object
    pub fn add_root(&mut self, r: GcRef) {
        *self.host_roots.entry(r).or_insert(0) += 1;
    }

    /// Release one hold on a reference; returns false if it was not held
    pub fn remove_root(&mut self, r: GcRef) -> bool {
        match self.host_roots.get_mut(&r) {
            Some(count) if *count > 1 => {
                *count -= 1;
                true
            }
            Some(_) => {
                self.host_roots.remove(&r);
                true
            }
            None => false,
        }
    }

    /// Release every host hold
    pub fn clear_host_roots(&mut self) {
        self.host_roots.clear();
    }

    /// Bind a named global (`None` unbinds it)
    pub fn set_global(&mut self, name: impl Into<String>, value: Option<GcRef>) {
        let name = name.into();
        match value {
            Some(r) => {
                self.globals.insert(name, r);
            }
            None => {
                self.globals.remove(&name);
            }
        }
    }

    /// Look up a named global
    pub fn global(&self, name: &str) -> Option<GcRef> {
        self.globals.get(name).copied()
    }

    /// Iterate over all roots
    pub fn iter(&self) -> impl Iterator<Item = GcRef> + '_ {
        self.globals
            .values()
            .copied()
            .chain(self.host_roots.keys().copied())
    }

    /// Get total number of roots
    pub fn len(&self) -> usize {
        self.globals.len() + self.host_roots.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RootSource for RootSet {
    fn for_each_root(&self, visit: &mut dyn FnMut(usize)) {
        for r in self.iter() {
            visit(r.addr());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(addr: usize) -> GcRef {
        GcRef::from_addr(addr).unwrap()
    }

    #[test]
    fn test_root_set_creation() {
        let roots = RootSet::new();
        assert_eq!(roots.len(), 0);
        assert!(roots.is_empty());
    }

    #[test]
    fn test_host_roots_are_counted() {
        let mut roots = RootSet::new();
        roots.add_root(r(0x100));
        roots.add_root(r(0x100));
        assert_eq!(roots.len(), 1);

        assert!(roots.remove_root(r(0x100)));
        assert_eq!(roots.len(), 1);
        assert!(roots.remove_root(r(0x100)));
        assert!(roots.is_empty());
        assert!(!roots.remove_root(r(0x100)));
    }

    #[test]
    fn test_globals() {
        let mut roots = RootSet::new();
        roots.set_global("config", Some(r(0x200)));
        assert_eq!(roots.global("config"), Some(r(0x200)));
        roots.set_global("config", None);
        assert_eq!(roots.global("config"), None);
    }

    #[test]
    fn test_root_source() {
        let mut roots = RootSet::new();
        roots.add_root(r(0x10));
        roots.set_global("g", Some(r(0x20)));
        let mut words = Vec::new();
        roots.for_each_root(&mut |w| words.push(w));
        words.sort_unstable();
        assert_eq!(words, vec![0x10, 0x20]);
    }
}
