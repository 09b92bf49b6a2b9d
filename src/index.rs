//! Process-wide class-description cache
//!
//! Keyed by class name with delegate-to-parent lookup, so a deployment-level
//! index can fall back to a shared process index. First-population races are
//! resolved with an insert-if-absent policy: a losing writer discards its
//! freshly built description and reuses whatever the winner installed.

use crate::injection::ResourceInjection;
use ahash::RandomState;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use once_cell::sync::Lazy;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::trace;

/// Injection-relevant description of one class in a component hierarchy
#[derive(Debug, Clone)]
pub struct ClassDescription {
    name: String,
    superclass: Option<String>,
    injections: Vec<ResourceInjection>,
}

impl ClassDescription {
    /// Describe the named class.
    #[inline]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            superclass: None,
            injections: Vec::new(),
        }
    }

    /// Name the superclass this class inherits injections from.
    #[inline]
    pub fn with_superclass(mut self, superclass: impl Into<String>) -> Self {
        self.superclass = Some(superclass.into());
        self
    }

    /// Add an injection declared directly on this class.
    #[inline]
    pub fn with_injection(mut self, injection: ResourceInjection) -> Self {
        self.injections.push(injection);
        self
    }

    /// The class name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The superclass name, if any.
    #[inline]
    pub fn superclass(&self) -> Option<&str> {
        self.superclass.as_deref()
    }

    /// Injections declared directly on this class.
    #[inline]
    pub fn injections(&self) -> &[ResourceInjection] {
        &self.injections
    }
}

/// Concurrent class-description index with parent delegation.
///
/// Uses `DashMap` with `ahash` for contended first-population; shard count is
/// kept low since indexes typically hold few dozen classes.
pub struct ClassIndex {
    classes: DashMap<String, Arc<ClassDescription>, RandomState>,
    parent: Option<Arc<ClassIndex>>,
}

impl ClassIndex {
    /// The process-wide root index.
    ///
    /// Deployment-level indexes typically delegate to this via
    /// [`ClassIndex::with_parent`].
    pub fn global() -> &'static Arc<ClassIndex> {
        static GLOBAL: Lazy<Arc<ClassIndex>> = Lazy::new(|| Arc::new(ClassIndex::new()));
        &GLOBAL
    }

    /// Create an empty root index.
    #[inline]
    pub fn new() -> Self {
        Self {
            classes: DashMap::with_capacity_and_hasher_and_shard_amount(0, RandomState::new(), 8),
            parent: None,
        }
    }

    /// Create an index that delegates misses to `parent`.
    #[inline]
    pub fn with_parent(parent: Arc<ClassIndex>) -> Self {
        Self {
            classes: DashMap::with_capacity_and_hasher_and_shard_amount(0, RandomState::new(), 8),
            parent: Some(parent),
        }
    }

    /// Create a child index from this one.
    #[inline]
    pub fn child(self: &Arc<Self>) -> Self {
        Self::with_parent(Arc::clone(self))
    }

    /// Install a description unless one is already present under its name.
    ///
    /// Returns the installed description: the caller's own on a win, the
    /// incumbent on a loss (the freshly built value is discarded).
    pub fn define(&self, description: ClassDescription) -> Arc<ClassDescription> {
        match self.classes.entry(description.name().to_string()) {
            Entry::Occupied(entry) => {
                #[cfg(feature = "logging")]
                trace!(
                    target: "component_core",
                    class = description.name(),
                    "Class already defined, discarding freshly built description"
                );
                Arc::clone(entry.get())
            }
            Entry::Vacant(entry) => {
                let installed = Arc::new(description);
                entry.insert(Arc::clone(&installed));
                installed
            }
        }
    }

    /// Install the description built by `build` unless `name` is present.
    ///
    /// `build` only runs when the local index has no entry for `name`.
    pub fn define_with<F>(&self, name: &str, build: F) -> Arc<ClassDescription>
    where
        F: FnOnce() -> ClassDescription,
    {
        if let Some(existing) = self.classes.get(name) {
            return Arc::clone(existing.value());
        }
        self.define(build())
    }

    /// Look up a description locally, then along the parent chain.
    pub fn resolve(&self, name: &str) -> Option<Arc<ClassDescription>> {
        if let Some(found) = self.classes.get(name) {
            return Some(Arc::clone(found.value()));
        }

        let mut current = self.parent.as_ref();
        while let Some(index) = current {
            if let Some(found) = index.classes.get(name) {
                return Some(Arc::clone(found.value()));
            }
            current = index.parent.as_ref();
        }

        None
    }

    /// Whether `name` is defined locally or in any parent.
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    /// Number of classes defined locally (not counting parents).
    #[inline]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Whether the local index is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// The merged injection list for `name`: superclass entries first, then
    /// each subclass down the chain, in declaration order within a class.
    ///
    /// This is the order the injection engine expects configurations in.
    pub fn merged_injections(&self, name: &str) -> Vec<ResourceInjection> {
        let mut merged = Vec::new();
        let mut lineage = Vec::new();
        let mut visited: Vec<String> = Vec::new();

        // Collect the lineage leaf-to-root, then emit root-first
        let mut current = self.resolve(name);
        while let Some(description) = current {
            if visited.iter().any(|seen| seen == description.name()) {
                break; // malformed cyclic hierarchy, stop rather than loop
            }
            visited.push(description.name().to_string());
            current = description
                .superclass()
                .and_then(|superclass| self.resolve(superclass));
            lineage.push(description);
        }

        for description in lineage.iter().rev() {
            merged.extend_from_slice(description.injections());
        }
        merged
    }
}

impl Default for ClassIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ClassIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassIndex")
            .field("count", &self.len())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::injection::{BoundTarget, InjectionSource, InjectionTarget};

    fn injection(class: &str, member: &str) -> ResourceInjection {
        let bound = BoundTarget::new(InjectionTarget::field(class, member, "i32"), |_, _| Ok(()));
        ResourceInjection::new(bound, InjectionSource::fixed(0i32))
    }

    #[test]
    fn test_define_and_resolve() {
        let index = ClassIndex::new();
        index.define(ClassDescription::new("Widget"));

        assert!(index.contains("Widget"));
        assert!(!index.contains("Gadget"));
        assert_eq!(index.resolve("Widget").unwrap().name(), "Widget");
    }

    #[test]
    fn test_losing_writer_reuses_winner() {
        let index = ClassIndex::new();
        let winner = index.define(ClassDescription::new("Widget").with_injection(injection("Widget", "a")));
        let loser = index.define(ClassDescription::new("Widget"));

        assert!(Arc::ptr_eq(&winner, &loser));
        assert_eq!(loser.injections().len(), 1);
    }

    #[test]
    fn test_define_with_skips_build_when_present() {
        let index = ClassIndex::new();
        index.define(ClassDescription::new("Widget"));

        let resolved = index.define_with("Widget", || panic!("must not build"));
        assert_eq!(resolved.name(), "Widget");
    }

    #[test]
    fn test_parent_delegation() {
        let root = Arc::new(ClassIndex::new());
        root.define(ClassDescription::new("Base"));

        let child = root.child();
        child.define(ClassDescription::new("Derived"));

        assert!(child.contains("Base"));
        assert!(child.contains("Derived"));
        assert!(!root.contains("Derived"));
    }

    #[test]
    fn test_merged_injections_superclass_first() {
        let root = Arc::new(ClassIndex::new());
        root.define(ClassDescription::new("Base").with_injection(injection("Base", "base_field")));

        let child = root.child();
        child.define(
            ClassDescription::new("Derived")
                .with_superclass("Base")
                .with_injection(injection("Derived", "first"))
                .with_injection(injection("Derived", "second")),
        );

        let merged = child.merged_injections("Derived");
        let members: Vec<_> = merged
            .iter()
            .map(|i| i.target().member_name().to_string())
            .collect();
        assert_eq!(members, vec!["base_field", "first", "second"]);
    }

    #[test]
    fn test_global_index_is_shared() {
        let a = ClassIndex::global();
        let b = ClassIndex::global();
        assert!(Arc::ptr_eq(a, b));

        // Deployment indexes can delegate to the shared root
        let deployment = ClassIndex::with_parent(Arc::clone(a));
        assert!(deployment.is_empty());
    }

    #[test]
    fn test_concurrent_define_installs_one_description() {
        let index = Arc::new(ClassIndex::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let index = Arc::clone(&index);
                std::thread::spawn(move || {
                    let installed = index.define(ClassDescription::new("Widget"));
                    Arc::as_ptr(&installed) as usize
                })
            })
            .collect();

        let pointers: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(pointers.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(index.len(), 1);
    }
}
