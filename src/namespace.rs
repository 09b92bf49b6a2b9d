//! Ambient namespace scoping around invocations
//!
//! Entering an invocation pushes the component's naming selector (and, where
//! applicable, an owner marker for a secondary scoped resource); both are
//! popped in strict reverse order on every exit path. Popping is enforced by
//! RAII guards, so an unwinding interceptor cannot leak a selector into the
//! next call on the thread. The active selector is also recorded on the
//! invocation context for collaborators that prefer explicit state.

use crate::error::Result;
use crate::injection::AnyValue;
use crate::interceptor::{
    ConstructionContext, Interceptor, InterceptorFactory, InvocationContext,
};
use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "logging")]
use tracing::trace;

/// Selects the ambient naming scope a component's lookups resolve against
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct NamespaceSelector {
    name: Arc<str>,
}

impl NamespaceSelector {
    /// Create a selector for the named scope.
    #[inline]
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
        }
    }

    /// The scope name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for NamespaceSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

impl std::fmt::Debug for NamespaceSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NamespaceSelector({})", self.name)
    }
}

/// Marker identifying the owner of a secondary scoped resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerMarker(u64);

impl OwnerMarker {
    /// Allocate a new unique marker.
    #[inline]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for OwnerMarker {
    fn default() -> Self {
        Self::new()
    }
}

thread_local! {
    static SELECTORS: RefCell<Vec<NamespaceSelector>> = const { RefCell::new(Vec::new()) };
    static OWNERS: RefCell<Vec<OwnerMarker>> = const { RefCell::new(Vec::new()) };
}

/// The selector at the top of the current thread's scope stack.
pub fn current_selector() -> Option<NamespaceSelector> {
    SELECTORS.with(|stack| stack.borrow().last().cloned())
}

/// The owner marker at the top of the current thread's owner stack.
pub fn current_owner() -> Option<OwnerMarker> {
    OWNERS.with(|stack| stack.borrow().last().cloned())
}

/// RAII guard pairing a selector push with its pop.
///
/// The pop runs on drop, on every exit path including unwinding.
pub struct NamespaceGuard {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl NamespaceGuard {
    /// Push `selector` onto this thread's scope stack.
    pub fn enter(selector: NamespaceSelector) -> Self {
        SELECTORS.with(|stack| stack.borrow_mut().push(selector));
        Self {
            _not_send: std::marker::PhantomData,
        }
    }
}

impl Drop for NamespaceGuard {
    fn drop(&mut self) {
        SELECTORS.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// RAII guard pairing an owner-marker push with its pop
pub struct OwnerGuard {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl OwnerGuard {
    /// Push `marker` onto this thread's owner stack.
    pub fn enter(marker: OwnerMarker) -> Self {
        OWNERS.with(|stack| stack.borrow_mut().push(marker));
        Self {
            _not_send: std::marker::PhantomData,
        }
    }
}

impl Drop for OwnerGuard {
    fn drop(&mut self) {
        OWNERS.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Pushes the component's ambient scope around the rest of the chain.
///
/// The owner marker, when present, is pushed after the selector and popped
/// before it (strict reverse order, via guard drop order).
pub struct NamespaceInterceptor {
    selector: NamespaceSelector,
    owner: Option<OwnerMarker>,
}

impl NamespaceInterceptor {
    /// Scope the chain under `selector`.
    pub fn new(selector: NamespaceSelector) -> Self {
        Self {
            selector,
            owner: None,
        }
    }

    /// Also push an owner marker for a secondary scoped resource.
    pub fn with_owner(mut self, owner: OwnerMarker) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Factory producing this interceptor.
    pub fn factory(selector: NamespaceSelector) -> Arc<dyn InterceptorFactory> {
        Arc::new(move |_: &mut ConstructionContext| {
            Ok(Arc::new(NamespaceInterceptor::new(selector.clone())) as Arc<dyn Interceptor>)
        })
    }
}

impl Interceptor for NamespaceInterceptor {
    fn invoke(&self, ctx: &mut InvocationContext) -> Result<AnyValue> {
        let _scope = NamespaceGuard::enter(self.selector.clone());
        let _owner = self.owner.map(OwnerGuard::enter);

        #[cfg(feature = "logging")]
        trace!(
            target: "component_core",
            component = ctx.component(),
            selector = self.selector.name(),
            "Entered ambient namespace scope"
        );

        let prior = ctx.set_selector(Some(self.selector.clone()));
        let result = ctx.proceed();
        ctx.set_selector(prior);

        result
        // _owner pops before _scope as the guards unwind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::interceptor::{InterceptorChain, MethodId, TerminalInterceptor};

    #[test]
    fn test_guard_pushes_and_pops() {
        assert!(current_selector().is_none());
        {
            let _guard = NamespaceGuard::enter(NamespaceSelector::new("app"));
            assert_eq!(current_selector().unwrap().name(), "app");
            {
                let _inner = NamespaceGuard::enter(NamespaceSelector::new("module"));
                assert_eq!(current_selector().unwrap().name(), "module");
            }
            assert_eq!(current_selector().unwrap().name(), "app");
        }
        assert!(current_selector().is_none());
    }

    #[test]
    fn test_guard_pops_on_unwind() {
        let result = std::panic::catch_unwind(|| {
            let _guard = NamespaceGuard::enter(NamespaceSelector::new("doomed"));
            panic!("interceptor exploded");
        });
        assert!(result.is_err());
        assert!(current_selector().is_none());
    }

    #[test]
    fn test_interceptor_scopes_the_chain() {
        let observed: Arc<dyn Interceptor> = Arc::new(|ctx: &mut InvocationContext| {
            assert_eq!(current_selector().unwrap().name(), "comp-ns");
            assert_eq!(ctx.selector().unwrap().name(), "comp-ns");
            Ok(Box::new(()) as AnyValue)
        });
        let chain = Arc::new(InterceptorChain::new(vec![
            Arc::new(NamespaceInterceptor::new(NamespaceSelector::new("comp-ns"))),
            observed,
        ]));

        let mut ctx = InvocationContext::new("demo", MethodId::new("run"), Vec::new());
        ctx.run(&chain).unwrap();

        assert!(current_selector().is_none());
        assert!(ctx.selector().is_none());
    }

    #[test]
    fn test_scope_restored_when_chain_fails() {
        let failing: Arc<dyn Interceptor> = Arc::new(|_: &mut InvocationContext| {
            Err(CoreError::Internal("business failure".into()))
        });
        let chain = Arc::new(InterceptorChain::new(vec![
            Arc::new(NamespaceInterceptor::new(NamespaceSelector::new("comp-ns"))),
            failing,
        ]));

        let mut ctx = InvocationContext::new("demo", MethodId::new("run"), Vec::new());
        assert!(ctx.run(&chain).is_err());

        assert!(current_selector().is_none());
        assert!(ctx.selector().is_none());
    }

    #[test]
    fn test_owner_marker_paired_with_selector() {
        let marker = OwnerMarker::new();
        let observed: Arc<dyn Interceptor> = {
            let marker = marker;
            Arc::new(move |_: &mut InvocationContext| {
                assert_eq!(current_owner(), Some(marker));
                assert!(current_selector().is_some());
                Ok(Box::new(()) as AnyValue)
            })
        };
        let chain = Arc::new(InterceptorChain::new(vec![
            Arc::new(
                NamespaceInterceptor::new(NamespaceSelector::new("comp-ns")).with_owner(marker),
            ),
            observed,
        ]));

        let mut ctx = InvocationContext::new("demo", MethodId::new("run"), Vec::new());
        ctx.run(&chain).unwrap();

        assert!(current_owner().is_none());
        assert!(current_selector().is_none());
    }

    #[test]
    fn test_nested_invocations_restore_outer_selector() {
        let inner_chain = Arc::new(InterceptorChain::new(vec![
            Arc::new(NamespaceInterceptor::new(NamespaceSelector::new("inner"))) as Arc<dyn Interceptor>,
            Arc::new(TerminalInterceptor),
        ]));

        let outer: Arc<dyn Interceptor> = {
            let inner_chain = Arc::clone(&inner_chain);
            Arc::new(move |ctx: &mut InvocationContext| {
                assert_eq!(current_selector().unwrap().name(), "outer");
                ctx.run(&inner_chain)?;
                // Inner scope fully unwound
                assert_eq!(current_selector().unwrap().name(), "outer");
                Ok(Box::new(()) as AnyValue)
            })
        };
        let chain = Arc::new(InterceptorChain::new(vec![
            Arc::new(NamespaceInterceptor::new(NamespaceSelector::new("outer"))),
            outer,
        ]));

        let mut ctx = InvocationContext::new("demo", MethodId::new("run"), Vec::new());
        ctx.run(&chain).unwrap();
        assert!(current_selector().is_none());
    }
}
