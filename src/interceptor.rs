//! Interceptor chains, factories, and the per-call invocation context
//!
//! An interceptor wraps a call: it can run logic before and after handing
//! control to the rest of the chain via [`InvocationContext::proceed`], or
//! short-circuit by returning without proceeding. Chains are assembled from
//! factories in a construction context, which memoizes side-effecting
//! factories so they run at most once per component build.

use crate::error::{CoreError, Result};
use crate::injection::{AnyValue, InstanceHandle};
use crate::instance::{AttachmentKey, ComponentInstance};
use crate::namespace::NamespaceSelector;
use ahash::RandomState;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "logging")]
use tracing::trace;

/// Well-known ordinal positions for chain assembly.
///
/// Lower ordinals run first (outermost). Callers may use any `u32`; these
/// constants keep the ambient-scope interceptors outermost, the
/// reference-lifecycle interceptors innermost, and the terminal dispatcher
/// last, with room between for user additions.
pub mod ordering {
    /// Ambient namespace scoping, outermost
    pub const NAMESPACE: u32 = 0x100;
    /// Component-instance association (view-level chains)
    pub const ASSOCIATION: u32 = 0x200;
    /// Managed-reference creation / access
    pub const REFERENCE: u32 = 0x300;
    /// Resource injection into the backing instance
    pub const INJECTION: u32 = 0x400;
    /// Lifecycle callbacks (post-construct, pre-destroy)
    pub const LIFECYCLE: u32 = 0x500;
    /// User-supplied business interceptors
    pub const USER: u32 = 0x600;
    /// Dispatch hand-off or the actual method call
    pub const DISPATCH: u32 = 0x700;
    /// Terminal sentinel
    pub const TERMINAL: u32 = 0x800;
}

// =============================================================================
// Method Identity
// =============================================================================

/// Identity of a component method as seen by the interception core.
///
/// The core never inspects signatures; a method is a name plus whatever
/// invoker handle the collaborator supplied for it.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct MethodId(Arc<str>);

impl MethodId {
    /// Create a method identity from a name.
    #[inline]
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// The method name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MethodId {
    #[inline]
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl std::fmt::Display for MethodId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Debug for MethodId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MethodId({})", self.0)
    }
}

// =============================================================================
// Interceptor & Chain
// =============================================================================

/// A composable unit of pre/post logic around a call.
///
/// Implementations continue the chain with [`InvocationContext::proceed`] or
/// short-circuit by returning without proceeding.
pub trait Interceptor: Send + Sync {
    /// Process the invocation.
    fn invoke(&self, ctx: &mut InvocationContext) -> Result<AnyValue>;
}

impl<F> Interceptor for F
where
    F: Fn(&mut InvocationContext) -> Result<AnyValue> + Send + Sync,
{
    #[inline]
    fn invoke(&self, ctx: &mut InvocationContext) -> Result<AnyValue> {
        self(ctx)
    }
}

/// An ordered, immutable sequence of interceptors
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
    /// Build a chain from an ordered interceptor list.
    #[inline]
    pub fn new(interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        Self { interceptors }
    }

    /// Number of interceptors in the chain.
    #[inline]
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    /// Whether the chain is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    #[inline]
    fn get(&self, position: usize) -> Option<&Arc<dyn Interceptor>> {
        self.interceptors.get(position)
    }
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("len", &self.len())
            .finish()
    }
}

// =============================================================================
// Invocation Context
// =============================================================================

/// The per-call mutable record carrying method, arguments, target, and data.
///
/// Created fresh for every invocation; never shared between calls.
pub struct InvocationContext {
    component: String,
    view: Option<String>,
    caller: Option<String>,
    method: MethodId,
    args: Vec<AnyValue>,
    target: Option<InstanceHandle>,
    instance: Option<Arc<ComponentInstance>>,
    selector: Option<NamespaceSelector>,
    context_data: HashMap<String, AnyValue, RandomState>,
    private_data: HashMap<AttachmentKey, AnyValue, RandomState>,
    chain: Option<Arc<InterceptorChain>>,
    position: usize,
}

impl InvocationContext {
    /// Create a fresh context for one call on `component`.
    pub fn new(component: impl Into<String>, method: MethodId, args: Vec<AnyValue>) -> Self {
        Self {
            component: component.into(),
            view: None,
            caller: None,
            method,
            args,
            target: None,
            instance: None,
            selector: None,
            context_data: HashMap::default(),
            private_data: HashMap::default(),
            chain: None,
            position: 0,
        }
    }

    /// Record the owning view handle.
    #[inline]
    pub fn with_view(mut self, view: impl Into<String>) -> Self {
        self.view = Some(view.into());
        self
    }

    /// Record the originating caller handle.
    #[inline]
    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }

    /// The owning component's name.
    #[inline]
    pub fn component(&self) -> &str {
        &self.component
    }

    /// The owning view, when the call came through one.
    #[inline]
    pub fn view(&self) -> Option<&str> {
        self.view.as_deref()
    }

    /// The originating caller, when known.
    #[inline]
    pub fn caller(&self) -> Option<&str> {
        self.caller.as_deref()
    }

    /// The method this call currently appears to invoke.
    #[inline]
    pub fn method(&self) -> &MethodId {
        &self.method
    }

    /// Swap the method identity, returning the prior one.
    ///
    /// Callers are responsible for restoring the prior identity on every
    /// exit path; see [`MethodBindingInterceptor`].
    #[inline]
    pub fn bind_method(&mut self, method: MethodId) -> MethodId {
        std::mem::replace(&mut self.method, method)
    }

    /// Call arguments.
    #[inline]
    pub fn args(&self) -> &[AnyValue] {
        &self.args
    }

    /// Mutable call arguments.
    #[inline]
    pub fn args_mut(&mut self) -> &mut Vec<AnyValue> {
        &mut self.args
    }

    /// The backing object this call targets, once associated.
    #[inline]
    pub fn target(&self) -> Option<&InstanceHandle> {
        self.target.as_ref()
    }

    /// Swap the call target, returning the prior one.
    #[inline]
    pub fn set_target(&mut self, target: Option<InstanceHandle>) -> Option<InstanceHandle> {
        std::mem::replace(&mut self.target, target)
    }

    /// The component instance this call is associated with.
    #[inline]
    pub fn instance(&self) -> Option<&Arc<ComponentInstance>> {
        self.instance.as_ref()
    }

    /// Swap the associated component instance, returning the prior one.
    #[inline]
    pub fn set_instance(
        &mut self,
        instance: Option<Arc<ComponentInstance>>,
    ) -> Option<Arc<ComponentInstance>> {
        std::mem::replace(&mut self.instance, instance)
    }

    /// The ambient namespace selector active for this call.
    #[inline]
    pub fn selector(&self) -> Option<&NamespaceSelector> {
        self.selector.as_ref()
    }

    /// Swap the recorded namespace selector, returning the prior one.
    #[inline]
    pub fn set_selector(
        &mut self,
        selector: Option<NamespaceSelector>,
    ) -> Option<NamespaceSelector> {
        std::mem::replace(&mut self.selector, selector)
    }

    /// Public context data shared with application-level interceptors.
    #[inline]
    pub fn context_data(&self) -> &HashMap<String, AnyValue, RandomState> {
        &self.context_data
    }

    /// Mutable public context data.
    #[inline]
    pub fn context_data_mut(&mut self) -> &mut HashMap<String, AnyValue, RandomState> {
        &mut self.context_data
    }

    /// Store a private, interceptor-owned value under `key`.
    #[inline]
    pub fn set_private<T: Send + 'static>(&mut self, key: AttachmentKey, value: T) {
        self.private_data.insert(key, Box::new(value));
    }

    /// Read a private value stored under `key`.
    #[inline]
    pub fn private<T: Send + 'static>(&self, key: AttachmentKey) -> Option<&T> {
        self.private_data.get(&key).and_then(|v| v.downcast_ref())
    }

    /// Remove and return a private value stored under `key`.
    #[inline]
    pub fn take_private<T: Send + 'static>(&mut self, key: AttachmentKey) -> Option<T> {
        let value = self.private_data.remove(&key)?;
        match value.downcast::<T>() {
            Ok(v) => Some(*v),
            Err(v) => {
                // Wrong type requested; put it back untouched
                self.private_data.insert(key, v);
                None
            }
        }
    }

    /// Continue with the next interceptor in the active chain.
    pub fn proceed(&mut self) -> Result<AnyValue> {
        let chain = self
            .chain
            .clone()
            .ok_or_else(|| CoreError::cannot_proceed("no interceptor chain is active"))?;

        let next = chain
            .get(self.position)
            .cloned()
            .ok_or_else(|| CoreError::cannot_proceed("ran past the end of the interceptor chain"))?;

        self.position += 1;
        let result = next.invoke(self);
        self.position -= 1;
        result
    }

    /// Run `chain` over this context from its start.
    ///
    /// The previously active chain and position are restored afterwards on
    /// every exit path, so a chain can hand off to a nested chain (the
    /// two-level dispatch) without losing its own place.
    pub fn run(&mut self, chain: &Arc<InterceptorChain>) -> Result<AnyValue> {
        let prior_chain = std::mem::replace(&mut self.chain, Some(Arc::clone(chain)));
        let prior_position = std::mem::replace(&mut self.position, 0);

        let result = self.proceed();

        self.chain = prior_chain;
        self.position = prior_position;
        result
    }
}

impl std::fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationContext")
            .field("component", &self.component)
            .field("view", &self.view)
            .field("method", &self.method)
            .field("args", &self.args.len())
            .field("position", &self.position)
            .finish()
    }
}

// =============================================================================
// Interceptor Factories
// =============================================================================

/// Process-unique identity for an interceptor factory.
///
/// Used as the memoization key inside a construction context; identity is
/// stamped on the factory value, never derived from pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FactoryId(u64);

impl FactoryId {
    /// Allocate a new unique factory id.
    #[inline]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for FactoryId {
    fn default() -> Self {
        Self::new()
    }
}

/// Produces interceptors for one component build.
///
/// Factories may be side-effecting (e.g. creating a managed-reference slot);
/// wrap such factories with [`MemoizedFactory`] so a construction context
/// yields the same interceptor instance on every request.
pub trait InterceptorFactory: Send + Sync {
    /// Create (or return the memoized) interceptor for this context.
    fn create(&self, ctx: &mut ConstructionContext) -> Result<Arc<dyn Interceptor>>;
}

impl<F> InterceptorFactory for F
where
    F: Fn(&mut ConstructionContext) -> Result<Arc<dyn Interceptor>> + Send + Sync,
{
    #[inline]
    fn create(&self, ctx: &mut ConstructionContext) -> Result<Arc<dyn Interceptor>> {
        self(ctx)
    }
}

/// Per-build context for interceptor construction.
///
/// Owns the explicit memoization cache (factory id → interceptor) and
/// collects the reference slots created during the build so the finished
/// component instance can release them on destroy.
pub struct ConstructionContext {
    component: String,
    memoized: HashMap<FactoryId, Arc<dyn Interceptor>, RandomState>,
    slots: Vec<Arc<crate::reference::ReferenceSlot>>,
}

impl ConstructionContext {
    /// Create a construction context for the named component.
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            memoized: HashMap::default(),
            slots: Vec::new(),
        }
    }

    /// The component being built.
    #[inline]
    pub fn component(&self) -> &str {
        &self.component
    }

    /// Look up a memoized interceptor.
    #[inline]
    pub fn memoized(&self, id: FactoryId) -> Option<Arc<dyn Interceptor>> {
        self.memoized.get(&id).cloned()
    }

    /// Memoize an interceptor under a factory id.
    #[inline]
    pub fn memoize(&mut self, id: FactoryId, interceptor: Arc<dyn Interceptor>) {
        self.memoized.insert(id, interceptor);
    }

    /// Record a reference slot created during this build.
    #[inline]
    pub fn register_slot(&mut self, slot: Arc<crate::reference::ReferenceSlot>) {
        self.slots.push(slot);
    }

    /// Take ownership of the slots registered during this build.
    #[inline]
    pub fn take_slots(&mut self) -> Vec<Arc<crate::reference::ReferenceSlot>> {
        std::mem::take(&mut self.slots)
    }
}

impl std::fmt::Debug for ConstructionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstructionContext")
            .field("component", &self.component)
            .field("memoized", &self.memoized.len())
            .field("slots", &self.slots.len())
            .finish()
    }
}

/// Construct-at-most-once wrapper around a factory.
///
/// Within one construction context, repeated requests yield the interceptor
/// built on the first request; distinct contexts build independently.
pub struct MemoizedFactory {
    id: FactoryId,
    inner: Arc<dyn InterceptorFactory>,
}

impl MemoizedFactory {
    /// Wrap `inner` with a fresh memoization identity.
    pub fn new(inner: Arc<dyn InterceptorFactory>) -> Self {
        Self {
            id: FactoryId::new(),
            inner,
        }
    }

    /// The memoization identity of this wrapper.
    #[inline]
    pub fn id(&self) -> FactoryId {
        self.id
    }
}

impl InterceptorFactory for MemoizedFactory {
    fn create(&self, ctx: &mut ConstructionContext) -> Result<Arc<dyn Interceptor>> {
        if let Some(existing) = ctx.memoized(self.id) {
            #[cfg(feature = "logging")]
            trace!(
                target: "component_core",
                component = ctx.component(),
                factory_id = self.id.0,
                "Reusing memoized interceptor"
            );
            return Ok(existing);
        }

        let built = self.inner.create(ctx)?;
        ctx.memoize(self.id, Arc::clone(&built));
        Ok(built)
    }
}

/// Wrap a factory so it constructs at most once per construction context.
#[inline]
pub fn memoized(inner: Arc<dyn InterceptorFactory>) -> Arc<dyn InterceptorFactory> {
    Arc::new(MemoizedFactory::new(inner))
}

// =============================================================================
// Method-Aware Wrapping
// =============================================================================

/// Binds a fixed method identity around a nested interceptor.
///
/// From the nested interceptor's perspective the call appears to invoke the
/// bound method; the prior identity is restored on success and failure alike.
/// Used for lifecycle-callback interceptors reached through a generic chain.
pub struct MethodBindingInterceptor {
    method: MethodId,
    inner: Arc<dyn Interceptor>,
}

impl MethodBindingInterceptor {
    /// Bind `method` around `inner`.
    pub fn new(method: MethodId, inner: Arc<dyn Interceptor>) -> Self {
        Self { method, inner }
    }

    /// Factory decorating `inner`'s product with a fixed method identity.
    pub fn factory(
        method: MethodId,
        inner: Arc<dyn InterceptorFactory>,
    ) -> Arc<dyn InterceptorFactory> {
        Arc::new(move |ctx: &mut ConstructionContext| {
            let built = inner.create(ctx)?;
            Ok(Arc::new(MethodBindingInterceptor::new(method.clone(), built))
                as Arc<dyn Interceptor>)
        })
    }
}

impl Interceptor for MethodBindingInterceptor {
    fn invoke(&self, ctx: &mut InvocationContext) -> Result<AnyValue> {
        let prior = ctx.bind_method(self.method.clone());
        let result = self.inner.invoke(ctx);
        ctx.bind_method(prior);
        result
    }
}

// =============================================================================
// Terminal Sentinel
// =============================================================================

/// No-op interceptor that cleanly ends a chain.
///
/// Used where a component description declares no further behavior, e.g. a
/// lifecycle chain with no callbacks.
pub struct TerminalInterceptor;

impl TerminalInterceptor {
    /// Factory producing the sentinel.
    pub fn factory() -> Arc<dyn InterceptorFactory> {
        Arc::new(|_: &mut ConstructionContext| {
            Ok(Arc::new(TerminalInterceptor) as Arc<dyn Interceptor>)
        })
    }
}

impl Interceptor for TerminalInterceptor {
    #[inline]
    fn invoke(&self, _ctx: &mut InvocationContext) -> Result<AnyValue> {
        Ok(Box::new(()))
    }
}

// =============================================================================
// Chain Builder
// =============================================================================

/// Assembles a chain from factories at caller-specified ordinal positions.
///
/// Lower ordinals run first; factories sharing an ordinal run in registration
/// order. See [`ordering`] for the well-known positions.
#[derive(Clone, Default)]
pub struct ChainBuilder {
    entries: BTreeMap<u32, Vec<Arc<dyn InterceptorFactory>>>,
}

impl ChainBuilder {
    /// Create an empty builder.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a factory at `position`.
    pub fn add(mut self, position: u32, factory: Arc<dyn InterceptorFactory>) -> Self {
        self.entries.entry(position).or_default().push(factory);
        self
    }

    /// Whether any factories were added.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build the chain, constructing each factory's interceptor in order.
    pub fn build(&self, ctx: &mut ConstructionContext) -> Result<InterceptorChain> {
        let mut interceptors = Vec::new();
        for factories in self.entries.values() {
            for factory in factories {
                interceptors.push(factory.create(ctx)?);
            }
        }
        Ok(InterceptorChain::new(interceptors))
    }
}

impl std::fmt::Debug for ChainBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count: usize = self.entries.values().map(Vec::len).sum();
        f.debug_struct("ChainBuilder")
            .field("factories", &count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU32;

    fn unit() -> AnyValue {
        Box::new(())
    }

    struct Tagging {
        tag: &'static str,
        seen: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Interceptor for Tagging {
        fn invoke(&self, ctx: &mut InvocationContext) -> Result<AnyValue> {
            self.seen.lock().unwrap().push(self.tag);
            ctx.proceed()
        }
    }

    fn tagging_factory(
        tag: &'static str,
        seen: Arc<Mutex<Vec<&'static str>>>,
    ) -> Arc<dyn InterceptorFactory> {
        Arc::new(move |_: &mut ConstructionContext| {
            Ok(Arc::new(Tagging {
                tag,
                seen: Arc::clone(&seen),
            }) as Arc<dyn Interceptor>)
        })
    }

    #[test]
    fn test_chain_runs_in_ordinal_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let builder = ChainBuilder::new()
            .add(ordering::DISPATCH, tagging_factory("inner", Arc::clone(&seen)))
            .add(ordering::NAMESPACE, tagging_factory("outer", Arc::clone(&seen)))
            .add(ordering::USER, tagging_factory("middle", Arc::clone(&seen)))
            .add(ordering::TERMINAL, TerminalInterceptor::factory());

        let mut cctx = ConstructionContext::new("demo");
        let chain = Arc::new(builder.build(&mut cctx).unwrap());

        let mut ctx = InvocationContext::new("demo", MethodId::new("run"), Vec::new());
        ctx.run(&chain).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["outer", "middle", "inner"]);
    }

    #[test]
    fn test_short_circuit_skips_rest_of_chain() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let short: Arc<dyn InterceptorFactory> = Arc::new(|_: &mut ConstructionContext| {
            Ok(Arc::new(|_: &mut InvocationContext| Ok(Box::new(17i32) as AnyValue))
                as Arc<dyn Interceptor>)
        });

        let builder = ChainBuilder::new()
            .add(ordering::USER, short)
            .add(ordering::TERMINAL, tagging_factory("unreached", Arc::clone(&seen)));

        let mut cctx = ConstructionContext::new("demo");
        let chain = Arc::new(builder.build(&mut cctx).unwrap());

        let mut ctx = InvocationContext::new("demo", MethodId::new("run"), Vec::new());
        let result = ctx.run(&chain).unwrap();

        assert_eq!(*result.downcast::<i32>().unwrap(), 17);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_proceed_past_end_fails() {
        let mut cctx = ConstructionContext::new("demo");
        let chain = Arc::new(
            ChainBuilder::new()
                .add(ordering::USER, Arc::new(|_: &mut ConstructionContext| {
                    Ok(Arc::new(|ctx: &mut InvocationContext| ctx.proceed())
                        as Arc<dyn Interceptor>)
                }) as Arc<dyn InterceptorFactory>)
                .build(&mut cctx)
                .unwrap(),
        );

        let mut ctx = InvocationContext::new("demo", MethodId::new("run"), Vec::new());
        let err = ctx.run(&chain).unwrap_err();
        assert!(matches!(err, CoreError::CannotProceed { .. }));
    }

    #[test]
    fn test_memoized_factory_builds_once_per_context() {
        static BUILDS: AtomicU32 = AtomicU32::new(0);

        let counting: Arc<dyn InterceptorFactory> = Arc::new(|_: &mut ConstructionContext| {
            BUILDS.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(TerminalInterceptor) as Arc<dyn Interceptor>)
        });
        let factory = memoized(counting);

        let mut first = ConstructionContext::new("demo");
        let a = factory.create(&mut first).unwrap();
        let b = factory.create(&mut first).unwrap();
        assert_eq!(BUILDS.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&a, &b));

        // A second construction context builds its own interceptor
        let mut second = ConstructionContext::new("demo");
        let c = factory.create(&mut second).unwrap();
        assert_eq!(BUILDS.load(Ordering::SeqCst), 2);
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_method_binding_restores_on_success_and_failure() {
        let observing: Arc<dyn Interceptor> = Arc::new(|ctx: &mut InvocationContext| {
            assert_eq!(ctx.method().name(), "post_construct");
            Ok(unit())
        });
        let binding = MethodBindingInterceptor::new(MethodId::new("post_construct"), observing);

        let mut ctx = InvocationContext::new("demo", MethodId::new("business"), Vec::new());
        binding.invoke(&mut ctx).unwrap();
        assert_eq!(ctx.method().name(), "business");

        let failing: Arc<dyn Interceptor> = Arc::new(|_: &mut InvocationContext| {
            Err(CoreError::Internal("callback failed".into()))
        });
        let binding = MethodBindingInterceptor::new(MethodId::new("post_construct"), failing);
        assert!(binding.invoke(&mut ctx).is_err());
        assert_eq!(ctx.method().name(), "business");
    }

    #[test]
    fn test_nested_run_restores_outer_chain() {
        let seen = Arc::new(Mutex::new(Vec::new()));

        let mut cctx = ConstructionContext::new("demo");
        let inner_chain = Arc::new(
            ChainBuilder::new()
                .add(ordering::USER, tagging_factory("inner", Arc::clone(&seen)))
                .add(ordering::TERMINAL, TerminalInterceptor::factory())
                .build(&mut cctx)
                .unwrap(),
        );

        let hand_off: Arc<dyn InterceptorFactory> = {
            let inner_chain = Arc::clone(&inner_chain);
            let seen = Arc::clone(&seen);
            Arc::new(move |_: &mut ConstructionContext| {
                let inner_chain = Arc::clone(&inner_chain);
                let seen = Arc::clone(&seen);
                Ok(Arc::new(move |ctx: &mut InvocationContext| {
                    ctx.run(&inner_chain)?;
                    // Outer chain continues after the nested chain completed
                    seen.lock().unwrap().push("after-inner");
                    ctx.proceed()
                }) as Arc<dyn Interceptor>)
            })
        };

        let outer = Arc::new(
            ChainBuilder::new()
                .add(ordering::USER, hand_off)
                .add(ordering::DISPATCH, tagging_factory("outer-end", Arc::clone(&seen)))
                .add(ordering::TERMINAL, TerminalInterceptor::factory())
                .build(&mut cctx)
                .unwrap(),
        );

        let mut ctx = InvocationContext::new("demo", MethodId::new("run"), Vec::new());
        ctx.run(&outer).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["inner", "after-inner", "outer-end"]
        );
    }

    #[test]
    fn test_private_data_round_trip() {
        let key = AttachmentKey::new();
        let mut ctx = InvocationContext::new("demo", MethodId::new("run"), Vec::new());

        ctx.set_private(key, 99u64);
        assert_eq!(ctx.private::<u64>(key), Some(&99));
        assert_eq!(ctx.take_private::<u64>(key), Some(99));
        assert!(ctx.private::<u64>(key).is_none());
    }
}
