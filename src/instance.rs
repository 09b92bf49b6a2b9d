//! Component instances and the two-level dispatch endpoint
//!
//! A component instance is the runtime handle for one instantiation of a
//! managed component: its per-instance attached data, its method→interceptor
//! map, and the construction-complete flag that freezes the attached data.

use crate::error::{CoreError, Result};
use crate::injection::{AnyValue, InstanceHandle};
use crate::interceptor::{
    ConstructionContext, Interceptor, InterceptorChain, InterceptorFactory, InvocationContext,
    MethodId,
};
use crate::reference::{ManagedReference, ReferenceFactory, ReferenceSlot};
use ahash::RandomState;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// Opaque, process-unique key for per-instance attached data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachmentKey(u64);

impl AttachmentKey {
    /// Allocate a new unique key.
    #[inline]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for AttachmentKey {
    fn default() -> Self {
        Self::new()
    }
}

/// Runtime handle for one live instantiation of a managed component.
///
/// Attached data may only be mutated before construction completes; the
/// method map is fixed at creation. Destroy is exactly-once and releases all
/// managed references the instance holds.
pub struct ComponentInstance {
    component: String,
    id: u64,
    construction_complete: AtomicBool,
    destroyed: AtomicBool,
    attachments: DashMap<AttachmentKey, Arc<dyn Any + Send + Sync>, RandomState>,
    method_interceptors: HashMap<MethodId, Arc<InterceptorChain>, RandomState>,
    pre_destroy: Option<Arc<InterceptorChain>>,
    slots: Vec<Arc<ReferenceSlot>>,
}

impl ComponentInstance {
    /// Create an instance with its method map, pre-destroy chain, and the
    /// reference slots created during its build.
    pub fn new(
        component: impl Into<String>,
        method_interceptors: HashMap<MethodId, Arc<InterceptorChain>, RandomState>,
        pre_destroy: Option<Arc<InterceptorChain>>,
        slots: Vec<Arc<ReferenceSlot>>,
    ) -> Arc<Self> {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let id = COUNTER.fetch_add(1, Ordering::Relaxed);
        let component = component.into();

        #[cfg(feature = "logging")]
        debug!(
            target: "component_core",
            component = component.as_str(),
            instance_id = id,
            methods = method_interceptors.len(),
            "Created component instance"
        );

        Arc::new(Self {
            component,
            id,
            construction_complete: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            attachments: DashMap::with_hasher(RandomState::new()),
            method_interceptors,
            pre_destroy,
            slots,
        })
    }

    /// The owning component's name.
    #[inline]
    pub fn component(&self) -> &str {
        &self.component
    }

    /// Process-unique instance id.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The instance-level interceptor chain for `method`.
    #[inline]
    pub fn interceptor(&self, method: &MethodId) -> Option<Arc<InterceptorChain>> {
        self.method_interceptors.get(method).cloned()
    }

    /// Methods this instance can dispatch.
    pub fn methods(&self) -> impl Iterator<Item = &MethodId> {
        self.method_interceptors.keys()
    }

    /// Whether construction has been marked complete.
    #[inline]
    pub fn is_construction_complete(&self) -> bool {
        self.construction_complete.load(Ordering::Acquire)
    }

    /// Mark construction complete, freezing the attached data.
    #[inline]
    pub fn complete_construction(&self) {
        self.construction_complete.store(true, Ordering::Release);
    }

    /// Whether the instance has been destroyed.
    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    fn check_mutable(&self) -> Result<()> {
        if self.is_construction_complete() {
            return Err(CoreError::ConstructionComplete);
        }
        Ok(())
    }

    /// Attach a value under `key`. Fails once construction is complete.
    pub fn set_attachment<T: Send + Sync + 'static>(
        &self,
        key: AttachmentKey,
        value: T,
    ) -> Result<()> {
        self.check_mutable()?;
        self.attachments.insert(key, Arc::new(value));
        Ok(())
    }

    /// Read an attached value. Reads succeed at any point in the lifecycle.
    pub fn attachment<T: Send + Sync + 'static>(&self, key: AttachmentKey) -> Option<Arc<T>> {
        let value = Arc::clone(self.attachments.get(&key)?.value());
        value.downcast::<T>().ok()
    }

    /// Remove an attached value. Fails once construction is complete.
    pub fn remove_attachment(&self, key: AttachmentKey) -> Result<()> {
        self.check_mutable()?;
        self.attachments.remove(&key);
        Ok(())
    }

    /// Get the managed reference under `key`, constructing it when absent.
    ///
    /// Identical get-or-create semantics to a bare reference slot: exactly
    /// one contended creator runs the factory. Creation requires the
    /// attached data to still be mutable.
    pub fn reference_or_create(
        &self,
        key: AttachmentKey,
        factory: &dyn ReferenceFactory,
    ) -> Result<(Arc<ManagedReference>, bool)> {
        // Fast path: already attached (allowed even after freeze)
        if let Some(existing) = self.attachment::<ManagedReference>(key) {
            return Ok((existing, false));
        }

        self.check_mutable()?;

        match self.attachments.entry(key) {
            Entry::Occupied(entry) => {
                let value = Arc::clone(entry.get());
                value.downcast::<ManagedReference>().map(|r| (r, false)).map_err(|_| {
                    CoreError::Internal("attachment key holds non-reference data".into())
                })
            }
            Entry::Vacant(entry) => {
                // Factory runs while the shard entry is held, so concurrent
                // creators for the same key serialize here
                let reference = Arc::new(factory.create()?);
                entry.insert(Arc::clone(&reference) as Arc<dyn Any + Send + Sync>);
                Ok((reference, true))
            }
        }
    }

    /// Remove and return the managed reference under `key` without the
    /// freeze guard. Used by lifecycle managers rolling back or releasing.
    pub fn discard_reference(&self, key: AttachmentKey) -> Option<Arc<ManagedReference>> {
        let (_, value) = self.attachments.remove(&key)?;
        value.downcast::<ManagedReference>().ok()
    }

    /// Destroy the instance: run the pre-destroy chain, then release every
    /// managed reference it holds. Calls after the first have no effect.
    pub fn destroy(self: &Arc<Self>) -> Result<()> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "component_core",
            component = self.component.as_str(),
            instance_id = self.id,
            "Destroying component instance"
        );

        let result = match &self.pre_destroy {
            Some(chain) => {
                let mut ctx = InvocationContext::new(
                    self.component.clone(),
                    MethodId::new("pre_destroy"),
                    Vec::new(),
                );
                ctx.set_instance(Some(Arc::clone(self)));
                // The build registers the backing-instance slot first; make
                // its object the call target for pre-destroy callbacks
                if let Some(reference) = self.slots.first().and_then(|slot| slot.get()) {
                    ctx.set_target(Some(Arc::clone(reference.instance())));
                }
                ctx.run(chain).map(|_| ())
            }
            None => Ok(()),
        };

        // References are released even when a pre-destroy callback failed
        let keys: Vec<AttachmentKey> = self.attachments.iter().map(|e| *e.key()).collect();
        for key in keys {
            if let Some(reference) = self.discard_reference(key) {
                reference.release();
            }
        }
        for slot in &self.slots {
            slot.release();
        }

        result
    }
}

impl std::fmt::Debug for ComponentInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentInstance")
            .field("component", &self.component)
            .field("id", &self.id)
            .field("construction_complete", &self.is_construction_complete())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

// =============================================================================
// Dispatch Endpoint
// =============================================================================

/// Final interceptor of a component-level chain: resolves the current
/// instance's interceptor for the invoked method and hands control to it.
///
/// Fails when no instance is associated with the context, or when the
/// instance has no interceptor for the method (a method the container was
/// never configured for). No retries.
pub struct DispatchInterceptor;

impl DispatchInterceptor {
    /// Factory producing the dispatcher.
    pub fn factory() -> Arc<dyn InterceptorFactory> {
        Arc::new(|_: &mut ConstructionContext| {
            Ok(Arc::new(DispatchInterceptor) as Arc<dyn Interceptor>)
        })
    }
}

impl Interceptor for DispatchInterceptor {
    fn invoke(&self, ctx: &mut InvocationContext) -> Result<AnyValue> {
        let instance = ctx.instance().cloned().ok_or_else(|| {
            CoreError::cannot_proceed("no component instance associated with invocation")
        })?;

        let method = ctx.method().clone();
        let chain = instance
            .interceptor(&method)
            .ok_or_else(|| CoreError::no_such_method(method.name()))?;

        #[cfg(feature = "logging")]
        trace!(
            target: "component_core",
            component = instance.component(),
            instance_id = instance.id(),
            method = %method,
            "Dispatching to instance-level chain"
        );

        ctx.run(&chain)
    }
}

// =============================================================================
// Method Invocation Terminal
// =============================================================================

/// Opaque handle that performs the actual method call on a backing instance.
///
/// Supplied by the external collaborator that resolved the method; the core
/// never inspects the callee.
pub type MethodInvoker =
    Arc<dyn Fn(&InstanceHandle, &mut Vec<AnyValue>) -> Result<AnyValue> + Send + Sync>;

/// Terminal interceptor of an instance-level chain: calls the real method.
pub struct MethodInvokerInterceptor {
    method: MethodId,
    invoker: MethodInvoker,
}

impl MethodInvokerInterceptor {
    /// Create for one method and its invoker handle.
    pub fn new(method: MethodId, invoker: MethodInvoker) -> Self {
        Self { method, invoker }
    }

    /// Factory producing the terminal invoker.
    pub fn factory(method: MethodId, invoker: MethodInvoker) -> Arc<dyn InterceptorFactory> {
        Arc::new(move |_: &mut ConstructionContext| {
            Ok(Arc::new(MethodInvokerInterceptor::new(
                method.clone(),
                Arc::clone(&invoker),
            )) as Arc<dyn Interceptor>)
        })
    }
}

impl Interceptor for MethodInvokerInterceptor {
    fn invoke(&self, ctx: &mut InvocationContext) -> Result<AnyValue> {
        let target = ctx.target().cloned().ok_or_else(|| {
            CoreError::cannot_proceed(format!("no call target for method '{}'", self.method))
        })?;
        (self.invoker)(&target, ctx.args_mut())
    }
}
