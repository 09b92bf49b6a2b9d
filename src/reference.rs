//! Managed references and the reference lifecycle managers
//!
//! A managed reference owns exactly one constructed backing instance plus its
//! release operation. References live in slots with lazy, exactly-once
//! construction and rollback-to-empty on partial failure.

use crate::error::{CoreError, Result};
use crate::injection::{AnyValue, InstanceHandle};
use crate::instance::{AttachmentKey, ComponentInstance};
use crate::interceptor::{
    ConstructionContext, Interceptor, InterceptorFactory, InvocationContext, memoized,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[cfg(feature = "logging")]
use tracing::{debug, trace};

// =============================================================================
// Managed Reference
// =============================================================================

/// An owned handle to one constructed instance plus its release operation.
///
/// Release is idempotent: only the first call runs the release hook.
pub struct ManagedReference {
    instance: InstanceHandle,
    released: AtomicBool,
    on_release: Option<Box<dyn Fn(&InstanceHandle) + Send + Sync>>,
}

impl ManagedReference {
    /// Wrap an instance with no release hook.
    pub fn new(instance: InstanceHandle) -> Self {
        Self {
            instance,
            released: AtomicBool::new(false),
            on_release: None,
        }
    }

    /// Wrap an instance with a release hook run on first release.
    pub fn with_release<F>(instance: InstanceHandle, on_release: F) -> Self
    where
        F: Fn(&InstanceHandle) + Send + Sync + 'static,
    {
        Self {
            instance,
            released: AtomicBool::new(false),
            on_release: Some(Box::new(on_release)),
        }
    }

    /// The backing instance.
    #[inline]
    pub fn instance(&self) -> &InstanceHandle {
        &self.instance
    }

    /// Release the reference. Calls after the first have no effect.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(hook) = &self.on_release {
            hook(&self.instance);
        }
    }

    /// Whether the reference has been released.
    #[inline]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for ManagedReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedReference")
            .field("released", &self.is_released())
            .finish()
    }
}

/// A factory that constructs managed references to backing instances
pub trait ReferenceFactory: Send + Sync {
    /// Construct a new reference.
    fn create(&self) -> Result<ManagedReference>;
}

impl<F> ReferenceFactory for F
where
    F: Fn() -> Result<ManagedReference> + Send + Sync,
{
    #[inline]
    fn create(&self) -> Result<ManagedReference> {
        self()
    }
}

// =============================================================================
// Reference Slot
// =============================================================================

enum SlotState {
    Empty,
    Active(Arc<ManagedReference>),
    Released,
}

/// Single-assignment-until-cleared holder for one managed reference.
///
/// State machine: `EMPTY → ACTIVE → RELEASED`, with rollback `ACTIVE → EMPTY`
/// when construction of the surrounding chain fails. Construction runs under
/// the slot lock, so contended first callers produce exactly one factory
/// invocation and all observe the same reference.
pub struct ReferenceSlot {
    state: Mutex<SlotState>,
}

impl ReferenceSlot {
    /// Create an empty slot.
    #[inline]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Empty),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, SlotState>> {
        self.state
            .lock()
            .map_err(|_| CoreError::Internal("reference slot lock poisoned".into()))
    }

    /// The active reference, if any.
    pub fn get(&self) -> Option<Arc<ManagedReference>> {
        match &*self.state.lock().ok()? {
            SlotState::Active(reference) => Some(Arc::clone(reference)),
            _ => None,
        }
    }

    /// Whether the slot currently holds a live reference.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.get().is_some()
    }

    /// Get the active reference, constructing one when the slot is empty.
    ///
    /// Returns the reference and whether this call constructed it. A released
    /// slot cannot be repopulated.
    pub fn get_or_create(
        &self,
        factory: &dyn ReferenceFactory,
    ) -> Result<(Arc<ManagedReference>, bool)> {
        let mut state = self.lock()?;
        match &*state {
            SlotState::Active(reference) => Ok((Arc::clone(reference), false)),
            SlotState::Released => Err(CoreError::cannot_proceed(
                "reference slot has already been released",
            )),
            SlotState::Empty => {
                let reference = Arc::new(factory.create()?);
                *state = SlotState::Active(Arc::clone(&reference));

                #[cfg(feature = "logging")]
                trace!(target: "component_core", "Installed managed reference into empty slot");

                Ok((reference, true))
            }
        }
    }

    /// Roll a failed construction back: release the reference and clear the
    /// slot to EMPTY so a later call may construct again.
    pub fn rollback(&self) {
        let taken = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            match std::mem::replace(&mut *state, SlotState::Empty) {
                SlotState::Active(reference) => Some(reference),
                other => {
                    *state = other;
                    None
                }
            }
        };

        if let Some(reference) = taken {
            #[cfg(feature = "logging")]
            debug!(
                target: "component_core",
                "Rolling back partially constructed managed reference"
            );
            reference.release();
        }
    }

    /// Release the held reference and move the slot to RELEASED.
    ///
    /// Idempotent at the slot level; the reference's own release is also
    /// idempotent, so double releases are suppressed twice over.
    pub fn release(&self) {
        let taken = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            match std::mem::replace(&mut *state, SlotState::Released) {
                SlotState::Active(reference) => Some(reference),
                _ => None,
            }
        };

        if let Some(reference) = taken {
            reference.release();
        }
    }
}

impl Default for ReferenceSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReferenceSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state.lock() {
            Ok(guard) => match &*guard {
                SlotState::Empty => "empty",
                SlotState::Active(_) => "active",
                SlotState::Released => "released",
            },
            Err(_) => "poisoned",
        };
        f.debug_struct("ReferenceSlot").field("state", &state).finish()
    }
}

// =============================================================================
// Lifecycle-Manager Interceptors
// =============================================================================

/// Chain interceptor that get-or-creates the slot's reference around a call.
///
/// When this call constructed the reference and the remainder of the chain
/// fails, the reference is released and the slot cleared before the failure
/// propagates. The reference's instance is set as the call target for the
/// nested part of the chain and the prior target restored afterwards.
pub struct ReferenceInterceptor {
    slot: Arc<ReferenceSlot>,
    factory: Arc<dyn ReferenceFactory>,
    set_target: bool,
}

impl ReferenceInterceptor {
    /// Create over an existing slot; sets the call target while proceeding.
    pub fn new(slot: Arc<ReferenceSlot>, factory: Arc<dyn ReferenceFactory>) -> Self {
        Self {
            slot,
            factory,
            set_target: true,
        }
    }

    /// Leave the call target untouched while proceeding.
    pub fn without_target(mut self) -> Self {
        self.set_target = false;
        self
    }

    /// The slot managed by this interceptor.
    #[inline]
    pub fn slot(&self) -> &Arc<ReferenceSlot> {
        &self.slot
    }

    /// Memoized factory creating one slot per construction context.
    ///
    /// The slot is registered with the context so the finished component
    /// instance releases it on destroy. Memoization guarantees every chain
    /// built in the same context shares the single slot.
    pub fn factory(reference_factory: Arc<dyn ReferenceFactory>) -> Arc<dyn InterceptorFactory> {
        memoized(Arc::new(move |ctx: &mut ConstructionContext| {
            let slot = Arc::new(ReferenceSlot::new());
            ctx.register_slot(Arc::clone(&slot));
            Ok(Arc::new(ReferenceInterceptor::new(
                slot,
                Arc::clone(&reference_factory),
            )) as Arc<dyn Interceptor>)
        }))
    }
}

impl Interceptor for ReferenceInterceptor {
    fn invoke(&self, ctx: &mut InvocationContext) -> Result<AnyValue> {
        let (reference, created) = self.slot.get_or_create(self.factory.as_ref())?;

        let prior = if self.set_target {
            Some(ctx.set_target(Some(Arc::clone(reference.instance()))))
        } else {
            None
        };

        let result = ctx.proceed();

        if let Some(prior) = prior {
            ctx.set_target(prior);
        }

        if created && result.is_err() {
            self.slot.rollback();
        }

        result
    }
}

/// Instance-scoped variant: the reference lives under an opaque key in the
/// owning component instance's attached data, with identical get-or-create
/// and rollback semantics.
pub struct AttachedReferenceInterceptor {
    key: AttachmentKey,
    factory: Arc<dyn ReferenceFactory>,
    set_target: bool,
}

impl AttachedReferenceInterceptor {
    /// Create for the given attachment key.
    pub fn new(key: AttachmentKey, factory: Arc<dyn ReferenceFactory>) -> Self {
        Self {
            key,
            factory,
            set_target: false,
        }
    }

    /// Set the reference's instance as the call target while proceeding.
    pub fn with_target(mut self) -> Self {
        self.set_target = true;
        self
    }

    /// The attachment key the reference lives under.
    #[inline]
    pub fn key(&self) -> AttachmentKey {
        self.key
    }

    /// Memoized factory; one attachment key per logical resource.
    pub fn factory(reference_factory: Arc<dyn ReferenceFactory>) -> Arc<dyn InterceptorFactory> {
        let key = AttachmentKey::new();
        memoized(Arc::new(move |_: &mut ConstructionContext| {
            Ok(Arc::new(AttachedReferenceInterceptor::new(
                key,
                Arc::clone(&reference_factory),
            )) as Arc<dyn Interceptor>)
        }))
    }
}

impl Interceptor for AttachedReferenceInterceptor {
    fn invoke(&self, ctx: &mut InvocationContext) -> Result<AnyValue> {
        let instance = ctx.instance().cloned().ok_or_else(|| {
            CoreError::cannot_proceed("no component instance associated with invocation")
        })?;

        let (reference, created) = instance.reference_or_create(self.key, self.factory.as_ref())?;

        let prior = if self.set_target {
            Some(ctx.set_target(Some(Arc::clone(reference.instance()))))
        } else {
            None
        };

        let result = ctx.proceed();

        if let Some(prior) = prior {
            ctx.set_target(prior);
        }

        if created && result.is_err() {
            if let Some(reference) = instance.discard_reference(self.key) {
                reference.release();
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::injection::instance_handle;
    use crate::interceptor::{ChainBuilder, InterceptorChain, MethodId, TerminalInterceptor, ordering};
    use std::sync::atomic::AtomicU32;

    fn counting_factory(releases: Arc<AtomicU32>, creations: Arc<AtomicU32>) -> Arc<dyn ReferenceFactory> {
        Arc::new(move || {
            creations.fetch_add(1, Ordering::SeqCst);
            let releases = Arc::clone(&releases);
            Ok(ManagedReference::with_release(
                instance_handle(0u8),
                move |_| {
                    releases.fetch_add(1, Ordering::SeqCst);
                },
            ))
        })
    }

    #[test]
    fn test_release_is_idempotent() {
        let releases = Arc::new(AtomicU32::new(0));
        let hook_releases = Arc::clone(&releases);
        let reference = ManagedReference::with_release(instance_handle(1u8), move |_| {
            hook_releases.fetch_add(1, Ordering::SeqCst);
        });

        reference.release();
        reference.release();
        reference.release();

        assert!(reference.is_released());
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_slot_constructs_exactly_once_under_contention() {
        let releases = Arc::new(AtomicU32::new(0));
        let creations = Arc::new(AtomicU32::new(0));
        let factory = counting_factory(Arc::clone(&releases), Arc::clone(&creations));
        let slot = Arc::new(ReferenceSlot::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let slot = Arc::clone(&slot);
                let factory = Arc::clone(&factory);
                std::thread::spawn(move || {
                    let (reference, _) = slot.get_or_create(factory.as_ref()).unwrap();
                    Arc::as_ptr(&reference) as usize
                })
            })
            .collect();

        let pointers: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(creations.load(Ordering::SeqCst), 1);
        assert!(pointers.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_slot_rollback_returns_to_empty() {
        let releases = Arc::new(AtomicU32::new(0));
        let creations = Arc::new(AtomicU32::new(0));
        let factory = counting_factory(Arc::clone(&releases), Arc::clone(&creations));
        let slot = ReferenceSlot::new();

        let (_, created) = slot.get_or_create(factory.as_ref()).unwrap();
        assert!(created);
        assert!(slot.is_active());

        slot.rollback();
        assert!(!slot.is_active());
        assert_eq!(releases.load(Ordering::SeqCst), 1);

        // Empty again: a later call constructs a second reference
        let (_, created) = slot.get_or_create(factory.as_ref()).unwrap();
        assert!(created);
        assert_eq!(creations.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_slot_release_is_idempotent_and_terminal() {
        let releases = Arc::new(AtomicU32::new(0));
        let creations = Arc::new(AtomicU32::new(0));
        let factory = counting_factory(Arc::clone(&releases), Arc::clone(&creations));
        let slot = ReferenceSlot::new();

        slot.get_or_create(factory.as_ref()).unwrap();
        slot.release();
        slot.release();
        assert_eq!(releases.load(Ordering::SeqCst), 1);

        // Released slots reject repopulation
        let err = slot.get_or_create(factory.as_ref()).unwrap_err();
        assert!(matches!(err, CoreError::CannotProceed { .. }));
    }

    #[test]
    fn test_interceptor_rolls_back_when_remainder_fails() {
        let releases = Arc::new(AtomicU32::new(0));
        let creations = Arc::new(AtomicU32::new(0));
        let factory = counting_factory(Arc::clone(&releases), Arc::clone(&creations));
        let slot = Arc::new(ReferenceSlot::new());

        let failing: Arc<dyn Interceptor> = Arc::new(|_: &mut InvocationContext| {
            Err(CoreError::Internal("injection blew up".into()))
        });
        let reference_interceptor: Arc<dyn Interceptor> =
            Arc::new(ReferenceInterceptor::new(Arc::clone(&slot), factory));
        let chain = Arc::new(InterceptorChain::new(vec![reference_interceptor, failing]));

        let mut ctx = InvocationContext::new("demo", MethodId::new("construct"), Vec::new());
        assert!(ctx.run(&chain).is_err());

        assert!(!slot.is_active(), "failed construction must leave the slot empty");
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(ctx.target().is_none(), "call target restored after failure");
    }

    #[test]
    fn test_interceptor_keeps_slot_active_on_success() {
        let releases = Arc::new(AtomicU32::new(0));
        let creations = Arc::new(AtomicU32::new(0));
        let factory = counting_factory(Arc::clone(&releases), Arc::clone(&creations));
        let slot = Arc::new(ReferenceSlot::new());

        let reference_interceptor: Arc<dyn Interceptor> =
            Arc::new(ReferenceInterceptor::new(Arc::clone(&slot), factory));
        let chain = Arc::new(InterceptorChain::new(vec![
            reference_interceptor,
            Arc::new(TerminalInterceptor),
        ]));

        let mut ctx = InvocationContext::new("demo", MethodId::new("construct"), Vec::new());
        ctx.run(&chain).unwrap();
        ctx.run(&chain).unwrap();

        assert!(slot.is_active());
        assert_eq!(creations.load(Ordering::SeqCst), 1, "second call reuses the reference");
        assert_eq!(releases.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_factory_memoizes_one_slot_per_context() {
        let releases = Arc::new(AtomicU32::new(0));
        let creations = Arc::new(AtomicU32::new(0));
        let factory =
            ReferenceInterceptor::factory(counting_factory(Arc::clone(&releases), creations));

        let mut cctx = ConstructionContext::new("demo");
        let a = ChainBuilder::new()
            .add(ordering::REFERENCE, Arc::clone(&factory))
            .add(ordering::TERMINAL, TerminalInterceptor::factory())
            .build(&mut cctx)
            .unwrap();
        let b = ChainBuilder::new()
            .add(ordering::REFERENCE, Arc::clone(&factory))
            .add(ordering::TERMINAL, TerminalInterceptor::factory())
            .build(&mut cctx)
            .unwrap();

        // Both chains share the single memoized interceptor and slot
        let chain_a = Arc::new(a);
        let chain_b = Arc::new(b);
        let mut ctx = InvocationContext::new("demo", MethodId::new("construct"), Vec::new());
        ctx.run(&chain_a).unwrap();
        ctx.run(&chain_b).unwrap();

        assert_eq!(cctx.take_slots().len(), 1);
    }

    #[test]
    fn test_attached_reference_lives_in_instance_data() {
        let releases = Arc::new(AtomicU32::new(0));
        let creations = Arc::new(AtomicU32::new(0));
        let factory = counting_factory(Arc::clone(&releases), Arc::clone(&creations));

        let instance = ComponentInstance::new("demo", Default::default(), None, Vec::new());
        let key = AttachmentKey::new();
        let attached: Arc<dyn Interceptor> =
            Arc::new(AttachedReferenceInterceptor::new(key, factory));
        let chain = Arc::new(InterceptorChain::new(vec![
            attached,
            Arc::new(TerminalInterceptor),
        ]));

        let mut ctx = InvocationContext::new("demo", MethodId::new("construct"), Vec::new());
        ctx.set_instance(Some(Arc::clone(&instance)));

        ctx.run(&chain).unwrap();
        ctx.run(&chain).unwrap();

        assert_eq!(creations.load(Ordering::SeqCst), 1);
        assert!(instance.discard_reference(key).is_some());
    }

    #[test]
    fn test_attached_reference_rolls_back_on_failure() {
        let releases = Arc::new(AtomicU32::new(0));
        let creations = Arc::new(AtomicU32::new(0));
        let factory = counting_factory(Arc::clone(&releases), Arc::clone(&creations));

        let instance = ComponentInstance::new("demo", Default::default(), None, Vec::new());
        let key = AttachmentKey::new();
        let attached: Arc<dyn Interceptor> =
            Arc::new(AttachedReferenceInterceptor::new(key, factory));
        let failing: Arc<dyn Interceptor> = Arc::new(|_: &mut InvocationContext| {
            Err(CoreError::Internal("resource setup failed".into()))
        });
        let chain = Arc::new(InterceptorChain::new(vec![attached, failing]));

        let mut ctx = InvocationContext::new("demo", MethodId::new("construct"), Vec::new());
        ctx.set_instance(Some(Arc::clone(&instance)));

        assert!(ctx.run(&chain).is_err());
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(instance.discard_reference(key).is_none());
    }
}
