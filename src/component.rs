//! Component descriptions and the managed component lifecycle
//!
//! A description is the fully resolved input the surrounding container hands
//! this core: the instance factory, ordered interceptor factories, resource
//! injections, bindings, and lifecycle-callback lists. A managed component
//! turns one description into views and lazily constructed instances.

use crate::error::{CoreError, Result};
use crate::injection::{
    AnyValue, BindingConfiguration, BindingResolver, DependencyRegistrar, EmptyResolver,
    InjectionInterceptor, ResolutionContext, ResourceInjection, ValueFactory, instance_handle,
};
use crate::instance::{
    ComponentInstance, DispatchInterceptor, MethodInvoker, MethodInvokerInterceptor,
};
use crate::interceptor::{
    ChainBuilder, ConstructionContext, Interceptor, InterceptorChain, InterceptorFactory,
    InvocationContext, MethodBindingInterceptor, MethodId, TerminalInterceptor, ordering,
};
use crate::index::ClassIndex;
use crate::namespace::{NamespaceInterceptor, NamespaceSelector};
use crate::reference::{ManagedReference, ReferenceFactory, ReferenceInterceptor};
use crate::view::ComponentView;
use ahash::RandomState;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[cfg(feature = "logging")]
use tracing::debug;

/// A lifecycle callback: an interceptor factory invoked "as" a fixed method
#[derive(Clone)]
pub struct LifecycleCallback {
    method: MethodId,
    factory: Arc<dyn InterceptorFactory>,
}

impl LifecycleCallback {
    /// Pair a callback factory with the method identity it runs as.
    pub fn new(method: MethodId, factory: Arc<dyn InterceptorFactory>) -> Self {
        Self { method, factory }
    }

    /// The bound method identity.
    #[inline]
    pub fn method(&self) -> &MethodId {
        &self.method
    }

    /// The callback's interceptor factory.
    #[inline]
    pub fn factory(&self) -> &Arc<dyn InterceptorFactory> {
        &self.factory
    }
}

impl std::fmt::Debug for LifecycleCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleCallback")
            .field("method", &self.method)
            .finish()
    }
}

/// One business method: its invoker handle plus instance-level interceptors
#[derive(Clone)]
struct BusinessMethod {
    method: MethodId,
    invoker: MethodInvoker,
    interceptors: Vec<Arc<dyn InterceptorFactory>>,
}

/// Fully resolved description of a managed component.
///
/// Built with [`ComponentDescriptionBuilder`]; descriptor parsing happens
/// outside the core.
#[derive(Clone)]
pub struct ComponentDescription {
    name: String,
    instance_factory: Arc<dyn ReferenceFactory>,
    resolver: Arc<dyn BindingResolver>,
    selector: Option<NamespaceSelector>,
    injections: Vec<ResourceInjection>,
    bindings: Vec<BindingConfiguration>,
    post_construct: Vec<LifecycleCallback>,
    pre_destroy: Vec<LifecycleCallback>,
    methods: Vec<BusinessMethod>,
    view_interceptors: Vec<(u32, Arc<dyn InterceptorFactory>)>,
}

impl ComponentDescription {
    /// Start building a description for the named component.
    #[inline]
    pub fn builder(name: impl Into<String>) -> ComponentDescriptionBuilder {
        ComponentDescriptionBuilder::new(name)
    }

    /// The component name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The binding configurations this component exposes.
    #[inline]
    pub fn bindings(&self) -> &[BindingConfiguration] {
        &self.bindings
    }
}

impl std::fmt::Debug for ComponentDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentDescription")
            .field("name", &self.name)
            .field("methods", &self.methods.len())
            .field("injections", &self.injections.len())
            .field("bindings", &self.bindings.len())
            .finish()
    }
}

/// Fluent builder for [`ComponentDescription`]
pub struct ComponentDescriptionBuilder {
    name: String,
    instance_factory: Option<Arc<dyn ReferenceFactory>>,
    resolver: Arc<dyn BindingResolver>,
    selector: Option<NamespaceSelector>,
    injections: Vec<ResourceInjection>,
    bindings: Vec<BindingConfiguration>,
    post_construct: Vec<LifecycleCallback>,
    pre_destroy: Vec<LifecycleCallback>,
    methods: Vec<BusinessMethod>,
    view_interceptors: Vec<(u32, Arc<dyn InterceptorFactory>)>,
}

impl ComponentDescriptionBuilder {
    /// Start a description for the named component.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instance_factory: None,
            resolver: Arc::new(EmptyResolver),
            selector: None,
            injections: Vec::new(),
            bindings: Vec::new(),
            post_construct: Vec::new(),
            pre_destroy: Vec::new(),
            methods: Vec::new(),
            view_interceptors: Vec::new(),
        }
    }

    /// The factory constructing the backing instance.
    pub fn instance_factory(mut self, factory: Arc<dyn ReferenceFactory>) -> Self {
        self.instance_factory = Some(factory);
        self
    }

    /// Convenience: construct backing instances from a plain constructor.
    pub fn instance<T, F>(self, constructor: F) -> Self
    where
        T: Send + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.instance_factory(Arc::new(move || {
            Ok(ManagedReference::new(instance_handle(constructor())))
        }))
    }

    /// The binding resolver collaborator for injection sources.
    pub fn resolver(mut self, resolver: Arc<dyn BindingResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// The ambient namespace scope pushed around every invocation.
    pub fn namespace(mut self, selector: NamespaceSelector) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Add a resource injection (callers supply superclass entries first).
    pub fn inject(mut self, injection: ResourceInjection) -> Self {
        self.injections.push(injection);
        self
    }

    /// Append the merged, superclass-first injection list for `class`.
    pub fn inject_from_class(mut self, index: &ClassIndex, class: &str) -> Self {
        self.injections.extend(index.merged_injections(class));
        self
    }

    /// Expose a binding.
    pub fn bind(mut self, binding: BindingConfiguration) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Add a post-construct callback run "as" `method`.
    pub fn post_construct(
        mut self,
        method: impl Into<MethodId>,
        factory: Arc<dyn InterceptorFactory>,
    ) -> Self {
        self.post_construct
            .push(LifecycleCallback::new(method.into(), factory));
        self
    }

    /// Add a pre-destroy callback run "as" `method`.
    pub fn pre_destroy(
        mut self,
        method: impl Into<MethodId>,
        factory: Arc<dyn InterceptorFactory>,
    ) -> Self {
        self.pre_destroy
            .push(LifecycleCallback::new(method.into(), factory));
        self
    }

    /// Declare a business method with its invoker handle.
    pub fn method(self, name: impl Into<MethodId>, invoker: MethodInvoker) -> Self {
        self.method_with_interceptors(name, invoker, Vec::new())
    }

    /// Declare a business method with instance-level interceptor factories.
    pub fn method_with_interceptors(
        mut self,
        name: impl Into<MethodId>,
        invoker: MethodInvoker,
        interceptors: Vec<Arc<dyn InterceptorFactory>>,
    ) -> Self {
        self.methods.push(BusinessMethod {
            method: name.into(),
            invoker,
            interceptors,
        });
        self
    }

    /// Add a view-level interceptor factory at an explicit ordinal.
    pub fn view_interceptor(mut self, position: u32, factory: Arc<dyn InterceptorFactory>) -> Self {
        self.view_interceptors.push((position, factory));
        self
    }

    /// Finish the description. Fails when no instance factory was supplied.
    pub fn build(self) -> Result<ComponentDescription> {
        let instance_factory = self.instance_factory.ok_or_else(|| {
            CoreError::creation_failed(self.name.clone(), "no instance factory configured")
        })?;
        Ok(ComponentDescription {
            name: self.name,
            instance_factory,
            resolver: self.resolver,
            selector: self.selector,
            injections: self.injections,
            bindings: self.bindings,
            post_construct: self.post_construct,
            pre_destroy: self.pre_destroy,
            methods: self.methods,
            view_interceptors: self.view_interceptors,
        })
    }
}

// =============================================================================
// Instance Association
// =============================================================================

/// View-level interceptor that associates the component instance with the
/// call, get-or-creating it on the first invocation.
pub struct AssociationInterceptor {
    component: Arc<ManagedComponent>,
}

impl AssociationInterceptor {
    /// Create for `component`.
    pub fn new(component: Arc<ManagedComponent>) -> Self {
        Self { component }
    }

    /// Factory producing the association interceptor.
    pub fn factory(component: Arc<ManagedComponent>) -> Arc<dyn InterceptorFactory> {
        Arc::new(move |_: &mut ConstructionContext| {
            Ok(Arc::new(AssociationInterceptor::new(Arc::clone(&component)))
                as Arc<dyn Interceptor>)
        })
    }
}

impl Interceptor for AssociationInterceptor {
    fn invoke(&self, ctx: &mut InvocationContext) -> Result<AnyValue> {
        let instance = self.component.get_or_create_instance()?;
        let prior = ctx.set_instance(Some(instance));
        let result = ctx.proceed();
        ctx.set_instance(prior);
        result
    }
}

// =============================================================================
// Managed Component
// =============================================================================

/// A binding resolved into its value factory, ready for external registration
#[derive(Clone)]
pub struct ResolvedBinding {
    name: String,
    factory: Arc<dyn ValueFactory>,
}

impl ResolvedBinding {
    /// The ambient name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The resolved value factory.
    #[inline]
    pub fn factory(&self) -> &Arc<dyn ValueFactory> {
        &self.factory
    }
}

/// One managed component: produces views, owns the lazily constructed
/// instance, and exposes start/stop lifecycle hooks to the surrounding layer.
pub struct ManagedComponent {
    description: ComponentDescription,
    stopped: AtomicBool,
    instance: Mutex<Option<Arc<ComponentInstance>>>,
}

impl ManagedComponent {
    /// Create a component from its description. The backing instance is not
    /// constructed until the first invocation or an explicit
    /// [`get_or_create_instance`](Self::get_or_create_instance).
    pub fn new(description: ComponentDescription) -> Arc<Self> {
        #[cfg(feature = "logging")]
        debug!(
            target: "component_core",
            component = description.name(),
            methods = description.methods.len(),
            "Created managed component"
        );

        Arc::new(Self {
            description,
            stopped: AtomicBool::new(false),
            instance: Mutex::new(None),
        })
    }

    /// The component name.
    #[inline]
    pub fn name(&self) -> &str {
        self.description.name()
    }

    /// The component's description.
    #[inline]
    pub fn description(&self) -> &ComponentDescription {
        &self.description
    }

    /// Whether the component has been stopped.
    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Allow invocations (again). Construction stays lazy.
    pub fn start(&self) -> Result<()> {
        self.stopped.store(false, Ordering::Release);
        Ok(())
    }

    /// Stop the component and destroy its instance. Idempotent.
    pub fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "component_core",
            component = self.name(),
            "Stopping managed component"
        );

        let taken = self
            .instance
            .lock()
            .map_err(|_| CoreError::Internal("component instance lock poisoned".into()))?
            .take();
        if let Some(instance) = taken {
            instance.destroy()?;
        }
        Ok(())
    }

    /// Walk every injection and binding source, registering their lookup
    /// dependencies with the external builder so the values are available by
    /// the time the first chain runs.
    pub fn register_dependencies(&self, registrar: &mut dyn DependencyRegistrar) -> Result<()> {
        let mut ctx = ResolutionContext::new(self.name(), self.description.resolver.as_ref())
            .with_registrar(registrar);
        for injection in &self.description.injections {
            injection.source().resolve(&mut ctx)?;
        }
        for binding in &self.description.bindings {
            binding.source().resolve(&mut ctx)?;
        }
        Ok(())
    }

    /// Resolve the component's bindings into value factories for external
    /// registration in the ambient naming scope.
    pub fn resolve_bindings(&self) -> Result<Vec<ResolvedBinding>> {
        let mut resolved = Vec::with_capacity(self.description.bindings.len());
        for binding in &self.description.bindings {
            let mut ctx =
                ResolutionContext::new(self.name(), self.description.resolver.as_ref());
            let factory = binding.source().resolve(&mut ctx)?.ok_or_else(|| {
                CoreError::creation_failed(
                    self.name(),
                    format!("binding '{}' cannot be resolved", binding.name()),
                )
            })?;
            resolved.push(ResolvedBinding {
                name: binding.name().to_string(),
                factory,
            });
        }
        Ok(resolved)
    }

    /// Create a caller-facing view bound to a method→interceptor map.
    pub fn create_view(self: &Arc<Self>, view_name: impl Into<String>) -> Result<Arc<ComponentView>> {
        let view_name = view_name.into();
        let mut cctx = ConstructionContext::new(self.name());

        let mut chains: HashMap<MethodId, Arc<InterceptorChain>, RandomState> = HashMap::default();
        for business in &self.description.methods {
            let mut builder = ChainBuilder::new();
            if let Some(selector) = &self.description.selector {
                builder = builder.add(
                    ordering::NAMESPACE,
                    NamespaceInterceptor::factory(selector.clone()),
                );
            }
            for (position, factory) in &self.description.view_interceptors {
                builder = builder.add(*position, Arc::clone(factory));
            }
            builder = builder
                .add(ordering::ASSOCIATION, AssociationInterceptor::factory(Arc::clone(self)))
                .add(ordering::DISPATCH, DispatchInterceptor::factory());

            chains.insert(
                business.method.clone(),
                Arc::new(builder.build(&mut cctx)?),
            );
        }

        Ok(ComponentView::new(view_name, Arc::clone(self), chains))
    }

    /// Get the component instance, constructing it on the first call.
    ///
    /// Construction is serialized: contended first callers observe exactly
    /// one build, and a failed build leaves no instance installed.
    pub fn get_or_create_instance(self: &Arc<Self>) -> Result<Arc<ComponentInstance>> {
        if self.is_stopped() {
            return Err(CoreError::stopped(self.name()));
        }

        let mut guard = self
            .instance
            .lock()
            .map_err(|_| CoreError::Internal("component instance lock poisoned".into()))?;

        if let Some(existing) = guard.as_ref() {
            if !existing.is_destroyed() {
                return Ok(Arc::clone(existing));
            }
        }

        let built = self.build_instance()?;
        *guard = Some(Arc::clone(&built));
        Ok(built)
    }

    /// Destroy the current instance without stopping the component.
    pub fn destroy_instance(&self) -> Result<()> {
        let taken = self
            .instance
            .lock()
            .map_err(|_| CoreError::Internal("component instance lock poisoned".into()))?
            .take();
        if let Some(instance) = taken {
            instance.destroy()?;
        }
        Ok(())
    }

    /// Build a fresh instance: assemble every chain from one construction
    /// context, then run the construction chain over the new instance.
    fn build_instance(self: &Arc<Self>) -> Result<Arc<ComponentInstance>> {
        let description = &self.description;

        #[cfg(feature = "logging")]
        debug!(
            target: "component_core",
            component = self.name(),
            "Constructing component instance"
        );

        let mut cctx = ConstructionContext::new(self.name());

        // One memoized reference interceptor: every chain built from this
        // context shares the single backing-instance slot
        let reference = ReferenceInterceptor::factory(Arc::clone(&description.instance_factory));

        // Instance-level business chains
        let mut methods: HashMap<MethodId, Arc<InterceptorChain>, RandomState> = HashMap::default();
        for business in &description.methods {
            let mut builder = ChainBuilder::new().add(ordering::REFERENCE, Arc::clone(&reference));
            for factory in &business.interceptors {
                builder = builder.add(ordering::USER, Arc::clone(factory));
            }
            builder = builder.add(
                ordering::DISPATCH,
                MethodInvokerInterceptor::factory(
                    business.method.clone(),
                    Arc::clone(&business.invoker),
                ),
            );
            methods.insert(
                business.method.clone(),
                Arc::new(builder.build(&mut cctx)?),
            );
        }

        // Construction chain: reference creation, injection, callbacks
        let mut construction = ChainBuilder::new();
        if let Some(selector) = &description.selector {
            construction = construction.add(
                ordering::NAMESPACE,
                NamespaceInterceptor::factory(selector.clone()),
            );
        }
        construction = construction
            .add(ordering::REFERENCE, Arc::clone(&reference))
            .add(
                ordering::INJECTION,
                InjectionInterceptor::factory(
                    description.injections.clone(),
                    Arc::clone(&description.resolver),
                ),
            );
        for callback in &description.post_construct {
            construction = construction.add(
                ordering::LIFECYCLE,
                MethodBindingInterceptor::factory(
                    callback.method().clone(),
                    Arc::clone(callback.factory()),
                ),
            );
        }
        construction = construction.add(ordering::TERMINAL, TerminalInterceptor::factory());
        let construction_chain = Arc::new(construction.build(&mut cctx)?);

        // Pre-destroy chain
        let mut teardown = ChainBuilder::new();
        if let Some(selector) = &description.selector {
            teardown = teardown.add(
                ordering::NAMESPACE,
                NamespaceInterceptor::factory(selector.clone()),
            );
        }
        for callback in &description.pre_destroy {
            teardown = teardown.add(
                ordering::LIFECYCLE,
                MethodBindingInterceptor::factory(
                    callback.method().clone(),
                    Arc::clone(callback.factory()),
                ),
            );
        }
        teardown = teardown.add(ordering::TERMINAL, TerminalInterceptor::factory());
        let pre_destroy = Arc::new(teardown.build(&mut cctx)?);

        let instance = ComponentInstance::new(
            self.name(),
            methods,
            Some(pre_destroy),
            cctx.take_slots(),
        );

        let mut ctx = InvocationContext::new(
            self.name(),
            MethodId::new("post_construct"),
            Vec::new(),
        );
        ctx.set_instance(Some(Arc::clone(&instance)));
        // On failure the reference interceptor has already rolled the slot
        // back to empty; nothing is installed and the error propagates
        ctx.run(&construction_chain)?;

        instance.complete_construction();
        Ok(instance)
    }
}

impl std::fmt::Debug for ManagedComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedComponent")
            .field("name", &self.name())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::injection::{BoundTarget, InjectionSource, InjectionTarget};
    use std::sync::atomic::AtomicU32;

    #[derive(Default)]
    struct Counter {
        value: i32,
    }

    fn counter_invoker() -> MethodInvoker {
        Arc::new(|target, _args| {
            let mut guard = target
                .lock()
                .map_err(|_| CoreError::Internal("target lock poisoned".into()))?;
            let counter = guard
                .downcast_mut::<Counter>()
                .ok_or_else(|| CoreError::Internal("wrong target type".into()))?;
            counter.value += 1;
            Ok(Box::new(counter.value) as AnyValue)
        })
    }

    fn value_injection(value: i32) -> ResourceInjection {
        let bound = BoundTarget::new(
            InjectionTarget::field("Counter", "value", "i32").primitive(),
            |obj, value| {
                let counter = obj
                    .downcast_mut::<Counter>()
                    .ok_or_else(|| "wrong target type".to_string())?;
                counter.value = *value
                    .ok_or_else(|| "absent value".to_string())?
                    .downcast::<i32>()
                    .map_err(|_| "wrong value type".to_string())?;
                Ok(())
            },
        );
        ResourceInjection::new(bound, InjectionSource::fixed(value))
    }

    fn description(constructions: Arc<AtomicU32>) -> ComponentDescription {
        ComponentDescription::builder("counter")
            .instance_factory(Arc::new(move || {
                constructions.fetch_add(1, Ordering::SeqCst);
                Ok(ManagedReference::new(instance_handle(Counter::default())))
            }))
            .inject(value_injection(42))
            .method("increment", counter_invoker())
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_instance_factory() {
        let err = ComponentDescription::builder("empty").build().unwrap_err();
        assert!(matches!(err, CoreError::CreationFailed { .. }));
    }

    #[test]
    fn test_instance_constructed_lazily_and_once() {
        let constructions = Arc::new(AtomicU32::new(0));
        let component = ManagedComponent::new(description(Arc::clone(&constructions)));

        assert_eq!(constructions.load(Ordering::SeqCst), 0);

        let first = component.get_or_create_instance().unwrap();
        let second = component.get_or_create_instance().unwrap();

        assert_eq!(constructions.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.is_construction_complete());
    }

    #[test]
    fn test_injection_applied_before_visibility() {
        let constructions = Arc::new(AtomicU32::new(0));
        let component = ManagedComponent::new(description(constructions));
        let view = component.create_view("local").unwrap();

        // First increment sees the injected 42
        let result = view.invoke("increment", Vec::new()).unwrap();
        assert_eq!(*result.downcast::<i32>().unwrap(), 43);
    }

    #[test]
    fn test_failed_construction_rolls_back_and_retries() {
        let attempts = Arc::new(AtomicU32::new(0));
        let releases = Arc::new(AtomicU32::new(0));

        let factory_attempts = Arc::clone(&attempts);
        let factory_releases = Arc::clone(&releases);
        let failing_injection = {
            let bound = BoundTarget::new(
                InjectionTarget::field("Counter", "value", "i32"),
                |_, _| Err("resolver offline".to_string()),
            );
            ResourceInjection::new(bound, InjectionSource::fixed(1i32))
        };

        let component = ManagedComponent::new(
            ComponentDescription::builder("counter")
                .instance_factory(Arc::new(move || {
                    factory_attempts.fetch_add(1, Ordering::SeqCst);
                    let releases = Arc::clone(&factory_releases);
                    Ok(ManagedReference::with_release(
                        instance_handle(Counter::default()),
                        move |_| {
                            releases.fetch_add(1, Ordering::SeqCst);
                        },
                    ))
                }))
                .inject(failing_injection)
                .method("increment", counter_invoker())
                .build()
                .unwrap(),
        );

        let err = component.get_or_create_instance().unwrap_err();
        assert!(matches!(err, CoreError::InjectionFailed { .. }));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(releases.load(Ordering::SeqCst), 1, "rolled-back reference released once");

        // The failure left nothing installed; the next attempt constructs anew
        let err = component.get_or_create_instance().unwrap_err();
        assert!(matches!(err, CoreError::InjectionFailed { .. }));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_lifecycle_callbacks_run_as_their_method() {
        let observed = Arc::new(Mutex::new(Vec::new()));

        let callback = |tag: &'static str, observed: Arc<Mutex<Vec<String>>>| {
            let factory: Arc<dyn InterceptorFactory> =
                Arc::new(move |_: &mut ConstructionContext| {
                    let observed = Arc::clone(&observed);
                    let tag = tag.to_string();
                    Ok(Arc::new(move |ctx: &mut InvocationContext| {
                        observed
                            .lock()
                            .unwrap()
                            .push(format!("{tag}:{}", ctx.method()));
                        ctx.proceed()
                    }) as Arc<dyn Interceptor>)
                });
            factory
        };

        let component = ManagedComponent::new(
            ComponentDescription::builder("counter")
                .instance(Counter::default)
                .method("increment", counter_invoker())
                .post_construct("init", callback("pc", Arc::clone(&observed)))
                .pre_destroy("shutdown", callback("pd", Arc::clone(&observed)))
                .build()
                .unwrap(),
        );

        component.get_or_create_instance().unwrap();
        component.stop().unwrap();

        assert_eq!(
            *observed.lock().unwrap(),
            vec!["pc:init".to_string(), "pd:shutdown".to_string()]
        );
    }

    #[test]
    fn test_stop_is_idempotent_and_blocks_invocations() {
        let constructions = Arc::new(AtomicU32::new(0));
        let component = ManagedComponent::new(description(constructions));
        let view = component.create_view("local").unwrap();
        view.invoke("increment", Vec::new()).unwrap();

        component.stop().unwrap();
        component.stop().unwrap();

        let err = view.invoke("increment", Vec::new()).unwrap_err();
        assert!(matches!(err, CoreError::ComponentStopped { .. }));

        // Restart allows a fresh instance
        component.start().unwrap();
        let result = view.invoke("increment", Vec::new()).unwrap();
        assert_eq!(*result.downcast::<i32>().unwrap(), 43);
    }

    #[test]
    fn test_resolve_bindings_fails_fast_on_unknown_source() {
        let component = ManagedComponent::new(
            ComponentDescription::builder("counter")
                .instance(Counter::default)
                .bind(BindingConfiguration::new("env/limit", InjectionSource::fixed(10i32)).unwrap())
                .method("increment", counter_invoker())
                .build()
                .unwrap(),
        );

        let resolved = component.resolve_bindings().unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].name(), "env/limit");
        let value = resolved[0].factory().create_value().unwrap().unwrap();
        assert_eq!(*value.downcast::<i32>().unwrap(), 10);

        let broken = ManagedComponent::new(
            ComponentDescription::builder("counter")
                .instance(Counter::default)
                .bind(
                    BindingConfiguration::new("svc/main", InjectionSource::service("missing"))
                        .unwrap(),
                )
                .method("increment", counter_invoker())
                .build()
                .unwrap(),
        );
        assert!(broken.resolve_bindings().is_err());
    }

    #[test]
    fn test_register_dependencies_walks_every_source() {
        struct Recording(Vec<String>);
        impl DependencyRegistrar for Recording {
            fn add_dependency(&mut self, name: &str) {
                self.0.push(name.to_string());
            }
        }

        let service_injection = {
            let bound = BoundTarget::new(
                InjectionTarget::method("Counter", "set_source", "DataSource"),
                |_, _| Ok(()),
            );
            ResourceInjection::new(bound, InjectionSource::service("jdbc/main")).optional()
        };

        let component = ManagedComponent::new(
            ComponentDescription::builder("counter")
                .instance(Counter::default)
                .inject(service_injection)
                .bind(
                    BindingConfiguration::new("env/peer", InjectionSource::lookup("peer-view"))
                        .unwrap(),
                )
                .method("increment", counter_invoker())
                .build()
                .unwrap(),
        );

        let mut recording = Recording(Vec::new());
        component.register_dependencies(&mut recording).unwrap();
        assert_eq!(
            recording.0,
            vec!["jdbc/main".to_string(), "peer-view".to_string()]
        );
    }

    #[test]
    fn test_concurrent_first_invocations_share_one_instance() {
        let constructions = Arc::new(AtomicU32::new(0));
        let component = ManagedComponent::new(description(Arc::clone(&constructions)));
        let view = component.create_view("local").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let view = Arc::clone(&view);
                std::thread::spawn(move || {
                    *view
                        .invoke("increment", Vec::new())
                        .unwrap()
                        .downcast::<i32>()
                        .unwrap()
                })
            })
            .collect();

        let mut results: Vec<i32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        results.sort_unstable();

        assert_eq!(constructions.load(Ordering::SeqCst), 1);
        // All eight calls hit the same injected instance: 43..=50
        assert_eq!(results, (43..=50).collect::<Vec<i32>>());
    }
}
