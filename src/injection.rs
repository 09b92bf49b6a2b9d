//! Injection targets, value sources, and the resource injection engine
//!
//! A target names a field or setter method on a backing object; the actual
//! member access is an opaque setter capability resolved by an external
//! reflection collaborator. A source describes where the injected value comes
//! from and resolves to a value factory.

use crate::error::{CoreError, Result};
use std::any::Any;
use std::sync::{Arc, Mutex};

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// Type-erased owned value moving through injection points and invocations
pub type AnyValue = Box<dyn Any + Send>;

/// Shared mutable handle to the backing object of a managed component
pub type InstanceHandle = Arc<Mutex<Box<dyn Any + Send>>>;

/// Wrap a concrete value into an [`InstanceHandle`].
#[inline]
pub fn instance_handle<T: Send + 'static>(value: T) -> InstanceHandle {
    Arc::new(Mutex::new(Box::new(value) as Box<dyn Any + Send>))
}

// =============================================================================
// Injection Targets
// =============================================================================

/// Kind of member an injection target refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    /// A field on the backing object
    Field,
    /// A setter method on the backing object
    Method,
}

/// Immutable descriptor of an injection target: class, member, value type.
///
/// The descriptor carries names only; resolving a descriptor into something
/// callable is the job of an external collaborator, which hands the core a
/// [`BoundTarget`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InjectionTarget {
    class_name: String,
    member_name: String,
    value_type: String,
    kind: TargetKind,
    primitive: bool,
}

impl InjectionTarget {
    /// Describe a field target.
    #[inline]
    pub fn field(
        class_name: impl Into<String>,
        member_name: impl Into<String>,
        value_type: impl Into<String>,
    ) -> Self {
        Self {
            class_name: class_name.into(),
            member_name: member_name.into(),
            value_type: value_type.into(),
            kind: TargetKind::Field,
            primitive: false,
        }
    }

    /// Describe a setter-method target.
    #[inline]
    pub fn method(
        class_name: impl Into<String>,
        member_name: impl Into<String>,
        value_type: impl Into<String>,
    ) -> Self {
        Self {
            class_name: class_name.into(),
            member_name: member_name.into(),
            value_type: value_type.into(),
            kind: TargetKind::Method,
            primitive: false,
        }
    }

    /// Mark the target's value type as primitive.
    ///
    /// Absent values are skipped for primitive targets instead of injected.
    #[inline]
    pub fn primitive(mut self) -> Self {
        self.primitive = true;
        self
    }

    /// The class the member belongs to.
    #[inline]
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// The member name.
    #[inline]
    pub fn member_name(&self) -> &str {
        &self.member_name
    }

    /// The declared value type name.
    #[inline]
    pub fn value_type(&self) -> &str {
        &self.value_type
    }

    /// Field or method.
    #[inline]
    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    /// Whether the target's type is primitive.
    #[inline]
    pub fn is_primitive(&self) -> bool {
        self.primitive
    }

    /// `Class::member` form used in error messages and logs.
    #[inline]
    pub fn qualified_name(&self) -> String {
        format!("{}::{}", self.class_name, self.member_name)
    }
}

/// Opaque setter capability: writes a resolved value into one member.
///
/// Resolved once by the external reflection collaborator; the core never
/// performs name-based member lookup itself. The setter receives `None` when
/// the resolved value is absent and the target accepts absent values.
pub type SetterFn =
    dyn Fn(&mut (dyn Any + Send), Option<AnyValue>) -> std::result::Result<(), String>
        + Send
        + Sync;

/// An injection target paired with its resolved setter capability
#[derive(Clone)]
pub struct BoundTarget {
    target: InjectionTarget,
    setter: Arc<SetterFn>,
}

impl BoundTarget {
    /// Pair a target descriptor with its externally resolved setter.
    pub fn new<F>(target: InjectionTarget, setter: F) -> Self
    where
        F: Fn(&mut (dyn Any + Send), Option<AnyValue>) -> std::result::Result<(), String>
            + Send
            + Sync
            + 'static,
    {
        Self {
            target,
            setter: Arc::new(setter),
        }
    }

    /// The target descriptor.
    #[inline]
    pub fn target(&self) -> &InjectionTarget {
        &self.target
    }

    /// Apply a resolved value to this target on the given instance.
    ///
    /// An absent value for a primitive-typed target skips the setter call
    /// entirely and succeeds. Setter failures are wrapped as
    /// [`CoreError::InjectionFailed`] preserving the cause; never retried.
    pub fn inject(&self, instance: &InstanceHandle, value: Option<AnyValue>) -> Result<()> {
        if value.is_none() && self.target.primitive {
            #[cfg(feature = "logging")]
            trace!(
                target: "component_core",
                member = %self.target.qualified_name(),
                "Skipping absent value for primitive-typed target"
            );
            return Ok(());
        }

        let mut guard = instance.lock().map_err(|_| {
            CoreError::injection_failed(self.target.qualified_name(), "instance lock poisoned")
        })?;

        (self.setter)(&mut **guard, value)
            .map_err(|reason| CoreError::injection_failed(self.target.qualified_name(), reason))
    }
}

impl std::fmt::Debug for BoundTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundTarget")
            .field("target", &self.target)
            .finish()
    }
}

// =============================================================================
// Value Sources
// =============================================================================

/// A factory that yields resolved values for injection points.
///
/// `Ok(None)` means the value is absent, which is distinct from failure.
pub trait ValueFactory: Send + Sync {
    /// Produce the value for one injection point.
    fn create_value(&self) -> Result<Option<AnyValue>>;
}

impl<F> ValueFactory for F
where
    F: Fn() -> Result<Option<AnyValue>> + Send + Sync,
{
    #[inline]
    fn create_value(&self) -> Result<Option<AnyValue>> {
        self()
    }
}

/// Fixed-value factory: clones a captured value for every injection point
struct FixedValueFactory<T: Clone + Send + Sync + 'static> {
    value: T,
}

impl<T: Clone + Send + Sync + 'static> ValueFactory for FixedValueFactory<T> {
    #[inline]
    fn create_value(&self) -> Result<Option<AnyValue>> {
        Ok(Some(Box::new(self.value.clone())))
    }
}

/// Dependency-registration contract.
///
/// A source may require that an external builder make a value available
/// before the chain first runs; the core only forwards the request and does
/// not manage the dependency graph itself.
pub trait DependencyRegistrar {
    /// Record that the resolving component depends on `name`.
    fn add_dependency(&mut self, name: &str);
}

/// Collaborator that turns lookup names into value factories.
///
/// All lookups default to `None`; implementors override the kinds they serve.
pub trait BindingResolver: Send + Sync {
    /// Resolve a named external service.
    fn service(&self, _name: &str) -> Option<Arc<dyn ValueFactory>> {
        None
    }

    /// Resolve an environment-entry value.
    fn env_entry(&self, _name: &str) -> Option<Arc<dyn ValueFactory>> {
        None
    }

    /// Resolve another component's view.
    fn view(&self, _name: &str) -> Option<Arc<dyn ValueFactory>> {
        None
    }

    /// Resolve a generic binding lookup.
    fn binding(&self, _name: &str) -> Option<Arc<dyn ValueFactory>> {
        None
    }
}

/// Resolver that knows no bindings
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyResolver;

impl BindingResolver for EmptyResolver {}

/// Context handed to sources during resolution
pub struct ResolutionContext<'a> {
    component: &'a str,
    resolver: &'a dyn BindingResolver,
    registrar: Option<&'a mut dyn DependencyRegistrar>,
}

impl<'a> ResolutionContext<'a> {
    /// Create a resolution context for the named component.
    #[inline]
    pub fn new(component: &'a str, resolver: &'a dyn BindingResolver) -> Self {
        Self {
            component,
            resolver,
            registrar: None,
        }
    }

    /// Attach a dependency registrar.
    #[inline]
    pub fn with_registrar(mut self, registrar: &'a mut dyn DependencyRegistrar) -> Self {
        self.registrar = Some(registrar);
        self
    }

    /// The component being resolved for.
    #[inline]
    pub fn component(&self) -> &str {
        self.component
    }

    fn register_dependency(&mut self, name: &str) {
        if let Some(registrar) = self.registrar.as_mut() {
            registrar.add_dependency(name);
        }
    }
}

/// Where an injected value comes from.
///
/// A single tagged variant rather than a hierarchy of source types; each kind
/// carries its payload and resolution dispatches on the tag.
#[derive(Clone)]
pub enum InjectionSource {
    /// An already-resolved value factory
    Fixed(Arc<dyn ValueFactory>),
    /// A named external service
    Service { name: String },
    /// An environment-entry value
    EnvEntry { name: String },
    /// The view of another managed component
    View { name: String },
    /// A value produced by an external binding lookup
    Lookup { name: String },
}

impl InjectionSource {
    /// Fixed source cloning `value` for every injection point.
    #[inline]
    pub fn fixed<T: Clone + Send + Sync + 'static>(value: T) -> Self {
        Self::Fixed(Arc::new(FixedValueFactory { value }))
    }

    /// Named external service source.
    #[inline]
    pub fn service(name: impl Into<String>) -> Self {
        Self::Service { name: name.into() }
    }

    /// Environment-entry source.
    #[inline]
    pub fn env_entry(name: impl Into<String>) -> Self {
        Self::EnvEntry { name: name.into() }
    }

    /// View-binding source.
    #[inline]
    pub fn view(name: impl Into<String>) -> Self {
        Self::View { name: name.into() }
    }

    /// Generic binding-lookup source.
    #[inline]
    pub fn lookup(name: impl Into<String>) -> Self {
        Self::Lookup { name: name.into() }
    }

    /// Resolve this source into a value factory.
    ///
    /// Lookup kinds register a dependency with the context's registrar so the
    /// value can be made available before the chain first runs. `Ok(None)`
    /// means the resolver knows no such binding.
    pub fn resolve(&self, ctx: &mut ResolutionContext<'_>) -> Result<Option<Arc<dyn ValueFactory>>> {
        match self {
            Self::Fixed(factory) => Ok(Some(Arc::clone(factory))),
            Self::Service { name } => {
                ctx.register_dependency(name);
                Ok(ctx.resolver.service(name))
            }
            Self::EnvEntry { name } => Ok(ctx.resolver.env_entry(name)),
            Self::View { name } => {
                ctx.register_dependency(name);
                Ok(ctx.resolver.view(name))
            }
            Self::Lookup { name } => {
                ctx.register_dependency(name);
                Ok(ctx.resolver.binding(name))
            }
        }
    }
}

impl PartialEq for InjectionSource {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            // Fixed sources compare by factory identity
            (Self::Fixed(a), Self::Fixed(b)) => Arc::ptr_eq(a, b),
            (Self::Service { name: a }, Self::Service { name: b }) => a == b,
            (Self::EnvEntry { name: a }, Self::EnvEntry { name: b }) => a == b,
            (Self::View { name: a }, Self::View { name: b }) => a == b,
            (Self::Lookup { name: a }, Self::Lookup { name: b }) => a == b,
            _ => false,
        }
    }
}

impl Eq for InjectionSource {}

impl std::fmt::Debug for InjectionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed(_) => f.write_str("Fixed(..)"),
            Self::Service { name } => f.debug_struct("Service").field("name", name).finish(),
            Self::EnvEntry { name } => f.debug_struct("EnvEntry").field("name", name).finish(),
            Self::View { name } => f.debug_struct("View").field("name", name).finish(),
            Self::Lookup { name } => f.debug_struct("Lookup").field("name", name).finish(),
        }
    }
}

// =============================================================================
// Injection & Binding Configurations
// =============================================================================

/// Pairs a bound target with the source of its value
#[derive(Debug, Clone)]
pub struct ResourceInjection {
    bound: BoundTarget,
    source: InjectionSource,
    optional: bool,
}

impl ResourceInjection {
    /// Required injection of `source` into `bound`.
    #[inline]
    pub fn new(bound: BoundTarget, source: InjectionSource) -> Self {
        Self {
            bound,
            source,
            optional: false,
        }
    }

    /// Make the injection optional: an absent value becomes a no-op.
    #[inline]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Whether an absent value is tolerated.
    #[inline]
    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// The target descriptor.
    #[inline]
    pub fn target(&self) -> &InjectionTarget {
        self.bound.target()
    }

    /// The value source.
    #[inline]
    pub fn source(&self) -> &InjectionSource {
        &self.source
    }

    /// Resolve the source and apply the value to the target on `instance`.
    pub fn resolve_and_apply(
        &self,
        ctx: &mut ResolutionContext<'_>,
        instance: &InstanceHandle,
    ) -> Result<()> {
        let factory = match self.source.resolve(ctx)? {
            Some(factory) => factory,
            None if self.optional => {
                #[cfg(feature = "logging")]
                debug!(
                    target: "component_core",
                    component = ctx.component(),
                    member = %self.bound.target().qualified_name(),
                    "Optional injection has no resolvable source, skipping"
                );
                return Ok(());
            }
            None => {
                return Err(CoreError::injection_failed(
                    self.bound.target().qualified_name(),
                    "no value available for required injection",
                ));
            }
        };

        let value = factory.create_value()?;
        if value.is_none() && self.optional {
            #[cfg(feature = "logging")]
            debug!(
                target: "component_core",
                component = ctx.component(),
                member = %self.bound.target().qualified_name(),
                "Optional injection resolved to absent value, skipping"
            );
            return Ok(());
        }

        self.bound.inject(instance, value)
    }
}

/// Exposes a resolved value under a name in the ambient naming scope.
///
/// Name and source are both required; construction fails eagerly otherwise.
/// Equality is by (name, source).
#[derive(Debug, Clone)]
pub struct BindingConfiguration {
    name: String,
    source: InjectionSource,
}

impl BindingConfiguration {
    /// Create a binding. Fails with [`CoreError::MissingBindingName`] when the
    /// name is empty.
    pub fn new(name: impl Into<String>, source: InjectionSource) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(CoreError::MissingBindingName);
        }
        Ok(Self { name, source })
    }

    /// Create a binding from possibly-absent descriptor parts.
    ///
    /// Used by callers assembling bindings out of parsed deployment metadata
    /// where either half may be missing.
    pub fn try_from_parts(name: Option<String>, source: Option<InjectionSource>) -> Result<Self> {
        let name = match name {
            Some(name) if !name.is_empty() => name,
            _ => return Err(CoreError::MissingBindingName),
        };
        let source = source.ok_or_else(|| CoreError::missing_source(name.clone()))?;
        Ok(Self { name, source })
    }

    /// The ambient name the value is exposed under.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The value source.
    #[inline]
    pub fn source(&self) -> &InjectionSource {
        &self.source
    }
}

impl PartialEq for BindingConfiguration {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.source == other.source
    }
}

impl Eq for BindingConfiguration {}

// =============================================================================
// Injection Interceptor
// =============================================================================

/// Applies a component's pending resource injections to the call target.
///
/// Runs inside the construction chain after the managed reference has been
/// installed and before lifecycle callbacks, so the backing object never
/// becomes visible to callers uninjected. Configurations are applied in the
/// order supplied (superclass entries before subclass entries).
pub struct InjectionInterceptor {
    injections: Arc<[ResourceInjection]>,
    resolver: Arc<dyn BindingResolver>,
}

impl InjectionInterceptor {
    /// Create over an ordered injection list.
    pub fn new(injections: Vec<ResourceInjection>, resolver: Arc<dyn BindingResolver>) -> Self {
        Self {
            injections: injections.into(),
            resolver,
        }
    }

    /// Factory producing this interceptor.
    pub fn factory(
        injections: Vec<ResourceInjection>,
        resolver: Arc<dyn BindingResolver>,
    ) -> Arc<dyn crate::interceptor::InterceptorFactory> {
        let injections: Arc<[ResourceInjection]> = injections.into();
        Arc::new(move |_: &mut crate::interceptor::ConstructionContext| {
            Ok(Arc::new(InjectionInterceptor {
                injections: Arc::clone(&injections),
                resolver: Arc::clone(&resolver),
            }) as Arc<dyn crate::interceptor::Interceptor>)
        })
    }
}

impl crate::interceptor::Interceptor for InjectionInterceptor {
    fn invoke(&self, ctx: &mut crate::interceptor::InvocationContext) -> Result<AnyValue> {
        let target = ctx.target().cloned().ok_or_else(|| {
            CoreError::cannot_proceed("no target instance for resource injection")
        })?;

        let component = ctx.component().to_string();
        {
            let mut rctx = ResolutionContext::new(&component, self.resolver.as_ref());
            for injection in self.injections.iter() {
                injection.resolve_and_apply(&mut rctx, &target)?;
            }
        }

        #[cfg(feature = "logging")]
        trace!(
            target: "component_core",
            component = component.as_str(),
            injections = self.injections.len(),
            "Applied resource injections to backing instance"
        );

        ctx.proceed()
    }
}
