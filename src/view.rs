//! Caller-facing component views
//!
//! A view is the proxy entry point into a component: a pre-built
//! method→interceptor map plus the component handle. Every call gets a fresh
//! invocation context; no call state is shared between invocations.

use crate::component::ManagedComponent;
use crate::error::{CoreError, Result};
use crate::injection::{AnyValue, ValueFactory};
use crate::interceptor::{InterceptorChain, InvocationContext, MethodId};
use ahash::RandomState;
use std::collections::HashMap;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::trace;

/// Proxy invocation handler for one view of a managed component
pub struct ComponentView {
    name: String,
    component: Arc<ManagedComponent>,
    chains: HashMap<MethodId, Arc<InterceptorChain>, RandomState>,
}

impl ComponentView {
    pub(crate) fn new(
        name: String,
        component: Arc<ManagedComponent>,
        chains: HashMap<MethodId, Arc<InterceptorChain>, RandomState>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            component,
            chains,
        })
    }

    /// The view name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The owning component.
    #[inline]
    pub fn component(&self) -> &Arc<ManagedComponent> {
        &self.component
    }

    /// Methods this view can dispatch.
    pub fn methods(&self) -> impl Iterator<Item = &MethodId> {
        self.chains.keys()
    }

    /// Whether `method` is present in the interceptor map.
    #[inline]
    pub fn contains_method(&self, method: &MethodId) -> bool {
        self.chains.contains_key(method)
    }

    /// Invoke a method through the view chain.
    ///
    /// A method absent from the map fails immediately with
    /// [`CoreError::NoSuchMethod`] and performs no side effects; a stopped
    /// component fails with [`CoreError::ComponentStopped`].
    pub fn invoke(&self, method: impl Into<MethodId>, args: Vec<AnyValue>) -> Result<AnyValue> {
        self.invoke_from(None, method, args)
    }

    /// Invoke with an originating caller handle recorded on the context.
    pub fn invoke_from(
        &self,
        caller: Option<&str>,
        method: impl Into<MethodId>,
        args: Vec<AnyValue>,
    ) -> Result<AnyValue> {
        let method = method.into();

        let chain = self
            .chains
            .get(&method)
            .cloned()
            .ok_or_else(|| CoreError::no_such_method(method.name()))?;

        if self.component.is_stopped() {
            return Err(CoreError::stopped(self.component.name()));
        }

        #[cfg(feature = "logging")]
        trace!(
            target: "component_core",
            component = self.component.name(),
            view = self.name.as_str(),
            method = %method,
            args = args.len(),
            "Invoking through view chain"
        );

        let mut ctx = InvocationContext::new(self.component.name(), method, args)
            .with_view(self.name.clone());
        if let Some(caller) = caller {
            ctx = ctx.with_caller(caller);
        }

        ctx.run(&chain)
    }
}

impl std::fmt::Debug for ComponentView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentView")
            .field("name", &self.name)
            .field("component", &self.component.name())
            .field("methods", &self.chains.len())
            .finish()
    }
}

/// Bridges a component view into the generic value-factory shape, so external
/// binding infrastructure can register the view as a dependency target.
pub struct ViewBinder {
    view: Arc<ComponentView>,
}

impl ViewBinder {
    /// Create a binder over `view`.
    pub fn new(view: Arc<ComponentView>) -> Self {
        Self { view }
    }

    /// The bound view.
    #[inline]
    pub fn view(&self) -> &Arc<ComponentView> {
        &self.view
    }
}

impl ValueFactory for ViewBinder {
    fn create_value(&self) -> Result<Option<AnyValue>> {
        Ok(Some(Box::new(Arc::clone(&self.view))))
    }
}

impl std::fmt::Debug for ViewBinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewBinder")
            .field("view", &self.view.name())
            .finish()
    }
}
