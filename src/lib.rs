//! # Component Core - Managed-Component Container Runtime for Rust
//!
//! The invocation-interception and instance-lifecycle core of a managed
//! component container: ordered interceptor chains around every call, lazy
//! exactly-once construction of backing instances, resource injection before
//! visibility, and ambient namespace scoping with guaranteed cleanup.
//!
//! ## Features
//!
//! - 🔗 **Composable interception** - ordered chains with `proceed`/short-circuit
//! - 🦥 **Lazy instances** - the backing object is constructed on first call
//! - ⚛️ **Exactly-once** - single-winner construction under contention
//! - ♻️ **Guaranteed cleanup** - rollback on partial failure, idempotent destroy
//! - 💉 **Resource injection** - superclass-first ordering, primitive skip rule
//! - 🔒 **Lock-free indexes** - `DashMap` class cache with parent delegation
//! - 📊 **Observable** - optional tracing integration with JSON or pretty output
//!
//! ## Quick Start
//!
//! ```rust
//! use component_core::prelude::*;
//! use std::sync::Arc;
//!
//! #[derive(Default)]
//! struct Greeter {
//!     greeting: String,
//! }
//!
//! // The actual method call is an opaque invoker handle
//! let invoker: MethodInvoker = Arc::new(|target, _args| {
//!     let guard = target.lock().map_err(|_| CoreError::Internal("poisoned".into()))?;
//!     let greeter = guard.downcast_ref::<Greeter>().unwrap();
//!     Ok(Box::new(greeter.greeting.clone()) as AnyValue)
//! });
//!
//! // Inject a fixed greeting into the field before the instance is visible
//! let bound = BoundTarget::new(
//!     InjectionTarget::field("Greeter", "greeting", "String"),
//!     |obj, value| {
//!         let greeter = obj.downcast_mut::<Greeter>().ok_or("wrong type")?;
//!         greeter.greeting = *value
//!             .ok_or("absent")?
//!             .downcast::<String>()
//!             .map_err(|_| "wrong value type")?;
//!         Ok(())
//!     },
//! );
//!
//! let component = ManagedComponent::new(
//!     ComponentDescription::builder("greeter")
//!         .instance(Greeter::default)
//!         .inject(ResourceInjection::new(bound, InjectionSource::fixed("hello".to_string())))
//!         .method("greet", invoker)
//!         .build()
//!         .unwrap(),
//! );
//!
//! let view = component.create_view("local").unwrap();
//! let result = view.invoke("greet", Vec::new()).unwrap();
//! assert_eq!(*result.downcast::<String>().unwrap(), "hello");
//! ```
//!
//! ## Two-Level Dispatch
//!
//! An external call enters the view-level chain (namespace scoping, instance
//! association, dispatch) and hands off to the per-instance chain for the
//! requested method (reference access, user interceptors, the real call).
//! Contexts are created fresh per call and never shared.

mod component;
mod error;
mod index;
mod injection;
mod instance;
mod interceptor;
#[cfg(feature = "logging")]
pub mod logging;
mod namespace;
mod reference;
mod view;

pub use component::*;
pub use error::*;
pub use index::*;
pub use injection::*;
pub use instance::*;
pub use interceptor::*;
pub use namespace::*;
pub use reference::*;
pub use view::*;

// Re-export tracing macros for convenience when logging feature is enabled
#[cfg(feature = "logging")]
pub use tracing::{debug, error, info, trace, warn};

// Re-export for convenience
pub use std::sync::Arc;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        AnyValue, AttachmentKey, BindingConfiguration, BoundTarget, ChainBuilder, ClassDescription,
        ClassIndex, ComponentDescription, ComponentInstance, ComponentView, ConstructionContext,
        CoreError, InjectionSource, InjectionTarget, InstanceHandle, Interceptor,
        InterceptorChain, InterceptorFactory, InvocationContext, ManagedComponent,
        ManagedReference, MethodId, MethodInvoker, NamespaceSelector, ReferenceFactory,
        ReferenceSlot, ResourceInjection, Result, ValueFactory, ViewBinder,
    };
    pub use std::sync::Arc;
}
