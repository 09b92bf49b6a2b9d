//! Example demonstrating logging capabilities
//!
//! Run with pretty logging (development):
//! ```bash
//! cargo run --example logging --features logging-pretty
//! ```
//!
//! Run with JSON logging (production):
//! ```bash
//! cargo run --example logging --features logging-json
//! ```

use component_core::prelude::*;
use std::sync::Arc;

struct Probe;

fn ping_invoker() -> MethodInvoker {
    Arc::new(|_target, _args| Ok(Box::new("pong".to_string()) as AnyValue))
}

fn main() {
    // Initialize logging - uses JSON if logging-json feature enabled,
    // pretty if logging-pretty enabled
    #[cfg(feature = "logging")]
    {
        component_core::logging::init();
    }

    println!("=== Component Core Logging Demo ===\n");

    // Component creation logs: "Created managed component"
    let component = ManagedComponent::new(
        ComponentDescription::builder("probe")
            .instance(|| Probe)
            .namespace(NamespaceSelector::new("demo/probe"))
            .method("ping", ping_invoker())
            .build()
            .expect("description must build"),
    );

    let view = component.create_view("local").expect("view must build");

    // First invocation logs the instance construction, reference install,
    // injection application, and dispatch hand-off
    let result = view.invoke("ping", Vec::new()).expect("ping");
    println!("first call:  {}", result.downcast::<String>().unwrap());

    // Warm invocation logs only the dispatch path
    let result = view.invoke("ping", Vec::new()).expect("ping");
    println!("second call: {}", result.downcast::<String>().unwrap());

    // Unknown methods log nothing and fail fast
    let err = view.invoke("missing", Vec::new()).unwrap_err();
    println!("unknown:     {err}");

    // Stop logs: "Stopping managed component", "Destroying component instance"
    component.stop().expect("stop");
}
