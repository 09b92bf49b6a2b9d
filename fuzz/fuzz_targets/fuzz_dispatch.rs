#![no_main]

//! Fuzz target for proxy dispatch and component lifecycle
//!
//! Drives a component view with arbitrary method names and lifecycle
//! transitions, checking the dedicated error kinds and idempotent stop.

use arbitrary::Arbitrary;
use component_core::{
    AnyValue, ComponentDescription, CoreError, ManagedComponent, MethodInvoker,
};
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;

#[derive(Default)]
struct Counter {
    value: i64,
}

fn increment_invoker() -> MethodInvoker {
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

/// Dispatch operations
#[derive(Debug, Arbitrary)]
enum DispatchOp {
    InvokeKnown,
    InvokeArbitrary(String),
    Stop,
    Start,
    DestroyInstance,
}

fuzz_target!(|ops: Vec<DispatchOp>| {
    let component = ManagedComponent::new(
        ComponentDescription::builder("fuzzed")
            .instance(Counter::default)
            .method("increment", increment_invoker())
            .build()
            .expect("description must build"),
    );
    let view = component.create_view("fuzz").expect("view must build");

    let mut stopped = false;

    for op in ops.into_iter().take(100) {
        match op {
            DispatchOp::InvokeKnown => {
                let result = view.invoke("increment", Vec::new());
                if stopped {
                    assert!(matches!(
                        result.unwrap_err(),
                        CoreError::ComponentStopped { .. }
                    ));
                } else {
                    let value = *result
                        .expect("running component must dispatch")
                        .downcast::<i64>()
                        .expect("increment returns i64");
                    assert!(value >= 1);
                }
            }
            DispatchOp::InvokeArbitrary(name) => {
                if name == "increment" {
                    continue;
                }
                // Unknown methods fail the same way stopped or not
                let err = view.invoke(name.as_str(), Vec::new()).unwrap_err();
                assert!(matches!(err, CoreError::NoSuchMethod { .. }));
            }
            DispatchOp::Stop => {
                component.stop().expect("stop must not fail");
                component.stop().expect("stop must stay idempotent");
                stopped = true;
            }
            DispatchOp::Start => {
                component.start().expect("start must not fail");
                stopped = false;
            }
            DispatchOp::DestroyInstance => {
                component
                    .destroy_instance()
                    .expect("destroying an instance must not fail");
            }
        }
    }
});
