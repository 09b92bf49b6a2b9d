//! Example demonstrating the full component lifecycle
//!
//! ```bash
//! cargo run --example lifecycle
//! ```
//!
//! Builds a component description with a fixed-value injection and lifecycle
//! callbacks, invokes it through a view, and tears it down.

use component_core::prelude::*;
use std::sync::Arc;

#[derive(Default)]
struct Ledger {
    currency: String,
    balance: i64,
}

fn deposit_invoker() -> MethodInvoker {
    Arc::new(|target, args| {
        let mut guard = target
            .lock()
            .map_err(|_| CoreError::Internal("target lock poisoned".into()))?;
        let ledger = guard
            .downcast_mut::<Ledger>()
            .ok_or_else(|| CoreError::Internal("wrong target type".into()))?;
        let amount = args
            .first()
            .and_then(|a| a.downcast_ref::<i64>())
            .copied()
            .unwrap_or(0);
        ledger.balance += amount;
        Ok(Box::new(format!("{} {}", ledger.balance, ledger.currency)) as AnyValue)
    })
}

fn currency_injection() -> ResourceInjection {
    let bound = BoundTarget::new(
        InjectionTarget::field("Ledger", "currency", "String"),
        |obj, value| {
            let ledger = obj
                .downcast_mut::<Ledger>()
                .ok_or_else(|| "wrong target type".to_string())?;
            ledger.currency = *value
                .ok_or_else(|| "absent value".to_string())?
                .downcast::<String>()
                .map_err(|_| "wrong value type".to_string())?;
            Ok(())
        },
    );
    ResourceInjection::new(bound, InjectionSource::fixed("EUR".to_string()))
}

fn announcing_callback(message: &'static str) -> Arc<dyn InterceptorFactory> {
    Arc::new(move |_: &mut ConstructionContext| {
        Ok(Arc::new(move |ctx: &mut InvocationContext| {
            println!("  [{}] running as '{}'", message, ctx.method());
            ctx.proceed()
        }) as Arc<dyn Interceptor>)
    })
}

fn main() -> Result<()> {
    println!("=== Component Lifecycle Demo ===\n");

    let component = ManagedComponent::new(
        ComponentDescription::builder("ledger")
            .instance(Ledger::default)
            .namespace(NamespaceSelector::new("demo/ledger"))
            .inject(currency_injection())
            .post_construct("open", announcing_callback("post-construct"))
            .pre_destroy("close", announcing_callback("pre-destroy"))
            .method("deposit", deposit_invoker())
            .build()?,
    );

    let view = component.create_view("local")?;
    println!("view '{}' exposes {} method(s)", view.name(), view.methods().count());

    // First invocation constructs the instance, injects the currency, and
    // runs the post-construct callback before dispatching
    let balance = view.invoke("deposit", vec![Box::new(25i64) as AnyValue])?;
    println!("after first deposit:  {}", balance.downcast::<String>().unwrap());

    let balance = view.invoke("deposit", vec![Box::new(17i64) as AnyValue])?;
    println!("after second deposit: {}", balance.downcast::<String>().unwrap());

    // Unknown methods fail fast with a dedicated error
    let err = view.invoke("withdraw", Vec::new()).unwrap_err();
    println!("unknown method: {err}");

    // Stopping destroys the instance (pre-destroy callback runs) and blocks
    // further invocations
    component.stop()?;
    let err = view.invoke("deposit", Vec::new()).unwrap_err();
    println!("after stop: {err}");

    Ok(())
}
