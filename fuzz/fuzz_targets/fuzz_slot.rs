#![no_main]

//! Fuzz target for reference-slot lifecycle operations
//!
//! Exercises the EMPTY → ACTIVE → RELEASED state machine, rollback, and the
//! exactly-once release invariant under arbitrary operation sequences.

use arbitrary::Arbitrary;
use component_core::{ManagedReference, ReferenceFactory, ReferenceSlot, instance_handle};
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Slot operations
#[derive(Debug, Arbitrary)]
enum SlotOp {
    GetOrCreate,
    Get,
    Rollback,
    Release,
    IsActive,
}

fuzz_target!(|ops: Vec<SlotOp>| {
    let creations = Arc::new(AtomicU64::new(0));
    let releases = Arc::new(AtomicU64::new(0));

    let factory: Arc<dyn ReferenceFactory> = {
        let creations = Arc::clone(&creations);
        let releases = Arc::clone(&releases);
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
    };

    let slot = ReferenceSlot::new();
    let mut released = false;

    for op in ops.into_iter().take(100) {
        match op {
            SlotOp::GetOrCreate => {
                let result = slot.get_or_create(factory.as_ref());
                if released {
                    assert!(result.is_err(), "released slot must reject repopulation");
                } else {
                    let (reference, _) = result.expect("unreleased slot must yield a reference");
                    assert!(!reference.is_released());
                }
            }
            SlotOp::Get => {
                if let Some(reference) = slot.get() {
                    assert!(!reference.is_released(), "active reference must be live");
                }
            }
            SlotOp::Rollback => {
                slot.rollback();
                if !released {
                    assert!(!slot.is_active(), "rollback must clear the slot");
                }
            }
            SlotOp::Release => {
                slot.release();
                released = true;
                assert!(!slot.is_active());
            }
            SlotOp::IsActive => {
                let _ = slot.is_active();
            }
        }
    }

    slot.release();

    // Every constructed reference was released exactly once by rollback,
    // release, or the final cleanup
    assert_eq!(
        creations.load(Ordering::SeqCst),
        releases.load(Ordering::SeqCst),
        "each construction must be paired with exactly one release"
    );
});
