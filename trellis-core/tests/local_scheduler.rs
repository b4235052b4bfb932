//! Flush delivery through a tokio `LocalSet`.

use std::cell::RefCell;
use std::rc::Rc;

use tokio::task::LocalSet;
use trellis_core::{FlushMode, Runtime, RuntimeConfig, SubscriptionController, Tag};

fn local_runtime() -> Runtime {
    Runtime::with_config(RuntimeConfig::default().with_flush_mode(FlushMode::LocalTask))
}

/// Yield until the requested flush has run.
async fn settle(runtime: &Runtime) {
    while runtime.is_flush_scheduled() {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn writes_in_one_turn_flush_once_on_next_tick() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let runtime = local_runtime();
            let a = runtime.signal(1);
            let b = runtime.signal(2);
            let seen = Rc::new(RefCell::new(Vec::new()));

            let (a2, b2, seen2) = (a.clone(), b.clone(), seen.clone());
            let _effect =
                runtime.watch_effect(move |_| seen2.borrow_mut().push(a2.get() + b2.get()));

            a.set(10);
            b.set(20);
            assert!(runtime.is_flush_scheduled());
            assert_eq!(*seen.borrow(), vec![3]);

            settle(&runtime).await;
            assert_eq!(*seen.borrow(), vec![3, 30]);
            assert_eq!(runtime.pending_count(), 0);
        })
        .await;
}

#[tokio::test]
async fn effect_writes_schedule_a_follow_up_flush() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let runtime = local_runtime();
            let source = runtime.signal(0);
            let mirror = runtime.signal(0);
            let seen = Rc::new(RefCell::new(Vec::new()));

            let (source2, mirror2) = (source.clone(), mirror.clone());
            let _copy = runtime.watch_effect(move |_| {
                let value = source2.get();
                mirror2.set(value * 10);
            });

            let (mirror3, seen3) = (mirror.clone(), seen.clone());
            let _log = runtime.watch_effect(move |_| seen3.borrow_mut().push(mirror3.get()));

            source.set(1);
            settle(&runtime).await;
            assert_eq!(*seen.borrow(), vec![0, 10]);
        })
        .await;
}

#[tokio::test]
async fn unsubscribing_before_the_tick_suppresses_delivery() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let runtime = local_runtime();
            let cell = runtime.signal(0);
            let seen = Rc::new(RefCell::new(Vec::new()));

            let (cell2, seen2) = (cell.clone(), seen.clone());
            let effect = runtime.watch_effect(move |_| seen2.borrow_mut().push(cell2.get()));

            cell.set(1);
            effect.unsubscribe();
            settle(&runtime).await;
            assert_eq!(*seen.borrow(), vec![0]);
        })
        .await;
}

/// Without a tokio runtime the host flushes, and later writes still request.
#[test]
fn without_a_tokio_runtime_the_host_flushes() {
    let runtime = local_runtime();
    let cell = runtime.signal(0);
    let seen = Rc::new(RefCell::new(Vec::new()));

    let (cell2, seen2) = (cell.clone(), seen.clone());
    let _effect = runtime.watch_effect(move |_| seen2.borrow_mut().push(cell2.get()));

    cell.set(1);
    assert!(runtime.is_flush_scheduled());
    assert_eq!(runtime.flush(), 1);
    assert!(!runtime.is_flush_scheduled());

    cell.set(2);
    assert!(runtime.is_flush_scheduled());
    assert_eq!(runtime.flush(), 1);
    assert_eq!(*seen.borrow(), vec![0, 1, 2]);
}

/// A failed spawn outside a `LocalSet` leaves the flush flag clear.
#[tokio::test]
async fn spawn_outside_a_local_set_does_not_wedge_the_flag() {
    let runtime = local_runtime();
    let tag = Tag::new(&runtime);
    let controller = SubscriptionController::new(|| {});
    controller.set_observed_tags(vec![tag.clone()], Some(tag.revision()));
    controller.subscribe();

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| tag.dirty()));
    assert!(result.is_err());
    assert!(!runtime.is_flush_scheduled());
    assert_eq!(runtime.pending_count(), 1);

    assert_eq!(runtime.flush(), 1);
}
