//! Integration Tests for the Tracking Runtime
//!
//! These tests verify that tags, tracked state, memos, and effects work
//! together correctly through the public API only.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use trellis_core::{EffectBatch, MemoState, Runtime, Signal, TrackedObject, TrackingError};

fn counter() -> (Rc<Cell<usize>>, impl Fn() + Clone + 'static) {
    let count = Rc::new(Cell::new(0));
    let count_clone = count.clone();
    (count, move || count_clone.set(count_clone.get() + 1))
}

/// Writing the current value neither advances the clock nor wakes effects.
#[test]
fn idempotent_write_is_invisible() {
    let runtime = Runtime::new();
    let cell = runtime.signal(String::from("World"));
    let (runs, bump) = counter();

    let cell_clone = cell.clone();
    let _effect = runtime.watch_effect(move |_| {
        cell_clone.get();
        bump();
    });

    let revision = runtime.revision();
    cell.set(String::from("World"));

    assert_eq!(runtime.revision(), revision);
    assert!(!runtime.is_flush_scheduled());
    assert_eq!(runtime.flush(), 0);
    assert_eq!(runs.get(), 1);
}

/// Unchanged inputs return the very same cached object.
#[test]
fn memo_returns_identical_result_until_input_changes() {
    let runtime = Runtime::new();
    let target = runtime.signal("World");
    let unrelated = runtime.signal(0);
    let (calls, bump) = counter();

    let target_clone = target.clone();
    let greeting = runtime.memoize(move || {
        bump();
        Rc::new(format!("Hello {}", target_clone.get()))
    });

    let first = greeting.get();
    let second = greeting.get();
    assert!(Rc::ptr_eq(&first, &second));

    unrelated.set(1);
    assert!(Rc::ptr_eq(&first, &greeting.get()));
    assert_eq!(calls.get(), 1);

    target.set("Universe");
    let third = greeting.get();
    assert!(!Rc::ptr_eq(&first, &third));
    assert_eq!(*third, "Hello Universe");
    assert_eq!(calls.get(), 2);
}

/// A memo read inside another computation contributes its tags to it.
#[test]
fn nested_memo_bubbles_dependencies() {
    let runtime = Runtime::new();
    let base = runtime.signal(5);

    let base_clone = base.clone();
    let doubled = runtime.memoize(move || base_clone.get() * 2);

    let doubled_clone = doubled.clone();
    let plus_ten = runtime.memoize(move || doubled_clone.get() + 10);

    // Warm the inner cache first so the outer run is served from it.
    assert_eq!(doubled.get(), 10);
    assert_eq!(plus_ten.get(), 20);
    assert_eq!(plus_ten.tag_count(), 1);

    base.set(10);
    assert_eq!(plus_ten.state(), MemoState::Stale);
    assert_eq!(plus_ten.get(), 30);
    assert_eq!(doubled.get(), 20);
}

/// Adding a key that did not exist invalidates key enumeration, and so does
/// removing it again.
#[test]
fn new_keys_are_tracked() {
    let runtime = Runtime::new();
    let store: TrackedObject<String, i32> = runtime.tracked_object([("a".to_string(), 1)]);
    let (calls, bump) = counter();

    let store_clone = store.clone();
    let keys = runtime.memoize(move || {
        bump();
        store_clone.keys()
    });

    assert_eq!(keys.get(), vec!["a"]);
    store.set("b".to_string(), 2);
    assert_eq!(keys.get(), vec!["a", "b"]);
    store.delete(&"b".to_string());
    assert_eq!(keys.get(), vec!["a"]);
    assert_eq!(calls.get(), 3);

    // Changing an existing value leaves the key set alone.
    store.set("a".to_string(), 10);
    keys.get();
    assert_eq!(calls.get(), 3);
}

/// A property read before it exists is picked up once it is added.
#[test]
fn reading_a_missing_property_tracks_it() {
    let runtime = Runtime::new();
    let store: TrackedObject<&str, &str> = TrackedObject::new(&runtime);

    let store_clone = store.clone();
    let greeting = runtime.derive(move || store_clone.get(&"greeting").unwrap_or("Hi"));

    assert_eq!(greeting.current(), "Hi");
    store.set("greeting", "Hello");
    assert_eq!(greeting.current(), "Hello");
}

/// Membership tests follow additions and deletions.
#[test]
fn has_tracks_membership() {
    let runtime = Runtime::new();
    let store: TrackedObject<&str, i32> = TrackedObject::new(&runtime);

    let store_clone = store.clone();
    let present = runtime.derive(move || store_clone.has(&"x"));

    assert!(!present.current());
    store.set("x", 1);
    assert!(present.current());
    store.delete(&"x");
    assert!(!present.current());
}

/// A change that happened before subscribing is delivered on subscribe.
#[test]
fn subscribe_catches_up_exactly_once() {
    let runtime = Runtime::new();
    let cell = runtime.signal(0);
    let seen = Rc::new(RefCell::new(Vec::new()));

    let (cell_clone, seen_clone) = (cell.clone(), seen.clone());
    let (effect, batch) = runtime.collect_effects(|| {
        runtime.watch_effect(move |_| seen_clone.borrow_mut().push(cell_clone.get()))
    });
    assert!(!effect.is_subscribed());

    cell.set(1);
    assert_eq!(runtime.pending_count(), 0);

    batch.subscribe_all();
    assert_eq!(*seen.borrow(), vec![0, 1]);

    batch.subscribe_all();
    runtime.flush();
    assert_eq!(*seen.borrow(), vec![0, 1]);
}

/// Subscribing from inside a tracked computation leaks no catch-up reads.
#[test]
fn catch_up_inside_tracked_scope_is_untracked() {
    let runtime = Runtime::new();
    let cell = runtime.signal(0);
    let seen = Rc::new(RefCell::new(Vec::new()));

    let (cell_clone, seen_clone) = (cell.clone(), seen.clone());
    let (_effect, batch) = runtime.collect_effects(|| {
        runtime.watch_effect(move |_| seen_clone.borrow_mut().push(cell_clone.get()))
    });

    cell.set(1);
    let ((), tags) = runtime.run_tracked(|| batch.subscribe_all());

    assert!(tags.is_empty());
    assert_eq!(*seen.borrow(), vec![0, 1]);
}

/// An effect keeps running while its handle is held and stops once dropped.
#[test]
fn effect_lives_as_long_as_its_handle() {
    let runtime = Runtime::new();
    let cell = runtime.signal(0);
    let (runs, bump) = counter();

    let cell_clone = cell.clone();
    let effect = runtime.watch_effect(move |_| {
        cell_clone.get();
        bump();
    });

    cell.set(1);
    runtime.flush();
    assert_eq!(runs.get(), 2);
    assert_eq!(cell.tag().subscriber_count(), 1);

    drop(effect);
    assert_eq!(cell.tag().subscriber_count(), 0);

    cell.set(2);
    runtime.flush();
    assert_eq!(runs.get(), 2);
}

/// Several writes in one turn produce one effect run.
#[test]
fn flush_coalesces_writes() {
    let runtime = Runtime::new();
    let a = runtime.signal(1);
    let b = runtime.signal(2);
    let c = runtime.signal(3);
    let sums = Rc::new(RefCell::new(Vec::new()));

    let (a2, b2, c2, sums2) = (a.clone(), b.clone(), c.clone(), sums.clone());
    let effect = runtime.watch_effect(move |_| {
        sums2.borrow_mut().push(a2.get() + b2.get() + c2.get());
    });

    a.set(10);
    b.set(20);
    c.set(30);
    assert_eq!(runtime.pending_count(), 3);

    assert_eq!(runtime.flush(), 1);
    assert_eq!(*sums.borrow(), vec![6, 60]);
    assert_eq!(effect.run_count(), 2);
}

/// Unsubscribing between the write and the flush suppresses the run.
#[test]
fn unsubscribe_before_flush_suppresses_run() {
    let runtime = Runtime::new();
    let cell = runtime.signal(0);
    let (runs, bump) = counter();

    let cell_clone = cell.clone();
    let effect = runtime.watch_effect(move |_| {
        cell_clone.get();
        bump();
    });

    cell.set(1);
    effect.unsubscribe();
    runtime.flush();
    assert_eq!(runs.get(), 1);
}

/// Every registered teardown fires exactly once: before each rerun, and
/// once more at disposal.
#[test]
fn teardowns_pair_with_runs() {
    let runtime = Runtime::new();
    let cell = runtime.signal(0);
    let (runs, bump_run) = counter();
    let (teardowns, bump_teardown) = counter();

    let cell_clone = cell.clone();
    let effect = runtime.watch_effect(move |on_invalidate| {
        cell_clone.get();
        bump_run();
        on_invalidate.register(bump_teardown.clone());
    });

    for value in 1..=4 {
        cell.set(value);
        runtime.flush();
        assert_eq!(teardowns.get(), runs.get() - 1);
    }

    // Resubscribing catches up on the write, so the flush that follows
    // finds nothing to do and keeps the pending teardown.
    cell.set(5);
    effect.unsubscribe();
    effect.subscribe();
    runtime.flush();
    assert_eq!(runs.get(), 6);
    assert_eq!(teardowns.get(), 5);

    effect.dispose();
    effect.dispose();
    assert_eq!(runs.get(), 6);
    assert_eq!(teardowns.get(), 6);
}

/// An effect that writes state read by another effect wakes it on the next
/// flush.
#[test]
fn effects_chain_across_flushes() {
    let runtime = Runtime::new();
    let source = runtime.signal(1);
    let mirror = runtime.signal(0);
    let seen = Rc::new(RefCell::new(Vec::new()));

    let (source2, mirror2) = (source.clone(), mirror.clone());
    let _copy = runtime.watch_effect(move |_| {
        let value = source2.get();
        mirror2.set(value);
    });

    let (mirror3, seen3) = (mirror.clone(), seen.clone());
    let _log = runtime.watch_effect(move |_| seen3.borrow_mut().push(mirror3.get()));

    source.set(2);
    assert_eq!(runtime.flush_until_idle(), Ok(2));
    assert_eq!(*seen.borrow(), vec![1, 2]);
}

/// An effect that re-dirties what it reads is reported instead of looping.
#[test]
fn runaway_effects_hit_the_flush_limit() {
    let runtime = Runtime::with_config(trellis_core::RuntimeConfig {
        max_flush_rounds: 5,
        ..Default::default()
    });
    let ticks = runtime.signal(0);
    let trigger = runtime.signal(0);

    let (ticks2, trigger2) = (ticks.clone(), trigger.clone());
    let _effect = runtime.watch_effect(move |_| {
        trigger2.get();
        increment(&ticks2);
    });

    let (ticks3, trigger3) = (ticks.clone(), trigger.clone());
    let _echo = runtime.watch_effect(move |_| {
        ticks3.get();
        increment(&trigger3);
    });

    trigger.set(1);
    assert_eq!(
        runtime.flush_until_idle(),
        Err(TrackingError::FlushLimitExceeded { rounds: 5 })
    );
}

fn increment(signal: &Signal<i32>) {
    signal.update(|v| v + 1);
}

/// Writing a value the running computation has read is rejected.
#[test]
fn cyclic_write_is_rejected() {
    let runtime = Runtime::new();
    let cell = runtime.signal(1);

    let cell_clone = cell.clone();
    let memo = runtime.memoize(move || {
        let value = cell_clone.get();
        cell_clone.try_set(value + 1)
    });

    assert_eq!(
        memo.get(),
        Err(TrackingError::CyclicDependency { tag: cell.id() })
    );
    assert_eq!(cell.get(), 1);
}

/// `derive` exposes a computation as a read-only cell.
#[test]
fn derive_scenario() {
    let runtime = Runtime::new();
    let cell = runtime.signal(0);

    let cell_clone = cell.clone();
    let double = runtime.derive(move || cell_clone.get() * 2);

    assert_eq!(double.current(), 0);
    cell.set(5);
    assert_eq!(double.current(), 10);
}

/// Serializing a tracked object inside a memo tracks every key and value.
#[test]
fn serialization_scenario() {
    let runtime = Runtime::new();
    let store: TrackedObject<String, i32> = runtime.tracked_object([("a".to_string(), 1)]);

    let store_clone = store.clone();
    let json = runtime.memoize(move || Rc::new(serde_json::to_string(&store_clone).unwrap()));

    let first = json.get();
    assert_eq!(*first, r#"{"a":1}"#);

    store.set("a".to_string(), 1);
    assert!(Rc::ptr_eq(&first, &json.get()));

    store.set("b".to_string(), 2);
    let second = json.get();
    assert_eq!(*second, r#"{"a":1,"b":2}"#);
    assert!(!Rc::ptr_eq(&first, &second));
}

/// Property views delegate to the store in both directions.
#[test]
fn property_refs_stay_linked() {
    let runtime = Runtime::new();
    let store: TrackedObject<&str, &str> =
        runtime.tracked_object([("greeting", "Hello"), ("target", "World")]);
    let refs = store.to_refs();

    let greeting = refs["greeting"].clone();
    let message = {
        let target = refs["target"].clone();
        let greeting = greeting.clone();
        runtime.derive(move || {
            format!("{} {}", greeting.get().unwrap_or(""), target.get().unwrap_or(""))
        })
    };

    assert_eq!(message.current(), "Hello World");
    greeting.set("Good night");
    assert_eq!(store.get(&"greeting"), Some("Good night"));
    assert_eq!(message.current(), "Good night World");

    store.set("target", "Moon");
    assert_eq!(message.current(), "Good night Moon");
}

/// A signal stored in an object keeps its identity through writes.
#[test]
fn stored_signal_is_shared() {
    let runtime = Runtime::new();
    let count = runtime.signal(0);
    let store: TrackedObject<&str, i32> = TrackedObject::new(&runtime);
    store.insert_signal("count", count.clone());

    let (runs, bump) = counter();
    let store_clone = store.clone();
    let _effect = runtime.watch_effect(move |_| {
        store_clone.get(&"count");
        bump();
    });

    count.set(1);
    runtime.flush();
    assert_eq!(runs.get(), 2);

    store.set("count", 2);
    assert_eq!(count.get(), 2);
    runtime.flush();
    assert_eq!(runs.get(), 3);
}

/// A failure while building a group of effects disposes the ones built so
/// far and leaves nothing subscribed.
#[test]
fn partial_construction_is_disposed() {
    let runtime = Runtime::new();
    let cell = runtime.signal(0);
    let (teardowns, bump) = counter();
    let (disposed, on_dispose) = counter();

    let cell_clone = cell.clone();
    let result: Result<((), EffectBatch), TrackingError> = runtime.try_collect_effects(|| {
        runtime.on_dispose(on_dispose)?;
        let _first = runtime.watch_effect(move |on_invalidate| {
            cell_clone.get();
            on_invalidate.register(bump.clone());
        });
        Err(TrackingError::OutOfScope {
            operation: "mount",
            requirement: "a host is attached",
        })
    });

    assert!(matches!(result, Err(TrackingError::OutOfScope { operation: "mount", .. })));
    assert_eq!(teardowns.get(), 1);
    assert_eq!(disposed.get(), 1);
    assert_eq!(cell.tag().subscriber_count(), 0);
}

/// A panic while collecting disposes the collected effects too.
#[test]
fn panic_while_collecting_disposes() {
    let runtime = Runtime::new();
    let (teardowns, bump) = counter();

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        runtime.collect_effects(|| {
            let _effect = runtime.watch_effect(move |on_invalidate| {
                on_invalidate.register(bump.clone());
            });
            panic!("mount failed");
        })
    }));

    assert!(result.is_err());
    assert_eq!(teardowns.get(), 1);
    assert!(!runtime.is_collecting());
}

/// An effect whose rerun panics stays subscribed to what it read first.
#[test]
fn failed_rerun_keeps_tags_read_before_the_panic() {
    let runtime = Runtime::new();
    let trigger = runtime.signal(0);
    let late = runtime.signal(0);
    let (attempts, bump) = counter();

    let (trigger_clone, late_clone) = (trigger.clone(), late.clone());
    let _effect = runtime.watch_effect(move |_| {
        bump();
        if trigger_clone.get() == 1 {
            late_clone.get();
            panic!("render failed");
        }
    });
    assert_eq!(late.tag().subscriber_count(), 0);

    trigger.set(1);
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| runtime.flush()));
    assert!(result.is_err());
    assert_eq!(attempts.get(), 2);
    assert_eq!(late.tag().subscriber_count(), 1);
    assert!(!runtime.is_tracking());

    late.set(1);
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| runtime.flush()));
    assert!(result.is_err());
    assert_eq!(attempts.get(), 3);
}

/// An observer reports staleness and leaves recomputation to its owner.
#[test]
fn observer_drives_rerender() {
    let runtime = Runtime::new();
    let name = runtime.signal("Preact");
    let (invalidations, bump) = counter();

    let name_clone = name.clone();
    let view = runtime.observe(move || format!("<p>Hello {}</p>", name_clone.get()), bump);

    assert_eq!(view.get(), "<p>Hello Preact</p>");
    name.set("World");
    runtime.flush();
    assert_eq!(invalidations.get(), 1);
    assert_eq!(view.get(), "<p>Hello World</p>");
}

/// A readable store is written only through the setter its updater got.
#[test]
fn readable_store_publishes_through_setter() {
    let runtime = Runtime::new();
    let setter = Rc::new(RefCell::new(None));

    let setter_clone = setter.clone();
    let status = runtime.readable("idle", move |s| *setter_clone.borrow_mut() = Some(s));

    let (runs, bump) = counter();
    let status_clone = status.clone();
    let _effect = runtime.watch_effect(move |_| {
        status_clone.current();
        bump();
    });

    setter.borrow().as_ref().unwrap().set("busy");
    runtime.flush();
    assert_eq!(status.current(), "busy");
    assert_eq!(runs.get(), 2);
}

/// Runtimes do not see each other's reads or writes.
#[test]
fn runtimes_are_independent() {
    let first = Runtime::new();
    let second = Runtime::new();
    let cell = first.signal(0);

    let ((), tags) = second.run_tracked(|| {
        cell.get();
    });
    assert!(tags.is_empty());

    cell.set(1);
    assert_eq!(first.revision(), 1);
    assert_eq!(second.revision(), 0);
}
