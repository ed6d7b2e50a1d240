use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::*;

#[test]
fn test_resolve_fires_observers_in_order() {
    let deferred = Deferred::<u32>::new();
    let seen = Arc::new(Mutex::new(vec![]));

    for tag in ["first", "second", "third"] {
        let seen2 = Arc::clone(&seen);
        deferred.on_success(move |v| seen2.lock().unwrap().push((tag, v)));
    }
    deferred.resolve(7);

    assert_eq!(
        *seen.lock().unwrap(),
        vec![("first", 7), ("second", 7), ("third", 7)]
    );
}

#[test]
fn test_observer_after_settlement_fires_immediately() {
    let deferred = Deferred::resolved("done".to_owned());
    let fired = Arc::new(AtomicUsize::new(0));

    let fired2 = Arc::clone(&fired);
    deferred.on_success(move |v| {
        assert_eq!(v, "done");
        fired2.fetch_add(1, Ordering::SeqCst);
    });

    // Synchronous: already incremented by the time on_success returns.
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn test_observers_fire_exactly_once() {
    let deferred = Deferred::<u32>::new();
    let fired = Arc::new(AtomicUsize::new(0));

    let fired2 = Arc::clone(&fired);
    deferred.on_success(move |_| {
        fired2.fetch_add(1, Ordering::SeqCst);
    });

    deferred.resolve(1);
    deferred.resolve(2);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn test_second_resolve_does_not_overwrite() {
    let deferred = Deferred::<u32>::new();
    deferred.resolve(1);
    deferred.resolve(2);

    let seen = Arc::new(Mutex::new(None));
    let seen2 = Arc::clone(&seen);
    deferred.on_success(move |v| *seen2.lock().unwrap() = Some(v));
    assert_eq!(*seen.lock().unwrap(), Some(1));
}

#[test]
fn test_reject_with_observer() {
    let deferred = Deferred::<u32>::new();
    let seen = Arc::new(Mutex::new(None));

    let seen2 = Arc::clone(&seen);
    deferred.on_failure(move |err| *seen2.lock().unwrap() = Some(err));

    let outcome = deferred.reject(Error::ErrConnectionClosed);
    assert!(outcome.is_ok());
    assert_eq!(*seen.lock().unwrap(), Some(Error::ErrConnectionClosed));
}

#[test]
fn test_unobserved_reject_propagates() {
    let deferred = Deferred::<u32>::new();
    let outcome = deferred.reject(Error::ErrConnectionClosed);
    assert_eq!(outcome, Err(Error::ErrConnectionClosed));
}

#[test]
fn test_reject_after_reject_is_noop() {
    let deferred = Deferred::<u32>::new();
    let fired = Arc::new(AtomicUsize::new(0));

    let fired2 = Arc::clone(&fired);
    deferred.on_failure(move |_| {
        fired2.fetch_add(1, Ordering::SeqCst);
    });

    assert!(deferred.reject(Error::ErrConnectionClosed).is_ok());
    // Second reject is absorbed even with no observers left.
    assert!(deferred.reject(Error::ErrNoTransportSlots).is_ok());
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn test_reject_after_resolve_is_noop() {
    let deferred = Deferred::<u32>::new();
    deferred.resolve(5);
    assert!(deferred.reject(Error::ErrConnectionClosed).is_ok());
    assert!(deferred.is_fulfilled());
}

#[test]
fn test_late_failure_observer_fires_immediately() {
    let deferred = Deferred::<u32>::rejected(Error::ErrNoTransportSlots);
    let seen = Arc::new(Mutex::new(None));

    let seen2 = Arc::clone(&seen);
    deferred.on_failure(move |err| *seen2.lock().unwrap() = Some(err));
    assert_eq!(*seen.lock().unwrap(), Some(Error::ErrNoTransportSlots));
}

#[test]
fn test_then_maps_value() {
    let deferred = Deferred::<u32>::new();
    let mapped = deferred.then(|v| Ok(v * 2));

    let seen = Arc::new(Mutex::new(None));
    let seen2 = Arc::clone(&seen);
    mapped.on_success(move |v| *seen2.lock().unwrap() = Some(v));

    deferred.resolve(21);
    assert_eq!(*seen.lock().unwrap(), Some(42));
}

#[test]
fn test_then_mapper_error_rejects_downstream() {
    let deferred = Deferred::<u32>::new();
    let mapped: Deferred<u32> = deferred.then(|_| Err(Error::ErrNoRemoteDescription));

    let seen = Arc::new(Mutex::new(None));
    let seen2 = Arc::clone(&seen);
    mapped.on_failure(move |err| *seen2.lock().unwrap() = Some(err));

    deferred.resolve(1);
    assert_eq!(*seen.lock().unwrap(), Some(Error::ErrNoRemoteDescription));
}

#[test]
fn test_then_forwards_failure() {
    let deferred = Deferred::<u32>::new();
    let mapped = deferred.then(|v| Ok(v + 1));

    let seen = Arc::new(Mutex::new(None));
    let seen2 = Arc::clone(&seen);
    mapped.on_failure(move |err| *seen2.lock().unwrap() = Some(err));

    assert!(deferred.reject(Error::ErrConnectionClosed).is_ok());
    assert_eq!(*seen.lock().unwrap(), Some(Error::ErrConnectionClosed));
}

#[test]
fn test_chain_forwards_settlement() {
    let upstream = Deferred::<u32>::new();
    let downstream = Deferred::<u32>::new();
    upstream.chain(&downstream);

    let seen = Arc::new(Mutex::new(None));
    let seen2 = Arc::clone(&seen);
    downstream.on_success(move |v| *seen2.lock().unwrap() = Some(v));

    upstream.resolve(9);
    assert_eq!(*seen.lock().unwrap(), Some(9));
}

#[test]
fn test_chain_forwards_rejection() {
    let upstream = Deferred::<u32>::new();
    let downstream = Deferred::<u32>::new();
    upstream.chain(&downstream);

    let seen = Arc::new(Mutex::new(None));
    let seen2 = Arc::clone(&seen);
    downstream.on_failure(move |err| *seen2.lock().unwrap() = Some(err));

    assert!(upstream.reject(Error::ErrConnectionClosed).is_ok());
    assert_eq!(*seen.lock().unwrap(), Some(Error::ErrConnectionClosed));
}

#[test]
fn test_observer_resolving_another_deferred_recurses() {
    let first = Deferred::<u32>::new();
    let second = Deferred::<u32>::new();

    let second2 = second.clone();
    first.on_success(move |v| second2.resolve(v + 1));

    let seen = Arc::new(Mutex::new(None));
    let seen2 = Arc::clone(&seen);
    second.on_success(move |v| *seen2.lock().unwrap() = Some(v));

    first.resolve(1);
    // Both settlements happened on the same stack.
    assert_eq!(*seen.lock().unwrap(), Some(2));
}

#[test]
fn test_is_pending() {
    let deferred = Deferred::<u32>::new();
    assert!(deferred.is_pending());
    deferred.resolve(0);
    assert!(!deferred.is_pending());
    assert!(deferred.is_fulfilled());
}
