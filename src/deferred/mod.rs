#[cfg(test)]
mod deferred_test;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};

enum State<T> {
    Pending,
    Fulfilled(T),
    Failed(Error),
}

struct Inner<T> {
    state: State<T>,
    on_success: Vec<Box<dyn FnOnce(T) + Send>>,
    on_failure: Vec<Box<dyn FnOnce(Error) + Send>>,
}

/// Deferred is a single-assignment asynchronous result with chainable
/// success/failure observers.
///
/// Observers run synchronously on the settling call's stack, in
/// registration order. Once settled the outcome is retained, so observers
/// registered late still fire immediately. Settlement happens at most once:
/// a second resolve is ignored, a reject after any settlement is a no-op.
pub struct Deferred<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Deferred {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> Default for Deferred<T> {
    fn default() -> Self {
        Deferred::new()
    }
}

impl<T: Clone + Send + 'static> Deferred<T> {
    pub fn new() -> Self {
        Deferred {
            inner: Arc::new(Mutex::new(Inner {
                state: State::Pending,
                on_success: vec![],
                on_failure: vec![],
            })),
        }
    }

    /// Constructs an already-fulfilled instance.
    pub fn resolved(value: T) -> Self {
        Deferred {
            inner: Arc::new(Mutex::new(Inner {
                state: State::Fulfilled(value),
                on_success: vec![],
                on_failure: vec![],
            })),
        }
    }

    /// Constructs an already-failed instance.
    pub fn rejected(error: Error) -> Self {
        Deferred {
            inner: Arc::new(Mutex::new(Inner {
                state: State::Failed(error),
                on_success: vec![],
                on_failure: vec![],
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.lock().state, State::Pending)
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(self.lock().state, State::Fulfilled(_))
    }

    /// Transitions to Fulfilled and invokes every pending success observer
    /// with the value, in registration order. Both observer lists are then
    /// cleared. Ignored if already settled.
    pub fn resolve(&self, value: T) {
        let callbacks = {
            let mut inner = self.lock();
            if !matches!(inner.state, State::Pending) {
                log::warn!("resolve on a settled deferred ignored");
                return;
            }
            inner.state = State::Fulfilled(value.clone());
            inner.on_failure.clear();
            std::mem::take(&mut inner.on_success)
        };
        for callback in callbacks {
            callback(value.clone());
        }
    }

    /// Transitions to Failed and invokes every pending failure observer.
    /// A no-op if already settled. Returns `Err(error)` when no failure
    /// observer was registered, so an unobserved failure surfaces at the
    /// call site instead of vanishing.
    pub fn reject(&self, error: Error) -> Result<()> {
        let callbacks = {
            let mut inner = self.lock();
            match inner.state {
                State::Pending => {}
                State::Failed(_) => return Ok(()),
                State::Fulfilled(_) => {
                    log::warn!("reject on a fulfilled deferred ignored: {error}");
                    return Ok(());
                }
            }
            inner.state = State::Failed(error.clone());
            inner.on_success.clear();
            std::mem::take(&mut inner.on_failure)
        };
        if callbacks.is_empty() {
            return Err(error);
        }
        for callback in callbacks {
            callback(error.clone());
        }
        Ok(())
    }

    /// Registers a success observer. If already fulfilled, the observer is
    /// invoked immediately on the caller's stack with a clone of the stored
    /// value.
    pub fn on_success<F>(&self, f: F)
    where
        F: FnOnce(T) + Send + 'static,
    {
        let immediate = {
            let mut inner = self.lock();
            match &inner.state {
                State::Pending => {
                    inner.on_success.push(Box::new(f));
                    return;
                }
                State::Fulfilled(value) => Some(value.clone()),
                State::Failed(_) => None,
            }
        };
        if let Some(value) = immediate {
            f(value);
        }
    }

    /// Registers a failure observer. If already failed, the observer is
    /// invoked immediately on the caller's stack with a clone of the stored
    /// error.
    pub fn on_failure<F>(&self, f: F)
    where
        F: FnOnce(Error) + Send + 'static,
    {
        let immediate = {
            let mut inner = self.lock();
            match &inner.state {
                State::Pending => {
                    inner.on_failure.push(Box::new(f));
                    return;
                }
                State::Failed(error) => Some(error.clone()),
                State::Fulfilled(_) => None,
            }
        };
        if let Some(error) = immediate {
            f(error);
        }
    }

    /// Derives a downstream deferred. On fulfillment, `map` runs and its
    /// `Ok` resolves the downstream; its `Err` rejects it. A failure of this
    /// deferred forwards to the downstream unchanged.
    pub fn then<U, F>(&self, map: F) -> Deferred<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        let downstream = Deferred::new();

        let resolve_side = downstream.clone();
        self.on_success(move |value| match map(value) {
            Ok(mapped) => resolve_side.resolve(mapped),
            Err(err) => {
                if let Err(err) = resolve_side.reject(err) {
                    log::error!("unhandled rejection: {err}");
                }
            }
        });

        let reject_side = downstream.clone();
        self.on_failure(move |err| {
            if let Err(err) = reject_side.reject(err) {
                log::error!("unhandled rejection: {err}");
            }
        });

        downstream
    }

    /// Wires this deferred's eventual settlement into an existing deferred
    /// of the same type.
    pub fn chain(&self, other: &Deferred<T>) {
        let resolve_side = other.clone();
        self.on_success(move |value| resolve_side.resolve(value));

        let reject_side = other.clone();
        self.on_failure(move |err| {
            if let Err(err) = reject_side.reject(err) {
                log::error!("unhandled rejection: {err}");
            }
        });
    }
}
