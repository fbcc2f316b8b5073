//! Revocation handles.
//!
//! A [`Supply`] represents something that is "on" until it is cut off.
//! Everything a provider registers hangs off a supply, and cutting the
//! supply reverts it. Supplies chain: a dependent supply is cut whenever
//! the supply it [`needs`](Supply::needs) is cut.
//!
//! # Example
//!
//! ```
//! use strata_values::Supply;
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! let parent = Supply::new();
//! let child = parent.derive();
//! let calls = Arc::new(AtomicUsize::new(0));
//!
//! let counter = Arc::clone(&calls);
//! child.when_off(move || {
//!     counter.fetch_add(1, Ordering::SeqCst);
//! });
//!
//! parent.off();
//! parent.off();
//! assert!(child.is_off());
//! assert_eq!(calls.load(Ordering::SeqCst), 1);
//! ```

use core::fmt;
use parking_lot::Mutex;
use std::sync::Arc;

type OffCallback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct SupplyState {
    off: bool,
    callbacks: Vec<OffCallback>,
}

/// A cheaply cloneable revocation handle.
///
/// Clones share state: cutting any clone cuts all of them.
#[derive(Clone, Default)]
pub struct Supply {
    inner: Arc<Mutex<SupplyState>>,
}

impl Supply {
    /// Creates a supply that is on.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a supply that is already off.
    #[must_use]
    pub fn off_already() -> Self {
        let supply = Self::new();
        supply.off();
        supply
    }

    /// Returns `true` once the supply has been cut.
    #[must_use]
    pub fn is_off(&self) -> bool {
        self.inner.lock().off
    }

    /// Cuts the supply.
    ///
    /// Registered callbacks run once, in registration order, outside the
    /// internal lock. Subsequent calls do nothing.
    pub fn off(&self) {
        let callbacks = {
            let mut state = self.inner.lock();
            if state.off {
                return;
            }
            state.off = true;
            core::mem::take(&mut state.callbacks)
        };
        for callback in callbacks {
            callback();
        }
    }

    /// Registers a callback to run when the supply is cut.
    ///
    /// Runs the callback immediately when the supply is already off.
    pub fn when_off(&self, callback: impl FnOnce() + Send + 'static) -> &Self {
        let mut state = self.inner.lock();
        if state.off {
            drop(state);
            callback();
        } else {
            state.callbacks.push(Box::new(callback));
        }
        self
    }

    /// Makes this supply depend on `other`: cutting `other` cuts `self`.
    ///
    /// `other` keeps the dependent alive until it is cut, so dropping every
    /// handle to `self` does not detach it.
    pub fn needs(&self, other: &Supply) -> &Self {
        let dependent = self.clone();
        other.when_off(move || dependent.off());
        self
    }

    /// Creates a new supply that is cut together with this one.
    #[must_use]
    pub fn derive(&self) -> Supply {
        let derived = Supply::new();
        derived.needs(self);
        derived
    }

    /// Returns `true` if both handles refer to the same supply.
    #[must_use]
    pub fn same_as(&self, other: &Supply) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Supply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supply").field("off", &self.is_off()).finish()
    }
}
