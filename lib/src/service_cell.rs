//! Registration cell for kernel services.
//!
//! Lower crates declare a service as a struct of function pointers inside a
//! `ServiceCell`; the crate that owns the implementation registers it once
//! during boot. Calls before registration hit the declared fallback.

use core::sync::atomic::{AtomicPtr, Ordering};

pub struct ServiceCell<T: 'static> {
    current: AtomicPtr<T>,
    fallback: &'static T,
}

impl<T: 'static> ServiceCell<T> {
    pub const fn new(fallback: &'static T) -> Self {
        Self {
            current: AtomicPtr::new(core::ptr::null_mut()),
            fallback,
        }
    }

    /// Install the real implementation. The table must live for the rest of
    /// the kernel's lifetime (in practice: a `static`).
    pub fn register(&self, table: &'static T) {
        self.current
            .store(table as *const T as *mut T, Ordering::Release);
    }

    #[inline]
    pub fn get(&self) -> &'static T {
        let ptr = self.current.load(Ordering::Acquire);
        if ptr.is_null() {
            self.fallback
        } else {
            // SAFETY: register() only stores 'static references.
            unsafe { &*ptr }
        }
    }

    #[inline]
    pub fn is_registered(&self) -> bool {
        !self.current.load(Ordering::Acquire).is_null()
    }
}
