//! Reference-counted entry headers.
//!
//! An entry header produced by the reader is handed to caller code, which may
//! keep it across threads, while the session still uses it (for example as
//! the argument of a header write). [`EntryHandle`] makes that sharing
//! explicit: every party that needs the header calls
//! [`add_ref`](EntryHandle::add_ref) and later [`release`](EntryHandle::release).
//! The release that brings the count from one to zero disposes the
//! engine-side resource exactly once, after which the handle is permanently
//! disposed and further `add_ref` calls fail.
//!
//! A new handle starts at a count of zero. The creator must call `add_ref`
//! if the header is to outlive the call that created it.
//!
//! # Example
//!
//! ```
//! use oxiarc_core::{EntryHandle, EntryHeader};
//!
//! let handle = EntryHandle::new(EntryHeader::file("a.txt", 3), true);
//! let header = handle.add_ref()?;
//! assert_eq!(header.path, "a.txt");
//! handle.release()?;
//! assert!(handle.is_disposed());
//! assert!(handle.add_ref().is_err());
//! # Ok::<(), oxiarc_core::OxiArcError>(())
//! ```

use crate::engine::RawHeader;
use crate::entry::EntryHeader;
use crate::error::{OxiArcError, Result};
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// High bit of the state word: set once the handle has been disposed.
const DISPOSED: usize = 1 << (usize::BITS - 1);
/// Low bits of the state word: the reference count.
const COUNT_MASK: usize = !DISPOSED;

/// Callback that releases the engine-side resource behind a header.
pub type Disposer<T> = Box<dyn FnOnce(&T) + Send>;

struct Inner<T> {
    value: T,
    owning: bool,
    state: AtomicUsize,
    disposer: Mutex<Option<Disposer<T>>>,
}

/// A shared, atomically reference-counted entry header.
///
/// Cloning the handle shares the same count; it does not add a reference.
pub struct EntryHandle<T = EntryHeader> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for EntryHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync> EntryHandle<T> {
    /// Wrap a value with a reference count of zero.
    ///
    /// `owning` records whether this handle owns engine-side resources;
    /// only owning handles run their disposer.
    pub fn new(value: T, owning: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                value,
                owning,
                state: AtomicUsize::new(0),
                disposer: Mutex::new(None),
            }),
        }
    }

    /// Wrap a value together with the callback that frees its engine resource.
    pub fn with_disposer<F>(value: T, owning: bool, disposer: F) -> Self
    where
        F: FnOnce(&T) + Send + 'static,
    {
        let handle = Self::new(value, owning);
        if let Ok(mut slot) = handle.inner.disposer.lock() {
            *slot = Some(Box::new(disposer));
        }
        handle
    }

    /// Increment the count and return the header.
    ///
    /// # Errors
    ///
    /// Returns [`OxiArcError::AlreadyDisposed`] once the count has dropped to
    /// zero through [`release`](Self::release).
    pub fn add_ref(&self) -> Result<&T> {
        let mut current = self.inner.state.load(Ordering::Acquire);
        loop {
            if current & DISPOSED != 0 {
                return Err(OxiArcError::disposed("entry handle"));
            }
            if current & COUNT_MASK == COUNT_MASK {
                return Err(OxiArcError::protocol("add_ref", "reference count overflow"));
            }
            match self.inner.state.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(&self.inner.value),
                Err(actual) => current = actual,
            }
        }
    }

    /// Decrement the count, disposing the engine resource when it reaches zero.
    ///
    /// # Errors
    ///
    /// Returns [`OxiArcError::AlreadyDisposed`] on a disposed handle and
    /// [`OxiArcError::RefCountUnderflow`] if no reference is held.
    pub fn release(&self) -> Result<()> {
        let mut current = self.inner.state.load(Ordering::Acquire);
        loop {
            if current & DISPOSED != 0 {
                return Err(OxiArcError::disposed("entry handle"));
            }
            let count = current & COUNT_MASK;
            if count == 0 {
                return Err(OxiArcError::RefCountUnderflow);
            }
            let next = if count == 1 { DISPOSED } else { current - 1 };
            match self.inner.state.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    if next == DISPOSED {
                        self.dispose();
                    }
                    return Ok(());
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Add a reference and return a guard that releases it on drop.
    pub fn lease(&self) -> Result<HeaderLease<'_, T>> {
        self.add_ref()?;
        Ok(HeaderLease {
            handle: self,
            released: false,
        })
    }

    /// Borrow the value without touching the count.
    ///
    /// The value stays readable after disposal; only the engine-side
    /// resource is gone by then.
    pub fn value(&self) -> &T {
        &self.inner.value
    }

    /// Current reference count (zero once disposed).
    pub fn ref_count(&self) -> usize {
        self.inner.state.load(Ordering::Acquire) & COUNT_MASK
    }

    /// Whether the final release already happened.
    pub fn is_disposed(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) & DISPOSED != 0
    }

    /// Whether this handle owns engine-side resources.
    pub fn is_owning(&self) -> bool {
        self.inner.owning
    }

    /// Whether two handles share the same header.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn dispose(&self) {
        // Reached at most once: only the CAS that installs DISPOSED gets here.
        let disposer = match self.inner.disposer.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(disposer) = disposer {
            if self.inner.owning {
                disposer(&self.inner.value);
            }
        }
        tracing::trace!(owning = self.inner.owning, "entry handle disposed");
    }
}

impl EntryHandle<EntryHeader> {
    /// Wrap a header produced by an engine, keeping its release callback.
    pub fn from_raw(raw: RawHeader, owning: bool) -> Self {
        match raw.release {
            Some(release) => Self::with_disposer(raw.header, owning, release),
            None => Self::new(raw.header, owning),
        }
    }
}

impl<T> fmt::Debug for EntryHandle<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.load(Ordering::Acquire);
        f.debug_struct("EntryHandle")
            .field("value", &self.inner.value)
            .field("owning", &self.inner.owning)
            .field("ref_count", &(state & COUNT_MASK))
            .field("disposed", &(state & DISPOSED != 0))
            .finish()
    }
}

/// RAII reference on an [`EntryHandle`].
///
/// Dereferences to the header; releases the reference when dropped or when
/// [`release`](HeaderLease::release) is called.
pub struct HeaderLease<'a, T: Send + Sync = EntryHeader> {
    handle: &'a EntryHandle<T>,
    released: bool,
}

impl<T: Send + Sync> HeaderLease<'_, T> {
    /// Release the reference now, reporting any error.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.handle.release()
    }
}

impl<T: Send + Sync> Deref for HeaderLease<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.handle.inner.value
    }
}

impl<T: Send + Sync> Drop for HeaderLease<'_, T> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(err) = self.handle.release() {
                tracing::warn!(error = %err, "failed to release header lease");
            }
        }
    }
}
