//! Fixed-capacity object pool.
//!
//! Objects are allocated lazily, one per `acquire`, until the capacity is
//! reached; the pool never shrinks. Released objects sit on a free list and
//! are handed out again without running the constructor a second time, so
//! whoever takes an object must fully overwrite it before reading it.
//!
//! [`ObjectPool`] is the single-owner core. [`SharedPool`] wraps it in a
//! critical-section mutex so the acceptor, dispatcher and programmer threads
//! can draw from the same pool, and hands out [`Pooled`] guards that return
//! their object on drop.

use core::cell::RefCell;
use core::ops::{Deref, DerefMut};
use std::sync::Arc;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

use crate::error::PoolError;

/// Runs once on every object when it is first allocated.
pub type Constructor<T> = fn(&mut T);

pub struct ObjectPool<T, const N: usize> {
    constructor: Option<Constructor<T>>,
    free: heapless::Vec<Box<T>, N>,
    size: usize,
}

impl<T: Default, const N: usize> ObjectPool<T, N> {
    pub const fn new() -> Self {
        Self {
            constructor: None,
            free: heapless::Vec::new(),
            size: 0,
        }
    }

    pub const fn with_constructor(constructor: Constructor<T>) -> Self {
        Self {
            constructor: Some(constructor),
            free: heapless::Vec::new(),
            size: 0,
        }
    }

    /// Take an object: a free one if any, else a fresh allocation.
    ///
    /// A reused object keeps whatever state its last holder left in it.
    pub fn acquire(&mut self) -> Result<Box<T>, PoolError> {
        if let Some(obj) = self.free.pop() {
            return Ok(obj);
        }
        if self.size >= N {
            return Err(PoolError::Exhausted);
        }
        let mut obj = Box::<T>::default();
        if let Some(ctor) = self.constructor {
            ctor(&mut obj);
        }
        self.size += 1;
        Ok(obj)
    }

    /// Put an object back on the free list.
    ///
    /// Fails with [`PoolError::AlreadyFull`] when every allocated object is
    /// already free; the rejected object is dropped.
    pub fn release(&mut self, obj: Box<T>) -> Result<(), PoolError> {
        if self.free.len() >= self.size {
            return Err(PoolError::AlreadyFull);
        }
        self.free.push(obj).map_err(|_| PoolError::AlreadyFull)
    }

    /// Objects allocated so far.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Objects that can still be handed out (free plus not yet allocated).
    pub fn available(&self) -> usize {
        self.free.len() + (N - self.size)
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<T: Default, const N: usize> Default for ObjectPool<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Shared pool with RAII handles
// ---------------------------------------------------------------------------

pub struct SharedPool<T, const N: usize> {
    inner: Mutex<CriticalSectionRawMutex, RefCell<ObjectPool<T, N>>>,
}

impl<T: Default, const N: usize> SharedPool<T, N> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(RefCell::new(ObjectPool::new())),
        })
    }

    pub fn with_constructor(constructor: Constructor<T>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(RefCell::new(ObjectPool::with_constructor(constructor))),
        })
    }

    /// Take an object; it goes back to this pool when the guard drops.
    pub fn acquire(self: &Arc<Self>) -> Result<Pooled<T, N>, PoolError> {
        let obj = self.inner.lock(|p| p.borrow_mut().acquire())?;
        Ok(Pooled {
            obj: Some(obj),
            pool: Arc::clone(self),
        })
    }

    pub fn size(&self) -> usize {
        self.inner.lock(|p| p.borrow().size())
    }

    pub fn free_count(&self) -> usize {
        self.inner.lock(|p| p.borrow().free_count())
    }

    pub fn available(&self) -> usize {
        self.inner.lock(|p| p.borrow().available())
    }

    /// Objects currently held by some guard.
    pub fn in_use(&self) -> usize {
        self.inner.lock(|p| {
            let p = p.borrow();
            p.size() - p.free_count()
        })
    }

    fn give_back(&self, obj: Box<T>) {
        // A guard is the only holder of its object, so the free list always
        // has room for it.
        let _ = self.inner.lock(|p| p.borrow_mut().release(obj));
    }
}

/// Exclusive handle to a pooled object.
pub struct Pooled<T: Default, const N: usize> {
    obj: Option<Box<T>>,
    pool: Arc<SharedPool<T, N>>,
}

impl<T: Default, const N: usize> Deref for Pooled<T, N> {
    type Target = T;

    fn deref(&self) -> &T {
        // `obj` is only taken in `drop`.
        self.obj.as_deref().unwrap_or_else(|| unreachable!())
    }
}

impl<T: Default, const N: usize> DerefMut for Pooled<T, N> {
    fn deref_mut(&mut self) -> &mut T {
        self.obj.as_deref_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<T: Default, const N: usize> Drop for Pooled<T, N> {
    fn drop(&mut self) {
        if let Some(obj) = self.obj.take() {
            self.pool.give_back(obj);
        }
    }
}

impl<T: Default + core::fmt::Debug, const N: usize> core::fmt::Debug for Pooled<T, N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("Pooled").field(&**self).finish()
    }
}
