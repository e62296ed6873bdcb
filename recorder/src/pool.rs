//! Object pooling for hot-path allocation avoidance
//!
//! [`ObjectPool`] is a bounded free list shared between threads. Instances
//! leave the pool wrapped in a [`Pooled`] handle and go back, cleared, when
//! the handle is dropped. [`StackPool`] interns call-stack copies so equal
//! stacks share one allocation.

use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::element::ElementId;

/// Default number of idle instances kept by a pool
pub const DEFAULT_POOL_SIZE: usize = 500;

/// Types that can be recycled by an [`ObjectPool`]
pub trait Poolable: Send + 'static {
    /// Creates a fresh instance
    fn create() -> Self;

    /// Resets the instance before it goes back to the pool
    fn clear(&mut self);
}

struct PoolInner<T> {
    idle: Mutex<Vec<T>>,
    max_size: usize,
}

/// A bounded, thread-safe free list
pub struct ObjectPool<T: Poolable> {
    inner: Arc<PoolInner<T>>,
}

impl<T: Poolable> Clone for ObjectPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Poolable> Default for ObjectPool<T> {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE)
    }
}

impl<T: Poolable> ObjectPool<T> {
    /// Creates a pool keeping at most `max_size` idle instances
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(Vec::new()),
                max_size,
            }),
        }
    }

    /// Takes an instance from the pool or creates one
    pub fn acquire(&self) -> Pooled<T> {
        let value = self.inner.idle.lock().pop().unwrap_or_else(T::create);
        Pooled {
            value: Some(value),
            pool: Arc::clone(&self.inner),
        }
    }

    /// Number of idle instances
    pub fn idle(&self) -> usize {
        self.inner.idle.lock().len()
    }

    pub fn max_size(&self) -> usize {
        self.inner.max_size
    }
}

/// An instance borrowed from an [`ObjectPool`]
pub struct Pooled<T: Poolable> {
    value: Option<T>,
    pool: Arc<PoolInner<T>>,
}

impl<T: Poolable> Pooled<T> {
    /// Detaches the instance from the pool
    pub fn into_inner(mut self) -> T {
        match self.value.take() {
            Some(value) => value,
            None => T::create(),
        }
    }
}

impl<T: Poolable> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.value {
            Some(value) => value,
            None => unreachable!("pooled value taken before drop"),
        }
    }
}

impl<T: Poolable> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.value {
            Some(value) => value,
            None => unreachable!("pooled value taken before drop"),
        }
    }
}

impl<T: Poolable> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(mut value) = self.value.take() {
            value.clear();
            let mut idle = self.pool.idle.lock();
            if idle.len() < self.pool.max_size {
                idle.push(value);
            }
        }
    }
}

impl<T: Poolable + fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pooled").field(&**self).finish()
    }
}

impl<T: Poolable + Clone> Clone for Pooled<T> {
    fn clone(&self) -> Self {
        let mut copy = ObjectPool {
            inner: Arc::clone(&self.pool),
        }
        .acquire();
        *copy = (**self).clone();
        copy
    }
}

impl<T: Poolable + PartialEq> PartialEq for Pooled<T> {
    fn eq(&self, other: &Self) -> bool {
        **self == **other
    }
}

/// A shared, immutable copy of a call stack
pub type StackCopy = Arc<[ElementId]>;

/// Interns stack copies so that equal stacks share one allocation
#[derive(Debug, Default)]
pub struct StackPool {
    stacks: HashMap<Vec<ElementId>, StackCopy>,
}

impl StackPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the shared copy of `stack`, creating it on first use
    pub fn acquire(&mut self, stack: &[ElementId]) -> StackCopy {
        if let Some(copy) = self.stacks.get(stack) {
            return Arc::clone(copy);
        }
        let copy: StackCopy = Arc::from(stack);
        self.stacks.insert(stack.to_vec(), Arc::clone(&copy));
        copy
    }

    /// Gives a copy back; the interned entry goes away with its last user
    pub fn release(&mut self, copy: StackCopy) {
        // the map holds one reference, `copy` the other
        if Arc::strong_count(&copy) <= 2 {
            self.stacks.remove(&copy[..]);
        }
    }

    /// Number of distinct stacks currently interned
    pub fn len(&self) -> usize {
        self.stacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }

    pub fn clear(&mut self) {
        self.stacks.clear();
    }
}
