//! Weak-reference reuse for scaffold accessors.
//!
//! [`WeakReuseCell<V>`] never keeps its value alive. It remembers a [`Weak`] handle to
//! the last value it produced and hands that value out again for as long as somebody
//! else still owns it. Once every strong handle is gone, the next call produces a
//! fresh value and starts tracking that one instead.

#[cfg(feature = "tracing")]
use core::any::type_name;
use core::cell::UnsafeCell;
use core::fmt;
#[cfg(any(feature = "async-tokio", feature = "async-tokio-mt"))]
use core::future::Future;
use std::sync::{Arc, Weak};

use crate::state::{CellGuard, CellLock};

/// A cell that shares its value while it is alive and recreates it once it is not.
///
/// This is the "shared" factory of a scaffold. `V` may be unsized, so trait objects
/// work as long as the producer returns the `Arc` already coerced:
///
/// ```rust
/// use std::sync::Arc;
/// use scaffold_cell::WeakReuseCell;
///
/// trait Session: Send + Sync {}
/// struct DbSession;
/// impl Session for DbSession {}
///
/// let cell: WeakReuseCell<dyn Session> = WeakReuseCell::new();
/// let first = cell.value(|| Arc::new(DbSession));
/// let again = cell.value(|| Arc::new(DbSession));
/// assert!(Arc::ptr_eq(&first, &again));
///
/// drop((first, again));
/// assert!(!cell.is_live());
/// ```
///
/// The whole check-or-produce sequence runs under the cell's lock, so concurrent
/// callers on an empty cell get one production between them, never one each.
///
/// # Reentrancy
///
/// A producer that calls back into the same cell deadlocks, see
/// [`ExactlyOnceCell`](crate::ExactlyOnceCell#reentrancy).
pub struct WeakReuseCell<V: ?Sized> {
   handle: UnsafeCell<Option<Weak<V>>>,
   lock: CellLock,
}

impl<V: ?Sized> WeakReuseCell<V> {
   /// Creates a cell that has never produced anything.
   #[inline]
   #[must_use]
   pub const fn new() -> Self {
      Self {
         handle: UnsafeCell::new(None),
         lock: CellLock::new(),
      }
   }

   /// Resolves the stored handle while `_guard` is held.
   #[inline]
   fn resolve(&self, _guard: &CellGuard<'_>) -> Option<Arc<V>> {
      // SAFETY: the handle is only touched while the cell's lock is held, which `_guard` proves.
      let handle = unsafe { &*self.handle.get() };
      handle.as_ref().and_then(Weak::upgrade)
   }

   /// Starts tracking `value` while `_guard` is held.
   #[inline]
   fn track(&self, _guard: &CellGuard<'_>, value: &Arc<V>) {
      // SAFETY: see `resolve`.
      #[cfg(feature = "tracing")]
      if unsafe { (*self.handle.get()).is_some() } {
         tracing::trace!(dependency = type_name::<V>(), "shared dependency was reclaimed, recreated");
      }
      // SAFETY: see `resolve`.
      unsafe { *self.handle.get() = Some(Arc::downgrade(value)) };
   }

   /// Returns the live value, if some strong handle to it still exists. Never produces.
   ///
   /// Blocks while another caller is producing.
   pub fn get(&self) -> Option<Arc<V>> {
      let guard = self.lock.acquire();
      self.resolve(&guard)
   }

   /// Whether the last produced value is still alive.
   #[inline]
   pub fn is_live(&self) -> bool {
      self.get().is_some()
   }

   /// Returns the live value, or runs `producer` and tracks what it returns.
   ///
   /// While any strong handle to the previous result exists, `producer` is not called.
   pub fn value<F>(&self, producer: F) -> Arc<V>
   where
      F: FnOnce() -> Arc<V>,
   {
      let guard = self.lock.acquire();
      if let Some(live) = self.resolve(&guard) {
         return live;
      }
      #[cfg(feature = "tracing")]
      tracing::trace!(dependency = type_name::<V>(), "producing shared dependency");
      let value = producer();
      self.track(&guard, &value);
      value
   }

   /// Like [`value`](Self::value) with a fallible producer.
   ///
   /// On error the previous handle is left untouched and the error is returned as-is.
   pub fn try_value<F, E>(&self, producer: F) -> Result<Arc<V>, E>
   where
      F: FnOnce() -> Result<Arc<V>, E>,
   {
      let guard = self.lock.acquire();
      if let Some(live) = self.resolve(&guard) {
         return Ok(live);
      }
      #[cfg(feature = "tracing")]
      tracing::trace!(dependency = type_name::<V>(), "producing shared dependency");
      let value = producer().inspect_err(|_| {
         #[cfg(feature = "tracing")]
         tracing::debug!(dependency = type_name::<V>(), "shared producer failed");
      })?;
      self.track(&guard, &value);
      Ok(value)
   }

   /// Like [`value`](Self::value) with an async producer.
   #[cfg(any(feature = "async-tokio", feature = "async-tokio-mt"))]
   pub async fn value_async<F, Fut>(&self, producer: F) -> Arc<V>
   where
      F: FnOnce() -> Fut,
      Fut: Future<Output = Arc<V>>,
   {
      let guard = self.lock.acquire_async().await;
      if let Some(live) = self.resolve(&guard) {
         return live;
      }
      #[cfg(feature = "tracing")]
      tracing::trace!(dependency = type_name::<V>(), "producing shared dependency");
      let value = producer().await;
      self.track(&guard, &value);
      value
   }

   /// Like [`try_value`](Self::try_value) with an async producer.
   #[cfg(any(feature = "async-tokio", feature = "async-tokio-mt"))]
   pub async fn try_value_async<F, Fut, E>(&self, producer: F) -> Result<Arc<V>, E>
   where
      F: FnOnce() -> Fut,
      Fut: Future<Output = Result<Arc<V>, E>>,
   {
      let guard = self.lock.acquire_async().await;
      if let Some(live) = self.resolve(&guard) {
         return Ok(live);
      }
      #[cfg(feature = "tracing")]
      tracing::trace!(dependency = type_name::<V>(), "producing shared dependency");
      let value = producer().await.inspect_err(|_| {
         #[cfg(feature = "tracing")]
         tracing::debug!(dependency = type_name::<V>(), "shared producer failed");
      })?;
      self.track(&guard, &value);
      Ok(value)
   }
}

// SAFETY: the handle is only read or written under the lock. Resolving it hands out
// `Arc<V>` on whichever thread asks, which is sound exactly when `Arc<V>` is Send + Sync.
unsafe impl<V: ?Sized + Send + Sync> Sync for WeakReuseCell<V> {}
// SAFETY: `Weak<V>` is Send under the same bounds.
unsafe impl<V: ?Sized + Send + Sync> Send for WeakReuseCell<V> {}

impl<V: ?Sized> Default for WeakReuseCell<V> {
   #[inline]
   fn default() -> Self {
      Self::new()
   }
}

impl<V: ?Sized + fmt::Debug> fmt::Debug for WeakReuseCell<V> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let mut d = f.debug_tuple("WeakReuseCell");
      // try_acquire so formatting from inside a producer can't deadlock
      match self.lock.try_acquire() {
         Some(guard) => match self.resolve(&guard) {
            Some(live) => d.field(&live),
            None => d.field(&format_args!("<empty>")),
         },
         None => d.field(&format_args!("<locked>")),
      };
      d.finish()
   }
}
