//! Exactly-once caching for scaffold accessors.
//!
//! [`ExactlyOnceCell<V>`] strongly owns the value its producer returns and hands out
//! that same value for the rest of its life. Reads of a populated cell are a single
//! atomic load; only the first access (and anyone racing it) goes through the lock.

#[cfg(feature = "tracing")]
use core::any::type_name;
use core::cell::UnsafeCell;
#[cfg(any(feature = "async-tokio", feature = "async-tokio-mt"))]
use core::future::Future;
use core::sync::atomic::Ordering;
use core::{fmt, mem};

use crate::state::CellLock;

/// A cell whose producer runs at most once, no matter how many threads race it.
///
/// This is the "single" factory of a scaffold: one instance per accessor per scaffold,
/// with the accessor body handed to [`value`](Self::value) as the producer.
///
/// ```rust
/// use scaffold_cell::ExactlyOnceCell;
///
/// struct Config { url: String }
///
/// struct AppScaffold {
///    config: ExactlyOnceCell<Config>,
/// }
///
/// impl AppScaffold {
///    fn config(&self) -> &Config {
///       self.config.value(|| Config { url: "postgres://localhost".into() })
///    }
/// }
///
/// let scaffold = AppScaffold { config: ExactlyOnceCell::new() };
/// assert!(std::ptr::eq(scaffold.config(), scaffold.config()));
/// ```
///
/// # Producer failure
///
/// If the producer panics, or [`try_value`](Self::try_value) gets an `Err`, the lock is
/// released and the cell stays empty. The next caller runs its own producer.
///
/// # Reentrancy
///
/// The lock is held while the producer runs. A producer that (directly or through
/// other accessors) calls `value` on the same cell deadlocks. Producers should also
/// avoid blocking on another cell that is being populated by a thread waiting on this one.
pub struct ExactlyOnceCell<V> {
   value: UnsafeCell<mem::MaybeUninit<V>>,
   lock: CellLock,
}

impl<V> ExactlyOnceCell<V> {
   /// Creates an empty cell.
   #[inline]
   #[must_use]
   pub const fn new() -> Self {
      Self {
         lock: CellLock::new(),
         value: UnsafeCell::new(mem::MaybeUninit::uninit()),
      }
   }

   /// Creates a cell that is already populated with `value`.
   #[inline]
   #[must_use]
   pub const fn with_value(value: V) -> Self {
      Self {
         lock: CellLock::done(),
         value: UnsafeCell::new(mem::MaybeUninit::new(value)),
      }
   }

   /// Whether a producer has completed. Never blocks.
   #[inline]
   pub fn is_populated(&self) -> bool {
      self.lock.is_done(Ordering::Acquire)
   }

   /// Returns the cached value without producing one. Never blocks.
   #[inline]
   pub fn get(&self) -> Option<&V> {
      if self.is_populated() {
         // SAFETY: DONE was observed with Acquire, so the write is visible and final.
         Some(unsafe { self.get_unchecked() })
      } else {
         None
      }
   }

   /// Mutable access to the cached value, if any.
   #[inline]
   pub fn get_mut(&mut self) -> Option<&mut V> {
      if self.is_populated() {
         // SAFETY: populated and we hold `&mut self`.
         Some(unsafe { self.value.get_mut().assume_init_mut() })
      } else {
         None
      }
   }

   /// # Safety
   ///
   /// The cell must be populated.
   #[inline]
   unsafe fn get_unchecked(&self) -> &V {
      debug_assert!(self.is_populated(), "get_unchecked on an empty ExactlyOnceCell");
      (*self.value.get()).assume_init_ref()
   }

   /// Returns the cached value, running `producer` first if the cell is empty.
   ///
   /// Concurrent first callers block until the single producing call finishes and then
   /// all observe its result.
   ///
   /// Once the cell is populated this never touches the lock: the value can no longer
   /// change, so a single Acquire load of the lock word is enough to hand it out.
   #[inline]
   pub fn value<F>(&self, producer: F) -> &V
   where
      F: FnOnce() -> V,
   {
      if let Some(value) = self.get() {
         return value;
      }
      self.produce(producer);
      // SAFETY: `produce` only returns once the cell is DONE.
      unsafe { self.get_unchecked() }
   }

   /// Like [`value`](Self::value) with a fallible producer.
   ///
   /// The producer's error is returned as-is and the cell stays empty.
   pub fn try_value<F, E>(&self, producer: F) -> Result<&V, E>
   where
      F: FnOnce() -> Result<V, E>,
   {
      if let Some(value) = self.get() {
         return Ok(value);
      }
      self.try_produce(producer)?;
      // SAFETY: `try_produce` returned Ok, so the cell is DONE.
      Ok(unsafe { self.get_unchecked() })
   }

   /// Like [`value`](Self::value) with an async producer.
   #[cfg(any(feature = "async-tokio", feature = "async-tokio-mt"))]
   #[inline]
   pub async fn value_async<F, Fut>(&self, producer: F) -> &V
   where
      F: FnOnce() -> Fut,
      Fut: Future<Output = V>,
   {
      if let Some(value) = self.get() {
         return value;
      }
      self.produce_async(producer).await;
      // SAFETY: `produce_async` only returns once the cell is DONE.
      unsafe { self.get_unchecked() }
   }

   /// Like [`try_value`](Self::try_value) with an async producer.
   #[cfg(any(feature = "async-tokio", feature = "async-tokio-mt"))]
   pub async fn try_value_async<F, Fut, E>(&self, producer: F) -> Result<&V, E>
   where
      F: FnOnce() -> Fut,
      Fut: Future<Output = Result<V, E>>,
   {
      if let Some(value) = self.get() {
         return Ok(value);
      }
      self.try_produce_async(producer).await?;
      // SAFETY: `try_produce_async` returned Ok, so the cell is DONE.
      Ok(unsafe { self.get_unchecked() })
   }

   /// Empties the cell, returning the value it held.
   #[inline]
   pub fn take(&mut self) -> Option<V> {
      if self.lock.release() {
         // SAFETY: it was DONE, and the word now says empty so it won't be read or dropped again.
         Some(unsafe { self.value.get_mut().assume_init_read() })
      } else {
         None
      }
   }

   /// Consumes the cell, returning the value it held.
   #[inline]
   pub fn into_inner(mut self) -> Option<V> {
      self.take()
   }

   #[cold]
   fn produce<F>(&self, producer: F)
   where
      F: FnOnce() -> V,
   {
      let Some(guard) = self.lock.lock() else {
         return;
      };
      #[cfg(feature = "tracing")]
      tracing::trace!(dependency = type_name::<V>(), "producing single dependency");
      // SAFETY: we hold the lock and the cell is not DONE.
      unsafe { (*self.value.get()).write(producer()) };
      guard.commit();
   }

   #[cold]
   fn try_produce<F, E>(&self, producer: F) -> Result<(), E>
   where
      F: FnOnce() -> Result<V, E>,
   {
      let Some(guard) = self.lock.lock() else {
         return Ok(());
      };
      #[cfg(feature = "tracing")]
      tracing::trace!(dependency = type_name::<V>(), "producing single dependency");
      let value = producer().inspect_err(|_| {
         #[cfg(feature = "tracing")]
         tracing::debug!(dependency = type_name::<V>(), "single producer failed, cell left empty");
      })?;
      // SAFETY: we hold the lock and the cell is not DONE.
      unsafe { (*self.value.get()).write(value) };
      guard.commit();
      Ok(())
   }

   #[cfg(any(feature = "async-tokio", feature = "async-tokio-mt"))]
   #[cold]
   async fn produce_async<F, Fut>(&self, producer: F)
   where
      F: FnOnce() -> Fut,
      Fut: Future<Output = V>,
   {
      let Some(guard) = self.lock.lock_async().await else {
         return;
      };
      #[cfg(feature = "tracing")]
      tracing::trace!(dependency = type_name::<V>(), "producing single dependency");
      let value = producer().await;
      // SAFETY: we hold the lock and the cell is not DONE.
      unsafe { (*self.value.get()).write(value) };
      guard.commit();
   }

   #[cfg(any(feature = "async-tokio", feature = "async-tokio-mt"))]
   #[cold]
   async fn try_produce_async<F, Fut, E>(&self, producer: F) -> Result<(), E>
   where
      F: FnOnce() -> Fut,
      Fut: Future<Output = Result<V, E>>,
   {
      let Some(guard) = self.lock.lock_async().await else {
         return Ok(());
      };
      #[cfg(feature = "tracing")]
      tracing::trace!(dependency = type_name::<V>(), "producing single dependency");
      let value = producer().await.inspect_err(|_| {
         #[cfg(feature = "tracing")]
         tracing::debug!(dependency = type_name::<V>(), "single producer failed, cell left empty");
      })?;
      // SAFETY: we hold the lock and the cell is not DONE.
      unsafe { (*self.value.get()).write(value) };
      guard.commit();
      Ok(())
   }
}

// SAFETY: the value is written once under the lock and only shared as `&V` afterwards,
// which needs `V: Sync`; it may be produced on one thread and dropped on another, which needs `V: Send`.
unsafe impl<V: Send + Sync> Sync for ExactlyOnceCell<V> {}
// SAFETY: moving the cell moves the owned `V`.
unsafe impl<V: Send> Send for ExactlyOnceCell<V> {}

impl<V> Default for ExactlyOnceCell<V> {
   #[inline]
   fn default() -> Self {
      Self::new()
   }
}

impl<V> From<V> for ExactlyOnceCell<V> {
   #[inline]
   fn from(value: V) -> Self {
      Self::with_value(value)
   }
}

impl<V> From<Option<V>> for ExactlyOnceCell<V> {
   fn from(value: Option<V>) -> Self {
      match value {
         Some(value) => Self::with_value(value),
         None => Self::new(),
      }
   }
}

impl<V: fmt::Debug> fmt::Debug for ExactlyOnceCell<V> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let mut d = f.debug_tuple("ExactlyOnceCell");
      match self.get() {
         Some(v) => d.field(v),
         None => d.field(&format_args!("<empty>")),
      };
      d.finish()
   }
}

impl<V> Drop for ExactlyOnceCell<V> {
   #[inline]
   fn drop(&mut self) {
      if self.is_populated() {
         // SAFETY: populated, exclusive access, never read again.
         unsafe { self.value.get_mut().assume_init_drop() };
      }
   }
}
