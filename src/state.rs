//! The lock every cell carries.
//!
//! A cell needs two things from its lock: mutual exclusion while a producer runs, and
//! (for [`ExactlyOnceCell`](crate::ExactlyOnceCell)) a way to tell that production is
//! over for good so readers can skip locking entirely. Both fit in one byte:
//!
//! | bits | name    | set while                                              |
//! |------|---------|--------------------------------------------------------|
//! | 0    | DONE    | an exactly-once cell holds its final value             |
//! | 1    | LOCKED  | a producer (or a weak handle lookup) is in progress    |
//! | 2    | WAITING | somebody is parked and has to be woken on release      |
//! | 3-7  | epoch   | incremented on every release                           |
//!
//! The epoch makes each release visible as a state change even when the flags end up
//! where they started, so a parked caller compares against the exact byte it saw.
//! Blocked callers park through `parking_lot_core` keyed by the byte's address.
//! [`WeakReuseCell`](crate::WeakReuseCell) never sets DONE, so for it this is a mutex.

use core::mem;
use core::sync::atomic::{AtomicU8, Ordering};

use parking_lot_core::{DEFAULT_PARK_TOKEN, DEFAULT_UNPARK_TOKEN};

/// How many times an async caller yields before it considers parking its thread.
#[cfg(any(feature = "async-tokio", feature = "async-tokio-mt"))]
const YIELD_BUDGET: usize = 512;

/// Lock word owned by exactly one cell.
#[repr(transparent)]
pub(crate) struct CellLock(AtomicU8);

/// What a single look at the lock word found.
enum Attempt<'a> {
   /// We now hold the lock.
   Locked(CellGuard<'a>),
   /// DONE was set and the caller asked to stop there.
   Populated,
   /// Someone else holds the lock; park on this state.
   Busy(u8),
}

impl CellLock {
   const DONE: u8 = 1;
   const LOCKED: u8 = 2;
   const WAITING: u8 = 4;
   const EPOCH_1: u8 = 8;
   const EPOCH_MASK: u8 = !(Self::DONE | Self::LOCKED | Self::WAITING);

   #[inline(always)]
   const fn bump_epoch(state: u8) -> u8 {
      (state & Self::EPOCH_MASK).wrapping_add(Self::EPOCH_1) & Self::EPOCH_MASK
   }

   #[inline]
   pub(crate) const fn new() -> Self {
      Self(AtomicU8::new(0))
   }

   /// A lock word for a cell that starts out populated.
   #[inline]
   pub(crate) const fn done() -> Self {
      Self(AtomicU8::new(Self::DONE))
   }

   #[inline]
   fn key(&self) -> usize {
      self.0.as_ptr() as usize
   }

   #[inline]
   fn wake_parked(&self) {
      // SAFETY: every park on this word uses the same key.
      unsafe {
         parking_lot_core::unpark_all(self.key(), DEFAULT_UNPARK_TOKEN);
      }
   }

   /// Puts the thread to sleep unless the word has already moved past `seen`.
   #[inline]
   fn park_while(&self, seen: u8) {
      // SAFETY: see `wake_parked`. The validate closure runs under parking_lot's bucket
      // lock, so a release between our last load and going to sleep is not lost.
      unsafe {
         let _ = parking_lot_core::park(
            self.key(),
            || self.0.load(Ordering::Acquire) == seen,
            || {},
            |_, _| {},
            DEFAULT_PARK_TOKEN,
            None,
         );
      }
   }

   /// Replaces the whole word with `flags` plus the next epoch, waking parked callers
   /// if there were any. Returns the previous word.
   #[inline]
   fn publish(&self, flags: u8) -> u8 {
      let next = flags | Self::bump_epoch(self.0.load(Ordering::Relaxed));
      // Release pairs with the Acquire loads in `is_done` and `attempt`, so whatever the
      // lock holder wrote is visible to the next holder or reader.
      let prev = self.0.swap(next, Ordering::Release);
      if prev & Self::WAITING != 0 {
         self.wake_parked();
      }
      prev
   }

   /// Marks the cell populated and unlocks it. `true` if it was not populated before.
   #[inline]
   pub(crate) fn set_done(&self) -> bool {
      self.publish(Self::DONE) & Self::DONE == 0
   }

   /// Unlocks the cell and clears DONE. `true` if it was populated before.
   #[inline]
   pub(crate) fn release(&self) -> bool {
      self.publish(0) & Self::DONE != 0
   }

   #[inline]
   pub(crate) fn is_done(&self, ordering: Ordering) -> bool {
      self.0.load(ordering) & Self::DONE != 0
   }

   /// Looks at the word once and takes the lock if it is free.
   ///
   /// With `announce`, a caller that finds the lock held sets WAITING so the holder wakes
   /// it. With `stop_when_done`, a set DONE bit is reported instead of locking.
   fn attempt(&self, announce: bool, stop_when_done: bool) -> Attempt<'_> {
      let mut state = self.0.load(Ordering::Relaxed);
      loop {
         if stop_when_done && state & Self::DONE != 0 {
            return Attempt::Populated;
         }
         let locking = state & Self::LOCKED == 0;
         let wanted = if locking {
            state | Self::LOCKED
         } else if announce && state & Self::WAITING == 0 {
            state | Self::WAITING
         } else {
            return Attempt::Busy(state);
         };
         match self
            .0
            .compare_exchange_weak(state, wanted, Ordering::Acquire, Ordering::Relaxed)
         {
            Ok(_) if locking => return Attempt::Locked(CellGuard::new(self)),
            Ok(_) => return Attempt::Busy(wanted),
            Err(actual) => {
               std::hint::spin_loop();
               state = actual;
            }
         }
      }
   }

   /// Blocks until the lock is held. `None` once the cell is populated.
   pub(crate) fn lock(&self) -> Option<CellGuard<'_>> {
      loop {
         match self.attempt(true, true) {
            Attempt::Locked(guard) => return Some(guard),
            Attempt::Populated => return None,
            Attempt::Busy(seen) => self.park_while(seen),
         }
      }
   }

   /// Blocks until the lock is held, whether or not DONE is set.
   pub(crate) fn acquire(&self) -> CellGuard<'_> {
      loop {
         match self.attempt(true, false) {
            Attempt::Locked(guard) => return guard,
            Attempt::Busy(seen) => self.park_while(seen),
            // only reported when stopping at DONE
            Attempt::Populated => {}
         }
      }
   }

   /// Takes the lock only if nobody holds it.
   #[inline]
   pub(crate) fn try_acquire(&self) -> Option<CellGuard<'_>> {
      match self.attempt(false, false) {
         Attempt::Locked(guard) => Some(guard),
         _ => None,
      }
   }

   /// Async counterpart of `park_while`: yields to the scheduler while the word still
   /// reads `seen`. After [`YIELD_BUDGET`] yields on a multi-threaded runtime the worker
   /// thread parks inside `block_in_place`; anywhere else the caller just tries again.
   #[cfg(any(feature = "async-tokio", feature = "async-tokio-mt"))]
   async fn park_async(&self, seen: u8) {
      for _ in 0..YIELD_BUDGET {
         tokio::task::yield_now().await;
         if self.0.load(Ordering::Relaxed) != seen {
            return;
         }
      }
      #[cfg(feature = "async-tokio-mt")]
      if on_multi_thread_runtime() {
         tokio::task::block_in_place(|| self.park_while(seen));
      }
   }

   /// Async [`lock`](Self::lock).
   #[cfg(any(feature = "async-tokio", feature = "async-tokio-mt"))]
   pub(crate) async fn lock_async(&self) -> Option<CellGuard<'_>> {
      loop {
         match self.attempt(true, true) {
            Attempt::Locked(guard) => return Some(guard),
            Attempt::Populated => return None,
            Attempt::Busy(seen) => self.park_async(seen).await,
         }
      }
   }

   /// Async [`acquire`](Self::acquire).
   #[cfg(any(feature = "async-tokio", feature = "async-tokio-mt"))]
   pub(crate) async fn acquire_async(&self) -> CellGuard<'_> {
      loop {
         match self.attempt(true, false) {
            Attempt::Locked(guard) => return guard,
            Attempt::Busy(seen) => self.park_async(seen).await,
            Attempt::Populated => {}
         }
      }
   }
}

/// `block_in_place` panics on a current-thread runtime.
#[cfg(feature = "async-tokio-mt")]
fn on_multi_thread_runtime() -> bool {
   use tokio::runtime::{Handle, RuntimeFlavor};

   Handle::try_current().is_ok_and(|handle| handle.runtime_flavor() == RuntimeFlavor::MultiThread)
}

/// RAII hold on a [`CellLock`].
///
/// Dropping it releases the lock and leaves the cell unpopulated, which is also what
/// happens when a producer panics or returns an error. [`commit`](Self::commit) marks
/// the cell DONE instead.
pub(crate) struct CellGuard<'a> {
   state: &'a CellLock,
}

impl<'a> CellGuard<'a> {
   /// Assumes LOCKED is already set on `state`.
   #[inline(always)]
   const fn new(state: &'a CellLock) -> Self {
      Self { state }
   }

   /// Marks the cell DONE and releases the lock.
   #[inline(always)]
   pub(crate) fn commit(self) -> bool {
      let success = self.state.set_done();
      mem::forget(self);
      success
   }
}

impl Drop for CellGuard<'_> {
   #[inline(always)]
   fn drop(&mut self) {
      self.state.release();
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   use std::sync::atomic::AtomicUsize;
   use std::sync::Arc;
   use std::thread;
   use std::time::Duration;

   #[test]
   fn epoch_wraps_without_touching_flags() {
      let mut state = 0u8;
      for _ in 0..64 {
         state = CellLock::bump_epoch(state);
         assert_eq!(state & !CellLock::EPOCH_MASK, 0);
      }
      assert_eq!(CellLock::bump_epoch(CellLock::EPOCH_MASK), 0);
   }

   #[test]
   fn lock_short_circuits_when_done() {
      let lock = CellLock::done();
      assert!(lock.lock().is_none());

      // acquire ignores DONE, dropping it clears the word
      let guard = lock.acquire();
      assert!(lock.try_acquire().is_none());
      drop(guard);
      assert!(!lock.is_done(Ordering::Acquire));
   }

   #[test]
   fn commit_marks_done_once() {
      let lock = CellLock::new();
      let guard = lock.lock().expect("fresh lock must be acquirable");
      assert!(guard.commit());
      assert!(lock.is_done(Ordering::Acquire));
      assert!(!lock.set_done());
   }

   #[test]
   fn dropped_guard_allows_relock() {
      let lock = CellLock::new();
      {
         let _guard = lock.lock().expect("fresh lock must be acquirable");
         assert!(lock.try_acquire().is_none());
      }
      assert!(lock.try_acquire().is_some());
   }

   #[test]
   fn acquire_is_mutually_exclusive() {
      let lock = Arc::new(CellLock::new());
      let inside = Arc::new(AtomicUsize::new(0));
      let max_inside = Arc::new(AtomicUsize::new(0));

      let handles: Vec<_> = (0..8)
         .map(|_| {
            let lock = Arc::clone(&lock);
            let inside = Arc::clone(&inside);
            let max_inside = Arc::clone(&max_inside);
            thread::spawn(move || {
               for _ in 0..50 {
                  let _guard = lock.acquire();
                  let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                  max_inside.fetch_max(now, Ordering::SeqCst);
                  thread::sleep(Duration::from_micros(50));
                  inside.fetch_sub(1, Ordering::SeqCst);
               }
            })
         })
         .collect();

      for handle in handles {
         handle.join().unwrap();
      }
      assert_eq!(max_inside.load(Ordering::SeqCst), 1);
   }
}
