mod common;

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use common::{Counter, InvocationCounter};
use scaffold_cell::ExactlyOnceCell;

#[test]
fn test_sequential_calls_produce_once() {
   let cell: ExactlyOnceCell<Counter> = ExactlyOnceCell::new();
   let next = InvocationCounter::new();

   let ids: Vec<usize> = (0..3)
      .map(|_| cell.value(|| Counter { id: next.next() }).id)
      .collect();

   assert_eq!(ids, vec![1, 1, 1]);
   assert_eq!(next.count(), 1);
}

#[test]
fn test_new_is_empty() {
   let cell: ExactlyOnceCell<i32> = ExactlyOnceCell::new();
   assert!(!cell.is_populated());
   assert_eq!(cell.get(), None);
   assert_eq!(format!("{cell:?}"), "ExactlyOnceCell(<empty>)");
}

#[test]
fn test_with_value_skips_producer() {
   let cell = ExactlyOnceCell::with_value(42);
   assert!(cell.is_populated());
   let value = cell.value(|| panic!("producer must not run on a populated cell"));
   assert_eq!(*value, 42);
   assert_eq!(format!("{cell:?}"), "ExactlyOnceCell(42)");
}

#[test]
fn test_cache_hits_never_reinvoke() {
   let cell: ExactlyOnceCell<Counter> = ExactlyOnceCell::new();
   let next = InvocationCounter::new();

   let first: *const Counter = cell.value(|| Counter { id: next.next() });
   for _ in 0..1000 {
      let again: *const Counter = cell.value(|| Counter { id: next.next() });
      assert_eq!(first, again);
   }
   assert_eq!(next.count(), 1);
}

#[test]
fn test_concurrent_first_access_produces_once() {
   const THREADS: usize = 16;

   let cell: Arc<ExactlyOnceCell<Counter>> = Arc::new(ExactlyOnceCell::new());
   let next = InvocationCounter::new();
   let barrier = Arc::new(Barrier::new(THREADS));

   let handles: Vec<_> = (0..THREADS)
      .map(|_| {
         let cell = Arc::clone(&cell);
         let next = next.clone();
         let barrier = Arc::clone(&barrier);
         thread::spawn(move || {
            barrier.wait();
            let produced = cell.value(|| {
               let id = next.next();
               // widen the race window
               thread::sleep(Duration::from_millis(20));
               Counter { id }
            });
            (produced as *const Counter as usize, produced.id)
         })
      })
      .collect();

   let results: Vec<(usize, usize)> = handles.into_iter().map(|h| h.join().unwrap()).collect();
   let (first_addr, first_id) = results[0];
   assert!(results.iter().all(|&r| r == (first_addr, first_id)));
   assert_eq!(first_id, 1);
   assert_eq!(next.count(), 1);
}

#[test]
fn test_try_value_error_leaves_cell_empty() {
   let cell: ExactlyOnceCell<String> = ExactlyOnceCell::new();
   let next = InvocationCounter::new();

   let result = cell.try_value(|| {
      next.next();
      Err::<String, _>("database unreachable")
   });
   assert_eq!(result, Err("database unreachable"));
   assert!(!cell.is_populated());

   let result = cell.try_value(|| {
      next.next();
      Ok::<_, &str>(String::from("connected"))
   });
   assert_eq!(result.map(String::as_str), Ok("connected"));
   assert_eq!(next.count(), 2);

   // populated now, a failing producer is never consulted
   let result = cell.try_value(|| {
      next.next();
      Err::<String, _>("ignored")
   });
   assert_eq!(result.map(String::as_str), Ok("connected"));
   assert_eq!(next.count(), 2);
}

#[test]
fn test_panicking_producer_allows_retry() {
   let cell: ExactlyOnceCell<i32> = ExactlyOnceCell::new();

   let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
      cell.value(|| panic!("constructor blew up"));
   }));
   assert!(outcome.is_err());
   assert!(!cell.is_populated());

   assert_eq!(*cell.value(|| 7), 7);
}

#[test]
fn test_panic_releases_waiting_threads() {
   let cell: Arc<ExactlyOnceCell<i32>> = Arc::new(ExactlyOnceCell::new());
   let next = InvocationCounter::new();

   let failing = {
      let cell = Arc::clone(&cell);
      let next = next.clone();
      thread::spawn(move || {
         cell.value(|| {
            next.next();
            thread::sleep(Duration::from_millis(50));
            panic!("first producer fails");
         });
      })
   };

   thread::sleep(Duration::from_millis(10));
   let waiting = {
      let cell = Arc::clone(&cell);
      let next = next.clone();
      thread::spawn(move || {
         *cell.value(|| {
            next.next();
            99
         })
      })
   };

   assert!(failing.join().is_err());
   assert_eq!(waiting.join().unwrap(), 99);
   assert_eq!(next.count(), 2);
   assert_eq!(cell.get(), Some(&99));
}

#[test]
fn test_producer_may_call_other_cells() {
   struct Parent {
      base: ExactlyOnceCell<u32>,
   }
   struct Child<'a> {
      parent: &'a Parent,
      derived: ExactlyOnceCell<u32>,
   }

   let parent = Parent {
      base: ExactlyOnceCell::new(),
   };
   let child = Child {
      parent: &parent,
      derived: ExactlyOnceCell::new(),
   };

   let derived = child.derived.value(|| child.parent.base.value(|| 20) + 1);
   assert_eq!(*derived, 21);
   assert_eq!(parent.base.get(), Some(&20));
}

#[test]
fn test_take_and_into_inner() {
   let mut cell = ExactlyOnceCell::with_value(String::from("config"));
   assert_eq!(cell.take().as_deref(), Some("config"));
   assert!(!cell.is_populated());
   assert_eq!(cell.take(), None);

   // an emptied cell produces again
   assert_eq!(cell.value(|| String::from("reloaded")), "reloaded");
   assert_eq!(cell.into_inner().as_deref(), Some("reloaded"));

   let empty: ExactlyOnceCell<String> = ExactlyOnceCell::new();
   assert_eq!(empty.into_inner(), None);
}

#[test]
fn test_get_mut_and_conversions() {
   let mut cell: ExactlyOnceCell<Vec<i32>> = ExactlyOnceCell::from(vec![1]);
   if let Some(values) = cell.get_mut() {
      values.push(2);
   }
   assert_eq!(cell.get(), Some(&vec![1, 2]));

   let none: ExactlyOnceCell<i32> = ExactlyOnceCell::from(None);
   assert!(!none.is_populated());
   let some: ExactlyOnceCell<i32> = ExactlyOnceCell::from(Some(5));
   assert_eq!(some.get(), Some(&5));
}

#[test]
fn test_dropping_cell_releases_value() {
   let shared = Arc::new(Counter { id: 3 });
   let cell: ExactlyOnceCell<Arc<Counter>> = ExactlyOnceCell::new();
   cell.value(|| Arc::clone(&shared));
   assert_eq!(Arc::strong_count(&shared), 2);

   drop(cell);
   assert_eq!(Arc::strong_count(&shared), 1);
}

#[tokio::test]
async fn test_value_async() {
   let cell: ExactlyOnceCell<Counter> = ExactlyOnceCell::new();
   let next = InvocationCounter::new();

   let first = cell
      .value_async(|| {
         let next = next.clone();
         async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Counter { id: next.next() }
         }
      })
      .await;
   assert_eq!(first.id, 1);

   let again = cell
      .value_async(|| async { panic!("producer must not run on a populated cell") })
      .await;
   assert!(std::ptr::eq(first, again));
   assert_eq!(next.count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_value_async_concurrent_tasks() {
   let cell: Arc<ExactlyOnceCell<Counter>> = Arc::new(ExactlyOnceCell::new());
   let next = InvocationCounter::new();

   let tasks: Vec<_> = (0..8)
      .map(|_| {
         let cell = Arc::clone(&cell);
         let next = next.clone();
         tokio::spawn(async move {
            cell
               .value_async(|| async move {
                  let id = next.next();
                  tokio::time::sleep(Duration::from_millis(20)).await;
                  Counter { id }
               })
               .await
               .id
         })
      })
      .collect();

   for task in tasks {
      assert_eq!(task.await.unwrap(), 1);
   }
   assert_eq!(next.count(), 1);
}

#[tokio::test]
async fn test_value_async_contention_on_current_thread_runtime() {
   let cell: Arc<ExactlyOnceCell<Counter>> = Arc::new(ExactlyOnceCell::new());
   let next = InvocationCounter::new();

   let holder = {
      let cell = Arc::clone(&cell);
      let next = next.clone();
      tokio::spawn(async move {
         cell
            .value_async(|| async move {
               let id = next.next();
               tokio::time::sleep(Duration::from_millis(100)).await;
               Counter { id }
            })
            .await
            .id
      })
   };
   // let the holder take the lock and park in its producer before the second caller arrives
   tokio::time::sleep(Duration::from_millis(10)).await;

   let waiter = {
      let cell = Arc::clone(&cell);
      let next = next.clone();
      tokio::spawn(async move {
         cell
            .value_async(|| async move { Counter { id: next.next() } })
            .await
            .id
      })
   };

   assert_eq!(holder.await.unwrap(), 1);
   assert_eq!(waiter.await.unwrap(), 1);
   assert_eq!(next.count(), 1);
}

#[tokio::test]
async fn test_try_value_async_retries_after_error() {
   let cell: ExactlyOnceCell<String> = ExactlyOnceCell::new();

   let result = cell
      .try_value_async(|| async { Err::<String, _>("not yet") })
      .await;
   assert_eq!(result, Err("not yet"));
   assert!(!cell.is_populated());

   let result = cell
      .try_value_async(|| async { Ok::<_, &str>(String::from("ready")) })
      .await;
   assert_eq!(result.map(String::as_str), Ok("ready"));
}
