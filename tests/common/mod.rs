#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Counts producer invocations. Cloned into every producer that should be counted.
#[derive(Clone, Default)]
pub struct InvocationCounter(Arc<AtomicUsize>);

impl InvocationCounter {
   pub fn new() -> Self {
      Self::default()
   }

   /// Records one invocation and returns its 1-based sequence number.
   pub fn next(&self) -> usize {
      self.0.fetch_add(1, Ordering::SeqCst) + 1
   }

   pub fn count(&self) -> usize {
      self.0.load(Ordering::SeqCst)
   }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Counter {
   pub id: usize,
}

#[derive(Debug)]
pub struct Widget {
   pub id: usize,
   pub label: String,
}

impl Widget {
   pub fn new(id: usize) -> Self {
      Self {
         id,
         label: format!("widget-{id}"),
      }
   }
}
