//! Lifecycle cells for dependency-injection scaffolds.
//!
//! A scaffold is an ordinary struct that builds and hands out an application's
//! dependencies through accessor methods. Each accessor owns one cell, and its body
//! becomes the cell's producer:
//!
//! - [`ExactlyOnceCell<V>`]: the producer runs at most once; every caller gets the same value.
//! - [`WeakReuseCell<V>`]: the cell only holds a weak handle; callers share the value
//!   while someone keeps it alive, and a new one is produced after it has been dropped.
//!
//! Each cell has its own lock, held for the duration of the producer, so concurrent
//! first callers never produce duplicates. There is no global lock and a scaffold whose
//! accessors are all cell-backed can be shared across threads as-is.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use scaffold_cell::{ExactlyOnceCell, WeakReuseCell};
//!
//! struct Pool { size: usize }
//! struct Session { pool_size: usize }
//!
//! #[derive(Default)]
//! struct AppScaffold {
//!    pool: ExactlyOnceCell<Pool>,
//!    session: WeakReuseCell<Session>,
//! }
//!
//! impl AppScaffold {
//!    fn pool(&self) -> &Pool {
//!       self.pool.value(|| Pool { size: 8 })
//!    }
//!
//!    fn session(&self) -> Arc<Session> {
//!       self.session.value(|| Arc::new(Session { pool_size: self.pool().size }))
//!    }
//! }
//!
//! let scaffold = AppScaffold::default();
//! let a = scaffold.session();
//! let b = scaffold.session();
//! assert!(Arc::ptr_eq(&a, &b));
//! assert_eq!(a.pool_size, 8);
//! ```
//!
//! # Features
//!
//! - `async-tokio-mt` (default): `value_async` / `try_value_async`, with a
//!   `block_in_place` fallback on tokio's multi-threaded runtime.
//! - `async-tokio`: async producers using only yield-based waiting.
//! - `tracing`: emits TRACE events when dependencies are produced or recreated.

/// Per-cell lock.
mod state;

/// Exactly-once cell.
mod single;

/// Weak-reuse cell.
mod shared;

pub use shared::WeakReuseCell;
pub use single::ExactlyOnceCell;
