//! Pooled log cursors.
//!
//! Diff iteration walks the change log through a cursor borrowed from the
//! store's pool. The borrow is a guard: the cursor goes back to the pool
//! when the guard drops, on every exit path (exhaustion, early
//! abandonment, an error, a panic).

use std::cell::{Cell, RefCell};
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

/// A position in the change log.
#[derive(Debug, Default)]
pub struct LogCursor {
    /// Absolute index into the log's records.
    pub pos: usize,
}

#[derive(Debug, Default)]
struct PoolInner {
    free: RefCell<Vec<LogCursor>>,
    in_use: Cell<usize>,
}

/// A pool of reusable log cursors.
#[derive(Clone, Debug, Default)]
pub struct CursorPool {
    inner: Rc<PoolInner>,
}

impl CursorPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrows a cursor, positioned at zero.
    pub fn acquire(&self) -> CursorGuard {
        let mut cursor = self.inner.free.borrow_mut().pop().unwrap_or_default();
        cursor.pos = 0;
        self.inner.in_use.set(self.inner.in_use.get() + 1);
        CursorGuard {
            cursor: Some(cursor),
            pool: self.inner.clone(),
        }
    }

    /// Number of cursors currently borrowed.
    pub fn in_use(&self) -> usize {
        self.inner.in_use.get()
    }

    /// Number of cursors resting in the pool.
    pub fn pooled(&self) -> usize {
        self.inner.free.borrow().len()
    }
}

/// A borrowed cursor; returns itself to the pool on drop.
#[derive(Debug)]
pub struct CursorGuard {
    cursor: Option<LogCursor>,
    pool: Rc<PoolInner>,
}

impl Deref for CursorGuard {
    type Target = LogCursor;

    fn deref(&self) -> &LogCursor {
        self.cursor.as_ref().expect("cursor present until drop")
    }
}

impl DerefMut for CursorGuard {
    fn deref_mut(&mut self) -> &mut LogCursor {
        self.cursor.as_mut().expect("cursor present until drop")
    }
}

impl Drop for CursorGuard {
    fn drop(&mut self) {
        if let Some(cursor) = self.cursor.take() {
            self.pool.free.borrow_mut().push(cursor);
            self.pool.in_use.set(self.pool.in_use.get() - 1);
        }
    }
}
