use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_HEAP_ID: AtomicU64 = AtomicU64::new(1);

/// Returns an id no other heap in this process has been given.
pub(crate) fn next_heap_id() -> u64 {
  NEXT_HEAP_ID.fetch_add(1, Ordering::Relaxed)
}

/// Opaque token for a bucket lent out by [`BucketHeap::lend`](crate::BucketHeap::lend).
///
/// A handle is only meaningful to the heap that issued it, and only until the
/// bucket is reclaimed. A loan never has more than one handle: it is not
/// `Clone`, and [`BucketHeap::handle_for`](crate::BucketHeap::handle_for)
/// refuses buckets that already have one. Holding `&mut` to the handle is
/// therefore exclusive access to the bucket's bytes.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct BucketHandle {
  heap_id: u64,
  index: usize,
  generation: u32,
}

impl BucketHandle {
  pub(crate) fn new(
    heap_id: u64,
    index: usize,
    generation: u32,
  ) -> Self {
    Self {
      heap_id,
      index,
      generation,
    }
  }

  /// Index of the bucket this handle refers to.
  pub fn index(&self) -> usize {
    self.index
  }

  pub(crate) fn heap_id(&self) -> u64 {
    self.heap_id
  }

  pub(crate) fn generation(&self) -> u32 {
    self.generation
  }
}
