use std::{alloc::Layout, cell::Cell, fmt, ptr, ptr::NonNull};

use tracing::{debug, trace, warn};

use crate::{
  bucket::{BUCKET_ALIGN, Bucket},
  error::{AllocError, HandleError},
  handle::{BucketHandle, next_heap_id},
  stats::HeapStats,
};

pub const DEFAULT_BUCKET_CAPACITY: usize = 4096;
pub const DEFAULT_BUCKET_COUNT: usize = 10;

pub type DefaultBucketHeap = BucketHeap<DEFAULT_BUCKET_CAPACITY, DEFAULT_BUCKET_COUNT>;

/// How a bucket is currently lent out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Loan {
  Free,
  Pointer,
  Handle,
}

/// A fixed pool of `N` buckets of `C` bytes each.
///
/// Buckets are handed out first-fit by ascending index. The heap never
/// grows and never asks the system allocator for memory; all storage lives
/// inline in the struct, so raw pointers returned by [`allocate`](Self::allocate)
/// are only valid while the heap stays where it is. Prefer the handle API
/// ([`lend`](Self::lend) / [`reclaim`](Self::reclaim)) when the heap may move.
///
/// Every operation takes `&self`: pointers handed out earlier stay usable
/// across later calls. Bookkeeping lives in `Cell`s, which keeps the heap
/// `!Sync`; share it between threads only behind a lock.
pub struct BucketHeap<const C: usize = DEFAULT_BUCKET_CAPACITY, const N: usize = DEFAULT_BUCKET_COUNT> {
  id: u64,
  buckets: [Bucket<C>; N],
  loans: [Cell<Loan>; N],
  generations: [Cell<u32>; N],
  peak_occupied: Cell<usize>,
  allocations: Cell<u64>,
  failed_allocations: Cell<u64>,
  releases: Cell<u64>,
}

impl<const C: usize, const N: usize> BucketHeap<C, N> {
  /// Creates a heap with every bucket free.
  ///
  /// Zero-sized buckets would all share one address, so they are rejected
  /// at compile time:
  ///
  /// ```compile_fail
  /// let heap = bucketheap::BucketHeap::<0, 3>::new();
  /// ```
  pub fn new() -> Self {
    const { assert!(C > 0, "buckets must hold at least one byte") };

    Self {
      id: next_heap_id(),
      buckets: [const { Bucket::new() }; N],
      loans: [const { Cell::new(Loan::Free) }; N],
      generations: [const { Cell::new(0) }; N],
      peak_occupied: Cell::new(0),
      allocations: Cell::new(0),
      failed_allocations: Cell::new(0),
      releases: Cell::new(0),
    }
  }

  pub const fn bucket_capacity(&self) -> usize {
    C
  }

  pub const fn bucket_count(&self) -> usize {
    N
  }

  pub fn occupied(&self) -> usize {
    self.loans.iter().filter(|loan| loan.get() != Loan::Free).count()
  }

  pub fn available(&self) -> usize {
    N - self.occupied()
  }

  pub fn is_full(&self) -> bool {
    self.loans.iter().all(|loan| loan.get() != Loan::Free)
  }

  pub fn is_occupied(
    &self,
    index: usize,
  ) -> bool {
    self
      .loans
      .get(index)
      .is_some_and(|loan| loan.get() != Loan::Free)
  }

  /// Whether `ptr` is the base address of one of this heap's buckets.
  pub fn owns(
    &self,
    ptr: *const u8,
  ) -> bool {
    self.find_bucket(ptr).is_some()
  }

  pub fn stats(&self) -> HeapStats {
    HeapStats {
      bucket_capacity: C,
      bucket_count: N,
      occupied: self.occupied(),
      peak_occupied: self.peak_occupied.get(),
      allocations: self.allocations.get(),
      failed_allocations: self.failed_allocations.get(),
      releases: self.releases.get(),
    }
  }

  fn find_free_bucket(&self) -> Option<usize> {
    self.loans.iter().position(|loan| loan.get() == Loan::Free)
  }

  fn find_bucket(
    &self,
    ptr: *const u8,
  ) -> Option<usize> {
    self
      .buckets
      .iter()
      .position(|bucket| ptr::eq(bucket.base(), ptr))
  }

  fn out_of_memory(
    &self,
    requested: usize,
  ) -> AllocError {
    self.failed_allocations.set(self.failed_allocations.get() + 1);
    debug!(
      requested,
      capacity = C,
      occupied = self.occupied(),
      "bucket heap out of memory"
    );
    AllocError::OutOfMemory { requested }
  }

  fn acquire(
    &self,
    requested: usize,
    loan: Loan,
  ) -> Result<usize, AllocError> {
    if requested > C {
      return Err(self.out_of_memory(requested));
    }

    let Some(index) = self.find_free_bucket() else {
      return Err(self.out_of_memory(requested));
    };

    self.loans[index].set(loan);
    self.generations[index].set(self.generations[index].get().wrapping_add(1));
    self.allocations.set(self.allocations.get() + 1);
    self.peak_occupied.set(self.peak_occupied.get().max(self.occupied()));

    trace!(index, requested, ?loan, "bucket lent");
    Ok(index)
  }

  fn release(
    &self,
    index: usize,
  ) {
    self.loans[index].set(Loan::Free);
    self.releases.set(self.releases.get() + 1);
    trace!(index, "bucket released");
  }

  /// Lends the lowest-indexed free bucket and returns its base address.
  ///
  /// Fails with [`AllocError::OutOfMemory`] when `requested` exceeds the
  /// bucket capacity or when every bucket is in use.
  pub fn allocate(
    &self,
    requested: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    let index = self.acquire(requested, Loan::Pointer)?;
    let base = self.buckets[index].base();

    NonNull::new(base).ok_or(AllocError::OutOfMemory { requested })
  }

  /// Same as [`allocate`](Self::allocate), but also refuses layouts whose
  /// alignment a bucket base cannot satisfy.
  pub fn allocate_layout(
    &self,
    layout: Layout,
  ) -> Result<NonNull<u8>, AllocError> {
    if layout.align() > BUCKET_ALIGN {
      return Err(self.out_of_memory(layout.size()));
    }

    self.allocate(layout.size())
  }

  /// Returns the bucket whose base address is `ptr` to the pool.
  ///
  /// Only buckets lent by [`allocate`](Self::allocate) are released. Anything
  /// else (null, interior, foreign, already freed, or a bucket lent through a
  /// handle) is ignored.
  pub fn free(
    &self,
    ptr: *mut u8,
  ) {
    match self.find_bucket(ptr) {
      Some(index) if self.loans[index].get() == Loan::Pointer => self.release(index),
      _ => debug!(?ptr, "ignoring free of pointer that is not an allocated bucket"),
    }
  }

  /// Lends the lowest-indexed free bucket and returns a handle to it.
  pub fn lend(
    &self,
    requested: usize,
  ) -> Result<BucketHandle, AllocError> {
    let index = self.acquire(requested, Loan::Handle)?;

    Ok(BucketHandle::new(self.id, index, self.generations[index].get()))
  }

  fn validate(
    &self,
    handle: &BucketHandle,
  ) -> Result<usize, HandleError> {
    let index = handle.index();

    let result = if handle.heap_id() != self.id || index >= N {
      Err(HandleError::ForeignHandle)
    } else if self.generations[index].get() != handle.generation() {
      Err(HandleError::StaleHandle { index })
    } else {
      match self.loans[index].get() {
        Loan::Handle => Ok(index),
        Loan::Free => Err(HandleError::DoubleFree { index }),
        Loan::Pointer => Err(HandleError::StaleHandle { index }),
      }
    };

    if let Err(error) = &result {
      warn!(%error, index, "rejected bucket handle");
    }

    result
  }

  /// Returns a lent bucket to the pool.
  ///
  /// The handle stays with the caller; presenting it again is reported as
  /// [`HandleError::DoubleFree`], or as [`HandleError::StaleHandle`] once the
  /// bucket has been lent out anew. Rejected handles leave the heap untouched.
  pub fn reclaim(
    &self,
    handle: &mut BucketHandle,
  ) -> Result<(), HandleError> {
    let index = self.validate(handle)?;
    self.release(index);
    Ok(())
  }

  pub fn bytes<'a>(
    &'a self,
    handle: &'a BucketHandle,
  ) -> Result<&'a [u8], HandleError> {
    let index = self.validate(handle)?;

    // A bucket lent through a handle has exactly one live handle, and the
    // borrow of it blocks `reclaim`, so no writer exists while this lives.
    Ok(unsafe { self.buckets[index].bytes() })
  }

  pub fn bytes_mut<'a>(
    &'a self,
    handle: &'a mut BucketHandle,
  ) -> Result<&'a mut [u8], HandleError> {
    let index = self.validate(handle)?;

    // Exclusive: the single handle for this loan is mutably borrowed, and
    // `free` never releases handle loans.
    Ok(unsafe { self.buckets[index].bytes_mut() })
  }

  /// Converts the loan of the bucket based at `ptr` from the pointer API to
  /// the handle API.
  ///
  /// Returns `None` unless the bucket was lent by [`allocate`](Self::allocate)
  /// and has not been converted already, so a loan never has more than one
  /// handle. The caller must stop using `ptr` once the handle is issued.
  pub fn handle_for(
    &self,
    ptr: *const u8,
  ) -> Option<BucketHandle> {
    let index = self.find_bucket(ptr)?;

    if self.loans[index].get() != Loan::Pointer {
      return None;
    }

    self.loans[index].set(Loan::Handle);
    Some(BucketHandle::new(self.id, index, self.generations[index].get()))
  }
}

impl<const C: usize, const N: usize> Default for BucketHeap<C, N> {
  fn default() -> Self {
    Self::new()
  }
}

impl<const C: usize, const N: usize> fmt::Debug for BucketHeap<C, N> {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.debug_struct("BucketHeap")
      .field("id", &self.id)
      .field("bucket_capacity", &C)
      .field("bucket_count", &N)
      .field("loans", &self.loans)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;
  use proptest::prelude::*;
  use rstest::{fixture, rstest};

  use super::*;

  #[fixture]
  fn heap() -> DefaultBucketHeap {
    DefaultBucketHeap::new()
  }

  #[rstest]
  #[case(0)]
  #[case(1)]
  #[case(64)]
  #[case(DEFAULT_BUCKET_CAPACITY)]
  fn test_allocate_within_capacity(
    heap: DefaultBucketHeap,
    #[case] requested: usize,
  ) {
    let addr = heap.allocate(requested).unwrap();

    assert_eq!(addr.as_ptr(), heap.buckets[0].base());
    assert_eq!(heap.occupied(), 1);
    assert!(heap.is_occupied(0));
  }

  #[rstest]
  #[case(DEFAULT_BUCKET_CAPACITY + 1)]
  #[case(usize::MAX)]
  fn test_oversized_request_fails_on_empty_heap(
    heap: DefaultBucketHeap,
    #[case] requested: usize,
  ) {
    assert_eq!(heap.allocate(requested), Err(AllocError::OutOfMemory { requested }));
    assert_eq!(heap.occupied(), 0);
  }

  #[rstest]
  fn test_exhaust_then_reuse_freed_bucket(heap: DefaultBucketHeap) {
    let addrs: Vec<NonNull<u8>> = (0..DEFAULT_BUCKET_COUNT)
      .map(|_| heap.allocate(DEFAULT_BUCKET_CAPACITY).unwrap())
      .collect();

    for (i, addr) in addrs.iter().enumerate() {
      assert!(!addrs[i + 1..].contains(addr));
    }
    assert!(heap.is_full());

    assert_eq!(heap.allocate(1), Err(AllocError::OutOfMemory { requested: 1 }));

    heap.free(addrs[6].as_ptr());
    assert_eq!(heap.occupied(), DEFAULT_BUCKET_COUNT - 1);

    assert_eq!(heap.allocate(DEFAULT_BUCKET_CAPACITY), Ok(addrs[6]));
    assert!(heap.is_full());
  }

  #[rstest]
  fn test_first_fit_prefers_lowest_index(heap: DefaultBucketHeap) {
    let addrs: Vec<NonNull<u8>> = (0..4).map(|_| heap.allocate(8).unwrap()).collect();

    heap.free(addrs[3].as_ptr());
    heap.free(addrs[1].as_ptr());

    assert_eq!(heap.allocate(8), Ok(addrs[1]));
    assert_eq!(heap.allocate(8), Ok(addrs[3]));
    assert_eq!(heap.allocate(8).unwrap().as_ptr(), heap.buckets[4].base());
  }

  #[rstest]
  fn test_free_is_idempotent(heap: DefaultBucketHeap) {
    let first = heap.allocate(16).unwrap();
    let _second = heap.allocate(16).unwrap();

    heap.free(first.as_ptr());
    heap.free(first.as_ptr());
    assert_eq!(heap.occupied(), 1);

    let mut outside = 0u8;
    heap.free(&mut outside);
    heap.free(ptr::null_mut());
    heap.free(first.as_ptr().wrapping_add(1));
    assert_eq!(heap.occupied(), 1);
    assert_eq!(heap.stats().releases, 1);
  }

  #[rstest]
  fn test_memory_is_usable(heap: DefaultBucketHeap) {
    unsafe {
      let first = heap.allocate(8).unwrap().as_ptr() as *mut u64;
      let second = heap.allocate(DEFAULT_BUCKET_CAPACITY).unwrap().as_ptr();

      first.write(0xDEAD_BEEF_u64);
      ptr::write_bytes(second, 0xAB, DEFAULT_BUCKET_CAPACITY);

      assert_eq!(first.read(), 0xDEAD_BEEF);
      assert_eq!(second.read(), 0xAB);
      assert_eq!(second.add(DEFAULT_BUCKET_CAPACITY - 1).read(), 0xAB);
    }
  }

  #[rstest]
  fn test_pointers_stay_valid_across_later_calls(heap: DefaultBucketHeap) {
    unsafe {
      let first = heap.allocate(8).unwrap().as_ptr() as *mut u64;
      first.write(7);

      let second = heap.allocate(8).unwrap().as_ptr();
      let mut handle = heap.lend(8).unwrap();
      heap.bytes_mut(&mut handle).unwrap()[0] = 3;
      heap.free(second);
      let _third = heap.allocate(DEFAULT_BUCKET_CAPACITY).unwrap();
      heap.reclaim(&mut handle).unwrap();

      assert_eq!(first.read(), 7);
      first.write(8);
      assert_eq!(first.read(), 8);
    }
  }

  #[test]
  fn test_smallest_buckets_have_distinct_addresses() {
    let heap = BucketHeap::<1, 3>::new();

    let a = heap.allocate(0).unwrap();
    let b = heap.allocate(1).unwrap();
    let c = heap.allocate(0).unwrap();
    assert!(a != b && b != c && a != c);

    heap.free(b.as_ptr());
    assert!(heap.is_occupied(0));
    assert!(!heap.is_occupied(1));
    assert!(heap.is_occupied(2));
    assert_eq!(heap.allocate(1), Ok(b));
  }

  #[test]
  fn test_empty_heap_always_fails() {
    let heap = BucketHeap::<8, 0>::new();

    assert!(heap.is_full());
    assert_eq!(heap.allocate(1), Err(AllocError::OutOfMemory { requested: 1 }));
  }

  #[rstest]
  fn test_allocate_layout(heap: DefaultBucketHeap) {
    let addr = heap.allocate_layout(Layout::new::<u128>()).unwrap();
    assert_eq!(addr.as_ptr() as usize % BUCKET_ALIGN, 0);

    let over_aligned = Layout::from_size_align(8, BUCKET_ALIGN * 2).unwrap();
    assert_eq!(
      heap.allocate_layout(over_aligned),
      Err(AllocError::OutOfMemory { requested: 8 })
    );

    let too_big = Layout::array::<u64>(DEFAULT_BUCKET_CAPACITY).unwrap();
    assert!(heap.allocate_layout(too_big).is_err());
    assert_eq!(heap.occupied(), 1);
  }

  #[rstest]
  fn test_lend_and_reclaim(heap: DefaultBucketHeap) {
    let mut handle = heap.lend(100).unwrap();
    assert_eq!(handle.index(), 0);

    heap.bytes_mut(&mut handle).unwrap()[..5].copy_from_slice(b"hello");
    assert_eq!(&heap.bytes(&handle).unwrap()[..5], b"hello");
    assert_eq!(heap.bytes(&handle).unwrap().len(), DEFAULT_BUCKET_CAPACITY);

    heap.reclaim(&mut handle).unwrap();
    assert_eq!(heap.occupied(), 0);
  }

  #[rstest]
  fn test_reclaim_reports_double_free(heap: DefaultBucketHeap) {
    let mut handle = heap.lend(1).unwrap();

    heap.reclaim(&mut handle).unwrap();
    assert_eq!(heap.reclaim(&mut handle), Err(HandleError::DoubleFree { index: 0 }));
    assert_eq!(heap.bytes(&handle), Err(HandleError::DoubleFree { index: 0 }));
    assert_eq!(heap.occupied(), 0);
    assert_eq!(heap.stats().releases, 1);
  }

  #[rstest]
  fn test_reclaim_reports_stale_handle(heap: DefaultBucketHeap) {
    let mut stale = heap.lend(1).unwrap();
    heap.reclaim(&mut stale).unwrap();

    let mut fresh = heap.lend(1).unwrap();
    assert_eq!(fresh.index(), stale.index());

    assert_eq!(heap.bytes(&stale), Err(HandleError::StaleHandle { index: 0 }));
    assert_eq!(heap.reclaim(&mut stale), Err(HandleError::StaleHandle { index: 0 }));
    assert!(heap.is_occupied(0));

    heap.reclaim(&mut fresh).unwrap();
  }

  #[rstest]
  fn test_reclaim_reports_foreign_handle(heap: DefaultBucketHeap) {
    let other = BucketHeap::<32, 2>::new();
    let mut foreign = other.lend(1).unwrap();
    let _own = heap.lend(1).unwrap();

    assert_eq!(heap.reclaim(&mut foreign), Err(HandleError::ForeignHandle));
    assert_eq!(heap.occupied(), 1);
    assert_eq!(other.occupied(), 1);
  }

  #[rstest]
  fn test_free_ignores_handle_loans(heap: DefaultBucketHeap) {
    let mut handle = heap.lend(1).unwrap();

    heap.free(heap.buckets[0].base());
    assert!(heap.is_occupied(0));
    assert!(heap.handle_for(heap.buckets[0].base()).is_none());

    heap.reclaim(&mut handle).unwrap();
  }

  #[rstest]
  fn test_handle_for_issues_one_handle_per_loan(heap: DefaultBucketHeap) {
    let addr = heap.allocate(1).unwrap().as_ptr();

    assert!(heap.owns(addr));
    assert!(!heap.owns(addr.wrapping_add(1)));
    assert!(heap.handle_for(addr.wrapping_add(1)).is_none());
    assert!(heap.handle_for(heap.buckets[1].base()).is_none());

    let mut handle = heap.handle_for(addr).unwrap();
    assert_eq!(handle.index(), 0);
    assert!(heap.handle_for(addr).is_none());

    heap.free(addr);
    assert!(heap.is_occupied(0));

    heap.reclaim(&mut handle).unwrap();
    assert!(!heap.is_occupied(0));
  }

  #[rstest]
  fn test_stats(heap: DefaultBucketHeap) {
    let a = heap.allocate(1).unwrap();
    let _b = heap.allocate(1).unwrap();
    let _c = heap.lend(1).unwrap();
    heap.free(a.as_ptr());
    let _ = heap.allocate(DEFAULT_BUCKET_CAPACITY + 1);

    assert_eq!(
      heap.stats(),
      HeapStats {
        bucket_capacity: DEFAULT_BUCKET_CAPACITY,
        bucket_count: DEFAULT_BUCKET_COUNT,
        occupied: 2,
        peak_occupied: 3,
        allocations: 3,
        failed_allocations: 1,
        releases: 1,
      }
    );
  }

  #[derive(Debug, Clone)]
  enum Op {
    Allocate(usize),
    Free(usize),
  }

  fn op() -> impl Strategy<Value = Op> {
    prop_oneof![(0usize..=96).prop_map(Op::Allocate), (0usize..6).prop_map(Op::Free),]
  }

  proptest! {
    #[test]
    fn prop_behaves_like_first_fit_model(ops in prop::collection::vec(op(), 0..64)) {
      let heap = BucketHeap::<64, 4>::new();
      let mut model: [Option<*mut u8>; 4] = [None; 4];
      let mut outside = 0u8;

      for op in ops {
        match op {
          Op::Allocate(requested) => {
            let expected = if requested <= 64 {
              model.iter().position(Option::is_none)
            } else {
              None
            };

            match (heap.allocate(requested), expected) {
              (Ok(addr), Some(index)) => {
                prop_assert!(!model.iter().flatten().any(|lent| *lent == addr.as_ptr()));
                prop_assert_eq!(addr.as_ptr(), heap.buckets[index].base());
                model[index] = Some(addr.as_ptr());
              }
              (Err(AllocError::OutOfMemory { requested: reported }), None) => {
                prop_assert_eq!(reported, requested);
              }
              outcome => {
                prop_assert!(false, "unexpected outcome: {:?}", outcome);
              }
            }
          }
          Op::Free(index) => {
            if index >= model.len() {
              heap.free(&mut outside);
            } else if let Some(addr) = model[index].take() {
              heap.free(addr);
            } else {
              heap.free(heap.buckets[index].base());
            }
          }
        }

        prop_assert_eq!(heap.occupied(), model.iter().flatten().count());
      }
    }
  }
}
