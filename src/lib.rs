//! # bucketheap - A Fixed-Bucket Memory Pool
//!
//! This crate provides a **bucket heap**: a pool of `N` equally sized
//! memory regions ("buckets") of `C` bytes each, owned inline and lent out
//! one whole bucket per request.
//!
//! ## Overview
//!
//! ```text
//!   Bucket Heap Concept (C = 4096, N = 10):
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                          BucketHeap                                  │
//!   │                                                                      │
//!   │   index   0     1     2     3     4     5     6     7     8     9    │
//!   │         ┌─────┬─────┬─────┬─────┬─────┬─────┬─────┬─────┬─────┬─────┐│
//!   │  data   │ 4K  │ 4K  │ 4K  │ 4K  │ 4K  │ 4K  │ 4K  │ 4K  │ 4K  │ 4K  ││
//!   │         └─────┴─────┴─────┴─────┴─────┴─────┴─────┴─────┴─────┴─────┘│
//!   │  used     T     T     F     T     F     F     F     F     F     F    │
//!   │                       ▲                                              │
//!   │                       └── next allocation (first free, ascending)    │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   Any request of up to C bytes takes one whole bucket.
//!   Requests above C, or requests while every bucket is used, fail.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   bucketheap
//!   ├── bucket     - Fixed-size aligned storage region (internal)
//!   ├── error      - AllocError, HandleError
//!   ├── handle     - BucketHandle, a generation-tagged loan token
//!   ├── heap       - BucketHeap implementation
//!   └── stats      - HeapStats snapshot
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use bucketheap::{AllocError, BucketHeap};
//!
//! let heap = BucketHeap::<64, 2>::new();
//!
//! let first = heap.allocate(64).unwrap();
//! let _second = heap.allocate(1).unwrap();
//! assert_eq!(heap.allocate(1), Err(AllocError::OutOfMemory { requested: 1 }));
//!
//! heap.free(first.as_ptr());
//! assert_eq!(heap.allocate(8), Ok(first));
//! ```
//!
//! ## Two Ways to Borrow a Bucket
//!
//! ```text
//!   Pointer API                         Handle API
//!   ───────────                         ──────────
//!   allocate(n) -> NonNull<u8>          lend(n)       -> BucketHandle
//!   free(ptr)                           reclaim(&mut handle) -> Result<(), HandleError>
//!   handle_for(ptr) ──────────────────► bytes / bytes_mut(&handle)
//!
//!   free() ignores anything that is     reclaim() reports foreign, stale
//!   not the base of an allocated        and double-freed handles.
//!   bucket.
//! ```
//!
//! A handle remembers which heap issued it and the bucket's generation at
//! the time of the loan, so a handle that outlives its loan is caught
//! instead of silently releasing somebody else's bucket.
//!
//! ## Limitations
//!
//! - **Fixed capacity**: bucket size and count are compile-time constants
//! - **Whole-bucket granularity**: a 1 byte request consumes a full bucket
//! - **Single thread**: bookkeeping lives in `Cell`s, so the heap is not
//!   `Sync`; wrap it in a lock to share it between threads
//! - **Non-zero buckets**: `C == 0` is rejected at compile time
//! - **Pinned pointers**: pointers from `allocate` dangle if the heap moves
//!
//! ## Safety
//!
//! The handle API is entirely safe. Pointers returned by `allocate` are raw:
//! reading or writing through them requires `unsafe` and is only sound while
//! the bucket stays lent through `allocate` (not converted by `handle_for`)
//! and the heap is neither moved nor dropped.

mod bucket;
mod error;
mod handle;
mod heap;
mod stats;

pub use bucket::BUCKET_ALIGN;
pub use error::{AllocError, HandleError};
pub use handle::BucketHandle;
pub use heap::{BucketHeap, DEFAULT_BUCKET_CAPACITY, DEFAULT_BUCKET_COUNT, DefaultBucketHeap};
pub use stats::HeapStats;
