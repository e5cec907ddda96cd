use std::cell::UnsafeCell;

/// Alignment of every bucket's base address.
pub const BUCKET_ALIGN: usize = 16;

/// Storage for one bucket. The bytes sit behind an `UnsafeCell` so pointers
/// into them stay valid while the owning heap is only shared-borrowed.
#[repr(C, align(16))]
pub struct Bucket<const C: usize> {
  data: UnsafeCell<[u8; C]>,
}

impl<const C: usize> Bucket<C> {
  pub const fn new() -> Self {
    Self {
      data: UnsafeCell::new([0; C]),
    }
  }

  pub fn base(&self) -> *mut u8 {
    self.data.get().cast::<u8>()
  }

  /// # Safety
  ///
  /// No mutable reference to, and no write through a raw pointer into, this
  /// bucket may exist for the lifetime of the returned slice.
  pub unsafe fn bytes(&self) -> &[u8] {
    unsafe { &*self.data.get() }
  }

  /// # Safety
  ///
  /// The caller must hold the only access to this bucket for the lifetime of
  /// the returned slice.
  #[allow(clippy::mut_from_ref)]
  pub unsafe fn bytes_mut(&self) -> &mut [u8] {
    unsafe { &mut *self.data.get() }
  }
}

#[cfg(test)]
mod tests {
  use std::mem;

  use super::*;

  #[test]
  fn test_bucket_alignment() {
    assert_eq!(mem::align_of::<Bucket<1>>(), BUCKET_ALIGN);
    assert_eq!(mem::size_of::<Bucket<4096>>(), 4096);

    let bucket = Bucket::<24>::new();
    assert_eq!(bucket.base() as usize % BUCKET_ALIGN, 0);
    assert_eq!(unsafe { bucket.bytes() }.len(), 24);
  }
}
