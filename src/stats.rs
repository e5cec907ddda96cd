use std::fmt;

/// Point-in-time view of a heap's occupancy and lifetime counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
  pub bucket_capacity: usize,
  pub bucket_count: usize,
  pub occupied: usize,
  pub peak_occupied: usize,
  pub allocations: u64,
  pub failed_allocations: u64,
  pub releases: u64,
}

impl HeapStats {
  pub fn available(&self) -> usize {
    self.bucket_count.saturating_sub(self.occupied)
  }

  /// Bytes currently lent out, counted in whole buckets.
  pub fn bytes_in_use(&self) -> usize {
    self.occupied * self.bucket_capacity
  }
}

impl fmt::Display for HeapStats {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(
      f,
      "buckets {}/{} in use ({} bytes each, peak {}), allocations = {}, failed = {}, releases = {}",
      self.occupied,
      self.bucket_count,
      self.bucket_capacity,
      self.peak_occupied,
      self.allocations,
      self.failed_allocations,
      self.releases,
    )
  }
}
