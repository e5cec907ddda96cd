use thiserror::Error;

/// Failure to obtain a bucket.
///
/// Requests larger than one bucket and requests made while every bucket is
/// lent out are reported the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
  #[error("out of memory: no bucket available for {requested} bytes")]
  OutOfMemory { requested: usize },
}

/// Misuse of a [`BucketHandle`](crate::BucketHandle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HandleError {
  #[error("handle does not belong to this heap")]
  ForeignHandle,
  #[error("bucket {index} has been lent out again since this handle was issued")]
  StaleHandle { index: usize },
  #[error("bucket {index} is already free")]
  DoubleFree { index: usize },
}
