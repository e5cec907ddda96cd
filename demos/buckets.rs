use std::{io::Read, ptr};

use bucketheap::{BucketHeap, DEFAULT_BUCKET_CAPACITY, DEFAULT_BUCKET_COUNT, DefaultBucketHeap};
use tracing_subscriber::EnvFilter;

/// Waits until the user presses ENTER, when the demo was started with `--pause`.
/// Useful to inspect the process with `pmap` or `gdb` between steps.
fn block_until_enter_pressed(pause: bool) {
  if !pause {
    return;
  }
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints one cell per bucket, `#` for lent and `.` for free, followed by the
/// heap's counters.
fn print_bucket_map<const C: usize, const N: usize>(
  label: &str,
  heap: &BucketHeap<C, N>,
) {
  let map: String = (0..heap.bucket_count())
    .map(|index| if heap.is_occupied(index) { '#' } else { '.' })
    .collect();

  println!("[{}] [{}] {}", label, map, heap.stats());
}

fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .init();

  let pause = std::env::args().any(|arg| arg == "--pause");

  let heap = DefaultBucketHeap::new();

  print_bucket_map("start", &heap);
  block_until_enter_pressed(pause);

  // --------------------------------------------------------------------
  // 1) Fill every bucket. Request sizes vary but each takes a whole bucket,
  //    so consecutive base addresses are DEFAULT_BUCKET_CAPACITY apart.
  // --------------------------------------------------------------------
  let mut addrs = Vec::with_capacity(DEFAULT_BUCKET_COUNT);
  for i in 0..DEFAULT_BUCKET_COUNT {
    let requested = (i + 1) * 100;
    match heap.allocate(requested) {
      Ok(addr) => {
        unsafe { ptr::write_bytes(addr.as_ptr(), i as u8, requested) };
        println!("[1] Allocated {} bytes in bucket {} at {:?}", requested, i, addr);
        addrs.push(addr);
      }
      Err(err) => println!("[1] Unexpected failure: {}", err),
    }
  }
  if let [first, second, ..] = addrs.as_slice() {
    println!(
      "[1] Distance between bucket 0 and 1 = {} bytes",
      second.as_ptr() as usize - first.as_ptr() as usize
    );
  }
  print_bucket_map("full", &heap);
  block_until_enter_pressed(pause);

  // --------------------------------------------------------------------
  // 2) The heap is full: even a single byte is refused.
  // --------------------------------------------------------------------
  match heap.allocate(1) {
    Ok(addr) => println!("\n[2] Unexpected allocation at {:?}", addr),
    Err(err) => println!("\n[2] Allocate 1 byte: {}", err),
  }

  // --------------------------------------------------------------------
  // 3) Oversized requests fail regardless of free buckets.
  // --------------------------------------------------------------------
  match heap.allocate(DEFAULT_BUCKET_CAPACITY + 1) {
    Ok(addr) => println!("[3] Unexpected allocation at {:?}", addr),
    Err(err) => println!("[3] Allocate {} bytes: {}", DEFAULT_BUCKET_CAPACITY + 1, err),
  }
  block_until_enter_pressed(pause);

  // --------------------------------------------------------------------
  // 4) Free bucket 4 and allocate a full bucket: first-fit hands it back.
  //    Bucket 0 still holds what step 1 wrote into it.
  // --------------------------------------------------------------------
  let freed = addrs[4];
  heap.free(freed.as_ptr());
  heap.free(freed.as_ptr());
  println!("\n[4] Freed bucket 4 (twice, the second call is a no-op)");
  print_bucket_map("freed", &heap);

  match heap.allocate(DEFAULT_BUCKET_CAPACITY) {
    Ok(addr) => println!(
      "[4] Reallocated {:?}, same bucket? {}",
      addr,
      if addr == freed { "Yes" } else { "No" }
    ),
    Err(err) => println!("[4] Unexpected failure: {}", err),
  }
  println!("[4] First byte of bucket 0 = {}", unsafe { addrs[0].as_ptr().read() });
  block_until_enter_pressed(pause);

  // --------------------------------------------------------------------
  // 5) Handle API: a pointer loan becomes a handle loan, and reusing the
  //    handle after reclaiming it is reported instead of ignored.
  // --------------------------------------------------------------------
  match heap.handle_for(addrs[0].as_ptr()) {
    Some(mut handle) => {
      if let Ok(bytes) = heap.bytes_mut(&mut handle) {
        bytes[..5].copy_from_slice(b"hello");
      }
      println!("\n[5] Bucket {} is now lent through a handle", handle.index());

      heap.free(addrs[0].as_ptr());
      println!("[5] free() on its old pointer is ignored: occupied = {}", heap.is_occupied(0));

      if let Err(err) = heap.reclaim(&mut handle) {
        println!("[5] Unexpected failure: {}", err);
      }
      match heap.reclaim(&mut handle) {
        Ok(()) => println!("[5] Second reclaim unexpectedly succeeded"),
        Err(err) => println!("[5] Second reclaim rejected: {}", err),
      }
    }
    None => println!("\n[5] Bucket 0 could not be converted to a handle"),
  }

  println!();
  print_bucket_map("end", &heap);
}
