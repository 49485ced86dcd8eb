//! Heap tracking for peak-memory measurements.
//!
//! Install the counting allocator in the binary that wants numbers:
//!
//! ```rust,ignore
//! #[global_allocator]
//! static ALLOC: harness::alloc::CountingAllocator = harness::alloc::CountingAllocator;
//! ```
//!
//! Counters are process-wide. A `PeakScope` sees allocations from every
//! thread, including the detector's blocking pool, which is what a
//! detection's memory cost actually is. Scopes must not overlap.

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicU64, Ordering};

/// Keeps each counter on its own cache line
#[repr(align(64))]
struct PaddedAtomicU64(AtomicU64);

impl PaddedAtomicU64 {
    const fn new(v: u64) -> Self {
        Self(AtomicU64::new(v))
    }
}

static LIVE_BYTES: PaddedAtomicU64 = PaddedAtomicU64::new(0);
static PEAK_BYTES: PaddedAtomicU64 = PaddedAtomicU64::new(0);
static ALLOC_COUNT: PaddedAtomicU64 = PaddedAtomicU64::new(0);

#[inline]
fn grow(bytes: usize) {
    let live = LIVE_BYTES.0.fetch_add(bytes as u64, Ordering::Relaxed) + bytes as u64;
    PEAK_BYTES.0.fetch_max(live, Ordering::Relaxed);
}

#[inline]
fn shrink(bytes: usize) {
    LIVE_BYTES.0.fetch_sub(bytes as u64, Ordering::Relaxed);
}

/// `System` allocator wrapper that keeps a live/peak byte ledger.
pub struct CountingAllocator;

unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc(layout);
        if !ptr.is_null() {
            ALLOC_COUNT.0.fetch_add(1, Ordering::Relaxed);
            grow(layout.size());
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc_zeroed(layout);
        if !ptr.is_null() {
            ALLOC_COUNT.0.fetch_add(1, Ordering::Relaxed);
            grow(layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout);
        shrink(layout.size());
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = System.realloc(ptr, layout, new_size);
        if !new_ptr.is_null() {
            if new_size > layout.size() {
                grow(new_size - layout.size());
            } else {
                shrink(layout.size() - new_size);
            }
        }
        new_ptr
    }
}

/// Current heap usage and allocation count
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapSnapshot {
    pub live_bytes: u64,
    pub peak_bytes: u64,
    pub allocations: u64,
}

pub fn heap_snapshot() -> HeapSnapshot {
    HeapSnapshot {
        live_bytes: LIVE_BYTES.0.load(Ordering::Relaxed),
        peak_bytes: PEAK_BYTES.0.load(Ordering::Relaxed),
        allocations: ALLOC_COUNT.0.load(Ordering::Relaxed),
    }
}

/// Measures how far heap usage rose above its starting level.
///
/// Starting a scope lowers the global peak to the current live total,
/// so `finish` reports the high-water mark reached inside the scope.
/// Without the counting allocator installed every scope reports 0.
pub struct PeakScope {
    baseline: u64,
    allocations: u64,
}

impl PeakScope {
    pub fn start() -> Self {
        let live = LIVE_BYTES.0.load(Ordering::Relaxed);
        PEAK_BYTES.0.store(live, Ordering::Relaxed);
        Self {
            baseline: live,
            allocations: ALLOC_COUNT.0.load(Ordering::Relaxed),
        }
    }

    /// Peak bytes above the baseline, and allocations made, since `start`
    pub fn finish(self) -> (u64, u64) {
        let snapshot = heap_snapshot();
        (
            snapshot.peak_bytes.saturating_sub(self.baseline),
            snapshot.allocations.saturating_sub(self.allocations),
        )
    }
}
