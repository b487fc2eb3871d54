// ─────────────────────────────────────────────────────────────────────
// SCPN Stencil Core — Grouped Allocation
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Aligned storage slabs, grouped by NUMA preference.
//!
//! Grid bytes are gathered per preference in a first pass, allocated
//! once per group, and handed out as aligned sub-ranges in a second
//! pass. A `NoBinding` preference performs aligned allocation only; the
//! other preferences degrade to the same aligned path on hosts without
//! a policy library, and the requested preference is kept for the
//! allocation report.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::collections::BTreeMap;
use std::ptr::NonNull;
use std::sync::Arc;
use stencil_types::{NumaPref, StencilError, StencilResult};

pub const CACHELINE_BYTES: usize = 64;

/// Allocations at or above this size get huge-page alignment.
pub const HUGE_ALIGN_BYTES: usize = 2 * 1024 * 1024;

/// A zero-initialized allocation with size-dependent alignment.
///
/// The base pointer is interior-mutable by design: the executor writes
/// disjoint sub-ranges from many threads through `as_mut_ptr`. No Rust
/// reference to the region is ever created, so aliasing rules are not
/// violated; disjointness is the callers' invariant.
#[derive(Debug)]
pub struct AlignedBuf {
    ptr: NonNull<u8>,
    layout: Layout,
}

unsafe impl Send for AlignedBuf {}
unsafe impl Sync for AlignedBuf {}

impl AlignedBuf {
    /// Allocate `nbytes` zeroed bytes, cache-line aligned, or huge-page
    /// aligned at and above `HUGE_ALIGN_BYTES`.
    pub fn alloc(nbytes: usize) -> StencilResult<Self> {
        if nbytes == 0 {
            return Err(StencilError::AllocationFailed(
                "zero-byte allocation request".to_string(),
            ));
        }
        let align = if nbytes >= HUGE_ALIGN_BYTES {
            HUGE_ALIGN_BYTES
        } else {
            CACHELINE_BYTES
        };
        let layout = Layout::from_size_align(nbytes, align).map_err(|e| {
            StencilError::AllocationFailed(format!("bad layout for {nbytes} bytes: {e}"))
        })?;
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or_else(|| {
            StencilError::AllocationFailed(format!(
                "cannot allocate {} with alignment {align}",
                format_bytes(nbytes)
            ))
        })?;
        Ok(AlignedBuf { ptr, layout })
    }

    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    pub fn alignment(&self) -> usize {
        self.layout.align()
    }

    /// Base pointer; callers must stay within `len()` bytes and keep
    /// concurrent writes disjoint.
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        // SAFETY: allocated with this exact layout in alloc().
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

/// A slot inside a group slab: which slab, and where.
#[derive(Debug, Clone, Copy)]
pub struct SlotId(usize);

struct SlotInfo {
    pref_code: i64,
    offset: usize,
    nbytes: usize,
}

/// Two-pass grouped allocator: `request` everything first, `allocate`
/// once, then `resolve` each slot to its slab range.
#[derive(Default)]
pub struct GroupAlloc {
    slots: Vec<SlotInfo>,
    totals: BTreeMap<i64, usize>,
    slabs: BTreeMap<i64, Arc<AlignedBuf>>,
    allocated: bool,
}

impl GroupAlloc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pass 1: register `nbytes` under `pref`; the returned id resolves
    /// to a range after `allocate()`.
    pub fn request(&mut self, pref: NumaPref, nbytes: usize) -> SlotId {
        debug_assert!(!self.allocated, "request after allocate");
        let pref_code: i64 = pref.into();
        let total = self.totals.entry(pref_code).or_insert(0);
        // Each slot starts cache-line aligned within its slab.
        let offset = *total;
        let padded = nbytes.div_ceil(CACHELINE_BYTES) * CACHELINE_BYTES;
        *total += padded;
        self.slots.push(SlotInfo {
            pref_code,
            offset,
            nbytes,
        });
        SlotId(self.slots.len() - 1)
    }

    /// Pass 2: one slab per preference group.
    pub fn allocate(&mut self) -> StencilResult<()> {
        for (&pref_code, &nbytes) in &self.totals {
            let buf = AlignedBuf::alloc(nbytes)?;
            tracing::debug!(
                pref = pref_code,
                bytes = nbytes,
                align = buf.alignment(),
                "allocated grid slab"
            );
            self.slabs.insert(pref_code, Arc::new(buf));
        }
        self.allocated = true;
        Ok(())
    }

    /// Resolve a slot to its slab and byte range.
    pub fn resolve(&self, id: SlotId) -> StencilResult<(Arc<AlignedBuf>, usize, usize)> {
        if !self.allocated {
            return Err(StencilError::AllocationFailed(
                "resolve before allocate".to_string(),
            ));
        }
        let slot = &self.slots[id.0];
        let slab = self.slabs[&slot.pref_code].clone();
        Ok((slab, slot.offset, slot.nbytes))
    }

    /// Total bytes over all groups.
    pub fn total_bytes(&self) -> usize {
        self.totals.values().sum()
    }

    /// One line per group for the allocation report.
    pub fn report(&self) -> String {
        let mut out = String::new();
        for (&pref_code, &nbytes) in &self.totals {
            let pref = NumaPref::from(pref_code);
            out.push_str(&format!(
                "  numa pref {:?}: {} in one slab\n",
                pref,
                format_bytes(nbytes)
            ));
        }
        out
    }
}

/// Render a byte count with a binary SI multiplier, e.g. `412.0KiB`.
pub fn format_bytes(nbytes: usize) -> String {
    let num = nbytes as f64;
    const ONE_K: f64 = 1024.0;
    const ONE_M: f64 = ONE_K * ONE_K;
    const ONE_G: f64 = ONE_K * ONE_M;
    const ONE_T: f64 = ONE_K * ONE_G;
    if num >= ONE_T {
        format!("{:.1}TiB", num / ONE_T)
    } else if num >= ONE_G {
        format!("{:.1}GiB", num / ONE_G)
    } else if num >= ONE_M {
        format!("{:.1}MiB", num / ONE_M)
    } else if num >= ONE_K {
        format!("{:.1}KiB", num / ONE_K)
    } else {
        format!("{num}B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligned_buf_alignment_tiers() {
        let small = AlignedBuf::alloc(1024).expect("small alloc");
        assert_eq!(small.alignment(), CACHELINE_BYTES);
        assert_eq!(small.len(), 1024);

        let big = AlignedBuf::alloc(HUGE_ALIGN_BYTES).expect("big alloc");
        assert_eq!(big.alignment(), HUGE_ALIGN_BYTES);
        assert_eq!(big.as_mut_ptr() as usize % HUGE_ALIGN_BYTES, 0);
    }

    #[test]
    fn test_zero_byte_request_fails() {
        let err = AlignedBuf::alloc(0).unwrap_err();
        assert!(matches!(err, StencilError::AllocationFailed(_)));
    }

    #[test]
    fn test_buffer_is_zeroed() {
        let buf = AlignedBuf::alloc(4096).expect("alloc");
        let ptr = buf.as_mut_ptr();
        for i in 0..4096 {
            // SAFETY: within len, single-threaded.
            assert_eq!(unsafe { *ptr.add(i) }, 0);
        }
    }

    #[test]
    fn test_group_alloc_two_pass() {
        let mut ga = GroupAlloc::new();
        let a = ga.request(NumaPref::NoBinding, 100);
        let b = ga.request(NumaPref::NoBinding, 200);
        let c = ga.request(NumaPref::Node(0), 300);
        assert!(ga.resolve(a).is_err(), "resolve before allocate fails");
        ga.allocate().expect("allocate");

        let (slab_a, off_a, len_a) = ga.resolve(a).expect("slot a");
        let (slab_b, off_b, len_b) = ga.resolve(b).expect("slot b");
        let (slab_c, _, len_c) = ga.resolve(c).expect("slot c");
        assert!(Arc::ptr_eq(&slab_a, &slab_b), "same group shares a slab");
        assert!(!Arc::ptr_eq(&slab_a, &slab_c), "groups get distinct slabs");
        assert_eq!((len_a, len_b, len_c), (100, 200, 300));
        assert_eq!(off_a % CACHELINE_BYTES, 0);
        assert_eq!(off_b % CACHELINE_BYTES, 0);
        assert!(off_b >= off_a + len_a);
        assert!(ga.total_bytes() >= 600);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(2048), "2.0KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0MiB");
    }
}
