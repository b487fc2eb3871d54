// ─────────────────────────────────────────────────────────────────────
// SCPN Stencil Core — Grid View
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Padded, aligned n-D grid storage with a circular step dimension and
//! per-step-slot dirty tracking.
//!
//! A grid owns a byte range inside a shared slab plus the mapping from
//! logical indices to offsets: row-major over the declared dims, with
//! left/right pads around the owned extent of each domain dim and the
//! unit-stride dim padded to a vector-length multiple. Domain indices
//! are global; the step dim is a ring of `step_depth` slots indexed by
//! `t mod step_depth`.

use crate::alloc::AlignedBuf;
use ndarray::ArrayD;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use stencil_types::{round_up, BoundingBox, Dims, IdxTuple, Real, StencilError, StencilResult, VLEN};

/// Upper bound on the step-buffer ring; keeps exchange tags compact.
pub const MAX_STEP_DEPTH: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimKind {
    Step,
    Domain,
    Misc,
}

/// Layout of one declared dim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridDim {
    pub name: String,
    pub kind: DimKind,
    /// Allocated points along this dim.
    pub alloc_size: usize,
    /// Pads outside the owned extent (domain dims only); `lpad >= lhalo`
    /// and `rpad >= rhalo` always hold.
    pub lpad: i64,
    pub rpad: i64,
    pub lhalo: i64,
    pub rhalo: i64,
    /// First/last owned (valid) logical index.
    pub first: i64,
    pub last: i64,
    /// Stride in elements.
    pub stride: usize,
}

/// Shared storage range: slab + byte offset.
#[derive(Clone)]
struct Storage {
    slab: Arc<AlignedBuf>,
    byte_offset: usize,
}

pub struct Grid {
    name: String,
    dims: Vec<GridDim>,
    step_posn: Option<usize>,
    step_depth: usize,
    num_reals: usize,
    storage: Option<Storage>,
    dirty: Vec<AtomicBool>,
}

impl Grid {
    /// Lay out a grid over `dim_names` (each a step, domain, or misc dim
    /// of `dims`). Domain dims span the rank's owned extent given by
    /// `domain_first`/`domain_len` and carry `halo` plus `min_pad`
    /// points of padding on each side. `fixed_sizes` instead sizes every
    /// dim directly, zero-based, with no pads or halos.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        name: &str,
        dim_names: &[String],
        dims: &Dims,
        step_depth: usize,
        domain_first: &IdxTuple,
        domain_len: &IdxTuple,
        halo: &IdxTuple,
        min_pad: &IdxTuple,
        fixed_sizes: Option<&[i64]>,
    ) -> StencilResult<Grid> {
        if let Some(sizes) = fixed_sizes {
            if sizes.len() != dim_names.len() {
                return Err(StencilError::ConfigInvalid(format!(
                    "grid '{name}': {} sizes given for {} dims",
                    sizes.len(),
                    dim_names.len()
                )));
            }
        }
        if step_depth > MAX_STEP_DEPTH {
            return Err(StencilError::ConfigInvalid(format!(
                "grid '{name}': step depth {step_depth} exceeds the supported {MAX_STEP_DEPTH}"
            )));
        }

        let mut out_dims = Vec::with_capacity(dim_names.len());
        let mut step_posn = None;
        for (i, dn) in dim_names.iter().enumerate() {
            let kind = if *dn == dims.step_dim {
                DimKind::Step
            } else if dims.domain_dims.contains(dn) {
                DimKind::Domain
            } else if dims.misc_dims.contains(dn) {
                DimKind::Misc
            } else {
                return Err(StencilError::ConfigInvalid(format!(
                    "grid '{name}': unknown dimension '{dn}'"
                )));
            };

            let gd = match (kind, fixed_sizes) {
                (DimKind::Step, _) => {
                    if step_posn.is_some() {
                        return Err(StencilError::ConfigInvalid(format!(
                            "grid '{name}': step dim declared twice"
                        )));
                    }
                    step_posn = Some(i);
                    GridDim {
                        name: dn.clone(),
                        kind,
                        alloc_size: step_depth.max(1),
                        lpad: 0,
                        rpad: 0,
                        lhalo: 0,
                        rhalo: 0,
                        first: 0,
                        last: step_depth.max(1) as i64 - 1,
                        stride: 0,
                    }
                }
                (_, Some(sizes)) => {
                    let size = sizes[i];
                    if size < 1 {
                        return Err(StencilError::ConfigInvalid(format!(
                            "grid '{name}': size of dim '{dn}' must be positive, got {size}"
                        )));
                    }
                    GridDim {
                        name: dn.clone(),
                        kind,
                        alloc_size: size as usize,
                        lpad: 0,
                        rpad: 0,
                        lhalo: 0,
                        rhalo: 0,
                        first: 0,
                        last: size - 1,
                        stride: 0,
                    }
                }
                (DimKind::Domain, None) => {
                    let first = domain_first.get(dn).expect("domain dim present");
                    let len = domain_len.get(dn).expect("domain dim present");
                    let h = halo.get(dn).unwrap_or(0);
                    let mp = min_pad.get(dn).unwrap_or(0);
                    let mut lpad = h + mp;
                    let mut rpad = h + mp;
                    let mut alloc = len + lpad + rpad;
                    if *dn == dims.inner_dim() {
                        // Keep storage rows a whole number of folds and
                        // the owned origin on a fold boundary.
                        lpad = round_up(lpad, VLEN as i64);
                        alloc = round_up(len + lpad + rpad, VLEN as i64);
                        rpad = alloc - len - lpad;
                    }
                    GridDim {
                        name: dn.clone(),
                        kind,
                        alloc_size: alloc as usize,
                        lpad,
                        rpad,
                        lhalo: h,
                        rhalo: h,
                        first,
                        last: first + len - 1,
                        stride: 0,
                    }
                }
                (DimKind::Misc, None) => GridDim {
                    name: dn.clone(),
                    kind,
                    alloc_size: 1,
                    lpad: 0,
                    rpad: 0,
                    lhalo: 0,
                    rhalo: 0,
                    first: 0,
                    last: 0,
                    stride: 0,
                },
            };
            out_dims.push(gd);
        }

        // Row-major strides, last dim unit stride.
        let mut stride = 1usize;
        for gd in out_dims.iter_mut().rev() {
            gd.stride = stride;
            stride *= gd.alloc_size;
        }
        let num_reals = stride;

        let depth = if step_posn.is_some() {
            step_depth.max(1)
        } else {
            1
        };
        let dirty = (0..depth).map(|_| AtomicBool::new(false)).collect();

        Ok(Grid {
            name: name.to_string(),
            dims: out_dims,
            step_posn,
            step_depth: depth,
            num_reals,
            storage: None,
            dirty,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dims(&self) -> &[GridDim] {
        &self.dims
    }

    pub fn dim(&self, name: &str) -> Option<&GridDim> {
        self.dims.iter().find(|d| d.name == name)
    }

    pub fn has_step_dim(&self) -> bool {
        self.step_posn.is_some()
    }

    pub fn step_depth(&self) -> usize {
        self.step_depth
    }

    pub fn num_storage_reals(&self) -> usize {
        self.num_reals
    }

    pub fn num_storage_bytes(&self) -> usize {
        self.num_reals * std::mem::size_of::<Real>()
    }

    pub fn element_bytes(&self) -> usize {
        std::mem::size_of::<Real>()
    }

    pub fn is_allocated(&self) -> bool {
        self.storage.is_some()
    }

    /// Attach a byte range of `slab` as this grid's storage.
    pub fn attach_storage(&mut self, slab: Arc<AlignedBuf>, byte_offset: usize) -> StencilResult<()> {
        if byte_offset + self.num_storage_bytes() > slab.len() {
            return Err(StencilError::AllocationFailed(format!(
                "grid '{}': storage range {}..{} exceeds slab of {} bytes",
                self.name,
                byte_offset,
                byte_offset + self.num_storage_bytes(),
                slab.len()
            )));
        }
        self.storage = Some(Storage { slab, byte_offset });
        Ok(())
    }

    /// Allocate private storage; used by tests and scratch grids.
    pub fn alloc_standalone(&mut self) -> StencilResult<()> {
        let buf = AlignedBuf::alloc(self.num_storage_bytes())?;
        self.attach_storage(Arc::new(buf), 0)
    }

    /// Adopt `other`'s storage range. Layouts must match exactly.
    pub fn share_storage(&mut self, other: &Grid) -> StencilResult<()> {
        if self.dims != other.dims {
            return Err(StencilError::ShapeMismatch(format!(
                "grid '{}' cannot share storage with '{}': layouts differ",
                self.name, other.name
            )));
        }
        let st = other.storage.as_ref().ok_or_else(|| {
            StencilError::ShapeMismatch(format!(
                "grid '{}' has no storage to share",
                other.name
            ))
        })?;
        self.storage = Some(st.clone());
        Ok(())
    }

    #[inline]
    fn base_ptr(&self) -> *mut Real {
        let st = self
            .storage
            .as_ref()
            .expect("grid storage accessed before allocation");
        // SAFETY: attach_storage checked the range.
        unsafe { st.slab.as_mut_ptr().add(st.byte_offset) as *mut Real }
    }

    /// Ring slot for step index `t`.
    #[inline]
    pub fn step_slot(&self, t: i64) -> usize {
        t.rem_euclid(self.step_depth as i64) as usize
    }

    #[cfg(debug_assertions)]
    fn check_index(&self, gd: &GridDim, idx: i64) {
        let lo = gd.first - gd.lhalo;
        let hi = gd.last + gd.rhalo;
        if idx < lo || idx > hi {
            panic!(
                "{}",
                StencilError::IndexOutOfRange {
                    grid: self.name.clone(),
                    dim: gd.name.clone(),
                    index: idx,
                    lo,
                    hi,
                }
            );
        }
    }

    /// Element offset of (`t`, `pt`); `pt` must carry every non-step dim
    /// of this grid by name.
    #[inline]
    pub fn offset_of(&self, t: i64, pt: &IdxTuple) -> usize {
        let mut off = 0usize;
        for (i, gd) in self.dims.iter().enumerate() {
            let local = if Some(i) == self.step_posn {
                self.step_slot(t) as i64
            } else {
                let idx = pt
                    .get(&gd.name)
                    .expect("point tuple is missing a grid dimension");
                #[cfg(debug_assertions)]
                self.check_index(gd, idx);
                idx - gd.first + gd.lpad
            };
            off += local as usize * gd.stride;
        }
        off
    }

    #[inline]
    pub fn read_point(&self, t: i64, pt: &IdxTuple) -> Real {
        let off = self.offset_of(t, pt);
        // SAFETY: offset_of stays within the allocation for any index
        // admitted by the debug bounds check; out-of-range release-mode
        // access is declared undefined by the grid contract.
        unsafe { self.base_ptr().add(off).read() }
    }

    /// # Safety
    /// Concurrent callers must write disjoint points; the block
    /// decomposition guarantees this inside one pack.
    #[inline]
    pub unsafe fn write_point(&self, t: i64, pt: &IdxTuple, val: Real) {
        let off = self.offset_of(t, pt);
        self.base_ptr().add(off).write(val);
        self.dirty[self.step_slot(t)].store(true, Ordering::Relaxed);
    }

    /// Single-threaded write through an exclusive borrow.
    #[inline]
    pub fn write_point_mut(&mut self, t: i64, pt: &IdxTuple, val: Real) {
        // SAFETY: exclusive borrow, no concurrent writers.
        unsafe { self.write_point(t, pt, val) }
    }

    /// True when a whole fold starting at `pt` is storage-aligned in the
    /// unit-stride dim.
    #[inline]
    pub fn is_vec_aligned(&self, pt: &IdxTuple) -> bool {
        let gd = self.dims.last().expect("grid has dims");
        if gd.stride != 1 {
            return false;
        }
        match pt.get(&gd.name) {
            Some(idx) => (idx - gd.first + gd.lpad) % VLEN as i64 == 0,
            None => false,
        }
    }

    /// Read one vector fold at an aligned point.
    #[inline]
    pub fn read_vec(&self, t: i64, pt: &IdxTuple) -> crate::vec::RealVec {
        debug_assert!(self.is_vec_aligned(pt), "unaligned vector read");
        let off = self.offset_of(t, pt);
        // SAFETY: as read_point; the fold stays inside the padded row.
        let slice = unsafe { std::slice::from_raw_parts(self.base_ptr().add(off), VLEN) };
        crate::vec::RealVec::load(slice)
    }

    /// # Safety
    /// As `write_point`, for a whole fold.
    #[inline]
    pub unsafe fn write_vec(&self, t: i64, pt: &IdxTuple, val: crate::vec::RealVec) {
        debug_assert!(self.is_vec_aligned(pt), "unaligned vector write");
        let off = self.offset_of(t, pt);
        let slice = std::slice::from_raw_parts_mut(self.base_ptr().add(off), VLEN);
        val.store(slice);
        self.dirty[self.step_slot(t)].store(true, Ordering::Relaxed);
    }

    /// Copy `dst.len()` consecutive unit-stride elements starting at
    /// `pt` into `dst`.
    #[inline]
    pub fn read_row(&self, t: i64, pt: &IdxTuple, dst: &mut [Real]) {
        let off = self.offset_of(t, pt);
        #[cfg(debug_assertions)]
        {
            let gd = self.dims.last().expect("grid has dims");
            let idx = pt.get(&gd.name).expect("row read needs the inner dim");
            self.check_index(gd, idx + dst.len() as i64 - 1);
        }
        // SAFETY: as read_point; the run was bounds-checked in debug.
        let src = unsafe { std::slice::from_raw_parts(self.base_ptr().add(off), dst.len()) };
        dst.copy_from_slice(src);
    }

    /// # Safety
    /// As `write_point`, for a whole unit-stride run.
    #[inline]
    pub unsafe fn write_row(&self, t: i64, pt: &IdxTuple, src: &[Real]) {
        let off = self.offset_of(t, pt);
        #[cfg(debug_assertions)]
        {
            let gd = self.dims.last().expect("grid has dims");
            let idx = pt.get(&gd.name).expect("row write needs the inner dim");
            self.check_index(gd, idx + src.len() as i64 - 1);
        }
        let dst = std::slice::from_raw_parts_mut(self.base_ptr().add(off), src.len());
        dst.copy_from_slice(src);
        self.dirty[self.step_slot(t)].store(true, Ordering::Relaxed);
    }

    // ── Dirty tracking ───────────────────────────────────────────────

    pub fn is_dirty(&self, slot: usize) -> bool {
        self.dirty[slot].load(Ordering::Relaxed)
    }

    pub fn mark_dirty(&self, t: i64) {
        self.dirty[self.step_slot(t)].store(true, Ordering::Relaxed);
    }

    pub fn clear_dirty(&self, slot: usize) {
        self.dirty[slot].store(false, Ordering::Relaxed);
    }

    // ── Whole-grid initialization and comparison ─────────────────────

    /// Set every allocated element (pads included) to `val`.
    pub fn set_all(&mut self, val: Real) {
        let ptr = self.base_ptr();
        for i in 0..self.num_reals {
            // SAFETY: exclusive borrow; i < num_reals.
            unsafe { ptr.add(i).write(val) };
        }
        for d in &self.dirty {
            d.store(true, Ordering::Relaxed);
        }
    }

    /// Set every allocated element to a value derived from `seed` and
    /// its offset; different per element, different per seed.
    pub fn set_in_seq(&mut self, seed: Real) {
        let ptr = self.base_ptr();
        for i in 0..self.num_reals {
            let v = seed * (1.0 + (i % 1013) as Real);
            // SAFETY: exclusive borrow; i < num_reals.
            unsafe { ptr.add(i).write(v) };
        }
        for d in &self.dirty {
            d.store(true, Ordering::Relaxed);
        }
    }

    fn owned_shape(&self) -> Vec<usize> {
        self.dims
            .iter()
            .enumerate()
            .filter(|&(i, _)| Some(i) != self.step_posn)
            .map(|(_, gd)| (gd.last - gd.first + 1) as usize)
            .collect()
    }

    fn non_step_dims(&self) -> Vec<&GridDim> {
        self.dims
            .iter()
            .enumerate()
            .filter(|&(i, _)| Some(i) != self.step_posn)
            .map(|(_, gd)| gd)
            .collect()
    }

    /// Copy the owned extent at step `t` into a dense array.
    pub fn to_ndarray(&self, t: i64) -> ArrayD<Real> {
        let shape = self.owned_shape();
        let dims = self.non_step_dims();
        let mut arr = ArrayD::zeros(shape.clone());
        let names: Vec<String> = dims.iter().map(|gd| gd.name.clone()).collect();
        let firsts: Vec<i64> = dims.iter().map(|gd| gd.first).collect();
        let dimset = stencil_types::DimSet::new(names);
        for (flat, v) in arr.iter_mut().enumerate() {
            let mut rem = flat;
            let mut vals = vec![0i64; shape.len()];
            for k in (0..shape.len()).rev() {
                vals[k] = (rem % shape[k]) as i64 + firsts[k];
                rem /= shape[k];
            }
            let pt = IdxTuple::new(&dimset, vals);
            *v = self.read_point(t, &pt);
        }
        arr
    }

    /// Fill the owned extent at step `t` from a dense array.
    pub fn assign_from_ndarray(&mut self, t: i64, arr: &ArrayD<Real>) -> StencilResult<()> {
        let shape = self.owned_shape();
        if arr.shape() != shape.as_slice() {
            return Err(StencilError::ShapeMismatch(format!(
                "grid '{}': array shape {:?} does not match owned shape {:?}",
                self.name,
                arr.shape(),
                shape
            )));
        }
        let dims = self.non_step_dims();
        let names: Vec<String> = dims.iter().map(|gd| gd.name.clone()).collect();
        let firsts: Vec<i64> = dims.iter().map(|gd| gd.first).collect();
        let dimset = stencil_types::DimSet::new(names);
        for (flat, v) in arr.iter().enumerate() {
            let mut rem = flat;
            let mut vals = vec![0i64; shape.len()];
            for k in (0..shape.len()).rev() {
                vals[k] = (rem % shape[k]) as i64 + firsts[k];
                rem /= shape[k];
            }
            let pt = IdxTuple::new(&dimset, vals);
            self.write_point_mut(t, &pt, *v);
        }
        Ok(())
    }

    /// Count owned points at step `t` whose values differ beyond
    /// `eps * max(|a|, |b|, 1)`.
    pub fn compare_data(&self, t: i64, other: &Grid, eps: Real) -> StencilResult<usize> {
        let a = self.to_ndarray(t);
        let b = other.to_ndarray(t);
        if a.shape() != b.shape() {
            return Err(StencilError::ShapeMismatch(format!(
                "grids '{}' and '{}' have different owned shapes",
                self.name, other.name
            )));
        }
        let mut mismatches = 0;
        for (x, y) in a.iter().zip(b.iter()) {
            let tol = eps * x.abs().max(y.abs()).max(1.0);
            if (x - y).abs() > tol {
                mismatches += 1;
            }
        }
        Ok(mismatches)
    }

    /// Rebase a scratch grid so its owned extent starts at `begin`
    /// (halos extend outside it). Storage must already be large enough.
    pub fn rebase(&mut self, begin: &IdxTuple, len: &IdxTuple) {
        for gd in self.dims.iter_mut() {
            if gd.kind != DimKind::Domain {
                continue;
            }
            if let (Some(b), Some(l)) = (begin.get(&gd.name), len.get(&gd.name)) {
                debug_assert!(
                    (l + gd.lpad + gd.rpad) as usize <= gd.alloc_size,
                    "scratch rebase exceeds allocation in '{}'",
                    gd.name
                );
                gd.first = b;
                gd.last = b + l - 1;
            }
        }
    }
}

/// Visit every point of `bb` in lexicographic order.
pub fn for_each_point_in(bb: &BoundingBox, mut f: impl FnMut(&IdxTuple)) {
    if bb.is_degenerate() {
        return;
    }
    let ndims = bb.begin.len();
    let mut pt = bb.begin.clone();
    loop {
        f(&pt);
        // Odometer increment, last dim fastest.
        let mut k = ndims;
        loop {
            if k == 0 {
                return;
            }
            k -= 1;
            let next = pt.at(k) + 1;
            if next < bb.end.at(k) {
                pt.set_at(k, next);
                break;
            }
            pt.set_at(k, bb.begin.at(k));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stencil_types::DimSet;

    fn dims3() -> Dims {
        Dims::new("t", ["x", "y", "z"], [])
    }

    fn small_grid(depth: usize) -> Grid {
        let d = dims3();
        let dd = d.domain_dims.clone();
        let mut g = Grid::build(
            "u",
            &[
                "t".to_string(),
                "x".to_string(),
                "y".to_string(),
                "z".to_string(),
            ],
            &d,
            depth,
            &IdxTuple::filled(&dd, 0),
            &IdxTuple::filled(&dd, 8),
            &IdxTuple::filled(&dd, 2),
            &IdxTuple::filled(&dd, 0),
            None,
        )
        .expect("build");
        g.alloc_standalone().expect("alloc");
        g
    }

    #[test]
    fn test_layout_pads_inner_dim_to_fold() {
        let g = small_grid(2);
        let z = g.dim("z").expect("z dim");
        assert_eq!(z.stride, 1);
        assert_eq!(z.lpad % VLEN as i64, 0);
        assert_eq!(z.alloc_size % VLEN, 0);
        let x = g.dim("x").expect("x dim");
        assert_eq!(x.alloc_size, 12, "8 owned + 2 halo each side");
        assert_eq!(x.lhalo, 2);
    }

    #[test]
    fn test_read_write_roundtrip_incl_halo() {
        let mut g = small_grid(2);
        let dd = dims3().domain_dims;
        // Every index in [first - halo, last + halo] per dim.
        for x in -2..10 {
            let pt = IdxTuple::new(&dd, vec![x, 3, 4]);
            g.write_point_mut(0, &pt, x as Real * 1.5);
        }
        for x in -2..10 {
            let pt = IdxTuple::new(&dd, vec![x, 3, 4]);
            assert_eq!(g.read_point(0, &pt), x as Real * 1.5);
        }
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "out of range")]
    fn test_out_of_range_panics_in_debug() {
        let g = small_grid(2);
        let dd = dims3().domain_dims;
        let pt = IdxTuple::new(&dd, vec![11, 0, 0]);
        let _ = g.read_point(0, &pt);
    }

    #[test]
    fn test_step_slots_are_independent() {
        let mut g = small_grid(3);
        let dd = dims3().domain_dims;
        let pt = IdxTuple::new(&dd, vec![1, 1, 1]);
        g.write_point_mut(0, &pt, 10.0);
        g.write_point_mut(1, &pt, 20.0);
        g.write_point_mut(2, &pt, 30.0);
        // Slot 0 is reused at t = 3.
        assert_eq!(g.read_point(3, &pt), 10.0);
        g.write_point_mut(3, &pt, 40.0);
        assert_eq!(g.read_point(0, &pt), 40.0);
        assert_eq!(g.read_point(1, &pt), 20.0);
    }

    #[test]
    fn test_dirty_bit_follows_step_ring() {
        let mut g = small_grid(4);
        for s in 0..4 {
            g.clear_dirty(s);
        }
        let dd = dims3().domain_dims;
        let pt = IdxTuple::new(&dd, vec![0, 0, 0]);
        g.write_point_mut(5, &pt, 1.0);
        assert!(g.is_dirty(1), "writing step 5 sets dirty[5 mod 4]");
        for s in [0, 2, 3] {
            assert!(!g.is_dirty(s), "slot {s} untouched");
        }
        g.clear_dirty(1);
        assert!(!g.is_dirty(1));
    }

    #[test]
    fn test_vector_roundtrip_and_alignment() {
        let g = small_grid(1);
        let dd = dims3().domain_dims;
        let z = g.dim("z").expect("z");
        // Storage-aligned z index: offset (z - first + lpad) % VLEN == 0.
        let z0 = z.first - z.lpad;
        let pt = IdxTuple::new(&dd, vec![2, 2, z0.max(z.first - z.lhalo)]);
        // The grid halo is 2, lpad is 8, so z = -2 has offset 6: unaligned.
        assert!(!g.is_vec_aligned(&pt));
        let aligned = IdxTuple::new(&dd, vec![2, 2, 0]);
        assert!(g.is_vec_aligned(&aligned), "owned origin is fold-aligned");
        let v = crate::vec::RealVec::broadcast(2.5);
        unsafe { g.write_vec(0, &aligned, v) };
        assert_eq!(g.read_vec(0, &aligned), v);
        let scalar_pt = IdxTuple::new(&dd, vec![2, 2, 3]);
        assert_eq!(g.read_point(0, &scalar_pt), 2.5);
    }

    #[test]
    fn test_ndarray_roundtrip_and_shape_guard() {
        let mut g = small_grid(2);
        let arr = ArrayD::from_shape_fn(vec![8, 8, 8], |ix| {
            (ix[0] * 100 + ix[1] * 10 + ix[2]) as Real
        });
        g.assign_from_ndarray(1, &arr).expect("assign");
        let back = g.to_ndarray(1);
        assert_eq!(arr, back);

        let bad = ArrayD::<Real>::zeros(vec![4, 8, 8]);
        let err = g.assign_from_ndarray(1, &bad).unwrap_err();
        assert!(matches!(err, StencilError::ShapeMismatch(_)));
    }

    #[test]
    fn test_share_storage_requires_matching_layout() {
        let mut a = small_grid(2);
        let mut b = small_grid(2);
        a.set_all(3.0);
        b.share_storage(&a).expect("share");
        let dd = dims3().domain_dims;
        let pt = IdxTuple::new(&dd, vec![4, 4, 4]);
        assert_eq!(b.read_point(0, &pt), 3.0);
        a.write_point_mut(0, &pt, 9.0);
        assert_eq!(b.read_point(0, &pt), 9.0, "storage is shared");

        let d = dims3();
        let dd2 = d.domain_dims.clone();
        let mut c = Grid::build(
            "c",
            &["t".into(), "x".into(), "y".into(), "z".into()],
            &d,
            2,
            &IdxTuple::filled(&dd2, 0),
            &IdxTuple::filled(&dd2, 16),
            &IdxTuple::filled(&dd2, 2),
            &IdxTuple::filled(&dd2, 0),
            None,
        )
        .expect("build");
        let err = c.share_storage(&a).unwrap_err();
        assert!(matches!(err, StencilError::ShapeMismatch(_)));
    }

    #[test]
    fn test_fixed_size_grid() {
        let d = dims3();
        let dd = d.domain_dims.clone();
        let mut g = Grid::build(
            "coeff",
            &["x".into(), "y".into()],
            &d,
            1,
            &IdxTuple::filled(&dd, 0),
            &IdxTuple::filled(&dd, 8),
            &IdxTuple::filled(&dd, 0),
            &IdxTuple::filled(&dd, 0),
            Some(&[5, 7]),
        )
        .expect("build");
        g.alloc_standalone().expect("alloc");
        assert!(!g.has_step_dim());
        assert_eq!(g.dim("x").expect("x").alloc_size, 5);
        assert_eq!(g.dim("y").expect("y").alloc_size, 7);
        let xy = DimSet::new(["x", "y"]);
        let pt = IdxTuple::new(&xy, vec![4, 6]);
        g.write_point_mut(0, &pt, 1.25);
        assert_eq!(g.read_point(0, &pt), 1.25);
    }

    #[test]
    fn test_for_each_point_in_order_and_count() {
        let dd = DimSet::new(["x", "y"]);
        let mut bb = BoundingBox::new(
            IdxTuple::new(&dd, vec![1, 2]),
            IdxTuple::new(&dd, vec![3, 5]),
        );
        bb.update(true, &IdxTuple::filled(&dd, 1), &IdxTuple::filled(&dd, 1));
        let mut seen = Vec::new();
        for_each_point_in(&bb, |pt| seen.push((pt.at(0), pt.at(1))));
        assert_eq!(seen.len(), 6);
        assert_eq!(seen[0], (1, 2));
        assert_eq!(seen[1], (1, 3), "last dim varies fastest");
        assert_eq!(seen[5], (2, 4));
    }
}
