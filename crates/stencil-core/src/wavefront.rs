// ─────────────────────────────────────────────────────────────────────
// SCPN Stencil Core — Wave-Front Transform
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Temporal-blocking geometry.
//!
//! With depth `W > 1`, one outer step executes `W` temporal sub-steps
//! over a skewed iteration box. The skew angle per shift in each dim is
//! the largest halo any bundle reads there; the number of shifts equals
//! the depth, so the iteration box grows by `W * angle` on each side
//! that has a neighbor. Sub-step `s` slides the active box `s` angles
//! inward so every dependency lands on data already computed.

use crate::decomp::RankLayout;
use stencil_types::{BoundingBox, Dims, IdxTuple};

#[derive(Debug, Clone)]
pub struct WaveFrontInfo {
    /// Skew angle per shift, per domain dim.
    pub angles: IdxTuple,
    /// Shifts across one outer step: the wave-front depth `W`.
    pub num_shifts: i64,
    /// `angles * num_shifts`.
    pub shifts: IdxTuple,
    /// Extension applied to the rank box, clamped to zero on sides with
    /// no neighbor.
    pub left_ext: IdxTuple,
    pub right_ext: IdxTuple,
}

impl WaveFrontInfo {
    pub fn compute(
        dims: &Dims,
        layout: &RankLayout,
        max_halos: &IdxTuple,
        wf_depth: usize,
    ) -> Self {
        let dd = &dims.domain_dims;
        let angles = if wf_depth > 1 {
            max_halos.clone()
        } else {
            IdxTuple::filled(dd, 0)
        };
        let num_shifts = wf_depth.max(1) as i64;
        let shifts = angles.scale(num_shifts);

        let mut left_ext = shifts.clone();
        let mut right_ext = shifts.clone();
        for d in 0..dd.len() {
            if layout.on_boundary(d, -1) {
                left_ext.set_at(d, 0);
            }
            if layout.on_boundary(d, 1) {
                right_ext.set_at(d, 0);
            }
        }

        WaveFrontInfo {
            angles,
            num_shifts,
            shifts,
            left_ext,
            right_ext,
        }
    }

    /// The rank box extended by the wave-front shifts.
    pub fn extend(&self, rank_bb: &BoundingBox) -> BoundingBox {
        BoundingBox::new(
            rank_bb.begin.sub(&self.left_ext),
            rank_bb.end.add(&self.right_ext),
        )
    }

    /// Extra halo each grid must carry so the skewed sweep can read and
    /// write the extended area: the full shift on sides with neighbors.
    pub fn halo_growth(&self) -> (IdxTuple, IdxTuple) {
        (self.left_ext.clone(), self.right_ext.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stencil_types::{Dims, KernelSettings};

    fn layout(num_ranks_x: i64, rank: usize) -> (Dims, RankLayout) {
        let dims = Dims::new("t", ["x", "y", "z"], []);
        let mut s = KernelSettings::new(dims.clone());
        s.num_ranks.set("x", num_ranks_x);
        let l = RankLayout::new(&dims, &s, rank, num_ranks_x as usize).expect("layout");
        (dims, l)
    }

    #[test]
    fn test_depth_one_has_no_extension() {
        let (dims, l) = layout(1, 0);
        let mut halos = IdxTuple::filled(&dims.domain_dims, 2);
        halos.set("y", 1);
        let wf = WaveFrontInfo::compute(&dims, &l, &halos, 1);
        assert_eq!(wf.num_shifts, 1);
        assert_eq!(wf.angles.vals(), &[0, 0, 0], "no skew at depth 1");
        assert_eq!(wf.shifts.vals(), &[0, 0, 0]);
    }

    #[test]
    fn test_angles_and_shift_count() {
        let (dims, l) = layout(1, 0);
        let mut halos = IdxTuple::filled(&dims.domain_dims, 2);
        halos.set("y", 0);
        let wf = WaveFrontInfo::compute(&dims, &l, &halos, 4);
        assert_eq!(wf.angles.get("x"), Some(2));
        assert_eq!(wf.angles.get("y"), Some(0), "zero halo contributes nothing");
        assert_eq!(wf.num_shifts, 4, "one shift per depth level");
        assert_eq!(wf.shifts.get("x"), Some(8), "W * angle");
        assert_eq!(wf.shifts.get("y"), Some(0));
    }

    #[test]
    fn test_boundary_sides_are_clamped() {
        // Rank 0 of 2 along x: no left neighbor, so no left extension.
        let (dims, l) = layout(2, 0);
        let halos = IdxTuple::filled(&dims.domain_dims, 1);
        let wf = WaveFrontInfo::compute(&dims, &l, &halos, 2);
        assert_eq!(wf.left_ext.get("x"), Some(0));
        assert_eq!(wf.right_ext.get("x"), Some(2));
        // y and z have one rank: both sides are global boundaries.
        assert_eq!(wf.left_ext.get("y"), Some(0));
        assert_eq!(wf.right_ext.get("y"), Some(0));
    }

    #[test]
    fn test_extend_rank_box() {
        let (dims, l) = layout(2, 1);
        let halos = IdxTuple::filled(&dims.domain_dims, 1);
        let wf = WaveFrontInfo::compute(&dims, &l, &halos, 3);
        let dd = &dims.domain_dims;
        let rank_bb = BoundingBox::new(
            IdxTuple::new(dd, vec![64, 0, 0]),
            IdxTuple::new(dd, vec![128, 64, 64]),
        );
        let ext = wf.extend(&rank_bb);
        // Rank 1 of 2 along x: left neighbor only, extended by W * angle.
        assert_eq!(ext.begin.get("x"), Some(64 - 3));
        assert_eq!(ext.end.get("x"), Some(128));
        assert_eq!(ext.begin.get("y"), Some(0));
    }
}
