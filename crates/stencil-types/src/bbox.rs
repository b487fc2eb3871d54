// ─────────────────────────────────────────────────────────────────────
// SCPN Stencil Core — Bounding Boxes
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Boxed iteration domains over the domain dimensions.
//!
//! A box is constructed invalid; `update()` computes the derived fields.
//! After `update()` a box must be treated as immutable for the duration
//! of a step.

use crate::idx::IdxTuple;

/// Half-open n-D box `[begin, end)` with derived sizes and flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundingBox {
    pub begin: IdxTuple,
    pub end: IdxTuple,

    // Derived by update().
    pub len: IdxTuple,
    pub size: i64,
    pub num_points: i64,
    pub is_full: bool,
    pub is_aligned: bool,
    pub is_cluster_mult: bool,
    pub valid: bool,
}

impl BoundingBox {
    /// New invalid box; call `update()` once begin/end are final.
    pub fn new(begin: IdxTuple, end: IdxTuple) -> Self {
        let len = end.sub(&begin);
        BoundingBox {
            begin,
            end,
            len,
            size: 0,
            num_points: 0,
            is_full: false,
            is_aligned: false,
            is_cluster_mult: false,
            valid: false,
        }
    }

    /// Compute derived fields and mark the box valid.
    ///
    /// `fold` is the vector length per dim; `cluster` is the unit of
    /// fused vector work per dim. When the stencil description gives no
    /// separate point count, `num_points` is the closed-form `size`;
    /// `force_full` additionally overrides a previously set count.
    pub fn update(&mut self, force_full: bool, fold: &IdxTuple, cluster: &IdxTuple) {
        self.len = self.end.sub(&self.begin);
        self.size = self.len.product().max(0);
        if force_full || self.num_points == 0 {
            self.num_points = self.size;
        }
        debug_assert!(
            self.num_points <= self.size,
            "bounding box num_points {} exceeds size {}",
            self.num_points,
            self.size
        );
        self.is_full = self.num_points == self.size;
        self.is_aligned = self
            .begin
            .vals()
            .iter()
            .zip(fold.vals().iter())
            .all(|(&b, &f)| f > 0 && b % f == 0);
        self.is_cluster_mult = self
            .len
            .vals()
            .iter()
            .zip(cluster.vals().iter())
            .all(|(&l, &c)| c > 0 && l % c == 0);
        self.valid = true;
    }

    /// Is the point inside `[begin, end)`?
    pub fn contains(&self, pt: &IdxTuple) -> bool {
        pt.vals()
            .iter()
            .zip(self.begin.vals().iter().zip(self.end.vals().iter()))
            .all(|(&p, (&b, &e))| p >= b && p < e)
    }

    /// True when any dim has non-positive extent.
    pub fn is_degenerate(&self) -> bool {
        self.begin
            .vals()
            .iter()
            .zip(self.end.vals().iter())
            .any(|(&b, &e)| e <= b)
    }

    /// Intersection with `other`; result is not yet updated.
    pub fn intersect(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox::new(self.begin.max(&other.begin), self.end.min(&other.end))
    }
}
