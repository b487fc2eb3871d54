// ─────────────────────────────────────────────────────────────────────
// SCPN Stencil Core — Bundles and Packs
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! The seam between generated stencil kernels and the runtime.
//!
//! A bundle is one compiled stencil: it declares which grids it reads
//! and writes, its halo extent, and its step offset, and evaluates
//! itself over one sub-block. The engine treats the evaluation as
//! opaque and trusts the declared access pattern. Bundles refer to
//! grids through stable arena handles, never pointers.

use crate::grid::Grid;
use std::collections::HashMap;
use stencil_types::{BoundingBox, IdxTuple, StencilError, StencilResult};

/// Stable index of a grid in the solution's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridHandle(pub usize);

/// Insertion-ordered grid container with unique names.
#[derive(Default)]
pub struct GridArena {
    grids: Vec<Grid>,
    by_name: HashMap<String, usize>,
}

impl GridArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, grid: Grid) -> StencilResult<GridHandle> {
        if self.by_name.contains_key(grid.name()) {
            return Err(StencilError::DuplicateName(grid.name().to_string()));
        }
        let idx = self.grids.len();
        self.by_name.insert(grid.name().to_string(), idx);
        self.grids.push(grid);
        Ok(GridHandle(idx))
    }

    pub fn len(&self) -> usize {
        self.grids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grids.is_empty()
    }

    pub fn grid(&self, h: GridHandle) -> &Grid {
        &self.grids[h.0]
    }

    pub fn grid_mut(&mut self, h: GridHandle) -> &mut Grid {
        &mut self.grids[h.0]
    }

    pub fn handle(&self, name: &str) -> Option<GridHandle> {
        self.by_name.get(name).copied().map(GridHandle)
    }

    pub fn lookup(&self, name: &str) -> StencilResult<GridHandle> {
        self.handle(name)
            .ok_or_else(|| StencilError::UnknownGrid(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (GridHandle, &Grid)> {
        self.grids
            .iter()
            .enumerate()
            .map(|(i, g)| (GridHandle(i), g))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (GridHandle, &mut Grid)> {
        self.grids
            .iter_mut()
            .enumerate()
            .map(|(i, g)| (GridHandle(i), g))
    }
}

/// Per-thread temporary storage requested by a bundle.
#[derive(Debug, Clone)]
pub struct ScratchSpec {
    /// Halo the scratch grid carries around each sub-block.
    pub halo: IdxTuple,
}

/// One generated stencil kernel plus its access metadata.
///
/// Executing step index `t` reads the declared inputs at step `t`
/// within `halo_ext` of the sub-block and writes the declared outputs
/// at step `t + step_offset()` inside the sub-block only.
pub trait StencilBundle: Send + Sync {
    fn name(&self) -> &str;

    fn input_grids(&self) -> Vec<GridHandle>;

    fn output_grids(&self) -> Vec<GridHandle>;

    /// Input halo read around each output point, per domain dim.
    fn halo_ext(&self) -> IdxTuple;

    /// Step slot written relative to the executed step index.
    fn step_offset(&self) -> i64 {
        1
    }

    /// Per-thread scratch grids this bundle needs, if any.
    fn scratch_specs(&self) -> Vec<ScratchSpec> {
        Vec::new()
    }

    /// Estimated FP ops per written point, for the stats report.
    fn est_fp_ops_per_point(&self) -> i64 {
        0
    }

    /// Points written per evaluated point.
    fn est_writes_per_point(&self) -> i64 {
        1
    }

    /// Evaluate this stencil over one sub-block at step `t`.
    ///
    /// `scratch` holds this thread's scratch grids, rebased to the
    /// sub-block, one per entry of `scratch_specs()`.
    fn calc_sub_block(&self, grids: &GridArena, t: i64, bb: &BoundingBox, scratch: &mut [Grid]);
}

/// An ordered set of bundles forming one phase of a step. The engine
/// never reorders bundles within a pack.
#[derive(Debug, Clone)]
pub struct BundlePack {
    pub name: String,
    /// Indices into the solution's bundle list, in evaluation order.
    pub bundles: Vec<usize>,
}

impl BundlePack {
    pub fn new(name: &str, bundles: Vec<usize>) -> Self {
        BundlePack {
            name: name.to_string(),
            bundles,
        }
    }
}
