// ─────────────────────────────────────────────────────────────────────
// SCPN Stencil Core — Loop Nest Executor
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! The hierarchical traversal: rank → region → block → sub-block, with
//! the bundle's own cluster/vector loop innermost.
//!
//! Regions are visited serially in lexicographic order; under a
//! wave-front chunk each region runs all its temporal sub-steps before
//! the next region starts, with the active box sliding one skew angle
//! inward per sub-step. Blocks within one pack write disjoint points
//! and fan out on the outer thread team; sub-blocks fan out on the
//! nested team when more than one block thread is configured.

use crate::bundle::{BundlePack, GridArena, StencilBundle};
use crate::grid::Grid;
use crate::wavefront::WaveFrontInfo;
use rayon::prelude::*;
use std::sync::Mutex;
use stencil_types::{BoundingBox, IdxTuple, KernelSettings, StencilResult};

/// One level of the scan: a span tiled by a stride.
pub struct ScanIndices {
    pub begin: IdxTuple,
    pub end: IdxTuple,
    pub stride: IdxTuple,
}

impl ScanIndices {
    pub fn new(bb: &BoundingBox, stride: &IdxTuple) -> Self {
        ScanIndices {
            begin: bb.begin.clone(),
            end: bb.end.clone(),
            stride: stride.clone(),
        }
    }

    /// Tile origins in lexicographic order; every tile is clamped to
    /// the span end.
    pub fn tiles(&self) -> Vec<(IdxTuple, IdxTuple)> {
        let ndims = self.begin.len();
        let mut out = Vec::new();
        if (0..ndims).any(|d| self.end.at(d) <= self.begin.at(d)) {
            return out;
        }
        let mut origin = self.begin.clone();
        loop {
            let mut end = origin.clone();
            for d in 0..ndims {
                end.set_at(d, (origin.at(d) + self.stride.at(d)).min(self.end.at(d)));
            }
            out.push((origin.clone(), end));
            let mut k = ndims;
            loop {
                if k == 0 {
                    return out;
                }
                k -= 1;
                let next = origin.at(k) + self.stride.at(k);
                if next < self.end.at(k) {
                    origin.set_at(k, next);
                    break;
                }
                origin.set_at(k, self.begin.at(k));
            }
        }
    }
}

/// Per-thread scratch grids, one set per worker, rebased per sub-block.
#[derive(Default)]
pub struct ScratchPool {
    per_thread: Vec<Mutex<Vec<Grid>>>,
    /// Range of each bundle's scratch grids inside a thread's set.
    bundle_ranges: Vec<(usize, usize)>,
}

impl ScratchPool {
    /// One scratch set per `num_threads` workers, each holding every
    /// bundle's scratch grids sized to a block plus the declared halo.
    pub fn build(
        bundles: &[Box<dyn StencilBundle>],
        dims: &stencil_types::Dims,
        block_size: &IdxTuple,
        num_threads: usize,
    ) -> StencilResult<Self> {
        let mut ranges = Vec::with_capacity(bundles.len());
        let mut protos: Vec<(String, IdxTuple)> = Vec::new();
        for b in bundles {
            let specs = b.scratch_specs();
            ranges.push((protos.len(), specs.len()));
            for (si, spec) in specs.iter().enumerate() {
                protos.push((format!("scratch_{}_{si}", b.name()), spec.halo.clone()));
            }
        }

        let dim_names: Vec<String> = dims.domain_dims.names().map(String::from).collect();
        let zero = IdxTuple::filled(&dims.domain_dims, 0);
        let mut per_thread = Vec::with_capacity(num_threads.max(1));
        for _ in 0..num_threads.max(1) {
            let mut set = Vec::with_capacity(protos.len());
            for (name, halo) in &protos {
                let mut g = Grid::build(
                    name,
                    &dim_names,
                    dims,
                    1,
                    &zero,
                    block_size,
                    halo,
                    &zero,
                    None,
                )?;
                g.alloc_standalone()?;
                set.push(g);
            }
            per_thread.push(Mutex::new(set));
        }

        Ok(ScratchPool {
            per_thread,
            bundle_ranges: ranges,
        })
    }

    /// Run `f` with the calling thread's scratch grids for `bundle`,
    /// rebased so their owned extent is `bb`.
    pub fn with_scratch<R>(
        &self,
        thread: usize,
        bundle: usize,
        bb: &BoundingBox,
        f: impl FnOnce(&mut [Grid]) -> R,
    ) -> R {
        let (start, len) = self.bundle_ranges.get(bundle).copied().unwrap_or((0, 0));
        if len == 0 {
            return f(&mut []);
        }
        let mut set = self.per_thread[thread % self.per_thread.len()]
            .lock()
            .expect("scratch set poisoned");
        let grids = &mut set[start..start + len];
        for g in grids.iter_mut() {
            g.rebase(&bb.begin, &bb.len);
        }
        f(grids)
    }
}

/// Borrowed view of everything one `run_solution` call traverses.
pub struct ExecContext<'a> {
    pub arena: &'a GridArena,
    pub bundles: &'a [Box<dyn StencilBundle>],
    pub packs: &'a [BundlePack],
    pub settings: &'a KernelSettings,
    pub wf: &'a WaveFrontInfo,
    pub rank_bb: &'a BoundingBox,
    pub ext_bb: &'a BoundingBox,
    pub scratch: &'a ScratchPool,
}

impl ExecContext<'_> {
    fn make_bb(&self, begin: IdxTuple, end: IdxTuple) -> BoundingBox {
        let fold = self.settings.dims.fold_tuple();
        let cluster = self.settings.dims.cluster_tuple();
        let mut bb = BoundingBox::new(begin, end);
        bb.update(true, &fold, &cluster);
        bb
    }

    /// Execute steps `[begin_t, stop_t)` for one pack, or for every
    /// pack in order when `pack_sel` is `None` (the wave-front path).
    pub fn calc_rank(&self, pack_sel: Option<usize>, begin_t: i64, stop_t: i64) {
        let wf_active = stop_t - begin_t > 1;
        let span = if wf_active { self.ext_bb } else { self.rank_bb };
        let scan = ScanIndices::new(span, &self.settings.region_size);
        for (origin, end) in scan.tiles() {
            self.calc_region(span, &origin, &end, pack_sel, begin_t, stop_t);
        }
    }

    /// All temporal sub-steps and packs of one region, sliding the
    /// active box one angle inward per sub-step.
    #[allow(clippy::too_many_arguments)]
    fn calc_region(
        &self,
        span: &BoundingBox,
        region_begin: &IdxTuple,
        region_end: &IdxTuple,
        pack_sel: Option<usize>,
        begin_t: i64,
        stop_t: i64,
    ) {
        let wf_active = stop_t - begin_t > 1;
        for t in begin_t..stop_t {
            for (pi, pack) in self.packs.iter().enumerate() {
                if let Some(sel) = pack_sel {
                    if sel != pi {
                        continue;
                    }
                }
                let shift_num = if wf_active { t - begin_t } else { 0 };
                let Some(bb) =
                    self.shifted_region_box(span, region_begin, region_end, shift_num)
                else {
                    continue;
                };
                self.calc_blocks(pack, t, &bb);
            }
        }
    }

    /// Translate a region box `shift_num` angles inward and clamp it to
    /// the area whose inputs are resident at this visit. The
    /// lexicographically-last region per dim absorbs the strip the
    /// translation leaves uncovered at a global boundary.
    fn shifted_region_box(
        &self,
        span: &BoundingBox,
        region_begin: &IdxTuple,
        region_end: &IdxTuple,
        shift_num: i64,
    ) -> Option<BoundingBox> {
        let shift = self.wf.angles.scale(shift_num);
        let allowed_b = span.begin.add(&shift.min(&self.wf.left_ext));
        let allowed_e = span.end.sub(&shift.min(&self.wf.right_ext));

        let mut b = region_begin.sub(&shift).max(&allowed_b);
        let mut e = region_end.sub(&shift).min(&allowed_e);
        for d in 0..b.len() {
            if region_end.at(d) == span.end.at(d) {
                e.set_at(d, allowed_e.at(d));
            }
            if region_begin.at(d) == span.begin.at(d) {
                b.set_at(d, allowed_b.at(d));
            }
        }
        let bb = self.make_bb(b, e);
        if bb.is_degenerate() {
            None
        } else {
            Some(bb)
        }
    }

    /// Blocks of one pack within one active box: independent, so they
    /// fan out on the outer team.
    fn calc_blocks(&self, pack: &BundlePack, t: i64, bb: &BoundingBox) {
        let scan = ScanIndices::new(bb, &self.settings.block_size);
        let tiles = scan.tiles();
        tiles.par_iter().for_each(|(origin, end)| {
            let block_bb = self.make_bb(origin.clone(), end.clone());
            self.calc_block(pack, t, &block_bb);
        });
    }

    /// Bundles of the pack in declared order; sub-blocks fan out on the
    /// nested team when configured.
    fn calc_block(&self, pack: &BundlePack, t: i64, block_bb: &BoundingBox) {
        for &bi in &pack.bundles {
            let bundle = &self.bundles[bi];
            let scan = ScanIndices::new(block_bb, &self.settings.sub_block_size);
            let tiles = scan.tiles();
            if self.settings.num_block_threads > 1 {
                tiles.par_iter().for_each(|(origin, end)| {
                    let sub_bb = self.make_bb(origin.clone(), end.clone());
                    self.run_sub_block(bundle.as_ref(), bi, t, &sub_bb);
                });
            } else {
                for (origin, end) in tiles {
                    let sub_bb = self.make_bb(origin, end);
                    self.run_sub_block(bundle.as_ref(), bi, t, &sub_bb);
                }
            }
        }
    }

    fn run_sub_block(&self, bundle: &dyn StencilBundle, bi: usize, t: i64, sub_bb: &BoundingBox) {
        let thread = rayon::current_thread_index().unwrap_or(0);
        self.scratch.with_scratch(thread, bi, sub_bb, |scratch| {
            bundle.calc_sub_block(self.arena, t, sub_bb, scratch);
        });
    }
}
