// ─────────────────────────────────────────────────────────────────────
// SCPN Stencil Core — Stencil Solution
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! The per-rank solution facade: grid and bundle registration, the
//! one-shot `prepare_solution()` freeze, and the step-driving run loop
//! that orders halo exchange, the loop nest, and the auto-tuner.
//!
//! Configuration and preparation errors come back as results. Failures
//! inside `run_solution()` are fatal: they are printed to the debug
//! sink and abort the process, since distributed rollback is out of
//! scope.

use crate::alloc::{format_bytes, GroupAlloc};
use crate::bundle::{BundlePack, GridArena, GridHandle, StencilBundle};
use crate::decomp::RankLayout;
use crate::env::KernelEnv;
use crate::exchange::{exchange_halos, grids_read_by, mark_grids_dirty};
use crate::executor::{ExecContext, ScratchPool};
use crate::grid::Grid;
use crate::halo::HaloRegistry;
use crate::stats::{format_num, RunTimer, Stats};
use crate::tuner::AutoTuner;
use crate::wavefront::WaveFrontInfo;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use stencil_types::{
    BoundingBox, IdxTuple, KernelSettings, Real, StencilError, StencilResult,
};

/// Steps run per cycle while `run_auto_tuner_now` drives the search.
const TUNER_STEPS_PER_CYCLE: i64 = 2;
/// Upper bound on tuning cycles, against degenerate parameter sets.
const MAX_TUNER_CYCLES: usize = 5000;

struct GridDecl {
    name: String,
    dim_names: Vec<String>,
    fixed_sizes: Option<Vec<i64>>,
}

pub struct StencilSolution {
    name: String,
    env: Arc<KernelEnv>,
    settings: KernelSettings,
    debug: Mutex<Box<dyn Write + Send>>,

    decls: Vec<GridDecl>,
    bundles: Vec<Box<dyn StencilBundle>>,
    packs: Vec<BundlePack>,

    prepared: bool,
    arena: GridArena,
    layout: Option<RankLayout>,
    wf: Option<WaveFrontInfo>,
    rank_bb: Option<BoundingBox>,
    ext_bb: Option<BoundingBox>,
    registry: Option<HaloRegistry>,
    scratch: Option<ScratchPool>,
    pool: Option<rayon::ThreadPool>,
    tuner: Option<AutoTuner>,
    tuner_apply_pending: bool,
    step_depth: usize,

    // Work metrics, reduced over ranks at prepare time.
    tot_domain_pts: i64,
    tot_writes_1t: i64,
    tot_fpops_1t: i64,
    steps_done: i64,
    run_timer: RunTimer,
    grid_bytes: usize,
}

impl StencilSolution {
    pub fn new(env: Arc<KernelEnv>, name: &str, settings: KernelSettings) -> Self {
        StencilSolution {
            name: name.to_string(),
            env,
            settings,
            debug: Mutex::new(Box::new(std::io::sink())),
            decls: Vec::new(),
            bundles: Vec::new(),
            packs: Vec::new(),
            prepared: false,
            arena: GridArena::new(),
            layout: None,
            wf: None,
            rank_bb: None,
            ext_bb: None,
            registry: None,
            scratch: None,
            pool: None,
            tuner: None,
            tuner_apply_pending: false,
            step_depth: 1,
            tot_domain_pts: 0,
            tot_writes_1t: 0,
            tot_fpops_1t: 0,
            steps_done: 0,
            run_timer: RunTimer::default(),
            grid_bytes: 0,
        }
    }

    /// New solution copying `template`'s settings, not its storage.
    pub fn new_from(env: Arc<KernelEnv>, name: &str, template: &StencilSolution) -> Self {
        Self::new(env, name, template.settings.clone())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn env(&self) -> &KernelEnv {
        &self.env
    }

    pub fn settings(&self) -> &KernelSettings {
        &self.settings
    }

    pub fn set_debug_output(&mut self, sink: Box<dyn Write + Send>) {
        self.debug = Mutex::new(sink);
    }

    fn debug_write(&self, text: &str) {
        let mut sink = self.debug.lock().expect("debug sink poisoned");
        let _ = sink.write_all(text.as_bytes());
        let _ = sink.flush();
    }

    /// Fatal-error policy for failures inside the run loop.
    fn fatal(&self, err: StencilError) -> ! {
        self.debug_write(&format!("[fatal] {err}\n"));
        panic!("{err}");
    }

    fn check_not_prepared(&self, what: &str) -> StencilResult<()> {
        if self.prepared {
            return Err(StencilError::ConfigInvalid(format!(
                "{what}: solution is already prepared"
            )));
        }
        Ok(())
    }

    fn check_prepared(&self, what: &str) -> StencilResult<()> {
        if !self.prepared {
            return Err(StencilError::NotPrepared(what.to_string()));
        }
        Ok(())
    }

    // ── Settings API ─────────────────────────────────────────────────

    pub fn set_rank_domain_size(&mut self, dim: &str, size: i64) -> StencilResult<()> {
        self.set_size_option("set_rank_domain_size", dim, size, 1)?;
        self.settings.rank_domain_size.set(dim, size);
        Ok(())
    }

    pub fn set_min_pad_size(&mut self, dim: &str, size: i64) -> StencilResult<()> {
        self.set_size_option("set_min_pad_size", dim, size, 0)?;
        self.settings.min_pad_size.set(dim, size);
        Ok(())
    }

    pub fn set_block_size(&mut self, dim: &str, size: i64) -> StencilResult<()> {
        self.set_size_option("set_block_size", dim, size, 0)?;
        self.settings.block_size.set(dim, size);
        Ok(())
    }

    pub fn set_region_size(&mut self, dim: &str, size: i64) -> StencilResult<()> {
        self.set_size_option("set_region_size", dim, size, 0)?;
        self.settings.region_size.set(dim, size);
        Ok(())
    }

    pub fn set_num_ranks(&mut self, dim: &str, num: i64) -> StencilResult<()> {
        self.set_size_option("set_num_ranks", dim, num, 1)?;
        self.settings.num_ranks.set(dim, num);
        Ok(())
    }

    fn set_size_option(&self, what: &str, dim: &str, size: i64, min: i64) -> StencilResult<()> {
        self.check_not_prepared(what)?;
        self.settings.dims.check_domain_dim(dim, what)?;
        if size < min {
            return Err(StencilError::ConfigInvalid(format!(
                "{what}: size {size} in '{dim}' is below {min}"
            )));
        }
        Ok(())
    }

    fn get_size_option(&self, what: &str, tuple: &IdxTuple, dim: &str) -> StencilResult<i64> {
        self.settings.dims.check_domain_dim(dim, what)?;
        Ok(tuple.get(dim).expect("checked domain dim"))
    }

    pub fn get_rank_domain_size(&self, dim: &str) -> StencilResult<i64> {
        self.get_size_option("get_rank_domain_size", &self.settings.rank_domain_size, dim)
    }

    pub fn get_min_pad_size(&self, dim: &str) -> StencilResult<i64> {
        self.get_size_option("get_min_pad_size", &self.settings.min_pad_size, dim)
    }

    pub fn get_block_size(&self, dim: &str) -> StencilResult<i64> {
        self.get_size_option("get_block_size", &self.settings.block_size, dim)
    }

    pub fn get_region_size(&self, dim: &str) -> StencilResult<i64> {
        self.get_size_option("get_region_size", &self.settings.region_size, dim)
    }

    pub fn get_num_ranks(&self, dim: &str) -> StencilResult<i64> {
        self.get_size_option("get_num_ranks", &self.settings.num_ranks, dim)
    }

    pub fn get_rank_index(&self, dim: &str) -> StencilResult<i64> {
        self.check_prepared("get_rank_index")?;
        let layout = self.layout.as_ref().expect("prepared");
        self.get_size_option("get_rank_index", &layout.rank_index, dim)
    }

    pub fn get_first_rank_domain_index(&self, dim: &str) -> StencilResult<i64> {
        self.check_prepared("get_first_rank_domain_index")?;
        let layout = self.layout.as_ref().expect("prepared");
        self.get_size_option(
            "get_first_rank_domain_index",
            &layout.rank_domain_offset,
            dim,
        )
    }

    pub fn get_last_rank_domain_index(&self, dim: &str) -> StencilResult<i64> {
        let first = self.get_first_rank_domain_index(dim)?;
        Ok(first + self.get_rank_domain_size(dim)? - 1)
    }

    pub fn get_overall_domain_size(&self, dim: &str) -> StencilResult<i64> {
        self.check_prepared("get_overall_domain_size")?;
        let layout = self.layout.as_ref().expect("prepared");
        self.get_size_option("get_overall_domain_size", &layout.overall_domain_size, dim)
    }

    /// Patch settings from an embedded argument string; unrecognized
    /// tokens come back untouched.
    pub fn apply_command_line_options(&mut self, args: &str) -> StencilResult<String> {
        self.check_not_prepared("apply_command_line_options")?;
        self.settings.apply_command_line_options(args)
    }

    // ── Grid and bundle registration ─────────────────────────────────

    pub fn new_grid(&mut self, name: &str, dims: &[&str]) -> StencilResult<GridHandle> {
        self.declare_grid(name, dims, None)
    }

    pub fn new_fixed_size_grid(
        &mut self,
        name: &str,
        dims: &[&str],
        sizes: &[i64],
    ) -> StencilResult<GridHandle> {
        self.declare_grid(name, dims, Some(sizes.to_vec()))
    }

    fn declare_grid(
        &mut self,
        name: &str,
        dims: &[&str],
        fixed_sizes: Option<Vec<i64>>,
    ) -> StencilResult<GridHandle> {
        self.check_not_prepared("new_grid")?;
        if self.decls.iter().any(|d| d.name == name) {
            return Err(StencilError::DuplicateName(name.to_string()));
        }
        for dn in dims {
            let known = *dn == self.settings.dims.step_dim
                || self.settings.dims.domain_dims.contains(dn)
                || self.settings.dims.misc_dims.contains(dn);
            if !known {
                return Err(StencilError::ConfigInvalid(format!(
                    "grid '{name}': unknown dimension '{dn}'"
                )));
            }
        }
        let handle = GridHandle(self.decls.len());
        self.decls.push(GridDecl {
            name: name.to_string(),
            dim_names: dims.iter().map(|s| s.to_string()).collect(),
            fixed_sizes,
        });
        Ok(handle)
    }

    pub fn num_grids(&self) -> usize {
        self.decls.len()
    }

    pub fn grid_names(&self) -> Vec<&str> {
        self.decls.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn grid_handle(&self, name: &str) -> StencilResult<GridHandle> {
        self.decls
            .iter()
            .position(|d| d.name == name)
            .map(GridHandle)
            .ok_or_else(|| StencilError::UnknownGrid(name.to_string()))
    }

    pub fn grid(&self, h: GridHandle) -> StencilResult<&Grid> {
        self.check_prepared("grid")?;
        Ok(self.arena.grid(h))
    }

    pub fn grid_mut(&mut self, h: GridHandle) -> StencilResult<&mut Grid> {
        self.check_prepared("grid_mut")?;
        Ok(self.arena.grid_mut(h))
    }

    pub fn element_bytes(&self) -> usize {
        std::mem::size_of::<Real>()
    }

    /// Register one compiled stencil; returns its index for packs.
    pub fn add_bundle(&mut self, bundle: Box<dyn StencilBundle>) -> StencilResult<usize> {
        self.check_not_prepared("add_bundle")?;
        self.bundles.push(bundle);
        Ok(self.bundles.len() - 1)
    }

    /// Register an ordered pack of bundle indices. Packs execute in
    /// registration order; bundles inside a pack keep the given order.
    pub fn add_pack(&mut self, name: &str, bundle_indices: Vec<usize>) -> StencilResult<()> {
        self.check_not_prepared("add_pack")?;
        for &bi in &bundle_indices {
            if bi >= self.bundles.len() {
                return Err(StencilError::ConfigInvalid(format!(
                    "pack '{name}': bundle index {bi} out of range"
                )));
            }
        }
        self.packs.push(BundlePack::new(name, bundle_indices));
        Ok(())
    }

    // ── Preparation ──────────────────────────────────────────────────

    /// One-shot: freeze settings, decompose, size and allocate
    /// everything. All further setters fail.
    pub fn prepare_solution(&mut self) -> StencilResult<()> {
        self.check_not_prepared("prepare_solution")?;
        self.settings.adjust()?;

        // Implicit single pack when bundles were registered bare.
        if self.packs.is_empty() && !self.bundles.is_empty() {
            let all: Vec<usize> = (0..self.bundles.len()).collect();
            self.packs.push(BundlePack::new("pack_all", all));
        }

        let dims = self.settings.dims.clone();
        let dd = &dims.domain_dims;

        // Values that must agree on every rank.
        self.env
            .assert_equality_over_ranks(dd.len() as i64, "number of domain dims")?;
        for i in 0..dd.len() {
            let dn = dd.name(i);
            self.env.assert_equality_over_ranks(
                self.settings.rank_domain_size.at(i),
                &format!("rank domain size in '{dn}'"),
            )?;
            self.env.assert_equality_over_ranks(
                self.settings.region_size.at(i),
                &format!("region size in '{dn}'"),
            )?;
            self.env.assert_equality_over_ranks(
                self.settings.num_ranks.at(i),
                &format!("number of ranks in '{dn}'"),
            )?;
        }
        self.env
            .assert_equality_over_ranks(self.settings.wf_depth as i64, "wave-front depth")?;
        self.env
            .assert_equality_over_ranks(self.decls.len() as i64, "number of grids")?;
        self.env
            .assert_equality_over_ranks(self.packs.len() as i64, "number of packs")?;

        let layout = RankLayout::new(&dims, &self.settings, self.env.rank_index(), self.env.num_ranks())?;

        // Largest read halo per dim over all bundles.
        let mut max_halos = IdxTuple::filled(dd, 0);
        for b in &self.bundles {
            max_halos = max_halos.max(&b.halo_ext());
        }

        // Step ring: deepest write offset, and one slot per in-flight
        // sub-step under wave-fronts.
        let max_off = self.bundles.iter().map(|b| b.step_offset()).max().unwrap_or(1);
        let mut depth = (max_off + 1).max(1) as usize;
        if self.settings.wf_depth > 1 {
            depth = depth.max(self.settings.wf_depth + 1);
        }
        self.step_depth = depth;
        self.env
            .assert_equality_over_ranks(depth as i64, "step-buffer depth")?;

        let fold = dims.fold_tuple();
        let cluster = dims.cluster_tuple();
        let mut rank_bb = BoundingBox::new(
            layout.rank_domain_offset.clone(),
            layout.rank_domain_offset.add(&layout.rank_domain_size),
        );
        rank_bb.update(true, &fold, &cluster);

        let wf = WaveFrontInfo::compute(&dims, &layout, &max_halos, self.settings.wf_depth);
        let mut ext_bb = wf.extend(&rank_bb);
        ext_bb.update(true, &fold, &cluster);

        // Allocated halo: read halo plus the wave-front growth.
        let (gl, gr) = wf.halo_growth();
        let growth = gl.max(&gr);

        // Build grid layouts, then allocate all storage in one grouped
        // pass and attach the sub-ranges.
        let mut arena = GridArena::new();
        let mut group = GroupAlloc::new();
        let mut slot_ids = Vec::with_capacity(self.decls.len());
        for (di, decl) in self.decls.iter().enumerate() {
            let mut halo = IdxTuple::filled(dd, 0);
            for b in &self.bundles {
                if b.input_grids().contains(&GridHandle(di)) {
                    halo = halo.max(&b.halo_ext());
                }
            }
            let halo_alloc = if decl.fixed_sizes.is_some() {
                IdxTuple::filled(dd, 0)
            } else {
                halo.add(&growth)
            };
            let grid = Grid::build(
                &decl.name,
                &decl.dim_names,
                &dims,
                depth,
                &layout.rank_domain_offset,
                &layout.rank_domain_size,
                &halo_alloc,
                &self.settings.min_pad_size,
                decl.fixed_sizes.as_deref(),
            )?;
            slot_ids.push(group.request(self.settings.numa_pref, grid.num_storage_bytes()));
            arena.insert(grid)?;
        }
        group.allocate()?;
        for (i, (_, grid)) in arena.iter_mut().enumerate() {
            let (slab, offset, _) = group.resolve(slot_ids[i])?;
            grid.attach_storage(slab, offset)?;
        }
        self.grid_bytes = group.total_bytes();

        let registry = HaloRegistry::build(&arena, &dims, &layout)?;

        let hw = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let region_threads = self.settings.num_region_threads(hw);
        let pool_threads = region_threads * self.settings.num_block_threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(pool_threads)
            .build()
            .map_err(|e| StencilError::ConfigInvalid(format!("thread pool: {e}")))?;

        let scratch = ScratchPool::build(&self.bundles, &dims, &self.settings.block_size, pool_threads)?;

        // Work metrics, reduced over ranks.
        let rank_pts = rank_bb.num_points;
        let rank_writes: i64 = self
            .bundles
            .iter()
            .map(|b| rank_pts * b.est_writes_per_point())
            .sum();
        let rank_fpops: i64 = self
            .bundles
            .iter()
            .map(|b| rank_pts * b.est_fp_ops_per_point())
            .sum();
        self.tot_domain_pts = self.env.sum_over_ranks(rank_pts)?;
        self.tot_writes_1t = self.env.sum_over_ranks(rank_writes)?;
        self.tot_fpops_1t = self.env.sum_over_ranks(rank_fpops)?;

        self.tuner = Some(AutoTuner::new(
            self.settings.tuner.clone(),
            self.settings.block_size.clone(),
        ));
        self.tuner_apply_pending = false;

        self.layout = Some(layout);
        self.rank_bb = Some(rank_bb);
        self.ext_bb = Some(ext_bb);
        self.wf = Some(wf);
        self.registry = Some(registry);
        self.scratch = Some(scratch);
        self.pool = Some(pool);
        self.arena = arena;
        self.prepared = true;

        tracing::debug!(
            solution = %self.name,
            rank = self.env.rank_index(),
            grids = self.decls.len(),
            bundles = self.bundles.len(),
            packs = self.packs.len(),
            step_depth = depth,
            "solution prepared"
        );
        Ok(())
    }

    // ── Run loop ─────────────────────────────────────────────────────

    /// Run steps `first_step..=last_step` (inclusive).
    pub fn run_solution(&mut self, first_step: i64, last_step: i64) -> StencilResult<()> {
        self.check_prepared("run_solution")?;
        if last_step < first_step {
            return Ok(());
        }
        self.apply_tuner_candidate()?;

        self.run_timer.start();
        let call_start = Instant::now();
        let wf_depth = self.settings.wf_depth.max(1) as i64;

        let mut t = first_step;
        while t <= last_step {
            let chunk_stop = (t + wf_depth - 1).min(last_step);
            let stop_exclusive = chunk_stop + 1;
            self.run_chunk(t, stop_exclusive);
            self.steps_done += stop_exclusive - t;
            t = stop_exclusive;
        }

        let call_secs = call_start.elapsed().as_secs_f64();
        self.run_timer.stop();

        // One tuner sample per call; the proposal lands next call.
        let steps_this_call = last_step - first_step + 1;
        let rank_pts = self.rank_bb.as_ref().expect("prepared").num_points;
        let region = self.settings.region_size.clone();
        if let Some(tuner) = self.tuner.as_mut() {
            if !tuner.is_done() {
                tuner.eval(steps_this_call, call_secs, rank_pts, &region);
                self.tuner_apply_pending = true;
            }
        }
        Ok(())
    }

    /// Single-step form of `run_solution`.
    pub fn run_solution_step(&mut self, step: i64) -> StencilResult<()> {
        self.run_solution(step, step)
    }

    /// One wave-front chunk `[begin_t, stop_t)`: the per-pack
    /// exchange/compute/mark sequence at depth 1, or a group-boundary
    /// exchange plus the skewed sweep at depth > 1.
    fn run_chunk(&mut self, begin_t: i64, stop_t: i64) {
        let enable = self.settings.enable_halo_exchange;
        let allow_vec = self.settings.allow_vec_exchange;
        let wf_active = stop_t - begin_t > 1;

        if wf_active {
            // All inputs must be resident before the group starts; the
            // skew keeps the interior consistent without more traffic.
            let mut all_inputs = Vec::new();
            for pack in &self.packs {
                for h in grids_read_by(&self.bundles, pack) {
                    if !all_inputs.contains(&h) {
                        all_inputs.push(h);
                    }
                }
            }
            let res = exchange_halos(
                &self.arena,
                self.registry.as_mut().expect("prepared"),
                &self.env,
                &all_inputs,
                begin_t,
                stop_t,
                enable,
                allow_vec,
            );
            if let Err(e) = res {
                self.fatal(e);
            }

            self.compute(None, begin_t, stop_t);

            for pi in 0..self.packs.len() {
                let pack = self.packs[pi].clone();
                mark_grids_dirty(&self.arena, &self.bundles, &pack, begin_t, stop_t);
            }
        } else {
            for pi in 0..self.packs.len() {
                let pack = self.packs[pi].clone();
                let inputs = grids_read_by(&self.bundles, &pack);
                let res = exchange_halos(
                    &self.arena,
                    self.registry.as_mut().expect("prepared"),
                    &self.env,
                    &inputs,
                    begin_t,
                    stop_t,
                    enable,
                    allow_vec,
                );
                if let Err(e) = res {
                    self.fatal(e);
                }

                self.compute(Some(pi), begin_t, stop_t);

                mark_grids_dirty(&self.arena, &self.bundles, &pack, begin_t, stop_t);
            }
        }
    }

    fn compute(&self, pack_sel: Option<usize>, begin_t: i64, stop_t: i64) {
        let ctx = ExecContext {
            arena: &self.arena,
            bundles: &self.bundles,
            packs: &self.packs,
            settings: &self.settings,
            wf: self.wf.as_ref().expect("prepared"),
            rank_bb: self.rank_bb.as_ref().expect("prepared"),
            ext_bb: self.ext_bb.as_ref().expect("prepared"),
            scratch: self.scratch.as_ref().expect("prepared"),
        };
        let pool = self.pool.as_ref().expect("prepared");
        pool.install(|| ctx.calc_rank(pack_sel, begin_t, stop_t));
    }

    /// Install the tuner's current proposal; sizes only ever change
    /// here, between `run_solution` calls.
    fn apply_tuner_candidate(&mut self) -> StencilResult<()> {
        if !self.tuner_apply_pending {
            return Ok(());
        }
        self.tuner_apply_pending = false;
        let Some(tuner) = self.tuner.as_ref() else {
            return Ok(());
        };
        let cand = tuner.current_block().clone();
        if cand == self.settings.block_size {
            return Ok(());
        }

        let cluster = self.settings.dims.cluster_tuple();
        let block = cand
            .round_up_to(&cluster)
            .min(&self.settings.region_size);
        tracing::debug!(block = %block, "installing tuner block size");
        self.settings.block_size = block.clone();
        // Re-derive the level below, then rebuild the scratch storage
        // that is sized to a block.
        let inner = self.settings.dims.inner_dim().to_string();
        let mut sub = block.clone();
        sub.set(&inner, cluster.get(&inner).expect("inner dim"));
        self.settings.sub_block_size = sub.round_up_to(&cluster).min(&block);

        let pool_threads = self
            .pool
            .as_ref()
            .map(|p| p.current_num_threads())
            .unwrap_or(1);
        let dims = self.settings.dims.clone();
        self.scratch = Some(ScratchPool::build(
            &self.bundles,
            &dims,
            &self.settings.block_size,
            pool_threads,
        )?);
        Ok(())
    }

    // ── Auto-tuner API ───────────────────────────────────────────────

    pub fn reset_auto_tuner(&mut self, enable: bool, verbose: bool) {
        let block = self.settings.block_size.clone();
        if let Some(tuner) = self.tuner.as_mut() {
            tuner.clear(!enable, verbose, &block);
        } else {
            let mut params = self.settings.tuner.clone();
            params.enabled = enable;
            self.tuner = Some(AutoTuner::new(params, block));
        }
        self.tuner_apply_pending = false;
    }

    pub fn is_auto_tuner_enabled(&self) -> bool {
        self.tuner.as_ref().map(|t| !t.is_done()).unwrap_or(false)
    }

    pub fn auto_tuner_best_block(&self) -> Option<IdxTuple> {
        self.tuner.as_ref().map(|t| t.best_block().clone())
    }

    pub fn auto_tuner_best_rate(&self) -> f64 {
        self.tuner.as_ref().map(|t| t.best_rate()).unwrap_or(0.0)
    }

    /// Drive the search to completion with short throwaway runs. Grid
    /// contents are advanced (and thus perturbed) by the tuning steps.
    pub fn run_auto_tuner_now(&mut self, verbose: bool) -> StencilResult<()> {
        self.check_prepared("run_auto_tuner_now")?;
        self.reset_auto_tuner(true, verbose);
        let mut t = 0;
        for _ in 0..MAX_TUNER_CYCLES {
            if !self.is_auto_tuner_enabled() {
                break;
            }
            self.run_solution(t, t + TUNER_STEPS_PER_CYCLE - 1)?;
            t += TUNER_STEPS_PER_CYCLE;
        }
        // Install the settled block before control returns.
        self.apply_tuner_candidate()?;
        if let Some(best) = self.auto_tuner_best_block() {
            self.debug_write(&format!(
                "auto-tuner settled on block size {best} at {}/sec\n",
                format_num(self.auto_tuner_best_rate())
            ));
        }
        Ok(())
    }

    // ── Storage sharing, stats, teardown ─────────────────────────────

    /// Adopt storage of every same-named grid in `other`.
    pub fn share_grid_storage(&mut self, other: &StencilSolution) -> StencilResult<()> {
        self.check_prepared("share_grid_storage")?;
        other.check_prepared("share_grid_storage (source)")?;
        for (_, grid) in self.arena.iter_mut() {
            if let Some(src_handle) = other.arena.handle(grid.name()) {
                grid.share_storage(other.arena.grid(src_handle))?;
            }
        }
        Ok(())
    }

    pub fn step_dim_name(&self) -> &str {
        &self.settings.dims.step_dim
    }

    pub fn domain_dim_names(&self) -> Vec<&str> {
        self.settings.dims.domain_dims.names().collect()
    }

    pub fn misc_dim_names(&self) -> Vec<&str> {
        self.settings.dims.misc_dims.names().collect()
    }

    /// Reset elapsed times and the step counter without reading them.
    pub fn clear_timers(&mut self) {
        self.run_timer.clear();
        self.steps_done = 0;
    }

    /// Snapshot work metrics and timings; resets step counters and
    /// timers.
    pub fn get_stats(&mut self) -> Stats {
        let stats = Stats {
            num_elements: self.tot_domain_pts,
            num_writes: self.tot_writes_1t,
            est_fp_ops: self.tot_fpops_1t,
            num_steps_done: self.steps_done,
            elapsed_run_secs: self.run_timer.elapsed_secs(),
        };
        self.steps_done = 0;
        self.run_timer.clear();
        stats
    }

    /// Release grids, halo buffers, scratch storage and the pool.
    pub fn end_solution(&mut self) -> StencilResult<()> {
        self.registry = None;
        self.scratch = None;
        self.pool = None;
        self.tuner = None;
        self.arena = GridArena::new();
        self.layout = None;
        self.wf = None;
        self.rank_bb = None;
        self.ext_bb = None;
        self.prepared = false;
        self.env.global_barrier()
    }

    // ── Initialization and validation helpers ────────────────────────

    /// Set all elements of every grid to a per-grid seed value.
    pub fn init_same(&mut self) -> StencilResult<()> {
        self.check_prepared("init_same")?;
        for (i, (_, grid)) in self.arena.iter_mut().enumerate() {
            grid.set_all(0.1 * (i as Real + 1.0));
        }
        Ok(())
    }

    /// Set all elements of every grid to distinct values.
    pub fn init_diff(&mut self) -> StencilResult<()> {
        self.check_prepared("init_diff")?;
        for (i, (_, grid)) in self.arena.iter_mut().enumerate() {
            grid.set_in_seq(0.01 * (i as Real + 1.0));
        }
        Ok(())
    }

    /// Mismatched points against `other` over every same-named grid and
    /// every step slot.
    pub fn compare_data(&self, other: &StencilSolution, eps: Real) -> StencilResult<usize> {
        self.check_prepared("compare_data")?;
        other.check_prepared("compare_data (other)")?;
        let mut mismatches = 0;
        for (_, grid) in self.arena.iter() {
            let oh = other.grid_handle(grid.name())?;
            let og = other.arena.grid(oh);
            for slot in 0..grid.step_depth() {
                mismatches += grid.compare_data(slot as i64, og, eps)?;
            }
        }
        Ok(mismatches)
    }

    /// Human-readable solution report on the debug sink.
    pub fn print_info(&self) -> StencilResult<()> {
        self.check_prepared("print_info")?;
        let layout = self.layout.as_ref().expect("prepared");
        let wf = self.wf.as_ref().expect("prepared");
        let mut out = String::new();
        out.push_str(&format!("Solution '{}'\n", self.name));
        out.push_str(&format!(
            "  rank {} of {} at {}\n",
            self.env.rank_index(),
            self.env.num_ranks(),
            layout.rank_index
        ));
        out.push_str(&format!(
            "  rank domain: {} (overall {})\n",
            layout.rank_domain_size, layout.overall_domain_size
        ));
        out.push_str(&format!(
            "  region: {}  block: {}  sub-block: {}\n",
            self.settings.region_size, self.settings.block_size, self.settings.sub_block_size
        ));
        out.push_str(&format!(
            "  wave-front depth {} with {} shifts of {}\n",
            self.settings.wf_depth, wf.num_shifts, wf.angles
        ));
        out.push_str(&format!(
            "  grids: {} in {}  halo buffers: {}\n",
            self.decls.len(),
            format_bytes(self.grid_bytes),
            format_bytes(self.registry.as_ref().map(|r| r.num_bytes()).unwrap_or(0))
        ));
        out.push_str(&format!(
            "  est. work per step: {} writes, {} FP ops\n",
            format_num(self.tot_writes_1t as f64),
            format_num(self.tot_fpops_1t as f64)
        ));
        self.debug_write(&out);
        Ok(())
    }
}
