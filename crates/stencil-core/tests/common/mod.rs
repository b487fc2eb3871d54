// ─────────────────────────────────────────────────────────────────────
// SCPN Stencil Core — Test Stencils
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Hand-written stand-ins for compiler-generated stencil bundles, plus
//! solution-building helpers shared by the integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use stencil_core::{
    Grid, GridArena, GridHandle, KernelEnv, ScratchSpec, StencilBundle, StencilSolution,
};
use stencil_types::{BoundingBox, DimSet, Dims, IdxTuple, KernelSettings, Real};

/// Diffusion coefficient of the test stencils.
pub const COEFF: Real = 0.1;

/// `u(t+1) = u(t) + COEFF * sum_d (u(t, ±reach e_d) - 2 u(t))`, the
/// `2*reach`-order Laplacian update on one step-buffered grid.
pub struct Laplacian {
    pub u: GridHandle,
    pub domain_dims: DimSet,
    pub reach: i64,
}

impl StencilBundle for Laplacian {
    fn name(&self) -> &str {
        "laplacian"
    }

    fn input_grids(&self) -> Vec<GridHandle> {
        vec![self.u]
    }

    fn output_grids(&self) -> Vec<GridHandle> {
        vec![self.u]
    }

    fn halo_ext(&self) -> IdxTuple {
        IdxTuple::filled(&self.domain_dims, self.reach)
    }

    fn est_fp_ops_per_point(&self) -> i64 {
        3 * self.domain_dims.len() as i64 + 2
    }

    fn calc_sub_block(&self, grids: &GridArena, t: i64, bb: &BoundingBox, _scratch: &mut [Grid]) {
        let u = grids.grid(self.u);
        let ndims = self.domain_dims.len();
        stencil_core::for_each_point_in(bb, |pt| {
            let center = u.read_point(t, pt);
            let mut acc = 0.0;
            let mut nbr = pt.clone();
            for d in 0..ndims {
                let x = pt.at(d);
                nbr.set_at(d, x - self.reach);
                acc += u.read_point(t, &nbr);
                nbr.set_at(d, x + self.reach);
                acc += u.read_point(t, &nbr);
                nbr.set_at(d, x);
            }
            let val = center + COEFF * (acc - 2.0 * ndims as Real * center);
            // Blocks of one pack write disjoint points.
            unsafe { u.write_point(t + 1, pt, val) };
        });
    }
}

/// The same update routed through a per-thread scratch grid: pass one
/// fills the scratch with the neighbor sum, pass two applies it.
pub struct ScratchLaplacian {
    pub u: GridHandle,
    pub domain_dims: DimSet,
    pub reach: i64,
}

impl StencilBundle for ScratchLaplacian {
    fn name(&self) -> &str {
        "laplacian_scratch"
    }

    fn input_grids(&self) -> Vec<GridHandle> {
        vec![self.u]
    }

    fn output_grids(&self) -> Vec<GridHandle> {
        vec![self.u]
    }

    fn halo_ext(&self) -> IdxTuple {
        IdxTuple::filled(&self.domain_dims, self.reach)
    }

    fn scratch_specs(&self) -> Vec<ScratchSpec> {
        vec![ScratchSpec {
            halo: IdxTuple::filled(&self.domain_dims, 0),
        }]
    }

    fn calc_sub_block(&self, grids: &GridArena, t: i64, bb: &BoundingBox, scratch: &mut [Grid]) {
        let u = grids.grid(self.u);
        let ndims = self.domain_dims.len();
        let tmp = &mut scratch[0];
        stencil_core::for_each_point_in(bb, |pt| {
            let mut acc = 0.0;
            let mut nbr = pt.clone();
            for d in 0..ndims {
                let x = pt.at(d);
                nbr.set_at(d, x - self.reach);
                acc += u.read_point(t, &nbr);
                nbr.set_at(d, x + self.reach);
                acc += u.read_point(t, &nbr);
                nbr.set_at(d, x);
            }
            tmp.write_point_mut(0, pt, acc);
        });
        stencil_core::for_each_point_in(bb, |pt| {
            let center = u.read_point(t, pt);
            let val = center + COEFF * (tmp.read_point(0, pt) - 2.0 * ndims as Real * center);
            unsafe { u.write_point(t + 1, pt, val) };
        });
    }
}

/// Install a compact tracing subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_test_writer()
        .try_init();
}

pub fn dims_3d() -> Dims {
    Dims::new("t", ["x", "y", "z"], [])
}

/// A prepared solution with one step-buffered grid `u` and one
/// Laplacian bundle; `patch` mutates the settings before preparation.
pub fn laplacian_solution(
    env: Arc<KernelEnv>,
    name: &str,
    domain: i64,
    reach: i64,
    patch: impl FnOnce(&mut KernelSettings),
) -> (StencilSolution, GridHandle) {
    let dims = dims_3d();
    let mut settings = KernelSettings::new(dims.clone());
    settings.rank_domain_size = IdxTuple::filled(&dims.domain_dims, domain);
    patch(&mut settings);
    let mut sol = stencil_core::new_solution(env, name, settings);
    let u = sol.new_grid("u", &["t", "x", "y", "z"]).expect("grid u");
    sol.add_bundle(Box::new(Laplacian {
        u,
        domain_dims: dims.domain_dims.clone(),
        reach,
    }))
    .expect("bundle");
    sol.prepare_solution().expect("prepare");
    (sol, u)
}

/// Fill the owned extent of `u` at step slot 0 with `f(x, y, z)` in
/// global indices. Halos stay zero, acting as a fixed zero boundary.
pub fn init_from(sol: &mut StencilSolution, u: GridHandle, f: impl Fn(i64, i64, i64) -> Real) {
    let dd = dims_3d().domain_dims;
    let x0 = sol.get_first_rank_domain_index("x").expect("x0");
    let x1 = sol.get_last_rank_domain_index("x").expect("x1");
    let y0 = sol.get_first_rank_domain_index("y").expect("y0");
    let y1 = sol.get_last_rank_domain_index("y").expect("y1");
    let z0 = sol.get_first_rank_domain_index("z").expect("z0");
    let z1 = sol.get_last_rank_domain_index("z").expect("z1");
    let grid = sol.grid_mut(u).expect("grid");
    for x in x0..=x1 {
        for y in y0..=y1 {
            for z in z0..=z1 {
                let pt = IdxTuple::new(&dd, vec![x, y, z]);
                grid.write_point_mut(0, &pt, f(x, y, z));
            }
        }
    }
}

/// Read one point at (`t`, `x`, `y`, `z`).
pub fn read_at(sol: &StencilSolution, u: GridHandle, t: i64, x: i64, y: i64, z: i64) -> Real {
    let dd = dims_3d().domain_dims;
    let pt = IdxTuple::new(&dd, vec![x, y, z]);
    sol.grid(u).expect("grid").read_point(t, &pt)
}
