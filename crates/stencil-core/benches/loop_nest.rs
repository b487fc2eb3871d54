// ─────────────────────────────────────────────────────────────────────
// SCPN Stencil Core — Loop-Nest Benchmarks
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Block-size sweep over the 3-D Laplacian update.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use stencil_core::{GridArena, GridHandle, StencilBundle, StencilSolution};
use stencil_types::{BoundingBox, DimSet, Dims, IdxTuple, KernelSettings, Real};

struct Laplacian {
    u: GridHandle,
    domain_dims: DimSet,
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
        IdxTuple::filled(&self.domain_dims, 1)
    }

    fn calc_sub_block(
        &self,
        grids: &GridArena,
        t: i64,
        bb: &BoundingBox,
        _scratch: &mut [stencil_core::Grid],
    ) {
        let u = grids.grid(self.u);
        let ndims = self.domain_dims.len();
        stencil_core::for_each_point_in(bb, |pt| {
            let center = u.read_point(t, pt);
            let mut acc = 0.0;
            let mut nbr = pt.clone();
            for d in 0..ndims {
                let x = pt.at(d);
                nbr.set_at(d, x - 1);
                acc += u.read_point(t, &nbr);
                nbr.set_at(d, x + 1);
                acc += u.read_point(t, &nbr);
                nbr.set_at(d, x);
            }
            let val = center + 0.1 * (acc - 2.0 * ndims as Real * center);
            unsafe { u.write_point(t + 1, pt, val) };
        });
    }
}

fn prepared_solution(block: i64) -> StencilSolution {
    let dims = Dims::new("t", ["x", "y", "z"], []);
    let mut settings = KernelSettings::new(dims.clone());
    settings.rank_domain_size = IdxTuple::filled(&dims.domain_dims, 64);
    settings.block_size = IdxTuple::filled(&dims.domain_dims, block);
    let mut sol = stencil_core::new_solution(stencil_core::new_env(), "bench", settings);
    let u = sol.new_grid("u", &["t", "x", "y", "z"]).expect("grid");
    sol.add_bundle(Box::new(Laplacian {
        u,
        domain_dims: dims.domain_dims,
    }))
    .expect("bundle");
    sol.prepare_solution().expect("prepare");
    let grid = sol.grid_mut(u).expect("grid");
    grid.set_in_seq(0.001);
    sol
}

fn bench_block_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("laplacian_64_block_sweep");
    group.sample_size(10);
    for &block in &[8i64, 16, 32, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(block), &block, |b, &block| {
            let mut sol = prepared_solution(block);
            let mut t = 0i64;
            b.iter(|| {
                sol.run_solution(t, t).expect("run");
                t += 1;
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_block_sizes);
criterion_main!(benches);
