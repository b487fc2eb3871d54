// ─────────────────────────────────────────────────────────────────────
// SCPN Stencil Core — Two-Rank Integration Tests
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Distributed runs on a thread-per-rank group: halo correctness
//! against a single-rank reference, the negative check with exchange
//! disabled, and the step-slot dirty lifecycle through the run loop.

mod common;

use common::{dims_3d, Laplacian};
use ndarray::ArrayD;
use std::sync::Arc;
use std::thread;
use stencil_core::{GridHandle, KernelEnv, StencilSolution};
use stencil_types::{IdxTuple, KernelSettings, Real};

const NX: i64 = 32; // per-rank x extent
const NY: i64 = 32;
const NZ: i64 = 32;
const REACH: i64 = 2; // 2-point halo

fn field(x: i64, y: i64, z: i64) -> Real {
    0.001 * (x * x) as Real + 0.01 * y as Real + 0.02 * z as Real
}

fn build_solution(
    env: Arc<KernelEnv>,
    name: &str,
    nx: i64,
    num_ranks_x: i64,
    enable_exchange: bool,
    wf_depth: usize,
) -> (StencilSolution, GridHandle) {
    let dims = dims_3d();
    let mut settings = KernelSettings::new(dims.clone());
    settings.rank_domain_size = IdxTuple::new(&dims.domain_dims, vec![nx, NY, NZ]);
    settings.num_ranks.set("x", num_ranks_x);
    settings.enable_halo_exchange = enable_exchange;
    settings.wf_depth = wf_depth;
    let mut sol = stencil_core::new_solution(env, name, settings);
    let u = sol.new_grid("u", &["t", "x", "y", "z"]).expect("grid u");
    sol.add_bundle(Box::new(Laplacian {
        u,
        domain_dims: dims.domain_dims.clone(),
        reach: REACH,
    }))
    .expect("bundle");
    sol.prepare_solution().expect("prepare");
    (sol, u)
}

fn init(sol: &mut StencilSolution, u: GridHandle) {
    let dd = dims_3d().domain_dims;
    let x0 = sol.get_first_rank_domain_index("x").expect("x0");
    let x1 = sol.get_last_rank_domain_index("x").expect("x1");
    let grid = sol.grid_mut(u).expect("grid");
    for x in x0..=x1 {
        for y in 0..NY {
            for z in 0..NZ {
                let pt = IdxTuple::new(&dd, vec![x, y, z]);
                grid.write_point_mut(0, &pt, field(x, y, z));
            }
        }
    }
}

/// Run `steps` steps on 2 ranks split along x; returns each rank's
/// owned result at the final step plus the probes used by the tests.
struct RankResult {
    owned: ArrayD<Real>,
    halo_probe: Real,
    dirty_after: Vec<bool>,
}

fn run_two_ranks(steps: i64, enable_exchange: bool, wf_depth: usize) -> Vec<RankResult> {
    let envs = KernelEnv::split_local(2);
    let handles: Vec<_> = envs
        .into_iter()
        .enumerate()
        .map(|(rank, env)| {
            thread::spawn(move || {
                let (mut sol, u) =
                    build_solution(env, "two_rank", NX, 2, enable_exchange, wf_depth);
                init(&mut sol, u);
                sol.run_solution(0, steps - 1).expect("run");
                let grid = sol.grid(u).expect("grid");
                let owned = grid.to_ndarray(steps);
                // Rank 0 probes its halo copy of rank 1's first owned
                // column at the last exchanged step; rank 1 returns the
                // matching owned value.
                let dd = dims_3d().domain_dims;
                let probe_x = 32;
                let probe = IdxTuple::new(&dd, vec![probe_x, 4, 4]);
                let halo_probe = if rank == 0 && enable_exchange {
                    grid.read_point(steps - 1, &probe)
                } else if rank == 1 {
                    grid.read_point(steps - 1, &probe)
                } else {
                    0.0
                };
                let dirty_after = (0..grid.step_depth())
                    .map(|s| grid.is_dirty(s))
                    .collect();
                RankResult {
                    owned,
                    halo_probe,
                    dirty_after,
                }
            })
        })
        .collect();
    handles
        .into_iter()
        .map(|h| h.join().expect("rank thread"))
        .collect()
}

fn run_reference(steps: i64) -> ArrayD<Real> {
    let (mut sol, u) = build_solution(stencil_core::new_env(), "reference", 2 * NX, 1, true, 1);
    init(&mut sol, u);
    sol.run_solution(0, steps - 1).expect("run");
    sol.grid(u).expect("grid").to_ndarray(steps)
}

#[test]
fn test_two_ranks_match_single_rank_reference() {
    let steps = 3;
    let reference = run_reference(steps);
    let results = run_two_ranks(steps, true, 1);

    for x in 0..(2 * NX) as usize {
        let (part, local_x) = if x < NX as usize {
            (&results[0].owned, x)
        } else {
            (&results[1].owned, x - NX as usize)
        };
        for y in 0..NY as usize {
            for z in 0..NZ as usize {
                let a = reference[[x, y, z]];
                let b = part[[local_x, y, z]];
                assert!(
                    (a - b).abs() <= 1e-12,
                    "mismatch at ({x},{y},{z}): {a} vs {b}"
                );
            }
        }
    }
}

/// Wave-fronts on a split domain: the skewed sweep over the extended
/// rank boxes, with exchanges only at group boundaries, must reproduce
/// the single-rank depth-1 result.
#[test]
fn test_wave_front_two_ranks_match_depth_one_reference() {
    let steps = 8;
    let reference = run_reference(steps);
    let results = run_two_ranks(steps, true, 4);

    for x in 0..(2 * NX) as usize {
        let (part, local_x) = if x < NX as usize {
            (&results[0].owned, x)
        } else {
            (&results[1].owned, x - NX as usize)
        };
        for y in 0..NY as usize {
            for z in 0..NZ as usize {
                let a = reference[[x, y, z]];
                let b = part[[local_x, y, z]];
                let tol = 1e-3 * a.abs().max(1.0);
                assert!(
                    (a - b).abs() <= tol,
                    "wave-front mismatch at ({x},{y},{z}): {a} vs {b}"
                );
            }
        }
    }
}

#[test]
fn test_halo_copy_equals_neighbor_edge() {
    let steps = 2;
    let results = run_two_ranks(steps, true, 1);
    // Same global point (x=32): rank 0's halo copy vs rank 1's owned
    // value, at the last exchanged step.
    assert_eq!(
        results[0].halo_probe, results[1].halo_probe,
        "halo contents must match the owning rank exactly"
    );
}

#[test]
fn test_disabled_exchange_diverges_at_the_seam() {
    let steps = 1;
    let reference = run_reference(steps);
    let results = run_two_ranks(steps, false, 1);

    // The rank-0 column next to the seam reads stale halo data.
    let x = (NX - 1) as usize;
    let mut max_delta: Real = 0.0;
    for y in 0..NY as usize {
        for z in 0..NZ as usize {
            let delta = (reference[[x, y, z]] - results[0].owned[[x, y, z]]).abs();
            max_delta = max_delta.max(delta);
        }
    }
    assert!(
        max_delta > 1e-6,
        "seam column should diverge without halo exchange, max delta {max_delta}"
    );

    // Interior columns beyond the halo reach are untouched after one
    // step.
    let x_interior = (NX / 2) as usize;
    for y in 0..NY as usize {
        for z in 0..NZ as usize {
            let delta =
                (reference[[x_interior, y, z]] - results[0].owned[[x_interior, y, z]]).abs();
            assert!(delta <= 1e-12, "interior must be unaffected");
        }
    }
}

#[test]
fn test_dirty_lifecycle_through_run_loop() {
    let results = run_two_ranks(1, true, 1);
    for r in &results {
        // Step depth is 2 here: slot 0 was exchanged and cleared, the
        // written slot 1 is dirty awaiting the next exchange.
        assert_eq!(r.dirty_after.len(), 2);
        assert!(!r.dirty_after[0], "input slot cleared by the exchange");
        assert!(r.dirty_after[1], "output slot marked by the run loop");
    }
}
