// ─────────────────────────────────────────────────────────────────────
// SCPN Stencil Core — Auto-Tuner Integration Tests
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! The on-line search driven through the real run loop.

mod common;

use common::{init_from, laplacian_solution};
use stencil_types::{Real, TunerSettings};

fn quick_tuner() -> TunerSettings {
    TunerSettings {
        enabled: false, // enabled via reset_auto_tuner
        warmup_steps: 1,
        warmup_secs: 0.0,
        min_steps: 1,
        min_secs: 0.0,
        min_step: 2,
        max_radius: 8,
        min_pts: 64,
        min_blks: 2,
    }
}

#[test]
fn test_tuner_disabled_by_default() {
    let (mut sol, u) = laplacian_solution(stencil_core::new_env(), "no_tune", 16, 1, |_| {});
    init_from(&mut sol, u, |x, y, z| (x + y + z) as Real);
    assert!(!sol.is_auto_tuner_enabled());
    let block = sol.settings().block_size.clone();
    sol.run_solution(0, 3).expect("run");
    assert_eq!(sol.settings().block_size, block, "sizes never change");
}

#[test]
fn test_run_auto_tuner_now_converges_and_pins_block() {
    let (mut sol, u) = laplacian_solution(stencil_core::new_env(), "tune", 32, 1, |s| {
        s.tuner = quick_tuner();
        // Start from the whole region as one block.
        for i in 0..s.block_size.len() {
            s.block_size.set_at(i, 32);
        }
    });
    init_from(&mut sol, u, |x, y, z| {
        (x * x + y) as Real * 0.001 + z as Real * 0.01
    });

    sol.run_auto_tuner_now(false).expect("tuning run");
    assert!(!sol.is_auto_tuner_enabled(), "search finished");
    assert!(sol.auto_tuner_best_rate() > 0.0);
    let best = sol.auto_tuner_best_block().expect("best block");
    for i in 0..best.len() {
        assert!(best.at(i) >= 1 && best.at(i) <= 32);
    }

    // Once done, subsequent runs keep a fixed block size.
    let pinned = sol.settings().block_size.clone();
    sol.run_solution(1000, 1003).expect("run");
    sol.run_solution(1004, 1007).expect("run");
    assert_eq!(sol.settings().block_size, pinned);
}

#[test]
fn test_best_rate_is_monotone_while_searching() {
    let (mut sol, u) = laplacian_solution(stencil_core::new_env(), "mono", 32, 1, |s| {
        s.tuner = quick_tuner();
    });
    init_from(&mut sol, u, |x, _, _| x as Real);
    sol.reset_auto_tuner(true, false);

    let mut prev = 0.0;
    let mut t = 0;
    for _ in 0..200 {
        if !sol.is_auto_tuner_enabled() {
            break;
        }
        sol.run_solution(t, t + 1).expect("run");
        t += 2;
        let best = sol.auto_tuner_best_rate();
        assert!(best >= prev, "best rate regressed: {best} < {prev}");
        prev = best;
    }
    assert!(!sol.is_auto_tuner_enabled(), "search should finish");
}
