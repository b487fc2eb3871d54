// ─────────────────────────────────────────────────────────────────────
// SCPN Stencil Core — Run Statistics
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Work metrics and elapsed-time tracking for `run_solution()`.

use serde::Serialize;
use std::time::Instant;

/// Snapshot returned by `get_stats()`; taking it resets the counters.
#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    /// Points in the overall problem domain.
    pub num_elements: i64,
    /// Points written per step, over all ranks.
    pub num_writes: i64,
    /// Estimated FP ops per step, over all ranks.
    pub est_fp_ops: i64,
    /// Steps completed by `run_solution()` since the last snapshot.
    pub num_steps_done: i64,
    /// Seconds spent inside `run_solution()` since the last snapshot.
    pub elapsed_run_secs: f64,
}

/// Accumulates wall-clock spans across `run_solution()` calls.
#[derive(Debug, Default)]
pub struct RunTimer {
    total_secs: f64,
    started: Option<Instant>,
}

impl RunTimer {
    pub fn start(&mut self) {
        debug_assert!(self.started.is_none(), "timer started twice");
        self.started = Some(Instant::now());
    }

    /// Stop the running span and return its length in seconds.
    pub fn stop(&mut self) -> f64 {
        let span = self
            .started
            .take()
            .map(|s| s.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        self.total_secs += span;
        span
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.total_secs
    }

    pub fn clear(&mut self) {
        self.total_secs = 0.0;
        self.started = None;
    }
}

/// Render a rate or count with a decimal SI multiplier, e.g. `3.14M`.
pub fn format_num(num: f64) -> String {
    const ONE_K: f64 = 1e3;
    const ONE_M: f64 = 1e6;
    const ONE_G: f64 = 1e9;
    const ONE_T: f64 = 1e12;
    if num >= ONE_T {
        format!("{:.2}T", num / ONE_T)
    } else if num >= ONE_G {
        format!("{:.2}G", num / ONE_G)
    } else if num >= ONE_M {
        format!("{:.2}M", num / ONE_M)
    } else if num >= ONE_K {
        format!("{:.2}K", num / ONE_K)
    } else {
        format!("{num:.2}")
    }
}
