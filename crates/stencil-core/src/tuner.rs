// ─────────────────────────────────────────────────────────────────────
// SCPN Stencil Core — Auto-Tuner
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! On-line coordinate search over block geometry.
//!
//! The tuner observes (steps, elapsed) samples from the run loop while
//! real work happens. After a warmup it times one candidate block size
//! at a time, walking the 2·D axis neighbors of the best block at a
//! shrinking radius. Results are memoized by block tuple; a revisited
//! candidate is never re-timed. Unusable candidates are counted and
//! skipped without consuming a measurement. The tuner only ever
//! proposes sizes; the solution installs them between runs.

use std::collections::HashMap;
use stencil_types::{ceil_div, IdxTuple, TunerSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Warmup,
    Measuring,
    Done,
}

pub struct AutoTuner {
    params: TunerSettings,
    verbose: bool,

    results: HashMap<Vec<i64>, f64>,
    n2big: usize,
    n2small: usize,

    best_block: IdxTuple,
    best_rate: f64,

    center_block: IdxTuple,
    cur_block: IdxTuple,
    radius: i64,
    neigh_idx: usize,
    better_neigh_found: bool,

    ctime: f64,
    csteps: i64,
    phase: Phase,
}

impl AutoTuner {
    pub fn new(params: TunerSettings, initial_block: IdxTuple) -> Self {
        let enabled = params.enabled;
        let mut at = AutoTuner {
            params,
            verbose: false,
            results: HashMap::new(),
            n2big: 0,
            n2small: 0,
            best_block: initial_block.clone(),
            best_rate: 0.0,
            center_block: initial_block.clone(),
            cur_block: initial_block,
            radius: 0,
            neigh_idx: 0,
            better_neigh_found: false,
            ctime: 0.0,
            csteps: 0,
            phase: Phase::Done,
        };
        if enabled {
            let block = at.cur_block.clone();
            at.clear(false, false, &block);
        }
        at
    }

    /// Reset all state. `mark_done` leaves the tuner disabled;
    /// otherwise the search restarts from `block`.
    pub fn clear(&mut self, mark_done: bool, verbose: bool, block: &IdxTuple) {
        self.verbose = verbose;
        self.results.clear();
        self.n2big = 0;
        self.n2small = 0;
        self.best_block = block.clone();
        self.best_rate = 0.0;
        self.center_block = block.clone();
        self.cur_block = block.clone();
        self.radius = self.params.max_radius;
        self.neigh_idx = 0;
        self.better_neigh_found = false;
        self.ctime = 0.0;
        self.csteps = 0;
        self.phase = if mark_done { Phase::Done } else { Phase::Warmup };
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    pub fn best_block(&self) -> &IdxTuple {
        &self.best_block
    }

    pub fn best_rate(&self) -> f64 {
        self.best_rate
    }

    /// The block size the next run should use.
    pub fn current_block(&self) -> &IdxTuple {
        &self.cur_block
    }

    pub fn num_skipped(&self) -> (usize, usize) {
        (self.n2big, self.n2small)
    }

    /// Fold one run sample into the search.
    pub fn eval(&mut self, steps: i64, elapsed_secs: f64, points_per_step: i64, region_size: &IdxTuple) {
        if self.phase == Phase::Done {
            return;
        }
        self.ctime += elapsed_secs;
        self.csteps += steps;

        if self.phase == Phase::Warmup {
            if self.ctime >= self.params.warmup_secs || self.csteps >= self.params.warmup_steps {
                tracing::debug!(
                    secs = self.ctime,
                    steps = self.csteps,
                    "auto-tuner warmup done"
                );
                self.phase = Phase::Measuring;
                self.ctime = 0.0;
                self.csteps = 0;
            }
            return;
        }

        // Keep accumulating until the sample is trustworthy.
        if self.csteps < self.params.min_steps || self.ctime < self.params.min_secs {
            return;
        }

        let rate = if self.ctime > 0.0 {
            (points_per_step as f64) * (self.csteps as f64) / self.ctime
        } else {
            0.0
        };
        let key = self.cur_block.vals().to_vec();
        // First measurement wins; a noisy revisit never overwrites it.
        self.results.entry(key).or_insert(rate);
        if rate > self.best_rate {
            self.best_rate = rate;
            self.best_block = self.cur_block.clone();
            self.better_neigh_found = true;
            if self.verbose {
                tracing::info!(block = %self.best_block, rate, "auto-tuner: new best");
            } else {
                tracing::debug!(block = %self.best_block, rate, "auto-tuner: new best");
            }
        }
        self.ctime = 0.0;
        self.csteps = 0;

        self.advance(region_size);
    }

    /// Move to the next timeable candidate, shrinking the radius as
    /// neighborhoods are exhausted.
    fn advance(&mut self, region_size: &IdxTuple) {
        let ndims = self.center_block.len();
        loop {
            while self.neigh_idx < 2 * ndims {
                let d = self.neigh_idx / 2;
                let sign: i64 = if self.neigh_idx % 2 == 0 { -1 } else { 1 };
                self.neigh_idx += 1;

                let mut cand = self.center_block.clone();
                cand.set_at(d, cand.at(d) + sign * self.radius);

                // Skipped candidates advance the neighbor walk only.
                if cand.at(d) < 1 {
                    self.n2small += 1;
                    continue;
                }
                if cand.at(d) > region_size.at(d) {
                    self.n2big += 1;
                    continue;
                }
                if cand.product() < self.params.min_pts {
                    self.n2small += 1;
                    continue;
                }
                let blks: i64 = (0..ndims)
                    .map(|k| ceil_div(region_size.at(k), cand.at(k)))
                    .product();
                if blks < self.params.min_blks {
                    self.n2big += 1;
                    continue;
                }
                if self.results.contains_key(cand.vals()) {
                    continue;
                }

                self.cur_block = cand;
                tracing::trace!(block = %self.cur_block, radius = self.radius, "auto-tuner candidate");
                return;
            }

            // Neighborhood exhausted.
            if self.better_neigh_found {
                self.center_block = self.best_block.clone();
                self.better_neigh_found = false;
                self.neigh_idx = 0;
            } else {
                self.radius /= 2;
                self.neigh_idx = 0;
                if self.radius < self.params.min_step {
                    self.finish();
                    return;
                }
            }
        }
    }

    fn finish(&mut self) {
        self.phase = Phase::Done;
        self.cur_block = self.best_block.clone();
        if self.verbose {
            tracing::info!(
                block = %self.best_block,
                rate = self.best_rate,
                n2big = self.n2big,
                n2small = self.n2small,
                "auto-tuner done"
            );
        } else {
            tracing::debug!(block = %self.best_block, rate = self.best_rate, "auto-tuner done");
        }
    }
}
