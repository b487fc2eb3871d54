// ─────────────────────────────────────────────────────────────────────
// SCPN Stencil Core — Stencil Core
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Distributed, vectorized stencil execution engine for one rank.
//!
//! The engine evaluates opaque stencil bundles over this rank's
//! sub-domain with a blocked, two-level-threaded loop nest, keeps
//! neighbor ranks consistent through a dirty-driven halo exchange,
//! optionally time-skews the traversal for temporal blocking, and
//! searches block geometry on-line while real work runs.

pub mod alloc;
pub mod bundle;
pub mod decomp;
pub mod env;
pub mod exchange;
pub mod executor;
pub mod grid;
pub mod halo;
pub mod solution;
pub mod stats;
pub mod tuner;
pub mod vec;
pub mod wavefront;

pub use bundle::{BundlePack, GridArena, GridHandle, ScratchSpec, StencilBundle};
pub use env::{ChannelComm, Comm, KernelEnv, NullComm, ReduceOp};
pub use grid::{for_each_point_in, DimKind, Grid, GridDim};
pub use solution::StencilSolution;
pub use stats::Stats;
pub use vec::RealVec;

use std::sync::Arc;
use stencil_types::KernelSettings;

/// New single-rank environment.
pub fn new_env() -> Arc<KernelEnv> {
    KernelEnv::single()
}

/// New solution in `env` with the given dims and default sizes.
pub fn new_solution(env: Arc<KernelEnv>, name: &str, settings: KernelSettings) -> StencilSolution {
    StencilSolution::new(env, name, settings)
}

/// New solution copying another solution's settings, not its storage.
pub fn new_solution_from(
    env: Arc<KernelEnv>,
    name: &str,
    template: &StencilSolution,
) -> StencilSolution {
    StencilSolution::new_from(env, name, template)
}
