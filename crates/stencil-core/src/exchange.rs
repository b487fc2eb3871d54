// ─────────────────────────────────────────────────────────────────────
// SCPN Stencil Core — Halo Exchange
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Dirty-driven halo exchange between neighbor ranks.
//!
//! For every grid a pack reads at the requested steps, every dirty step
//! slot is exchanged on every non-empty face: receives are posted
//! first, send slabs are packed and posted, then receives are drained
//! in completion order and unpacked, then sends are drained. A slot's
//! dirty flag is cleared once every side of it has been exchanged. The
//! whole section runs on the rank thread only.

use crate::bundle::{BundlePack, GridArena, GridHandle, StencilBundle};
use crate::env::KernelEnv;
use crate::halo::HaloRegistry;
use std::collections::HashSet;
use stencil_types::StencilResult;

/// Grids read by any bundle of `pack`, deduplicated, in first-use order.
pub fn grids_read_by(bundles: &[Box<dyn StencilBundle>], pack: &BundlePack) -> Vec<GridHandle> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for &bi in &pack.bundles {
        for h in bundles[bi].input_grids() {
            if seen.insert(h) {
                out.push(h);
            }
        }
    }
    out
}

/// Exchange every dirty slot of `grids` for steps `[start, stop)`.
pub fn exchange_halos(
    arena: &GridArena,
    registry: &mut HaloRegistry,
    env: &KernelEnv,
    grids: &[GridHandle],
    start: i64,
    stop: i64,
    enable: bool,
    allow_vec: bool,
) -> StencilResult<()> {
    if !enable || env.num_ranks() == 1 {
        return Ok(());
    }

    // Work list: one item per (grid, dirty slot, face).
    let mut slots: Vec<(GridHandle, usize)> = Vec::new();
    let mut seen = HashSet::new();
    for &h in grids {
        let grid = arena.grid(h);
        for t in start..stop {
            let slot = grid.step_slot(t);
            if grid.is_dirty(slot) && seen.insert((h, slot)) {
                slots.push((h, slot));
            }
        }
    }
    if slots.is_empty() {
        return Ok(());
    }

    let mut recvs = Vec::new();
    let mut sends = Vec::new();
    for &(h, slot) in &slots {
        let entries: Vec<usize> = registry.entries_for(h).to_vec();
        for e in entries {
            let peer = registry.entry(e).peer;
            let rtag = registry.recv_tag(e, slot);
            recvs.push((e, slot, env.comm().post_recv(peer, rtag)?));
            let bytes = registry.pack(arena, e, slot, allow_vec).to_vec();
            let stag = registry.send_tag(e, slot);
            sends.push(env.comm().isend(peer, stag, bytes)?);
        }
    }
    tracing::debug!(
        rank = env.rank_index(),
        faces = sends.len(),
        slots = slots.len(),
        "halo exchange posted"
    );

    for (e, slot, req) in recvs {
        let bytes = env.comm().wait_recv(req)?;
        registry.unpack(arena, e, slot, &bytes, allow_vec);
    }
    for req in sends {
        env.comm().wait_send(req)?;
    }

    // Every face of every listed slot is now exchanged.
    for (h, slot) in slots {
        arena.grid(h).clear_dirty(slot);
    }
    Ok(())
}

/// Mark the outputs of `pack` dirty for the executed steps
/// `[start, stop)`; each bundle writes at its own step offset.
pub fn mark_grids_dirty(
    arena: &GridArena,
    bundles: &[Box<dyn StencilBundle>],
    pack: &BundlePack,
    start: i64,
    stop: i64,
) {
    for &bi in &pack.bundles {
        let b = &bundles[bi];
        let off = b.step_offset();
        for h in b.output_grids() {
            let grid = arena.grid(h);
            for t in start..stop {
                grid.mark_dirty(t + off);
            }
        }
    }
}
