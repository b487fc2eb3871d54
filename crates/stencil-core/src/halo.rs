// ─────────────────────────────────────────────────────────────────────
// SCPN Stencil Core — Halo Buffers
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Send/receive staging for every (grid, neighbor-direction) pair with a
//! non-empty halo overlap.
//!
//! Each pair owns one send and one receive buffer sized to the face
//! slab times the grid's step depth, segmented per step slot so several
//! slots can be in flight inside one exchange. Rows along the
//! unit-stride dim are copied whole when the face geometry and the
//! `allow_vec_exchange` switch permit; otherwise points are copied one
//! by one.

use crate::bundle::{GridArena, GridHandle};
use crate::decomp::RankLayout;
use crate::grid::{for_each_point_in, Grid};
use std::collections::HashMap;
use stencil_types::{BoundingBox, DimSet, Dims, IdxTuple, Real, StencilResult, VLEN};

/// Canonical enumeration of all directions in `{-1,0,+1}^D \ {0}`,
/// identical on every rank so direction ids can be used in tags.
pub fn all_dirs(dd: &DimSet) -> Vec<IdxTuple> {
    let ndims = dd.len();
    let mut out = Vec::new();
    let mut vals = vec![-1i64; ndims];
    'outer: loop {
        if vals.iter().any(|&v| v != 0) {
            out.push(IdxTuple::new(dd, vals.clone()));
        }
        let mut k = ndims;
        loop {
            if k == 0 {
                break 'outer;
            }
            k -= 1;
            if vals[k] < 1 {
                vals[k] += 1;
                break;
            }
            vals[k] = -1;
        }
    }
    out
}

/// One exchanged face of one grid.
pub struct HaloEntry {
    pub grid: GridHandle,
    pub peer: usize,
    /// Id of the direction in the canonical enumeration.
    pub dir_id: usize,
    /// Id of the opposite direction; the peer sends under this id.
    pub opp_dir_id: usize,
    /// Direction restricted to the grid's own domain dims.
    pub dir: IdxTuple,
    /// Owned cells the neighbor reads.
    pub send_box: BoundingBox,
    /// This rank's halo cells the neighbor fills.
    pub recv_box: BoundingBox,
    pub slab_points: usize,
    send_buf: Vec<Real>,
    recv_buf: Vec<Real>,
}

impl HaloEntry {
    fn slab_range(&self, slot: usize) -> std::ops::Range<usize> {
        let a = slot * self.slab_points;
        a..a + self.slab_points
    }
}

/// All halo buffers of one solution, indexed per grid.
#[derive(Default)]
pub struct HaloRegistry {
    entries: Vec<HaloEntry>,
    by_grid: HashMap<usize, Vec<usize>>,
    num_dirs: usize,
}

impl HaloRegistry {
    /// Build buffers for every (grid, direction) pair whose halo slab is
    /// non-empty. Grids lacking a dim some direction moves in are
    /// covered by the direction restricted to their own dims.
    pub fn build(arena: &GridArena, dims: &Dims, layout: &RankLayout) -> StencilResult<Self> {
        let dirs = all_dirs(&dims.domain_dims);
        let mut reg = HaloRegistry {
            entries: Vec::new(),
            by_grid: HashMap::new(),
            num_dirs: dirs.len(),
        };

        for (handle, grid) in arena.iter() {
            for (dir_id, dir) in dirs.iter().enumerate() {
                let Some(peer) = layout.neighbor(dir) else {
                    continue;
                };
                let Some(entry) =
                    face_entry(handle, grid, dims, dir, dir_id, opposite_id(&dirs, dir), peer)
                else {
                    continue;
                };
                reg.by_grid
                    .entry(handle.0)
                    .or_default()
                    .push(reg.entries.len());
                reg.entries.push(entry);
            }
        }
        Ok(reg)
    }

    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    pub fn entries_for(&self, h: GridHandle) -> &[usize] {
        self.by_grid.get(&h.0).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn entry(&self, idx: usize) -> &HaloEntry {
        &self.entries[idx]
    }

    /// Bytes staged in all send and receive buffers.
    pub fn num_bytes(&self) -> usize {
        self.entries
            .iter()
            .map(|e| (e.send_buf.len() + e.recv_buf.len()) * std::mem::size_of::<Real>())
            .sum()
    }

    /// Tag of the message this rank sends for (`entry`, `slot`).
    pub fn send_tag(&self, idx: usize, slot: usize) -> u64 {
        let e = &self.entries[idx];
        tag_of(e.grid.0, e.dir_id, slot, self.num_dirs)
    }

    /// Tag of the message this rank receives for (`entry`, `slot`): the
    /// peer sent it under the opposite direction id.
    pub fn recv_tag(&self, idx: usize, slot: usize) -> u64 {
        let e = &self.entries[idx];
        tag_of(e.grid.0, e.opp_dir_id, slot, self.num_dirs)
    }

    /// Gather the send slab for `slot` into the entry's send buffer and
    /// return it as bytes.
    pub fn pack(&mut self, arena: &GridArena, idx: usize, slot: usize, allow_vec: bool) -> &[u8] {
        let e = &mut self.entries[idx];
        let grid = arena.grid(e.grid);
        let range = e.slab_range(slot);
        copy_box(
            grid,
            slot as i64,
            &e.send_box,
            &mut e.send_buf[range.clone()],
            CopyDir::GridToBuf,
            allow_vec,
        );
        bytemuck::cast_slice(&e.send_buf[range])
    }

    /// Scatter received bytes for (`entry`, `slot`) into the grid halo.
    pub fn unpack(&mut self, arena: &GridArena, idx: usize, slot: usize, bytes: &[u8], allow_vec: bool) {
        let e = &mut self.entries[idx];
        let range = e.slab_range(slot);
        // The wire buffer carries no alignment guarantee.
        let wire: Vec<Real> = bytemuck::pod_collect_to_vec(bytes);
        e.recv_buf[range.clone()].copy_from_slice(&wire);
        let grid = arena.grid(e.grid);
        copy_box(
            grid,
            slot as i64,
            &e.recv_box,
            &mut e.recv_buf[range],
            CopyDir::BufToGrid,
            allow_vec,
        );
    }
}

fn opposite_id(dirs: &[IdxTuple], dir: &IdxTuple) -> usize {
    let opp = dir.scale(-1);
    dirs.iter()
        .position(|d| *d == opp)
        .expect("direction set is closed under negation")
}

fn tag_of(grid_idx: usize, dir_id: usize, slot: usize, num_dirs: usize) -> u64 {
    ((grid_idx * num_dirs + dir_id) * crate::grid::MAX_STEP_DEPTH + slot) as u64
}

/// Face boxes for one grid and one direction, or `None` when the halo
/// slab is empty or the direction moves in a dim the grid lacks.
fn face_entry(
    handle: GridHandle,
    grid: &Grid,
    dims: &Dims,
    dir: &IdxTuple,
    dir_id: usize,
    opp_dir_id: usize,
    peer: usize,
) -> Option<HaloEntry> {
    // Restrict the direction to the grid's domain dims.
    let grid_domain: Vec<&crate::grid::GridDim> = grid
        .dims()
        .iter()
        .filter(|gd| gd.kind == crate::grid::DimKind::Domain)
        .collect();
    if grid_domain.is_empty() {
        return None;
    }
    for name in dims.domain_dims.names() {
        let moved = dir.get(name) != Some(0);
        if moved && !grid_domain.iter().any(|gd| gd.name == name) {
            return None;
        }
    }

    let names: Vec<String> = grid_domain.iter().map(|gd| gd.name.clone()).collect();
    let gd_set = DimSet::new(names);
    let mut send_b = Vec::new();
    let mut send_e = Vec::new();
    let mut recv_b = Vec::new();
    let mut recv_e = Vec::new();
    let mut restricted = Vec::new();
    for gd in &grid_domain {
        let d = dir.get(&gd.name).unwrap_or(0);
        restricted.push(d);
        let h = match d {
            -1 => gd.lhalo,
            1 => gd.rhalo,
            _ => 0,
        };
        if d != 0 && h == 0 {
            return None;
        }
        match d {
            0 => {
                send_b.push(gd.first);
                send_e.push(gd.last + 1);
                recv_b.push(gd.first);
                recv_e.push(gd.last + 1);
            }
            -1 => {
                send_b.push(gd.first);
                send_e.push(gd.first + h);
                recv_b.push(gd.first - h);
                recv_e.push(gd.first);
            }
            _ => {
                send_b.push(gd.last + 1 - h);
                send_e.push(gd.last + 1);
                recv_b.push(gd.last + 1);
                recv_e.push(gd.last + 1 + h);
            }
        }
    }

    let fold = IdxTuple::filled(&gd_set, 1);
    let mut send_box = BoundingBox::new(
        IdxTuple::new(&gd_set, send_b),
        IdxTuple::new(&gd_set, send_e),
    );
    send_box.update(true, &fold, &fold);
    let mut recv_box = BoundingBox::new(
        IdxTuple::new(&gd_set, recv_b),
        IdxTuple::new(&gd_set, recv_e),
    );
    recv_box.update(true, &fold, &fold);
    let slab_points = send_box.size as usize;
    if slab_points == 0 {
        return None;
    }

    let depth = grid.step_depth();
    Some(HaloEntry {
        grid: handle,
        peer,
        dir_id,
        opp_dir_id,
        dir: IdxTuple::new(&gd_set, restricted),
        send_box,
        recv_box,
        slab_points,
        send_buf: vec![0.0; slab_points * depth],
        recv_buf: vec![0.0; slab_points * depth],
    })
}

enum CopyDir {
    GridToBuf,
    BufToGrid,
}

/// Copy between a grid box and a dense buffer, row-at-a-time along the
/// unit-stride dim when the face geometry permits.
fn copy_box(
    grid: &Grid,
    t: i64,
    bb: &BoundingBox,
    buf: &mut [Real],
    dir: CopyDir,
    allow_vec: bool,
) {
    let inner = bb.begin.len() - 1;
    let inner_len = bb.len.at(inner);
    let inner_name = bb.begin.dims().name(inner);
    let grid_inner_ok = grid
        .dims()
        .last()
        .map(|gd| gd.name == inner_name && gd.stride == 1)
        .unwrap_or(false);
    let whole_folds = inner_len % VLEN as i64 == 0 && grid.is_vec_aligned(&bb.begin);

    if allow_vec && grid_inner_ok && whole_folds && inner_len > 0 {
        // Row box: collapse the inner dim to its first index.
        let mut row_end = bb.end.clone();
        row_end.set_at(inner, bb.begin.at(inner) + 1);
        let row_box = BoundingBox::new(bb.begin.clone(), row_end);
        let run = inner_len as usize;
        let mut pos = 0usize;
        for_each_point_in(&row_box, |pt| {
            let dst = &mut buf[pos..pos + run];
            match dir {
                CopyDir::GridToBuf => grid.read_row(t, pt, dst),
                CopyDir::BufToGrid => {
                    // Exchange runs single-threaded on the rank thread.
                    unsafe { grid.write_row(t, pt, dst) };
                }
            }
            pos += run;
        });
    } else {
        let mut pos = 0usize;
        for_each_point_in(bb, |pt| {
            match dir {
                CopyDir::GridToBuf => buf[pos] = grid.read_point(t, pt),
                CopyDir::BufToGrid => {
                    // Exchange runs single-threaded on the rank thread.
                    unsafe { grid.write_point(t, pt, buf[pos]) };
                }
            }
            pos += 1;
        });
    }
}
