// ─────────────────────────────────────────────────────────────────────
// SCPN Stencil Core — Rank Decomposition
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Mapping of the global domain onto a Cartesian grid of ranks.
//!
//! Ranks are linearized row-major over the domain dims (first dim
//! slowest). Every rank owns an equally sized sub-domain; neighbors
//! differ by one step in each dim, with no wrap-around at the global
//! boundary.

use stencil_types::{Dims, IdxTuple, KernelSettings, StencilError, StencilResult};

/// One neighboring rank in a unit direction.
#[derive(Debug, Clone)]
pub struct Neighbor {
    /// Direction per domain dim, each in {-1, 0, +1}, not all zero.
    pub dir: IdxTuple,
    /// Linear rank id of the neighbor.
    pub rank: usize,
}

/// This rank's place in the global problem.
#[derive(Debug, Clone)]
pub struct RankLayout {
    pub num_ranks: IdxTuple,
    pub rank_index: IdxTuple,
    pub rank_domain_size: IdxTuple,
    /// Global index of this rank's first owned point, per domain dim.
    pub rank_domain_offset: IdxTuple,
    pub overall_domain_size: IdxTuple,
    pub neighbors: Vec<Neighbor>,
}

impl RankLayout {
    pub fn new(
        dims: &Dims,
        settings: &KernelSettings,
        env_rank: usize,
        env_size: usize,
    ) -> StencilResult<Self> {
        let num_ranks = settings.num_ranks.clone();
        let expected = num_ranks.product();
        if expected != env_size as i64 {
            return Err(StencilError::ConfigInvalid(format!(
                "rank grid {} needs {expected} ranks but the group has {env_size}"
            , num_ranks)));
        }
        if env_rank >= env_size {
            return Err(StencilError::ConfigInvalid(format!(
                "rank {env_rank} outside group of {env_size}"
            )));
        }

        let ndims = dims.num_domain_dims();
        // De-linearize, first dim slowest.
        let mut rank_index = IdxTuple::filled(&dims.domain_dims, 0);
        let mut rem = env_rank as i64;
        for d in (0..ndims).rev() {
            let n = num_ranks.at(d);
            rank_index.set_at(d, rem % n);
            rem /= n;
        }

        let rank_domain_size = settings.rank_domain_size.clone();
        let rank_domain_offset = rank_index.mul(&rank_domain_size);
        let overall_domain_size = rank_domain_size.mul(&num_ranks);

        let neighbors = enumerate_neighbors(&num_ranks, &rank_index);

        Ok(RankLayout {
            num_ranks,
            rank_index,
            rank_domain_size,
            rank_domain_offset,
            overall_domain_size,
            neighbors,
        })
    }

    /// Linear rank id for a rank-grid index.
    pub fn linearize(num_ranks: &IdxTuple, index: &IdxTuple) -> usize {
        let mut rank = 0i64;
        for d in 0..num_ranks.len() {
            rank = rank * num_ranks.at(d) + index.at(d);
        }
        rank as usize
    }

    /// The neighbor in `dir`, if this rank is not on that boundary.
    pub fn neighbor(&self, dir: &IdxTuple) -> Option<usize> {
        self.neighbors
            .iter()
            .find(|n| n.dir == *dir)
            .map(|n| n.rank)
    }

    /// True when this rank touches the low (`-1`) or high (`+1`) global
    /// boundary of dim `d`.
    pub fn on_boundary(&self, d: usize, side: i64) -> bool {
        if side < 0 {
            self.rank_index.at(d) == 0
        } else {
            self.rank_index.at(d) == self.num_ranks.at(d) - 1
        }
    }
}

fn enumerate_neighbors(num_ranks: &IdxTuple, rank_index: &IdxTuple) -> Vec<Neighbor> {
    let ndims = num_ranks.len();
    let mut out = Vec::new();
    // Odometer over {-1, 0, +1}^D.
    let mut dir_vals = vec![-1i64; ndims];
    'outer: loop {
        if dir_vals.iter().any(|&v| v != 0) {
            let mut ok = true;
            let mut nbr = rank_index.clone();
            for d in 0..ndims {
                let idx = rank_index.at(d) + dir_vals[d];
                if idx < 0 || idx >= num_ranks.at(d) {
                    ok = false;
                    break;
                }
                nbr.set_at(d, idx);
            }
            if ok {
                let mut dir = rank_index.clone();
                for d in 0..ndims {
                    dir.set_at(d, dir_vals[d]);
                }
                out.push(Neighbor {
                    dir,
                    rank: RankLayout::linearize(num_ranks, &nbr),
                });
            }
        }
        // Next direction.
        let mut k = ndims;
        loop {
            if k == 0 {
                break 'outer;
            }
            k -= 1;
            if dir_vals[k] < 1 {
                dir_vals[k] += 1;
                break;
            }
            dir_vals[k] = -1;
        }
    }
    out
}
