// ─────────────────────────────────────────────────────────────────────
// SCPN Stencil Core — Stencil Types
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Shared vocabulary for the stencil kernel: dimension tuples, bounding
//! boxes, kernel settings, and the error type.

pub mod bbox;
pub mod error;
pub mod idx;
pub mod settings;

pub use bbox::BoundingBox;
pub use error::{StencilError, StencilResult};
pub use idx::{ceil_div, round_up, DimSet, IdxTuple};
pub use settings::{Dims, KernelSettings, NumaPref, TunerSettings, DEF_BLOCK_SIZE, VLEN};

/// Element type of all grids in this build.
pub type Real = f64;
