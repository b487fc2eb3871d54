// ─────────────────────────────────────────────────────────────────────
// SCPN Stencil Core — Error
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StencilError {
    #[error("Configuration error: {0}")]
    ConfigInvalid(String),

    #[error("Allocation failed: {0}")]
    AllocationFailed(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Grid index out of range: grid '{grid}', dim '{dim}', index {index} outside [{lo}, {hi}]")]
    IndexOutOfRange {
        grid: String,
        dim: String,
        index: i64,
        lo: i64,
        hi: i64,
    },

    #[error("Communication failure: {0}")]
    CommFailure(String),

    #[error("Operation requires prepare_solution() first: {0}")]
    NotPrepared(String),

    #[error("Duplicate name: {0}")]
    DuplicateName(String),

    #[error("Unknown grid: {0}")]
    UnknownGrid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StencilResult<T> = Result<T, StencilError>;
