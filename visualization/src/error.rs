//! Errors surfaced to hosts
//!
//! Problems inside the tick loop never reach this type; they land in
//! [`mmviz_core::Diagnostics`]. `VizError` covers host operations that can
//! fail outright: loading settings, parsing expressions, serializing
//! snapshots.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use thiserror::Error;

use mmviz_core::expr::ExprError;
use mmviz_core::{ConfigError, GridError};

#[derive(Debug, Error)]
pub enum VizError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("expression error: {0}")]
    Expr(#[from] ExprError),

    #[error("grid error: {0}")]
    Grid(#[from] GridError),

    #[error("snapshot serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}
