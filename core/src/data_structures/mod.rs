//! Numeric storage and index-space partitioning
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

pub mod blocks;
pub mod grid;

pub use self::blocks::{Axis, Block, BlockGrid, Tile};
pub use self::grid::{GridError, NumericGrid, Region};
