//! Matrix views: value mapping, point-cloud mats and decorations
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

pub mod deco;
pub mod mapping;
pub mod mat;

pub use self::mapping::{GlobalRange, ValueRange};
pub use self::mat::{CellGeometry, Mat};
