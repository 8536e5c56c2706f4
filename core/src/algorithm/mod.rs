//! Numeric building blocks for the matmul engine
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

pub mod epilog;
pub mod init;
pub mod kernel;
pub mod schedule;

pub use self::epilog::Epilog;
pub use self::init::{derive_seed, leaf_grid, CellInit, Initializer};
pub use self::kernel::{matmul, partial_dot};
pub use self::schedule::{Algorithm, Family, Flow, FuseMode, Side};
