//! Animation algorithms and their data-flow signatures
//!
//! Each animation algorithm is a walk over the `ijk` index space of a
//! matmul. What matters for scheduling is (a) which axes the cursor walks,
//! outermost first, and (b) in what order result cells become final and
//! operand cells get consumed. Composition of nested matmuls is decided
//! purely from these signatures.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use serde::{Deserialize, Serialize};

use crate::data_structures::blocks::Axis;

closed_set! {
    /// Stepwise reveal strategy for a matmul node
    pub enum Algorithm: "algorithm" {
        None => "none",
        DotprodRowMajor => "dotprod (row major)",
        DotprodColMajor => "dotprod (col major)",
        Axpy => "axpy",
        Vmprod => "vmprod",
        Mvprod => "mvprod",
        Vvprod => "vvprod",
    }
}

impl Default for Algorithm {
    fn default() -> Self {
        Algorithm::None
    }
}

closed_set! {
    /// How a parent combines its steps with a nested child's steps
    pub enum FuseMode: "fuse mode" {
        None => "none",
        Sync => "sync",
        Async => "async",
    }
}

impl Default for FuseMode {
    fn default() -> Self {
        FuseMode::Sync
    }
}

/// Product shape an algorithm computes per step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Family {
    /// Vector-matrix: result rows
    Vm,
    /// Matrix-vector: result columns
    Mv,
    /// Outer products accumulated over the inner dimension
    Vv,
}

/// Operand position in a matmul
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];
}

/// Granularity at which a matrix is produced or consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Flow {
    /// Row by row
    Rows,
    /// Column by column
    Cols,
    /// All at once (produced at the end, or needed in full)
    Whole,
}

impl Algorithm {
    pub fn is_animated(self) -> bool {
        self != Algorithm::None
    }

    pub fn family(self) -> Option<Family> {
        match self {
            Algorithm::None => None,
            Algorithm::Vmprod | Algorithm::DotprodRowMajor => Some(Family::Vm),
            Algorithm::Mvprod | Algorithm::DotprodColMajor => Some(Family::Mv),
            Algorithm::Vvprod | Algorithm::Axpy => Some(Family::Vv),
        }
    }

    /// Axes walked by the cursor, outermost first
    pub fn cursor_axes(self) -> &'static [Axis] {
        match self {
            Algorithm::None => &[],
            Algorithm::Vmprod => &[Axis::I],
            Algorithm::DotprodRowMajor => &[Axis::I, Axis::K],
            Algorithm::Mvprod => &[Axis::K],
            Algorithm::DotprodColMajor => &[Axis::K, Axis::I],
            Algorithm::Vvprod => &[Axis::J],
            Algorithm::Axpy => &[Axis::J, Axis::I],
        }
    }

    /// Order in which result cells become final
    pub fn produces(self) -> Flow {
        match self.family() {
            Some(Family::Vm) => Flow::Rows,
            Some(Family::Mv) => Flow::Cols,
            Some(Family::Vv) | None => Flow::Whole,
        }
    }

    /// Order in which an operand is read
    pub fn consumes(self, side: Side) -> Flow {
        match (self.family(), side) {
            (Some(Family::Vm), Side::Left) => Flow::Rows,
            (Some(Family::Mv), Side::Right) => Flow::Cols,
            (Some(Family::Vv), Side::Left) => Flow::Cols,
            (Some(Family::Vv), Side::Right) => Flow::Rows,
            _ => Flow::Whole,
        }
    }

    /// Whether a child running `child` can feed this algorithm's `side`
    /// without reordering
    pub fn composes_with(self, side: Side, child: Algorithm) -> bool {
        !child.is_animated() || child.produces() == self.consumes(side)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_variants_share_families() {
        assert_eq!(Algorithm::DotprodRowMajor.family(), Algorithm::Vmprod.family());
        assert_eq!(Algorithm::DotprodColMajor.family(), Algorithm::Mvprod.family());
        assert_eq!(Algorithm::Axpy.family(), Algorithm::Vvprod.family());
        assert_eq!(Algorithm::Axpy.cursor_axes().len(), 2);
        assert_eq!(Algorithm::Vvprod.cursor_axes().len(), 1);
        assert_eq!(Algorithm::DotprodColMajor.cursor_axes(), &[Axis::K, Axis::I]);
    }

    #[test]
    fn test_row_streams_compose() {
        let parent = Algorithm::Vmprod;
        assert!(parent.composes_with(Side::Left, Algorithm::DotprodRowMajor));
        assert!(!parent.composes_with(Side::Right, Algorithm::Vmprod));
        assert!(!parent.composes_with(Side::Left, Algorithm::Mvprod));
        assert!(parent.composes_with(Side::Left, Algorithm::None));

        let outer = Algorithm::Vvprod;
        assert!(outer.composes_with(Side::Left, Algorithm::Mvprod));
        assert!(outer.composes_with(Side::Right, Algorithm::Vmprod));
        assert!(!outer.composes_with(Side::Left, Algorithm::Axpy));
    }

    #[test]
    fn test_names() {
        assert_eq!("dotprod (row major)".parse::<Algorithm>().unwrap(), Algorithm::DotprodRowMajor);
        assert_eq!("async".parse::<FuseMode>().unwrap(), FuseMode::Async);
        assert!("blocked".parse::<Algorithm>().is_err());
        assert_eq!(Algorithm::ALL.len(), 7);
    }
}
