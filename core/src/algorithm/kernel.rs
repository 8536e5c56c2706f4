//! Dense reference kernels
//!
//! The animation engine computes results cell by cell; these helpers give
//! the full dense answer in one pass, used whenever a result grid is
//! reinitialized wholesale and by the expression evaluator.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::ops::Range;

use rayon::prelude::*;

use crate::data_structures::grid::{GridError, NumericGrid};

/// Raw partial dot product `Σ_{j ∈ range} left[i][j] * right[j][k]`
///
/// No epilog and no NaN handling; callers decide how to treat the sum.
#[inline]
pub fn partial_dot(left: &NumericGrid, right: &NumericGrid, i: usize, k: usize, range: Range<usize>) -> f32 {
    range.map(|j| left.get(i, j) * right.get(j, k)).sum()
}

/// Dense product `left @ right`, parallel over result rows
pub fn matmul(left: &NumericGrid, right: &NumericGrid) -> Result<NumericGrid, GridError> {
    let (h, d) = left.shape();
    let (rd, w) = right.shape();
    if d != rd {
        return Err(GridError::ShapeMismatch {
            left_h: h,
            left_w: d,
            right_h: rd,
            right_w: w,
        });
    }

    let mut data = vec![0.0f32; h * w];
    if w > 0 {
        let a = left.as_slice();
        let b = right.as_slice();
        data.par_chunks_mut(w).enumerate().for_each(|(i, row)| {
            let a_row = &a[i * d..(i + 1) * d];
            for (j, &a_ij) in a_row.iter().enumerate() {
                let b_row = &b[j * w..(j + 1) * w];
                for (out, &b_jk) in row.iter_mut().zip(b_row) {
                    *out += a_ij * b_jk;
                }
            }
        });
    }
    NumericGrid::from_vec(h, w, data)
}

/// Elementwise sum of two equally shaped grids
pub fn add(left: &NumericGrid, right: &NumericGrid) -> Result<NumericGrid, GridError> {
    if left.shape() != right.shape() {
        let (left_h, left_w) = left.shape();
        let (right_h, right_w) = right.shape();
        return Err(GridError::ShapeMismatch { left_h, left_w, right_h, right_w });
    }
    let data = left
        .as_slice()
        .iter()
        .zip(right.as_slice())
        .map(|(a, b)| a + b)
        .collect();
    NumericGrid::from_vec(left.height(), left.width(), data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matmul_matches_hand_computed() {
        let a = NumericGrid::from_rows(&[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]).unwrap();
        let b = NumericGrid::from_rows(&[vec![7.0, 8.0], vec![9.0, 10.0], vec![11.0, 12.0]]).unwrap();
        let c = matmul(&a, &b).unwrap();
        assert_eq!(c.to_rows(), vec![vec![58.0, 64.0], vec![139.0, 154.0]]);
        assert_eq!(partial_dot(&a, &b, 1, 1, 0..3), 154.0);
        assert_eq!(partial_dot(&a, &b, 1, 1, 1..2), 50.0);
    }

    #[test]
    fn test_matmul_shape_mismatch() {
        let a = NumericGrid::zeros(2, 3);
        let b = NumericGrid::zeros(2, 3);
        assert!(matches!(matmul(&a, &b), Err(GridError::ShapeMismatch { .. })));
        assert!(add(&a, &NumericGrid::zeros(3, 2)).is_err());
    }

    #[test]
    fn test_add_is_elementwise() {
        let a = NumericGrid::from_rows(&[vec![1.0, 2.0, 3.0]]).unwrap();
        let s = add(&a, &a).unwrap();
        assert_eq!(s.to_rows(), vec![vec![2.0, 4.0, 6.0]]);
    }
}
