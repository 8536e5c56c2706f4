//! Dense numeric grid with incrementally tracked extrema
//!
//! `NumericGrid` is the storage behind every matrix the visualizer shows:
//! a row-major buffer of `h * w` floats that keeps its maximum and minimum
//! absolute values current on every mutation, so color and size mapping can
//! read range information without rescanning.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::ops::Range;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::algorithm::epilog::Epilog;

/// Error types for grid construction and dense helpers
#[derive(Debug, Error, PartialEq)]
pub enum GridError {
    #[error("initializer produced NaN at ({row}, {col})")]
    NotANumber { row: usize, col: usize },

    #[error("buffer of length {len} cannot back a {h}x{w} grid")]
    LengthMismatch { h: usize, w: usize, len: usize },

    #[error("shape mismatch: {left_h}x{left_w} and {right_h}x{right_w}")]
    ShapeMismatch {
        left_h: usize,
        left_w: usize,
        right_h: usize,
        right_w: usize,
    },
}

/// Rectangular sub-range of a grid
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Region {
    pub rows: Range<usize>,
    pub cols: Range<usize>,
}

impl Region {
    pub fn new(rows: Range<usize>, cols: Range<usize>) -> Self {
        Self { rows, cols }
    }

    /// Region covering a whole `h x w` grid
    pub fn all(h: usize, w: usize) -> Self {
        Self { rows: 0..h, cols: 0..w }
    }

    /// Single cell
    pub fn cell(i: usize, j: usize) -> Self {
        Self { rows: i..i + 1, cols: j..j + 1 }
    }

    pub fn contains(&self, i: usize, j: usize) -> bool {
        self.rows.contains(&i) && self.cols.contains(&j)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() || self.cols.is_empty()
    }

    /// Number of cells covered
    pub fn area(&self) -> usize {
        self.rows.len() * self.cols.len()
    }

    /// Row-major iteration over covered cells
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.rows
            .clone()
            .flat_map(move |i| self.cols.clone().map(move |j| (i, j)))
    }

    /// Clamps the region to a `h x w` grid
    pub fn clamp(&self, h: usize, w: usize) -> Self {
        let rows = self.rows.start.min(h)..self.rows.end.min(h);
        let cols = self.cols.start.min(w)..self.cols.end.min(w);
        Self { rows, cols }
    }
}

/// Serialized form: extrema are derived, never stored
#[derive(Serialize, Deserialize)]
struct GridRepr {
    h: usize,
    w: usize,
    data: Vec<f32>,
}

/// Dense row-major 2D float buffer
///
/// # Invariants
/// - `data.len() == h * w`
/// - `absmax`/`absmin` equal the true extrema of `|x|` over current contents
///   (both 0 for an empty grid)
/// - `revision` advances on every write, so views can tell when they are
///   stale
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "GridRepr", into = "GridRepr")]
pub struct NumericGrid {
    h: usize,
    w: usize,
    data: Vec<f32>,
    absmax: f32,
    absmin: f32,
    revision: u64,
}

impl PartialEq for NumericGrid {
    fn eq(&self, other: &Self) -> bool {
        self.h == other.h && self.w == other.w && self.data == other.data
    }
}

impl TryFrom<GridRepr> for NumericGrid {
    type Error = GridError;

    fn try_from(repr: GridRepr) -> Result<Self, Self::Error> {
        Self::from_vec(repr.h, repr.w, repr.data)
    }
}

impl From<NumericGrid> for GridRepr {
    fn from(grid: NumericGrid) -> Self {
        GridRepr { h: grid.h, w: grid.w, data: grid.data }
    }
}

impl NumericGrid {
    /// Grid of zeros
    pub fn zeros(h: usize, w: usize) -> Self {
        Self {
            h,
            w,
            data: vec![0.0; h * w],
            absmax: 0.0,
            absmin: 0.0,
            revision: 0,
        }
    }

    /// Fills every cell `(i, j)` with `f(i, j, h, w)`
    ///
    /// Fails on the first NaN, which signals a misconfigured initializer.
    pub fn from_init<F>(h: usize, w: usize, mut f: F) -> Result<Self, GridError>
    where
        F: FnMut(usize, usize, usize, usize) -> f32,
    {
        let mut data = Vec::with_capacity(h * w);
        for i in 0..h {
            for j in 0..w {
                let x = f(i, j, h, w);
                if x.is_nan() {
                    return Err(GridError::NotANumber { row: i, col: j });
                }
                data.push(x);
            }
        }
        let mut grid = Self { h, w, data, absmax: 0.0, absmin: 0.0, revision: 0 };
        grid.rescan();
        Ok(grid)
    }

    /// Wraps an existing row-major buffer
    pub fn from_vec(h: usize, w: usize, data: Vec<f32>) -> Result<Self, GridError> {
        if data.len() != h * w {
            return Err(GridError::LengthMismatch { h, w, len: data.len() });
        }
        let mut grid = Self { h, w, data, absmax: 0.0, absmin: 0.0, revision: 0 };
        grid.rescan();
        Ok(grid)
    }

    /// Builds a grid from nested rows; all rows must share a length
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self, GridError> {
        let h = rows.len();
        let w = rows.first().map_or(0, Vec::len);
        let data: Vec<f32> = rows.iter().flatten().copied().collect();
        Self::from_vec(h, w, data)
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.h
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.w
    }

    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.h, self.w)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn row(&self, i: usize) -> &[f32] {
        assert!(i < self.h, "row {} out of bounds for {}x{} grid", i, self.h, self.w);
        &self.data[i * self.w..(i + 1) * self.w]
    }

    #[inline]
    fn index(&self, i: usize, j: usize) -> usize {
        assert!(
            i < self.h && j < self.w,
            "cell ({}, {}) out of bounds for {}x{} grid",
            i,
            j,
            self.h,
            self.w
        );
        i * self.w + j
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f32 {
        self.data[self.index(i, j)]
    }

    /// Writes one cell, keeping extrema current
    ///
    /// Rescans only when the old value was the extremum and the new value
    /// does not bound it.
    pub fn set(&mut self, i: usize, j: usize, x: f32) {
        let idx = self.index(i, j);
        let old = self.data[idx].abs();
        let new = x.abs();
        self.data[idx] = x;
        self.revision = self.revision.wrapping_add(1);

        if self.data.len() == 1 {
            self.absmax = new;
            self.absmin = new;
            return;
        }

        if new >= self.absmax {
            self.absmax = new;
        } else if old == self.absmax {
            self.absmax = self.scan_absmax();
        }

        if new <= self.absmin {
            self.absmin = new;
        } else if old == self.absmin {
            self.absmin = self.scan_absmin();
        }
    }

    /// Rewrites `region` (default: whole grid) with `f(i, j, h, w)`, then
    /// applies `epilog` once over the entire grid
    ///
    /// Cells outside the region are untouched unless the epilog is applied.
    /// Non-finite epilog output is replaced with 0; the number of cells
    /// replaced is returned.
    pub fn reinit<F>(
        &mut self,
        region: Option<Region>,
        mut f: F,
        epilog: Option<(Epilog, usize)>,
    ) -> Result<usize, GridError>
    where
        F: FnMut(usize, usize, usize, usize) -> f32,
    {
        let region = region.unwrap_or_else(|| Region::all(self.h, self.w));
        assert!(
            region.rows.end <= self.h && region.cols.end <= self.w,
            "region {:?}x{:?} exceeds {}x{} grid",
            region.rows,
            region.cols,
            self.h,
            self.w
        );
        self.revision = self.revision.wrapping_add(1);
        for (i, j) in region.cells() {
            let x = f(i, j, self.h, self.w);
            if x.is_nan() {
                self.rescan();
                return Err(GridError::NotANumber { row: i, col: j });
            }
            self.data[i * self.w + j] = x;
        }
        let mut zeroed = 0;
        if let Some((epilog, depth)) = epilog {
            epilog.apply(&mut self.data, self.h, self.w, depth);
            for x in self.data.iter_mut().filter(|x| !x.is_finite()) {
                *x = 0.0;
                zeroed += 1;
            }
        }
        self.rescan();
        Ok(zeroed)
    }

    /// Write counter; changes whenever any cell may have changed
    #[inline]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Maximum absolute value over current contents
    #[inline]
    pub fn absmax(&self) -> f32 {
        self.absmax
    }

    /// Minimum absolute value over current contents
    #[inline]
    pub fn absmin(&self) -> f32 {
        self.absmin
    }

    /// Full linear scan for the maximum absolute value
    pub fn scan_absmax(&self) -> f32 {
        self.data.iter().fold(0.0f32, |m, x| m.max(x.abs()))
    }

    /// Full linear scan for the minimum absolute value
    pub fn scan_absmin(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().fold(f32::INFINITY, |m, x| m.min(x.abs()))
    }

    /// Recomputes both extrema from scratch
    pub fn rescan(&mut self) {
        self.absmax = self.scan_absmax();
        self.absmin = self.scan_absmin();
    }

    /// Nested-row copy, mostly for tests and snapshots
    pub fn to_rows(&self) -> Vec<Vec<f32>> {
        (0..self.h).map(|i| self.row(i).to_vec()).collect()
    }

    /// Largest elementwise difference against another grid of equal shape
    pub fn max_abs_diff(&self, other: &NumericGrid) -> Option<f32> {
        if self.shape() != other.shape() {
            return None;
        }
        Some(
            self.data
                .iter()
                .zip(&other.data)
                .fold(0.0f32, |m, (a, b)| m.max((a - b).abs())),
        )
    }
}
