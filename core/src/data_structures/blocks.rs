//! Block partitioning and tile enumeration over the i/j/k index space
//!
//! An axis of length `L` split into `N` blocks uses blocks of size
//! `ceil(L / N)`. When `size * N` overshoots `L` far enough that trailing
//! blocks would start at or past `L`, those blocks are skipped, so every
//! yielded block is non-empty and the union of blocks covers `[0, L)`
//! exactly once.
//!
//! Tiles enumerate the Cartesian product of blocks over any subset of the
//! axes, outermost axis first, the way cache-blocked GEMM loops nest.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

/// One of the three matmul index axes
///
/// `i` ranges over result rows, `j` over the shared inner dimension and
/// `k` over result columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    I,
    J,
    K,
}

impl Axis {
    #[inline]
    pub fn slot(self) -> usize {
        match self {
            Axis::I => 0,
            Axis::J => 1,
            Axis::K => 2,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Axis::I => "i",
            Axis::J => "j",
            Axis::K => "k",
        })
    }
}

/// Contiguous sub-range of an axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Block {
    /// Position of the block along its axis
    pub index: usize,

    /// First covered offset
    pub start: usize,

    /// One past the last covered offset
    pub end: usize,

    /// `end - start`, never zero
    pub extent: usize,
}

impl Block {
    #[inline]
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    #[inline]
    pub fn contains(&self, x: usize) -> bool {
        x >= self.start && x < self.end
    }

    /// Absolute offset for a within-block offset, if the block is long enough
    #[inline]
    pub fn at(&self, offset: usize) -> Option<usize> {
        (offset < self.extent).then(|| self.start + offset)
    }
}

/// Block size used when splitting `len` into `count` blocks
#[inline]
pub fn block_size(len: usize, count: usize) -> usize {
    let count = count.max(1);
    len.div_ceil(count).max(1)
}

/// Splits `[0, len)` into at most `count` non-empty blocks
pub fn blocks(len: usize, count: usize) -> Vec<Block> {
    let size = block_size(len, count);
    (0..count.max(1))
        .map(|index| (index, index * size))
        .filter(|&(_, start)| start < len)
        .map(|(index, start)| {
            let end = (start + size).min(len);
            Block { index, start, end, extent: end - start }
        })
        .collect()
}

/// Index of the block containing `x`
#[inline]
pub fn block_of(x: usize, len: usize, count: usize) -> usize {
    x / block_size(len, count)
}

/// One element of a tile enumeration
///
/// Axes that were not requested are `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tile {
    blocks: [Option<Block>; 3],
}

impl Tile {
    #[inline]
    pub fn get(&self, axis: Axis) -> Option<Block> {
        self.blocks[axis.slot()]
    }

    #[inline]
    pub fn i(&self) -> Option<Block> {
        self.blocks[0]
    }

    #[inline]
    pub fn j(&self) -> Option<Block> {
        self.blocks[1]
    }

    #[inline]
    pub fn k(&self) -> Option<Block> {
        self.blocks[2]
    }
}

/// Blocked decomposition of an `H x D x W` index space
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockGrid {
    lens: [usize; 3],
    axes: [Vec<Block>; 3],
}

impl BlockGrid {
    /// `lens` and `counts` are ordered `[i, j, k]`
    pub fn new(lens: [usize; 3], counts: [usize; 3]) -> Self {
        let axes = [
            blocks(lens[0], counts[0]),
            blocks(lens[1], counts[1]),
            blocks(lens[2], counts[2]),
        ];
        Self { lens, axes }
    }

    #[inline]
    pub fn len(&self, axis: Axis) -> usize {
        self.lens[axis.slot()]
    }

    #[inline]
    pub fn blocks(&self, axis: Axis) -> &[Block] {
        &self.axes[axis.slot()]
    }

    /// Largest block extent along an axis (0 for an empty axis)
    pub fn max_extent(&self, axis: Axis) -> usize {
        self.blocks(axis).iter().map(|b| b.extent).max().unwrap_or(0)
    }

    /// Enumerates tiles over `axes`, the first axis varying slowest
    pub fn tiles(&self, axes: &[Axis]) -> TileIter<'_> {
        TileIter::new(self, axes)
    }

    /// All tiles over every axis
    pub fn all_tiles(&self) -> TileIter<'_> {
        self.tiles(&[Axis::I, Axis::J, Axis::K])
    }
}

/// Odometer-style iterator over a Cartesian product of blocks
#[derive(Debug, Clone)]
pub struct TileIter<'a> {
    grid: &'a BlockGrid,
    axes: Vec<Axis>,
    counters: Vec<usize>,
    done: bool,
}

impl<'a> TileIter<'a> {
    fn new(grid: &'a BlockGrid, axes: &[Axis]) -> Self {
        let done = axes.iter().any(|a| grid.blocks(*a).is_empty());
        Self {
            grid,
            axes: axes.to_vec(),
            counters: vec![0; axes.len()],
            done,
        }
    }
}

impl Iterator for TileIter<'_> {
    type Item = Tile;

    fn next(&mut self) -> Option<Tile> {
        if self.done {
            return None;
        }

        let mut tile = Tile { blocks: [None; 3] };
        for (axis, &n) in self.axes.iter().zip(&self.counters) {
            tile.blocks[axis.slot()] = Some(self.grid.blocks(*axis)[n]);
        }

        // advance innermost first
        let mut pos = self.axes.len();
        loop {
            if pos == 0 {
                self.done = true;
                break;
            }
            pos -= 1;
            self.counters[pos] += 1;
            if self.counters[pos] < self.grid.blocks(self.axes[pos]).len() {
                break;
            }
            self.counters[pos] = 0;
        }

        Some(tile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_cover_axis_exactly() {
        for len in 1..40 {
            for count in 1..12 {
                let bs = blocks(len, count);
                let mut next = 0;
                for b in &bs {
                    assert_eq!(b.start, next, "len={} count={}", len, count);
                    assert!(b.extent > 0);
                    assert_eq!(b.extent, b.end - b.start);
                    next = b.end;
                }
                assert_eq!(next, len);
                assert!(bs.len() <= count);
            }
        }
    }

    #[test]
    fn test_trailing_empty_blocks_are_skipped() {
        // size = ceil(4 / 3) = 2, so the third block would start at 4
        let bs = blocks(4, 3);
        assert_eq!(bs.len(), 2);
        assert_eq!(bs[1], Block { index: 1, start: 2, end: 4, extent: 2 });

        let bs = blocks(3, 5);
        assert_eq!(bs.len(), 3);
        assert!(bs.iter().all(|b| b.extent == 1));
    }

    #[test]
    fn test_blocks_of_empty_axis() {
        assert!(blocks(0, 3).is_empty());
        assert_eq!(blocks(5, 0).len(), 1);
    }

    #[test]
    fn test_tile_order_is_nested_left_to_right() {
        let grid = BlockGrid::new([4, 2, 6], [2, 1, 3]);
        let order: Vec<(usize, usize)> = grid
            .tiles(&[Axis::I, Axis::K])
            .map(|t| (t.i().unwrap().index, t.k().unwrap().index))
            .collect();
        assert_eq!(order, vec![(0, 0), (0, 1), (0, 2), (1, 0), (1, 1), (1, 2)]);

        let t = grid.tiles(&[Axis::K]).next().unwrap();
        assert!(t.i().is_none());
        assert!(t.j().is_none());

        assert_eq!(grid.all_tiles().count(), 6);
        assert_eq!(grid.tiles(&[Axis::J, Axis::K]).count(), 3);
    }

    #[test]
    fn test_tiles_with_empty_axis_yield_nothing() {
        let grid = BlockGrid::new([0, 2, 2], [1, 1, 1]);
        assert_eq!(grid.all_tiles().count(), 0);
        assert_eq!(grid.tiles(&[Axis::J]).count(), 1);
    }

    #[test]
    fn test_block_at_offsets() {
        let b = blocks(10, 4)[3];
        assert_eq!(b.start, 9);
        assert_eq!(b.at(0), Some(9));
        assert_eq!(b.at(1), None);
        assert_eq!(block_of(9, 10, 4), 3);
    }
}
