//! Animation cursor, active tiles and event log
//!
//! A cursor walks the within-block offsets of an algorithm's cursor axes,
//! outermost axis slowest. Every tile of the `ijk` block grid advances in
//! lockstep with the shared offset; a tile whose block is too short for
//! the current offset sits that step out.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::collections::VecDeque;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use mmviz_core::{Algorithm, Axis, BlockGrid, Region, Tile};

/// Events retained per node
pub const EVENT_LOG_CAPACITY: usize = 1024;

/// Offsets into the cursor axes of one algorithm
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    axes: &'static [Axis],
    extents: Vec<usize>,
    step: usize,
    len: usize,
}

impl Cursor {
    pub fn new(alg: Algorithm, blocks: &BlockGrid) -> Self {
        let axes = alg.cursor_axes();
        let extents: Vec<usize> = axes.iter().map(|a| blocks.max_extent(*a)).collect();
        let len = if axes.is_empty() { 0 } else { extents.iter().product() };
        Self { axes, extents, step: 0, len }
    }

    pub fn axes(&self) -> &'static [Axis] {
        self.axes
    }

    /// Steps in one full cycle
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn position(&self) -> usize {
        self.step
    }

    pub fn is_exhausted(&self) -> bool {
        self.step >= self.len
    }

    /// Offset per cursor axis at the current step
    pub fn offsets(&self) -> Option<Vec<usize>> {
        if self.is_exhausted() {
            return None;
        }
        let mut rest = self.step;
        let mut offsets = vec![0; self.extents.len()];
        for (slot, extent) in self.extents.iter().enumerate().rev() {
            offsets[slot] = rest % extent;
            rest /= extent;
        }
        Some(offsets)
    }

    pub fn advance(&mut self) {
        if !self.is_exhausted() {
            self.step += 1;
        }
    }

    pub fn rewind(&mut self) {
        self.step = 0;
    }
}

/// Index ranges one tile touches in one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveBox {
    pub tile: Tile,
    pub i: Range<usize>,
    pub j: Range<usize>,
    pub k: Range<usize>,
}

impl ActiveBox {
    pub fn range(&self, axis: Axis) -> Range<usize> {
        match axis {
            Axis::I => self.i.clone(),
            Axis::J => self.j.clone(),
            Axis::K => self.k.clone(),
        }
    }

    pub fn left(&self) -> Region {
        Region::new(self.i.clone(), self.j.clone())
    }

    pub fn right(&self) -> Region {
        Region::new(self.j.clone(), self.k.clone())
    }

    pub fn result(&self) -> Region {
        Region::new(self.i.clone(), self.k.clone())
    }

    /// Block of the inner dimension this box belongs to
    pub fn j_block(&self) -> usize {
        self.tile.j().map_or(0, |b| b.index)
    }

    /// Start of the inner-dimension block
    pub fn j_start(&self) -> usize {
        self.tile.j().map_or(0, |b| b.start)
    }
}

/// Boxes active at `offsets` of `axes`, in tile order
pub fn active_boxes(blocks: &BlockGrid, axes: &[Axis], offsets: &[usize]) -> Vec<ActiveBox> {
    blocks
        .all_tiles()
        .filter_map(|tile| {
            let mut ranges = [0..0, 0..0, 0..0];
            for axis in [Axis::I, Axis::J, Axis::K] {
                let block = tile.get(axis)?;
                ranges[axis.slot()] = match axes.iter().position(|a| *a == axis) {
                    Some(slot) => {
                        let x = block.at(offsets[slot])?;
                        x..x + 1
                    }
                    None => block.range(),
                };
            }
            let [i, j, k] = ranges;
            Some(ActiveBox { tile, i, j, k })
        })
        .collect()
}

/// Scheduling milestones of one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnimEvent {
    CycleStart,
    /// Result or partial-sum cells written and shown this tick
    Reveal { cells: usize },
    CycleDone,
}

/// Bounded event ring plus lifetime counters
#[derive(Debug, Clone, Default)]
pub struct AnimLog {
    events: VecDeque<(u64, AnimEvent)>,
    cycles_started: u64,
    cycles_done: u64,
    reveals: u64,
}

impl AnimLog {
    pub fn record(&mut self, tick: u64, event: AnimEvent) {
        match event {
            AnimEvent::CycleStart => self.cycles_started += 1,
            AnimEvent::CycleDone => self.cycles_done += 1,
            AnimEvent::Reveal { .. } => self.reveals += 1,
        }
        if self.events.len() == EVENT_LOG_CAPACITY {
            self.events.pop_front();
        }
        self.events.push_back((tick, event));
    }

    /// Retained `(tick, event)` pairs, oldest first
    pub fn events(&self) -> impl Iterator<Item = &(u64, AnimEvent)> + '_ {
        self.events.iter()
    }

    pub fn cycles_started(&self) -> u64 {
        self.cycles_started
    }

    pub fn cycles_done(&self) -> u64 {
        self.cycles_done
    }

    pub fn reveals(&self) -> u64 {
        self.reveals
    }
}

/// Which result cells hold final values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    w: usize,
    cells: Vec<bool>,
    rows: Vec<usize>,
    cols: Vec<usize>,
}

impl Completion {
    pub fn new(h: usize, w: usize) -> Self {
        Self {
            w,
            cells: vec![false; h * w],
            rows: vec![0; h],
            cols: vec![0; w],
        }
    }

    pub fn reset(&mut self) {
        self.cells.iter_mut().for_each(|c| *c = false);
        self.rows.iter_mut().for_each(|c| *c = 0);
        self.cols.iter_mut().for_each(|c| *c = 0);
    }

    pub fn mark(&mut self, i: usize, k: usize) {
        let idx = i * self.w + k;
        if !self.cells[idx] {
            self.cells[idx] = true;
            self.rows[i] += 1;
            self.cols[k] += 1;
        }
    }

    pub fn mark_all(&mut self) {
        let h = self.rows.len();
        self.cells.iter_mut().for_each(|c| *c = true);
        self.rows.iter_mut().for_each(|c| *c = self.w);
        self.cols.iter_mut().for_each(|c| *c = h);
    }

    pub fn row_complete(&self, i: usize) -> bool {
        self.rows.get(i).is_some_and(|n| *n == self.w)
    }

    pub fn col_complete(&self, k: usize) -> bool {
        self.cols.get(k).is_some_and(|n| *n == self.rows.len())
    }

    pub fn is_complete(&self) -> bool {
        self.cells.iter().all(|c| *c)
    }

    pub fn done_count(&self) -> usize {
        self.cells.iter().filter(|c| **c).count()
    }
}
