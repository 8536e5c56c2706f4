//! Visual cell mapping for one matrix
//!
//! A `Mat` pairs a numeric grid with a point cloud: one point per cell,
//! sized and colored from the cell's value. Cells can be hidden (size 0,
//! sentinel color) and transiently highlighted; both are undone by
//! re-deriving appearance from data, never by arithmetic on the current
//! color.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::cell::{Ref, RefCell};
use std::ops::Deref;
use std::rc::Rc;

use glam::{Affine3A, Vec3};
use log::debug;

use mmviz_core::config::{DecoConfig, VizConfig};
use mmviz_core::data_structures::blocks::block_of;
use mmviz_core::{Epilog, GridError, NumericGrid, Region};

use super::deco::Decorations;
use super::mapping::{self, GlobalRange, ValueRange};
use crate::engine::platform::{Color, GroupHandle, PointsHandle, Renderer};

/// Highlight added to active operand cells
pub const BUMP_AMOUNT: f32 = 0.25;

/// Display coordinate of each index along an axis of `len` split into
/// `count` blocks, with `gap` extra units between blocks
pub fn axis_coords(len: usize, count: usize, gap: f32) -> Vec<f32> {
    (0..len)
        .map(|x| x as f32 + block_of(x, len, count) as f32 * gap)
        .collect()
}

/// Local position of every row and column
///
/// Cell `(i, j)` sits at `(cols[j], -rows[i], 0)`.
#[derive(Debug, Clone, PartialEq)]
pub struct CellGeometry {
    pub rows: Vec<f32>,
    pub cols: Vec<f32>,
}

impl CellGeometry {
    pub fn new(rows: Vec<f32>, cols: Vec<f32>) -> Self {
        Self { rows, cols }
    }

    /// Geometry for an `h x w` grid with block gaps
    pub fn blocked(h: usize, w: usize, row_blocks: usize, col_blocks: usize, gap: f32) -> Self {
        Self {
            rows: axis_coords(h, row_blocks, gap),
            cols: axis_coords(w, col_blocks, gap),
        }
    }

    #[inline]
    pub fn position(&self, i: usize, j: usize) -> Vec3 {
        Vec3::new(self.cols[j], -self.rows[i], 0.0)
    }

    /// Corner above the first cell
    pub fn top_left(&self) -> Vec3 {
        let x = self.cols.first().copied().unwrap_or(0.0);
        let y = self.rows.first().copied().unwrap_or(0.0);
        Vec3::new(x - 0.5, 0.5 - y, 0.0)
    }

    pub fn width(&self) -> f32 {
        match (self.cols.first(), self.cols.last()) {
            (Some(first), Some(last)) => last - first + 1.0,
            _ => 0.0,
        }
    }
}

/// Backing storage: owned, or shared with another mat
#[derive(Debug)]
pub enum GridSource {
    Owned(NumericGrid),
    Shared(Rc<RefCell<NumericGrid>>),
}

impl GridSource {
    pub fn get(&self) -> GridRef<'_> {
        match self {
            GridSource::Owned(grid) => GridRef::Owned(grid),
            GridSource::Shared(cell) => GridRef::Shared(cell.borrow()),
        }
    }

    fn with_mut<T>(&mut self, f: impl FnOnce(&mut NumericGrid) -> T) -> T {
        match self {
            GridSource::Owned(grid) => f(grid),
            GridSource::Shared(cell) => f(&mut cell.borrow_mut()),
        }
    }
}

impl From<NumericGrid> for GridSource {
    fn from(grid: NumericGrid) -> Self {
        GridSource::Owned(grid)
    }
}

impl From<Rc<RefCell<NumericGrid>>> for GridSource {
    fn from(cell: Rc<RefCell<NumericGrid>>) -> Self {
        GridSource::Shared(cell)
    }
}

/// Read guard over either storage kind
pub enum GridRef<'a> {
    Owned(&'a NumericGrid),
    Shared(Ref<'a, NumericGrid>),
}

impl Deref for GridRef<'_> {
    type Target = NumericGrid;

    fn deref(&self) -> &NumericGrid {
        match self {
            GridRef::Owned(grid) => grid,
            GridRef::Shared(guard) => guard,
        }
    }
}

/// Point-cloud view of one numeric grid
#[derive(Debug)]
pub struct Mat {
    name: String,
    source: GridSource,
    geometry: CellGeometry,
    viz: VizConfig,
    deco: DecoConfig,
    global: GlobalRange,
    group: GroupHandle,
    points: PointsHandle,
    colors: Vec<Color>,
    /// Grid revision and range the visible cells were last painted against
    painted: (u64, ValueRange),
    world: Affine3A,
    decorations: Decorations,
}

impl Mat {
    /// Builds the point cloud with every cell visible
    ///
    /// # Panics
    /// If `geometry` does not match the grid shape.
    pub fn new(
        r: &mut dyn Renderer,
        name: impl Into<String>,
        source: impl Into<GridSource>,
        geometry: CellGeometry,
        viz: &VizConfig,
        deco: &DecoConfig,
        global: &GlobalRange,
    ) -> Self {
        let source = source.into();
        let (h, w) = source.get().shape();
        assert!(
            geometry.rows.len() == h && geometry.cols.len() == w,
            "geometry {}x{} does not fit a {}x{} grid",
            geometry.rows.len(),
            geometry.cols.len(),
            h,
            w
        );

        let (revision, range) = {
            let grid = source.get();
            (grid.revision(), mapping::range_for(&grid, viz.sensitivity, global))
        };
        let mut positions = Vec::with_capacity(h * w);
        let mut sizes = Vec::with_capacity(h * w);
        let mut colors = Vec::with_capacity(h * w);
        {
            let grid = source.get();
            for i in 0..h {
                for j in 0..w {
                    let x = grid.get(i, j);
                    positions.push(geometry.position(i, j));
                    sizes.push(mapping::size_from_data(x, range, viz));
                    colors.push(mapping::color_from_data(x, range, viz));
                }
            }
        }

        let group = r.create_group();
        let points = r.create_point_cloud(&positions, &sizes, &colors);
        r.add_to_group(group, points.into());

        Self {
            name: name.into(),
            source,
            geometry,
            viz: viz.clone(),
            deco: deco.clone(),
            global: global.clone(),
            group,
            points,
            colors,
            painted: (revision, range),
            world: Affine3A::IDENTITY,
            decorations: Decorations::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn height(&self) -> usize {
        self.geometry.rows.len()
    }

    pub fn width(&self) -> usize {
        self.geometry.cols.len()
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.height(), self.width())
    }

    pub fn grid(&self) -> GridRef<'_> {
        self.source.get()
    }

    pub fn geometry(&self) -> &CellGeometry {
        &self.geometry
    }

    pub fn group(&self) -> GroupHandle {
        self.group
    }

    pub fn points(&self) -> PointsHandle {
        self.points
    }

    pub fn world(&self) -> Affine3A {
        self.world
    }

    pub fn viz(&self) -> &VizConfig {
        &self.viz
    }

    pub fn decorations(&self) -> &Decorations {
        &self.decorations
    }

    /// Hands out a shared handle to the grid, converting owned storage
    ///
    /// Another mat built from the handle sees every write made here.
    pub fn share_grid(&mut self) -> Rc<RefCell<NumericGrid>> {
        let placeholder = GridSource::Owned(NumericGrid::zeros(0, 0));
        let cell = match std::mem::replace(&mut self.source, placeholder) {
            GridSource::Owned(grid) => Rc::new(RefCell::new(grid)),
            GridSource::Shared(cell) => cell,
        };
        self.source = GridSource::Shared(Rc::clone(&cell));
        cell
    }

    /// Whether the grid is shared with another mat
    pub fn is_shared(&self) -> bool {
        matches!(self.source, GridSource::Shared(_))
    }

    /// Range used for size and color under the current sensitivity
    pub fn range(&self) -> ValueRange {
        mapping::range_for(&self.source.get(), self.viz.sensitivity, &self.global)
    }

    pub fn size_from_data(&self, x: f32) -> f32 {
        mapping::size_from_data(x, self.range(), &self.viz)
    }

    pub fn color_from_data(&self, x: f32) -> Color {
        mapping::color_from_data(x, self.range(), &self.viz)
    }

    #[inline]
    fn index(&self, i: usize, j: usize) -> usize {
        i * self.width() + j
    }

    fn region(&self, region: Option<Region>) -> Region {
        match region {
            Some(region) => region.clamp(self.height(), self.width()),
            None => Region::all(self.height(), self.width()),
        }
    }

    fn paint(&mut self, r: &mut dyn Renderer, i: usize, j: usize, range: ValueRange) {
        let x = self.source.get().get(i, j);
        let idx = self.index(i, j);
        let color = mapping::color_from_data(x, range, &self.viz);
        self.colors[idx] = color;
        r.set_point_size(self.points, idx, mapping::size_from_data(x, range, &self.viz));
        r.set_point_color(self.points, idx, color);
    }

    /// Whether visible cells reflect the grid's current values and range
    pub fn is_current(&self) -> bool {
        let grid = self.source.get();
        let range = mapping::range_for(&grid, self.viz.sensitivity, &self.global);
        self.painted == (grid.revision(), range)
    }

    fn repaint_visible(&mut self, r: &mut dyn Renderer) {
        let range = self.range();
        for (i, j) in Region::all(self.height(), self.width()).cells() {
            if !self.is_hidden(i, j) {
                self.paint(r, i, j, range);
            }
        }
        self.painted = (self.source.get().revision(), range);
    }

    /// Repaints visible cells once if the grid was written or its range
    /// moved since the last full paint
    ///
    /// Returns whether anything was repainted. Writes through a shared grid
    /// from another mat are picked up here.
    pub fn sync(&mut self, r: &mut dyn Renderer) -> bool {
        if self.is_current() {
            return false;
        }
        self.repaint_visible(r);
        true
    }

    /// Shows cells in `region` (default: all) with data-derived appearance
    pub fn show(&mut self, r: &mut dyn Renderer, region: Option<Region>) {
        let range = self.range();
        let whole = region.is_none();
        for (i, j) in self.region(region).cells() {
            self.paint(r, i, j, range);
        }
        if whole {
            self.painted = (self.source.get().revision(), range);
        }
    }

    /// Hides cells in `region` (default: all)
    pub fn hide(&mut self, r: &mut dyn Renderer, region: Option<Region>) {
        for (i, j) in self.region(region).cells() {
            let idx = self.index(i, j);
            self.colors[idx] = Color::HIDDEN;
            r.set_point_size(self.points, idx, 0.0);
            r.set_point_color(self.points, idx, Color::HIDDEN);
        }
    }

    pub fn is_hidden(&self, i: usize, j: usize) -> bool {
        assert!(i < self.height() && j < self.width(), "cell ({}, {}) out of bounds", i, j);
        self.colors[self.index(i, j)] == Color::HIDDEN
    }

    /// Number of hidden cells
    pub fn hidden_count(&self) -> usize {
        self.colors.iter().filter(|c| **c == Color::HIDDEN).count()
    }

    /// Re-derives appearance of visible cells in `region`
    ///
    /// Clears any highlight left by [`Mat::bump_color`]. A stale mat is
    /// repainted whole.
    pub fn refresh(&mut self, r: &mut dyn Renderer, region: Option<Region>) {
        if region.is_none() || !self.is_current() {
            self.repaint_visible(r);
            return;
        }
        let range = self.range();
        for (i, j) in self.region(region).cells() {
            if !self.is_hidden(i, j) {
                self.paint(r, i, j, range);
            }
        }
    }

    /// Lightens visible cells in `region`
    pub fn bump_color(&mut self, r: &mut dyn Renderer, region: Option<Region>, amount: f32) {
        for (i, j) in self.region(region).cells() {
            let idx = self.index(i, j);
            if self.colors[idx] == Color::HIDDEN {
                continue;
            }
            let color = self.colors[idx].lighten(amount);
            self.colors[idx] = color;
            r.set_point_color(self.points, idx, color);
        }
    }

    pub fn color_at(&self, i: usize, j: usize) -> Color {
        self.colors[self.index(i, j)]
    }

    /// Writes one value and repaints its cell
    ///
    /// A hidden cell stays hidden. If the value range moved, nothing is
    /// repainted here; the next [`Mat::sync`] repaints every visible cell
    /// once.
    pub fn set(&mut self, r: &mut dyn Renderer, i: usize, j: usize, x: f32) {
        let current = self.is_current();
        self.source.with_mut(|grid| grid.set(i, j, x));
        let range = self.range();
        if !current || range != self.painted.1 {
            return;
        }
        if !self.is_hidden(i, j) {
            self.paint(r, i, j, range);
        }
        self.painted.0 = self.source.get().revision();
    }

    /// Rewrites `region` through `f` then applies `epilog` grid-wide
    ///
    /// Returns the number of non-finite epilog outputs shown as 0.
    pub fn reinit<F>(
        &mut self,
        r: &mut dyn Renderer,
        region: Option<Region>,
        f: F,
        epilog: Option<(Epilog, usize)>,
    ) -> Result<usize, GridError>
    where
        F: FnMut(usize, usize, usize, usize) -> f32,
    {
        let outcome = self.source.with_mut(|grid| grid.reinit(region, f, epilog));
        self.refresh(r, None);
        outcome
    }

    /// Sets the local transform and records the resulting world transform
    pub fn place(&mut self, r: &mut dyn Renderer, local: Affine3A, parent_world: Affine3A) {
        r.set_transform(self.group.into(), local);
        self.world = parent_world * local;
    }

    /// Brings legend and row guides in line with settings and camera
    ///
    /// Returns whether the legend was laid out again.
    pub fn sync_deco(&mut self, r: &mut dyn Renderer) -> bool {
        self.decorations.sync_row_guides(
            r,
            self.group,
            self.deco.row_guides,
            &self.geometry.rows,
            &self.geometry.cols,
        );
        let top_left = self.geometry.top_left();
        let width = self.geometry.width();
        self.decorations.sync_legend(
            r,
            self.group,
            &self.name,
            self.deco.legend_size,
            self.deco.legends,
            &self.world,
            top_left,
            width,
        )
    }

    /// Labels cells under the pick ray with their values
    pub fn spotlight(&mut self, r: &mut dyn Renderer) {
        let threshold = self.deco.spotlight;
        let size = self.deco.legend_size * 0.5;
        let grid = self.source.get();
        let w = self.geometry.cols.len();
        let colors = &self.colors;
        let geometry = &self.geometry;
        self.decorations.spotlight(r, self.group, self.points, threshold, size, |idx| {
            if colors.get(idx).map_or(true, |c| *c == Color::HIDDEN) {
                return None;
            }
            let (i, j) = (idx / w, idx % w);
            Some((format!("{:.3}", grid.get(i, j)), geometry.position(i, j)))
        });
    }

    /// Swaps in new color and decoration settings, keeping data
    pub fn restyle(&mut self, r: &mut dyn Renderer, viz: &VizConfig, deco: &DecoConfig) {
        self.viz = viz.clone();
        self.deco = deco.clone();
        self.refresh(r, None);
        self.decorations.dispose(r);
        self.sync_deco(r);
    }

    pub fn dispose(&mut self, r: &mut dyn Renderer) {
        debug!("disposing mat {}", self.name);
        self.decorations.dispose(r);
        r.dispose(self.group.into());
    }
}
