//! Recursive matmul node and its animation state machine
//!
//! A node shows `left @ right = result`, where each operand is a leaf mat
//! or another node. Each cycle hides the result, sweeps the blocked index
//! space one cursor step per tick revealing partial sums, then reinitializes
//! the result to the exact product with the full epilog. Nested nodes are
//! ticked before their parent in the same tick, either fused with the
//! parent's steps or run to completion first, as planned by
//! [`super::join`].
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::cell::RefCell;
use std::ops::Range;
use std::rc::Rc;

use glam::Affine3A;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use mmviz_core::algorithm::{derive_seed, kernel, leaf_grid, Family, Flow, Side};
use mmviz_core::config::{AnimConfig, DecoConfig, LayoutConfig, LeafConfig, VizConfig};
use mmviz_core::{Algorithm, Axis, BlockGrid, Diagnostics, Epilog, FuseMode, MatMulConfig, NodeConfig, NumericGrid, Region};

use super::anim::{active_boxes, ActiveBox, AnimEvent, AnimLog, Completion, Cursor};
use super::join::{alg_join, plan_side, ChildSummary, Join, Plan};
use super::layout::{nest, AxisCoords, NodeLayout};
use crate::engine::platform::{Color, GroupHandle, LinesHandle, Renderer};
use crate::view::mapping::GlobalRange;
use crate::view::mat::{CellGeometry, Mat, BUMP_AMOUNT};

/// Outcome of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TickStatus {
    Running,
    /// A cycle finished this tick, or there is nothing to animate
    Done,
}

/// Lifecycle of a node's animation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Nothing to animate; the result is shown fully computed
    Idle,
    Running,
    /// Cycle complete; a child waits here for its parent to restart it
    Done,
}

/// Shared handles passed down the tree at construction
#[derive(Debug, Clone, Default)]
pub struct NodeContext {
    pub diagnostics: Diagnostics,
    pub global: GlobalRange,
    pub seed: u64,
}

/// Either kind of operand
#[derive(Debug)]
pub enum Operand {
    Leaf(Mat),
    Node(Box<MatMulNode>),
}

impl Operand {
    /// Mat holding the operand's values
    pub fn mat(&self) -> &Mat {
        match self {
            Operand::Leaf(mat) => mat,
            Operand::Node(node) => node.result(),
        }
    }

    fn mat_mut(&mut self) -> &mut Mat {
        match self {
            Operand::Leaf(mat) => mat,
            Operand::Node(node) => &mut node.result,
        }
    }

    pub fn node(&self) -> Option<&MatMulNode> {
        match self {
            Operand::Leaf(_) => None,
            Operand::Node(node) => Some(node),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Operand::Leaf(_))
    }

    pub fn shape(&self) -> (usize, usize) {
        self.mat().shape()
    }

    fn matmul_count(&self) -> usize {
        self.node().map_or(0, |n| n.matmul_count)
    }

    fn summary(&self) -> Option<ChildSummary> {
        self.node().map(|n| ChildSummary {
            alg: n.anim.alg,
            epilog: n.epilog,
            animated: n.animated,
            join: n.join,
        })
    }

    fn row_complete(&self, i: usize) -> bool {
        self.node().map_or(true, |n| n.completion.row_complete(i))
    }

    fn col_complete(&self, j: usize) -> bool {
        self.node().map_or(true, |n| n.completion.col_complete(j))
    }

    fn is_complete(&self) -> bool {
        self.node().map_or(true, |n| n.completion.is_complete())
    }

    fn bump(&mut self, r: &mut dyn Renderer) -> TickStatus {
        match self {
            Operand::Leaf(_) => TickStatus::Done,
            Operand::Node(node) => node.advance(r),
        }
    }

    fn start_cycle(&mut self, r: &mut dyn Renderer) {
        if let Operand::Node(node) = self {
            node.start_cycle(r);
        }
    }

    fn group(&self) -> GroupHandle {
        match self {
            Operand::Leaf(mat) => mat.group(),
            Operand::Node(node) => node.group,
        }
    }

    fn place(&mut self, r: &mut dyn Renderer, slot: Affine3A, parent_world: Affine3A) {
        match self {
            Operand::Leaf(mat) => mat.place(r, slot, parent_world),
            Operand::Node(node) => {
                let local = nest(slot, node.layout.result);
                node.place(r, local, parent_world);
            }
        }
    }

    fn absmax(&self) -> f32 {
        match self {
            Operand::Leaf(mat) => mat.grid().absmax(),
            Operand::Node(node) => node.tree_absmax(),
        }
    }

    fn sync_deco(&mut self, r: &mut dyn Renderer) {
        match self {
            Operand::Leaf(mat) => {
                mat.sync_deco(r);
                mat.spotlight(r);
            }
            Operand::Node(node) => node.sync_deco(r),
        }
    }

    fn restyle(&mut self, r: &mut dyn Renderer, viz: &VizConfig, deco: &DecoConfig) {
        match self {
            Operand::Leaf(mat) => mat.restyle(r, viz, deco),
            Operand::Node(node) => node.restyle(r, viz, deco),
        }
    }

    fn dispose(&mut self, r: &mut dyn Renderer) {
        match self {
            Operand::Leaf(mat) => mat.dispose(r),
            Operand::Node(node) => node.dispose(r),
        }
    }
}

#[inline]
fn slot(side: Side) -> usize {
    match side {
        Side::Left => 0,
        Side::Right => 1,
    }
}

fn label(side: Side) -> &'static str {
    match side {
        Side::Left => "left",
        Side::Right => "right",
    }
}

/// `(consumer node path, side, source name)` for a sharing leaf
type ShareLink = (String, Side, String);

/// `left @ right = result`, with animation state
#[derive(Debug)]
pub struct MatMulNode {
    path: String,
    name: String,
    depth: usize,
    epilog: Epilog,
    anim: AnimConfig,
    layout_cfg: LayoutConfig,
    viz: VizConfig,
    deco: DecoConfig,

    left: Operand,
    right: Operand,
    result: Mat,
    h: usize,
    d: usize,
    w: usize,
    blocks: BlockGrid,
    layout: NodeLayout,
    group: GroupHandle,
    world: Affine3A,

    matmul_count: usize,
    animated: bool,
    join: Join,
    plans: [Plan; 2],
    shared_from: [Option<String>; 2],
    diagnostics: Diagnostics,
    global: GlobalRange,
    flow: Option<LinesHandle>,

    phase: Phase,
    cursor: Cursor,
    child_done: [bool; 2],
    completion: Completion,
    layers: Vec<Mat>,
    intermediates: Vec<Mat>,
    last_active: Vec<ActiveBox>,
    ticks: u64,
    log: AnimLog,
}

impl MatMulNode {
    /// Builds the root of a node tree and places it at the origin
    ///
    /// Never fails: configuration problems are reported to
    /// `ctx.diagnostics` and the tree is built with best-effort shapes.
    /// Leaves naming a source in `shares` are linked to its grid last.
    pub fn build(r: &mut dyn Renderer, cfg: &MatMulConfig, ctx: &NodeContext) -> Self {
        let mut node = Self::build_at(r, cfg, ctx, "root", 0);
        node.place(r, Affine3A::IDENTITY, Affine3A::IDENTITY);
        node.link_shared(r);
        node
    }

    fn build_at(r: &mut dyn Renderer, cfg: &MatMulConfig, ctx: &NodeContext, path: &str, depth: usize) -> Self {
        let diagnostics = ctx.diagnostics.clone();
        cfg.anim.validate(path, &diagnostics);
        let counts = cfg.anim.block_counts();
        let gap = cfg.viz.block_gap;

        let left = Self::operand(r, &cfg.left, cfg, ctx, path, depth, Side::Left);
        let right = Self::operand(r, &cfg.right, cfg, ctx, path, depth, Side::Right);

        let (h, dl) = left.shape();
        let (dr, w) = right.shape();
        if dl != dr {
            diagnostics.warn(
                path,
                format!(
                    "inner dimensions disagree: left is {}x{}, right is {}x{}; using {}",
                    h,
                    dl,
                    dr,
                    w,
                    dl.min(dr)
                ),
            );
        }
        let d = dl.min(dr);

        let name = cfg.name.clone().unwrap_or_else(|| {
            let label = |op: &Operand| match op {
                Operand::Leaf(mat) => mat.name().to_owned(),
                Operand::Node(node) => format!("({})", node.name),
            };
            format!("{} @ {}", label(&left), label(&right))
        });

        let blocks = BlockGrid::new([h, d, w], counts);
        let coords = AxisCoords::new([h, d, w], counts, gap);
        let matmul_count = 1 + left.matmul_count() + right.matmul_count();
        let layout_cfg = cfg.layout.at_depth(depth);
        let layout = NodeLayout::new(coords, &layout_cfg, layout_cfg.spread(matmul_count));

        let result_geometry = layout.coords.geometry(Axis::I, 0..h, Axis::K, 0..w);
        let result = Mat::new(r, name.clone(), NumericGrid::zeros(h, w), result_geometry, &cfg.viz, &cfg.deco, &ctx.global);

        let group = r.create_group();
        for child in [left.group(), right.group(), result.group()] {
            r.add_to_group(group, child.into());
        }

        let (left_summary, right_summary) = (left.summary(), right.summary());
        let animated = cfg.anim.alg.is_animated()
            || left_summary.is_some_and(|s| s.animated)
            || right_summary.is_some_and(|s| s.animated);
        let join = alg_join(cfg.anim.alg, &[(Side::Left, left_summary), (Side::Right, right_summary)]);
        let plans = [
            plan_side(cfg.anim.alg, cfg.anim.fuse, Side::Left, left_summary.as_ref()),
            plan_side(cfg.anim.alg, cfg.anim.fuse, Side::Right, right_summary.as_ref()),
        ];
        let shares = |operand: &NodeConfig| match operand {
            NodeConfig::Leaf(leaf) => leaf.shares.clone(),
            NodeConfig::MatMul(_) => None,
        };
        debug!(
            "{}: built {}x{}x{} {} ({}), join {:?}, plans {:?}",
            path, h, d, w, cfg.anim.alg, cfg.anim.fuse, join, plans
        );

        Self {
            path: path.to_owned(),
            name,
            depth,
            epilog: cfg.epilog,
            anim: cfg.anim.clone(),
            layout_cfg,
            viz: cfg.viz.clone(),
            deco: cfg.deco.clone(),
            left,
            right,
            result,
            h,
            d,
            w,
            cursor: Cursor::new(cfg.anim.alg, &blocks),
            blocks,
            layout,
            group,
            world: Affine3A::IDENTITY,
            matmul_count,
            animated,
            join,
            plans,
            shared_from: [shares(&cfg.left), shares(&cfg.right)],
            diagnostics,
            global: ctx.global.clone(),
            flow: None,
            phase: Phase::Idle,
            child_done: [true; 2],
            completion: Completion::new(h, w),
            layers: Vec::new(),
            intermediates: Vec::new(),
            last_active: Vec::new(),
            ticks: 0,
            log: AnimLog::default(),
        }
    }

    fn operand(
        r: &mut dyn Renderer,
        cfg: &NodeConfig,
        parent: &MatMulConfig,
        ctx: &NodeContext,
        path: &str,
        depth: usize,
        side: Side,
    ) -> Operand {
        let fallback = match side {
            Side::Left => "L",
            Side::Right => "R",
        };
        let path = format!("{}.{}", path, label(side));
        match cfg {
            NodeConfig::MatMul(mm) => Operand::Node(Box::new(Self::build_at(r, mm, ctx, &path, depth + 1))),
            NodeConfig::Leaf(leaf) => {
                let [ib, jb, kb] = parent.anim.block_counts();
                let (row_blocks, col_blocks) = match side {
                    Side::Left => (ib, jb),
                    Side::Right => (jb, kb),
                };
                let grid = Self::leaf_values(leaf, ctx, &path);
                let geometry = CellGeometry::blocked(leaf.h, leaf.w, row_blocks, col_blocks, parent.viz.block_gap);
                let name = leaf.name.clone().unwrap_or_else(|| fallback.to_owned());
                Operand::Leaf(Mat::new(r, name, grid, geometry, &parent.viz, &parent.deco, &ctx.global))
            }
        }
    }

    fn leaf_values(leaf: &LeafConfig, ctx: &NodeContext, path: &str) -> NumericGrid {
        leaf.validate(path, &ctx.diagnostics);
        match leaf_grid(leaf, derive_seed(ctx.seed, path)) {
            Ok(grid) => grid,
            Err(e) => {
                ctx.diagnostics.warn(path, format!("{}; using zeros", e));
                NumericGrid::zeros(leaf.h, leaf.w)
            }
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_root(&self) -> bool {
        self.depth == 0
    }

    /// `(h, d, w)` with `d` the inner dimension in use
    pub fn dims(&self) -> (usize, usize, usize) {
        (self.h, self.d, self.w)
    }

    pub fn left(&self) -> &Operand {
        &self.left
    }

    pub fn right(&self) -> &Operand {
        &self.right
    }

    pub fn operand_at(&self, side: Side) -> &Operand {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    fn operand_mut(&mut self, side: Side) -> &mut Operand {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }

    pub fn result(&self) -> &Mat {
        &self.result
    }

    pub fn blocks(&self) -> &BlockGrid {
        &self.blocks
    }

    pub fn layout(&self) -> &NodeLayout {
        &self.layout
    }

    pub fn layout_config(&self) -> &LayoutConfig {
        &self.layout_cfg
    }

    pub fn algorithm(&self) -> Algorithm {
        self.anim.alg
    }

    pub fn epilog(&self) -> Epilog {
        self.epilog
    }

    /// Effective algorithm of this subtree, or `Mixed`
    pub fn alg_join(&self) -> Join {
        self.join
    }

    pub fn plan(&self, side: Side) -> Plan {
        self.plans[slot(side)]
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Nothing in this subtree animates
    pub fn is_static(&self) -> bool {
        !self.animated
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn completion(&self) -> &Completion {
        &self.completion
    }

    pub fn layers(&self) -> &[Mat] {
        &self.layers
    }

    pub fn intermediates(&self) -> &[Mat] {
        &self.intermediates
    }

    pub fn log(&self) -> &AnimLog {
        &self.log
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn matmul_count(&self) -> usize {
        self.matmul_count
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// `Σ left[i][j] * right[j][k]` over `j_range`, clamped to the inner
    /// dimension
    ///
    /// The elementwise stage of the epilog is applied when the range covers
    /// the whole inner dimension. A non-finite value is reported and shown
    /// as 0.
    pub fn dotprod_val(&self, i: usize, k: usize, j_range: Range<usize>) -> f32 {
        let range = j_range.start.min(self.d)..j_range.end.min(self.d);
        let full = range.start == 0 && range.end == self.d;
        let sum = {
            let left = self.left.mat().grid();
            let right = self.right.mat().grid();
            kernel::partial_dot(&left, &right, i, k, range)
        };
        let x = if full { self.epilog.scalar(sum, self.d) } else { sum };
        if x.is_finite() {
            x
        } else {
            self.diagnostics
                .warn(&self.path, format!("non-finite dot product at ({}, {}), showing 0", i, k));
            0.0
        }
    }

    /// Full dot product with epilog scalar
    pub fn dotprod(&self, i: usize, k: usize) -> f32 {
        self.dotprod_val(i, k, 0..self.d)
    }

    /// Exact product of the operands over the inner dimension in use
    fn exact_product(&self) -> NumericGrid {
        let left = self.left.mat().grid();
        let right = self.right.mat().grid();
        if left.width() == right.height() {
            match kernel::matmul(&left, &right) {
                Ok(product) => return product,
                Err(e) => self.diagnostics.warn(&self.path, e.to_string()),
            }
        }
        let (h, w, d) = (self.h, self.w, self.d);
        let data: Vec<f32> = (0..h)
            .flat_map(|i| (0..w).map(move |k| (i, k)))
            .map(|(i, k)| kernel::partial_dot(&left, &right, i, k, 0..d))
            .collect();
        NumericGrid::from_vec(h, w, data).unwrap_or_else(|_| NumericGrid::zeros(h, w))
    }

    /// Reinitializes the result to the exact product and shows all of it
    fn finalize(&mut self, r: &mut dyn Renderer) {
        let product = self.exact_product();
        let bad = product.as_slice().iter().filter(|x| !x.is_finite()).count();
        if bad > 0 {
            self.diagnostics
                .warn(&self.path, format!("{} non-finite result cells, showing 0", bad));
        }
        let outcome = self.result.reinit(
            r,
            None,
            |i, k, _, _| {
                let x = product.get(i, k);
                if x.is_finite() {
                    x
                } else {
                    0.0
                }
            },
            Some((self.epilog, self.d)),
        );
        match outcome {
            Ok(0) => {}
            Ok(zeroed) => self.diagnostics.warn(
                &self.path,
                format!("epilog {} produced {} non-finite cells, showing 0", self.epilog, zeroed),
            ),
            Err(e) => self.diagnostics.warn(&self.path, e.to_string()),
        }
        self.result.show(r, None);
        self.completion.mark_all();
    }

    /// Largest magnitude across every grid in the subtree
    pub fn tree_absmax(&self) -> f32 {
        self.left
            .absmax()
            .max(self.right.absmax())
            .max(self.result.grid().absmax())
    }

    fn publish_global(&self) {
        if self.is_root() {
            self.global.publish(self.tree_absmax());
        }
    }

    /// Positions this node under its parent and re-places its children
    pub fn place(&mut self, r: &mut dyn Renderer, local: Affine3A, parent_world: Affine3A) {
        r.set_transform(self.group.into(), local);
        self.world = parent_world * local;
        let world = self.world;
        self.left.place(r, self.layout.left, world);
        self.right.place(r, self.layout.right, world);
        self.result.place(r, self.layout.result, world);
    }

    pub fn group(&self) -> GroupHandle {
        self.group
    }

    /// Starts a fresh cycle over the whole subtree
    pub fn init_animation(&mut self, r: &mut dyn Renderer) {
        self.start_cycle(r);
        if self.is_root() {
            self.sync_views(r);
        }
    }

    fn start_cycle(&mut self, r: &mut dyn Renderer) {
        self.left.start_cycle(r);
        self.right.start_cycle(r);
        self.clear_transients(r);
        self.cursor.rewind();
        self.child_done = [self.plans[0] == Plan::Idle, self.plans[1] == Plan::Idle];

        if !self.animated {
            self.finalize(r);
            self.publish_global();
            self.phase = Phase::Idle;
            return;
        }

        self.completion.reset();
        self.result.hide(r, None);
        if self.anim.alg.is_animated() && self.blocks.blocks(Axis::J).len() > 1 {
            self.create_layers(r);
        }
        if self.anim.hide_inputs {
            for side in Side::BOTH {
                if let Operand::Leaf(mat) = self.operand_mut(side) {
                    mat.hide(r, None);
                }
            }
        }
        self.publish_global();
        self.phase = Phase::Running;
        self.log.record(self.ticks, AnimEvent::CycleStart);
        debug!("{}: cycle start, {} steps", self.path, self.cursor.len());
    }

    fn create_layers(&mut self, r: &mut dyn Renderer) {
        let j_blocks: Vec<_> = self.blocks.blocks(Axis::J).to_vec();
        for block in j_blocks {
            let geometry = self.layout.coords.geometry(Axis::I, 0..self.h, Axis::K, 0..self.w);
            let mut layer = Mat::new(
                r,
                format!("{} [j {}..{}]", self.name, block.start, block.end),
                NumericGrid::zeros(self.h, self.w),
                geometry,
                &self.viz,
                &DecoConfig { legends: false, ..self.deco.clone() },
                &self.global,
            );
            layer.hide(r, None);
            r.add_to_group(self.group, layer.group().into());
            layer.place(r, self.layout.depth_slice(block.end - 1, 0.5), self.world);
            self.layers.push(layer);
        }
    }

    /// Advances the tree by one tick, then repaints stale views once
    pub fn bump(&mut self, r: &mut dyn Renderer) -> TickStatus {
        let status = self.advance(r);
        if self.is_root() {
            self.sync_views(r);
        }
        status
    }

    /// Advances this subtree by one tick
    ///
    /// Children tick first. A sequential child consumes the whole tick;
    /// fused children tick and then the node takes its own step when its
    /// reads are ready. A finished root restarts and steps in the same
    /// tick.
    fn advance(&mut self, r: &mut dyn Renderer) -> TickStatus {
        self.ticks += 1;
        match self.phase {
            Phase::Idle => return TickStatus::Done,
            Phase::Done if !self.is_root() => return TickStatus::Done,
            Phase::Done => {
                info!("{}: restarting animation", self.path);
                self.start_cycle(r);
            }
            Phase::Running => {}
        }

        for side in Side::BOTH {
            let s = slot(side);
            if self.plans[s] == Plan::Sequential && !self.child_done[s] {
                if self.operand_mut(side).bump(r) == TickStatus::Done {
                    debug!("{}: {:?} child finished", self.path, side);
                    self.child_done[s] = true;
                }
                return TickStatus::Running;
            }
        }

        for side in Side::BOTH {
            let s = slot(side);
            if self.plans[s] == Plan::Fused && !self.child_done[s] && self.operand_mut(side).bump(r) == TickStatus::Done {
                self.child_done[s] = true;
            }
        }

        if !self.cursor.is_exhausted() {
            if self.may_step() {
                self.step(r);
            } else {
                debug!("{}: waiting on children at step {}", self.path, self.cursor.position());
            }
        }

        if self.cursor.is_exhausted() && self.child_done.iter().all(|done| *done) {
            self.finish_cycle(r);
            return TickStatus::Done;
        }
        TickStatus::Running
    }

    /// Whether the next step reads only completed cells of synced children
    fn may_step(&self) -> bool {
        if self.anim.fuse != FuseMode::Sync {
            return true;
        }
        let Some(offsets) = self.cursor.offsets() else {
            return false;
        };
        let boxes = active_boxes(&self.blocks, self.cursor.axes(), &offsets);
        for side in Side::BOTH {
            let s = slot(side);
            if self.plans[s] != Plan::Fused || self.child_done[s] {
                continue;
            }
            let operand = self.operand_at(side);
            let flow = self.anim.alg.consumes(side);
            for b in &boxes {
                let region = match side {
                    Side::Left => b.left(),
                    Side::Right => b.right(),
                };
                let ready = match flow {
                    Flow::Rows => region.rows.clone().all(|x| operand.row_complete(x)),
                    Flow::Cols => region.cols.clone().all(|x| operand.col_complete(x)),
                    Flow::Whole => operand.is_complete(),
                };
                if !ready {
                    return false;
                }
            }
        }
        true
    }

    fn step(&mut self, r: &mut dyn Renderer) {
        let Some(offsets) = self.cursor.offsets() else { return };
        let boxes = active_boxes(&self.blocks, self.cursor.axes(), &offsets);

        self.clear_highlights(r);
        self.dispose_intermediates(r);

        let layered = !self.layers.is_empty();
        let streaming_j = self.cursor.axes().contains(&Axis::J);
        let mut partials = Vec::new();
        let mut finals = Vec::new();
        for b in &boxes {
            let range = b.j_start()..b.j.end;
            for (i, k) in b.result().cells() {
                partials.push((b.j_block(), i, k, self.dotprod_val(i, k, range.clone())));
                if layered && !streaming_j && b.j_block() == 0 {
                    finals.push((i, k, self.dotprod(i, k)));
                }
            }
        }

        let revealed = partials.len();
        for (jb, i, k, x) in partials {
            let target = if layered { &mut self.layers[jb] } else { &mut self.result };
            target.set(r, i, k, x);
            target.show(r, Some(Region::cell(i, k)));
            if !layered && !streaming_j {
                self.completion.mark(i, k);
            }
        }
        for (i, k, x) in finals {
            self.result.set(r, i, k, x);
            self.completion.mark(i, k);
        }

        for b in &boxes {
            self.create_intermediate(r, b);
        }
        self.highlight(r, &boxes);

        self.cursor.advance();
        self.last_active = boxes;
        self.log.record(self.ticks, AnimEvent::Reveal { cells: revealed });
    }

    /// Products in flight for one box, laid out on the slice they span
    fn create_intermediate(&mut self, r: &mut dyn Renderer, b: &ActiveBox) {
        let Some(family) = self.anim.alg.family() else { return };
        let (rows, cols, transform) = match family {
            Family::Vm => (Axis::J, Axis::K, self.layout.row_slice(b.i.start)),
            Family::Mv => (Axis::I, Axis::J, self.layout.col_slice(b.k.start)),
            Family::Vv => (Axis::I, Axis::K, self.layout.depth_slice(b.j.start, 0.0)),
        };
        let (row_range, col_range) = (b.range(rows), b.range(cols));
        let values: Vec<f32> = {
            let left = self.left.mat().grid();
            let right = self.right.mat().grid();
            let mut values = Vec::with_capacity(row_range.len() * col_range.len());
            for a in row_range.clone() {
                for c in col_range.clone() {
                    let mut ijk = [b.i.start, b.j.start, b.k.start];
                    ijk[rows.slot()] = a;
                    ijk[cols.slot()] = c;
                    let [i, j, k] = ijk;
                    let x = left.get(i, j) * right.get(j, k);
                    values.push(if x.is_finite() { x } else { 0.0 });
                }
            }
            values
        };
        let (h, w) = (row_range.len(), col_range.len());
        let grid = NumericGrid::from_vec(h, w, values).unwrap_or_else(|_| NumericGrid::zeros(h, w));
        let geometry = self.layout.coords.geometry(rows, row_range, cols, col_range);
        let deco = DecoConfig { legends: false, ..self.deco.clone() };
        let mut mat = Mat::new(r, format!("{} products", self.name), grid, geometry, &self.viz, &deco, &self.global);
        r.add_to_group(self.group, mat.group().into());
        mat.place(r, transform, self.world);
        mat.sync_deco(r);
        self.intermediates.push(mat);
    }

    fn highlight(&mut self, r: &mut dyn Renderer, boxes: &[ActiveBox]) {
        let hide_inputs = self.anim.hide_inputs;
        for b in boxes {
            for (side, region) in [(Side::Left, b.left()), (Side::Right, b.right())] {
                let operand = self.operand_mut(side);
                let leaf = operand.is_leaf();
                let mat = operand.mat_mut();
                if hide_inputs && leaf {
                    mat.show(r, Some(region.clone()));
                }
                mat.bump_color(r, Some(region), BUMP_AMOUNT);
            }
        }
    }

    fn clear_highlights(&mut self, r: &mut dyn Renderer) {
        let hide_inputs = self.anim.hide_inputs;
        let last = std::mem::take(&mut self.last_active);
        for b in &last {
            for (side, region) in [(Side::Left, b.left()), (Side::Right, b.right())] {
                let operand = self.operand_mut(side);
                let leaf = operand.is_leaf();
                let mat = operand.mat_mut();
                if hide_inputs && leaf {
                    mat.hide(r, Some(region));
                } else {
                    mat.refresh(r, Some(region));
                }
            }
        }
    }

    fn dispose_intermediates(&mut self, r: &mut dyn Renderer) {
        for mut mat in self.intermediates.drain(..) {
            mat.dispose(r);
        }
    }

    /// Drops per-cycle objects and restores operand appearance
    fn clear_transients(&mut self, r: &mut dyn Renderer) {
        self.clear_highlights(r);
        self.dispose_intermediates(r);
        for mut layer in self.layers.drain(..) {
            layer.dispose(r);
        }
        if self.anim.hide_inputs {
            for side in Side::BOTH {
                if let Operand::Leaf(mat) = self.operand_mut(side) {
                    mat.show(r, None);
                }
            }
        }
    }

    fn finish_cycle(&mut self, r: &mut dyn Renderer) {
        self.clear_transients(r);
        let hidden = self.result.hidden_count();
        self.finalize(r);
        if hidden > 0 {
            self.log.record(self.ticks, AnimEvent::Reveal { cells: hidden });
        }
        self.log.record(self.ticks, AnimEvent::CycleDone);
        self.publish_global();
        self.phase = Phase::Done;
        debug!("{}: cycle done after {} ticks", self.path, self.ticks);
    }

    /// Repaints every stale mat in the subtree
    ///
    /// Returns whether the result was repainted. Highlights on repainted
    /// operands are laid down again.
    fn sync_views(&mut self, r: &mut dyn Renderer) -> bool {
        let mut operands = false;
        for side in Side::BOTH {
            operands |= match self.operand_mut(side) {
                Operand::Leaf(mat) => mat.sync(r),
                Operand::Node(node) => node.sync_views(r),
            };
        }
        if operands {
            for b in &self.last_active {
                for (side, region) in [(Side::Left, b.left()), (Side::Right, b.right())] {
                    let operand = match side {
                        Side::Left => &mut self.left,
                        Side::Right => &mut self.right,
                    };
                    operand.mat_mut().bump_color(r, Some(region), BUMP_AMOUNT);
                }
            }
        }
        for mat in self.layers.iter_mut().chain(self.intermediates.iter_mut()) {
            mat.sync(r);
        }
        self.result.sync(r)
    }

    /// Points every sharing leaf in the tree at the grid it names
    ///
    /// A source is a node with that name or a non-sharing leaf. A node
    /// cannot take its own result or an ancestor's, since those are
    /// computed from the operand being replaced.
    fn link_shared(&mut self, r: &mut dyn Renderer) {
        let mut links = Vec::new();
        self.collect_links(&mut links);
        for (path, side, target) in links {
            let Some((source, grid)) = self.find_source(&target) else {
                self.diagnostics
                    .warn(&path, format!("{} operand shares unknown matrix {:?}", label(side), target));
                continue;
            };
            if path == source || path.starts_with(&format!("{}.", source)) {
                self.diagnostics.warn(
                    &path,
                    format!("{} operand cannot share {:?}, which depends on it", label(side), target),
                );
                continue;
            }
            if let Some(node) = self.find_node_mut(&path) {
                if node.share_leaf(r, side, grid) {
                    debug!("{}: {} operand shares {}", path, label(side), source);
                }
            }
        }
    }

    fn collect_links(&self, links: &mut Vec<ShareLink>) {
        for side in Side::BOTH {
            if let Some(target) = &self.shared_from[slot(side)] {
                links.push((self.path.clone(), side, target.clone()));
            }
            if let Operand::Node(child) = self.operand_at(side) {
                child.collect_links(links);
            }
        }
    }

    /// Path and shared grid of the first matrix named `name`
    fn find_source(&mut self, name: &str) -> Option<(String, Rc<RefCell<NumericGrid>>)> {
        if self.name == name {
            return Some((self.path.clone(), self.result.share_grid()));
        }
        for side in Side::BOTH {
            let sharing = self.shared_from[slot(side)].is_some();
            let operand = match side {
                Side::Left => &mut self.left,
                Side::Right => &mut self.right,
            };
            match operand {
                Operand::Leaf(mat) if !sharing && mat.name() == name => {
                    return Some((format!("{}.{}", self.path, label(side)), mat.share_grid()));
                }
                Operand::Leaf(_) => {}
                Operand::Node(child) => {
                    if let Some(found) = child.find_source(name) {
                        return Some(found);
                    }
                }
            }
        }
        None
    }

    fn find_node_mut(&mut self, path: &str) -> Option<&mut MatMulNode> {
        if self.path == path {
            return Some(self);
        }
        for operand in [&mut self.left, &mut self.right] {
            if let Operand::Node(child) = operand {
                if path == child.path || path.starts_with(&format!("{}.", child.path)) {
                    return child.find_node_mut(path);
                }
            }
        }
        None
    }

    /// Replaces a leaf operand's storage with a grid shared elsewhere
    ///
    /// The new grid must have the leaf's shape. The result picks up the new
    /// values at the next cycle.
    fn share_leaf(&mut self, r: &mut dyn Renderer, side: Side, grid: Rc<RefCell<NumericGrid>>) -> bool {
        let shape = grid.borrow().shape();
        let (viz, deco, global, world) = (self.viz.clone(), self.deco.clone(), self.global.clone(), self.world);
        let slot_transform = match side {
            Side::Left => self.layout.left,
            Side::Right => self.layout.right,
        };
        let group = self.group;
        let (path, diagnostics) = (self.path.clone(), self.diagnostics.clone());
        let Operand::Leaf(mat) = self.operand_mut(side) else {
            diagnostics.warn(&path, format!("{:?} operand is not a leaf", side));
            return false;
        };
        if mat.shape() != shape {
            let message = format!("shared grid {:?} does not fit {:?} operand {:?}", shape, side, mat.shape());
            diagnostics.warn(&path, message);
            return false;
        }
        let geometry = mat.geometry().clone();
        let name = mat.name().to_owned();
        mat.dispose(r);
        let mut shared = Mat::new(r, name, grid, geometry, &viz, &deco, &global);
        r.add_to_group(group, shared.group().into());
        shared.place(r, slot_transform, world);
        *mat = shared;
        true
    }

    /// Lines from operand rows and columns to the result they feed
    pub fn flow_guides(&self) -> Option<LinesHandle> {
        self.flow
    }

    /// Legends, guides and spotlight labels for the subtree
    pub fn sync_deco(&mut self, r: &mut dyn Renderer) {
        match (self.deco.flow_guides, self.flow) {
            (true, None) => {
                let lines = r.create_lines(&self.layout.flow_guides(), Color::GUIDE);
                r.add_to_group(self.group, lines.into());
                self.flow = Some(lines);
            }
            (false, Some(lines)) => {
                r.dispose(lines.into());
                self.flow = None;
            }
            _ => {}
        }
        self.left.sync_deco(r);
        self.right.sync_deco(r);
        self.result.sync_deco(r);
        self.result.spotlight(r);
        let interior = self.deco.interior_spotlight;
        for mat in self.layers.iter_mut().chain(self.intermediates.iter_mut()) {
            mat.sync_deco(r);
            if interior {
                mat.spotlight(r);
            }
        }
    }

    /// Applies new color and decoration settings to the subtree
    pub fn restyle(&mut self, r: &mut dyn Renderer, viz: &VizConfig, deco: &DecoConfig) {
        self.viz = viz.clone();
        self.deco = deco.clone();
        self.left.restyle(r, viz, deco);
        self.right.restyle(r, viz, deco);
        self.result.restyle(r, viz, deco);
        let quiet = DecoConfig { legends: false, ..deco.clone() };
        for mat in self.layers.iter_mut().chain(self.intermediates.iter_mut()) {
            mat.restyle(r, viz, &quiet);
        }
    }

    pub fn dispose(&mut self, r: &mut dyn Renderer) {
        self.clear_transients(r);
        if let Some(lines) = self.flow.take() {
            r.dispose(lines.into());
        }
        self.left.dispose(r);
        self.right.dispose(r);
        self.result.dispose(r);
        r.dispose(self.group.into());
    }
}
