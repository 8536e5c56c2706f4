//! Host driver
//!
//! `Visualizer` owns the settings, the renderer and the root of the node
//! tree. A host calls [`Visualizer::bump`] from its frame loop; ticks are
//! throttled by `pause_ms`. Reconfiguring disposes the tree and rebuilds
//! it, restyling keeps the data and animation state.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use log::{debug, info};
use serde::{Deserialize, Serialize};

use mmviz_core::config::{DecoConfig, VizConfig};
use mmviz_core::expr::{Expr, ExprError, SymbolTable};
use mmviz_core::{
    Algorithm, Diagnostic, Diagnostics, MatMulConfig, NodeConfig, NumericGrid, Settings, VERSION,
};
use mmviz_core::algorithm::{derive_seed, leaf_grid};

use crate::engine::platform::Renderer;
use crate::error::VizError;
use crate::matmul::join::Join;
use crate::matmul::node::{MatMulNode, NodeContext, Operand, Phase, TickStatus};
use crate::view::mapping::GlobalRange;
use crate::view::mat::{CellGeometry, Mat};

/// What the settings root turned into
#[derive(Debug)]
pub enum Root {
    Node(Box<MatMulNode>),
    /// A bare leaf: shown, never animated
    Leaf(Mat),
}

/// Serializable summary of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub path: String,
    pub name: String,
    /// `[h, d, w]`
    pub dims: [usize; 3],
    pub alg: Algorithm,
    pub join: Join,
    pub phase: Phase,
    pub cycles_done: u64,
    pub reveals: u64,
    pub result: Vec<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left: Option<Box<NodeSnapshot>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right: Option<Box<NodeSnapshot>>,
}

impl NodeSnapshot {
    fn of(node: &MatMulNode) -> Self {
        let (h, d, w) = node.dims();
        let child = |op: &Operand| op.node().map(|n| Box::new(Self::of(n)));
        Self {
            path: node.path().to_owned(),
            name: node.name().to_owned(),
            dims: [h, d, w],
            alg: node.algorithm(),
            join: node.alg_join(),
            phase: node.phase(),
            cycles_done: node.log().cycles_done(),
            reveals: node.log().reveals(),
            result: node.result().grid().to_rows(),
            left: child(node.left()),
            right: child(node.right()),
        }
    }
}

/// Serializable summary of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: String,
    pub ticks: u64,
    /// Completed root cycles
    pub cycles: u64,
    pub shape: (usize, usize),
    /// Root values as currently stored, hidden cells included
    pub result: Vec<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tree: Option<NodeSnapshot>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Snapshot {
    pub fn to_json(&self) -> Result<String, VizError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Writes `viz` and `deco` through a configuration tree
fn set_style(cfg: &mut MatMulConfig, viz: &VizConfig, deco: &DecoConfig) {
    cfg.viz = viz.clone();
    cfg.deco = deco.clone();
    for child in [&mut *cfg.left, &mut *cfg.right] {
        if let NodeConfig::MatMul(m) = child {
            set_style(m, viz, deco);
        }
    }
}

/// Drives a node tree against a renderer
#[derive(Debug)]
pub struct Visualizer<R: Renderer> {
    settings: Settings,
    renderer: R,
    root: Root,
    diagnostics: Diagnostics,
    global: GlobalRange,
    last_tick_ms: Option<f64>,
    ticks: u64,
}

impl<R: Renderer> Visualizer<R> {
    /// Builds the tree and starts its first cycle
    pub fn new(mut renderer: R, settings: Settings) -> Self {
        let diagnostics = Diagnostics::new();
        let global = GlobalRange::new();
        let root = Self::build(&mut renderer, &settings, &diagnostics, &global);
        Self {
            settings,
            renderer,
            root,
            diagnostics,
            global,
            last_tick_ms: None,
            ticks: 0,
        }
    }

    pub fn from_json(renderer: R, json: &str) -> Result<Self, VizError> {
        Ok(Self::new(renderer, Settings::from_json_str(json)?))
    }

    /// Builds a tree from an expression like `(Q @ K) @ V`
    ///
    /// Every identifier must be defined in `symbols`.
    pub fn from_expression(renderer: R, src: &str, symbols: &SymbolTable) -> Result<Self, VizError> {
        let expr = Expr::parse(src)?;
        if let Some(name) = expr.unresolved(symbols).into_iter().next() {
            return Err(ExprError::UnknownSymbol(name).into());
        }
        expr.shape(symbols)?;
        let root = expr.to_config(symbols)?;
        let settings = Settings { root, ..Settings::default() };
        Ok(Self::new(renderer, settings))
    }

    fn build(renderer: &mut R, settings: &Settings, diagnostics: &Diagnostics, global: &GlobalRange) -> Root {
        let ctx = NodeContext {
            diagnostics: diagnostics.clone(),
            global: global.clone(),
            seed: settings.seed,
        };
        match &settings.root {
            NodeConfig::MatMul(cfg) => {
                let mut node = MatMulNode::build(renderer, cfg, &ctx);
                node.init_animation(renderer);
                node.sync_deco(renderer);
                info!(
                    "built {} matmul node(s), root {:?} {:?}",
                    node.matmul_count(),
                    node.name(),
                    node.dims()
                );
                Root::Node(Box::new(node))
            }
            NodeConfig::Leaf(leaf) => {
                leaf.validate("root", diagnostics);
                let grid = leaf_grid(leaf, derive_seed(settings.seed, "root")).unwrap_or_else(|e| {
                    diagnostics.warn("root", format!("{}; using zeros", e));
                    NumericGrid::zeros(leaf.h, leaf.w)
                });
                let geometry = CellGeometry::blocked(leaf.h, leaf.w, 1, 1, 0.0);
                let name = leaf.name.clone().unwrap_or_else(|| "root".to_owned());
                let mut mat = Mat::new(
                    renderer,
                    name,
                    grid,
                    geometry,
                    &VizConfig::default(),
                    &DecoConfig::default(),
                    global,
                );
                mat.sync_deco(renderer);
                info!("built a bare {}x{} leaf", leaf.h, leaf.w);
                Root::Leaf(mat)
            }
        }
    }

    /// Ticks unless less than `pause_ms` passed since the last tick
    ///
    /// Returns `None` when throttled.
    pub fn bump(&mut self, timestamp_ms: f64) -> Option<TickStatus> {
        if let Some(last) = self.last_tick_ms {
            if timestamp_ms - last < self.settings.pause_ms {
                return None;
            }
        }
        self.last_tick_ms = Some(timestamp_ms);
        Some(self.tick())
    }

    /// One unthrottled tick over the whole tree
    pub fn tick(&mut self) -> TickStatus {
        self.ticks += 1;
        match &mut self.root {
            Root::Node(node) => {
                let status = node.bump(&mut self.renderer);
                node.sync_deco(&mut self.renderer);
                status
            }
            Root::Leaf(mat) => {
                mat.sync_deco(&mut self.renderer);
                TickStatus::Done
            }
        }
    }

    /// Runs `n` ticks and returns how many root cycles finished
    pub fn run(&mut self, n: usize) -> usize {
        (0..n).filter(|_| self.tick() == TickStatus::Done).count()
    }

    /// Disposes the tree and rebuilds it from `settings`
    pub fn reconfigure(&mut self, settings: Settings) {
        info!("rebuilding visualization");
        self.dispose_root();
        self.diagnostics.clear();
        self.global.clear();
        self.last_tick_ms = None;
        self.ticks = 0;
        self.root = Self::build(&mut self.renderer, &settings, &self.diagnostics, &self.global);
        self.settings = settings;
    }

    /// Applies color and decoration changes to every node
    pub fn restyle(&mut self, viz: &VizConfig, deco: &DecoConfig) {
        debug!("restyling visualization");
        match &mut self.root {
            Root::Node(node) => node.restyle(&mut self.renderer, viz, deco),
            Root::Leaf(mat) => mat.restyle(&mut self.renderer, viz, deco),
        }
        if let NodeConfig::MatMul(cfg) = &mut self.settings.root {
            set_style(cfg, viz, deco);
        }
    }

    fn dispose_root(&mut self) {
        match &mut self.root {
            Root::Node(node) => node.dispose(&mut self.renderer),
            Root::Leaf(mat) => mat.dispose(&mut self.renderer),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        let (mat, tree, cycles) = match &self.root {
            Root::Node(node) => (node.result(), Some(NodeSnapshot::of(node)), node.log().cycles_done()),
            Root::Leaf(mat) => (mat, None, 0),
        };
        Snapshot {
            version: VERSION.to_owned(),
            ticks: self.ticks,
            cycles,
            shape: mat.shape(),
            result: mat.grid().to_rows(),
            tree,
            diagnostics: self.diagnostics.entries(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    pub fn root(&self) -> &Root {
        &self.root
    }

    /// Root node, unless the root is a bare leaf
    pub fn node(&self) -> Option<&MatMulNode> {
        match &self.root {
            Root::Node(node) => Some(node),
            Root::Leaf(_) => None,
        }
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Disposes every renderer object and hands the renderer back
    pub fn into_renderer(mut self) -> R {
        self.dispose_root();
        self.renderer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::headless::SceneGraph;
    use mmviz_core::{Initializer, LeafConfig};

    fn settings(pause_ms: f64) -> Settings {
        let left = LeafConfig::new(2, 3, Initializer::RowMajor);
        let right = LeafConfig::new(3, 2, Initializer::ColMajor);
        let root = MatMulConfig::new(left.into(), right.into()).with_alg(Algorithm::Vmprod);
        Settings { root: root.into(), pause_ms, seed: 7 }
    }

    #[test]
    fn test_bump_respects_pause() {
        let mut viz = Visualizer::new(SceneGraph::new(), settings(50.0));
        assert!(viz.bump(0.0).is_some());
        assert!(viz.bump(20.0).is_none());
        assert!(viz.bump(50.0).is_some());
        assert_eq!(viz.ticks(), 2);
    }

    #[test]
    fn test_run_counts_cycles() {
        let mut viz = Visualizer::new(SceneGraph::new(), settings(0.0));
        // two rows per cycle; a restart steps in the same tick
        assert_eq!(viz.run(2), 1);
        assert_eq!(viz.run(2), 1);
        assert_eq!(viz.run(4), 2);
        assert_eq!(viz.snapshot().cycles, 4);
    }

    #[test]
    fn test_reconfigure_releases_old_tree() {
        let mut viz = Visualizer::new(SceneGraph::new(), settings(0.0));
        viz.run(1);
        viz.reconfigure(settings(0.0));
        let fresh = Visualizer::new(SceneGraph::new(), settings(0.0));
        assert_eq!(viz.renderer().live_objects(), fresh.renderer().live_objects());
        assert_eq!(viz.ticks(), 0);
        assert_eq!(viz.snapshot(), fresh.snapshot());
    }

    #[test]
    fn test_restyle_updates_settings_tree() {
        let mut viz = Visualizer::new(SceneGraph::new(), settings(0.0));
        let deco = DecoConfig { legends: false, ..DecoConfig::default() };
        viz.restyle(&VizConfig::default(), &deco);
        let NodeConfig::MatMul(cfg) = &viz.settings().root else {
            panic!("root is a matmul");
        };
        assert!(!cfg.deco.legends);
        assert_eq!(viz.renderer().texts().count(), 0);
    }

    #[test]
    fn test_leaf_root_is_static() {
        let leaf = LeafConfig::new(2, 2, Initializer::Eye);
        let mut viz = Visualizer::new(SceneGraph::new(), Settings { root: leaf.into(), ..Settings::default() });
        assert_eq!(viz.tick(), TickStatus::Done);
        let snap = viz.snapshot();
        assert!(snap.tree.is_none());
        assert_eq!(snap.result, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_from_expression_rejects_unknown_names() {
        let mut symbols = SymbolTable::new(0);
        symbols.define("A", LeafConfig::new(2, 2, Initializer::Eye));
        let err = Visualizer::from_expression(SceneGraph::new(), "A @ B", &symbols).unwrap_err();
        assert!(matches!(err, VizError::Expr(ExprError::UnknownSymbol(ref name)) if name == "B"));
    }
}
