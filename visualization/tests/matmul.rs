//! End-to-end scheduling and layout checks through the headless renderer
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use glam::Vec3;

use mmviz_core::algorithm::{kernel, leaf_grid, Side};
use mmviz_core::config::{DecoConfig, LayoutConfig};
use mmviz_core::expr::{Expr, SymbolTable};
use mmviz_core::{presets, Algorithm, Epilog, FuseMode, Initializer, LeafConfig, MatMulConfig, Settings};
use mmviz_visualization::engine::headless::PickRay;
use mmviz_visualization::matmul::Plan;
use mmviz_visualization::{MatMulNode, NodeContext, SceneGraph, TickStatus, Visualizer};

fn visualizer(root: MatMulConfig) -> Visualizer<SceneGraph> {
    Visualizer::new(SceneGraph::new(), Settings { root: root.into(), ..Settings::default() })
}

fn gaussian(h: usize, w: usize, seed: u64) -> LeafConfig {
    LeafConfig::new(h, w, Initializer::Gaussian).with_seed(seed)
}

fn child_of(viz: &Visualizer<SceneGraph>) -> &MatMulNode {
    viz.node()
        .and_then(|n| n.left().node())
        .expect("left operand is a node")
}

#[test]
fn test_identity_times_matrix() {
    let eye = LeafConfig::new(2, 2, Initializer::Eye);
    let right = LeafConfig { min: 1.0, max: 4.0, ..LeafConfig::new(2, 2, Initializer::RowMajor) };
    let mut scene = SceneGraph::new();
    let mut node = MatMulNode::build(&mut scene, &MatMulConfig::new(eye.into(), right.into()), &NodeContext::default());
    node.init_animation(&mut scene);

    let expected = [[1.0, 2.0], [3.0, 4.0]];
    for (i, row) in expected.iter().enumerate() {
        for (k, x) in row.iter().enumerate() {
            assert!((node.dotprod(i, k) - x).abs() < 1e-6);
        }
    }
    while node.bump(&mut scene) != TickStatus::Done {}
    let result = node.result().grid().to_rows();
    for (got, want) in result.iter().flatten().zip(expected.iter().flatten()) {
        assert!((got - want).abs() < 1e-6);
    }
}

#[test]
fn test_static_product_matches_dense() {
    let (left, right) = (gaussian(4, 3, 11), gaussian(3, 5, 12));
    let cfg = MatMulConfig::new(left.clone().into(), right.clone().into()).with_alg(Algorithm::None);
    let viz = visualizer(cfg);

    let dense = kernel::matmul(&leaf_grid(&left, 0).unwrap(), &leaf_grid(&right, 0).unwrap()).unwrap();
    let node = viz.node().unwrap();
    assert!(node.is_static());
    assert!(node.result().grid().max_abs_diff(&dense).unwrap() < 1e-6);
    assert_eq!(node.result().hidden_count(), 0);
}

#[test_log::test]
fn test_sequential_child_finishes_before_parent_reveals() {
    let child = MatMulConfig::new(gaussian(3, 2, 1).into(), gaussian(2, 3, 2).into())
        .with_alg(Algorithm::DotprodRowMajor);
    let root = MatMulConfig::new(child.into(), gaussian(3, 2, 3).into())
        .with_alg(Algorithm::Vmprod)
        .with_fuse(FuseMode::None);
    let mut viz = visualizer(root);
    assert_eq!(viz.node().unwrap().plan(Side::Left), Plan::Sequential);

    let mut cycle = viz.node().unwrap().log().cycles_started();
    let (mut child_done_before, mut reveals_before) = (0, 0);
    for _ in 0..60 {
        viz.tick();
        let parent = viz.node().unwrap().log();
        let child = child_of(&viz);
        if parent.cycles_started() != cycle {
            cycle = parent.cycles_started();
            child_done_before = child.log().cycles_done();
            reveals_before = parent.reveals();
        }
        if parent.reveals() > reveals_before {
            assert!(
                child.log().cycles_done() > child_done_before,
                "parent revealed during child cycle in root cycle {}",
                cycle
            );
            assert!(child.completion().is_complete());
        }
        assert!(parent.cycles_done() <= child.log().cycles_done());
    }
    assert!(viz.snapshot().cycles >= 3);
}

#[test]
fn test_async_fusion_reads_partial_rows_and_converges() {
    let child = MatMulConfig::new(gaussian(4, 3, 4).into(), gaussian(3, 3, 5).into())
        .with_alg(Algorithm::DotprodRowMajor);
    let root = MatMulConfig::new(child.into(), gaussian(3, 2, 6).into())
        .with_alg(Algorithm::Vmprod)
        .with_fuse(FuseMode::Async);
    let mut viz = visualizer(root);
    assert_eq!(viz.node().unwrap().plan(Side::Left), Plan::Fused);

    let mut read_early = false;
    loop {
        let status = viz.tick();
        let node = viz.node().unwrap();
        let child = child_of(&viz);
        read_early |= (0..4).any(|i| node.completion().row_complete(i) && !child.completion().row_complete(i));
        if status == TickStatus::Done {
            break;
        }
    }
    assert!(read_early, "async parent never ran ahead of its child");

    let node = viz.node().unwrap();
    let child = child_of(&viz);
    assert!(child.completion().is_complete());
    let dense = kernel::matmul(&child.result().grid(), &node.right().mat().grid()).unwrap();
    assert!(node.result().grid().max_abs_diff(&dense).unwrap() < 1e-5);
}

#[test]
fn test_repeated_symbol_shares_one_grid() {
    let mut symbols = SymbolTable::new(9);
    symbols.define("S", LeafConfig::new(3, 3, Initializer::Gaussian));
    let src = "(S @ S) @ S";
    let mut viz = Visualizer::from_expression(SceneGraph::new(), src, &symbols).unwrap();
    assert_eq!(viz.diagnostics().warnings(), 0);

    while viz.tick() != TickStatus::Done {}
    let node = viz.node().unwrap();
    let inner = child_of(&viz);
    for mat in [inner.left().mat(), inner.right().mat(), node.right().mat()] {
        assert!(mat.is_shared(), "{} keeps its own grid", mat.name());
    }
    let first = inner.left().mat().grid().clone();
    assert_eq!(inner.right().mat().grid().max_abs_diff(&first), Some(0.0));
    assert_eq!(node.right().mat().grid().max_abs_diff(&first), Some(0.0));
    let expected = Expr::parse(src).unwrap().eval(&symbols).unwrap();
    assert!(node.result().grid().max_abs_diff(&expected).unwrap() < 1e-4);
}

#[test]
fn test_sync_fusion_reads_only_finished_rows() {
    let child = MatMulConfig::new(gaussian(4, 3, 4).into(), gaussian(3, 3, 5).into())
        .with_alg(Algorithm::DotprodRowMajor);
    let root = MatMulConfig::new(child.into(), gaussian(3, 2, 6).into())
        .with_alg(Algorithm::Vmprod)
        .with_fuse(FuseMode::Sync);
    let mut viz = visualizer(root);
    assert_eq!(viz.node().unwrap().plan(Side::Left), Plan::Fused);

    loop {
        let status = viz.tick();
        let node = viz.node().unwrap();
        let child = child_of(&viz);
        for i in 0..4 {
            if node.completion().row_complete(i) {
                assert!(child.completion().row_complete(i), "row {} read early", i);
            }
        }
        if status == TickStatus::Done {
            break;
        }
    }

    let node = viz.node().unwrap();
    let child = child_of(&viz);
    let dense = kernel::matmul(&child.result().grid(), &node.right().mat().grid()).unwrap();
    assert!(node.result().grid().max_abs_diff(&dense).unwrap() < 1e-5);
}

#[test]
fn test_blocked_inner_dimension_keeps_result_hidden() {
    let mut root = MatMulConfig::new(gaussian(2, 4, 7).into(), gaussian(4, 3, 8).into()).with_alg(Algorithm::Axpy);
    root.anim.j_blocks = 2;
    let mut viz = visualizer(root);
    assert_eq!(viz.node().unwrap().layers().len(), 2);

    // two inner offsets by two rows
    for _ in 0..3 {
        assert_eq!(viz.tick(), TickStatus::Running);
        let node = viz.node().unwrap();
        assert_eq!(node.result().hidden_count(), 6);
        assert_eq!(node.intermediates().len(), 2);
    }
    assert_eq!(viz.tick(), TickStatus::Done);
    let node = viz.node().unwrap();
    assert_eq!(node.result().hidden_count(), 0);
    assert!(node.layers().is_empty());
}

#[test]
fn test_attention_scores_are_row_stochastic() {
    let mut viz = visualizer(presets::attention(3, 5, 2, 2));
    while viz.tick() != TickStatus::Done {}

    let scores = child_of(&viz);
    assert_eq!(scores.epilog(), Epilog::Softmax);
    for row in scores.result().grid().to_rows() {
        let sum: f32 = row.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5, "row sums to {}", sum);
    }
}

#[test]
fn test_nested_result_lands_on_operand_slot() {
    let child = MatMulConfig::new(gaussian(3, 2, 1).into(), gaussian(2, 4, 2).into());
    let root = MatMulConfig::new(child.into(), gaussian(4, 2, 3).into());
    let viz = visualizer(root);
    let node = viz.node().unwrap();
    let child = child_of(&viz);

    assert_eq!(child.layout().polarity, -node.layout().polarity);
    let slot = node.layout().left;
    let placed = viz.renderer().world_transform(child.result().group().into());
    for cell in [Vec3::ZERO, Vec3::new(3.0, -2.0, 0.0)] {
        let want = slot.transform_point3(cell);
        assert!((placed.transform_point3(cell) - want).length() < 1e-4);
        assert!((child.result().world().transform_point3(cell) - want).length() < 1e-4);
    }
}

#[test]
fn test_scatter_pushes_chains_apart() {
    let chain = |scatter: f32| {
        let child = MatMulConfig::new(gaussian(2, 2, 1).into(), gaussian(2, 2, 2).into());
        let mut root = MatMulConfig::new(child.into(), gaussian(2, 2, 3).into());
        root.layout = LayoutConfig { scatter, molecule: 1, blast: 1.0, ..LayoutConfig::default() };
        visualizer(root)
    };
    let near = chain(0.0);
    let far = chain(1.5);
    let x = |viz: &Visualizer<SceneGraph>| viz.node().unwrap().layout().left.translation.x;
    assert!((x(&near) - x(&far) - 3.0).abs() < 1e-5);
}

#[test]
fn test_spotlight_labels_cells_under_ray() {
    let mut root = MatMulConfig::new(
        LeafConfig::new(2, 2, Initializer::Eye).into(),
        LeafConfig::new(2, 2, Initializer::Eye).into(),
    )
    .with_alg(Algorithm::None);
    root.deco = DecoConfig { spotlight: 0.3, legends: false, row_guides: false, ..DecoConfig::default() };
    let mut viz = visualizer(root);

    let points = viz.node().unwrap().result().points();
    let at = viz.renderer().world_position(points, 0).unwrap();
    viz.renderer_mut().set_pick_ray(Some(PickRay { origin: at + Vec3::Z * 10.0, direction: Vec3::NEG_Z }));
    viz.tick();

    let labels: Vec<_> = viz.renderer().texts().map(|t| t.text.clone()).collect();
    assert_eq!(labels, vec!["1.000".to_owned()]);

    viz.renderer_mut().set_pick_ray(None);
    viz.tick();
    assert_eq!(viz.renderer().texts().count(), 0);
}

#[test]
fn test_expression_chain_converges_to_dense_value() {
    let mut symbols = SymbolTable::new(3);
    symbols
        .define("A", LeafConfig::new(3, 4, Initializer::Gaussian))
        .define("B", LeafConfig::new(4, 2, Initializer::Uniform))
        .define("C", LeafConfig::new(2, 3, Initializer::Cols));
    let src = "(A @ B) @ C";
    let mut viz = Visualizer::from_expression(SceneGraph::new(), src, &symbols).unwrap();
    assert_eq!(viz.node().unwrap().matmul_count(), 2);

    while viz.tick() != TickStatus::Done {}
    let expected = Expr::parse(src).unwrap().eval(&symbols).unwrap();
    assert!(viz.node().unwrap().result().grid().max_abs_diff(&expected).unwrap() < 1e-4);
}

#[test]
fn test_teardown_releases_every_object() {
    let mut viz = visualizer(presets::mlp(3, 4, 5, 2));
    viz.run(17);
    let scene = viz.into_renderer();
    assert_eq!(scene.live_objects(), 0);
    let stats = scene.stats();
    assert_eq!(stats.created, stats.disposed);
}

#[test]
fn test_snapshot_serializes_tree() {
    let cfg = MatMulConfig::new(gaussian(2, 2, 1).into(), gaussian(2, 2, 2).into()).with_alg(Algorithm::Vmprod);
    let mut viz = visualizer(cfg);
    viz.tick();
    let json = viz.snapshot().to_json().unwrap();
    assert!(json.contains("\"alg\": \"vmprod\""));
    assert!(json.contains("\"phase\": \"Running\""));
}
