//! mmviz visualization: animated 3D matmul over an abstract renderer
//!
//! A [`MatMulNode`] lays out `left @ right = result` as point clouds in
//! three orthogonal planes around the product cube and reveals the result
//! tick by tick under one of several schedules. Operands may themselves be
//! nodes, which are driven recursively and fused with their parent when
//! the schedules agree. [`Visualizer`] wraps a tree for a host frame loop,
//! and [`engine::headless::SceneGraph`] stands in for a GPU renderer.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

pub mod engine;
pub mod error;
pub mod matmul;
pub mod scene;
pub mod view;

pub use engine::headless::SceneGraph;
pub use engine::platform::Renderer;
pub use error::VizError;
pub use matmul::node::{MatMulNode, NodeContext, Operand, Phase, TickStatus};
pub use scene::{Snapshot, Visualizer};
pub use view::mat::Mat;
