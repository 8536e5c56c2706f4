//! Matmul nodes: layout, scheduling and the animation engine
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

pub mod anim;
pub mod join;
pub mod layout;
pub mod node;

pub use self::anim::{AnimEvent, AnimLog};
pub use self::join::{Join, Plan};
pub use self::node::{MatMulNode, NodeContext, Operand, Phase, TickStatus};
