//! Ready-made configuration trees
//!
//! Common transformer building blocks expressed as nested matmuls, so a
//! host can open straight into a meaningful scene.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use crate::algorithm::epilog::Epilog;
use crate::algorithm::init::Initializer;
use crate::config::{LeafConfig, MatMulConfig, NodeConfig};

/// Single attention head: `softmax(Q @ K^T / sqrt(d)) @ V`
///
/// The score matrix is the left child of the output matmul, so its rows
/// stream straight into a row-wise parent.
pub fn attention(n_q: usize, n_k: usize, d_head: usize, d_v: usize) -> MatMulConfig {
    let q = LeafConfig::new(n_q, d_head, Initializer::Gaussian).named("Q");
    let kt = LeafConfig::new(d_head, n_k, Initializer::Gaussian).named("K^T");
    let v = LeafConfig::new(n_k, d_v, Initializer::Gaussian).named("V");

    let scores = MatMulConfig::new(q.into(), kt.into())
        .named("attn")
        .with_epilog(Epilog::Softmax);
    MatMulConfig::new(scores.into(), v.into()).named("out")
}

/// Two-layer perceptron: `relu(x @ W1) @ W2`
pub fn mlp(n: usize, d_in: usize, d_hidden: usize, d_out: usize) -> MatMulConfig {
    let x = LeafConfig::new(n, d_in, Initializer::Gaussian).named("x");
    let w1 = LeafConfig::new(d_in, d_hidden, Initializer::PtLinear).named("W1");
    let w2 = LeafConfig::new(d_hidden, d_out, Initializer::PtLinear).named("W2");

    let hidden = MatMulConfig::new(x.into(), w1.into())
        .named("h")
        .with_epilog(Epilog::Relu);
    MatMulConfig::new(hidden.into(), w2.into()).named("y")
}

/// Preset names accepted by [`by_name`]
pub const PRESETS: &[&str] = &["attention", "mlp"];

/// Small default-sized preset by name
pub fn by_name(name: &str) -> Option<NodeConfig> {
    match name {
        "attention" => Some(attention(16, 16, 8, 8).into()),
        "mlp" => Some(mlp(8, 12, 24, 6).into()),
        _ => None,
    }
}
