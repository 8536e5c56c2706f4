//! Typed configuration tree
//!
//! The configuration mirrors the node tree: a matmul node names its two
//! operands (each either a leaf or another matmul) plus epilog, animation,
//! layout, color mapping and decoration settings. Every enumerated field is
//! a closed set with the exact names used by control panels, so unknown
//! names are rejected when the configuration is read rather than producing
//! undefined behavior later.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::path::{Path, PathBuf};

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::algorithm::epilog::Epilog;
use crate::algorithm::init::Initializer;
use crate::algorithm::schedule::{Algorithm, FuseMode};
use crate::diagnostics::Diagnostics;

/// Error types for configuration handling
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown {kind} {name:?}")]
    UnknownName { kind: &'static str, name: String },

    #[error("malformed configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

closed_set! {
    /// Half-space the inner dimension extends into
    pub enum Polarity: "polarity" {
        Positive => "positive",
        Negative => "negative",
    }
}

closed_set! {
    /// Side of the result the left operand sits on
    pub enum LeftPlacement: "left placement" {
        Left => "left",
        Right => "right",
    }
}

closed_set! {
    /// Side of the result the right operand sits on
    pub enum RightPlacement: "right placement" {
        Top => "top",
        Bottom => "bottom",
    }
}

closed_set! {
    /// Whether the result faces the viewer or sits behind the operands
    pub enum ResultPlacement: "result placement" {
        Front => "front",
        Back => "back",
    }
}

closed_set! {
    /// Which value range drives color and size mapping
    pub enum Sensitivity: "sensitivity" {
        Global => "global",
        Local => "local",
        Superlocal => "superlocal",
    }
}

impl Polarity {
    /// `+1.0` or `-1.0`
    pub fn sign(self) -> f32 {
        match self {
            Polarity::Positive => 1.0,
            Polarity::Negative => -1.0,
        }
    }

    pub fn flipped(self) -> Self {
        match self {
            Polarity::Positive => Polarity::Negative,
            Polarity::Negative => Polarity::Positive,
        }
    }
}

impl LeftPlacement {
    pub fn flipped(self) -> Self {
        match self {
            LeftPlacement::Left => LeftPlacement::Right,
            LeftPlacement::Right => LeftPlacement::Left,
        }
    }
}

impl RightPlacement {
    pub fn flipped(self) -> Self {
        match self {
            RightPlacement::Top => RightPlacement::Bottom,
            RightPlacement::Bottom => RightPlacement::Top,
        }
    }
}

/// Leaf matrix: shape plus initializer
///
/// Unknown fields are rejected so a malformed matmul object never decodes
/// as a default leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LeafConfig {
    /// Display name used in legends
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Row count
    pub h: usize,

    /// Column count
    pub w: usize,

    /// Cell initializer
    pub init: Initializer,

    /// Lower end of the initializer range
    pub min: f32,

    /// Upper end of the initializer range
    pub max: f32,

    /// Probability of zeroing each cell
    pub dropout: f32,

    /// Pinned random seed; derived from the tree position when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    /// Name of a matmul node or leaf elsewhere in the tree whose grid this
    /// leaf shows by reference instead of generating its own
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shares: Option<String>,
}

impl Default for LeafConfig {
    fn default() -> Self {
        Self {
            name: None,
            h: 8,
            w: 8,
            init: Initializer::Uniform,
            min: -1.0,
            max: 1.0,
            dropout: 0.0,
            seed: None,
            shares: None,
        }
    }
}

impl LeafConfig {
    pub fn new(h: usize, w: usize, init: Initializer) -> Self {
        Self { h, w, init, ..Self::default() }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Leaf that shows the grid of the node or leaf called `source`
    pub fn sharing(mut self, source: impl Into<String>) -> Self {
        self.shares = Some(source.into());
        self
    }

    /// Reports out-of-range fields without rejecting them
    pub fn validate(&self, path: &str, diagnostics: &Diagnostics) {
        if self.h == 0 || self.w == 0 {
            diagnostics.warn(path, format!("leaf has empty shape {}x{}", self.h, self.w));
        }
        if !(0.0..1.0).contains(&self.dropout) && self.dropout != 1.0 {
            diagnostics.warn(path, format!("dropout {} outside [0, 1], clamping", self.dropout));
        }
        if !self.min.is_finite() || !self.max.is_finite() {
            diagnostics.warn(path, format!("non-finite initializer range [{}, {}]", self.min, self.max));
        }
    }
}

/// Animation settings for one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnimConfig {
    /// Reveal strategy
    pub alg: Algorithm,

    /// How steps combine with nested children
    pub fuse: FuseMode,

    /// Block count over result rows
    pub i_blocks: usize,

    /// Block count over the inner dimension
    pub j_blocks: usize,

    /// Block count over result columns
    pub k_blocks: usize,

    /// Show only the operand slices in use
    pub hide_inputs: bool,
}

impl Default for AnimConfig {
    fn default() -> Self {
        Self {
            alg: Algorithm::DotprodRowMajor,
            fuse: FuseMode::Sync,
            i_blocks: 1,
            j_blocks: 1,
            k_blocks: 1,
            hide_inputs: false,
        }
    }
}

impl AnimConfig {
    /// Block counts `[i, j, k]`, each at least 1
    pub fn block_counts(&self) -> [usize; 3] {
        [self.i_blocks.max(1), self.j_blocks.max(1), self.k_blocks.max(1)]
    }

    pub fn validate(&self, path: &str, diagnostics: &Diagnostics) {
        for (axis, n) in [("i", self.i_blocks), ("j", self.j_blocks), ("k", self.k_blocks)] {
            if n == 0 {
                diagnostics.warn(path, format!("{} blocks is 0, using 1", axis));
            }
        }
    }
}

/// Spatial arrangement of a node's operands and result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LayoutConfig {
    pub polarity: Polarity,
    pub left_placement: LeftPlacement,
    pub right_placement: RightPlacement,
    pub result_placement: ResultPlacement,

    /// Distance between operand planes and the product cube
    pub gap: f32,

    /// Extra separation per nested matmul once `molecule` is exceeded
    pub scatter: f32,

    /// Node count above which scatter kicks in
    pub molecule: usize,

    /// Exponent applied to the node count for scatter
    pub blast: f32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            polarity: Polarity::Positive,
            left_placement: LeftPlacement::Left,
            right_placement: RightPlacement::Top,
            result_placement: ResultPlacement::Front,
            gap: 2.0,
            scatter: 0.0,
            molecule: 1,
            blast: 1.0,
        }
    }
}

impl LayoutConfig {
    /// Orientation for the next nesting level
    ///
    /// Flips polarity and both operand placements; result placement is kept.
    pub fn next(&self) -> Self {
        Self {
            polarity: self.polarity.flipped(),
            left_placement: self.left_placement.flipped(),
            right_placement: self.right_placement.flipped(),
            ..self.clone()
        }
    }

    /// Applies `next()` once per nesting level
    pub fn at_depth(&self, depth: usize) -> Self {
        (0..depth).fold(self.clone(), |layout, _| layout.next())
    }

    /// Outward push for a subtree holding `count` matmul nodes
    pub fn spread(&self, count: usize) -> f32 {
        if count > self.molecule {
            self.scatter * (count as f32).powf(self.blast)
        } else {
            0.0
        }
    }
}

/// Value-to-appearance mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VizConfig {
    pub sensitivity: Sensitivity,

    /// Point size of a zero-magnitude cell, as a fraction of full size
    pub min_size: f32,

    /// Lightness of a zero-magnitude cell
    pub min_light: f32,

    /// Lightness of a full-magnitude cell
    pub max_light: f32,

    /// Hue (degrees) that zero maps to
    pub zero_hue: f32,

    /// Hue offset separating positive from negative values
    pub hue_gap: f32,

    /// Hue range covered from zero to full magnitude
    pub hue_spread: f32,

    /// Spacing inserted between display blocks
    pub block_gap: f32,
}

impl Default for VizConfig {
    fn default() -> Self {
        Self {
            sensitivity: Sensitivity::Local,
            min_size: 0.2,
            min_light: 0.4,
            max_light: 0.6,
            zero_hue: 0.0,
            hue_gap: 120.0,
            hue_spread: 40.0,
            block_gap: 1.0,
        }
    }
}

/// Decorations drawn around matrices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DecoConfig {
    pub legends: bool,
    pub row_guides: bool,
    pub flow_guides: bool,

    /// Raycast threshold for value labels; 0 disables
    pub spotlight: f32,

    /// Also label intermediates
    pub interior_spotlight: bool,

    /// Text size for legends and labels
    pub legend_size: f32,
}

impl Default for DecoConfig {
    fn default() -> Self {
        Self {
            legends: true,
            row_guides: true,
            flow_guides: false,
            spotlight: 0.0,
            interior_spotlight: false,
            legend_size: 0.5,
        }
    }
}

fn yes() -> bool {
    true
}

/// Matmul node: `left @ right`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatMulConfig {
    #[serde(default = "yes")]
    pub matmul: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub left: Box<NodeConfig>,
    pub right: Box<NodeConfig>,

    #[serde(default)]
    pub epilog: Epilog,
    #[serde(default)]
    pub anim: AnimConfig,
    #[serde(default)]
    pub layout: LayoutConfig,
    #[serde(default)]
    pub viz: VizConfig,
    #[serde(default)]
    pub deco: DecoConfig,
}

impl MatMulConfig {
    pub fn new(left: NodeConfig, right: NodeConfig) -> Self {
        Self {
            matmul: true,
            name: None,
            left: Box::new(left),
            right: Box::new(right),
            epilog: Epilog::None,
            anim: AnimConfig::default(),
            layout: LayoutConfig::default(),
            viz: VizConfig::default(),
            deco: DecoConfig::default(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_epilog(mut self, epilog: Epilog) -> Self {
        self.epilog = epilog;
        self
    }

    pub fn with_alg(mut self, alg: Algorithm) -> Self {
        self.anim.alg = alg;
        self
    }

    pub fn with_fuse(mut self, fuse: FuseMode) -> Self {
        self.anim.fuse = fuse;
        self
    }
}

/// Either operand kind
///
/// Decoding dispatches on the `matmul` flag. Without one, an object that
/// names `left` or `right` is a matmul and anything else is a leaf, so
/// errors come from the intended variant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NodeConfig {
    MatMul(MatMulConfig),
    Leaf(LeafConfig),
}

impl<'de> Deserialize<'de> for NodeConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut value = serde_json::Value::deserialize(deserializer)?;
        let object = value
            .as_object_mut()
            .ok_or_else(|| D::Error::custom("node must be an object"))?;
        let matmul = match object.get("matmul") {
            None => object.contains_key("left") || object.contains_key("right"),
            Some(serde_json::Value::Bool(flag)) => *flag,
            Some(other) => return Err(D::Error::custom(format!("`matmul` must be true or false, found {}", other))),
        };
        if matmul {
            MatMulConfig::deserialize(value)
                .map(NodeConfig::MatMul)
                .map_err(|e| D::Error::custom(format!("matmul node: {}", e)))
        } else {
            object.remove("matmul");
            LeafConfig::deserialize(value)
                .map(NodeConfig::Leaf)
                .map_err(|e| D::Error::custom(format!("leaf: {}", e)))
        }
    }
}

impl From<LeafConfig> for NodeConfig {
    fn from(leaf: LeafConfig) -> Self {
        NodeConfig::Leaf(leaf)
    }
}

impl From<MatMulConfig> for NodeConfig {
    fn from(mm: MatMulConfig) -> Self {
        NodeConfig::MatMul(mm)
    }
}

impl NodeConfig {
    pub fn is_matmul(&self) -> bool {
        matches!(self, NodeConfig::MatMul(_))
    }

    /// Best-effort output shape `(rows, cols)`
    pub fn shape(&self) -> (usize, usize) {
        match self {
            NodeConfig::Leaf(leaf) => (leaf.h, leaf.w),
            NodeConfig::MatMul(mm) => (mm.left.shape().0, mm.right.shape().1),
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            NodeConfig::Leaf(leaf) => leaf.name.as_deref(),
            NodeConfig::MatMul(mm) => mm.name.as_deref(),
        }
    }

    /// Number of matmul nodes in this subtree
    pub fn matmul_count(&self) -> usize {
        match self {
            NodeConfig::Leaf(_) => 0,
            NodeConfig::MatMul(mm) => 1 + mm.left.matmul_count() + mm.right.matmul_count(),
        }
    }

    /// Walks the tree, reporting shape mismatches and out-of-range fields
    pub fn validate(&self, path: &str, diagnostics: &Diagnostics) {
        match self {
            NodeConfig::Leaf(leaf) => leaf.validate(path, diagnostics),
            NodeConfig::MatMul(mm) => {
                let (_, d) = mm.left.shape();
                let (rd, _) = mm.right.shape();
                if d != rd {
                    diagnostics.warn(
                        path,
                        format!("inner dimensions disagree: left has {} columns, right has {} rows", d, rd),
                    );
                }
                mm.anim.validate(path, diagnostics);
                mm.left.validate(&format!("{}.left", path), diagnostics);
                mm.right.validate(&format!("{}.right", path), diagnostics);
            }
        }
    }
}

/// Top-level settings for a visualization session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Root of the node tree
    pub root: NodeConfig,

    /// Minimum milliseconds between animation ticks
    pub pause_ms: f64,

    /// Seed for leaves without a pinned seed
    pub seed: u64,
}

impl Default for Settings {
    fn default() -> Self {
        let left = LeafConfig::new(8, 12, Initializer::Uniform).named("L");
        let right = LeafConfig::new(12, 10, Initializer::Uniform).named("R");
        Self {
            root: MatMulConfig::new(left.into(), right.into()).into(),
            pause_ms: 0.0,
            seed: 0,
        }
    }
}

impl Settings {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_tree() {
        let json = r#"{
            "root": {
                "matmul": true,
                "left": {
                    "matmul": true,
                    "left": {"h": 4, "w": 3, "init": "row major"},
                    "right": {"h": 3, "w": 6, "init": "gaussian"},
                    "epilog": "softmax(x/sqrt(j))"
                },
                "right": {"h": 6, "w": 5, "init": "eye"},
                "anim": {"alg": "vmprod", "fuse": "async", "iBlocks": 2, "hideInputs": true},
                "layout": {"polarity": "negative", "resultPlacement": "back"}
            },
            "pauseMs": 16.0
        }"#;
        let settings = Settings::from_json_str(json).unwrap();
        assert_eq!(settings.pause_ms, 16.0);
        assert_eq!(settings.root.shape(), (4, 5));
        assert_eq!(settings.root.matmul_count(), 2);

        let NodeConfig::MatMul(root) = &settings.root else {
            panic!("root should be a matmul");
        };
        assert_eq!(root.anim.alg, Algorithm::Vmprod);
        assert_eq!(root.anim.fuse, FuseMode::Async);
        assert_eq!(root.anim.block_counts(), [2, 1, 1]);
        assert!(root.anim.hide_inputs);
        assert_eq!(root.layout.polarity, Polarity::Negative);
        assert_eq!(root.layout.result_placement, ResultPlacement::Back);

        let NodeConfig::MatMul(inner) = root.left.as_ref() else {
            panic!("left should be a matmul");
        };
        assert_eq!(inner.epilog, Epilog::Softmax);
    }

    #[test]
    fn test_unknown_names_are_rejected() {
        let json = r#"{"root": {"left": {"h": 2, "w": 2, "init": "zeros"}, "right": {"h": 2, "w": 2}}}"#;
        assert!(matches!(Settings::from_json_str(json), Err(ConfigError::Json(_))));

        let err = "spiral".parse::<Initializer>().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownName { kind: "initializer", .. }));
    }

    #[test]
    fn test_node_errors_name_the_intended_variant() {
        let bad_alg = r#"{"root": {"left": {"h": 2, "w": 2}, "right": {"h": 2, "w": 2}, "anim": {"alg": "vmprd"}}}"#;
        let err = Settings::from_json_str(bad_alg).unwrap_err().to_string();
        assert!(err.contains("matmul node"), "{}", err);
        assert!(err.contains("vmprd"), "{}", err);

        let missing = r#"{"root": {"matmul": true, "left": {"h": 2, "w": 2}}}"#;
        let err = Settings::from_json_str(missing).unwrap_err().to_string();
        assert!(err.contains("right"), "{}", err);

        let not_bool = r#"{"root": {"matmul": "yes", "h": 2, "w": 2}}"#;
        let err = Settings::from_json_str(not_bool).unwrap_err().to_string();
        assert!(err.contains("true or false"), "{}", err);
    }

    #[test]
    fn test_matmul_false_is_a_leaf() {
        let json = r#"{"root": {"matmul": false, "h": 3, "w": 4, "init": "eye"}}"#;
        let settings = Settings::from_json_str(json).unwrap();
        let NodeConfig::Leaf(leaf) = &settings.root else {
            panic!("root should be a leaf");
        };
        assert_eq!((leaf.h, leaf.w, leaf.init), (3, 4, Initializer::Eye));

        let confused = r#"{"root": {"matmul": false, "left": {"h": 2, "w": 2}, "right": {"h": 2, "w": 2}}}"#;
        let err = Settings::from_json_str(confused).unwrap_err().to_string();
        assert!(err.contains("leaf") && err.contains("left"), "{}", err);
    }

    #[test]
    fn test_next_flips_orientation() {
        let layout = LayoutConfig::default();
        let next = layout.next();
        assert_eq!(next.polarity, Polarity::Negative);
        assert_eq!(next.left_placement, LeftPlacement::Right);
        assert_eq!(next.right_placement, RightPlacement::Bottom);
        assert_eq!(next.result_placement, layout.result_placement);
        assert_eq!(next.next(), layout);
        assert_eq!(layout.at_depth(3), next);
    }

    #[test]
    fn test_spread_threshold() {
        let layout = LayoutConfig { scatter: 0.5, molecule: 2, blast: 2.0, ..LayoutConfig::default() };
        assert_eq!(layout.spread(2), 0.0);
        assert_eq!(layout.spread(4), 8.0);
    }

    #[test]
    fn test_validate_reports_mismatch() {
        let left = LeafConfig::new(2, 3, Initializer::Eye);
        let right = LeafConfig::new(4, 2, Initializer::Eye);
        let root: NodeConfig = MatMulConfig::new(left.into(), right.into()).into();
        let diagnostics = Diagnostics::new();
        root.validate("root", &diagnostics);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics.entries()[0].message.contains("inner dimensions"));
    }

    #[test]
    fn test_settings_json_round_trip() {
        let settings = Settings::default();
        let json = settings.to_json().unwrap();
        assert_eq!(Settings::from_json_str(&json).unwrap(), settings);
    }
}
