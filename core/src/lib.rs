//! mmviz core: numerics, tiling and configuration for matmul visualization
//!
//! This crate holds everything the animation engine needs that does not
//! touch a renderer: dense numeric grids with tracked extrema, the block
//! iterator used for tiled sweeps, epilogs, leaf initializers, the typed
//! configuration tree, and a small expression front-end that builds
//! configuration trees from algebraic expressions like `(Q @ K) @ V`.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

/// Declares a closed set of named variants.
///
/// Each variant carries the exact user-facing name used by configuration
/// files and control panels. The generated type implements `FromStr`,
/// `Display` and serde with those names, and exposes `ALL` for enumeration.
macro_rules! closed_set {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident : $kind:literal {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        $vis enum $name {
            $( $(#[$vmeta])* #[serde(rename = $text)] $variant ),+
        }

        impl $name {
            /// Every recognized variant, in declaration order
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// User-facing name of the variant
            pub fn name(self) -> &'static str {
                match self {
                    $( $name::$variant => $text ),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.name())
            }
        }

        impl std::str::FromStr for $name {
            type Err = crate::config::ConfigError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = s.trim();
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.name() == wanted)
                    .ok_or_else(|| crate::config::ConfigError::UnknownName {
                        kind: $kind,
                        name: s.to_owned(),
                    })
            }
        }
    };
}

pub mod algorithm;
pub mod config;
pub mod data_structures;
pub mod diagnostics;
pub mod expr;
pub mod presets;

pub use algorithm::epilog::Epilog;
pub use algorithm::init::Initializer;
pub use algorithm::schedule::{Algorithm, FuseMode};
pub use config::{ConfigError, LeafConfig, MatMulConfig, NodeConfig, Settings};
pub use data_structures::blocks::{Axis, Block, BlockGrid, Tile};
pub use data_structures::grid::{GridError, NumericGrid, Region};
pub use diagnostics::{Diagnostic, Diagnostics, Severity};

/// Crate version, reported by hosts in snapshots and logs
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
