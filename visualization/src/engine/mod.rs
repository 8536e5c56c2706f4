//! Renderer capability and its in-memory implementation
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

pub mod headless;
pub mod platform;

pub use self::headless::SceneGraph;
pub use self::platform::{CameraPose, Color, GroupHandle, PointsHandle, Renderer, SceneObject};
