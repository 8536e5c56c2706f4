//! Renderer capability consumed by the matmul engine
//!
//! The engine never draws anything itself. It feeds per-cell position,
//! size and color to point clouds, arranges them in groups with affine
//! transforms, and asks the renderer for camera pose, text meshes and
//! point picking. Any scene graph that implements [`Renderer`] can host a
//! visualization; [`crate::engine::headless::SceneGraph`] is the in-memory
//! implementation used by tests and the demo binary.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use glam::{Affine3A, Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Handle to a point cloud
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PointsHandle(pub u32);

/// Handle to a transform group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupHandle(pub u32);

/// Handle to a text mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextHandle(pub u32);

/// Handle to a set of line segments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinesHandle(pub u32);

/// Any object the renderer can place, group or dispose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SceneObject {
    Points(PointsHandle),
    Group(GroupHandle),
    Text(TextHandle),
    Lines(LinesHandle),
}

impl SceneObject {
    pub fn id(self) -> u32 {
        match self {
            SceneObject::Points(PointsHandle(id))
            | SceneObject::Group(GroupHandle(id))
            | SceneObject::Text(TextHandle(id))
            | SceneObject::Lines(LinesHandle(id)) => id,
        }
    }
}

impl From<PointsHandle> for SceneObject {
    fn from(h: PointsHandle) -> Self {
        SceneObject::Points(h)
    }
}

impl From<GroupHandle> for SceneObject {
    fn from(h: GroupHandle) -> Self {
        SceneObject::Group(h)
    }
}

impl From<TextHandle> for SceneObject {
    fn from(h: TextHandle) -> Self {
        SceneObject::Text(h)
    }
}

impl From<LinesHandle> for SceneObject {
    fn from(h: LinesHandle) -> Self {
        SceneObject::Lines(h)
    }
}

/// Linear RGBA color, components in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    /// Sentinel written to hidden cells; no data-derived color has zero alpha
    pub const HIDDEN: Color = Color { r: 0.0, g: 0.0, b: 0.0, a: 0.0 };

    pub const WHITE: Color = Color { r: 1.0, g: 1.0, b: 1.0, a: 1.0 };

    pub const GUIDE: Color = Color { r: 0.5, g: 0.5, b: 0.5, a: 1.0 };

    pub fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    /// Adds `amount` to each channel, saturating at 1
    pub fn lighten(self, amount: f32) -> Self {
        Self {
            r: (self.r + amount).min(1.0),
            g: (self.g + amount).min(1.0),
            b: (self.b + amount).min(1.0),
            a: self.a,
        }
    }
}

/// Camera position and orientation in world space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraPose {
    pub position: Vec3,
    pub orientation: Quat,
}

impl Default for CameraPose {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 50.0),
            orientation: Quat::IDENTITY,
        }
    }
}

impl CameraPose {
    /// Camera up vector in world space
    pub fn up(&self) -> Vec3 {
        self.orientation * Vec3::Y
    }

    /// Viewing direction in world space (cameras look down local -Z)
    pub fn forward(&self) -> Vec3 {
        self.orientation * Vec3::NEG_Z
    }
}

/// Axis-aligned bounding box in an object's local space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }
}

/// Point hit by a pick ray
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaycastHit {
    pub index: usize,
    pub distance: f32,
}

/// Scene graph operations the engine relies on
///
/// Objects are created detached; the engine attaches them to groups.
/// Disposing a group disposes everything beneath it. Per-point setters
/// panic on an out-of-range index.
pub trait Renderer {
    fn create_point_cloud(&mut self, positions: &[Vec3], sizes: &[f32], colors: &[Color]) -> PointsHandle;

    fn set_point_size(&mut self, points: PointsHandle, index: usize, size: f32);

    fn set_point_color(&mut self, points: PointsHandle, index: usize, color: Color);

    fn create_group(&mut self) -> GroupHandle;

    fn add_to_group(&mut self, group: GroupHandle, child: SceneObject);

    fn remove_from_group(&mut self, group: GroupHandle, child: SceneObject);

    /// Replaces the object's transform relative to its parent
    fn set_transform(&mut self, object: SceneObject, transform: Affine3A);

    fn dispose(&mut self, object: SceneObject);

    fn camera_pose(&self) -> CameraPose;

    fn create_text_mesh(&mut self, text: &str, color: Color, size: f32) -> TextHandle;

    /// Local bounds of a text mesh
    fn text_bounds(&self, text: TextHandle) -> Aabb;

    fn create_lines(&mut self, segments: &[(Vec3, Vec3)], color: Color) -> LinesHandle;

    /// Points of a cloud within `threshold` of the current pick ray
    fn raycast_points(&self, points: PointsHandle, threshold: f32) -> Vec<RaycastHit>;
}
