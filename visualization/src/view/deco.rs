//! Legends, row guides and spotlight labels
//!
//! Decorations are renderer objects hung off a mat's group. Each sync call
//! is idempotent: objects are created only when missing, removed when
//! disabled, and the legend is re-laid out only when the mat's facing or
//! right-side-up state relative to the camera has changed since the last
//! call.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::f32::consts::PI;

use glam::{Affine3A, Quat, Vec3};
use log::debug;

use crate::engine::platform::{CameraPose, Color, GroupHandle, LinesHandle, PointsHandle, Renderer, TextHandle};

/// Most labels shown for one spotlight pass
pub const MAX_SPOTLIGHT_LABELS: usize = 16;

/// How a mat sits relative to the camera
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Orientation {
    /// Front face (local +Z) points toward the camera
    pub facing: bool,
    /// Local +Y agrees with the camera's up vector
    pub upright: bool,
}

impl Orientation {
    pub fn of(world: &Affine3A, anchor: Vec3, camera: &CameraPose) -> Self {
        let normal = world.transform_vector3(Vec3::Z);
        let up = world.transform_vector3(Vec3::Y);
        let to_camera = camera.position - world.transform_point3(anchor);
        Self {
            facing: normal.dot(to_camera) >= 0.0,
            upright: up.dot(camera.up()) >= 0.0,
        }
    }
}

/// Renderer objects owned by one mat
#[derive(Debug, Default)]
pub struct Decorations {
    legend: Option<TextHandle>,
    orientation: Option<Orientation>,
    guides: Option<LinesHandle>,
    labels: Vec<TextHandle>,
}

impl Decorations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_legend(&self) -> bool {
        self.legend.is_some()
    }

    pub fn has_guides(&self) -> bool {
        self.guides.is_some()
    }

    pub fn labels(&self) -> &[TextHandle] {
        &self.labels
    }

    /// Creates, removes or re-lays out the legend
    ///
    /// `top_left` and `width` describe the mat in its local space. Returns
    /// whether any layout work was done.
    #[allow(clippy::too_many_arguments)]
    pub fn sync_legend(
        &mut self,
        r: &mut dyn Renderer,
        group: GroupHandle,
        text: &str,
        size: f32,
        enabled: bool,
        world: &Affine3A,
        top_left: Vec3,
        width: f32,
    ) -> bool {
        if !enabled || text.is_empty() {
            if let Some(legend) = self.legend.take() {
                r.dispose(legend.into());
                self.orientation = None;
                return true;
            }
            return false;
        }

        let anchor = top_left + Vec3::new(width / 2.0, 0.0, 0.0);
        let orientation = Orientation::of(world, anchor, &r.camera_pose());
        if self.legend.is_some() && self.orientation == Some(orientation) {
            return false;
        }

        let legend = match self.legend {
            Some(legend) => legend,
            None => {
                let legend = r.create_text_mesh(text, Color::WHITE, size);
                r.add_to_group(group, legend.into());
                self.legend = Some(legend);
                legend
            }
        };

        let extent = r.text_bounds(legend).size();
        let mut rotation = Quat::IDENTITY;
        if !orientation.facing {
            rotation = Quat::from_rotation_y(PI) * rotation;
        }
        if !orientation.upright {
            rotation = Quat::from_rotation_z(PI) * rotation;
        }
        // center the text above the mat whichever way it is turned
        let half = rotation * Vec3::new(extent.x / 2.0, extent.y / 2.0, 0.0);
        let center = anchor + Vec3::new(0.0, size + extent.y / 2.0, 0.0);
        r.set_transform(legend.into(), Affine3A::from_rotation_translation(rotation, center - half));

        debug!("legend {:?} laid out as {:?}", text, orientation);
        self.orientation = Some(orientation);
        true
    }

    /// One guide line under each row
    pub fn sync_row_guides(
        &mut self,
        r: &mut dyn Renderer,
        group: GroupHandle,
        enabled: bool,
        row_coords: &[f32],
        col_coords: &[f32],
    ) {
        match (enabled, self.guides) {
            (true, None) => {
                let (Some(&first), Some(&last)) = (col_coords.first(), col_coords.last()) else {
                    return;
                };
                let segments: Vec<(Vec3, Vec3)> = row_coords
                    .iter()
                    .map(|&y| {
                        let y = -y - 0.5;
                        (Vec3::new(first - 0.5, y, 0.0), Vec3::new(last + 0.5, y, 0.0))
                    })
                    .collect();
                let guides = r.create_lines(&segments, Color::GUIDE);
                r.add_to_group(group, guides.into());
                self.guides = Some(guides);
            }
            (false, Some(guides)) => {
                r.dispose(guides.into());
                self.guides = None;
            }
            _ => {}
        }
    }

    /// Replaces value labels with ones for the points under the pick ray
    ///
    /// `label` returns the text and local position for a point, or `None`
    /// for points that should not be labelled (e.g. hidden cells).
    pub fn spotlight<F>(&mut self, r: &mut dyn Renderer, group: GroupHandle, points: PointsHandle, threshold: f32, size: f32, label: F)
    where
        F: Fn(usize) -> Option<(String, Vec3)>,
    {
        self.clear_labels(r);
        if threshold <= 0.0 {
            return;
        }
        let hits = r.raycast_points(points, threshold);
        for hit in hits {
            if self.labels.len() == MAX_SPOTLIGHT_LABELS {
                break;
            }
            let Some((text, at)) = label(hit.index) else { continue };
            let mesh = r.create_text_mesh(&text, Color::WHITE, size);
            r.add_to_group(group, mesh.into());
            r.set_transform(mesh.into(), Affine3A::from_translation(at + Vec3::new(0.0, 0.0, 0.5)));
            self.labels.push(mesh);
        }
    }

    pub fn clear_labels(&mut self, r: &mut dyn Renderer) {
        for label in self.labels.drain(..) {
            r.dispose(label.into());
        }
    }

    /// Disposes everything; the mat group disposal would also catch these
    pub fn dispose(&mut self, r: &mut dyn Renderer) {
        self.clear_labels(r);
        if let Some(legend) = self.legend.take() {
            r.dispose(legend.into());
        }
        if let Some(guides) = self.guides.take() {
            r.dispose(guides.into());
        }
        self.orientation = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::headless::{PickRay, SceneGraph};

    #[test]
    fn test_legend_relayout_only_on_orientation_change() {
        let mut scene = SceneGraph::new();
        let group = scene.create_group();
        let mut deco = Decorations::new();
        let world = Affine3A::IDENTITY;
        let top_left = Vec3::ZERO;

        assert!(deco.sync_legend(&mut scene, group, "A", 0.5, true, &world, top_left, 4.0));
        assert!(!deco.sync_legend(&mut scene, group, "A", 0.5, true, &world, top_left, 4.0));
        assert_eq!(scene.texts().count(), 1);

        scene.set_camera(CameraPose {
            position: Vec3::new(0.0, 0.0, -50.0),
            orientation: Quat::from_rotation_y(PI),
        });
        assert!(deco.sync_legend(&mut scene, group, "A", 0.5, true, &world, top_left, 4.0));
        assert_eq!(scene.texts().count(), 1);

        assert!(deco.sync_legend(&mut scene, group, "A", 0.5, false, &world, top_left, 4.0));
        assert!(!deco.has_legend());
        assert_eq!(scene.texts().count(), 0);
    }

    #[test]
    fn test_row_guides_toggle() {
        let mut scene = SceneGraph::new();
        let group = scene.create_group();
        let mut deco = Decorations::new();
        deco.sync_row_guides(&mut scene, group, true, &[0.0, 1.0], &[0.0, 1.0, 2.0]);
        deco.sync_row_guides(&mut scene, group, true, &[0.0, 1.0], &[0.0, 1.0, 2.0]);
        assert_eq!(scene.children(group).len(), 1);
        deco.sync_row_guides(&mut scene, group, false, &[0.0, 1.0], &[0.0, 1.0, 2.0]);
        assert!(!deco.has_guides());
        assert_eq!(scene.live_objects(), 1);
    }

    #[test]
    fn test_spotlight_labels_hits() {
        let mut scene = SceneGraph::new();
        let group = scene.create_group();
        let positions = [Vec3::ZERO, Vec3::new(3.0, 0.0, 0.0)];
        let points = scene.create_point_cloud(&positions, &[1.0; 2], &[Color::WHITE; 2]);
        scene.add_to_group(group, points.into());
        scene.set_pick_ray(Some(PickRay { origin: Vec3::new(3.0, 0.0, 10.0), direction: Vec3::NEG_Z }));

        let mut deco = Decorations::new();
        deco.spotlight(&mut scene, group, points, 0.4, 0.3, |i| Some((format!("{}", i), positions[i])));
        assert_eq!(deco.labels().len(), 1);
        assert_eq!(scene.text(deco.labels()[0]).map(|t| t.text.as_str()), Some("1"));

        deco.spotlight(&mut scene, group, points, 0.0, 0.3, |_| None);
        assert!(deco.labels().is_empty());
        assert_eq!(scene.texts().count(), 0);
    }
}
