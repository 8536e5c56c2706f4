//! In-memory scene graph
//!
//! Implements [`Renderer`] without a GPU: every object lives in a map keyed
//! by id, with a parent link and a local transform. World transforms are
//! composed on demand, and raycasts are answered geometrically against a
//! pick ray set by the host.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::collections::HashMap;

use glam::{Affine3A, Vec3};
use log::{debug, warn};

use super::platform::{
    Aabb, CameraPose, Color, GroupHandle, LinesHandle, PointsHandle, RaycastHit, Renderer, SceneObject,
    TextHandle,
};

/// Width of one glyph relative to text size
const GLYPH_ASPECT: f32 = 0.6;

/// Point cloud contents
#[derive(Debug, Clone, PartialEq)]
pub struct Cloud {
    pub positions: Vec<Vec3>,
    pub sizes: Vec<f32>,
    pub colors: Vec<Color>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextMesh {
    pub text: String,
    pub color: Color,
    pub size: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Points(Cloud),
    Group(Vec<SceneObject>),
    Text(TextMesh),
    Lines { segments: Vec<(Vec3, Vec3)>, color: Color },
}

#[derive(Debug, Clone)]
struct Entry {
    payload: Payload,
    parent: Option<u32>,
    transform: Affine3A,
}

/// Ray used for spotlight picking
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PickRay {
    pub origin: Vec3,
    pub direction: Vec3,
}

/// Counters for leak checks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SceneStats {
    pub created: usize,
    pub disposed: usize,
}

/// Headless [`Renderer`]
#[derive(Debug, Clone, Default)]
pub struct SceneGraph {
    entries: HashMap<u32, Entry>,
    next_id: u32,
    camera: CameraPose,
    pick: Option<PickRay>,
    stats: SceneStats,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_camera(&mut self, camera: CameraPose) {
        self.camera = camera;
    }

    pub fn set_pick_ray(&mut self, ray: Option<PickRay>) {
        self.pick = ray.map(|r| PickRay { origin: r.origin, direction: r.direction.normalize_or_zero() });
    }

    pub fn stats(&self) -> SceneStats {
        self.stats
    }

    /// Objects created and not yet disposed
    pub fn live_objects(&self) -> usize {
        self.entries.len()
    }

    pub fn is_live(&self, object: SceneObject) -> bool {
        self.entries.contains_key(&object.id())
    }

    pub fn cloud(&self, points: PointsHandle) -> Option<&Cloud> {
        match self.entries.get(&points.0).map(|e| &e.payload) {
            Some(Payload::Points(cloud)) => Some(cloud),
            _ => None,
        }
    }

    pub fn text(&self, text: TextHandle) -> Option<&TextMesh> {
        match self.entries.get(&text.0).map(|e| &e.payload) {
            Some(Payload::Text(mesh)) => Some(mesh),
            _ => None,
        }
    }

    pub fn lines(&self, lines: LinesHandle) -> Option<&[(Vec3, Vec3)]> {
        match self.entries.get(&lines.0).map(|e| &e.payload) {
            Some(Payload::Lines { segments, .. }) => Some(segments),
            _ => None,
        }
    }

    /// All live text meshes
    pub fn texts(&self) -> impl Iterator<Item = &TextMesh> + '_ {
        self.entries.values().filter_map(|e| match &e.payload {
            Payload::Text(mesh) => Some(mesh),
            _ => None,
        })
    }

    pub fn parent_of(&self, object: SceneObject) -> Option<GroupHandle> {
        self.entries.get(&object.id()).and_then(|e| e.parent).map(GroupHandle)
    }

    pub fn children(&self, group: GroupHandle) -> &[SceneObject] {
        match self.entries.get(&group.0).map(|e| &e.payload) {
            Some(Payload::Group(children)) => children,
            _ => &[],
        }
    }

    /// Local transform composed with every ancestor's
    pub fn world_transform(&self, object: SceneObject) -> Affine3A {
        let mut transform = Affine3A::IDENTITY;
        let mut cursor = Some(object.id());
        while let Some(id) = cursor {
            match self.entries.get(&id) {
                Some(entry) => {
                    transform = entry.transform * transform;
                    cursor = entry.parent;
                }
                None => break,
            }
        }
        transform
    }

    /// World position of one point
    pub fn world_position(&self, points: PointsHandle, index: usize) -> Option<Vec3> {
        let cloud = self.cloud(points)?;
        let local = *cloud.positions.get(index)?;
        Some(self.world_transform(points.into()).transform_point3(local))
    }

    fn insert(&mut self, payload: Payload) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.stats.created += 1;
        self.entries.insert(
            id,
            Entry {
                payload,
                parent: None,
                transform: Affine3A::IDENTITY,
            },
        );
        id
    }

    fn cloud_mut(&mut self, points: PointsHandle) -> Option<&mut Cloud> {
        match self.entries.get_mut(&points.0).map(|e| &mut e.payload) {
            Some(Payload::Points(cloud)) => Some(cloud),
            _ => None,
        }
    }

    fn detach(&mut self, id: u32) {
        let parent = self.entries.get_mut(&id).and_then(|e| e.parent.take());
        if let Some(Payload::Group(children)) = parent.and_then(|p| self.entries.get_mut(&p)).map(|e| &mut e.payload)
        {
            children.retain(|c| c.id() != id);
        }
    }
}

impl Renderer for SceneGraph {
    fn create_point_cloud(&mut self, positions: &[Vec3], sizes: &[f32], colors: &[Color]) -> PointsHandle {
        assert!(
            positions.len() == sizes.len() && sizes.len() == colors.len(),
            "point cloud attribute lengths differ: {} positions, {} sizes, {} colors",
            positions.len(),
            sizes.len(),
            colors.len()
        );
        PointsHandle(self.insert(Payload::Points(Cloud {
            positions: positions.to_vec(),
            sizes: sizes.to_vec(),
            colors: colors.to_vec(),
        })))
    }

    fn set_point_size(&mut self, points: PointsHandle, index: usize, size: f32) {
        match self.cloud_mut(points) {
            Some(cloud) => cloud.sizes[index] = size,
            None => debug!("size update for disposed cloud {:?}", points),
        }
    }

    fn set_point_color(&mut self, points: PointsHandle, index: usize, color: Color) {
        match self.cloud_mut(points) {
            Some(cloud) => cloud.colors[index] = color,
            None => debug!("color update for disposed cloud {:?}", points),
        }
    }

    fn create_group(&mut self) -> GroupHandle {
        GroupHandle(self.insert(Payload::Group(Vec::new())))
    }

    fn add_to_group(&mut self, group: GroupHandle, child: SceneObject) {
        if !self.entries.contains_key(&child.id()) {
            warn!("cannot attach unknown object {:?}", child);
            return;
        }
        self.detach(child.id());
        match self.entries.get_mut(&group.0).map(|e| &mut e.payload) {
            Some(Payload::Group(children)) => children.push(child),
            _ => {
                warn!("cannot attach {:?} to unknown group {:?}", child, group);
                return;
            }
        }
        if let Some(entry) = self.entries.get_mut(&child.id()) {
            entry.parent = Some(group.0);
        }
    }

    fn remove_from_group(&mut self, group: GroupHandle, child: SceneObject) {
        if self.parent_of(child) == Some(group) {
            self.detach(child.id());
        }
    }

    fn set_transform(&mut self, object: SceneObject, transform: Affine3A) {
        if let Some(entry) = self.entries.get_mut(&object.id()) {
            entry.transform = transform;
        }
    }

    fn dispose(&mut self, object: SceneObject) {
        self.detach(object.id());
        let mut pending = vec![object.id()];
        while let Some(id) = pending.pop() {
            if let Some(entry) = self.entries.remove(&id) {
                self.stats.disposed += 1;
                if let Payload::Group(children) = entry.payload {
                    pending.extend(children.iter().map(|c| c.id()));
                }
            }
        }
    }

    fn camera_pose(&self) -> CameraPose {
        self.camera
    }

    fn create_text_mesh(&mut self, text: &str, color: Color, size: f32) -> TextHandle {
        TextHandle(self.insert(Payload::Text(TextMesh {
            text: text.to_owned(),
            color,
            size,
        })))
    }

    fn text_bounds(&self, text: TextHandle) -> Aabb {
        match self.text(text) {
            Some(mesh) => Aabb {
                min: Vec3::ZERO,
                max: Vec3::new(mesh.text.chars().count() as f32 * mesh.size * GLYPH_ASPECT, mesh.size, 0.0),
            },
            None => Aabb { min: Vec3::ZERO, max: Vec3::ZERO },
        }
    }

    fn create_lines(&mut self, segments: &[(Vec3, Vec3)], color: Color) -> LinesHandle {
        LinesHandle(self.insert(Payload::Lines {
            segments: segments.to_vec(),
            color,
        }))
    }

    fn raycast_points(&self, points: PointsHandle, threshold: f32) -> Vec<RaycastHit> {
        let (Some(ray), Some(cloud)) = (self.pick, self.cloud(points)) else {
            return Vec::new();
        };
        let world = self.world_transform(points.into());
        let mut hits: Vec<RaycastHit> = cloud
            .positions
            .iter()
            .enumerate()
            .filter_map(|(index, p)| {
                let offset = world.transform_point3(*p) - ray.origin;
                let along = offset.dot(ray.direction);
                if along < 0.0 {
                    return None;
                }
                let miss = (offset - ray.direction * along).length();
                (miss <= threshold).then_some(RaycastHit { index, distance: along })
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispose_group_removes_descendants() {
        let mut scene = SceneGraph::new();
        let outer = scene.create_group();
        let inner = scene.create_group();
        let cloud = scene.create_point_cloud(&[Vec3::ZERO], &[1.0], &[Color::WHITE]);
        scene.add_to_group(outer, inner.into());
        scene.add_to_group(inner, cloud.into());
        assert_eq!(scene.live_objects(), 3);

        scene.dispose(outer.into());
        assert_eq!(scene.live_objects(), 0);
        assert_eq!(scene.stats(), SceneStats { created: 3, disposed: 3 });
    }

    #[test]
    fn test_world_transform_composes_parents() {
        let mut scene = SceneGraph::new();
        let group = scene.create_group();
        let cloud = scene.create_point_cloud(&[Vec3::X], &[1.0], &[Color::WHITE]);
        scene.add_to_group(group, cloud.into());
        scene.set_transform(group.into(), Affine3A::from_translation(Vec3::new(0.0, 5.0, 0.0)));
        scene.set_transform(cloud.into(), Affine3A::from_translation(Vec3::new(1.0, 0.0, 0.0)));
        assert_eq!(scene.world_position(cloud, 0), Some(Vec3::new(2.0, 5.0, 0.0)));
    }

    #[test]
    fn test_raycast_hits_nearest_first() {
        let mut scene = SceneGraph::new();
        let positions = [Vec3::new(0.0, 0.0, 0.0), Vec3::new(0.0, 0.0, -3.0), Vec3::new(4.0, 0.0, 0.0)];
        let cloud = scene.create_point_cloud(&positions, &[1.0; 3], &[Color::WHITE; 3]);
        assert!(scene.raycast_points(cloud, 0.5).is_empty());

        scene.set_pick_ray(Some(PickRay { origin: Vec3::new(0.0, 0.0, 10.0), direction: Vec3::NEG_Z }));
        let hits = scene.raycast_points(cloud, 0.5);
        assert_eq!(hits.iter().map(|h| h.index).collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_reparenting_detaches_from_old_group() {
        let mut scene = SceneGraph::new();
        let a = scene.create_group();
        let b = scene.create_group();
        let text = scene.create_text_mesh("L", Color::WHITE, 0.5);
        scene.add_to_group(a, text.into());
        scene.add_to_group(b, text.into());
        assert!(scene.children(a).is_empty());
        assert_eq!(scene.parent_of(text.into()), Some(b));
        assert_eq!(scene.text_bounds(text).size().x, 0.3);

        scene.remove_from_group(b, text.into());
        assert_eq!(scene.parent_of(text.into()), None);
    }
}
