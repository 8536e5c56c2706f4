//! Spatial arrangement of a matmul node
//!
//! Node space puts product `(i, j, k)` at `(x_k, -y_i, polarity * z_j)`.
//! The result is a plane of constant z, the left operand a plane of
//! constant x, the right operand a plane of constant y. Every plane maps a
//! mat's local `(col, -row, 0)` cell coordinates onto the matching product
//! coordinates, so rows and columns line up across all three.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::f32::consts::FRAC_PI_2;

use glam::{Affine3A, Quat, Vec3};

use mmviz_core::config::{LayoutConfig, LeftPlacement, ResultPlacement, RightPlacement};
use mmviz_core::Axis;

use crate::view::mat::{axis_coords, CellGeometry};

/// Coordinates of every index along the three axes
#[derive(Debug, Clone, PartialEq)]
pub struct AxisCoords {
    pub i: Vec<f32>,
    pub j: Vec<f32>,
    pub k: Vec<f32>,
}

impl AxisCoords {
    /// `lens` and `counts` are ordered `[i, j, k]`
    pub fn new(lens: [usize; 3], counts: [usize; 3], gap: f32) -> Self {
        Self {
            i: axis_coords(lens[0], counts[0], gap),
            j: axis_coords(lens[1], counts[1], gap),
            k: axis_coords(lens[2], counts[2], gap),
        }
    }

    pub fn get(&self, axis: Axis) -> &[f32] {
        match axis {
            Axis::I => &self.i,
            Axis::J => &self.j,
            Axis::K => &self.k,
        }
    }

    /// Geometry of a mat whose rows and columns run along the given axes
    pub fn geometry(&self, rows: Axis, row_range: std::ops::Range<usize>, cols: Axis, col_range: std::ops::Range<usize>) -> CellGeometry {
        CellGeometry::new(self.get(rows)[row_range].to_vec(), self.get(cols)[col_range].to_vec())
    }

    fn last(coords: &[f32]) -> f32 {
        coords.last().copied().unwrap_or(0.0)
    }

    fn mid(coords: &[f32]) -> f32 {
        (coords.first().copied().unwrap_or(0.0) + Self::last(coords)) * 0.5
    }
}

/// Resolved transforms for one node
#[derive(Debug, Clone, PartialEq)]
pub struct NodeLayout {
    pub coords: AxisCoords,
    pub polarity: f32,
    pub left: Affine3A,
    pub right: Affine3A,
    pub result: Affine3A,
}

impl NodeLayout {
    /// `spread` is the scatter push for this node's subtree
    pub fn new(coords: AxisCoords, cfg: &LayoutConfig, spread: f32) -> Self {
        let polarity = cfg.polarity.sign();
        let gap = cfg.gap;
        let depth = AxisCoords::last(&coords.j);

        let result_z = match cfg.result_placement {
            ResultPlacement::Front => -polarity * gap,
            ResultPlacement::Back => polarity * (depth + gap),
        };
        let left_x = match cfg.left_placement {
            LeftPlacement::Left => -gap - spread,
            LeftPlacement::Right => AxisCoords::last(&coords.k) + gap + spread,
        };
        let right_y = match cfg.right_placement {
            RightPlacement::Top => gap + spread,
            RightPlacement::Bottom => -AxisCoords::last(&coords.i) - gap - spread,
        };

        Self {
            left: left_plane(polarity, left_x),
            right: right_plane(polarity, right_y),
            result: result_plane(result_z),
            coords,
            polarity,
        }
    }

    /// Node-space position of product `(i, j, k)`
    pub fn product(&self, i: usize, j: usize, k: usize) -> Vec3 {
        Vec3::new(self.coords.k[k], -self.coords.i[i], self.polarity * self.coords.j[j])
    }

    /// Plane holding a `j x k` slice at row `i`
    pub fn row_slice(&self, i: usize) -> Affine3A {
        right_plane(self.polarity, -self.coords.i[i])
    }

    /// Plane holding an `i x j` slice at column `k`
    pub fn col_slice(&self, k: usize) -> Affine3A {
        left_plane(self.polarity, self.coords.k[k])
    }

    /// Plane holding an `i x k` slice at depth `j`, offset by `dz`
    pub fn depth_slice(&self, j: usize, dz: f32) -> Affine3A {
        result_plane(self.polarity * (self.coords.j[j] + dz))
    }

    /// Segments tying each left row to its result row, then each right
    /// column to its result column
    pub fn flow_guides(&self) -> Vec<(Vec3, Vec3)> {
        let c = &self.coords;
        let (mid_i, mid_j, mid_k) = (AxisCoords::mid(&c.i), AxisCoords::mid(&c.j), AxisCoords::mid(&c.k));
        let rows = c.i.iter().map(|&y| {
            let from = self.left.transform_point3(Vec3::new(mid_j, -y, 0.0));
            let to = self.result.transform_point3(Vec3::new(mid_k, -y, 0.0));
            (from, to)
        });
        let cols = c.k.iter().map(|&x| {
            let from = self.right.transform_point3(Vec3::new(x, -mid_j, 0.0));
            let to = self.result.transform_point3(Vec3::new(x, -mid_i, 0.0));
            (from, to)
        });
        rows.chain(cols).collect()
    }
}

/// Result-style plane at depth `z`
pub fn result_plane(z: f32) -> Affine3A {
    Affine3A::from_translation(Vec3::new(0.0, 0.0, z))
}

/// Left-style plane at `x`: local x runs along `polarity * z`
pub fn left_plane(polarity: f32, x: f32) -> Affine3A {
    Affine3A::from_rotation_translation(Quat::from_rotation_y(-polarity * FRAC_PI_2), Vec3::new(x, 0.0, 0.0))
}

/// Right-style plane at `y`: local -y runs along `polarity * z`
pub fn right_plane(polarity: f32, y: f32) -> Affine3A {
    Affine3A::from_rotation_translation(Quat::from_rotation_x(-polarity * FRAC_PI_2), Vec3::new(0.0, y, 0.0))
}

/// Transform for a nested child node so its result lands on `slot`
pub fn nest(slot: Affine3A, child_result: Affine3A) -> Affine3A {
    slot * child_result.inverse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mmviz_core::config::Polarity;

    fn close(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-4
    }

    fn layout(polarity: Polarity) -> NodeLayout {
        let cfg = LayoutConfig { polarity, ..LayoutConfig::default() };
        NodeLayout::new(AxisCoords::new([3, 4, 5], [1, 2, 1], 1.0), &cfg, 0.0)
    }

    #[test]
    fn test_operand_cells_align_with_products() {
        for polarity in [Polarity::Positive, Polarity::Negative] {
            let l = layout(polarity);
            let left = l.coords.geometry(Axis::I, 0..3, Axis::J, 0..4);
            let right = l.coords.geometry(Axis::J, 0..4, Axis::K, 0..5);
            let (i, j, k) = (2, 3, 1);
            let p = l.product(i, j, k);

            let on_left = l.left.transform_point3(left.position(i, j));
            assert!((on_left.y - p.y).abs() < 1e-4 && (on_left.z - p.z).abs() < 1e-4, "{:?}", polarity);

            let on_right = l.right.transform_point3(right.position(j, k));
            assert!((on_right.x - p.x).abs() < 1e-4 && (on_right.z - p.z).abs() < 1e-4, "{:?}", polarity);

            let slice = l.coords.geometry(Axis::J, 0..4, Axis::K, 0..5);
            assert!(close(l.row_slice(i).transform_point3(slice.position(j, k)), p));
            let slice = l.coords.geometry(Axis::I, 0..3, Axis::J, 0..4);
            assert!(close(l.col_slice(k).transform_point3(slice.position(i, j)), p));
        }
    }

    #[test]
    fn test_placements_sit_outside_the_cube() {
        let l = layout(Polarity::Positive);
        // j coords with a gap after the second index: 0, 1, 3, 4
        assert_eq!(l.coords.j, vec![0.0, 1.0, 3.0, 4.0]);
        assert!(l.result.translation.z < 0.0);
        assert!(l.left.translation.x < 0.0);
        assert!(l.right.translation.y > 0.0);

        let cfg = LayoutConfig { result_placement: ResultPlacement::Back, ..LayoutConfig::default() }.next();
        let flipped = NodeLayout::new(AxisCoords::new([3, 4, 5], [1, 2, 1], 1.0), &cfg, 0.0);
        assert!(flipped.result.translation.z < -4.0);
        assert!(flipped.left.translation.x > 4.0);
        assert!(flipped.right.translation.y < -2.0);
    }

    #[test]
    fn test_flow_guides_follow_rows_and_columns() {
        for polarity in [Polarity::Positive, Polarity::Negative] {
            let l = layout(polarity);
            let guides = l.flow_guides();
            assert_eq!(guides.len(), 3 + 5);
            for (i, (from, to)) in guides[..3].iter().enumerate() {
                assert!((from.y + l.coords.i[i]).abs() < 1e-4 && (to.y + l.coords.i[i]).abs() < 1e-4);
                assert!((from.x - l.left.translation.x).abs() < 1e-4);
                assert!((to.z - l.result.translation.z).abs() < 1e-4);
            }
            for (k, (from, to)) in guides[3..].iter().enumerate() {
                assert!((from.x - l.coords.k[k]).abs() < 1e-4 && (to.x - l.coords.k[k]).abs() < 1e-4);
                assert!((from.y - l.right.translation.y).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn test_spread_pushes_operands_out() {
        let cfg = LayoutConfig::default();
        let near = NodeLayout::new(AxisCoords::new([2, 2, 2], [1, 1, 1], 1.0), &cfg, 0.0);
        let far = NodeLayout::new(AxisCoords::new([2, 2, 2], [1, 1, 1], 1.0), &cfg, 3.0);
        assert_eq!(far.left.translation.x, near.left.translation.x - 3.0);
        assert_eq!(far.right.translation.y, near.right.translation.y + 3.0);
    }

    #[test]
    fn test_nest_lands_child_result_on_slot() {
        let parent = layout(Polarity::Positive);
        let child = layout(Polarity::Negative);
        let t = nest(parent.left, child.result);
        let cell = Vec3::new(2.0, -1.0, 0.0);
        assert!(close((t * child.result).transform_point3(cell), parent.left.transform_point3(cell)));
    }
}
