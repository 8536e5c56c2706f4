//! Value-to-appearance mapping
//!
//! A cell's point size and color are pure functions of its value and the
//! value range selected by the sensitivity mode. Size follows a cube-root
//! volume curve so perceived magnitude grows linearly; hue moves away from
//! `zero_hue` in opposite directions for positive and negative values.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::cell::Cell;
use std::rc::Rc;

use mmviz_core::config::{Sensitivity, VizConfig};
use mmviz_core::NumericGrid;

use crate::engine::platform::Color;

/// Magnitude range a cell is scaled against
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueRange {
    pub absmin: f32,
    pub absmax: f32,
}

impl ValueRange {
    pub fn new(absmin: f32, absmax: f32) -> Self {
        Self { absmin, absmax }
    }

    /// Position of `|x|` within the range, in `[0, 1]`
    ///
    /// With `floor` the range starts at `absmin` instead of zero.
    pub fn fraction(&self, x: f32, floor: bool) -> f32 {
        let base = if floor { self.absmin } else { 0.0 };
        let span = self.absmax - base;
        if span.is_nan() || span <= 0.0 || !x.is_finite() {
            return 0.0;
        }
        ((x.abs() - base) / span).clamp(0.0, 1.0)
    }
}

/// Read-only handle to the largest magnitude across a node tree
///
/// The root node publishes into it; every mat in the tree reads it when
/// running with global sensitivity. Clones share the value.
#[derive(Debug, Clone, Default)]
pub struct GlobalRange {
    absmax: Rc<Cell<Option<f32>>>,
}

impl GlobalRange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<f32> {
        self.absmax.get()
    }

    pub fn publish(&self, absmax: f32) {
        self.absmax.set(Some(absmax));
    }

    pub fn clear(&self) {
        self.absmax.set(None);
    }
}

/// Range for a grid under the given sensitivity
pub fn range_for(grid: &NumericGrid, sensitivity: Sensitivity, global: &GlobalRange) -> ValueRange {
    match sensitivity {
        Sensitivity::Global => ValueRange::new(0.0, global.get().unwrap_or_else(|| grid.absmax())),
        Sensitivity::Local | Sensitivity::Superlocal => ValueRange::new(grid.absmin(), grid.absmax()),
    }
}

fn fraction(x: f32, range: ValueRange, viz: &VizConfig) -> f32 {
    range.fraction(x, viz.sensitivity == Sensitivity::Superlocal)
}

/// Point size for a value, in cell units
pub fn size_from_data(x: f32, range: ValueRange, viz: &VizConfig) -> f32 {
    let min = viz.min_size.clamp(0.0, 1.0);
    min + (1.0 - min) * fraction(x, range, viz).cbrt()
}

/// Point color for a value
pub fn color_from_data(x: f32, range: ValueRange, viz: &VizConfig) -> Color {
    let frac = fraction(x, range, viz);
    let offset = viz.hue_gap / 2.0 + frac * viz.hue_spread;
    let hue = if x > 0.0 {
        viz.zero_hue + offset
    } else if x < 0.0 {
        viz.zero_hue - offset
    } else {
        viz.zero_hue
    };
    let light = viz.min_light + (viz.max_light - viz.min_light) * frac;
    hsl_to_rgb(hue, 1.0, light)
}

/// HSL (hue in degrees) to opaque RGB
pub fn hsl_to_rgb(hue: f32, saturation: f32, lightness: f32) -> Color {
    let h = hue.rem_euclid(360.0) / 60.0;
    let l = lightness.clamp(0.0, 1.0);
    let s = saturation.clamp(0.0, 1.0);
    let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
    let x = c * (1.0 - (h % 2.0 - 1.0).abs());
    let (r, g, b) = match h as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = l - c / 2.0;
    Color::rgb(r + m, g + m, b + m)
}
