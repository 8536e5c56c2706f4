//! Result epilogs
//!
//! An epilog is a stateless finishing transform applied to a completed
//! result grid. Some epilogs are purely elementwise and can also be applied
//! to individual dot products as they are computed; softmax and layernorm
//! need whole-row or whole-matrix statistics and only run on full grids.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

const LAYERNORM_EPS: f64 = 1e-5;

closed_set! {
    /// Post-processing transform for a freshly computed result
    ///
    /// `j` in the user-facing names is the inner (reduction) dimension.
    pub enum Epilog: "epilog" {
        None => "none",
        ScaleByDepth => "x/j",
        ScaleBySqrtDepth => "x/sqrt(j)",
        Softmax => "softmax(x/sqrt(j))",
        Tanh => "tanh",
        Relu => "relu",
        LayerNorm => "layernorm",
    }
}

impl Default for Epilog {
    fn default() -> Self {
        Epilog::None
    }
}

impl Epilog {
    /// Whether the whole epilog is its elementwise stage
    pub fn is_elementwise(self) -> bool {
        !matches!(self, Epilog::Softmax | Epilog::LayerNorm)
    }

    /// Elementwise stage for a single value
    ///
    /// For softmax this is the `x / sqrt(j)` scaling only; layernorm has no
    /// elementwise stage.
    pub fn scalar(self, x: f32, depth: usize) -> f32 {
        let d = depth.max(1) as f32;
        match self {
            Epilog::None | Epilog::LayerNorm => x,
            Epilog::ScaleByDepth => x / d,
            Epilog::ScaleBySqrtDepth | Epilog::Softmax => x / d.sqrt(),
            Epilog::Tanh => x.tanh(),
            Epilog::Relu => x.max(0.0),
        }
    }

    /// Applies the full epilog to a row-major `h x w` buffer
    pub fn apply(self, data: &mut [f32], h: usize, w: usize, depth: usize) {
        debug_assert_eq!(data.len(), h * w);
        match self {
            Epilog::None => {}
            Epilog::Softmax => {
                for x in data.iter_mut() {
                    *x = self.scalar(*x, depth);
                }
                if w > 0 {
                    for row in data.chunks_mut(w) {
                        softmax_in_place(row);
                    }
                }
            }
            Epilog::LayerNorm => layernorm_in_place(data),
            _ => {
                for x in data.iter_mut() {
                    *x = self.scalar(*x, depth);
                }
            }
        }
    }
}

/// Numerically stable softmax over one row
pub fn softmax_in_place(row: &mut [f32]) {
    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return;
    }
    let mut sum = 0.0f32;
    for x in row.iter_mut() {
        *x = (*x - max).exp();
        sum += *x;
    }
    if sum > 0.0 {
        for x in row.iter_mut() {
            *x /= sum;
        }
    }
}

/// Normalizes a whole buffer to zero mean and unit variance
///
/// Statistics accumulate in f64 so sums of values near `f32::MAX` stay
/// finite.
pub fn layernorm_in_place(data: &mut [f32]) {
    if data.is_empty() {
        return;
    }
    let n = data.len() as f64;
    let mean = data.iter().map(|x| f64::from(*x)).sum::<f64>() / n;
    let var = data
        .iter()
        .map(|x| {
            let d = f64::from(*x) - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    let denom = (var + LAYERNORM_EPS).sqrt();
    for x in data.iter_mut() {
        *x = ((f64::from(*x) - mean) / denom) as f32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_is_identity() {
        let mut data = vec![1.5, -2.0, 0.0, 7.25];
        let before = data.clone();
        Epilog::None.apply(&mut data, 2, 2, 3);
        assert_eq!(data, before);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let mut data = vec![1.0, 2.0, 3.0, -100.0, 0.0, 100.0, 5.0, 5.0, 5.0];
        Epilog::Softmax.apply(&mut data, 3, 3, 4);
        for row in data.chunks(3) {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5, "row {:?}", row);
            assert!(row.iter().all(|x| *x >= 0.0));
        }
    }

    #[test]
    fn test_scaling_epilogs() {
        assert_eq!(Epilog::ScaleByDepth.scalar(8.0, 4), 2.0);
        assert_eq!(Epilog::ScaleBySqrtDepth.scalar(8.0, 4), 4.0);
        assert_eq!(Epilog::Relu.scalar(-1.0, 4), 0.0);
        assert_eq!(Epilog::ScaleByDepth.scalar(3.0, 0), 3.0);
        assert!(!Epilog::Softmax.is_elementwise());
        assert!(Epilog::Tanh.is_elementwise());
    }

    #[test]
    fn test_layernorm_statistics() {
        let mut data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        Epilog::LayerNorm.apply(&mut data, 2, 3, 1);
        let mean: f32 = data.iter().sum::<f32>() / 6.0;
        let var: f32 = data.iter().map(|x| x * x).sum::<f32>() / 6.0;
        assert!(mean.abs() < 1e-5);
        assert!((var - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_layernorm_near_f32_max_stays_finite() {
        let mut data = vec![3e38, 3e38, -3e38, 1.0];
        Epilog::LayerNorm.apply(&mut data, 2, 2, 1);
        assert!(data.iter().all(|x| x.is_finite()), "{:?}", data);
        assert!(data[0] > 0.0 && data[2] < 0.0);

        let mut flat = vec![3e38, 3e38];
        Epilog::LayerNorm.apply(&mut flat, 1, 2, 1);
        assert_eq!(flat, vec![0.0, 0.0]);
    }

    #[test]
    fn test_names_round_trip() {
        for e in Epilog::ALL {
            assert_eq!(e.name().parse::<Epilog>().unwrap(), *e);
        }
        assert!("sigmoid".parse::<Epilog>().is_err());
        let json = serde_json::to_string(&Epilog::Softmax).unwrap();
        assert_eq!(json, "\"softmax(x/sqrt(j))\"");
    }
}
