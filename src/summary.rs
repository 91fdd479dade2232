//! Numeric reductions of a trace after burn in.

use itertools::Itertools;

use crate::{
    forward::{SourceParams, NDIM},
    geometry::Point,
    trace::PARAMETER_NAMES,
};

/// Quantile of sorted values with linear interpolation between order statistics.
fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    assert!(!sorted.is_empty());
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    sorted[lower] + frac * (sorted[upper] - sorted[lower])
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterSummary {
    pub name: &'static str,
    pub mean: f64,
    /// Population variance of the draws.
    pub variance: f64,
    pub sd: f64,
    pub q05: f64,
    pub median: f64,
    pub q95: f64,
}

impl ParameterSummary {
    pub fn new(name: &'static str, values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
        let sorted = values.iter().copied().sorted_by(f64::total_cmp).collect_vec();
        Some(Self {
            name,
            mean,
            variance,
            sd: variance.sqrt(),
            q05: quantile_sorted(&sorted, 0.05),
            median: quantile_sorted(&sorted, 0.5),
            q95: quantile_sorted(&sorted, 0.95),
        })
    }
}

/// Per parameter statistics of a set of draws.
#[derive(Debug, Clone, PartialEq)]
pub struct PosteriorSummary {
    parameters: [ParameterSummary; NDIM],
    num_draws: usize,
}

impl PosteriorSummary {
    pub fn from_draws(draws: &[[f64; NDIM]]) -> Option<Self> {
        let mut parameters = Vec::with_capacity(NDIM);
        for (idx, &name) in PARAMETER_NAMES.iter().enumerate() {
            let values = draws.iter().map(|draw| draw[idx]).collect_vec();
            parameters.push(ParameterSummary::new(name, &values)?);
        }
        Some(Self {
            parameters: parameters.try_into().ok()?,
            num_draws: draws.len(),
        })
    }

    pub fn num_draws(&self) -> usize {
        self.num_draws
    }

    pub fn parameters(&self) -> &[ParameterSummary; NDIM] {
        &self.parameters
    }

    pub fn get(&self, name: &str) -> Option<&ParameterSummary> {
        self.parameters.iter().find(|param| param.name == name)
    }

    pub fn mean(&self) -> SourceParams {
        let means: [f64; NDIM] = std::array::from_fn(|i| self.parameters[i].mean);
        means.into()
    }

    pub fn variance(&self) -> [f64; NDIM] {
        std::array::from_fn(|i| self.parameters[i].variance)
    }
}

/// Histogram over equally wide bins spanning the range of the values.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    edges: Vec<f64>,
    counts: Vec<u64>,
}

fn bin_index(value: f64, min: f64, width: f64, bins: usize) -> usize {
    if width == 0. {
        return 0;
    }
    (((value - min) / width) as usize).min(bins - 1)
}

fn edges(min: f64, max: f64, bins: usize) -> Vec<f64> {
    let width = (max - min) / bins as f64;
    (0..=bins).map(|i| min + i as f64 * width).collect()
}

impl Histogram {
    pub fn new(values: &[f64], bins: usize) -> Option<Self> {
        if values.is_empty() || bins == 0 || values.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let (min, max) = values
            .iter()
            .copied()
            .minmax_by(f64::total_cmp)
            .into_option()?;
        let width = (max - min) / bins as f64;
        let mut counts = vec![0u64; bins];
        for &value in values {
            counts[bin_index(value, min, width, bins)] += 1;
        }
        Some(Self {
            edges: edges(min, max, bins),
            counts,
        })
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn centers(&self) -> Vec<f64> {
        self.edges
            .iter()
            .tuple_windows()
            .map(|(a, b)| 0.5 * (a + b))
            .collect()
    }

    /// Counts normalized to integrate to one, or uniform weight when all
    /// values are equal.
    pub fn density(&self) -> Vec<f64> {
        let total = self.counts.iter().sum::<u64>() as f64;
        let width = self.edges[1] - self.edges[0];
        if width == 0. {
            return self.counts.iter().map(|&c| c as f64 / total).collect();
        }
        self.counts
            .iter()
            .map(|&c| c as f64 / (total * width))
            .collect()
    }
}

/// Two dimensional histogram of sampled source positions.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialGrid {
    x_edges: Vec<f64>,
    y_edges: Vec<f64>,
    /// Row major, `counts[iy * nx + ix]`.
    counts: Vec<u64>,
}

impl SpatialGrid {
    pub fn from_draws(draws: &[[f64; NDIM]], x_bins: usize, y_bins: usize) -> Option<Self> {
        if draws.is_empty() || x_bins == 0 || y_bins == 0 {
            return None;
        }
        let (x_min, x_max) = draws
            .iter()
            .map(|draw| draw[0])
            .minmax_by(f64::total_cmp)
            .into_option()?;
        let (y_min, y_max) = draws
            .iter()
            .map(|draw| draw[1])
            .minmax_by(f64::total_cmp)
            .into_option()?;
        if !(x_min.is_finite() && x_max.is_finite() && y_min.is_finite() && y_max.is_finite()) {
            return None;
        }
        let x_width = (x_max - x_min) / x_bins as f64;
        let y_width = (y_max - y_min) / y_bins as f64;

        let mut counts = vec![0u64; x_bins * y_bins];
        for draw in draws {
            let ix = bin_index(draw[0], x_min, x_width, x_bins);
            let iy = bin_index(draw[1], y_min, y_width, y_bins);
            counts[iy * x_bins + ix] += 1;
        }
        Some(Self {
            x_edges: edges(x_min, x_max, x_bins),
            y_edges: edges(y_min, y_max, y_bins),
            counts,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.x_edges.len() - 1, self.y_edges.len() - 1)
    }

    pub fn x_edges(&self) -> &[f64] {
        &self.x_edges
    }

    pub fn y_edges(&self) -> &[f64] {
        &self.y_edges
    }

    pub fn count(&self, ix: usize, iy: usize) -> u64 {
        let (nx, _) = self.shape();
        self.counts[iy * nx + ix]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Center of the cell with the most draws.
    pub fn mode(&self) -> Point {
        let (nx, _) = self.shape();
        let idx = self
            .counts
            .iter()
            .position_max()
            .unwrap_or_default();
        let (ix, iy) = (idx % nx, idx / nx);
        Point::new(
            0.5 * (self.x_edges[ix] + self.x_edges[ix + 1]),
            0.5 * (self.y_edges[iy] + self.y_edges[iy + 1]),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn parameter_statistics() {
        let values = [1., 2., 3., 4., 5.];
        let summary = ParameterSummary::new("activity", &values).unwrap();
        assert_eq!(summary.mean, 3.);
        assert_eq!(summary.variance, 2.);
        assert_relative_eq!(summary.sd, 2f64.sqrt());
        assert_eq!(summary.median, 3.);
        assert_relative_eq!(summary.q05, 1.2);
        assert_relative_eq!(summary.q95, 4.8);
        assert!(ParameterSummary::new("activity", &[]).is_none());
    }

    #[test]
    fn posterior_summary() {
        let draws = [[0., 10., 100., 5.], [2., 20., 300., 7.]];
        let summary = PosteriorSummary::from_draws(&draws).unwrap();
        assert_eq!(summary.num_draws(), 2);
        assert_eq!(summary.mean(), SourceParams::new(1., 15., 200., 6.));
        assert_eq!(summary.get("activity").unwrap().variance, 10_000.);
        assert_eq!(summary.variance(), [1., 25., 10_000., 1.]);
        assert!(summary.get("missing").is_none());
        assert!(PosteriorSummary::from_draws(&[]).is_none());
    }

    #[test]
    fn histogram_bins() {
        let hist = Histogram::new(&[0., 1., 1., 2., 4.], 4).unwrap();
        assert_eq!(hist.edges(), &[0., 1., 2., 3., 4.]);
        assert_eq!(hist.counts(), &[1, 2, 1, 1]);
        assert_eq!(hist.centers(), vec![0.5, 1.5, 2.5, 3.5]);
        let integral: f64 = hist.density().iter().sum();
        assert_relative_eq!(integral, 1.);

        let flat = Histogram::new(&[3., 3., 3.], 5).unwrap();
        assert_eq!(flat.counts()[0], 3);
        assert!(Histogram::new(&[], 5).is_none());
    }

    #[test]
    fn spatial_grid_mode() {
        let mut draws = vec![[0., 0., 1., 1.], [10., 10., 1., 1.]];
        draws.extend(std::iter::repeat([8., 1., 1., 1.]).take(5));
        let grid = SpatialGrid::from_draws(&draws, 5, 5).unwrap();
        assert_eq!(grid.shape(), (5, 5));
        assert_eq!(grid.total(), 7);
        assert_eq!(grid.count(4, 0), 5);
        assert_eq!(grid.mode(), Point::new(9., 1.));
    }

    proptest! {
        #[test]
        fn histogram_keeps_every_value(
            values in proptest::collection::vec(-1e3f64..1e3, 1..200),
            bins in 1usize..50,
        ) {
            let hist = Histogram::new(&values, bins).unwrap();
            prop_assert_eq!(hist.counts().iter().sum::<u64>() as usize, values.len());
            prop_assert_eq!(hist.edges().len(), bins + 1);
        }

        #[test]
        fn quantiles_are_ordered(values in proptest::collection::vec(-1e3f64..1e3, 1..200)) {
            let summary = ParameterSummary::new("src_x", &values).unwrap();
            prop_assert!(summary.q05 <= summary.median);
            prop_assert!(summary.median <= summary.q95);
            prop_assert!(summary.variance >= 0.);
        }
    }
}
