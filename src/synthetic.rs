//! Synthetic surveys generated from a forward model, used to exercise the
//! sampler against a known source.

use rand::Rng;
use rand_distr::{Distribution, Normal, Poisson};
use rayon::prelude::*;
use thiserror::Error;

use crate::{
    forward::{ForwardError, ForwardModel, SourceParams},
    geometry::Point,
    measurement::{Measurement, MeasurementError, MeasurementSeries},
};

#[derive(Error, Debug)]
pub enum SyntheticError {
    #[error("forward model evaluation failed")]
    Forward(#[from] ForwardError),
    #[error("invalid noise parameter: {0}")]
    InvalidNoise(String),
    #[error("expected count rate {value} of record {index} is not a valid Poisson mean")]
    InvalidRate { index: usize, value: f64 },
    #[error("generated series is invalid")]
    Measurement(#[from] MeasurementError),
}

/// `count` positions along the x axis starting at `start`, `step` apart.
pub fn straight_road(start: f64, step: f64, count: usize) -> Vec<Point> {
    (0..count)
        .map(|i| Point::new(start + i as f64 * step, 0.))
        .collect()
}

/// Record positions of a detector driving along the x axis at `speed`,
/// one record every `acquisition_time` seconds.
pub fn motion_road(start: f64, speed: f64, acquisition_time: f64, count: usize) -> Vec<Point> {
    straight_road(start, speed * acquisition_time, count)
}

/// The survey road used when nothing else is specified, -300 m to 300 m in
/// steps of one meter.
pub fn default_road() -> Vec<Point> {
    straight_road(-300., 1., 601)
}

/// Regular grid over `[x_min, x_max] x [y_min, y_max]`, row by row.
pub fn grid(x_min: f64, x_max: f64, y_min: f64, y_max: f64, step: f64) -> Vec<Point> {
    assert!(step > 0.);
    let nx = ((x_max - x_min) / step).floor() as usize + 1;
    let ny = ((y_max - y_min) / step).floor() as usize + 1;
    (0..ny)
        .flat_map(|iy| (0..nx).map(move |ix| Point::new(x_min + ix as f64 * step, y_min + iy as f64 * step)))
        .collect()
}

/// Distances of the probe sources from the road, `min, min + step, ..`
/// below `max`.
pub fn probe_offsets(min: f64, max: f64, step: f64) -> Vec<f64> {
    assert!(step > 0.);
    let mut offsets = Vec::new();
    let mut offset = min;
    while offset < max {
        offsets.push(offset);
        offset += step;
    }
    offsets
}

/// Noise applied when a survey is simulated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseSettings {
    /// Draw the observed counts from a Poisson distribution around the
    /// expected rate.
    pub poisson: bool,
    /// Standard deviation of the Gaussian jitter of the background of every
    /// record. `None` keeps the background constant.
    pub background_sigma: Option<f64>,
}

impl Default for NoiseSettings {
    fn default() -> Self {
        Self {
            poisson: true,
            background_sigma: None,
        }
    }
}

/// A simulated survey: the noise free expectation next to what a detector
/// would have counted.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedSeries {
    pub positions: Vec<Point>,
    pub expected: Vec<f64>,
    pub observed: Vec<f64>,
}

impl SimulatedSeries {
    pub fn to_measurements(&self) -> Result<MeasurementSeries, MeasurementError> {
        MeasurementSeries::new(
            self.positions
                .iter()
                .zip(self.observed.iter())
                .map(|(pos, &observed)| Measurement::new(pos.x, pos.y, observed)),
        )
    }
}

pub fn simulate_series<F: ForwardModel, R: Rng + ?Sized>(
    model: &F,
    positions: &[Point],
    truth: &SourceParams,
    noise: &NoiseSettings,
    rng: &mut R,
) -> Result<SimulatedSeries, SyntheticError> {
    let mut expected = vec![0f64; positions.len()];
    match noise.background_sigma {
        None => model.predict(positions, truth, &mut expected)?,
        Some(sigma) => {
            if !(sigma.is_finite() && sigma >= 0.) {
                return Err(SyntheticError::InvalidNoise(format!(
                    "background standard deviation must be finite and non-negative, got {}",
                    sigma
                )));
            }
            let jitter = Normal::new(truth.background, sigma)
                .map_err(|err| SyntheticError::InvalidNoise(err.to_string()))?;
            let source_only = SourceParams {
                background: 0.,
                ..*truth
            };
            model.predict(positions, &source_only, &mut expected)?;
            for rate in expected.iter_mut() {
                *rate += jitter.sample(rng).max(0.);
            }
        }
    }

    let observed = if noise.poisson {
        expected
            .iter()
            .enumerate()
            .map(|(index, &rate)| sample_poisson(rate, rng).ok_or(SyntheticError::InvalidRate { index, value: rate }))
            .collect::<Result<Vec<_>, _>>()?
    } else {
        expected.clone()
    };

    Ok(SimulatedSeries {
        positions: positions.to_vec(),
        expected,
        observed,
    })
}

fn sample_poisson<R: Rng + ?Sized>(rate: f64, rng: &mut R) -> Option<f64> {
    if rate == 0. {
        return Some(0.);
    }
    Some(Poisson::new(rate).ok()?.sample(rng))
}

/// Expected rates along a road for one probe source.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeRates {
    pub offset: f64,
    pub rates: Vec<f64>,
}

/// Evaluate the forward model for sources at several distances from the
/// road in parallel. The result keeps the order of `offsets`.
pub fn simulate_probes<F: ForwardModel + Sync>(
    model: &F,
    positions: &[Point],
    source_x: f64,
    offsets: &[f64],
    activity: f64,
    background: f64,
) -> Result<Vec<ProbeRates>, ForwardError> {
    offsets
        .par_iter()
        .map(|&offset| {
            let source = SourceParams::new(source_x, offset, activity, background);
            let rates = model.predict_vec(positions, &source)?;
            Ok(ProbeRates { offset, rates })
        })
        .collect()
}

/// Divide by the largest value. Returns the peak, or `None` if it is not
/// positive and the values were left untouched.
pub fn normalize_by_peak(values: &mut [f64]) -> Option<f64> {
    let peak = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !(peak > 0. && peak.is_finite()) {
        return None;
    }
    values.iter_mut().for_each(|val| *val /= peak);
    Some(peak)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::CountRateModel;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn paths() {
        let road = straight_road(-10., 5., 5);
        assert_eq!(road.last(), Some(&Point::new(10., 0.)));
        assert_eq!(motion_road(0., 2., 1.5, 3)[2], Point::new(6., 0.));
        assert_eq!(default_road().len(), 601);

        let grid = grid(0., 20., -10., 10., 10.);
        assert_eq!(grid.len(), 9);
        assert_eq!(grid[0], Point::new(0., -10.));
        assert_eq!(grid[5], Point::new(20., 0.));

        assert_eq!(probe_offsets(50., 150., 50.), vec![50., 100.]);
    }

    #[test]
    fn noise_free_series_matches_model() {
        let model = CountRateModel::point_source();
        let truth = SourceParams::new(0., 60., 100., 10.);
        let road = straight_road(-100., 10., 21);
        let noise = NoiseSettings {
            poisson: false,
            background_sigma: None,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let series = simulate_series(&model, &road, &truth, &noise, &mut rng).unwrap();
        assert_eq!(series.observed, series.expected);
        assert_eq!(series.expected, model.predict_vec(&road, &truth).unwrap());
        assert_eq!(series.to_measurements().unwrap().len(), 21);
    }

    #[test]
    fn poisson_noise_is_unbiased() {
        let model = CountRateModel::point_source();
        let truth = SourceParams::new(0., 20., 100., 10.);
        let road = vec![Point::new(0., 0.); 5_000];
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let series =
            simulate_series(&model, &road, &truth, &NoiseSettings::default(), &mut rng).unwrap();
        let mean = series.observed.iter().sum::<f64>() / road.len() as f64;
        assert_relative_eq!(mean, series.expected[0], max_relative = 0.02);
        assert!(series.observed.iter().all(|k| k.fract() == 0. && *k >= 0.));
    }

    #[test]
    fn background_jitter() {
        let model = CountRateModel::point_source();
        let truth = SourceParams::new(0., 1e3, 0., 10.);
        let road = straight_road(0., 1., 2_000);
        let noise = NoiseSettings {
            poisson: false,
            background_sigma: Some(2.),
        };
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let series = simulate_series(&model, &road, &truth, &noise, &mut rng).unwrap();
        let n = series.expected.len() as f64;
        let mean = series.expected.iter().sum::<f64>() / n;
        let var = series.expected.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        assert_relative_eq!(mean, 10., epsilon = 0.3);
        assert_relative_eq!(var.sqrt(), 2., epsilon = 0.2);

        let bad = NoiseSettings {
            poisson: false,
            background_sigma: Some(-1.),
        };
        assert!(matches!(
            simulate_series(&model, &road, &truth, &bad, &mut rng),
            Err(SyntheticError::InvalidNoise(_))
        ));
        for sigma in [f64::NAN, f64::INFINITY, -1e-12] {
            let bad = NoiseSettings {
                poisson: true,
                background_sigma: Some(sigma),
            };
            assert!(matches!(
                simulate_series(&model, &road, &truth, &bad, &mut rng),
                Err(SyntheticError::InvalidNoise(_))
            ));
        }

        let constant = NoiseSettings {
            poisson: false,
            background_sigma: Some(0.),
        };
        let series = simulate_series(&model, &road, &truth, &constant, &mut rng).unwrap();
        let noise_free = model.predict_vec(&road, &truth).unwrap();
        for (a, b) in series.expected.iter().zip(noise_free.iter()) {
            assert_relative_eq!(*a, *b, max_relative = 1e-12);
        }
    }

    #[test]
    fn probes_keep_order() {
        let model = CountRateModel::point_source();
        let road = straight_road(-300., 1., 601);
        let offsets = probe_offsets(50., 300., 25.);
        let probes = simulate_probes(&model, &road, 0., &offsets, 100., 0.).unwrap();
        assert_eq!(probes.len(), offsets.len());
        for (probe, &offset) in probes.iter().zip(offsets.iter()) {
            assert_eq!(probe.offset, offset);
            assert_eq!(probe.rates.len(), road.len());
        }
        // farther probes see less at the closest point of the road
        for pair in probes.windows(2) {
            assert!(pair[0].rates[300] > pair[1].rates[300]);
        }
    }

    #[test]
    fn normalization() {
        let mut values = vec![1., 4., 2.];
        assert_eq!(normalize_by_peak(&mut values), Some(4.));
        assert_eq!(values, vec![0.25, 1., 0.5]);

        let mut zeros = vec![0., 0.];
        assert_eq!(normalize_by_peak(&mut zeros), None);
        assert_eq!(zeros, vec![0., 0.]);
    }
}
