use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use thiserror::Error;
use tracing::{error, info};

use crate::{
    chain::{AdaptiveMetropolisChain, Chain, Progress},
    config::{PhysicalConstants, PriorSettings},
    forward::{ForwardModel, SourceParams, NDIM},
    geometry::BoundaryReflector,
    measurement::MeasurementSeries,
    posterior::{LogDensity, SourcePosterior},
    summary::PosteriorSummary,
    trace::Trace,
};

#[derive(Error, Debug)]
pub enum SamplerError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid sampler settings: {0}")]
    InvalidSettings(String),
    #[error("log density evaluation failed in draw {draw}")]
    LogDensity {
        draw: u64,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("numerical failure in draw {draw}: {reason}")]
    NumericalFailure { draw: u64, reason: String },
}

/// Settings for the adaptive Metropolis sampler
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveMetropolisSettings {
    /// The number of draws of each chain, including the burn in.
    pub num_samples: u64,
    /// The number of leading draws that are dropped from summaries.
    pub burn_in: u64,
    /// Variance of every parameter in the initial proposal covariance.
    pub initial_variance: f64,
    pub initial_step_scale: f64,
    /// Added to the estimated variances to keep the proposal positive definite.
    pub covariance_regularization: f64,
    /// The proposal covariance follows the chain after this many draws.
    pub adapt_start: u64,
    pub step_adapt_interval: u64,
    pub target_accept: f64,
    /// Upper bound of the relative change of the step scale per block.
    pub max_step_change: f64,
    /// The relative change of the step scale at draw `i` is at most
    /// `step_change_rate / sqrt(i)`.
    pub step_change_rate: f64,
    /// Mirror escaped proposals back towards the data on every draw divisible
    /// by this. `None` disables the reflection.
    pub reflection_interval: Option<u64>,
    /// Activity of the initial point if none is given.
    pub default_activity: f64,
    pub progress_interval: u64,
    pub seed: u64,
    pub num_chains: usize,
    pub prior: PriorSettings,
}

impl Default for AdaptiveMetropolisSettings {
    fn default() -> Self {
        Self {
            num_samples: 20_000,
            burn_in: 1_000,
            initial_variance: 1000. * 1000.,
            initial_step_scale: 0.01,
            covariance_regularization: 1e-4,
            adapt_start: 100,
            step_adapt_interval: 100,
            target_accept: 0.24,
            max_step_change: 0.05,
            step_change_rate: 5.,
            reflection_interval: Some(1000),
            default_activity: 20.,
            progress_interval: 1000,
            seed: 0,
            num_chains: 4,
            prior: PriorSettings::default(),
        }
    }
}

impl AdaptiveMetropolisSettings {
    pub fn validate(&self) -> Result<(), SamplerError> {
        let fail = |msg: &str| Err(SamplerError::InvalidSettings(msg.to_string()));
        if self.num_samples == 0 {
            return fail("num_samples must be at least 1");
        }
        if self.burn_in >= self.num_samples {
            return fail("burn_in must be smaller than num_samples");
        }
        if !(self.initial_variance.is_finite() && self.initial_variance > 0.) {
            return fail("initial_variance must be positive");
        }
        if !(self.initial_step_scale.is_finite() && self.initial_step_scale > 0.) {
            return fail("initial_step_scale must be positive");
        }
        if !(self.covariance_regularization.is_finite() && self.covariance_regularization >= 0.) {
            return fail("covariance_regularization must not be negative");
        }
        if !(self.target_accept > 0. && self.target_accept < 1.) {
            return fail("target_accept must be in (0, 1)");
        }
        if !(self.max_step_change >= 0. && self.max_step_change < 1.) {
            return fail("max_step_change must be in [0, 1)");
        }
        if self.num_chains == 0 {
            return fail("num_chains must be at least 1");
        }
        Ok(())
    }

    pub fn new_chain<L: LogDensity, R: Rng>(
        &self,
        chain: u64,
        logp: L,
        reflector: Option<BoundaryReflector>,
        rng: R,
    ) -> Result<AdaptiveMetropolisChain<L, R>, SamplerError> {
        AdaptiveMetropolisChain::new(logp, *self, reflector, rng, chain)
    }
}

/// Start at the record with the largest count, with the default activity
/// and the mean count as background.
pub fn initial_params(series: &MeasurementSeries, settings: &AdaptiveMetropolisSettings) -> SourceParams {
    let peak = series.peak();
    SourceParams::new(
        peak.x,
        peak.y,
        settings.default_activity,
        series.mean_observed(),
    )
}

/// The result of a successful sampler run.
#[derive(Debug, Clone)]
pub struct McmcOutput {
    trace: Trace,
    burn_in: usize,
    chain: u64,
    acceptance_rate: f64,
    elapsed: Duration,
    known_truth: Option<SourceParams>,
}

impl McmcOutput {
    /// Attach the parameters the data was generated with.
    pub fn with_known_truth(mut self, truth: SourceParams) -> Self {
        self.known_truth = Some(truth);
        self
    }

    pub fn known_truth(&self) -> Option<&SourceParams> {
        self.known_truth.as_ref()
    }

    /// All draws, including the burn in.
    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    pub fn burn_in(&self) -> usize {
        self.burn_in
    }

    pub fn chain(&self) -> u64 {
        self.chain
    }

    pub fn acceptance_rate(&self) -> f64 {
        self.acceptance_rate
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn posterior_draws(&self) -> &[[f64; NDIM]] {
        self.trace.after_burn_in(self.burn_in)
    }

    pub fn summary(&self) -> Option<PosteriorSummary> {
        PosteriorSummary::from_draws(self.posterior_draws())
    }
}

/// Draws after burn in of several chains, concatenated.
pub fn pooled_draws(outputs: &[McmcOutput]) -> Vec<[f64; NDIM]> {
    outputs
        .iter()
        .flat_map(|output| output.posterior_draws().iter().copied())
        .collect()
}

struct ProgressTimer {
    chain: u64,
    total: u64,
    interval: u64,
    block_start: Instant,
    block_accepted: u64,
}

impl ProgressTimer {
    fn new(chain: u64, total: u64, interval: u64) -> Self {
        Self {
            chain,
            total,
            interval,
            block_start: Instant::now(),
            block_accepted: 0,
        }
    }

    fn record(&mut self, progress: &Progress) {
        if progress.accepted {
            self.block_accepted += 1;
        }
        let done = progress.draw + 1;
        if self.interval == 0 || done % self.interval != 0 {
            return;
        }
        let block_secs = self.block_start.elapsed().as_secs_f64();
        let eta_secs = block_secs * (self.total - done) as f64 / self.interval as f64;
        info!(
            chain = self.chain,
            draw = done,
            total = self.total,
            block_secs,
            eta_secs,
            step_scale = progress.step_scale,
            acceptance = self.block_accepted as f64 / self.interval as f64,
            "Sampling progress"
        );
        self.block_start = Instant::now();
        self.block_accepted = 0;
    }
}

/// Sample a single chain and collect the full trace.
fn run_chain<F: ForwardModel>(
    series: &MeasurementSeries,
    model: F,
    constants: &PhysicalConstants,
    settings: &AdaptiveMetropolisSettings,
    init: Option<SourceParams>,
    chain: u64,
) -> Result<McmcOutput, SamplerError> {
    settings.validate()?;
    let posterior = SourcePosterior::new(model, series, &settings.prior, constants)
        .map_err(|err| SamplerError::InvalidSettings(err.to_string()))?;
    let start = init.unwrap_or_else(|| initial_params(series, settings));

    let mut rng = ChaCha8Rng::seed_from_u64(settings.seed);
    rng.set_stream(chain);
    let reflector = settings
        .reflection_interval
        .map(|_| BoundaryReflector::new(series.positions()));

    let mut sampler = settings.new_chain(chain, posterior, reflector, rng)?;
    sampler.set_position(&start.to_array())?;

    info!(
        chain,
        num_samples = settings.num_samples,
        records = series.len(),
        start_x = start.x,
        start_y = start.y,
        start_activity = start.activity,
        start_background = start.background,
        "Starting adaptive Metropolis chain"
    );

    let started = Instant::now();
    let mut timer = ProgressTimer::new(chain, settings.num_samples, settings.progress_interval);
    let mut trace = Trace::with_capacity(settings.num_samples as usize);
    for _ in 0..settings.num_samples {
        let (draw, progress) = sampler.draw()?;
        trace.push(&draw);
        timer.record(&progress);
    }
    if !trace.all_finite() {
        return Err(SamplerError::NumericalFailure {
            draw: settings.num_samples - 1,
            reason: "trace contains non-finite values".to_string(),
        });
    }

    let elapsed = started.elapsed();
    info!(
        chain,
        acceptance_rate = sampler.acceptance_rate(),
        elapsed_secs = elapsed.as_secs_f64(),
        "Finished adaptive Metropolis chain"
    );

    Ok(McmcOutput {
        trace,
        burn_in: settings.burn_in as usize,
        chain,
        acceptance_rate: sampler.acceptance_rate(),
        elapsed,
        known_truth: None,
    })
}

/// Run one adaptive Metropolis chain over the source parameters.
///
/// Without an initial point the chain starts from [`initial_params`]. On
/// failure no partial trace is returned.
pub fn run_mcmc<F: ForwardModel>(
    series: &MeasurementSeries,
    model: F,
    constants: &PhysicalConstants,
    settings: &AdaptiveMetropolisSettings,
    init: Option<SourceParams>,
) -> Result<McmcOutput, SamplerError> {
    run_chain(series, model, constants, settings, init, 0).inspect_err(|err| {
        error!(error = %err, "Sampler run failed");
    })
}

/// Run `settings.num_chains` independent chains in parallel.
///
/// Every chain uses its own stream of the seeded random number generator, so
/// the result does not depend on the number of threads.
pub fn sample_parallel<F: ForwardModel + Clone + Send + Sync>(
    series: &MeasurementSeries,
    model: F,
    constants: &PhysicalConstants,
    settings: &AdaptiveMetropolisSettings,
    init: Option<SourceParams>,
) -> Result<Vec<McmcOutput>, SamplerError> {
    settings.validate()?;
    (0..settings.num_chains as u64)
        .into_par_iter()
        .map(|chain| {
            run_chain(series, model.clone(), constants, settings, init, chain).inspect_err(
                |err| {
                    error!(chain, error = %err, "Sampler chain failed");
                },
            )
        })
        .collect()
}

/// Iterate over the draws of a single chain of an arbitrary log density.
pub fn sample_sequentially<L: LogDensity>(
    logp: L,
    settings: &AdaptiveMetropolisSettings,
    start: &[f64],
    draws: u64,
    chain: u64,
) -> Result<impl Iterator<Item = Result<(Box<[f64]>, Progress), SamplerError>>> {
    let mut rng = ChaCha8Rng::seed_from_u64(settings.seed);
    rng.set_stream(chain);
    let mut sampler = settings
        .new_chain(chain, logp, None, rng)
        .context("Could not create chain")?;
    sampler
        .set_position(start)
        .context("Could not initialize chain")?;
    Ok((0..draws).map(move |_| sampler.draw()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::CountRateModel;
    use crate::posterior::test_logps::two_road_posterior;
    use pretty_assertions::assert_eq;

    fn series() -> MeasurementSeries {
        let truth = SourceParams::new(0., 60., 100., 10.);
        let posterior = two_road_posterior(&truth);
        let model = posterior.model().clone();
        let expected = model.predict_vec(posterior.positions(), &truth).unwrap();
        MeasurementSeries::new(
            posterior
                .positions()
                .iter()
                .zip(expected)
                .map(|(pos, rate)| crate::measurement::Measurement::new(pos.x, pos.y, rate.round())),
        )
        .unwrap()
    }

    fn short_settings() -> AdaptiveMetropolisSettings {
        AdaptiveMetropolisSettings {
            num_samples: 2_000,
            burn_in: 500,
            num_chains: 3,
            seed: 7,
            ..Default::default()
        }
    }

    #[test]
    fn default_settings_are_valid() {
        AdaptiveMetropolisSettings::default().validate().unwrap();
        let bad = AdaptiveMetropolisSettings {
            burn_in: 20_000,
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(SamplerError::InvalidSettings(_))));
        let bad = AdaptiveMetropolisSettings {
            num_samples: 0,
            burn_in: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn start_at_peak() {
        let series = MeasurementSeries::from_columns(&[0., 10., 20.], &[0., 0., 0.], &[3., 9., 6.]).unwrap();
        let init = initial_params(&series, &AdaptiveMetropolisSettings::default());
        assert_eq!(init, SourceParams::new(10., 0., 20., 6.));
    }

    #[test]
    fn chain_length_and_burn_in() -> Result<()> {
        let settings = short_settings();
        let output = run_mcmc(
            &series(),
            CountRateModel::point_source(),
            &PhysicalConstants::default(),
            &settings,
            None,
        )?;
        assert_eq!(output.trace().len(), 2_000);
        assert_eq!(output.posterior_draws().len(), 1_500);
        assert!(output.trace().all_finite());
        assert!(output.known_truth().is_none());
        let truth = SourceParams::new(0., 60., 100., 10.);
        let output = output.with_known_truth(truth);
        assert_eq!(output.known_truth(), Some(&truth));
        Ok(())
    }

    #[test]
    fn invalid_initial_point() {
        let err = run_mcmc(
            &series(),
            CountRateModel::point_source(),
            &PhysicalConstants::default(),
            &short_settings(),
            Some(SourceParams::new(f64::NAN, 0., 1., 1.)),
        )
        .unwrap_err();
        assert!(matches!(err, SamplerError::InvalidInput(_)));
    }

    #[test]
    fn parallel_chains_are_reproducible() -> Result<()> {
        let settings = short_settings();
        let series = series();
        let model = CountRateModel::point_source();
        let constants = PhysicalConstants::default();
        let first = sample_parallel(&series, model.clone(), &constants, &settings, None)?;
        let second = sample_parallel(&series, model, &constants, &settings, None)?;
        assert_eq!(first.len(), 3);
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.chain(), b.chain());
            assert_eq!(a.trace(), b.trace());
        }
        assert!(first[0].trace() != first[1].trace());
        assert_eq!(pooled_draws(&first).len(), 3 * 1_500);
        Ok(())
    }

    #[test]
    fn sequential_iterator() -> Result<()> {
        let truth = SourceParams::new(0., 60., 100., 10.);
        let posterior = two_road_posterior(&truth);
        let settings = AdaptiveMetropolisSettings::default();
        let draws: Vec<_> =
            sample_sequentially(posterior, &settings, &truth.to_array(), 250, 0)?
                .collect::<Result<_, _>>()?;
        assert_eq!(draws.len(), 250);
        assert_eq!(draws[249].1.draw, 249);
        Ok(())
    }
}
