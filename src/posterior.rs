//! The target density of the sampler: prior and Poisson likelihood of a
//! candidate source given a measurement series.

use std::fmt::Debug;

use statrs::distribution::{Continuous, Gamma, Normal};
use thiserror::Error;

use crate::{
    config::{PhysicalConstants, PriorSettings},
    forward::{ForwardError, ForwardModel, SourceParams, NDIM},
    geometry::Point,
    math::{ln_factorial, poisson_ln_likelihood},
    measurement::MeasurementSeries,
};

/// Errors that happen when we evaluate the log density.
pub trait LogpError: std::error::Error {
    /// Unrecoverable errors stop sampling, recoverable errors reject the proposal.
    fn is_recoverable(&self) -> bool;
}

/// An unnormalized log density over a fixed number of parameters.
pub trait LogDensity {
    type Err: Debug + Send + Sync + LogpError + 'static;

    fn log_density(&mut self, position: &[f64]) -> Result<f64, Self::Err>;
    fn dim(&self) -> usize;
}

#[derive(Error, Debug)]
pub enum PosteriorError {
    #[error("forward model evaluation failed")]
    Forward(#[from] ForwardError),
    #[error("invalid prior: {0}")]
    InvalidPrior(String),
}

impl LogpError for PosteriorError {
    fn is_recoverable(&self) -> bool {
        false
    }
}

/// Gamma prior on the scaled activity and normal prior on the background.
#[derive(Debug, Clone)]
pub struct SourcePrior {
    activity: Gamma,
    background: Normal,
    scale: f64,
}

impl SourcePrior {
    pub fn new(settings: &PriorSettings, constants: &PhysicalConstants) -> Result<Self, PosteriorError> {
        let activity = Gamma::new(settings.activity_shape, settings.activity_rate)
            .map_err(|err| PosteriorError::InvalidPrior(err.to_string()))?;
        let background = Normal::new(settings.background_mean, settings.background_sd)
            .map_err(|err| PosteriorError::InvalidPrior(err.to_string()))?;
        Ok(Self {
            activity,
            background,
            scale: constants.scale,
        })
    }

    pub fn ln_prior(&self, activity: f64, background: f64) -> f64 {
        if activity < 0. || background < 0. {
            return f64::NEG_INFINITY;
        }
        self.activity.ln_pdf(activity / self.scale) + self.background.ln_pdf(background)
    }
}

/// Posterior over `(x, y, activity, background)` of a single point source.
#[derive(Debug, Clone)]
pub struct SourcePosterior<F: ForwardModel> {
    model: F,
    prior: SourcePrior,
    positions: Box<[Point]>,
    observed: Box<[f64]>,
    ln_factorials: Box<[f64]>,
    max_source_distance: f64,
    expected: Vec<f64>,
}

impl<F: ForwardModel> SourcePosterior<F> {
    pub fn new(
        model: F,
        series: &MeasurementSeries,
        prior: &PriorSettings,
        constants: &PhysicalConstants,
    ) -> Result<Self, PosteriorError> {
        let ln_factorials = series.observed().iter().map(|&k| ln_factorial(k)).collect();
        Ok(Self {
            model,
            prior: SourcePrior::new(prior, constants)?,
            positions: series.positions().into(),
            observed: series.observed().into(),
            ln_factorials,
            max_source_distance: prior.max_source_distance,
            expected: vec![0f64; series.len()],
        })
    }

    pub fn model(&self) -> &F {
        &self.model
    }

    pub fn positions(&self) -> &[Point] {
        &self.positions
    }

    pub fn ln_prior(&self, params: &SourceParams) -> f64 {
        self.prior.ln_prior(params.activity, params.background)
    }

    /// Poisson log likelihood of the observations.
    ///
    /// Candidates with negative activity or background, sources beyond the
    /// maximum distance from the origin and sources sitting exactly on a
    /// detector position have zero likelihood.
    pub fn ln_likelihood(&mut self, params: &SourceParams) -> Result<f64, PosteriorError> {
        if params.activity < 0. || params.background < 0. {
            return Ok(f64::NEG_INFINITY);
        }
        if params.position().norm() > self.max_source_distance {
            return Ok(f64::NEG_INFINITY);
        }
        self.model
            .predict(&self.positions, params, &mut self.expected)?;
        if self.expected.iter().any(|mu| !mu.is_finite()) {
            return Ok(f64::NEG_INFINITY);
        }
        Ok(poisson_ln_likelihood(
            &self.observed,
            &self.ln_factorials,
            &self.expected,
        ))
    }

    pub fn ln_posterior(&mut self, params: &SourceParams) -> Result<f64, PosteriorError> {
        let prior = self.ln_prior(params);
        if prior == f64::NEG_INFINITY {
            return Ok(prior);
        }
        Ok(prior + self.ln_likelihood(params)?)
    }
}

impl<F: ForwardModel> LogDensity for SourcePosterior<F> {
    type Err = PosteriorError;

    fn log_density(&mut self, position: &[f64]) -> Result<f64, Self::Err> {
        self.ln_posterior(&SourceParams::from_slice(position))
    }

    fn dim(&self) -> usize {
        NDIM
    }
}
