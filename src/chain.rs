use rand::Rng;
use tracing::{debug, warn};

use crate::{
    adapt::{CovarianceError, ProposalCovariance, RunningCovariance, StepScaleAdapt},
    geometry::{BoundaryReflector, Point},
    math::acceptance_probability,
    posterior::{LogDensity, LogpError},
    sampler::{AdaptiveMetropolisSettings, SamplerError},
};

/// Diagnostic information about a single draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    /// Zero based index of the draw.
    pub draw: u64,
    pub chain: u64,
    pub accepted: bool,
    pub reflected: bool,
    pub step_scale: f64,
    pub logp: f64,
    /// Acceptance rate of the adaptation block that ended with this draw.
    pub block_acceptance: Option<f64>,
}

pub trait Chain {
    /// Initialize the sampler to a position. This should be called
    /// before calling draw.
    ///
    /// This fails if the log density returns an unrecoverable error.
    fn set_position(&mut self, position: &[f64]) -> Result<(), SamplerError>;

    /// Draw a new sample and return the position and some diagnosic information.
    fn draw(&mut self) -> Result<(Box<[f64]>, Progress), SamplerError>;

    /// The dimensionality of the posterior.
    fn dim(&self) -> usize;
}

/// Adaptive Metropolis random walk with a Gaussian proposal.
pub struct AdaptiveMetropolisChain<L: LogDensity, R: Rng> {
    logp: L,
    rng: R,
    settings: AdaptiveMetropolisSettings,
    chain: u64,
    position: Box<[f64]>,
    position_logp: f64,
    proposal: Box<[f64]>,
    covariance: ProposalCovariance,
    running: RunningCovariance,
    step: StepScaleAdapt,
    reflector: Option<BoundaryReflector>,
    draw_count: u64,
    accepted_count: u64,
}

impl<L: LogDensity, R: Rng> AdaptiveMetropolisChain<L, R> {
    pub fn new(
        logp: L,
        settings: AdaptiveMetropolisSettings,
        reflector: Option<BoundaryReflector>,
        rng: R,
        chain: u64,
    ) -> Result<Self, SamplerError> {
        let dim = logp.dim();
        let covariance = ProposalCovariance::diagonal(dim, settings.initial_variance)
            .map_err(|err| SamplerError::InvalidSettings(err.to_string()))?;
        Ok(Self {
            logp,
            rng,
            settings,
            chain,
            position: vec![0f64; dim].into(),
            position_logp: f64::NEG_INFINITY,
            proposal: vec![0f64; dim].into(),
            covariance,
            running: RunningCovariance::new(dim),
            step: StepScaleAdapt::new(&settings),
            reflector,
            draw_count: 0,
            accepted_count: 0,
        })
    }

    pub fn position(&self) -> &[f64] {
        &self.position
    }

    pub fn step_scale(&self) -> f64 {
        self.step.step_scale()
    }

    pub fn proposal_covariance(&self) -> &ProposalCovariance {
        &self.covariance
    }

    /// Fraction of accepted proposals over all draws so far.
    pub fn acceptance_rate(&self) -> f64 {
        if self.draw_count == 0 {
            return 0.;
        }
        self.accepted_count as f64 / self.draw_count as f64
    }

    fn evaluate(&mut self, draw: u64) -> Result<f64, SamplerError> {
        let logp = match self.logp.log_density(&self.proposal) {
            Ok(logp) => logp,
            Err(err) if err.is_recoverable() => return Ok(f64::NEG_INFINITY),
            Err(err) => {
                return Err(SamplerError::LogDensity {
                    draw,
                    source: Box::new(err),
                })
            }
        };
        if logp.is_nan() {
            return Err(SamplerError::NumericalFailure {
                draw,
                reason: format!("log density is NaN at {:?}", self.proposal),
            });
        }
        Ok(logp)
    }

    fn reflect_proposal(&mut self, iteration: u64) -> bool {
        let (Some(reflector), Some(interval)) =
            (self.reflector.as_ref(), self.settings.reflection_interval)
        else {
            return false;
        };
        if interval == 0 || iteration % interval != 0 {
            return false;
        }
        let mut point = Point::new(self.proposal[0], self.proposal[1]);
        if !reflector.reflect(&mut point) {
            return false;
        }
        warn!(
            chain = self.chain,
            iteration,
            from_x = self.proposal[0],
            from_y = self.proposal[1],
            to_x = point.x,
            to_y = point.y,
            "Reflected proposal back towards the measurements"
        );
        self.proposal[0] = point.x;
        self.proposal[1] = point.y;
        true
    }

    fn adapt_covariance(&mut self, iteration: u64) -> Result<(), SamplerError> {
        self.running.add_sample(&self.position);
        if iteration <= self.settings.adapt_start {
            return Ok(());
        }
        match self
            .covariance
            .update_diagonal(&self.running, self.settings.covariance_regularization)
        {
            Ok(()) => Ok(()),
            Err(CovarianceError::NotPositiveDefinite) => {
                warn!(
                    chain = self.chain,
                    iteration, "Could not factorize proposal covariance, keeping the previous one"
                );
                Ok(())
            }
            Err(err @ CovarianceError::NonFinite) => Err(SamplerError::NumericalFailure {
                draw: iteration - 1,
                reason: err.to_string(),
            }),
        }
    }
}

impl<L: LogDensity, R: Rng> Chain for AdaptiveMetropolisChain<L, R> {
    fn set_position(&mut self, position: &[f64]) -> Result<(), SamplerError> {
        if position.len() != self.dim() {
            return Err(SamplerError::InvalidInput(format!(
                "initial position has {} values, expected {}",
                position.len(),
                self.dim()
            )));
        }
        if position.iter().any(|val| !val.is_finite()) {
            return Err(SamplerError::InvalidInput(format!(
                "initial position {:?} is not finite",
                position
            )));
        }
        self.proposal.copy_from_slice(position);
        self.position_logp = self.evaluate(0)?;
        self.position.copy_from_slice(position);
        Ok(())
    }

    fn draw(&mut self) -> Result<(Box<[f64]>, Progress), SamplerError> {
        let draw = self.draw_count;
        let iteration = draw + 1;

        self.covariance.propose(
            &mut self.rng,
            self.step.step_scale(),
            &self.position,
            &mut self.proposal,
        );
        let reflected = self.reflect_proposal(iteration);

        let proposal_logp = self.evaluate(draw)?;
        let alpha = acceptance_probability(self.position_logp, proposal_logp);
        let accepted = self.rng.random::<f64>() < alpha;
        if accepted {
            std::mem::swap(&mut self.position, &mut self.proposal);
            self.position_logp = proposal_logp;
            self.accepted_count += 1;
        }
        self.step.record(accepted);

        self.adapt_covariance(iteration)?;
        let block_acceptance = self.step.adapt(iteration);
        if let Some(acceptance) = block_acceptance {
            debug!(
                chain = self.chain,
                iteration,
                acceptance,
                step_scale = self.step.step_scale(),
                "Adapted proposal scale"
            );
        }

        self.draw_count += 1;
        let progress = Progress {
            draw,
            chain: self.chain,
            accepted,
            reflected,
            step_scale: self.step.step_scale(),
            logp: self.position_logp,
            block_acceptance,
        };
        Ok((self.position.clone(), progress))
    }

    fn dim(&self) -> usize {
        self.logp.dim()
    }
}
