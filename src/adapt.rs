//! Online adaptation of the random walk proposal.

use faer::{Col, Mat, MatRef, Side};
use rand::Rng;
use rand_distr::StandardNormal;
use thiserror::Error;

use crate::sampler::AdaptiveMetropolisSettings;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CovarianceError {
    #[error("proposal covariance contains non-finite values")]
    NonFinite,
    #[error("proposal covariance is not positive definite")]
    NotPositiveDefinite,
}

/// Running mean and covariance of the chain, each draw weighted by `1 / count`.
#[derive(Debug, Clone)]
pub struct RunningCovariance {
    mean: Col<f64>,
    covariance: Mat<f64>,
    residual: Col<f64>,
    count: u64,
}

impl RunningCovariance {
    pub fn new(dim: usize) -> Self {
        Self {
            mean: Col::zeros(dim),
            covariance: Mat::zeros(dim, dim),
            residual: Col::zeros(dim),
            count: 0,
        }
    }

    pub fn add_sample(&mut self, value: &[f64]) {
        let dim = self.mean.nrows();
        assert!(value.len() == dim);

        self.count += 1;
        let w = (self.count as f64).recip();

        // The outer product uses the residual to the mean before this update
        for i in 0..dim {
            self.residual[i] = value[i] - self.mean[i];
            self.mean[i] += w * self.residual[i];
        }
        for j in 0..dim {
            for i in 0..dim {
                let outer = self.residual[i] * self.residual[j];
                self.covariance[(i, j)] = (1. - w) * self.covariance[(i, j)] + w * (1. - w) * outer;
            }
        }
    }

    pub fn mean(&self) -> &Col<f64> {
        &self.mean
    }

    pub fn covariance(&self) -> &Mat<f64> {
        &self.covariance
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

/// Covariance of the Gaussian random walk and its lower Cholesky factor.
#[derive(Debug, Clone)]
pub struct ProposalCovariance {
    covariance: Mat<f64>,
    factor: Mat<f64>,
}

impl ProposalCovariance {
    pub fn diagonal(dim: usize, variance: f64) -> Result<Self, CovarianceError> {
        let covariance = Mat::from_fn(dim, dim, |i, j| if i == j { variance } else { 0. });
        let factor = cholesky(&covariance)?;
        Ok(Self { covariance, factor })
    }

    pub fn dim(&self) -> usize {
        self.covariance.nrows()
    }

    pub fn covariance(&self) -> &Mat<f64> {
        &self.covariance
    }

    pub fn variances(&self) -> Box<[f64]> {
        (0..self.dim()).map(|i| self.covariance[(i, i)]).collect()
    }

    /// Replace the covariance by the regularized diagonal of the running
    /// estimate. Off diagonal terms of the estimate are ignored.
    ///
    /// On error the previous covariance stays in place.
    pub fn update_diagonal(
        &mut self,
        running: &RunningCovariance,
        regularization: f64,
    ) -> Result<(), CovarianceError> {
        let estimate = running.covariance();
        let dim = self.dim();
        assert!(estimate.nrows() == dim);

        let covariance = Mat::from_fn(dim, dim, |i, j| {
            if i == j {
                estimate[(i, i)] + regularization
            } else {
                0.
            }
        });
        self.factor = cholesky(&covariance)?;
        self.covariance = covariance;
        Ok(())
    }

    /// Draw `current + scale * L z` with standard normal `z` into `out`.
    pub fn propose<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        scale: f64,
        current: &[f64],
        out: &mut [f64],
    ) {
        let dim = self.dim();
        assert!(current.len() == dim);
        assert!(out.len() == dim);

        let z: Vec<f64> = (0..dim).map(|_| rng.sample(StandardNormal)).collect();
        for i in 0..dim {
            let offset: f64 = (0..=i).map(|j| self.factor[(i, j)] * z[j]).sum();
            out[i] = current[i] + scale * offset;
        }
    }
}

fn mat_all_finite(mat: &MatRef<f64>) -> bool {
    let mut ok = true;
    faer::zip!(mat).for_each(|faer::unzip!(val)| ok &= val.is_finite());
    ok
}

fn cholesky(covariance: &Mat<f64>) -> Result<Mat<f64>, CovarianceError> {
    if !mat_all_finite(&covariance.as_ref()) {
        return Err(CovarianceError::NonFinite);
    }
    let llt = covariance
        .llt(Side::Lower)
        .map_err(|_| CovarianceError::NotPositiveDefinite)?;
    Ok(llt.L().to_owned())
}

/// Multiplicative tuning of the proposal scale from the acceptance rate of
/// fixed size blocks of draws.
#[derive(Debug, Clone)]
pub struct StepScaleAdapt {
    step_scale: f64,
    accepted: u64,
    trials: u64,
    interval: u64,
    target_accept: f64,
    max_change: f64,
    change_rate: f64,
}

impl StepScaleAdapt {
    pub fn new(settings: &AdaptiveMetropolisSettings) -> Self {
        Self {
            step_scale: settings.initial_step_scale,
            accepted: 0,
            trials: 0,
            interval: settings.step_adapt_interval,
            target_accept: settings.target_accept,
            max_change: settings.max_step_change,
            change_rate: settings.step_change_rate,
        }
    }

    pub fn step_scale(&self) -> f64 {
        self.step_scale
    }

    pub fn record(&mut self, accepted: bool) {
        self.trials += 1;
        if accepted {
            self.accepted += 1;
        }
    }

    pub fn block_acceptance(&self) -> f64 {
        if self.trials == 0 {
            return 0.;
        }
        self.accepted as f64 / self.trials as f64
    }

    /// At the end of every block, shrink the scale when the block acceptance
    /// is below target and grow it otherwise, then start a new block.
    ///
    /// `iteration` counts from one. Returns the acceptance rate of the
    /// finished block.
    pub fn adapt(&mut self, iteration: u64) -> Option<f64> {
        if self.interval == 0 || iteration % self.interval != 0 {
            return None;
        }
        let acceptance = self.block_acceptance();
        let damping = self.change_rate / (iteration as f64).sqrt();
        let factor = if acceptance < self.target_accept {
            (1. - self.max_change).max(1. - damping)
        } else {
            (1. + self.max_change).min(1. + damping)
        };
        self.step_scale *= factor;
        self.accepted = 0;
        self.trials = 0;
        Some(acceptance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn running_covariance_matches_batch() {
        let draws = [
            [1., 2., 3., 4.],
            [2., 0., 3., 1.],
            [0., 1., 5., 2.],
            [4., 3., 2., 2.],
            [3., 3., 1., 0.],
        ];
        let mut running = RunningCovariance::new(4);
        for draw in &draws {
            running.add_sample(draw);
        }
        assert_eq!(running.count(), 5);

        let n = draws.len() as f64;
        for i in 0..4 {
            let mean = draws.iter().map(|d| d[i]).sum::<f64>() / n;
            assert_relative_eq!(running.mean()[i], mean, epsilon = 1e-12);
            for j in 0..4 {
                let mean_j = draws.iter().map(|d| d[j]).sum::<f64>() / n;
                let cov = draws
                    .iter()
                    .map(|d| (d[i] - mean) * (d[j] - mean_j))
                    .sum::<f64>()
                    / n;
                assert_relative_eq!(running.covariance()[(i, j)], cov, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn first_sample_sets_mean() {
        let mut running = RunningCovariance::new(2);
        running.add_sample(&[3., -1.]);
        assert_eq!(running.mean()[0], 3.);
        assert_eq!(running.mean()[1], -1.);
        assert_eq!(running.covariance()[(0, 0)], 0.);
    }

    #[test]
    fn regularized_diagonal() {
        let mut running = RunningCovariance::new(2);
        running.add_sample(&[0., 0.]);
        running.add_sample(&[2., 2.]);
        let mut proposal = ProposalCovariance::diagonal(2, 1e6).unwrap();
        proposal.update_diagonal(&running, 1e-4).unwrap();
        assert_relative_eq!(proposal.covariance()[(0, 0)], 1. + 1e-4);
        assert_eq!(proposal.covariance()[(0, 1)], 0.);
        assert_eq!(&*proposal.variances(), &[1. + 1e-4, 1. + 1e-4]);
    }

    #[test]
    fn degenerate_estimate_is_rejected() {
        let mut running = RunningCovariance::new(2);
        running.add_sample(&[0., 0.]);
        let mut proposal = ProposalCovariance::diagonal(2, 4.).unwrap();
        assert_eq!(
            proposal.update_diagonal(&running, 0.),
            Err(CovarianceError::NotPositiveDefinite)
        );
        assert_eq!(proposal.covariance()[(0, 0)], 4.);

        running.add_sample(&[f64::INFINITY, 0.]);
        assert_eq!(
            proposal.update_diagonal(&running, 1e-4),
            Err(CovarianceError::NonFinite)
        );
    }

    #[test]
    fn proposal_spread() {
        let proposal = ProposalCovariance::diagonal(2, 4.).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut out = [0f64; 2];
        let n = 20_000;
        let mut sum_sq = [0f64; 2];
        for _ in 0..n {
            proposal.propose(&mut rng, 0.5, &[10., -10.], &mut out);
            sum_sq[0] += (out[0] - 10.).powi(2);
            sum_sq[1] += (out[1] + 10.).powi(2);
        }
        // scale^2 * variance = 1
        for s in sum_sq {
            assert_relative_eq!(s / n as f64, 1., epsilon = 0.05);
        }
    }

    #[test]
    fn step_scale_rules() {
        let settings = AdaptiveMetropolisSettings::default();
        let mut adapt = StepScaleAdapt::new(&settings);
        assert_eq!(adapt.step_scale(), 0.01);

        for i in 1..100 {
            adapt.record(false);
            assert_eq!(adapt.adapt(i), None);
        }
        adapt.record(false);
        assert_eq!(adapt.adapt(100), Some(0.));
        assert_relative_eq!(adapt.step_scale(), 0.01 * 0.95);

        for _ in 0..100 {
            adapt.record(true);
        }
        assert_eq!(adapt.adapt(200), Some(1.));
        assert_relative_eq!(adapt.step_scale(), 0.01 * 0.95 * 1.05);

        // late in the chain the change is damped by 5 / sqrt(i)
        let before = adapt.step_scale();
        adapt.record(false);
        adapt.adapt(40_000);
        assert_relative_eq!(adapt.step_scale(), before * (1. - 5. / 200.));
        assert_eq!(adapt.block_acceptance(), 0.);
    }
}
