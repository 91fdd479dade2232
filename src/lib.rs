//! Locate a gamma source from count rates measured along a path.
//!
//! An adaptive Metropolis sampler explores the posterior of the source
//! position, its activity and the background count rate, given a Poisson
//! likelihood around the count rates of a point source forward model.
//!
//! ```no_run
//! use gamma_locate::{
//!     run_mcmc, simulate_series, straight_road, AdaptiveMetropolisSettings, CountRateModel,
//!     NoiseSettings, PhysicalConstants, SourceParams,
//! };
//! use rand::SeedableRng;
//!
//! # fn main() -> anyhow::Result<()> {
//! let model = CountRateModel::point_source();
//! let truth = SourceParams::new(0., 60., 100., 10.);
//! let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
//! let survey = simulate_series(
//!     &model,
//!     &straight_road(-300., 10., 61),
//!     &truth,
//!     &NoiseSettings::default(),
//!     &mut rng,
//! )?;
//!
//! let settings = AdaptiveMetropolisSettings::default();
//! let output = run_mcmc(
//!     &survey.to_measurements()?,
//!     model,
//!     &PhysicalConstants::default(),
//!     &settings,
//!     None,
//! )?
//! .with_known_truth(truth);
//! println!("{:?}", output.summary());
//! # Ok(())
//! # }
//! ```

pub(crate) mod adapt;
pub(crate) mod chain;
pub(crate) mod config;
pub(crate) mod forward;
pub(crate) mod geometry;
pub(crate) mod interpolate;
pub(crate) mod math;
pub(crate) mod measurement;
pub(crate) mod posterior;
pub(crate) mod sampler;
pub(crate) mod summary;
pub(crate) mod synthetic;
pub(crate) mod trace;

pub use adapt::{CovarianceError, ProposalCovariance, RunningCovariance, StepScaleAdapt};
pub use chain::{AdaptiveMetropolisChain, Chain, Progress};
pub use config::{ForwardModelKind, Nuclide, PhysicalConstants, PriorSettings, Tables};
pub use forward::{
    AngularResponse, CountRateConstants, CountRateModel, ForwardError, ForwardModel,
    MotionAveraged, PointSource, SourceParams, NDIM,
};
pub use geometry::{incidence_angles, normalize_angle, BoundaryReflector, Point};
pub use interpolate::{AttenuationTable, EfficiencyTable, InterpolationError, LookupTable};
pub use math::acceptance_probability;
pub use measurement::{Measurement, MeasurementError, MeasurementSeries};
pub use posterior::{LogDensity, LogpError, PosteriorError, SourcePosterior, SourcePrior};
pub use sampler::{
    initial_params, pooled_draws, run_mcmc, sample_parallel, sample_sequentially,
    AdaptiveMetropolisSettings, McmcOutput, SamplerError,
};
pub use summary::{Histogram, ParameterSummary, PosteriorSummary, SpatialGrid};
pub use synthetic::{
    default_road, grid, motion_road, normalize_by_peak, probe_offsets, simulate_probes,
    simulate_series, straight_road, NoiseSettings, ProbeRates, SimulatedSeries, SyntheticError,
};
pub use trace::{Trace, PARAMETER_NAMES};
