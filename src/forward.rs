//! Expected count rates of a point source seen by a moving detector.
//!
//! A source of activity `A` at distance `d` produces
//!
//! ```text
//! rate = A * scale * branching * efficiency * exp(-mu_air * d) / (4 * pi * d^2) + background
//! ```
//!
//! The angular variant multiplies the source term with the relative efficiency
//! at the angle of incidence, the motion averaged variant integrates the source
//! term over the acquisition time of each record.

use std::f64::consts::PI;

use itertools::izip;
use multiversion::multiversion;
use thiserror::Error;

use crate::{
    config::{ForwardModelKind, PhysicalConstants, Tables},
    geometry::{incidence_angles, Point},
    interpolate::{EfficiencyTable, InterpolationError},
};

/// Number of sampled parameters.
pub const NDIM: usize = 4;

#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("lookup table evaluation failed")]
    Interpolation(#[from] InterpolationError),
    #[error("got {positions} positions but an output buffer of length {out}")]
    LengthMismatch { positions: usize, out: usize },
}

/// Location, activity and background count rate of a candidate source.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SourceParams {
    pub x: f64,
    pub y: f64,
    pub activity: f64,
    pub background: f64,
}

impl SourceParams {
    pub fn new(x: f64, y: f64, activity: f64, background: f64) -> Self {
        Self {
            x,
            y,
            activity,
            background,
        }
    }

    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn to_array(&self) -> [f64; NDIM] {
        [self.x, self.y, self.activity, self.background]
    }

    pub fn from_slice(values: &[f64]) -> Self {
        assert!(values.len() == NDIM);
        Self::new(values[0], values[1], values[2], values[3])
    }
}

impl From<[f64; NDIM]> for SourceParams {
    fn from(value: [f64; NDIM]) -> Self {
        Self::from_slice(&value)
    }
}

/// Compute expected count rates at detector positions.
pub trait ForwardModel {
    /// Write the expected count rate at every position in `positions` into `out`.
    fn predict(
        &self,
        positions: &[Point],
        source: &SourceParams,
        out: &mut [f64],
    ) -> Result<(), ForwardError>;

    fn predict_vec(
        &self,
        positions: &[Point],
        source: &SourceParams,
    ) -> Result<Vec<f64>, ForwardError> {
        let mut out = vec![0f64; positions.len()];
        self.predict(positions, source, &mut out)?;
        Ok(out)
    }
}

/// Constants of the inverse square law with air attenuation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CountRateConstants {
    /// `scale * branching ratio * efficiency / (4 pi)`
    prefactor: f64,
    mu_air: f64,
}

impl CountRateConstants {
    pub fn new(constants: &PhysicalConstants, tables: &Tables) -> Result<Self, ForwardError> {
        let mu_air = tables.attenuation.mu_air(constants.nuclide.energy_kev())?;
        Ok(Self::with_attenuation(constants, mu_air))
    }

    pub fn with_attenuation(constants: &PhysicalConstants, mu_air: f64) -> Self {
        let prefactor = constants.scale
            * constants.nuclide.branching_ratio()
            * constants.efficiency
            / (4. * PI);
        Self { prefactor, mu_air }
    }

    pub fn mu_air(&self) -> f64 {
        self.mu_air
    }

    /// Source term (without background) for an activity at a distance.
    pub fn source_rate(&self, activity: f64, distance: f64) -> f64 {
        activity * self.prefactor * (-self.mu_air * distance).exp() / (distance * distance)
    }
}

#[multiversion(targets = "simd")]
fn fill_source_rates(
    constants: &CountRateConstants,
    positions: &[Point],
    source: &Point,
    activity: f64,
    out: &mut [f64],
) {
    izip!(positions, out.iter_mut()).for_each(|(pos, out)| {
        *out = constants.source_rate(activity, pos.distance(source));
    });
}

fn check_lengths(positions: &[Point], out: &[f64]) -> Result<(), ForwardError> {
    if positions.len() != out.len() {
        return Err(ForwardError::LengthMismatch {
            positions: positions.len(),
            out: out.len(),
        });
    }
    Ok(())
}

/// Isotropic point source.
#[derive(Debug, Clone, PartialEq)]
pub struct PointSource {
    constants: CountRateConstants,
}

impl PointSource {
    pub fn new(constants: CountRateConstants) -> Self {
        Self { constants }
    }

    pub fn constants(&self) -> &CountRateConstants {
        &self.constants
    }
}

impl ForwardModel for PointSource {
    fn predict(
        &self,
        positions: &[Point],
        source: &SourceParams,
        out: &mut [f64],
    ) -> Result<(), ForwardError> {
        check_lengths(positions, out)?;
        fill_source_rates(
            &self.constants,
            positions,
            &source.position(),
            source.activity,
            out,
        );
        out.iter_mut().for_each(|rate| *rate += source.background);
        Ok(())
    }
}

/// Point source seen by a detector with a direction dependent efficiency.
///
/// Positions are interpreted as an ordered path, the direction of travel at
/// each record determines the angle of incidence.
#[derive(Debug, Clone, PartialEq)]
pub struct AngularResponse {
    constants: CountRateConstants,
    efficiency: EfficiencyTable,
}

impl AngularResponse {
    pub fn new(constants: CountRateConstants, efficiency: EfficiencyTable) -> Self {
        Self {
            constants,
            efficiency,
        }
    }
}

impl ForwardModel for AngularResponse {
    fn predict(
        &self,
        positions: &[Point],
        source: &SourceParams,
        out: &mut [f64],
    ) -> Result<(), ForwardError> {
        check_lengths(positions, out)?;
        let mut angles = vec![0f64; positions.len()];
        incidence_angles(positions, &source.position(), &mut angles);
        fill_source_rates(
            &self.constants,
            positions,
            &source.position(),
            source.activity,
            out,
        );
        for (rate, &angle) in out.iter_mut().zip(angles.iter()) {
            *rate = *rate * self.efficiency.relative_efficiency(angle)? + source.background;
        }
        Ok(())
    }
}

/// Counts accumulated while the detector moves at constant speed, one record
/// per `acquisition_time` seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionAveraged {
    constants: CountRateConstants,
    acquisition_time: f64,
}

impl MotionAveraged {
    pub fn new(constants: CountRateConstants, acquisition_time: f64) -> Self {
        Self {
            constants,
            acquisition_time,
        }
    }

    pub fn acquisition_time(&self) -> f64 {
        self.acquisition_time
    }
}

impl ForwardModel for MotionAveraged {
    fn predict(
        &self,
        positions: &[Point],
        source: &SourceParams,
        out: &mut [f64],
    ) -> Result<(), ForwardError> {
        check_lengths(positions, out)?;
        fill_source_rates(
            &self.constants,
            positions,
            &source.position(),
            source.activity,
            out,
        );
        let time = self.acquisition_time;
        out.iter_mut()
            .for_each(|rate| *rate = *rate * time + source.background);
        Ok(())
    }
}

/// The forward model variant selected by a [`ForwardModelKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum CountRateModel {
    PointSource(PointSource),
    Angular(AngularResponse),
    MotionAveraged(MotionAveraged),
}

impl CountRateModel {
    pub fn new(
        kind: ForwardModelKind,
        constants: &PhysicalConstants,
        tables: &Tables,
    ) -> Result<Self, ForwardError> {
        let rates = CountRateConstants::new(constants, tables)?;
        Ok(match kind {
            ForwardModelKind::PointSource => CountRateModel::PointSource(PointSource::new(rates)),
            ForwardModelKind::Angular => CountRateModel::Angular(AngularResponse::new(
                rates,
                tables.efficiency.clone(),
            )),
            ForwardModelKind::MotionAveraged { acquisition_time } => {
                CountRateModel::MotionAveraged(MotionAveraged::new(rates, acquisition_time))
            }
        })
    }

    /// Point source model with the default constants and tables.
    pub fn point_source() -> Self {
        Self::new(
            ForwardModelKind::PointSource,
            &PhysicalConstants::default(),
            &Tables::default(),
        )
        .expect("Default tables cover the default nuclide")
    }
}

impl ForwardModel for CountRateModel {
    fn predict(
        &self,
        positions: &[Point],
        source: &SourceParams,
        out: &mut [f64],
    ) -> Result<(), ForwardError> {
        match self {
            CountRateModel::PointSource(model) => model.predict(positions, source, out),
            CountRateModel::Angular(model) => model.predict(positions, source, out),
            CountRateModel::MotionAveraged(model) => model.predict(positions, source, out),
        }
    }
}
