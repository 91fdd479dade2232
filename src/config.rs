//! Physical constants and model configuration.

use std::{fs::File, path::Path};

use anyhow::{Context, Result};

use crate::interpolate::{AttenuationTable, EfficiencyTable, LookupTable};

/// Gamma emitters with a tabulated dominant line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Nuclide {
    #[default]
    Cs137,
    Co60,
}

impl Nuclide {
    /// Photon energy of the dominant line in keV.
    pub fn energy_kev(&self) -> f64 {
        match self {
            Nuclide::Cs137 => 661.66,
            Nuclide::Co60 => 1332.5,
        }
    }

    pub fn branching_ratio(&self) -> f64 {
        match self {
            Nuclide::Cs137 => 0.851,
            Nuclide::Co60 => 0.999826,
        }
    }
}

/// Source and detector constants shared by every forward model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicalConstants {
    pub nuclide: Nuclide,
    /// Converts the activity parameter into decays per second (MBq -> Bq).
    pub scale: f64,
    /// Nominal detector efficiency.
    pub efficiency: f64,
}

impl Default for PhysicalConstants {
    fn default() -> Self {
        Self {
            nuclide: Nuclide::Cs137,
            scale: 1e6,
            efficiency: 0.00216,
        }
    }
}

/// Parameters of the prior over activity and background and of the
/// domain guard on the source position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorSettings {
    /// Shape of the gamma prior on `activity / scale`.
    pub activity_shape: f64,
    /// Rate (inverse scale) of the gamma prior on `activity / scale`.
    pub activity_rate: f64,
    pub background_mean: f64,
    pub background_sd: f64,
    /// Candidate sources farther than this from the origin have zero likelihood.
    pub max_source_distance: f64,
}

impl Default for PriorSettings {
    fn default() -> Self {
        Self {
            activity_shape: 1.2,
            activity_rate: 1e-4,
            background_mean: 10.,
            background_sd: 10.,
            max_source_distance: 2000.,
        }
    }
}

/// Which variant of the count rate model to evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ForwardModelKind {
    /// Isotropic point source with air attenuation.
    #[default]
    PointSource,
    /// Point source weighted by the angular efficiency of the detector.
    Angular,
    /// Counts integrated over `acquisition_time` seconds per record.
    MotionAveraged { acquisition_time: f64 },
}

/// The lookup tables consumed by the forward model.
#[derive(Debug, Clone, PartialEq)]
pub struct Tables {
    pub attenuation: AttenuationTable,
    pub efficiency: EfficiencyTable,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            attenuation: AttenuationTable::dry_air(),
            efficiency: EfficiencyTable::isotropic(),
        }
    }
}

impl Tables {
    /// Load both tables from csv files with a header row and two columns.
    pub fn from_csv_files(
        attenuation: impl AsRef<Path>,
        efficiency: impl AsRef<Path>,
    ) -> Result<Self> {
        let attenuation = attenuation.as_ref();
        let efficiency = efficiency.as_ref();

        let file = File::open(attenuation)
            .with_context(|| format!("Failed to open attenuation table {:?}", attenuation))?;
        let attenuation = LookupTable::from_csv_reader(file)
            .with_context(|| format!("Failed to read attenuation table {:?}", attenuation))?;

        let file = File::open(efficiency)
            .with_context(|| format!("Failed to open efficiency table {:?}", efficiency))?;
        let efficiency = LookupTable::from_csv_reader(file)
            .with_context(|| format!("Failed to read efficiency table {:?}", efficiency))?;

        Ok(Self {
            attenuation: AttenuationTable::new(attenuation),
            efficiency: EfficiencyTable::new(efficiency),
        })
    }

    /// Query the efficiency table with the absolute incidence angle.
    pub fn with_symmetric_efficiency(self) -> Self {
        Self {
            efficiency: EfficiencyTable::symmetric(self.efficiency.into_table()),
            ..self
        }
    }
}
