//! Piecewise-linear lookup tables for the physical calibration data.
//!
//! Two tables feed the forward model: the linear attenuation coefficient of air
//! as a function of photon energy, and the relative detector efficiency as a
//! function of the angle of incidence. Both are loaded once and never mutated.

use std::io::Read;

use itertools::Itertools;
use thiserror::Error;

/// Density of dry air at sea level in g/cm³.
pub const AIR_DENSITY: f64 = 1.205e-3;

/// Mass attenuation coefficients of dry air (MeV, cm²/g).
const AIR_MASS_ATTENUATION: [(f64, f64); 13] = [
    (0.10, 0.1541),
    (0.15, 0.1356),
    (0.20, 0.1233),
    (0.30, 0.1067),
    (0.40, 0.09549),
    (0.50, 0.08712),
    (0.60, 0.08055),
    (0.80, 0.07074),
    (1.00, 0.06358),
    (1.25, 0.05687),
    (1.50, 0.05175),
    (2.00, 0.04447),
    (3.00, 0.03581),
];

#[derive(Error, Debug)]
pub enum InterpolationError {
    #[error("value {value} is outside of the table domain [{min}, {max}]")]
    OutOfDomain { value: f64, min: f64, max: f64 },
    #[error("invalid lookup table: {0}")]
    InvalidTable(String),
    #[error("could not parse lookup table value {value:?} in row {row}")]
    Parse { row: usize, value: String },
    #[error("could not read lookup table")]
    Csv(#[from] csv::Error),
}

/// A one dimensional table with a strictly increasing x axis.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupTable {
    x: Box<[f64]>,
    y: Box<[f64]>,
}

impl LookupTable {
    /// Build a table from its two columns.
    ///
    /// The x axis must be strictly monotonic. A decreasing axis is reversed so that
    /// lookups always search an increasing axis.
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> Result<Self, InterpolationError> {
        if x.len() != y.len() {
            return Err(InterpolationError::InvalidTable(format!(
                "column lengths differ ({} vs {})",
                x.len(),
                y.len()
            )));
        }
        if x.len() < 2 {
            return Err(InterpolationError::InvalidTable(
                "at least two rows are required".into(),
            ));
        }
        if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
            return Err(InterpolationError::InvalidTable(
                "table contains non-finite values".into(),
            ));
        }

        let (mut x, mut y) = (x, y);
        if x[1] < x[0] {
            x.reverse();
            y.reverse();
        }
        if !x.iter().tuple_windows().all(|(a, b)| a < b) {
            return Err(InterpolationError::InvalidTable(
                "x axis is not strictly monotonic".into(),
            ));
        }

        Ok(Self {
            x: x.into(),
            y: y.into(),
        })
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (f64, f64)>) -> Result<Self, InterpolationError> {
        let (x, y) = pairs.into_iter().unzip();
        Self::new(x, y)
    }

    /// Read the first two columns of a csv file with a header row.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, InterpolationError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut pairs = Vec::new();
        for (row, record) in reader.records().enumerate() {
            let record = record?;
            let parse = |column: usize| -> Result<f64, InterpolationError> {
                let value = record.get(column).unwrap_or_default();
                value.parse().map_err(|_| InterpolationError::Parse {
                    row,
                    value: value.to_string(),
                })
            };
            pairs.push((parse(0)?, parse(1)?));
        }
        Self::from_pairs(pairs)
    }

    /// The closed interval covered by the x axis.
    pub fn domain(&self) -> (f64, f64) {
        (self.x[0], self.x[self.x.len() - 1])
    }

    /// Linear interpolation at `value`.
    ///
    /// Values outside of the table domain are an error; the tables hold calibration
    /// data and extrapolating them silently yields wrong physics.
    pub fn interpolate(&self, value: f64) -> Result<f64, InterpolationError> {
        let (min, max) = self.domain();
        if !(min..=max).contains(&value) {
            return Err(InterpolationError::OutOfDomain { value, min, max });
        }

        let upper = self.x.partition_point(|&x| x < value);
        if upper == 0 {
            return Ok(self.y[0]);
        }
        let lower = upper - 1;
        let (x0, x1) = (self.x[lower], self.x[upper]);
        let (y0, y1) = (self.y[lower], self.y[upper]);
        Ok(y0 + (y1 - y0) * (value - x0) / (x1 - x0))
    }
}

/// Linear attenuation coefficient of air (1/m) as a function of photon energy in MeV.
#[derive(Debug, Clone, PartialEq)]
pub struct AttenuationTable {
    table: LookupTable,
}

impl AttenuationTable {
    pub fn new(table: LookupTable) -> Self {
        Self { table }
    }

    /// NIST mass attenuation coefficients of dry air converted to 1/m.
    pub fn dry_air() -> Self {
        let table = LookupTable::from_pairs(
            AIR_MASS_ATTENUATION
                .iter()
                .map(|&(energy, mass_mu)| (energy, mass_mu * AIR_DENSITY * 100.)),
        )
        .expect("Built-in attenuation table is valid");
        Self { table }
    }

    /// Attenuation coefficient for a photon energy given in keV.
    pub fn mu_air(&self, energy_kev: f64) -> Result<f64, InterpolationError> {
        self.table.interpolate(energy_kev / 1000.)
    }
}

/// Relative detector efficiency as a function of the incidence angle in degrees.
///
/// Angles outside the table fail. A table built with [`EfficiencyTable::symmetric`]
/// describes a detector whose response does not depend on the sign of the angle and
/// is queried with the absolute angle.
#[derive(Debug, Clone, PartialEq)]
pub struct EfficiencyTable {
    table: LookupTable,
    symmetric: bool,
}

impl EfficiencyTable {
    pub fn new(table: LookupTable) -> Self {
        Self {
            table,
            symmetric: false,
        }
    }

    /// Response of a detector that is mirror symmetric around its axis.
    pub fn symmetric(table: LookupTable) -> Self {
        Self {
            table,
            symmetric: true,
        }
    }

    pub fn is_symmetric(&self) -> bool {
        self.symmetric
    }

    pub fn into_table(self) -> LookupTable {
        self.table
    }

    pub fn isotropic() -> Self {
        let table = LookupTable::new(vec![-180., 180.], vec![1., 1.])
            .expect("Isotropic efficiency table is valid");
        Self::new(table)
    }

    pub fn relative_efficiency(&self, angle_deg: f64) -> Result<f64, InterpolationError> {
        if self.symmetric {
            self.table.interpolate(angle_deg.abs())
        } else {
            self.table.interpolate(angle_deg)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn interpolates_between_rows() {
        let table = LookupTable::new(vec![0., 1., 3.], vec![0., 10., 30.]).unwrap();
        assert_relative_eq!(table.interpolate(0.5).unwrap(), 5.);
        assert_relative_eq!(table.interpolate(2.).unwrap(), 20.);
        assert_relative_eq!(table.interpolate(3.).unwrap(), 30.);
        assert_relative_eq!(table.interpolate(0.).unwrap(), 0.);
    }

    #[test]
    fn rejects_out_of_domain() {
        let table = LookupTable::new(vec![0., 1.], vec![0., 1.]).unwrap();
        let err = table.interpolate(1.5).unwrap_err();
        assert!(matches!(
            err,
            InterpolationError::OutOfDomain { min, max, .. } if min == 0. && max == 1.
        ));
        assert!(table.interpolate(f64::NAN).is_err());
    }

    #[test]
    fn decreasing_axis_is_reversed() {
        let table = LookupTable::new(vec![2., 1., 0.], vec![4., 2., 0.]).unwrap();
        assert_eq!(table.domain(), (0., 2.));
        assert_relative_eq!(table.interpolate(1.5).unwrap(), 3.);
    }

    #[test]
    fn invalid_tables() {
        assert!(LookupTable::new(vec![0.], vec![0.]).is_err());
        assert!(LookupTable::new(vec![0., 1.], vec![0.]).is_err());
        assert!(LookupTable::new(vec![0., 1., 1.], vec![0., 1., 2.]).is_err());
        assert!(LookupTable::new(vec![0., 2., 1.], vec![0., 1., 2.]).is_err());
        assert!(LookupTable::new(vec![0., f64::INFINITY], vec![0., 1.]).is_err());
    }

    #[test]
    fn reads_csv() {
        let data = "energy_mev,mu\n0.5, 0.01\n1.0, 0.008\n";
        let table = LookupTable::from_csv_reader(data.as_bytes()).unwrap();
        assert_eq!(table.domain(), (0.5, 1.0));
        assert_relative_eq!(table.interpolate(0.75).unwrap(), 0.009);

        let broken = "energy_mev,mu\n0.5,abc\n1.0,0.008\n";
        assert!(matches!(
            LookupTable::from_csv_reader(broken.as_bytes()),
            Err(InterpolationError::Parse { row: 0, .. })
        ));
    }

    #[test]
    fn cesium_attenuation_in_air() {
        let mu = AttenuationTable::dry_air().mu_air(661.66).unwrap();
        assert_relative_eq!(mu, 0.00934, epsilon = 5e-5);
        assert!(AttenuationTable::dry_air().mu_air(10.).is_err());
    }

    #[test]
    fn symmetric_efficiency_uses_absolute_angle() {
        let table = LookupTable::new(vec![0., 90., 180.], vec![1., 0.8, 0.5]).unwrap();
        let efficiency = EfficiencyTable::symmetric(table);
        assert!(efficiency.is_symmetric());
        assert_relative_eq!(
            efficiency.relative_efficiency(-45.).unwrap(),
            efficiency.relative_efficiency(45.).unwrap()
        );
        assert_relative_eq!(efficiency.relative_efficiency(-90.).unwrap(), 0.8);
    }

    #[test]
    fn half_range_efficiency_rejects_negative_angles() {
        let table = LookupTable::new(vec![0., 90., 180.], vec![1., 0.8, 0.5]).unwrap();
        let efficiency = EfficiencyTable::new(table);
        assert!(!efficiency.is_symmetric());
        assert_relative_eq!(efficiency.relative_efficiency(90.).unwrap(), 0.8);
        assert!(matches!(
            efficiency.relative_efficiency(-45.),
            Err(InterpolationError::OutOfDomain { min, max, .. }) if min == 0. && max == 180.
        ));
    }

    proptest! {
        #[test]
        fn interpolation_stays_within_bracket(value in 0f64..3f64) {
            let table = LookupTable::new(vec![0., 1., 3.], vec![5., -1., 2.]).unwrap();
            let out = table.interpolate(value).unwrap();
            prop_assert!((-1. ..=5.).contains(&out));
        }

        #[test]
        fn isotropic_is_flat(angle in -180f64..=180f64) {
            let efficiency = EfficiencyTable::isotropic();
            prop_assert_eq!(efficiency.relative_efficiency(angle).unwrap(), 1.);
        }
    }
}
