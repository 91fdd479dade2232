use std::io::Read;

use thiserror::Error;

use crate::geometry::Point;

#[derive(Error, Debug)]
pub enum MeasurementError {
    #[error("the measurement series is empty")]
    Empty,
    #[error("record {index} has a non-finite position")]
    NonFinitePosition { index: usize },
    #[error("record {index} has an invalid observed count {value}")]
    InvalidCount { index: usize, value: f64 },
    #[error("row {row} has no column {column}")]
    MissingColumn { row: usize, column: usize },
    #[error("could not parse {value:?} in row {row}, column {column}")]
    Parse {
        row: usize,
        column: usize,
        value: String,
    },
    #[error("could not read measurements")]
    Csv(#[from] csv::Error),
    #[error("column lengths differ")]
    ColumnLengths,
}

/// One record of a survey: where the detector was and what it counted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub x: f64,
    pub y: f64,
    pub observed: f64,
}

impl Measurement {
    pub fn new(x: f64, y: f64, observed: f64) -> Self {
        Self { x, y, observed }
    }

    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// A validated, non-empty series of measurements in path order.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementSeries {
    positions: Box<[Point]>,
    observed: Box<[f64]>,
}

impl MeasurementSeries {
    pub fn new(records: impl IntoIterator<Item = Measurement>) -> Result<Self, MeasurementError> {
        let mut positions = Vec::new();
        let mut observed = Vec::new();
        for (index, record) in records.into_iter().enumerate() {
            if !(record.x.is_finite() && record.y.is_finite()) {
                return Err(MeasurementError::NonFinitePosition { index });
            }
            if !(record.observed.is_finite() && record.observed >= 0.) {
                return Err(MeasurementError::InvalidCount {
                    index,
                    value: record.observed,
                });
            }
            positions.push(record.position());
            observed.push(record.observed);
        }
        if positions.is_empty() {
            return Err(MeasurementError::Empty);
        }
        Ok(Self {
            positions: positions.into(),
            observed: observed.into(),
        })
    }

    pub fn from_columns(x: &[f64], y: &[f64], observed: &[f64]) -> Result<Self, MeasurementError> {
        if x.len() != y.len() || x.len() != observed.len() {
            return Err(MeasurementError::ColumnLengths);
        }
        Self::new(
            x.iter()
                .zip(y)
                .zip(observed)
                .map(|((&x, &y), &observed)| Measurement::new(x, y, observed)),
        )
    }

    /// Parse csv data whose first three columns are x, y and the observed count.
    pub fn from_csv_reader<R: Read>(reader: R, has_headers: bool) -> Result<Self, MeasurementError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(has_headers)
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        let mut records = Vec::new();
        for (row, record) in reader.records().enumerate() {
            let record = record?;
            let field = |column: usize| -> Result<f64, MeasurementError> {
                let value = record
                    .get(column)
                    .ok_or(MeasurementError::MissingColumn { row, column })?;
                value.parse().map_err(|_| MeasurementError::Parse {
                    row,
                    column,
                    value: value.to_string(),
                })
            };
            records.push(Measurement::new(field(0)?, field(1)?, field(2)?));
        }
        Self::new(records)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[Point] {
        &self.positions
    }

    pub fn observed(&self) -> &[f64] {
        &self.observed
    }

    pub fn iter(&self) -> impl Iterator<Item = Measurement> + '_ {
        self.positions
            .iter()
            .zip(self.observed.iter())
            .map(|(pos, &observed)| Measurement::new(pos.x, pos.y, observed))
    }

    /// The record with the largest observed count (the first one on ties).
    pub fn peak(&self) -> Measurement {
        let (idx, _) = self.observed.iter().enumerate().fold(
            (0, f64::NEG_INFINITY),
            |(best, best_val), (idx, &val)| {
                if val > best_val {
                    (idx, val)
                } else {
                    (best, best_val)
                }
            },
        );
        let pos = self.positions[idx];
        Measurement::new(pos.x, pos.y, self.observed[idx])
    }

    pub fn mean_observed(&self) -> f64 {
        self.observed.iter().sum::<f64>() / self.observed.len() as f64
    }
}
