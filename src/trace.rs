use arrow::array::{ArrayBuilder, Float64Builder, StructArray};
use arrow::datatypes::{DataType, Field};

use crate::forward::{SourceParams, NDIM};

/// Names of the sampled parameters, in the order of a draw.
pub const PARAMETER_NAMES: [&str; NDIM] = ["src_x", "src_y", "activity", "background"];

/// The draws of one chain in iteration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trace {
    draws: Vec<[f64; NDIM]>,
}

impl Trace {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            draws: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, draw: &[f64]) {
        let mut value = [0f64; NDIM];
        value.copy_from_slice(draw);
        self.draws.push(value);
    }

    pub fn len(&self) -> usize {
        self.draws.len()
    }

    pub fn is_empty(&self) -> bool {
        self.draws.is_empty()
    }

    pub fn draws(&self) -> &[[f64; NDIM]] {
        &self.draws
    }

    pub fn params(&self) -> impl Iterator<Item = SourceParams> + '_ {
        self.draws.iter().map(|&draw| draw.into())
    }

    /// The draws after the first `burn_in`, empty if the burn in covers the
    /// whole trace.
    pub fn after_burn_in(&self, burn_in: usize) -> &[[f64; NDIM]] {
        &self.draws[burn_in.min(self.draws.len())..]
    }

    pub fn column(&self, index: usize) -> Vec<f64> {
        assert!(index < NDIM);
        self.draws.iter().map(|draw| draw[index]).collect()
    }

    pub fn all_finite(&self) -> bool {
        self.draws.iter().flatten().all(|val| val.is_finite())
    }

    /// One non-nullable `Float64` column per parameter.
    pub fn to_arrow(&self, burn_in: usize) -> StructArray {
        let draws = self.after_burn_in(burn_in);
        let mut builders: Vec<Float64Builder> = (0..NDIM)
            .map(|_| Float64Builder::with_capacity(draws.len()))
            .collect();
        for draw in draws {
            for (builder, &value) in builders.iter_mut().zip(draw.iter()) {
                builder.append_value(value);
            }
        }

        let fields: Vec<_> = PARAMETER_NAMES
            .iter()
            .map(|&name| Field::new(name, DataType::Float64, false))
            .collect();
        let arrays = builders
            .iter_mut()
            .map(ArrayBuilder::finish)
            .collect();
        StructArray::new(fields.into(), arrays, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, Float64Array};
    use pretty_assertions::assert_eq;

    fn trace() -> Trace {
        let mut trace = Trace::with_capacity(3);
        trace.push(&[1., 2., 3., 4.]);
        trace.push(&[5., 6., 7., 8.]);
        trace.push(&[9., 10., 11., 12.]);
        trace
    }

    #[test]
    fn burn_in_is_a_suffix() {
        let trace = trace();
        assert_eq!(trace.len(), 3);
        assert_eq!(trace.after_burn_in(1), &[[5., 6., 7., 8.], [9., 10., 11., 12.]]);
        assert!(trace.after_burn_in(10).is_empty());
        assert_eq!(trace.column(2), vec![3., 7., 11.]);
        assert_eq!(trace.params().nth(1).unwrap().activity, 7.);
    }

    #[test]
    fn arrow_export() {
        let array = trace().to_arrow(1);
        assert_eq!(array.len(), 2);
        assert_eq!(array.num_columns(), 4);
        let activity = array
            .column_by_name("activity")
            .unwrap()
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!(activity.values().to_vec(), vec![7., 11.]);
    }
}
