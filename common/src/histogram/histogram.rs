use serde::{Deserialize, Serialize};

use super::{check_spans, validate_schema, CounterResetHint, FloatHistogram, HistogramResult, Span};

/// A native histogram with integer counts. Buckets are delta encoded: each
/// value is the difference to the previous bucket of the same sign.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub counter_reset_hint: CounterResetHint,
    pub schema: i32,
    pub zero_threshold: f64,
    pub zero_count: u64,
    pub count: u64,
    pub sum: f64,
    pub positive_spans: Vec<Span>,
    pub negative_spans: Vec<Span>,
    pub positive_buckets: Vec<i64>,
    pub negative_buckets: Vec<i64>,
}

impl Histogram {
    pub fn validate(&self) -> HistogramResult<()> {
        validate_schema(self.schema)?;
        check_spans(&self.positive_spans, self.positive_buckets.len())?;
        check_spans(&self.negative_spans, self.negative_buckets.len())
    }

    pub fn to_float(&self) -> FloatHistogram {
        FloatHistogram {
            counter_reset_hint: self.counter_reset_hint,
            schema: self.schema,
            zero_threshold: self.zero_threshold,
            zero_count: self.zero_count as f64,
            count: self.count as f64,
            sum: self.sum,
            positive_spans: self.positive_spans.clone(),
            negative_spans: self.negative_spans.clone(),
            positive_buckets: absolute_counts(&self.positive_buckets),
            negative_buckets: absolute_counts(&self.negative_buckets),
        }
    }
}

fn absolute_counts(deltas: &[i64]) -> Vec<f64> {
    let mut current = 0_i64;
    deltas
        .iter()
        .map(|d| {
            current += d;
            current as f64
        })
        .collect()
}

impl From<&Histogram> for FloatHistogram {
    fn from(h: &Histogram) -> Self {
        h.to_float()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_float_accumulates_deltas() {
        let h = Histogram {
            schema: 0,
            count: 25,
            sum: 1234.5,
            zero_threshold: 0.001,
            zero_count: 4,
            positive_spans: vec![Span::new(0, 2), Span::new(1, 2)],
            positive_buckets: vec![1, 1, -1, 0],
            negative_spans: vec![Span::new(0, 2), Span::new(2, 2)],
            negative_buckets: vec![2, 2, -3, 8],
            ..Default::default()
        };
        let fh = h.to_float();
        assert_eq!(fh.positive_buckets, vec![1.0, 2.0, 1.0, 1.0]);
        assert_eq!(fh.negative_buckets, vec![2.0, 4.0, 1.0, 9.0]);
        assert_eq!(fh.count, 25.0);
        assert_eq!(fh.zero_count, 4.0);
        assert!(h.validate().is_ok());
    }
}
