use std::fmt;

use serde::Serialize;

use promql_common::histogram::FloatHistogram;
use promql_common::label::Labels;

/// Bit pattern of the NaN written to mark a series as stale.
pub const STALE_NAN_BITS: u64 = 0x7ff0000000000002;

pub fn stale_nan() -> f64 {
    f64::from_bits(STALE_NAN_BITS)
}

#[inline]
pub fn is_stale_nan(v: f64) -> bool {
    v.to_bits() == STALE_NAN_BITS
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FPoint {
    pub t: i64,
    pub f: f64,
}

impl FPoint {
    pub fn new(t: i64, f: f64) -> Self {
        Self { t, f }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HPoint {
    pub t: i64,
    pub h: FloatHistogram,
}

impl HPoint {
    pub fn new(t: i64, h: FloatHistogram) -> Self {
        Self { t, h }
    }

    /// Memory weight of the point in samples.
    pub fn size(&self) -> usize {
        histogram_size(&self.h)
    }
}

pub(crate) fn histogram_size(h: &FloatHistogram) -> usize {
    1 + h.bucket_count()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SampleValue {
    Float(f64),
    Histogram(FloatHistogram),
}

impl SampleValue {
    pub fn size(&self) -> usize {
        match self {
            SampleValue::Float(_) => 1,
            SampleValue::Histogram(h) => histogram_size(h),
        }
    }
}

/// A single value of an instant vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub metric: Labels,
    pub t: i64,
    pub value: SampleValue,
}

impl Sample {
    pub fn float(metric: Labels, t: i64, f: f64) -> Self {
        Self {
            metric,
            t,
            value: SampleValue::Float(f),
        }
    }

    pub fn histogram(metric: Labels, t: i64, h: FloatHistogram) -> Self {
        Self {
            metric,
            t,
            value: SampleValue::Histogram(h),
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self.value {
            SampleValue::Float(f) => Some(f),
            SampleValue::Histogram(_) => None,
        }
    }

    pub fn as_histogram(&self) -> Option<&FloatHistogram> {
        match &self.value {
            SampleValue::Histogram(h) => Some(h),
            SampleValue::Float(_) => None,
        }
    }

    pub fn size(&self) -> usize {
        self.value.size()
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            SampleValue::Float(v) => write!(f, "{} => {} @[{}]", self.metric, v, self.t),
            SampleValue::Histogram(h) => write!(f, "{} => {} @[{}]", self.metric, h, self.t),
        }
    }
}

pub type Vector = Vec<Sample>;

/// Point sequences of one series. Floats and histograms are kept apart, each
/// in timestamp order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Series {
    pub metric: Labels,
    pub floats: Vec<FPoint>,
    pub histograms: Vec<HPoint>,
}

impl Series {
    pub fn new(metric: Labels) -> Self {
        Self {
            metric,
            floats: vec![],
            histograms: vec![],
        }
    }

    pub fn with_floats(metric: Labels, floats: Vec<FPoint>) -> Self {
        Self {
            metric,
            floats,
            histograms: vec![],
        }
    }

    pub fn len(&self) -> usize {
        self.floats.len() + self.histograms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.floats.is_empty() && self.histograms.is_empty()
    }

    pub fn size(&self) -> usize {
        self.floats.len() + self.histograms.iter().map(HPoint::size).sum::<usize>()
    }

    pub(crate) fn push(&mut self, t: i64, value: SampleValue) {
        match value {
            SampleValue::Float(f) => self.floats.push(FPoint::new(t, f)),
            SampleValue::Histogram(h) => self.histograms.push(HPoint::new(t, h)),
        }
    }
}

impl fmt::Display for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} =>", self.metric)?;
        for p in &self.floats {
            write!(f, "\n{} @[{}]", p.f, p.t)?;
        }
        for p in &self.histograms {
            write!(f, "\n{} @[{}]", p.h, p.t)?;
        }
        Ok(())
    }
}

pub type Matrix = Vec<Series>;

pub fn vector_size(v: &[Sample]) -> usize {
    v.iter().map(Sample::size).sum()
}

pub fn matrix_size(m: &[Series]) -> usize {
    m.iter().map(Series::size).sum()
}

#[cfg(test)]
mod tests {
    use promql_common::histogram::Span;

    use super::*;

    #[test]
    fn stale_marker_is_a_distinct_nan() {
        assert!(is_stale_nan(stale_nan()));
        assert!(stale_nan().is_nan());
        assert!(!is_stale_nan(f64::NAN));
    }

    #[test]
    fn histogram_points_weigh_their_buckets() {
        let h = FloatHistogram {
            count: 5.0,
            positive_spans: vec![Span::new(0, 4)],
            positive_buckets: vec![1.0, 2.0, 1.0, 1.0],
            ..Default::default()
        };
        let mut series = Series::new(Labels::from_pairs(&[("__name__", "x")]));
        series.push(0, SampleValue::Float(1.0));
        series.push(10, SampleValue::Histogram(h));
        assert_eq!(series.len(), 2);
        assert_eq!(series.size(), 6);
    }
}
