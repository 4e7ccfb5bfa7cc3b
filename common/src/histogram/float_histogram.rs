use std::fmt;

use serde::{Deserialize, Serialize};

use super::span::{decode_buckets, encode_buckets, merge_buckets, reduce_resolution, Bucket};
use super::{
    bucket_lower_bound, bucket_upper_bound, check_spans, validate_schema, CounterResetHint,
    HistogramResult, Span,
};

/// A native histogram with float bucket counts. Buckets hold absolute counts.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloatHistogram {
    pub counter_reset_hint: CounterResetHint,
    pub schema: i32,
    pub zero_threshold: f64,
    pub zero_count: f64,
    pub count: f64,
    pub sum: f64,
    pub positive_spans: Vec<Span>,
    pub negative_spans: Vec<Span>,
    pub positive_buckets: Vec<f64>,
    pub negative_buckets: Vec<f64>,
}

/// Working form of a histogram: decoded buckets at a known schema.
struct Decoded {
    schema: i32,
    zero_threshold: f64,
    zero_count: f64,
    positive: Vec<Bucket>,
    negative: Vec<Bucket>,
}

impl Decoded {
    fn to_schema(&self, schema: i32) -> Decoded {
        Decoded {
            schema,
            zero_threshold: self.zero_threshold,
            zero_count: self.zero_count,
            positive: reduce_resolution(&self.positive, self.schema, schema),
            negative: reduce_resolution(&self.negative, self.schema, schema),
        }
    }

    /// Folds every bucket whose lower bound is below `threshold` into the zero
    /// bucket. The threshold grows to the upper bound of a partially covered
    /// bucket, so it may end up above the requested one.
    fn widen_zero_bucket(&mut self, threshold: f64) {
        let mut threshold = threshold.max(self.zero_threshold);
        let schema = self.schema;
        for buckets in [&mut self.positive, &mut self.negative] {
            let mut kept = Vec::with_capacity(buckets.len());
            for &(idx, count) in buckets.iter() {
                if bucket_lower_bound(idx, schema) < threshold {
                    self.zero_count += count;
                    let upper = bucket_upper_bound(idx, schema);
                    if upper > threshold {
                        threshold = upper;
                    }
                } else {
                    kept.push((idx, count));
                }
            }
            *buckets = kept;
        }
        self.zero_threshold = threshold;
    }
}

impl FloatHistogram {
    pub fn validate(&self) -> HistogramResult<()> {
        validate_schema(self.schema)?;
        check_spans(&self.positive_spans, self.positive_buckets.len())?;
        check_spans(&self.negative_spans, self.negative_buckets.len())
    }

    /// Number of populated buckets, positive and negative.
    pub fn bucket_count(&self) -> usize {
        self.positive_buckets.len() + self.negative_buckets.len()
    }

    pub fn positive_bucket_iter(&self) -> impl Iterator<Item = (i32, f64)> + '_ {
        decode_buckets(&self.positive_spans, &self.positive_buckets).into_iter()
    }

    pub fn negative_bucket_iter(&self) -> impl Iterator<Item = (i32, f64)> + '_ {
        decode_buckets(&self.negative_spans, &self.negative_buckets).into_iter()
    }

    fn decode(&self) -> Decoded {
        Decoded {
            schema: self.schema,
            zero_threshold: self.zero_threshold,
            zero_count: self.zero_count,
            positive: decode_buckets(&self.positive_spans, &self.positive_buckets),
            negative: decode_buckets(&self.negative_spans, &self.negative_buckets),
        }
    }

    /// Returns `self + other`.
    pub fn add(&self, other: &FloatHistogram) -> HistogramResult<FloatHistogram> {
        self.combine(other, |a, b| a + b)
    }

    /// Returns `self - other`.
    pub fn sub(&self, other: &FloatHistogram) -> HistogramResult<FloatHistogram> {
        self.combine(other, |a, b| a - b)
    }

    fn combine(&self, other: &FloatHistogram, op: impl Fn(f64, f64) -> f64) -> HistogramResult<FloatHistogram> {
        validate_schema(self.schema)?;
        validate_schema(other.schema)?;

        let schema = self.schema.min(other.schema);
        let mut a = self.decode().to_schema(schema);
        let mut b = other.decode().to_schema(schema);

        // Each widening lands on a bucket boundary, so this settles quickly.
        for _ in 0..64 {
            if a.zero_threshold == b.zero_threshold {
                break;
            }
            if a.zero_threshold < b.zero_threshold {
                a.widen_zero_bucket(b.zero_threshold);
            } else {
                b.widen_zero_bucket(a.zero_threshold);
            }
        }
        let threshold = a.zero_threshold.max(b.zero_threshold);

        // Buckets that cancel out are dropped, so spans stay compact.
        let mut positive = merge_buckets(&a.positive, &b.positive, &op);
        let mut negative = merge_buckets(&a.negative, &b.negative, &op);
        positive.retain(|b| b.1 != 0.0);
        negative.retain(|b| b.1 != 0.0);
        let (positive_spans, positive_buckets) = encode_buckets(&positive);
        let (negative_spans, negative_buckets) = encode_buckets(&negative);

        Ok(FloatHistogram {
            counter_reset_hint: combine_hints(self.counter_reset_hint, other.counter_reset_hint),
            schema,
            zero_threshold: threshold,
            zero_count: op(a.zero_count, b.zero_count),
            count: op(self.count, other.count),
            sum: op(self.sum, other.sum),
            positive_spans,
            negative_spans,
            positive_buckets,
            negative_buckets,
        })
    }

    /// Scales every count and the sum by `factor`.
    pub fn mul(&self, factor: f64) -> FloatHistogram {
        self.scale(|v| v * factor)
    }

    /// Divides every count and the sum by `divisor`. Division by zero follows
    /// IEEE 754, so non-zero fields become infinite.
    pub fn div(&self, divisor: f64) -> FloatHistogram {
        self.scale(|v| v / divisor)
    }

    fn scale(&self, f: impl Fn(f64) -> f64) -> FloatHistogram {
        let mut res = self.clone();
        res.zero_count = f(res.zero_count);
        res.count = f(res.count);
        res.sum = f(res.sum);
        res.positive_buckets.iter_mut().for_each(|v| *v = f(*v));
        res.negative_buckets.iter_mut().for_each(|v| *v = f(*v));
        res
    }

    /// Mean of the given histograms, computed as their sum divided by the count.
    pub fn average<'a>(items: impl IntoIterator<Item = &'a FloatHistogram>) -> HistogramResult<Option<FloatHistogram>> {
        let mut acc: Option<FloatHistogram> = None;
        let mut n = 0_usize;
        for h in items {
            acc = Some(match acc {
                None => h.clone(),
                Some(sum) => sum.add(h)?,
            });
            n += 1;
        }
        Ok(acc.map(|sum| sum.div(n as f64)))
    }

    /// Reports whether `self` cannot follow `previous` without a counter reset
    /// in between.
    pub fn detect_reset(&self, previous: &FloatHistogram) -> bool {
        match self.counter_reset_hint {
            CounterResetHint::CounterReset => return true,
            CounterResetHint::NotCounterReset | CounterResetHint::Gauge => return false,
            CounterResetHint::Unknown => {}
        }
        if self.count < previous.count || self.zero_count < previous.zero_count {
            return true;
        }
        if self.schema > previous.schema || self.zero_threshold < previous.zero_threshold {
            return true;
        }
        let prev = previous.decode().to_schema(self.schema);
        let cur = self.decode();
        buckets_decrease(&prev.positive, &cur.positive) || buckets_decrease(&prev.negative, &cur.negative)
    }
}

fn buckets_decrease(prev: &[Bucket], cur: &[Bucket]) -> bool {
    let mut j = 0;
    for &(idx, count) in prev {
        while j < cur.len() && cur[j].0 < idx {
            j += 1;
        }
        let current = match cur.get(j) {
            Some(&(cidx, c)) if cidx == idx => c,
            _ => 0.0,
        };
        if current < count {
            return true;
        }
    }
    false
}

fn combine_hints(a: CounterResetHint, b: CounterResetHint) -> CounterResetHint {
    use CounterResetHint::*;
    match (a, b) {
        (x, y) if x == y => x,
        (Gauge, _) | (_, Gauge) => Gauge,
        _ => Unknown,
    }
}

impl fmt::Display for FloatHistogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{count:{}, sum:{}", self.count, self.sum)?;
        let mut negative: Vec<Bucket> = self.negative_bucket_iter().collect();
        negative.reverse();
        for (idx, count) in negative {
            if count != 0.0 {
                let upper = -bucket_lower_bound(idx, self.schema);
                let lower = -bucket_upper_bound(idx, self.schema);
                write!(f, ", [{lower},{upper}):{count}")?;
            }
        }
        if self.zero_count != 0.0 {
            write!(f, ", [-{0},{0}]:{1}", self.zero_threshold, self.zero_count)?;
        }
        for (idx, count) in self.positive_bucket_iter() {
            if count != 0.0 {
                let lower = bucket_lower_bound(idx, self.schema);
                let upper = bucket_upper_bound(idx, self.schema);
                write!(f, ", ({lower},{upper}]:{count}")?;
            }
        }
        write!(f, "}}")
    }
}
