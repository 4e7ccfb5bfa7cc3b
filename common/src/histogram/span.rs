use serde::{Deserialize, Serialize};

use super::{BucketCountMismatchSnafu, HistogramResult};

/// A run of consecutive buckets. The first span's offset is the index of its
/// first bucket; later offsets are the gap after the previous span.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub offset: i32,
    pub length: u32,
}

impl Span {
    pub const fn new(offset: i32, length: u32) -> Self {
        Self { offset, length }
    }
}

/// A decoded bucket: absolute index and count.
pub(crate) type Bucket = (i32, f64);

pub(crate) fn bucket_count(spans: &[Span]) -> usize {
    spans.iter().map(|s| s.length as usize).sum()
}

pub(crate) fn check_spans(spans: &[Span], bucket_len: usize) -> HistogramResult<()> {
    let expected = bucket_count(spans);
    snafu::ensure!(
        expected == bucket_len,
        BucketCountMismatchSnafu {
            expected,
            actual: bucket_len
        }
    );
    Ok(())
}

/// Expands spans and absolute counts into (index, count) pairs in ascending
/// index order.
pub(crate) fn decode_buckets(spans: &[Span], counts: &[f64]) -> Vec<Bucket> {
    let mut out = Vec::with_capacity(counts.len());
    let mut idx = 0_i32;
    let mut pos = 0_usize;
    for span in spans {
        idx += span.offset;
        for _ in 0..span.length {
            let Some(count) = counts.get(pos) else {
                return out;
            };
            out.push((idx, *count));
            idx += 1;
            pos += 1;
        }
    }
    out
}

/// Packs ascending (index, count) pairs back into spans and counts.
pub(crate) fn encode_buckets(buckets: &[Bucket]) -> (Vec<Span>, Vec<f64>) {
    let mut spans: Vec<Span> = Vec::new();
    let mut counts = Vec::with_capacity(buckets.len());
    let mut next_idx: Option<i32> = None;
    for &(idx, count) in buckets {
        match (next_idx, spans.last_mut()) {
            (Some(next), Some(last)) if next == idx => last.length += 1,
            _ => {
                let offset = next_idx.map_or(idx, |next| idx - next);
                spans.push(Span::new(offset, 1));
            }
        }
        counts.push(count);
        next_idx = Some(idx + 1);
    }
    (spans, counts)
}

/// Maps buckets onto a coarser schema. Bucket boundaries of schema `s - d`
/// are every `2^d`-th boundary of schema `s`, so an index maps to
/// `((idx - 1) >> d) + 1`.
pub(crate) fn reduce_resolution(buckets: &[Bucket], from: i32, to: i32) -> Vec<Bucket> {
    if from <= to {
        return buckets.to_vec();
    }
    let delta = from - to;
    let mut out: Vec<Bucket> = Vec::with_capacity(buckets.len());
    for &(idx, count) in buckets {
        let target = ((idx - 1) >> delta) + 1;
        match out.last_mut() {
            Some(last) if last.0 == target => last.1 += count,
            _ => out.push((target, count)),
        }
    }
    out
}

/// Merges two ascending bucket lists, combining counts present in both with `op`.
/// A bucket only present in `b` is combined as `op(0, count)`.
pub(crate) fn merge_buckets(a: &[Bucket], b: &[Bucket], op: impl Fn(f64, f64) -> f64) -> Vec<Bucket> {
    let mut out = Vec::with_capacity(a.len().max(b.len()));
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        let (ai, ac) = a[i];
        let (bi, bc) = b[j];
        if ai == bi {
            out.push((ai, op(ac, bc)));
            i += 1;
            j += 1;
        } else if ai < bi {
            out.push((ai, ac));
            i += 1;
        } else {
            out.push((bi, op(0.0, bc)));
            j += 1;
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend(b[j..].iter().map(|&(idx, c)| (idx, op(0.0, c))));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_respects_gaps() {
        let spans = [Span::new(1, 4), Span::new(2, 0), Span::new(2, 3)];
        let counts = [1.0, 4.0, 2.0, 7.0, 5.0, 5.0, 2.0];
        let decoded = decode_buckets(&spans, &counts);
        let indices: Vec<i32> = decoded.iter().map(|b| b.0).collect();
        assert_eq!(indices, vec![1, 2, 3, 4, 9, 10, 11]);
    }

    #[test]
    fn encode_is_inverse_of_decode_for_compact_spans() {
        let buckets = vec![(0, 2.0), (1, 6.0), (2, 8.0), (5, 1.0), (6, 1.0)];
        let (spans, counts) = encode_buckets(&buckets);
        assert_eq!(spans, vec![Span::new(0, 3), Span::new(2, 2)]);
        assert_eq!(decode_buckets(&spans, &counts), buckets);
    }

    #[test]
    fn reduce_resolution_merges_pairs() {
        // schema 1 -> 0: indices 1,2 map to 1; 3,4 map to 2; 0 and -1 map to 0.
        let buckets = vec![(-1, 1.0), (0, 1.0), (1, 2.0), (2, 3.0), (3, 4.0)];
        let reduced = reduce_resolution(&buckets, 1, 0);
        assert_eq!(reduced, vec![(0, 2.0), (1, 5.0), (2, 4.0)]);
    }

    #[test]
    fn merge_subtracts_missing_left_buckets() {
        let a = vec![(0, 5.0), (2, 1.0)];
        let b = vec![(1, 2.0), (2, 1.0)];
        let merged = merge_buckets(&a, &b, |x, y| x - y);
        assert_eq!(merged, vec![(0, 5.0), (1, -2.0), (2, 0.0)]);
    }

    #[test]
    fn check_spans_reports_mismatch() {
        assert!(check_spans(&[Span::new(0, 2)], 2).is_ok());
        assert!(check_spans(&[Span::new(0, 2)], 3).is_err());
    }
}
