use std::fmt;

use serde::Serialize;

/// Non-fatal warnings collected while evaluating a query. Duplicates are
/// dropped, first occurrence order is kept.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct Annotations(Vec<String>);

impl Annotations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<S: Into<String>>(&mut self, msg: S) {
        let msg = msg.into();
        if !self.0.contains(&msg) {
            self.0.push(msg);
        }
    }

    pub fn merge(&mut self, other: Annotations) {
        for msg in other.0 {
            self.add(msg);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.0.iter().any(|m| m.contains(needle))
    }
}

impl fmt::Display for Annotations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("; "))
    }
}

pub(crate) fn mixed_floats_histograms(op: &str) -> String {
    format!("PromQL warning: encountered a mix of histograms and floats for aggregation {op}")
}

pub(crate) fn histogram_ignored(op: &str) -> String {
    format!("PromQL info: ignored histogram in {op} aggregation")
}

pub(crate) fn mixed_floats_histograms_in_range(func: &str) -> String {
    format!("PromQL warning: encountered a mix of histograms and floats for metric name in {func}")
}

pub(crate) fn incompatible_binop(lhs: &str, op: &str, rhs: &str) -> String {
    format!("PromQL info: incompatible sample types encountered for binary operator {op:?}: {lhs} {op} {rhs}")
}

pub(crate) fn invalid_ratio(ratio: f64) -> String {
    format!("PromQL warning: ratio value should be between -1 and 1, got {ratio}, capping to {}", ratio.clamp(-1.0, 1.0))
}

pub(crate) fn invalid_quantile(q: f64) -> String {
    format!("PromQL warning: quantile value should be between 0 and 1, got {q}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_are_dropped() {
        let mut a = Annotations::new();
        a.add("x");
        a.add("y");
        let mut b = Annotations::new();
        b.add("y");
        b.add("z");
        a.merge(b);
        assert_eq!(a.len(), 3);
        assert_eq!(a.to_string(), "x; y; z");
    }
}
