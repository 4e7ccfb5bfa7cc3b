//! AggregateFunction module contains enum for available aggregation functions.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use strum_macros::{EnumIter, IntoStaticStr};

use crate::ast::ValueType;
use crate::parser::ParseError;

/// Aggregation operators
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum AggregateFunction {
    /// calculate sum over dimensions
    Sum,
    /// calculate the average over dimensions
    Avg,
    /// count the number of elements in the vector
    Count,
    /// calculate minimum over dimensions
    Min,
    /// calculate maximum over dimensions
    Max,
    /// all values in the resulting vector are 1
    Group,
    /// calculate population standard deviation over dimensions
    Stddev,
    /// calculate population standard variance over dimensions
    Stdvar,
    /// largest k elements by sample value
    Topk,
    /// smallest k elements by sample value
    Bottomk,
    /// calculate φ-quantile (0 ≤ φ ≤ 1) over dimensions
    Quantile,
    /// count the number of elements with the same value
    CountValues,
    /// k elements of each group, without ordering by value
    Limitk,
    /// a deterministic ratio of the elements of each group
    LimitRatio,
}

impl AggregateFunction {
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Type of the leading parameter, for operators that take one.
    pub const fn param_type(&self) -> Option<ValueType> {
        use AggregateFunction::*;
        match self {
            Topk | Bottomk | Quantile | Limitk | LimitRatio => Some(ValueType::Scalar),
            CountValues => Some(ValueType::String),
            _ => None,
        }
    }

    pub const fn has_param(&self) -> bool {
        self.param_type().is_some()
    }

    /// Operators whose output series keep their input labels.
    pub const fn keeps_input_labels(&self) -> bool {
        use AggregateFunction::*;
        matches!(self, Topk | Bottomk | Limitk | LimitRatio)
    }
}

impl Display for AggregateFunction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for AggregateFunction {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use AggregateFunction::*;
        let func = match s.to_ascii_lowercase().as_str() {
            "sum" => Sum,
            "avg" => Avg,
            "count" => Count,
            "min" => Min,
            "max" => Max,
            "group" => Group,
            "stddev" => Stddev,
            "stdvar" => Stdvar,
            "topk" => Topk,
            "bottomk" => Bottomk,
            "quantile" => Quantile,
            "count_values" => CountValues,
            "limitk" => Limitk,
            "limit_ratio" => LimitRatio,
            _ => return Err(ParseError::InvalidFunction(s.to_string())),
        };
        Ok(func)
    }
}

pub fn is_aggregate_function(name: &str) -> bool {
    AggregateFunction::from_str(name).is_ok()
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn names_round_trip() {
        for func in AggregateFunction::iter() {
            assert_eq!(AggregateFunction::from_str(func.name()), Ok(func));
        }
        assert_eq!(AggregateFunction::LimitRatio.name(), "limit_ratio");
        assert_eq!(AggregateFunction::from_str("SUM"), Ok(AggregateFunction::Sum));
    }

    #[test]
    fn params() {
        assert_eq!(AggregateFunction::CountValues.param_type(), Some(ValueType::String));
        assert!(AggregateFunction::Limitk.has_param());
        assert!(!AggregateFunction::Sum.has_param());
    }
}
