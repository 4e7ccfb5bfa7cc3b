pub use aggregate::*;

use std::fmt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use phf::phf_map;
use strum_macros::{EnumIter, IntoStaticStr};

use crate::ast::ValueType;
use crate::parser::{ParseError, ParseResult};

mod aggregate;

use crate::ast::ValueType::{InstantVector as V, RangeVector as M, Scalar as S, String as Str};

/// Functions callable with the `name(args...)` syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum BuiltinFunction {
    // range functions
    Rate,
    Increase,
    Delta,
    Irate,
    Idelta,
    AvgOverTime,
    SumOverTime,
    CountOverTime,
    MinOverTime,
    MaxOverTime,
    LastOverTime,
    PresentOverTime,
    AbsentOverTime,
    StddevOverTime,
    StdvarOverTime,
    QuantileOverTime,
    Changes,
    Resets,
    // instant functions
    Abs,
    Ceil,
    Floor,
    Exp,
    Ln,
    #[strum(serialize = "log2")]
    Log2,
    #[strum(serialize = "log10")]
    Log10,
    Sqrt,
    Round,
    Sgn,
    Clamp,
    ClampMin,
    ClampMax,
    Timestamp,
    Time,
    Vector,
    Scalar,
    Absent,
    Sort,
    SortDesc,
    LabelReplace,
    LabelJoin,
}

impl BuiltinFunction {
    pub fn name(&self) -> &'static str {
        self.into()
    }

    pub fn meta(&self) -> &'static FunctionMeta {
        // every variant has a catalogue entry, see `catalogue_is_complete`
        &FUNCTIONS[self.name()]
    }

    /// Reports whether the function reads a range vector argument.
    pub fn is_range_function(&self) -> bool {
        self.meta().arg_types.contains(&ValueType::RangeVector)
    }

    /// Functions whose result keeps the metric name of its input.
    pub fn keeps_metric_name(&self) -> bool {
        use BuiltinFunction::*;
        matches!(
            self,
            LastOverTime | Sort | SortDesc | LabelReplace | LabelJoin
        )
    }

    pub fn return_type(&self) -> ValueType {
        self.meta().return_type
    }
}

impl Display for BuiltinFunction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Catalogue entry for a function.
#[derive(Debug, Clone)]
pub struct FunctionMeta {
    pub name: &'static str,
    pub function: BuiltinFunction,
    pub arg_types: &'static [ValueType],
    /// 0 for a fixed arity, `n > 0` for up to `n` optional trailing arguments,
    /// -1 for an unbounded repetition of the last argument type.
    pub variadic: i32,
    pub return_type: ValueType,
}

impl FunctionMeta {
    pub fn lookup(name: &str) -> Option<&'static FunctionMeta> {
        FUNCTIONS.get(name)
    }

    pub fn min_args(&self) -> usize {
        if self.variadic == 0 {
            self.arg_types.len()
        } else {
            self.arg_types.len().saturating_sub(1)
        }
    }

    pub fn max_args(&self) -> Option<usize> {
        match self.variadic {
            0 => Some(self.arg_types.len()),
            n if n > 0 => Some(self.arg_types.len() - 1 + n as usize),
            _ => None,
        }
    }

    /// Type expected at argument position `idx`.
    pub fn arg_type(&self, idx: usize) -> ValueType {
        self.arg_types
            .get(idx)
            .or_else(|| self.arg_types.last())
            .copied()
            .unwrap_or(ValueType::Scalar)
    }
}

impl Display for FunctionMeta {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, arg) in self.arg_types.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{arg}")?;
        }
        if self.variadic != 0 {
            write!(f, "...")?;
        }
        write!(f, ") -> {}", self.return_type)
    }
}

impl FromStr for BuiltinFunction {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lookup_function(s).map(|meta| meta.function)
    }
}

pub fn lookup_function(name: &str) -> ParseResult<&'static FunctionMeta> {
    FunctionMeta::lookup(name).ok_or_else(|| ParseError::InvalidFunction(name.to_string()))
}

macro_rules! func {
    ($name: literal, $variant: ident, [$($arg: expr),*], $variadic: expr, $ret: expr) => {
        FunctionMeta {
            name: $name,
            function: BuiltinFunction::$variant,
            arg_types: &[$($arg),*],
            variadic: $variadic,
            return_type: $ret,
        }
    };
}

static FUNCTIONS: phf::Map<&'static str, FunctionMeta> = phf_map! {
    "rate" => func!("rate", Rate, [M], 0, V),
    "increase" => func!("increase", Increase, [M], 0, V),
    "delta" => func!("delta", Delta, [M], 0, V),
    "irate" => func!("irate", Irate, [M], 0, V),
    "idelta" => func!("idelta", Idelta, [M], 0, V),
    "avg_over_time" => func!("avg_over_time", AvgOverTime, [M], 0, V),
    "sum_over_time" => func!("sum_over_time", SumOverTime, [M], 0, V),
    "count_over_time" => func!("count_over_time", CountOverTime, [M], 0, V),
    "min_over_time" => func!("min_over_time", MinOverTime, [M], 0, V),
    "max_over_time" => func!("max_over_time", MaxOverTime, [M], 0, V),
    "last_over_time" => func!("last_over_time", LastOverTime, [M], 0, V),
    "present_over_time" => func!("present_over_time", PresentOverTime, [M], 0, V),
    "absent_over_time" => func!("absent_over_time", AbsentOverTime, [M], 0, V),
    "stddev_over_time" => func!("stddev_over_time", StddevOverTime, [M], 0, V),
    "stdvar_over_time" => func!("stdvar_over_time", StdvarOverTime, [M], 0, V),
    "quantile_over_time" => func!("quantile_over_time", QuantileOverTime, [S, M], 0, V),
    "changes" => func!("changes", Changes, [M], 0, V),
    "resets" => func!("resets", Resets, [M], 0, V),
    "abs" => func!("abs", Abs, [V], 0, V),
    "ceil" => func!("ceil", Ceil, [V], 0, V),
    "floor" => func!("floor", Floor, [V], 0, V),
    "exp" => func!("exp", Exp, [V], 0, V),
    "ln" => func!("ln", Ln, [V], 0, V),
    "log2" => func!("log2", Log2, [V], 0, V),
    "log10" => func!("log10", Log10, [V], 0, V),
    "sqrt" => func!("sqrt", Sqrt, [V], 0, V),
    "round" => func!("round", Round, [V, S], 1, V),
    "sgn" => func!("sgn", Sgn, [V], 0, V),
    "clamp" => func!("clamp", Clamp, [V, S, S], 0, V),
    "clamp_min" => func!("clamp_min", ClampMin, [V, S], 0, V),
    "clamp_max" => func!("clamp_max", ClampMax, [V, S], 0, V),
    "timestamp" => func!("timestamp", Timestamp, [V], 0, V),
    "time" => func!("time", Time, [], 0, S),
    "vector" => func!("vector", Vector, [S], 0, V),
    "scalar" => func!("scalar", Scalar, [V], 0, S),
    "absent" => func!("absent", Absent, [V], 0, V),
    "sort" => func!("sort", Sort, [V], 0, V),
    "sort_desc" => func!("sort_desc", SortDesc, [V], 0, V),
    "label_replace" => func!("label_replace", LabelReplace, [V, Str, Str, Str, Str], 0, V),
    "label_join" => func!("label_join", LabelJoin, [V, Str, Str, Str], -1, V),
};
