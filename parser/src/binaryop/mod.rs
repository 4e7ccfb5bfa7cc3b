use std::fmt;
use std::str::FromStr;

use crate::parser::{ParseError, ParseResult};

/// Binary operators, ordered by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Atan2,
    Eql,
    NotEq,
    Gt,
    Lt,
    Gte,
    Lte,
    And,
    Or,
    Unless,
}

impl Operator {
    pub const fn as_str(&self) -> &'static str {
        use Operator::*;
        match self {
            Add => "+",
            Sub => "-",
            Mul => "*",
            Div => "/",
            Mod => "%",
            Pow => "^",
            Atan2 => "atan2",
            Eql => "==",
            NotEq => "!=",
            Gt => ">",
            Lt => "<",
            Gte => ">=",
            Lte => "<=",
            And => "and",
            Or => "or",
            Unless => "unless",
        }
    }

    pub const fn precedence(&self) -> u8 {
        use Operator::*;
        match self {
            Or => 1,
            And | Unless => 2,
            Eql | NotEq | Gt | Lt | Gte | Lte => 3,
            Add | Sub => 4,
            Mul | Div | Mod | Atan2 => 5,
            Pow => 6,
        }
    }

    pub const fn is_right_associative(&self) -> bool {
        matches!(self, Operator::Pow)
    }

    pub const fn is_comparison(&self) -> bool {
        use Operator::*;
        matches!(self, Eql | NotEq | Gt | Lt | Gte | Lte)
    }

    pub const fn is_set_operator(&self) -> bool {
        use Operator::*;
        matches!(self, And | Or | Unless)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use Operator::*;
        let op = match s.to_ascii_lowercase().as_str() {
            "+" => Add,
            "-" => Sub,
            "*" => Mul,
            "/" => Div,
            "%" => Mod,
            "^" => Pow,
            "atan2" => Atan2,
            "==" => Eql,
            "!=" => NotEq,
            ">" => Gt,
            "<" => Lt,
            ">=" => Gte,
            "<=" => Lte,
            "and" => And,
            "or" => Or,
            "unless" => Unless,
            _ => return Err(ParseError::General(format!("unknown binary operator {s}"))),
        };
        Ok(op)
    }
}

#[inline]
fn op_eq(left: f64, right: f64) -> bool {
    left == right
}

#[inline]
fn op_neq(left: f64, right: f64) -> bool {
    left != right
}

/// Evaluates a comparison. NaN compares unequal to everything, itself included.
pub fn compare(op: Operator, left: f64, right: f64) -> ParseResult<bool> {
    use Operator::*;
    let res = match op {
        Eql => op_eq(left, right),
        NotEq => op_neq(left, right),
        Gt => left > right,
        Lt => left < right,
        Gte => left >= right,
        Lte => left <= right,
        _ => {
            return Err(ParseError::General(format!(
                "operator {op} is not a comparison"
            )))
        }
    };
    Ok(res)
}

/// Applies an arithmetic or comparison operator to two floats. The boolean
/// reports whether the element is kept; comparisons without `bool` keep the
/// left value only when the comparison holds.
pub fn scalar_binary_operation(
    op: Operator,
    lhs: f64,
    rhs: f64,
    return_bool: bool,
) -> ParseResult<(f64, bool)> {
    use Operator::*;

    if op.is_comparison() {
        let val = compare(op, lhs, rhs)?;
        if return_bool {
            return Ok((if val { 1.0 } else { 0.0 }, true));
        }
        return Ok((lhs, val));
    }
    let value = match op {
        Add => lhs + rhs,
        Sub => lhs - rhs,
        Mul => lhs * rhs,
        Div => lhs / rhs,
        Pow => lhs.powf(rhs),
        Mod => lhs % rhs,
        Atan2 => lhs.atan2(rhs),
        _ => {
            return Err(ParseError::General(format!(
                "operator {op} not allowed between scalars"
            )))
        }
    };
    Ok((value, true))
}
