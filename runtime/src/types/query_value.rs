use std::fmt;

use serde::Serialize;

use promql_parser::ast::ValueType;

use super::{matrix_size, vector_size, Matrix, Vector};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Scalar {
    pub t: i64,
    pub v: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StringValue {
    pub t: i64,
    pub v: String,
}

/// Result of evaluating an expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum QueryValue {
    Scalar(Scalar),
    Vector(Vector),
    Matrix(Matrix),
    String(StringValue),
}

impl QueryValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            QueryValue::Scalar(_) => ValueType::Scalar,
            QueryValue::Vector(_) => ValueType::InstantVector,
            QueryValue::Matrix(_) => ValueType::RangeVector,
            QueryValue::String(_) => ValueType::String,
        }
    }

    /// Memory weight of the value in samples. Strings weigh nothing.
    pub fn size(&self) -> usize {
        match self {
            QueryValue::Scalar(_) => 1,
            QueryValue::Vector(v) => vector_size(v),
            QueryValue::Matrix(m) => matrix_size(m),
            QueryValue::String(_) => 0,
        }
    }

    pub fn as_scalar(&self) -> Option<Scalar> {
        match self {
            QueryValue::Scalar(s) => Some(*s),
            _ => None,
        }
    }

    pub fn into_vector(self) -> Option<Vector> {
        match self {
            QueryValue::Vector(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_matrix(self) -> Option<Matrix> {
        match self {
            QueryValue::Matrix(m) => Some(m),
            _ => None,
        }
    }
}

impl fmt::Display for QueryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryValue::Scalar(s) => write!(f, "scalar: {} @[{}]", s.v, s.t),
            QueryValue::String(s) => write!(f, "string: {} @[{}]", s.v, s.t),
            QueryValue::Vector(v) => {
                for (i, sample) in v.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{sample}")?;
                }
                Ok(())
            }
            QueryValue::Matrix(m) => {
                for (i, series) in m.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{series}")?;
                }
                Ok(())
            }
        }
    }
}
