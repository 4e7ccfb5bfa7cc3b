use std::fmt;

use strum_macros::IntoStaticStr;

/// Type of the value an expression evaluates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum ValueType {
    Scalar,
    #[strum(serialize = "vector")]
    InstantVector,
    #[strum(serialize = "matrix")]
    RangeVector,
    String,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
