use std::fmt;
use std::ops::Range;

use thiserror::Error;

use crate::parser::tokens::Token;

pub type ParseResult<T> = Result<T, ParseError>;

/// Byte range of a token within the query text.
pub type Span = Range<usize>;

#[derive(Debug, PartialEq, Eq, Clone, Error)]
pub enum ParseError {
    #[error("{0}")]
    ArgumentError(String),
    #[error(transparent)]
    Unexpected(PositionedError),
    #[error("expected positive duration: found `{0}`")]
    InvalidDuration(String),
    #[error("expected number: found `{0}`")]
    InvalidNumber(String),
    #[error(transparent)]
    InvalidArgCount(ArgCountError),
    #[error("syntax error: {0}")]
    SyntaxError(String),
    #[error("{0}")]
    General(String),
    #[error("invalid regex: {0}")]
    InvalidRegex(String),
    #[error("{0}")]
    InvalidSelector(String),
    #[error("unknown function with name {0:?}")]
    InvalidFunction(String),
    #[error("{0}")]
    InvalidExpression(String),
}

/// An error tied to a position in a single-line query.
#[derive(Debug, PartialEq, Eq, Clone, Error)]
#[error("1:{}: parse error: {msg}", .pos.start + 1)]
pub struct PositionedError {
    pub pos: Span,
    pub msg: String,
}

pub(crate) fn invalid_token_error(expected: &[Token], found: Option<Token>, range: &Span) -> ParseError {
    let found = match found {
        Some(tok) => format!("unexpected {tok}"),
        None => "unexpected end of input".to_string(),
    };
    let quoted: Vec<String> = expected.iter().map(|t| format!("\"{t}\"")).collect();
    let wanted = match quoted.split_last() {
        Some((last, rest)) if !rest.is_empty() => format!("{} or {last}", rest.join(", ")),
        Some((last, _)) => last.clone(),
        None => String::new(),
    };
    syntax_error(&format!("{found}, expected {wanted}"), range)
}

pub(crate) fn syntax_error(msg: &str, range: &Span) -> ParseError {
    ParseError::Unexpected(PositionedError {
        pos: range.clone(),
        msg: msg.to_string(),
    })
}

/// A function called with an argument count outside its arity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ArgCountError {
    func: String,
    min: usize,
    /// `None` for variadic functions.
    max: Option<usize>,
    actual: usize,
}

impl ArgCountError {
    pub fn new(func: &str, min: usize, max: Option<usize>, actual: usize) -> Self {
        Self {
            func: func.to_string(),
            min,
            max,
            actual,
        }
    }
}

impl fmt::Display for ArgCountError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let wanted = match self.max {
            Some(max) if max == self.min => format!("{} argument(s)", self.min),
            Some(max) => format!("{}-{} arguments", self.min, max),
            None => format!("at least {} argument(s)", self.min),
        };
        write!(f, "expected {wanted} in call to {:?}, got {}", self.func, self.actual)
    }
}
