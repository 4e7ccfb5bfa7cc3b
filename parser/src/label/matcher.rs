use std::fmt;
use std::hash::{Hash, Hasher};

use regex::Regex;

use promql_common::label::{Labels, METRIC_NAME_LABEL};

use crate::parser::{ParseError, ParseResult};

// NOTE: https://github.com/rust-lang/regex/issues/668
#[derive(Debug, Clone)]
pub enum MatchOp {
    Equal,
    NotEqual,
    Re(Regex),
    NotRe(Regex),
}

impl MatchOp {
    pub fn is_negative(&self) -> bool {
        matches!(self, MatchOp::NotEqual | MatchOp::NotRe(_))
    }

    pub fn is_regex(&self) -> bool {
        matches!(self, Self::NotRe(_) | Self::Re(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchOp::Equal => "=",
            MatchOp::NotEqual => "!=",
            MatchOp::Re(_) => "=~",
            MatchOp::NotRe(_) => "!~",
        }
    }
}

impl fmt::Display for MatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl PartialEq for MatchOp {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (MatchOp::Equal, MatchOp::Equal) => true,
            (MatchOp::NotEqual, MatchOp::NotEqual) => true,
            (MatchOp::Re(s), MatchOp::Re(o)) => s.as_str().eq(o.as_str()),
            (MatchOp::NotRe(s), MatchOp::NotRe(o)) => s.as_str().eq(o.as_str()),
            _ => false,
        }
    }
}

impl Eq for MatchOp {}

impl Hash for MatchOp {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
        if let MatchOp::Re(re) | MatchOp::NotRe(re) = self {
            re.as_str().hash(state);
        }
    }
}

/// A single label matcher of a vector selector.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Matcher {
    pub op: MatchOp,
    pub name: String,
    pub value: String,
}

pub type Matchers = Vec<Matcher>;

impl Matcher {
    pub fn equal<N: Into<String>, V: Into<String>>(name: N, value: V) -> Self {
        Self {
            op: MatchOp::Equal,
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn not_equal<N: Into<String>, V: Into<String>>(name: N, value: V) -> Self {
        Self {
            op: MatchOp::NotEqual,
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn regex_equal<N: Into<String>, V: Into<String>>(name: N, value: V) -> ParseResult<Self> {
        let value = value.into();
        let re = compile_anchored(&value)?;
        Ok(Self {
            op: MatchOp::Re(re),
            name: name.into(),
            value,
        })
    }

    pub fn regex_not_equal<N: Into<String>, V: Into<String>>(name: N, value: V) -> ParseResult<Self> {
        let value = value.into();
        let re = compile_anchored(&value)?;
        Ok(Self {
            op: MatchOp::NotRe(re),
            name: name.into(),
            value,
        })
    }

    pub fn metric_name<V: Into<String>>(value: V) -> Self {
        Self::equal(METRIC_NAME_LABEL, value)
    }

    /// Reports whether the matcher accepts a label value. A missing label is
    /// matched as the empty string.
    pub fn matches(&self, value: &str) -> bool {
        match &self.op {
            MatchOp::Equal => self.value == value,
            MatchOp::NotEqual => self.value != value,
            MatchOp::Re(re) => re.is_match(value),
            MatchOp::NotRe(re) => !re.is_match(value),
        }
    }

    pub fn matches_empty(&self) -> bool {
        self.matches("")
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{:?}", self.name, self.op, self.value)
    }
}

fn compile_anchored(value: &str) -> ParseResult<Regex> {
    Regex::new(&format!("^(?:{value})$")).map_err(|e| ParseError::InvalidRegex(e.to_string()))
}

/// Reports whether every matcher accepts the label set.
pub fn matches_labels(matchers: &[Matcher], labels: &Labels) -> bool {
    matchers.iter().all(|m| m.matches(labels.get_or_empty(&m.name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regex_is_anchored() {
        let m = Matcher::regex_equal("job", "api|web").unwrap();
        assert!(m.matches("api"));
        assert!(!m.matches("api-server"));
        let m = Matcher::regex_not_equal("job", "a.*").unwrap();
        assert!(!m.matches("abc"));
        assert!(m.matches("xyz"));
    }

    #[test]
    fn missing_label_matches_as_empty() {
        let labels = Labels::from_pairs(&[("__name__", "foo")]);
        assert!(matches_labels(&[Matcher::equal("job", "")], &labels));
        assert!(!matches_labels(&[Matcher::not_equal("job", "")], &labels));
        assert!(matches_labels(&[Matcher::metric_name("foo")], &labels));
    }

    #[test]
    fn invalid_regex_is_an_error() {
        assert!(Matcher::regex_equal("job", "(").is_err());
    }
}
