use std::fmt;
use std::fmt::{Display, Formatter};

use enquote::enquote;

use promql_common::duration::format_duration_ms;
use promql_common::label::METRIC_NAME_LABEL;

use crate::ast::ValueType;
use crate::binaryop::Operator;
use crate::functions::{AggregateFunction, BuiltinFunction};
use crate::label::{MatchOp, Matcher, Matchers};

/// Evaluation time pinned by the `@` modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtModifier {
    /// Milliseconds since the epoch.
    Timestamp(i64),
    Start,
    End,
}

impl Display for AtModifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            AtModifier::Timestamp(ts) => write!(f, "@ {:.3}", *ts as f64 / 1000.0),
            AtModifier::Start => write!(f, "@ start()"),
            AtModifier::End => write!(f, "@ end()"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorSelector {
    pub name: Option<String>,
    /// All matchers, the metric name matcher included.
    pub matchers: Matchers,
    /// Offset in milliseconds. Negative offsets look ahead.
    pub offset: i64,
    pub at: Option<AtModifier>,
}

impl VectorSelector {
    pub fn new<S: Into<String>>(name: S) -> Self {
        let name = name.into();
        Self {
            matchers: vec![Matcher::metric_name(name.clone())],
            name: Some(name),
            offset: 0,
            at: None,
        }
    }

    pub fn with_matchers(name: Option<String>, matchers: Matchers) -> Self {
        Self {
            name,
            matchers,
            offset: 0,
            at: None,
        }
    }

    fn fmt_selector(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let filters: Vec<&Matcher> = self
            .matchers
            .iter()
            .filter(|m| {
                !(self.name.is_some() && m.name == METRIC_NAME_LABEL && m.op == MatchOp::Equal)
            })
            .collect();
        if let Some(name) = &self.name {
            write!(f, "{name}")?;
        }
        if !filters.is_empty() || self.name.is_none() {
            write!(f, "{{")?;
            for (i, m) in filters.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{m}")?;
            }
            write!(f, "}}")?;
        }
        Ok(())
    }
}

fn fmt_modifiers(f: &mut Formatter<'_>, at: &Option<AtModifier>, offset: i64) -> fmt::Result {
    if let Some(at) = at {
        write!(f, " {at}")?;
    }
    if offset != 0 {
        write!(f, " offset {}", format_duration_ms(offset))?;
    }
    Ok(())
}

impl Display for VectorSelector {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.fmt_selector(f)?;
        fmt_modifiers(f, &self.at, self.offset)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatrixSelector {
    pub vector_selector: VectorSelector,
    /// Range in milliseconds.
    pub range: i64,
}

impl Display for MatrixSelector {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let vs = &self.vector_selector;
        vs.fmt_selector(f)?;
        write!(f, "[{}]", format_duration_ms(self.range))?;
        fmt_modifiers(f, &vs.at, vs.offset)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubqueryExpr {
    pub expr: Box<Expr>,
    pub range: i64,
    /// Resolution step, `None` when the default interval applies.
    pub step: Option<i64>,
    pub offset: i64,
    pub at: Option<AtModifier>,
}

impl Display for SubqueryExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let step = self.step.map(format_duration_ms).unwrap_or_default();
        write!(f, "{}[{}:{}]", self.expr, format_duration_ms(self.range), step)?;
        fmt_modifiers(f, &self.at, self.offset)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub func: BuiltinFunction,
    pub args: Vec<Expr>,
}

impl Display for Call {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.func)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{arg}")?;
        }
        write!(f, ")")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateExpr {
    pub op: AggregateFunction,
    pub expr: Box<Expr>,
    pub param: Option<Box<Expr>>,
    pub grouping: Vec<String>,
    /// `without` when true, `by` otherwise.
    pub without: bool,
}

impl Display for AggregateExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op)?;
        if self.without || !self.grouping.is_empty() {
            let modifier = if self.without { "without" } else { "by" };
            write!(f, " {modifier} ({}) ", self.grouping.join(", "))?;
        }
        write!(f, "(")?;
        if let Some(param) = &self.param {
            write!(f, "{param}, ")?;
        }
        write!(f, "{})", self.expr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VectorMatchCardinality {
    OneToOne,
    ManyToOne,
    OneToMany,
    ManyToMany,
}

/// Describes how the elements of two vectors are paired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorMatching {
    pub card: VectorMatchCardinality,
    /// `on` when true, `ignoring` otherwise.
    pub on: bool,
    pub matching_labels: Vec<String>,
    /// Labels copied from the "one" side by `group_left`/`group_right`.
    pub include: Vec<String>,
}

impl VectorMatching {
    pub fn new(card: VectorMatchCardinality) -> Self {
        Self {
            card,
            on: false,
            matching_labels: vec![],
            include: vec![],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinaryExpr {
    pub op: Operator,
    pub lhs: Box<Expr>,
    pub rhs: Box<Expr>,
    pub return_bool: bool,
    /// Present when both operands are vectors.
    pub matching: Option<VectorMatching>,
}

impl Display for BinaryExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.lhs, self.op)?;
        if self.return_bool {
            write!(f, " bool")?;
        }
        if let Some(m) = &self.matching {
            if m.on || !m.matching_labels.is_empty() {
                let kw = if m.on { "on" } else { "ignoring" };
                write!(f, " {kw}({})", m.matching_labels.join(", "))?;
            }
            match m.card {
                VectorMatchCardinality::ManyToOne => {
                    write!(f, " group_left({})", m.include.join(", "))?
                }
                VectorMatchCardinality::OneToMany => {
                    write!(f, " group_right({})", m.include.join(", "))?
                }
                _ => {}
            }
        }
        write!(f, " {}", self.rhs)
    }
}

/// A query expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    NumberLiteral(f64),
    StringLiteral(String),
    VectorSelector(VectorSelector),
    MatrixSelector(MatrixSelector),
    Subquery(SubqueryExpr),
    Call(Call),
    Aggregate(AggregateExpr),
    /// Unary negation.
    Unary(Box<Expr>),
    Binary(BinaryExpr),
    Paren(Box<Expr>),
    /// A sub-tree whose value is the same at every evaluation step.
    StepInvariant(Box<Expr>),
}

impl Expr {
    pub fn value_type(&self) -> ValueType {
        match self {
            Expr::NumberLiteral(_) => ValueType::Scalar,
            Expr::StringLiteral(_) => ValueType::String,
            Expr::VectorSelector(_) => ValueType::InstantVector,
            Expr::MatrixSelector(_) | Expr::Subquery(_) => ValueType::RangeVector,
            Expr::Call(call) => call.func.return_type(),
            Expr::Aggregate(_) => ValueType::InstantVector,
            Expr::Binary(be) => {
                if be.lhs.value_type() == ValueType::Scalar && be.rhs.value_type() == ValueType::Scalar {
                    ValueType::Scalar
                } else {
                    ValueType::InstantVector
                }
            }
            Expr::Unary(e) | Expr::Paren(e) | Expr::StepInvariant(e) => e.value_type(),
        }
    }

    /// Strips enclosing parentheses and step-invariant wrappers.
    pub fn unwrap_parens(&self) -> &Expr {
        match self {
            Expr::Paren(e) | Expr::StepInvariant(e) => e.unwrap_parens(),
            _ => self,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self.unwrap_parens(), Expr::NumberLiteral(_))
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Expr::NumberLiteral(v) => fmt_number(f, *v),
            Expr::StringLiteral(s) => write!(f, "{}", enquote('"', s)),
            Expr::VectorSelector(vs) => write!(f, "{vs}"),
            Expr::MatrixSelector(ms) => write!(f, "{ms}"),
            Expr::Subquery(sq) => write!(f, "{sq}"),
            Expr::Call(call) => write!(f, "{call}"),
            Expr::Aggregate(agg) => write!(f, "{agg}"),
            Expr::Unary(e) => write!(f, "-{e}"),
            Expr::Binary(be) => write!(f, "{be}"),
            Expr::Paren(e) => write!(f, "({e})"),
            Expr::StepInvariant(e) => write!(f, "{e}"),
        }
    }
}

fn fmt_number(f: &mut Formatter<'_>, v: f64) -> fmt::Result {
    if v.is_nan() {
        write!(f, "NaN")
    } else if v.is_infinite() {
        write!(f, "{}Inf", if v > 0.0 { "+" } else { "-" })
    } else {
        write!(f, "{v}")
    }
}

impl From<f64> for Expr {
    fn from(v: f64) -> Self {
        Expr::NumberLiteral(v)
    }
}

impl From<VectorSelector> for Expr {
    fn from(vs: VectorSelector) -> Self {
        Expr::VectorSelector(vs)
    }
}
