use logos::Logos;

use promql_common::label::METRIC_NAME_LABEL;

use crate::ast::*;
use crate::binaryop::Operator;
use crate::functions::{lookup_function, AggregateFunction};
use crate::label::{Matcher, Matchers};
use crate::parser::parse_error::{invalid_token_error, syntax_error, Span};
use crate::parser::tokens::Token;
use crate::parser::{check_ast, parse_duration, ParseError, ParseResult};

#[derive(Debug, Clone, PartialEq)]
pub struct TokenWithLocation<'a> {
    pub kind: Token,
    pub text: &'a str,
    pub span: Span,
}

/// Recursive descent parser over a pre-lexed token stream.
///
/// preconditions for all parse* funcs:
/// - `cursor` points at the first token to parse.
///
/// post-conditions for all parse* funcs:
/// - `cursor` points at the next token after the parsed construct.
pub struct Parser<'a> {
    tokens: Vec<TokenWithLocation<'a>>,
    cursor: usize,
}

impl<'a> Parser<'a> {
    pub fn new(input: &'a str) -> ParseResult<Self> {
        let mut lexer = Token::lexer(input);
        let mut tokens = Vec::with_capacity(16);
        while let Some(tok) = lexer.next() {
            let span = lexer.span();
            match tok {
                Ok(kind) => tokens.push(TokenWithLocation {
                    kind,
                    text: lexer.slice(),
                    span,
                }),
                Err(_) => {
                    let msg = format!("unexpected character {:?}", lexer.slice());
                    return Err(syntax_error(&msg, &span));
                }
            }
        }
        Ok(Self { tokens, cursor: 0 })
    }

    fn peek_kind(&self) -> Token {
        self.tokens
            .get(self.cursor)
            .map(|t| t.kind)
            .unwrap_or(Token::Eof)
    }

    fn peek_nth_kind(&self, n: usize) -> Token {
        self.tokens
            .get(self.cursor + n)
            .map(|t| t.kind)
            .unwrap_or(Token::Eof)
    }

    fn at(&self, kind: Token) -> bool {
        self.peek_kind() == kind
    }

    fn at_set(&self, set: &[Token]) -> bool {
        set.contains(&self.peek_kind())
    }

    pub(crate) fn is_eof(&self) -> bool {
        self.cursor >= self.tokens.len()
    }

    fn bump(&mut self) {
        if self.cursor < self.tokens.len() {
            self.cursor += 1;
        }
    }

    fn current_span(&self) -> Span {
        match self.tokens.get(self.cursor) {
            Some(t) => t.span.clone(),
            None => self
                .tokens
                .last()
                .map(|t| t.span.end..t.span.end)
                .unwrap_or_default(),
        }
    }

    fn expect(&mut self, kind: Token) -> ParseResult<()> {
        self.expect_token(kind).map(|_| ())
    }

    fn expect_token(&mut self, kind: Token) -> ParseResult<TokenWithLocation<'a>> {
        self.expect_one_of(&[kind])
    }

    fn expect_one_of(&mut self, kinds: &[Token]) -> ParseResult<TokenWithLocation<'a>> {
        match self.tokens.get(self.cursor) {
            Some(tok) if kinds.contains(&tok.kind) => {
                let tok = tok.clone();
                self.cursor += 1;
                Ok(tok)
            }
            _ => Err(self.token_error(kinds)),
        }
    }

    fn token_error(&self, expected: &[Token]) -> ParseError {
        let found = self.tokens.get(self.cursor).map(|t| t.kind);
        invalid_token_error(expected, found, &self.current_span())
    }

    fn error(&self, msg: &str) -> ParseError {
        syntax_error(msg, &self.current_span())
    }

    /// Parses `( ident, ... )`. Keywords are accepted as label names.
    fn parse_ident_list(&mut self) -> ParseResult<Vec<String>> {
        self.expect(Token::LeftParen)?;
        self.parse_comma_separated(Token::RightParen, |p| {
            if p.peek_kind().is_ident_like() {
                let tok = p.expect_one_of(&[p.peek_kind()])?;
                Ok(tok.text.to_string())
            } else {
                Err(p.token_error(&[Token::Identifier]))
            }
        })
    }

    /// Parses a comma-separated list up to and including `stop`. A trailing
    /// comma is accepted.
    fn parse_comma_separated<T, F>(&mut self, stop: Token, mut f: F) -> ParseResult<Vec<T>>
    where
        F: FnMut(&mut Parser<'a>) -> ParseResult<T>,
    {
        let mut values = Vec::with_capacity(4);
        loop {
            if self.at(stop) {
                self.bump();
                break;
            }
            values.push(f(self)?);
            match self.peek_kind() {
                Token::Comma => self.bump(),
                kind if kind == stop => {
                    self.bump();
                    break;
                }
                _ => return Err(self.token_error(&[Token::Comma, stop])),
            }
        }
        Ok(values)
    }
}

/// Parses a query expression and checks its types.
pub fn parse(input: &str) -> ParseResult<Expr> {
    let mut p = Parser::new(input)?;
    if p.is_eof() {
        return Err(ParseError::General("no expression found in input".to_string()));
    }
    let expr = parse_expression(&mut p, 0)?;
    if !p.is_eof() {
        let msg = format!("unexpected {} after expression", p.peek_kind());
        return Err(p.error(&msg));
    }
    check_ast(&expr)?;
    Ok(expr)
}

/// Parses a series selector such as `foo{job="api"}` into its matchers.
pub fn parse_metric_selector(input: &str) -> ParseResult<Matchers> {
    let mut p = Parser::new(input)?;
    let expr = parse_selector(&mut p)?;
    if !p.is_eof() {
        let msg = format!("unexpected {} after selector", p.peek_kind());
        return Err(p.error(&msg));
    }
    match expr {
        Expr::VectorSelector(vs) => Ok(vs.matchers),
        _ => Err(ParseError::InvalidSelector(input.to_string())),
    }
}

fn token_operator(kind: Token) -> Option<Operator> {
    use Token::*;
    let op = match kind {
        OpPlus => Operator::Add,
        OpMinus => Operator::Sub,
        OpMul => Operator::Mul,
        OpDiv => Operator::Div,
        OpMod => Operator::Mod,
        OpPow => Operator::Pow,
        OpAtan2 => Operator::Atan2,
        OpEqual => Operator::Eql,
        OpNotEqual => Operator::NotEq,
        OpGreaterThan => Operator::Gt,
        OpLessThan => Operator::Lt,
        OpGreaterThanOrEqual => Operator::Gte,
        OpLessThanOrEqual => Operator::Lte,
        OpAnd => Operator::And,
        OpOr => Operator::Or,
        OpUnless => Operator::Unless,
        _ => return None,
    };
    Some(op)
}

/// Precedence climbing over binary operators.
fn parse_expression(p: &mut Parser, min_precedence: u8) -> ParseResult<Expr> {
    let mut lhs = parse_unary_expr(p)?;
    loop {
        let Some(op) = token_operator(p.peek_kind()) else {
            break;
        };
        let precedence = op.precedence();
        if precedence < min_precedence {
            break;
        }
        p.bump();

        let (return_bool, matching) = parse_binary_modifiers(p, op)?;

        let next_min = if op.is_right_associative() {
            precedence
        } else {
            precedence + 1
        };
        let rhs = parse_expression(p, next_min)?;
        lhs = new_binary_expr(op, lhs, rhs, return_bool, matching)?;
    }
    Ok(lhs)
}

struct MatchingModifiers {
    on: Option<bool>,
    matching_labels: Vec<String>,
    card: Option<VectorMatchCardinality>,
    include: Vec<String>,
}

fn parse_binary_modifiers(p: &mut Parser, op: Operator) -> ParseResult<(bool, MatchingModifiers)> {
    let mut return_bool = false;
    if p.at(Token::Bool) {
        if !op.is_comparison() {
            return Err(p.error("bool modifier can only be used on comparison operators"));
        }
        return_bool = true;
        p.bump();
    }

    let mut modifiers = MatchingModifiers {
        on: None,
        matching_labels: vec![],
        card: None,
        include: vec![],
    };

    if p.at_set(&[Token::On, Token::Ignoring]) {
        modifiers.on = Some(p.at(Token::On));
        p.bump();
        modifiers.matching_labels = p.parse_ident_list()?;

        if p.at_set(&[Token::GroupLeft, Token::GroupRight]) {
            if op.is_set_operator() {
                let msg = format!("no grouping allowed for \"{op}\" operation");
                return Err(p.error(&msg));
            }
            modifiers.card = Some(if p.at(Token::GroupLeft) {
                VectorMatchCardinality::ManyToOne
            } else {
                VectorMatchCardinality::OneToMany
            });
            p.bump();
            // the label list of a group modifier is optional
            if p.at(Token::LeftParen) {
                modifiers.include = p.parse_ident_list()?;
            }
        }
    }
    Ok((return_bool, modifiers))
}

fn new_binary_expr(
    op: Operator,
    lhs: Expr,
    rhs: Expr,
    return_bool: bool,
    modifiers: MatchingModifiers,
) -> ParseResult<Expr> {
    let lhs_type = lhs.value_type();
    let rhs_type = rhs.value_type();
    let both_vectors = lhs_type == ValueType::InstantVector && rhs_type == ValueType::InstantVector;

    if op.is_comparison()
        && !return_bool
        && lhs_type == ValueType::Scalar
        && rhs_type == ValueType::Scalar
    {
        return Err(ParseError::InvalidExpression(
            "comparisons between scalars must use BOOL modifier".to_string(),
        ));
    }
    if op.is_set_operator() && (lhs_type == ValueType::Scalar || rhs_type == ValueType::Scalar) {
        return Err(ParseError::InvalidExpression(format!(
            "set operator \"{op}\" not allowed in binary scalar expression"
        )));
    }

    let has_modifiers = modifiers.on.is_some() || modifiers.card.is_some();
    let matching = if both_vectors {
        let card = match modifiers.card {
            Some(card) => card,
            None if op.is_set_operator() => VectorMatchCardinality::ManyToMany,
            None => VectorMatchCardinality::OneToOne,
        };
        let on = modifiers.on.unwrap_or(false);
        if on {
            if let Some(l) = modifiers
                .matching_labels
                .iter()
                .find(|l| modifiers.include.contains(l))
            {
                return Err(ParseError::InvalidExpression(format!(
                    "label \"{l}\" must not occur in ON and GROUP clause at once"
                )));
            }
        }
        Some(VectorMatching {
            card,
            on,
            matching_labels: modifiers.matching_labels,
            include: modifiers.include,
        })
    } else if has_modifiers {
        return Err(ParseError::InvalidExpression(
            "vector matching only allowed between instant vectors".to_string(),
        ));
    } else {
        None
    };

    Ok(Expr::Binary(BinaryExpr {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
        return_bool,
        matching,
    }))
}

fn parse_unary_expr(p: &mut Parser) -> ParseResult<Expr> {
    match p.peek_kind() {
        Token::OpPlus => {
            p.bump();
            parse_expression(p, Operator::Pow.precedence())
        }
        Token::OpMinus => {
            p.bump();
            // unary minus binds tighter than everything but `^`
            let e = parse_expression(p, Operator::Pow.precedence())?;
            Ok(match e {
                Expr::NumberLiteral(v) => Expr::NumberLiteral(-v),
                e => Expr::Unary(Box::new(e)),
            })
        }
        _ => {
            let e = parse_primary_expr(p)?;
            parse_postfix(p, e)
        }
    }
}

fn parse_primary_expr(p: &mut Parser) -> ParseResult<Expr> {
    use Token::*;

    match p.peek_kind() {
        Number => {
            let tok = p.expect_token(Number)?;
            Ok(Expr::NumberLiteral(parse_number(tok.text)?))
        }
        StringLiteral => {
            let tok = p.expect_token(StringLiteral)?;
            Ok(Expr::StringLiteral(unquote(tok.text)?))
        }
        LeftParen => {
            p.bump();
            let e = parse_expression(p, 0)?;
            p.expect(RightParen)?;
            Ok(Expr::Paren(Box::new(e)))
        }
        LeftBrace => parse_selector(p),
        Identifier => parse_ident_expr(p),
        kind if kind.is_ident_like() && p.peek_nth_kind(1) == LeftBrace => parse_selector(p),
        _ => Err(p.token_error(&[
            Number,
            StringLiteral,
            Identifier,
            LeftParen,
            LeftBrace,
            OpMinus,
        ])),
    }
}

fn parse_ident_expr(p: &mut Parser) -> ParseResult<Expr> {
    let name = p
        .tokens
        .get(p.cursor)
        .map(|t| t.text)
        .unwrap_or_default();
    let next = p.peek_nth_kind(1);

    if let Ok(op) = name.parse::<AggregateFunction>() {
        if matches!(next, Token::LeftParen | Token::By | Token::Without) {
            return parse_aggregate_expr(p, op);
        }
    }
    if next == Token::LeftParen {
        return parse_call_expr(p);
    }
    parse_selector(p)
}

fn parse_call_expr(p: &mut Parser) -> ParseResult<Expr> {
    let tok = p.expect_token(Token::Identifier)?;
    let meta = lookup_function(tok.text)?;
    p.expect(Token::LeftParen)?;
    let args = p.parse_comma_separated(Token::RightParen, |p| parse_expression(p, 0))?;
    Ok(Expr::Call(Call {
        func: meta.function,
        args,
    }))
}

fn parse_aggregate_expr(p: &mut Parser, op: AggregateFunction) -> ParseResult<Expr> {
    p.bump();

    let mut modifier: Option<(bool, Vec<String>)> = None;
    if p.at_set(&[Token::By, Token::Without]) {
        modifier = Some(parse_aggregate_modifier(p)?);
    }

    p.expect(Token::LeftParen)?;
    let mut args = p.parse_comma_separated(Token::RightParen, |p| parse_expression(p, 0))?;

    if p.at_set(&[Token::By, Token::Without]) {
        if modifier.is_some() {
            return Err(p.error("aggregation modifier may only be given once"));
        }
        modifier = Some(parse_aggregate_modifier(p)?);
    }

    let expected = if op.has_param() { 2 } else { 1 };
    if args.len() != expected {
        return Err(ParseError::ArgumentError(format!(
            "wrong number of arguments for aggregate expression provided, expected {expected}, got {}",
            args.len()
        )));
    }
    let Some(expr) = args.pop() else {
        return Err(ParseError::ArgumentError(format!(
            "no arguments for aggregate expression {op} provided"
        )));
    };
    let param = args.pop().map(Box::new);
    let (without, grouping) = modifier.unwrap_or((false, vec![]));

    Ok(Expr::Aggregate(AggregateExpr {
        op,
        expr: Box::new(expr),
        param,
        grouping,
        without,
    }))
}

fn parse_aggregate_modifier(p: &mut Parser) -> ParseResult<(bool, Vec<String>)> {
    let tok = p.expect_one_of(&[Token::By, Token::Without])?;
    let labels = p.parse_ident_list()?;
    Ok((tok.kind == Token::Without, labels))
}

fn parse_selector(p: &mut Parser) -> ParseResult<Expr> {
    let mut name: Option<String> = None;
    if p.peek_kind().is_ident_like() {
        let tok = p.expect_one_of(&[p.peek_kind()])?;
        name = Some(tok.text.to_string());
    }

    let mut matchers: Matchers = vec![];
    if p.at(Token::LeftBrace) {
        p.bump();
        matchers = p.parse_comma_separated(Token::RightBrace, parse_matcher)?;
    }

    if let Some(name) = &name {
        if matchers.iter().any(|m| m.name == METRIC_NAME_LABEL) {
            return Err(ParseError::InvalidSelector(format!(
                "metric name must not be set twice: {name:?}"
            )));
        }
        matchers.push(Matcher::metric_name(name.clone()));
    }

    if matchers.is_empty() {
        return Err(p.token_error(&[Token::Identifier, Token::LeftBrace]));
    }
    if matchers.iter().all(|m| m.matches_empty()) {
        return Err(ParseError::InvalidSelector(
            "vector selector must contain at least one non-empty matcher".to_string(),
        ));
    }

    Ok(Expr::VectorSelector(VectorSelector::with_matchers(name, matchers)))
}

fn parse_matcher(p: &mut Parser) -> ParseResult<Matcher> {
    use Token::*;

    if !p.peek_kind().is_ident_like() {
        return Err(p.token_error(&[Identifier]));
    }
    let label = p.expect_one_of(&[p.peek_kind()])?.text.to_string();
    let op = p.expect_one_of(&[Equal, OpNotEqual, RegexEqual, RegexNotEqual])?;
    let value = p.expect_token(StringLiteral)?;
    let value = unquote(value.text)?;

    match op.kind {
        Equal => Ok(Matcher::equal(label, value)),
        OpNotEqual => Ok(Matcher::not_equal(label, value)),
        RegexEqual => Matcher::regex_equal(label, value),
        _ => Matcher::regex_not_equal(label, value),
    }
}

/// Parses the range, subquery, `offset` and `@` suffixes of an expression.
fn parse_postfix(p: &mut Parser, mut expr: Expr) -> ParseResult<Expr> {
    loop {
        match p.peek_kind() {
            Token::LeftBracket => expr = parse_range_suffix(p, expr)?,
            Token::Offset => {
                p.bump();
                let offset = parse_signed_duration(p)?;
                set_offset(p, &mut expr, offset)?;
            }
            Token::At => {
                p.bump();
                let at = parse_at_modifier(p)?;
                set_at(p, &mut expr, at)?;
            }
            _ => return Ok(expr),
        }
    }
}

fn parse_range_suffix(p: &mut Parser, expr: Expr) -> ParseResult<Expr> {
    p.expect(Token::LeftBracket)?;
    let range = parse_positive_duration(p)?;

    if p.at(Token::Colon) {
        p.bump();
        let step = if p.at(Token::RightBracket) {
            None
        } else {
            Some(parse_positive_duration(p)?)
        };
        p.expect(Token::RightBracket)?;
        return Ok(Expr::Subquery(SubqueryExpr {
            expr: Box::new(expr),
            range,
            step,
            offset: 0,
            at: None,
        }));
    }
    p.expect(Token::RightBracket)?;

    match expr {
        Expr::VectorSelector(vs) => {
            if vs.offset != 0 || vs.at.is_some() {
                return Err(p.error("no offset or @ modifiers allowed before range"));
            }
            Ok(Expr::MatrixSelector(MatrixSelector {
                vector_selector: vs,
                range,
            }))
        }
        _ => Err(p.error(
            "ranges only allowed for vector selectors",
        )),
    }
}

fn parse_positive_duration(p: &mut Parser) -> ParseResult<i64> {
    let tok = p.expect_one_of(&[Token::Duration, Token::Number])?;
    let value = match tok.kind {
        Token::Duration => parse_duration(tok.text)?,
        // a plain number is a count of seconds
        _ => {
            let secs = parse_number(tok.text)?;
            if !secs.is_finite() {
                return Err(ParseError::InvalidDuration(tok.text.to_string()));
            }
            (secs * 1000.0).round() as i64
        }
    };
    if value <= 0 {
        return Err(ParseError::InvalidDuration(tok.text.to_string()));
    }
    Ok(value)
}

fn parse_signed_duration(p: &mut Parser) -> ParseResult<i64> {
    let mut sign = 1;
    if p.at(Token::OpMinus) {
        sign = -1;
        p.bump();
    } else if p.at(Token::OpPlus) {
        p.bump();
    }
    Ok(sign * parse_positive_duration(p)?)
}

fn parse_at_modifier(p: &mut Parser) -> ParseResult<AtModifier> {
    if p.at(Token::Identifier) {
        let tok = p.expect_token(Token::Identifier)?;
        let at = match tok.text {
            "start" => AtModifier::Start,
            "end" => AtModifier::End,
            other => {
                let msg = format!("unexpected {other:?} in @, expected start() or end()");
                return Err(syntax_error(&msg, &tok.span));
            }
        };
        p.expect(Token::LeftParen)?;
        p.expect(Token::RightParen)?;
        return Ok(at);
    }

    let mut sign = 1.0;
    if p.at(Token::OpMinus) {
        sign = -1.0;
        p.bump();
    } else if p.at(Token::OpPlus) {
        p.bump();
    }
    let tok = p.expect_token(Token::Number)?;
    let secs = sign * parse_number(tok.text)?;
    let ms = secs * 1000.0;
    if !ms.is_finite() || ms >= i64::MAX as f64 || ms <= i64::MIN as f64 {
        return Err(syntax_error("timestamp out of bounds for @ modifier", &tok.span));
    }
    Ok(AtModifier::Timestamp(ms.round() as i64))
}

fn set_offset(p: &Parser, expr: &mut Expr, offset: i64) -> ParseResult<()> {
    let target = match expr {
        Expr::VectorSelector(vs) => &mut vs.offset,
        Expr::MatrixSelector(ms) => &mut ms.vector_selector.offset,
        Expr::Subquery(sq) => &mut sq.offset,
        _ => {
            return Err(p.error(
                "offset modifier must be preceded by an instant vector selector or range vector selector or a subquery",
            ))
        }
    };
    if *target != 0 {
        return Err(p.error("offset may not be set multiple times"));
    }
    *target = offset;
    Ok(())
}

fn set_at(p: &Parser, expr: &mut Expr, at: AtModifier) -> ParseResult<()> {
    let target = match expr {
        Expr::VectorSelector(vs) => &mut vs.at,
        Expr::MatrixSelector(ms) => &mut ms.vector_selector.at,
        Expr::Subquery(sq) => &mut sq.at,
        _ => {
            return Err(p.error(
                "@ modifier must be preceded by an instant vector selector or range vector selector or a subquery",
            ))
        }
    };
    if target.is_some() {
        return Err(p.error("@ <timestamp> may not be set multiple times"));
    }
    *target = Some(at);
    Ok(())
}

pub fn parse_number(s: &str) -> ParseResult<f64> {
    let lower = s.to_ascii_lowercase();
    match lower.as_str() {
        "inf" | "+inf" => return Ok(f64::INFINITY),
        "-inf" => return Ok(f64::NEG_INFINITY),
        "nan" => return Ok(f64::NAN),
        _ => {}
    }
    if let Some(hex) = lower.strip_prefix("0x") {
        return i64::from_str_radix(hex, 16)
            .map(|v| v as f64)
            .map_err(|_| ParseError::InvalidNumber(s.to_string()));
    }
    s.parse::<f64>()
        .map_err(|_| ParseError::InvalidNumber(s.to_string()))
}

/// Strips the quotes of a string literal and resolves escapes. Backtick
/// strings are raw.
pub fn unquote(s: &str) -> ParseResult<String> {
    if let Some(raw) = s.strip_prefix('`').and_then(|s| s.strip_suffix('`')) {
        return Ok(raw.to_string());
    }
    enquote::unquote(s).map_err(|e| ParseError::SyntaxError(format!("invalid string {s}: {e}")))
}
