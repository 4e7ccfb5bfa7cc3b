use crate::ast::{Expr, ValueType};
use crate::functions::FunctionMeta;
use crate::parser::{ArgCountError, ParseError, ParseResult};

fn documented_type(t: ValueType) -> &'static str {
    match t {
        ValueType::Scalar => "scalar",
        ValueType::InstantVector => "instant vector",
        ValueType::RangeVector => "range vector",
        ValueType::String => "string",
    }
}

fn expect_type(expr: &Expr, want: ValueType, context: &str) -> ParseResult<()> {
    let got = expr.value_type();
    if got != want {
        return Err(ParseError::InvalidExpression(format!(
            "expected type {} in {context}, got {}",
            documented_type(want),
            documented_type(got)
        )));
    }
    Ok(())
}

fn check_call(meta: &FunctionMeta, args: &[Expr]) -> ParseResult<()> {
    let min = meta.min_args();
    let max = meta.max_args();
    if args.len() < min || max.is_some_and(|max| args.len() > max) {
        return Err(ParseError::InvalidArgCount(ArgCountError::new(
            meta.name,
            min,
            max,
            args.len(),
        )));
    }
    let context = format!("call to function {:?}", meta.name);
    for (i, arg) in args.iter().enumerate() {
        expect_type(arg, meta.arg_type(i), &context)?;
    }
    Ok(())
}

/// Validates operand and argument types of the whole tree.
pub fn check_ast(expr: &Expr) -> ParseResult<()> {
    match expr {
        Expr::Call(call) => check_call(call.func.meta(), &call.args)?,
        Expr::Aggregate(agg) => {
            expect_type(&agg.expr, ValueType::InstantVector, "aggregation expression")?;
            if let (Some(param), Some(want)) = (&agg.param, agg.op.param_type()) {
                expect_type(param, want, "aggregation parameter")?;
            }
        }
        Expr::Binary(be) => {
            for side in [&be.lhs, &be.rhs] {
                let t = side.value_type();
                if t != ValueType::Scalar && t != ValueType::InstantVector {
                    return Err(ParseError::InvalidExpression(format!(
                        "binary expression must contain only scalar and instant vector types, got {}",
                        documented_type(t)
                    )));
                }
            }
        }
        Expr::Unary(e) => {
            let t = e.value_type();
            if t != ValueType::Scalar && t != ValueType::InstantVector {
                return Err(ParseError::InvalidExpression(format!(
                    "unary expression only allowed on expressions of type scalar or instant vector, got {}",
                    documented_type(t)
                )));
            }
        }
        Expr::Subquery(sq) => {
            let t = sq.expr.value_type();
            if t != ValueType::InstantVector {
                return Err(ParseError::InvalidExpression(format!(
                    "subquery is only allowed on instant vector, got {}",
                    documented_type(t)
                )));
            }
        }
        _ => {}
    }
    for child in expr.children() {
        check_ast(child)?;
    }
    Ok(())
}
