use promql_parser::ast::{AtModifier, Expr};
use promql_parser::functions::BuiltinFunction;

/// Resolves `@ start()`/`@ end()` to the query's start and end, and wraps
/// every maximal sub-tree whose value does not change between evaluation
/// steps in [`Expr::StepInvariant`].
pub fn preprocess_expr(mut expr: Expr, start: i64, end: i64) -> Expr {
    if preprocess_node(&mut expr, start, end) {
        return wrap(expr);
    }
    expr
}

fn wrap(expr: Expr) -> Expr {
    match expr {
        Expr::StepInvariant(_) => expr,
        _ => Expr::StepInvariant(Box::new(expr)),
    }
}

fn wrap_in_place(expr: &mut Expr) {
    let inner = std::mem::replace(expr, Expr::NumberLiteral(0.0));
    *expr = wrap(inner);
}

fn resolve_at(at: &mut Option<AtModifier>, start: i64, end: i64) {
    match at {
        Some(AtModifier::Start) => *at = Some(AtModifier::Timestamp(start)),
        Some(AtModifier::End) => *at = Some(AtModifier::Timestamp(end)),
        _ => {}
    }
}

/// Functions whose value depends on the evaluation time even when all of
/// their arguments do not.
fn is_time_dependent(func: BuiltinFunction) -> bool {
    matches!(func, BuiltinFunction::Time)
}

/// Returns true when the whole node is step invariant. Invariant children of
/// a node that is not are wrapped in place.
fn preprocess_node(expr: &mut Expr, start: i64, end: i64) -> bool {
    match expr {
        Expr::NumberLiteral(_) | Expr::StringLiteral(_) => true,
        Expr::StepInvariant(_) => true,
        Expr::VectorSelector(vs) => {
            resolve_at(&mut vs.at, start, end);
            vs.at.is_some()
        }
        Expr::MatrixSelector(ms) => {
            resolve_at(&mut ms.vector_selector.at, start, end);
            ms.vector_selector.at.is_some()
        }
        Expr::Subquery(sq) => {
            // the inside is evaluated once even when the subquery itself is
            // pinned, so it is wrapped independently of the `@` on the subquery
            if preprocess_node(&mut sq.expr, start, end) {
                wrap_in_place(&mut sq.expr);
            }
            resolve_at(&mut sq.at, start, end);
            sq.at.is_some()
        }
        Expr::Call(call) => {
            let flags: Vec<bool> = call
                .args
                .iter_mut()
                .map(|arg| preprocess_node(arg, start, end))
                .collect();
            if !is_time_dependent(call.func) && flags.iter().all(|f| *f) {
                return true;
            }
            for (arg, invariant) in call.args.iter_mut().zip(flags) {
                if invariant {
                    wrap_in_place(arg);
                }
            }
            false
        }
        Expr::Aggregate(agg) => {
            let expr_invariant = preprocess_node(&mut agg.expr, start, end);
            let param_invariant = match agg.param.as_mut() {
                Some(param) => preprocess_node(param, start, end),
                None => true,
            };
            if expr_invariant && param_invariant {
                return true;
            }
            if expr_invariant {
                wrap_in_place(&mut agg.expr);
            }
            false
        }
        Expr::Binary(be) => {
            let lhs = preprocess_node(&mut be.lhs, start, end);
            let rhs = preprocess_node(&mut be.rhs, start, end);
            if lhs && rhs {
                return true;
            }
            if lhs {
                wrap_in_place(&mut be.lhs);
            }
            if rhs {
                wrap_in_place(&mut be.rhs);
            }
            false
        }
        Expr::Unary(e) | Expr::Paren(e) => preprocess_node(e, start, end),
    }
}
