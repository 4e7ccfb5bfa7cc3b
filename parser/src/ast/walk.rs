use crate::ast::Expr;

impl Expr {
    /// Direct child expressions in evaluation order.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::NumberLiteral(_)
            | Expr::StringLiteral(_)
            | Expr::VectorSelector(_)
            | Expr::MatrixSelector(_) => vec![],
            Expr::Subquery(sq) => vec![sq.expr.as_ref()],
            Expr::Call(call) => call.args.iter().collect(),
            Expr::Aggregate(agg) => {
                let mut res = vec![agg.expr.as_ref()];
                if let Some(param) = &agg.param {
                    res.push(param.as_ref());
                }
                res
            }
            Expr::Binary(be) => vec![be.lhs.as_ref(), be.rhs.as_ref()],
            Expr::Unary(e) | Expr::Paren(e) | Expr::StepInvariant(e) => vec![e.as_ref()],
        }
    }
}

/// Visits every node depth-first, parents before children. The callback
/// receives the node and the chain of its ancestors, outermost first.
pub fn walk<'a, F>(expr: &'a Expr, f: &mut F)
where
    F: FnMut(&'a Expr, &[&'a Expr]),
{
    let mut path = Vec::with_capacity(8);
    walk_inner(expr, &mut path, f);
}

fn walk_inner<'a, F>(expr: &'a Expr, path: &mut Vec<&'a Expr>, f: &mut F)
where
    F: FnMut(&'a Expr, &[&'a Expr]),
{
    f(expr, path);
    path.push(expr);
    for child in expr.children() {
        walk_inner(child, path, f);
    }
    path.pop();
}

#[cfg(test)]
mod tests {
    use crate::ast::walk;
    use crate::parser::parse;

    #[test]
    fn walk_reports_ancestors() {
        let expr = parse("sum(rate(foo[5m])) + bar").unwrap();
        let mut seen = vec![];
        walk(&expr, &mut |node, path| {
            if matches!(node, crate::ast::Expr::MatrixSelector(_) | crate::ast::Expr::VectorSelector(_)) {
                seen.push((node.to_string(), path.len()));
            }
        });
        assert_eq!(seen, vec![("foo[5m]".to_string(), 3), ("bar".to_string(), 1)]);
    }
}
