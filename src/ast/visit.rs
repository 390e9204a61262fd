//! Generic traversal over expression graphs.

use std::rc::Rc;

use super::expr::{Expr, ExprRef, Parameter};
use crate::error::QueryResult;

/// A bottom-up or top-down rewrite over an expression graph.
///
/// The default `rewrite` rebuilds a node only when one of its children
/// changed, so unchanged subtrees keep their identity.
pub trait Rewriter {
    fn rewrite(&mut self, e: &ExprRef) -> QueryResult<ExprRef> {
        rewrite_children(self, e)
    }
}

/// Rewrite every child of `e` with `r`, rebuilding `e` only if needed.
pub fn rewrite_children<R: Rewriter + ?Sized>(r: &mut R, e: &ExprRef) -> QueryResult<ExprRef> {
    match e.try_map_children(|c| r.rewrite(c))? {
        Some(rebuilt) => Ok(Rc::new(rebuilt)),
        None => Ok(e.clone()),
    }
}

/// Whether any node in `e` (including `e`) satisfies `pred`.
pub fn any_node(e: &ExprRef, pred: &mut impl FnMut(&Expr) -> bool) -> bool {
    if pred(e) {
        return true;
    }
    e.children().iter().any(|c| any_node(c, pred))
}

/// Whether `p` occurs anywhere inside `e`.
pub fn mentions(e: &ExprRef, p: &Parameter) -> bool {
    any_node(e, &mut |n| n.is_parameter(p))
}

/// Replace every occurrence of `p` in `e` by `with`.
pub fn substitute(e: &ExprRef, p: &Parameter, with: &ExprRef) -> ExprRef {
    if e.is_parameter(p) {
        return with.clone();
    }
    let mapped: Result<Option<Expr>, std::convert::Infallible> =
        e.try_map_children(|c| Ok(substitute(c, p, with)));
    match mapped {
        Ok(Some(rebuilt)) => Rc::new(rebuilt),
        _ => e.clone(),
    }
}
