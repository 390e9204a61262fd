//! Identification of standard sequence operators.

use super::expr::{Expr, ExprRef, Method, UnaryOp};

/// A recognized `Queryable`/`Enumerable` operator, distinguished by overload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequenceMethod {
    Where,
    WhereOrdinal,
    Select,
    SelectOrdinal,
    SelectMany,
    SelectManyResultSelector,
    OrderBy,
    OrderByDescending,
    ThenBy,
    ThenByDescending,
    Take,
    Skip,
    TakeWhile,
    TakeWhileOrdinal,
    SkipWhile,
    SkipWhileOrdinal,
    Cast,
    Count,
    CountPredicate,
    LongCount,
    LongCountPredicate,
    First,
    FirstPredicate,
    FirstOrDefault,
    FirstOrDefaultPredicate,
    Single,
    SinglePredicate,
    SingleOrDefault,
    SingleOrDefaultPredicate,
    Last,
    LastPredicate,
    LastOrDefault,
    LastOrDefaultPredicate,
    Any,
    AnyPredicate,
    All,
    ToList,
    /// Any other operator: aggregates, set operators, grouping, joins.
    Other,
}

impl SequenceMethod {
    /// Identify the operator a call invokes, or `None` if it is not a sequence operator.
    pub fn identify(method: &Method, args: &[ExprRef]) -> Option<Self> {
        if !method.is_sequence_operator() {
            return None;
        }
        let arity = args.len();
        let lambda_params = |i: usize| args.get(i).and_then(|a| lambda_arity(a));
        let ordinal = |i: usize| lambda_params(i) == Some(2);
        use SequenceMethod::*;
        let m = match (method.name.as_str(), arity) {
            ("Where", 2) if ordinal(1) => WhereOrdinal,
            ("Where", 2) => Where,
            ("Select", 2) if ordinal(1) => SelectOrdinal,
            ("Select", 2) => Select,
            ("SelectMany", 2) => SelectMany,
            ("SelectMany", 3) => SelectManyResultSelector,
            ("OrderBy", 2) => OrderBy,
            ("OrderByDescending", 2) => OrderByDescending,
            ("ThenBy", 2) => ThenBy,
            ("ThenByDescending", 2) => ThenByDescending,
            ("Take", 2) => Take,
            ("Skip", 2) => Skip,
            ("TakeWhile", 2) if ordinal(1) => TakeWhileOrdinal,
            ("TakeWhile", 2) => TakeWhile,
            ("SkipWhile", 2) if ordinal(1) => SkipWhileOrdinal,
            ("SkipWhile", 2) => SkipWhile,
            ("Cast", 1) => Cast,
            ("Count", 1) => Count,
            ("Count", 2) => CountPredicate,
            ("LongCount", 1) => LongCount,
            ("LongCount", 2) => LongCountPredicate,
            ("First", 1) => First,
            ("First", 2) => FirstPredicate,
            ("FirstOrDefault", 1) => FirstOrDefault,
            ("FirstOrDefault", 2) => FirstOrDefaultPredicate,
            ("Single", 1) => Single,
            ("Single", 2) => SinglePredicate,
            ("SingleOrDefault", 1) => SingleOrDefault,
            ("SingleOrDefault", 2) => SingleOrDefaultPredicate,
            ("Last", 1) => Last,
            ("Last", 2) => LastPredicate,
            ("LastOrDefault", 1) => LastOrDefault,
            ("LastOrDefault", 2) => LastOrDefaultPredicate,
            ("Any", 1) => Any,
            ("Any", 2) => AnyPredicate,
            ("All", 2) => All,
            ("ToList", 1) => ToList,
            _ => Other,
        };
        Some(m)
    }

    /// Operators whose second argument is a boolean predicate lambda.
    pub fn has_predicate_argument(&self) -> bool {
        use SequenceMethod::*;
        matches!(
            self,
            Where
                | WhereOrdinal
                | FirstPredicate
                | FirstOrDefaultPredicate
                | SinglePredicate
                | SingleOrDefaultPredicate
                | LastPredicate
                | LastOrDefaultPredicate
                | CountPredicate
                | LongCountPredicate
                | AnyPredicate
                | All
                | SkipWhile
                | SkipWhileOrdinal
                | TakeWhile
                | TakeWhileOrdinal
        )
    }
}

/// Parameter count of a (possibly quoted) lambda.
fn lambda_arity(e: &ExprRef) -> Option<usize> {
    match &**e {
        Expr::Lambda { params, .. } => Some(params.len()),
        Expr::Unary {
            op: UnaryOp::Quote,
            operand,
            ..
        } => lambda_arity(operand),
        _ => None,
    }
}

/// Whether `e` is a call to the given sequence operator.
pub fn is_sequence_call(e: &Expr, which: SequenceMethod) -> bool {
    match e {
        Expr::Call { method, args, .. } => SequenceMethod::identify(method, args) == Some(which),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::*;

    #[test]
    fn test_identify_overloads() {
        let products = Expr::root_set("Products", Type::named("Product"));
        let p = Parameter::new("p", Type::named("Product"));
        let i = Parameter::new("i", Type::int32());
        let plain = Expr::lambda(vec![p.clone()], Expr::literal(true));
        let indexed = Expr::lambda(vec![p, i], Expr::literal(true));
        let ret = Type::query(Type::named("Product"));

        let call = queryable("Where", products.clone(), vec![plain], ret.clone());
        if let Expr::Call { method, args, .. } = &*call {
            assert_eq!(SequenceMethod::identify(method, args), Some(SequenceMethod::Where));
        }

        let call = queryable("Where", products.clone(), vec![Expr::quote(indexed)], ret.clone());
        if let Expr::Call { method, args, .. } = &*call {
            assert_eq!(SequenceMethod::identify(method, args), Some(SequenceMethod::WhereOrdinal));
        }

        let call = queryable("Sum", products, vec![], Type::int32());
        if let Expr::Call { method, args, .. } = &*call {
            assert_eq!(SequenceMethod::identify(method, args), Some(SequenceMethod::Other));
        }
    }
}
