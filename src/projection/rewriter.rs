//! Re-rooting a projection over a join record onto the leaf entity.
//!
//! After `SelectMany(c => c.Orders, (c, o) => new { c, o })` the set holds
//! `o` but the next selector still receives the record. A selector that only
//! reads through the record's field for the leaf, such as
//! `t => new { t.o.Amount }`, is rewritten to `it => new { it.Amount }`.

use crate::ast::{Expr, ExprRef, Parameter, Rewriter, Type, rewrite_children};
use crate::binder::patterns::{lambda_parts, match_single_argument_lambda};
use crate::error::{QueryResult, Unsupported};
use crate::metadata::ClientTypeInfo;

pub fn try_to_rewrite(types: &dyn ClientTypeInfo, lambda: &ExprRef, leaf: &Type) -> QueryResult<ExprRef> {
    let Some(selector) = match_single_argument_lambda(lambda) else {
        return Ok(lambda.clone());
    };
    let (params, body) = lambda_parts(&selector);
    let old = &params[0];
    if types.is_entity_type(&old.ty) {
        return Ok(lambda.clone());
    }
    let holds_leaf = matches!(&old.ty, Type::Anonymous(fields) if fields.iter().any(|f| f.ty == *leaf));
    if !holds_leaf {
        return Ok(lambda.clone());
    }

    let it = Parameter::new("it", leaf.clone());
    let mut rewriter = ProjectionRewriter {
        old,
        new: Expr::parameter(&it),
        leaf,
    };
    let body = rewriter.rewrite(body)?;
    Ok(Expr::lambda(vec![it], body))
}

struct ProjectionRewriter<'a> {
    old: &'a Parameter,
    new: ExprRef,
    leaf: &'a Type,
}

impl Rewriter for ProjectionRewriter<'_> {
    fn rewrite(&mut self, e: &ExprRef) -> QueryResult<ExprRef> {
        match &**e {
            Expr::Member {
                object: Some(object),
                member,
            } if object.is_parameter(self.old) => {
                if member.ty == *self.leaf {
                    Ok(self.new.clone())
                } else {
                    Err(Unsupported::CanOnlyProjectTheLeaf.into())
                }
            }
            _ => rewrite_children(self, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Field;
    use crate::metadata::Model;

    fn model() -> Model {
        Model::new("Shop")
            .entity("Customer", &["Id"], &[("Id", "Int32")])
            .entity("Order", &["Id"], &[("Id", "Int32"), ("Amount", "Decimal")])
    }

    fn record() -> Type {
        Type::Anonymous(vec![
            Field::new("c", Type::named("Customer")),
            Field::new("o", Type::named("Order")),
        ])
    }

    #[test]
    fn test_rewrites_leaf_access() {
        let t = Parameter::new("t", record());
        let o = Expr::property(Expr::parameter(&t), "o", Type::named("Order"));
        let amount = Expr::property(o, "Amount", Type::Primitive(crate::ast::Primitive::Decimal));
        let lambda = Expr::lambda(vec![t], amount);
        let rewritten = try_to_rewrite(&model(), &lambda, &Type::named("Order")).unwrap();
        assert_eq!(rewritten.to_string(), "it => it.Amount");
    }

    #[test]
    fn test_rejects_non_leaf_access() {
        let t = Parameter::new("t", record());
        let c = Expr::property(Expr::parameter(&t), "c", Type::named("Customer"));
        let id = Expr::property(c, "Id", Type::int32());
        let lambda = Expr::lambda(vec![t], id);
        let err = try_to_rewrite(&model(), &lambda, &Type::named("Order")).unwrap_err();
        assert_eq!(err.as_unsupported(), Some(&Unsupported::CanOnlyProjectTheLeaf));
    }

    #[test]
    fn test_entity_selector_untouched() {
        let p = Parameter::new("p", Type::named("Order"));
        let lambda = Expr::lambda(vec![p.clone()], Expr::parameter(&p));
        let same = try_to_rewrite(&model(), &lambda, &Type::named("Order")).unwrap();
        assert!(std::rc::Rc::ptr_eq(&same, &lambda));
    }
}
