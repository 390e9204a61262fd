//! Canonicalization of equivalent expression shapes.
//!
//! Runs bottom-up after partial evaluation. Operator-overload calls become
//! operator nodes, `Equals`/`CompareTo`/`Compare` become relational nodes,
//! redundant widening conversions disappear, and `x ?? false` predicates
//! become `(bool)x`. Each replaced node is remembered against the node it
//! replaced so diagnostics can point back at what the caller wrote.

use std::collections::HashMap;
use std::rc::Rc;

use tracing::trace;

use crate::ast::{
    BinaryOp, Expr, ExprRef, Method, NodeKey, Owner, Primitive, Rewriter, SequenceMethod, Type,
    UnaryOp, Value, rewrite_children,
};
use crate::error::QueryResult;
use crate::metadata::ClientTypeInfo;
use crate::projection::is_collection_producing;

/// Rewritten node to the node it replaced, in rewrite order.
#[derive(Debug, Clone, Default)]
pub struct RewriteMap {
    entries: Vec<(ExprRef, ExprRef)>,
}

impl RewriteMap {
    fn record(&mut self, rewritten: &ExprRef, original: &ExprRef) {
        if !Rc::ptr_eq(rewritten, original) {
            self.entries.push((rewritten.clone(), original.clone()));
        }
    }

    /// The expression `rewritten` replaced, if it is a rewrite product.
    pub fn original_of(&self, rewritten: &ExprRef) -> Option<&ExprRef> {
        self.entries
            .iter()
            .find(|(r, _)| Rc::ptr_eq(r, rewritten))
            .map(|(_, o)| o)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ExprRef, &ExprRef)> {
        self.entries.iter().map(|(r, o)| (r, o))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Operands of a synthesized three-way comparison.
struct ComparePair {
    // Holds the conditional alive so its address cannot be reused.
    _node: ExprRef,
    left: ExprRef,
    right: ExprRef,
}

pub struct Normalizer<'a> {
    types: &'a dyn ClientTypeInfo,
    compares: HashMap<NodeKey, ComparePair>,
    rewrites: RewriteMap,
}

/// Normalize `expr`, returning the canonical tree and its rewrite map.
pub fn normalize(expr: &ExprRef, types: &dyn ClientTypeInfo) -> QueryResult<(ExprRef, RewriteMap)> {
    let mut n = Normalizer::new(types);
    let out = n.rewrite(expr)?;
    Ok((out, n.rewrites))
}

impl<'a> Normalizer<'a> {
    pub fn new(types: &'a dyn ClientTypeInfo) -> Self {
        Self {
            types,
            compares: HashMap::new(),
            rewrites: RewriteMap::default(),
        }
    }

    pub fn into_rewrites(self) -> RewriteMap {
        self.rewrites
    }

    fn apply(&mut self, e: ExprRef) -> ExprRef {
        match &*e {
            Expr::Binary { .. } => self.visit_binary(e),
            Expr::Unary { .. } => self.visit_unary(e),
            Expr::Call { .. } => self.visit_call(e),
            _ => e,
        }
    }

    fn visit_binary(&mut self, e: ExprRef) -> ExprRef {
        let Expr::Binary {
            op,
            left,
            right,
            ty,
            lifted_to_null,
            method,
        } = &*e
        else {
            return e;
        };
        if op.is_relational() {
            if let Some(pair) = self.compares.get(&NodeKey::of(left)) {
                if is_constant_zero(right) {
                    trace!(op = ?op, "collapsed three-way compare");
                    let (l, r) = (pair.left.clone(), pair.right.clone());
                    return relational(*op, l, r);
                }
            }
        }
        if *op == BinaryOp::Equal {
            let l = unwrap_object_convert(left);
            let r = unwrap_object_convert(right);
            if !Rc::ptr_eq(&l, left) || !Rc::ptr_eq(&r, right) {
                return Rc::new(Expr::Binary {
                    op: *op,
                    left: l,
                    right: r,
                    ty: ty.clone(),
                    lifted_to_null: *lifted_to_null,
                    method: method.clone(),
                });
            }
        }
        e
    }

    fn visit_unary(&self, e: ExprRef) -> ExprRef {
        let Expr::Unary {
            op: UnaryOp::Convert | UnaryOp::TypeAs,
            operand,
            ty,
            ..
        } = &*e
        else {
            return e;
        };
        let from = operand.ty();
        if !ty.is_assignable_from(&from) {
            return e;
        }
        if (from.is_nullable() || ty.is_nullable()) && from != *ty {
            return e;
        }
        if self.types.element_is_entity(&from) && is_collection_producing(operand) {
            return e;
        }
        operand.clone()
    }

    fn visit_call(&mut self, e: ExprRef) -> ExprRef {
        let Expr::Call {
            object,
            method,
            args,
        } = &*e
        else {
            return e;
        };

        if method.is_static && method.name.starts_with("op_") {
            if let Some(rewritten) = operator_call(method, args) {
                return self.apply(rewritten);
            }
        }

        match (object, method.name.as_str(), args.as_slice()) {
            (None, "Equals", [l, r]) if method.ret.is_bool() => {
                return self.apply(relational(BinaryOp::Equal, l.clone(), r.clone()));
            }
            (Some(o), "Equals", [r]) if method.ret.is_bool() => {
                return self.apply(relational(BinaryOp::Equal, o.clone(), r.clone()));
            }
            (Some(o), "CompareTo", [r]) if is_int32(&method.ret) => {
                return self.three_way(o.clone(), r.clone());
            }
            (None, "Compare", [l, r, ..]) if is_int32(&method.ret) => {
                return self.three_way(l.clone(), r.clone());
            }
            (None, "CompareString", [l, r, ..]) if method.owner == Owner::VisualBasic => {
                return self.three_way(l.clone(), r.clone());
            }
            _ => {}
        }

        if let Some(seq) = SequenceMethod::identify(method, args) {
            if seq.has_predicate_argument() && args.len() == 2 {
                if let Some(predicate) = coalesce_to_cast(&args[1]) {
                    let mut rebuilt = args.clone();
                    rebuilt[1] = predicate;
                    return Expr::call(object.clone(), method.clone(), rebuilt);
                }
            }
        }
        e
    }

    /// `cond(l == r, 0, cond(l > r, 1, -1))`, remembered for a later `<op> 0`.
    fn three_way(&mut self, left: ExprRef, right: ExprRef) -> ExprRef {
        let int = Type::int32();
        let inner = Expr::conditional(
            relational(BinaryOp::GreaterThan, left.clone(), right.clone()),
            Expr::constant(Value::Int32(1), int.clone()),
            Expr::constant(Value::Int32(-1), int.clone()),
            int.clone(),
        );
        let eq = self.visit_binary(relational(BinaryOp::Equal, left.clone(), right.clone()));
        let node = Expr::conditional(eq, Expr::constant(Value::Int32(0), int.clone()), inner, int);
        self.compares.insert(
            NodeKey::of(&node),
            ComparePair {
                _node: node.clone(),
                left,
                right,
            },
        );
        node
    }
}

impl Rewriter for Normalizer<'_> {
    fn rewrite(&mut self, e: &ExprRef) -> QueryResult<ExprRef> {
        let visited = rewrite_children(self, e)?;
        let out = self.apply(visited);
        self.rewrites.record(&out, e);
        Ok(out)
    }
}

/// A relational node that is never lifted to null.
fn relational(op: BinaryOp, left: ExprRef, right: ExprRef) -> ExprRef {
    Rc::new(Expr::Binary {
        op,
        left,
        right,
        ty: Type::bool(),
        lifted_to_null: false,
        method: None,
    })
}

fn is_int32(ty: &Type) -> bool {
    *ty == Type::Primitive(Primitive::Int32)
}

fn is_constant_zero(e: &ExprRef) -> bool {
    matches!(&**e, Expr::Constant { value: Value::Int32(0), .. })
}

/// Strip `object` typing from an equality operand.
fn unwrap_object_convert(e: &ExprRef) -> ExprRef {
    match &**e {
        Expr::Constant { value, ty: Type::Object } if !value.is_null() => match value.natural_type() {
            Some(natural) => Expr::constant(value.clone(), natural),
            None => e.clone(),
        },
        Expr::Unary {
            op: UnaryOp::Convert,
            operand,
            ty: Type::Object,
            ..
        } => operand.clone(),
        _ => e.clone(),
    }
}

/// Map a static `op_*` call onto the operator node it stands for.
fn operator_call(method: &Method, args: &[ExprRef]) -> Option<ExprRef> {
    if let [l, r] = args {
        let op = match method.name.as_str() {
            "op_Equality" => BinaryOp::Equal,
            "op_Inequality" => BinaryOp::NotEqual,
            "op_GreaterThan" => BinaryOp::GreaterThan,
            "op_GreaterThanOrEqual" => BinaryOp::GreaterThanOrEqual,
            "op_LessThan" => BinaryOp::LessThan,
            "op_LessThanOrEqual" => BinaryOp::LessThanOrEqual,
            "op_Addition" => BinaryOp::Add,
            "op_Subtraction" => BinaryOp::Subtract,
            "op_Multiply" => BinaryOp::Multiply,
            "op_Division" => BinaryOp::Divide,
            "op_Modulus" => BinaryOp::Modulo,
            "op_BitwiseAnd" => BinaryOp::And,
            "op_BitwiseOr" => BinaryOp::Or,
            "op_ExclusiveOr" => BinaryOp::ExclusiveOr,
            _ => return None,
        };
        return Some(Expr::binary_with_method(op, l.clone(), r.clone(), method.clone()));
    }
    if let [operand] = args {
        let op = match method.name.as_str() {
            "op_UnaryNegation" => UnaryOp::Negate,
            "op_UnaryPlus" => UnaryOp::Plus,
            "op_Explicit" | "op_Implicit" => UnaryOp::Convert,
            "op_OnesComplement" | "op_False" => UnaryOp::Not,
            _ => return None,
        };
        return Some(Rc::new(Expr::Unary {
            op,
            operand: operand.clone(),
            ty: method.ret.clone(),
            method: Some(method.clone()),
        }));
    }
    None
}

/// `x => a ?? false` (possibly quoted) to `x => (bool)a`.
fn coalesce_to_cast(arg: &ExprRef) -> Option<ExprRef> {
    match &**arg {
        Expr::Unary {
            op: UnaryOp::Quote,
            operand,
            ..
        } => coalesce_to_cast(operand).map(Expr::quote),
        Expr::Lambda { params, body } => match &**body {
            Expr::Binary {
                op: BinaryOp::Coalesce,
                left,
                right,
                ..
            } if matches!(right.as_constant(), Some(Value::Bool(false))) => Some(Expr::lambda(
                params.clone(),
                Expr::convert(left.clone(), Type::bool()),
            )),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Parameter, queryable, string_method};
    use crate::metadata::Model;

    fn model() -> Model {
        Model::new("Shop")
            .entity_set("Products", "Product")
            .entity("Product", &["Id"], &[("Id", "Int32"), ("Name", "String"), ("Discontinued", "Boolean?")])
    }

    fn product() -> Type {
        Type::named("Product")
    }

    fn name_of(p: &Parameter) -> ExprRef {
        Expr::property(Expr::parameter(p), "Name", Type::string())
    }

    #[test]
    fn test_equals_matches_operator() {
        let m = model();
        let p = Parameter::new("p", product());
        let a = name_of(&p);
        let b = Expr::literal("x");

        let via_call = Expr::call(
            Some(a.clone()),
            string_method("Equals", vec![Type::Object], Type::bool()),
            vec![Expr::convert(b.clone(), Type::Object)],
        );
        let via_operator = Expr::equal(a, b);

        let (left, _) = normalize(&via_call, &m).unwrap();
        let (right, _) = normalize(&via_operator, &m).unwrap();
        assert_eq!(left, right);
    }

    #[test]
    fn test_operator_method_becomes_binary() {
        let m = model();
        let method = Method::new_static(
            Owner::Type(Type::Primitive(Primitive::Decimal)),
            "op_GreaterThan",
            vec![],
            Type::bool(),
        );
        let p = Parameter::new("d", Type::Primitive(Primitive::Decimal));
        let call = Expr::call(None, method, vec![Expr::parameter(&p), Expr::literal(rust_decimal::Decimal::ONE)]);
        let (out, rewrites) = normalize(&call, &m).unwrap();
        match &*out {
            Expr::Binary {
                op: BinaryOp::GreaterThan,
                lifted_to_null: false,
                method: Some(m),
                ..
            } => assert_eq!(m.name, "op_GreaterThan"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(Rc::ptr_eq(rewrites.original_of(&out).unwrap(), &call));
    }

    #[test]
    fn test_compare_to_collapses() {
        let m = model();
        let p = Parameter::new("p", product());
        let compare = Expr::call(
            Some(name_of(&p)),
            string_method("CompareTo", vec![Type::string()], Type::int32()),
            vec![Expr::literal("m")],
        );
        let e = Expr::binary(BinaryOp::GreaterThan, compare, Expr::literal(0));
        let (out, _) = normalize(&e, &m).unwrap();
        assert_eq!(out, relational(BinaryOp::GreaterThan, name_of(&p), Expr::literal("m")));
    }

    #[test]
    fn test_compare_without_zero_stays_three_way() {
        let m = model();
        let p = Parameter::new("p", product());
        let compare = Expr::call(
            None,
            Method::new_static(Owner::Type(Type::string()), "Compare", vec![], Type::int32()),
            vec![name_of(&p), Expr::literal("m")],
        );
        let e = Expr::binary(BinaryOp::GreaterThan, compare, Expr::literal(1));
        let (out, _) = normalize(&e, &m).unwrap();
        match &*out {
            Expr::Binary { left, .. } => assert!(matches!(&**left, Expr::Conditional { .. })),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_compare_string_collapses() {
        let m = model();
        let p = Parameter::new("p", product());
        let compare = Expr::call(
            None,
            Method::new_static(Owner::VisualBasic, "CompareString", vec![], Type::int32()),
            vec![name_of(&p), Expr::literal("m"), Expr::literal(false)],
        );
        let e = Expr::binary(BinaryOp::Equal, compare, Expr::literal(0));
        let (out, _) = normalize(&e, &m).unwrap();
        assert_eq!(out, relational(BinaryOp::Equal, name_of(&p), Expr::literal("m")));
    }

    #[test]
    fn test_widening_convert_elided() {
        let m = model();
        let p = Parameter::new("p", product());
        let boxed = Expr::convert(name_of(&p), Type::Object);
        let (out, _) = normalize(&boxed, &m).unwrap();
        assert_eq!(out, name_of(&p));

        let lifted = Expr::convert(Expr::property(Expr::parameter(&p), "Id", Type::int32()), Type::Nullable(Primitive::Int32));
        let (kept, _) = normalize(&lifted, &m).unwrap();
        assert!(Rc::ptr_eq(&kept, &lifted));
    }

    #[test]
    fn test_coalesce_false_predicate() {
        let m = model();
        let p = Parameter::new("p", product());
        let flag = Expr::property(Expr::parameter(&p), "Discontinued", Type::Nullable(Primitive::Bool));
        let body = Expr::binary(BinaryOp::Coalesce, flag.clone(), Expr::literal(false));
        let source = Expr::root_set("Products", product());
        let call = queryable("Where", source, vec![Expr::quote(Expr::lambda(vec![p.clone()], body))], Type::query(product()));

        let (out, _) = normalize(&call, &m).unwrap();
        let Expr::Call { args, .. } = &*out else { panic!("not a call") };
        let Expr::Unary { op: UnaryOp::Quote, operand, .. } = &*args[1] else { panic!("not quoted") };
        let (_, body) = operand.as_lambda().unwrap();
        assert_eq!(*body, Expr::convert(flag, Type::bool()));
    }

    #[test]
    fn test_object_constant_retyped_in_equality() {
        let m = model();
        let p = Parameter::new("p", product());
        let e = Expr::equal(
            Expr::convert(name_of(&p), Type::Object),
            Expr::constant(Value::String("a".into()), Type::Object),
        );
        let (out, _) = normalize(&e, &m).unwrap();
        assert_eq!(out, relational(BinaryOp::Equal, name_of(&p), Expr::literal("a")));
    }

    #[test]
    fn test_idempotent_on_sample() {
        let m = model();
        let p = Parameter::new("p", product());
        let compare = Expr::call(
            Some(name_of(&p)),
            string_method("CompareTo", vec![Type::string()], Type::int32()),
            vec![Expr::literal("m")],
        );
        let e = Expr::and_also(
            Expr::binary(BinaryOp::LessThan, compare.clone(), Expr::literal(0)),
            Expr::binary(BinaryOp::Equal, compare, Expr::literal(2)),
        );
        let (once, _) = normalize(&e, &m).unwrap();
        let (twice, _) = normalize(&once, &m).unwrap();
        assert_eq!(once, twice);
    }
}
