//! Shape matchers used by the binder and the projection analyzer.
//!
//! Every matcher answers "does this shape match" with `bool` or `Option`;
//! a non-match is never an error.

use crate::ast::{
    BinaryOp, Expr, ExprRef, Owner, Parameter, ResourceId, SequenceMethod, UnaryOp, is_sequence_call,
};
use crate::metadata::ClientTypeInfo;
use crate::resource::{KeyValue, ResourceArena, TransparentScope};

use super::input;

/// A conversion the target type can already hold without it.
pub fn match_convert_to_assignable(e: &Expr) -> bool {
    match e {
        Expr::Unary {
            op: UnaryOp::Convert | UnaryOp::TypeAs,
            operand,
            ty,
            ..
        } => ty.is_assignable_from(&operand.ty()),
        _ => false,
    }
}

/// Strip quotes and assignable conversions.
pub fn strip(e: &ExprRef) -> ExprRef {
    let mut current = e.clone();
    loop {
        let next = match &*current {
            Expr::Unary {
                op: UnaryOp::Quote,
                operand,
                ..
            } => operand.clone(),
            Expr::Unary { operand, .. } if match_convert_to_assignable(&current) => operand.clone(),
            _ => return current,
        };
        current = next;
    }
}

/// The lambda under quotes/conversions, if it takes exactly `arity` parameters.
pub fn match_lambda(e: &ExprRef, arity: usize) -> Option<ExprRef> {
    let lambda = strip(e);
    match &*lambda {
        Expr::Lambda { params, .. } if params.len() == arity => Some(lambda),
        _ => None,
    }
}

pub fn match_single_argument_lambda(e: &ExprRef) -> Option<ExprRef> {
    match_lambda(e, 1)
}

pub fn match_double_argument_lambda(e: &ExprRef) -> Option<ExprRef> {
    match_lambda(e, 2)
}

/// Parameters and body of a lambda node; anything else has no parameters.
pub fn lambda_parts(lambda: &ExprRef) -> (&[Parameter], &ExprRef) {
    lambda.as_lambda().unwrap_or((&[], lambda))
}

/// `x => x`
pub fn match_identity_selector(lambda: &ExprRef) -> bool {
    let (params, body) = lambda_parts(lambda);
    match params.first() {
        Some(p) => strip(body).is_parameter(p),
        None => false,
    }
}

/// `(a, b) => b`
pub fn match_identity_projection_result_selector(lambda: &ExprRef) -> bool {
    let (params, body) = lambda_parts(lambda);
    match params.get(1) {
        Some(p) => body.is_parameter(p),
        None => false,
    }
}

/// `t => t.accessor` over a set carrying a transparent scope.
pub fn match_transparent_identity_selector(arena: &ResourceArena, input: &ExprRef, lambda: &ExprRef) -> bool {
    let (params, body) = lambda_parts(lambda);
    let [param] = params else { return false };
    let Expr::Resource { id, .. } = &**input else {
        return false;
    };
    let node = arena.node(*id);
    let Some(scope) = node.transparent_scope.as_ref().filter(|_| node.is_set()) else {
        return false;
    };
    match match_property_access(body) {
        Some(access) => access.instance.is_parameter(param) && access.path.len() == 1 && access.path[0] == scope.accessor,
        None => false,
    }
}

pub struct PropertyAccess {
    pub member: ExprRef,
    pub instance: ExprRef,
    pub path: Vec<String>,
}

/// A chain of property accesses, outermost member first in `member`.
pub fn match_property_access(e: &ExprRef) -> Option<PropertyAccess> {
    let top = strip(e);
    let mut path = Vec::new();
    let mut current = top.clone();
    while let Expr::Member {
        object: Some(object),
        member,
    } = &*current
    {
        path.insert(0, member.name.clone());
        let next = strip(object);
        current = next;
    }
    if path.is_empty() {
        return None;
    }
    Some(PropertyAccess {
        member: top,
        instance: current,
        path,
    })
}

/// A lambda whose body is a member chain rooted at its parameter.
pub fn match_parameter_member_access(e: &ExprRef) -> bool {
    let Some(lambda) = match_single_argument_lambda(e) else {
        return false;
    };
    let (params, body) = lambda_parts(&lambda);
    let param = &params[0];
    let mut current = strip(&strip_cast_method_calls(body));
    while let Expr::Member {
        object: Some(object),
        ..
    } = &*current
    {
        if object.is_parameter(param) {
            return true;
        }
        let next = strip(object);
        current = next;
    }
    false
}

/// Remove `Cast<T>()` calls wrapped around `e`.
pub fn strip_cast_method_calls(e: &ExprRef) -> ExprRef {
    let mut current = e.clone();
    loop {
        let stripped = strip(&current);
        match &*stripped {
            Expr::Call { args, .. } if is_sequence_call(&stripped, SequenceMethod::Cast) => {
                current = args[0].clone();
            }
            _ => return current,
        }
    }
}

pub fn match_and(e: &Expr) -> Option<(&ExprRef, &ExprRef)> {
    match e {
        Expr::Binary {
            op: BinaryOp::And | BinaryOp::AndAlso,
            left,
            right,
            ..
        } => Some((left, right)),
        _ => None,
    }
}

/// Split a predicate into its AND-ed conjuncts, left to right.
pub fn conjuncts(e: &ExprRef) -> Vec<ExprRef> {
    let mut out = Vec::new();
    collect_conjuncts(e, &mut out);
    out
}

fn collect_conjuncts(e: &ExprRef, out: &mut Vec<ExprRef>) {
    match match_and(e) {
        Some((l, r)) => {
            collect_conjuncts(l, out);
            collect_conjuncts(r, out);
        }
        None => out.push(e.clone()),
    }
}

/// `key == constant` (either side) for a key property of `target`.
pub fn match_key_comparison(
    types: &dyn ClientTypeInfo,
    arena: &ResourceArena,
    e: &ExprRef,
    target: ResourceId,
) -> Option<KeyValue> {
    let Expr::Binary {
        op: BinaryOp::Equal,
        left,
        right,
        ..
    } = &**e
    else {
        return None;
    };
    let key_property = |side: &ExprRef| -> Option<crate::ast::Member> {
        let Expr::Member {
            object: Some(object),
            member,
        } = &**side
        else {
            return None;
        };
        let Expr::InputRef { slot, ty } = &**object else {
            return None;
        };
        if arena.resolve(*slot) != target {
            return None;
        }
        types
            .key_properties(ty)
            .contains(&member.name)
            .then(|| member.clone())
    };
    let (property, constant) = match (key_property(left), key_property(right)) {
        (Some(p), _) if right.as_constant().is_some() => (p, right),
        (_, Some(p)) if left.as_constant().is_some() => (p, left),
        _ => return None,
    };
    if constant.is_null_constant() {
        return None;
    }
    Some(KeyValue {
        property,
        value: constant.clone(),
    })
}

/// Whether `e` is typed as a sequence (a collection-valued property).
pub fn match_non_singleton_property(e: &ExprRef) -> bool {
    e.ty().is_sequence()
}

/// A navigation property accessed directly on `input`'s back-reference.
fn match_navigation_property(
    arena: &ResourceArena,
    input: ResourceId,
    e: &ExprRef,
    require_set: bool,
) -> Option<ExprRef> {
    if match_non_singleton_property(e) != require_set {
        return None;
    }
    let access = match_property_access(e)?;
    match &*access.instance {
        Expr::InputRef { slot, .. } if arena.resolve(*slot) == input => Some(access.member),
        _ => None,
    }
}

pub fn match_property_projection_set(arena: &ResourceArena, input: ResourceId, e: &ExprRef) -> Option<ExprRef> {
    match_navigation_property(arena, input, e, true)
}

pub fn match_property_projection_singleton(arena: &ResourceArena, input: ResourceId, e: &ExprRef) -> Option<ExprRef> {
    match_navigation_property(arena, input, e, false)
}

/// `x => new T { ... }` with a parameterless constructor.
pub fn match_member_init_with_default_constructor(lambda: &ExprRef) -> bool {
    let (_, body) = lambda_parts(lambda);
    matches!(&*strip(body), Expr::MemberInit { args, .. } if args.is_empty())
}

/// `x => new T(...)` or `x => new { ... }`.
pub fn match_new(lambda: &ExprRef) -> bool {
    let (_, body) = lambda_parts(lambda);
    matches!(&**body, Expr::New { .. })
}

/// `a + b` over strings.
pub fn match_string_addition(e: &Expr) -> Option<(&ExprRef, &ExprRef)> {
    match e {
        Expr::Binary {
            op: BinaryOp::Add,
            left,
            right,
            ..
        } if left.ty().is_string() && right.ty().is_string() => Some((left, right)),
        _ => None,
    }
}

/// A member chain ending in one of `params`.
fn is_simple_access(e: &ExprRef, params: &[Parameter]) -> bool {
    let mut current = e.clone();
    while let Expr::Member {
        object: Some(object),
        ..
    } = &*current
    {
        let next = object.clone();
        current = next;
    }
    match &*current {
        Expr::Parameter(p) => params.contains(p),
        _ => false,
    }
}

/// `(a, b) => new { a, b }`: the join record of a `SelectMany` result selector.
///
/// `input` is the set the `SelectMany` produced; its source provides the
/// elements `a` stands for.
pub fn match_transparent_scope_selector(
    arena: &mut ResourceArena,
    input: ResourceId,
    lambda: &ExprRef,
) -> Option<TransparentScope> {
    let (params, body) = lambda_parts(lambda);
    let [collector_source, introduced] = params else {
        return None;
    };
    let Expr::New {
        ty: crate::ast::Type::Anonymous(_),
        args,
        members,
    } = &**body
    else {
        return None;
    };
    if args.len() < 2 || members.len() != args.len() {
        return None;
    }
    let source_set = arena.node(input).source?;

    let mut accessor = None;
    let mut source_accessors = Vec::new();
    for (arg, name) in args.iter().zip(members) {
        if !is_simple_access(arg, params) {
            return None;
        }
        let stripped = strip(arg);
        if stripped.is_parameter(introduced) {
            if accessor.is_some() {
                return None;
            }
            accessor = Some(name.clone());
        } else if stripped.is_parameter(collector_source) {
            source_accessors.push((name.clone(), arena.input_ref(source_set)));
        } else {
            let bound = input::bind(arena, arg, source_set, collector_source);
            let [referenced] = bound.referenced.as_slice() else {
                return None;
            };
            let reference = arena.input_ref(*referenced);
            source_accessors.push((name.clone(), reference));
        }
    }
    Some(TransparentScope {
        accessor: accessor?,
        source_accessors,
    })
}

/// Whether `e` is `Object.ReferenceEquals(a, b)`.
pub fn match_reference_equals(e: &Expr) -> Option<(&ExprRef, &ExprRef)> {
    match e {
        Expr::Call {
            object: None,
            method,
            args,
        } if method.owner == Owner::Object && method.name == "ReferenceEquals" && args.len() == 2 => {
            Some((&args[0], &args[1]))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Type, queryable};

    fn product() -> Type {
        Type::named("Product")
    }

    #[test]
    fn test_strip_quote_and_widening() {
        let p = Parameter::new("p", product());
        let lambda = Expr::lambda(vec![p.clone()], Expr::parameter(&p));
        let wrapped = Expr::quote(lambda.clone());
        assert_eq!(strip(&wrapped), lambda);
        assert!(match_identity_selector(&match_single_argument_lambda(&wrapped).unwrap()));
    }

    #[test]
    fn test_conjuncts_flatten() {
        let p = Parameter::new("p", product());
        let a = Expr::equal(Expr::property(Expr::parameter(&p), "Id", Type::int32()), Expr::literal(1));
        let b = Expr::literal(true);
        let c = Expr::literal(false);
        let e = Expr::and_also(Expr::and(a.clone(), b.clone()), c.clone());
        assert_eq!(conjuncts(&e), vec![a, b, c]);
    }

    #[test]
    fn test_key_comparison_either_side() {
        let m = crate::metadata::Model::new("Shop")
            .entity("Product", &["Id"], &[("Id", "Int32"), ("Name", "String")]);
        let mut arena = ResourceArena::new();
        let id = arena.new_root("Products", product());
        let r = arena.input_ref(id);
        let key = Expr::property(r.clone(), "Id", Type::int32());

        let e = Expr::equal(Expr::literal(5), key.clone());
        let kv = match_key_comparison(&m, &arena, &e, id).unwrap();
        assert_eq!(kv.property.name, "Id");

        let not_key = Expr::equal(Expr::property(r, "Name", Type::string()), Expr::literal("x"));
        assert!(match_key_comparison(&m, &arena, &not_key, id).is_none());
    }

    #[test]
    fn test_strip_cast_calls() {
        let source = Expr::root_set("Products", product());
        let cast = queryable("Cast", source.clone(), vec![], Type::query(Type::named("Special")));
        assert_eq!(strip_cast_method_calls(&cast), source);
    }
}
