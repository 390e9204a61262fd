//! Partial evaluation: fold every parameter-free subtree into a constant.
//!
//! Two passes. `nominate` walks bottom-up and marks nodes whose whole subtree
//! can be evaluated on the client (no lambda parameter, lambda or root set
//! inside). `SubtreeEvaluator` then walks top-down and replaces each maximal
//! marked subtree by a constant computed by the [`HostEvaluator`].

use std::collections::HashSet;

use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use tracing::trace;

use crate::ast::{
    BinaryOp, Expr, ExprRef, NodeKey, Owner, Primitive, Rewriter, Type, UnaryOp, Value,
    rewrite_children,
};
use crate::error::{EvaluationError, QueryResult};

/// Computes the value of a closed expression.
///
/// Errors are surfaced to the caller unchanged as the compilation's failure.
pub trait HostEvaluator {
    fn evaluate(&self, expr: &ExprRef) -> Result<Value, EvaluationError>;
}

/// Replace every maximal parameter-free subtree of `expr` with a constant.
pub fn partial_eval(expr: &ExprRef, host: &dyn HostEvaluator) -> QueryResult<ExprRef> {
    let mut candidates = HashSet::new();
    nominate(expr, &mut candidates);
    let mut evaluator = SubtreeEvaluator { candidates, host };
    evaluator.rewrite(expr)
}

fn can_be_evaluated_locally(e: &Expr) -> bool {
    !matches!(
        e,
        Expr::Parameter(_)
            | Expr::Lambda { .. }
            | Expr::RootSet { .. }
            | Expr::Resource { .. }
            | Expr::InputRef { .. }
    )
}

/// Mark evaluable nodes; returns whether `e` itself was marked.
fn nominate(e: &ExprRef, candidates: &mut HashSet<NodeKey>) -> bool {
    let mut evaluable = true;
    for child in e.children() {
        if !nominate(&child, candidates) {
            evaluable = false;
        }
    }
    if evaluable && can_be_evaluated_locally(e) {
        candidates.insert(NodeKey::of(e));
        true
    } else {
        false
    }
}

struct SubtreeEvaluator<'a> {
    candidates: HashSet<NodeKey>,
    host: &'a dyn HostEvaluator,
}

impl SubtreeEvaluator<'_> {
    fn fold(&self, e: &ExprRef) -> QueryResult<ExprRef> {
        if matches!(**e, Expr::Constant { .. }) {
            return Ok(e.clone());
        }
        let value = self.host.evaluate(e)?;
        let mut ty = e.ty();
        if let Some(Type::Collection(runtime)) = value.natural_type() {
            let retype = matches!(&ty, Type::Collection(declared) if **declared != *runtime);
            if retype {
                ty = Type::Collection(runtime);
            }
        }
        trace!(expr = %e, value = %value, "folded closed subtree");
        Ok(Expr::constant(value, ty))
    }
}

impl Rewriter for SubtreeEvaluator<'_> {
    fn rewrite(&mut self, e: &ExprRef) -> QueryResult<ExprRef> {
        if self.candidates.contains(&NodeKey::of(e)) {
            return self.fold(e);
        }
        rewrite_children(self, e)
    }
}

/// The default host: a small interpreter for closed expressions.
#[derive(Debug, Clone, Copy, Default)]
pub struct Interpreter;

impl HostEvaluator for Interpreter {
    fn evaluate(&self, expr: &ExprRef) -> Result<Value, EvaluationError> {
        eval(expr)
    }
}

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Dec(Decimal),
    Float(f64),
}

fn to_num(v: &Value) -> Option<Num> {
    match v {
        Value::Byte(n) => Some(Num::Int(*n as i64)),
        Value::Int16(n) => Some(Num::Int(*n as i64)),
        Value::Int32(n) => Some(Num::Int(*n as i64)),
        Value::Int64(n) => Some(Num::Int(*n)),
        Value::Single(n) => Some(Num::Float(*n as f64)),
        Value::Double(n) => Some(Num::Float(*n)),
        Value::Decimal(n) => Some(Num::Dec(*n)),
        _ => None,
    }
}

fn as_decimal(n: Num) -> Result<Decimal, EvaluationError> {
    match n {
        Num::Int(i) => Ok(Decimal::from(i)),
        Num::Dec(d) => Ok(d),
        Num::Float(f) => Decimal::from_f64(f).ok_or(EvaluationError::Overflow),
    }
}

fn as_float(n: Num) -> f64 {
    match n {
        Num::Int(i) => i as f64,
        Num::Dec(d) => d.to_f64().unwrap_or(f64::NAN),
        Num::Float(f) => f,
    }
}

/// Store a numeric result as a value of primitive `p`.
fn from_num(n: Num, p: Primitive) -> Result<Value, EvaluationError> {
    let int = |n: Num| -> Result<i64, EvaluationError> {
        match n {
            Num::Int(i) => Ok(i),
            Num::Dec(d) => d.trunc().to_i64().ok_or(EvaluationError::Overflow),
            Num::Float(f) if f.is_finite() && f.abs() < 9.2e18 => Ok(f.trunc() as i64),
            Num::Float(_) => Err(EvaluationError::Overflow),
        }
    };
    let overflow = |_| EvaluationError::Overflow;
    Ok(match p {
        Primitive::Byte => Value::Byte(u8::try_from(int(n)?).map_err(overflow)?),
        Primitive::Int16 => Value::Int16(i16::try_from(int(n)?).map_err(overflow)?),
        Primitive::Int32 => Value::Int32(i32::try_from(int(n)?).map_err(overflow)?),
        Primitive::Int64 => Value::Int64(int(n)?),
        Primitive::Single => Value::Single(as_float(n) as f32),
        Primitive::Double => Value::Double(as_float(n)),
        Primitive::Decimal => Value::Decimal(as_decimal(n)?),
        other => {
            return Err(EvaluationError::InvalidCast {
                from: "number".into(),
                to: other.edm_name().into(),
            });
        }
    })
}

fn promote(a: Num, b: Num) -> (Num, Num) {
    match (a, b) {
        (Num::Float(_), _) | (_, Num::Float(_)) => (Num::Float(as_float(a)), Num::Float(as_float(b))),
        (Num::Dec(_), _) | (_, Num::Dec(_)) => (
            Num::Dec(as_decimal(a).unwrap_or_default()),
            Num::Dec(as_decimal(b).unwrap_or_default()),
        ),
        _ => (a, b),
    }
}

fn arithmetic(op: BinaryOp, a: Num, b: Num) -> Result<Num, EvaluationError> {
    use EvaluationError::*;
    Ok(match promote(a, b) {
        (Num::Int(x), Num::Int(y)) => Num::Int(match op {
            BinaryOp::Add => x.checked_add(y).ok_or(Overflow)?,
            BinaryOp::Subtract => x.checked_sub(y).ok_or(Overflow)?,
            BinaryOp::Multiply => x.checked_mul(y).ok_or(Overflow)?,
            BinaryOp::Divide if y == 0 => return Err(DivideByZero),
            BinaryOp::Divide => x.checked_div(y).ok_or(Overflow)?,
            BinaryOp::Modulo if y == 0 => return Err(DivideByZero),
            BinaryOp::Modulo => x.checked_rem(y).ok_or(Overflow)?,
            BinaryOp::And => x & y,
            BinaryOp::Or => x | y,
            BinaryOp::ExclusiveOr => x ^ y,
            _ => return Err(NotEvaluable(format!("{:?}", op))),
        }),
        (Num::Dec(x), Num::Dec(y)) => Num::Dec(match op {
            BinaryOp::Add => x.checked_add(y).ok_or(Overflow)?,
            BinaryOp::Subtract => x.checked_sub(y).ok_or(Overflow)?,
            BinaryOp::Multiply => x.checked_mul(y).ok_or(Overflow)?,
            BinaryOp::Divide if y.is_zero() => return Err(DivideByZero),
            BinaryOp::Divide => x.checked_div(y).ok_or(Overflow)?,
            BinaryOp::Modulo if y.is_zero() => return Err(DivideByZero),
            BinaryOp::Modulo => x.checked_rem(y).ok_or(Overflow)?,
            _ => return Err(NotEvaluable(format!("{:?}", op))),
        }),
        (x, y) => {
            let (x, y) = (as_float(x), as_float(y));
            Num::Float(match op {
                BinaryOp::Add => x + y,
                BinaryOp::Subtract => x - y,
                BinaryOp::Multiply => x * y,
                BinaryOp::Divide => x / y,
                BinaryOp::Modulo => x % y,
                _ => return Err(NotEvaluable(format!("{:?}", op))),
            })
        }
    })
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(x), Some(y)) = (to_num(a), to_num(b)) {
        return match promote(x, y) {
            (Num::Int(x), Num::Int(y)) => Some(x.cmp(&y)),
            (Num::Dec(x), Num::Dec(y)) => Some(x.cmp(&y)),
            (x, y) => as_float(x).partial_cmp(&as_float(y)),
        };
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::DateTime(x), Value::DateTime(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Guid(x), Value::Guid(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        _ => match compare(a, b) {
            Some(o) => o.is_eq(),
            None => a == b,
        },
    }
}

fn expect_str<'v>(v: &'v Value, what: &str) -> Result<&'v str, EvaluationError> {
    match v {
        Value::String(s) => Ok(s),
        Value::Null => Err(EvaluationError::NullReference(what.to_string())),
        other => Err(EvaluationError::InvalidCast {
            from: other.to_string(),
            to: "String".into(),
        }),
    }
}

fn expect_int(v: &Value) -> Result<i64, EvaluationError> {
    v.as_i64().ok_or_else(|| EvaluationError::InvalidCast {
        from: v.to_string(),
        to: "Int32".into(),
    })
}

fn char_index(s: &str, idx: i64) -> Result<usize, EvaluationError> {
    let count = s.chars().count() as i64;
    if idx < 0 || idx > count {
        return Err(EvaluationError::OutOfRange(format!("{} in \"{}\"", idx, s)));
    }
    Ok(s.char_indices()
        .nth(idx as usize)
        .map(|(i, _)| i)
        .unwrap_or(s.len()))
}

fn convert(v: Value, target: &Type) -> Result<Value, EvaluationError> {
    match (target, &v) {
        (_, Value::Null) => Ok(Value::Null),
        (Type::Object, _) => Ok(v),
        (Type::Primitive(p) | Type::Nullable(p), _) if p.is_numeric() => match to_num(&v) {
            Some(n) => from_num(n, *p),
            None => Err(EvaluationError::InvalidCast {
                from: v.to_string(),
                to: target.to_string(),
            }),
        },
        (Type::Primitive(p) | Type::Nullable(p), _) => {
            match v.natural_type() {
                Some(Type::Primitive(q)) if q == *p => Ok(v),
                _ => Err(EvaluationError::InvalidCast {
                    from: v.to_string(),
                    to: target.to_string(),
                }),
            }
        }
        _ => Ok(v),
    }
}

fn eval_all(items: &[ExprRef]) -> Result<Vec<Value>, EvaluationError> {
    items.iter().map(eval).collect()
}

fn eval(e: &ExprRef) -> Result<Value, EvaluationError> {
    use EvaluationError::*;
    match &**e {
        Expr::Constant { value, .. } => Ok(value.clone()),
        Expr::Member {
            object: Some(object),
            member,
        } => {
            let target = eval(object)?;
            if target.is_null() {
                if member.name == "HasValue" {
                    return Ok(Value::Bool(false));
                }
                return Err(NullReference(e.to_string()));
            }
            if let Some(v) = target.field(&member.name) {
                return Ok(v.clone());
            }
            match (&target, member.name.as_str()) {
                (_, "Value") if object.ty().is_nullable() => Ok(target.clone()),
                (_, "HasValue") => Ok(Value::Bool(true)),
                (Value::String(s), "Length") => Ok(Value::Int32(s.chars().count() as i32)),
                (Value::DateTime(d), part) => {
                    use chrono::{Datelike, Timelike};
                    let n = match part {
                        "Year" => d.year(),
                        "Month" => d.month() as i32,
                        "Day" => d.day() as i32,
                        "Hour" => d.hour() as i32,
                        "Minute" => d.minute() as i32,
                        "Second" => d.second() as i32,
                        _ => return Err(NotEvaluable(e.to_string())),
                    };
                    Ok(Value::Int32(n))
                }
                _ => Err(NotEvaluable(e.to_string())),
            }
        }
        Expr::Member { object: None, member } => match (&member.declaring, member.name.as_str()) {
            (Type::Named(t), "PI") if t == "Math" => Ok(Value::Double(std::f64::consts::PI)),
            (Type::Named(t), "E") if t == "Math" => Ok(Value::Double(std::f64::consts::E)),
            (Type::Primitive(Primitive::String), "Empty") => Ok(Value::String(String::new())),
            _ => Err(NotEvaluable(e.to_string())),
        },
        Expr::Unary {
            op, operand, ty, ..
        } => {
            let v = eval(operand)?;
            match op {
                UnaryOp::Not => match v {
                    Value::Bool(b) => Ok(Value::Bool(!b)),
                    Value::Null => Ok(Value::Null),
                    other => match (to_num(&other), ty.primitive()) {
                        (Some(Num::Int(i)), Some(p)) => from_num(Num::Int(!i), p),
                        _ => Err(NotEvaluable(e.to_string())),
                    },
                },
                UnaryOp::Negate => match (to_num(&v), ty.primitive()) {
                    (_, _) if v.is_null() => Ok(Value::Null),
                    (Some(Num::Int(i)), Some(p)) => {
                        from_num(Num::Int(i.checked_neg().ok_or(Overflow)?), p)
                    }
                    (Some(Num::Dec(d)), Some(p)) => from_num(Num::Dec(-d), p),
                    (Some(Num::Float(f)), Some(p)) => from_num(Num::Float(-f), p),
                    _ => Err(NotEvaluable(e.to_string())),
                },
                UnaryOp::Plus => Ok(v),
                UnaryOp::Convert => convert(v, ty),
                UnaryOp::TypeAs => Ok(match (&v.natural_type(), ty) {
                    (_, Type::Object) => v,
                    (Some(t), target) if ty_matches(t, target) => v,
                    _ => Value::Null,
                }),
                UnaryOp::Quote => Err(NotEvaluable(e.to_string())),
            }
        }
        Expr::Binary {
            op, left, right, ty, ..
        } => match op {
            BinaryOp::AndAlso => match eval(left)? {
                Value::Bool(false) => Ok(Value::Bool(false)),
                _ => eval(right),
            },
            BinaryOp::OrElse => match eval(left)? {
                Value::Bool(true) => Ok(Value::Bool(true)),
                _ => eval(right),
            },
            BinaryOp::Coalesce => match eval(left)? {
                Value::Null => eval(right),
                v => Ok(v),
            },
            _ => {
                let (l, r) = (eval(left)?, eval(right)?);
                binary(*op, l, r, ty).map_err(|err| match err {
                    NotEvaluable(_) => NotEvaluable(e.to_string()),
                    other => other,
                })
            }
        },
        Expr::Conditional {
            test,
            if_true,
            if_false,
            ..
        } => match eval(test)? {
            Value::Bool(true) => eval(if_true),
            Value::Bool(false) => eval(if_false),
            _ => Err(NullReference(test.to_string())),
        },
        Expr::TypeIs { operand, target } => {
            let v = eval(operand)?;
            Ok(Value::Bool(match v.natural_type() {
                Some(t) => *target == Type::Object || ty_matches(&t, target),
                None => false,
            }))
        }
        Expr::New { args, members, .. } => {
            let values = eval_all(args)?;
            Ok(Value::Record(members.iter().cloned().zip(values).collect()))
        }
        Expr::MemberInit { bindings, .. } => {
            let mut fields = Vec::with_capacity(bindings.len());
            for b in bindings {
                fields.push((b.member.name.clone(), eval(&b.expr)?));
            }
            Ok(Value::Record(fields))
        }
        Expr::NewArray { items, .. } => Ok(Value::List(eval_all(items)?)),
        Expr::Call {
            object,
            method,
            args,
        } => {
            let target = object.as_ref().map(eval).transpose()?;
            let args = eval_all(args)?;
            call(&method.owner, &method.name, target, &args)
                .unwrap_or_else(|| Err(NotEvaluable(e.to_string())))
        }
        _ => Err(NotEvaluable(e.to_string())),
    }
}

fn ty_matches(actual: &Type, target: &Type) -> bool {
    match (actual, target) {
        (Type::Primitive(a), Type::Nullable(b)) => a == b,
        _ => actual == target,
    }
}

fn binary(op: BinaryOp, l: Value, r: Value, ty: &Type) -> Result<Value, EvaluationError> {
    if op.is_relational() {
        if op == BinaryOp::Equal {
            return Ok(Value::Bool(values_equal(&l, &r)));
        }
        if op == BinaryOp::NotEqual {
            return Ok(Value::Bool(!values_equal(&l, &r)));
        }
        if l.is_null() || r.is_null() {
            return Ok(Value::Bool(false));
        }
        let ord = compare(&l, &r).ok_or_else(|| EvaluationError::InvalidCast {
            from: l.to_string(),
            to: r.to_string(),
        })?;
        use std::cmp::Ordering::*;
        let result = match op {
            BinaryOp::LessThan => ord == Less,
            BinaryOp::LessThanOrEqual => ord != Greater,
            BinaryOp::GreaterThan => ord == Greater,
            _ => ord != Less,
        };
        return Ok(Value::Bool(result));
    }
    if l.is_null() || r.is_null() {
        return Ok(Value::Null);
    }
    match (&l, &r, op) {
        (Value::String(a), Value::String(b), BinaryOp::Add) => {
            return Ok(Value::String(format!("{}{}", a, b)));
        }
        (Value::Bool(a), Value::Bool(b), _) => {
            let v = match op {
                BinaryOp::And => *a & *b,
                BinaryOp::Or => *a | *b,
                BinaryOp::ExclusiveOr => *a ^ *b,
                _ => return Err(EvaluationError::NotEvaluable(format!("{:?}", op))),
            };
            return Ok(Value::Bool(v));
        }
        _ => {}
    }
    match (to_num(&l), to_num(&r), ty.primitive()) {
        (Some(a), Some(b), Some(p)) => from_num(arithmetic(op, a, b)?, p),
        _ => Err(EvaluationError::NotEvaluable(format!("{:?}", op))),
    }
}

/// Methods the interpreter knows. `None` means the method is unknown.
fn call(
    owner: &Owner,
    name: &str,
    target: Option<Value>,
    args: &[Value],
) -> Option<Result<Value, EvaluationError>> {
    let result = match (owner, target, name, args) {
        (Owner::Type(t), Some(s), _, _) if t.is_string() => eval_string_method(name, &s, args)?,
        (Owner::Type(t), None, "Concat", _) if t.is_string() => {
            let mut out = String::new();
            for a in args {
                if !a.is_null() {
                    match a {
                        Value::String(s) => out.push_str(s),
                        other => out.push_str(&other.to_string()),
                    }
                }
            }
            Ok(Value::String(out))
        }
        (Owner::Type(t), None, "Compare", [a, b]) if t.is_string() => {
            Ok(Value::Int32(ordering_to_int(compare(a, b))))
        }
        (Owner::VisualBasic, None, "CompareString", [a, b, ..]) => {
            Ok(Value::Int32(ordering_to_int(compare(a, b))))
        }
        (_, Some(v), "Equals", [other]) => Ok(Value::Bool(values_equal(&v, other))),
        (_, Some(v), "CompareTo", [other]) => Ok(Value::Int32(ordering_to_int(compare(&v, other)))),
        (Owner::Object, None, "Equals" | "ReferenceEquals", [a, b]) => {
            Ok(Value::Bool(values_equal(a, b)))
        }
        (Owner::Math, None, "Round" | "Floor" | "Ceiling", [v]) => math(name, v),
        _ => return None,
    };
    Some(result)
}

fn ordering_to_int(o: Option<std::cmp::Ordering>) -> i32 {
    match o {
        Some(std::cmp::Ordering::Less) => -1,
        Some(std::cmp::Ordering::Greater) => 1,
        _ => 0,
    }
}

fn math(name: &str, v: &Value) -> Result<Value, EvaluationError> {
    match v {
        Value::Decimal(d) => Ok(Value::Decimal(match name {
            "Round" => d.round(),
            "Floor" => d.floor(),
            _ => d.ceil(),
        })),
        Value::Double(f) => Ok(Value::Double(match name {
            "Round" => f.round_ties_even(),
            "Floor" => f.floor(),
            _ => f.ceil(),
        })),
        Value::Null => Ok(Value::Null),
        other => Err(EvaluationError::InvalidCast {
            from: other.to_string(),
            to: "Double".into(),
        }),
    }
}

fn eval_string_method(name: &str, target: &Value, args: &[Value]) -> Option<Result<Value, EvaluationError>> {
    let run = || -> Result<Value, EvaluationError> {
        let s = expect_str(target, name)?;
        Ok(match (name, args) {
            ("Contains", [a]) => Value::Bool(s.contains(expect_str(a, name)?)),
            ("StartsWith", [a]) => Value::Bool(s.starts_with(expect_str(a, name)?)),
            ("EndsWith", [a]) => Value::Bool(s.ends_with(expect_str(a, name)?)),
            ("IndexOf", [a]) => {
                let needle = expect_str(a, name)?;
                let idx = s
                    .find(needle)
                    .map(|b| s[..b].chars().count() as i32)
                    .unwrap_or(-1);
                Value::Int32(idx)
            }
            ("Replace", [a, b]) => {
                Value::String(s.replace(expect_str(a, name)?, expect_str(b, name)?))
            }
            ("Substring", [start]) => {
                let from = char_index(s, expect_int(start)?)?;
                Value::String(s[from..].to_string())
            }
            ("Substring", [start, len]) => {
                let start = expect_int(start)?;
                let from = char_index(s, start)?;
                let to = char_index(s, start + expect_int(len)?)?;
                Value::String(s[from..to].to_string())
            }
            ("ToLower", []) => Value::String(s.to_lowercase()),
            ("ToUpper", []) => Value::String(s.to_uppercase()),
            ("Trim", []) => Value::String(s.trim().to_string()),
            ("Length", []) => Value::Int32(s.chars().count() as i32),
            ("Equals", [a]) => Value::Bool(values_equal(target, a)),
            ("CompareTo", [a]) => Value::Int32(ordering_to_int(compare(target, a))),
            _ => return Err(EvaluationError::NotEvaluable(format!("String.{}", name))),
        })
    };
    Some(run())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::*;
    use std::rc::Rc;

    fn closure(name: &str, value: Value) -> ExprRef {
        let ty = value.natural_type().unwrap();
        let record = Value::Record(vec![(name.to_string(), value)]);
        let holder = Expr::literal(record);
        Expr::property(holder, name, ty)
    }

    #[test]
    fn test_folds_captured_variable() {
        let p = Parameter::new("p", Type::named("Product"));
        let price = Expr::property(Expr::parameter(&p), "Price", Type::int32());
        let limit = Expr::binary(BinaryOp::Add, closure("limit", Value::Int32(8)), Expr::literal(2));
        let body = Expr::binary(BinaryOp::GreaterThan, price.clone(), limit);
        let lambda = Expr::lambda(vec![p.clone()], body);

        let out = partial_eval(&lambda, &Interpreter).unwrap();
        let expected = Expr::lambda(
            vec![p],
            Expr::binary(BinaryOp::GreaterThan, price, Expr::constant(Value::Int32(10), Type::int32())),
        );
        assert_eq!(out, expected);
    }

    #[test]
    fn test_parameter_blocks_ancestors() {
        let p = Parameter::new("p", Type::named("Product"));
        let name = Expr::property(Expr::parameter(&p), "Name", Type::string());
        let upper = Expr::call(Some(name), string_method("ToUpper", vec![], Type::string()), vec![]);
        let lambda = Expr::lambda(vec![p], upper);
        let out = partial_eval(&lambda, &Interpreter).unwrap();
        assert!(Rc::ptr_eq(&out, &lambda));
    }

    #[test]
    fn test_constant_is_untouched() {
        let c = Expr::literal(5);
        let out = partial_eval(&c, &Interpreter).unwrap();
        assert!(Rc::ptr_eq(&out, &c));
    }

    #[test]
    fn test_root_set_is_not_evaluated() {
        let products = Expr::root_set("Products", Type::named("Product"));
        let take = queryable(
            "Take",
            products,
            vec![Expr::binary(BinaryOp::Multiply, Expr::literal(2), Expr::literal(5))],
            Type::query(Type::named("Product")),
        );
        let out = partial_eval(&take, &Interpreter).unwrap();
        match &*out {
            Expr::Call { args, .. } => {
                assert!(matches!(&*args[0], Expr::RootSet { .. }));
                assert_eq!(args[1].as_constant(), Some(&Value::Int32(10)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_evaluation_failure_propagates() {
        let div = Expr::binary(BinaryOp::Divide, Expr::literal(1), Expr::literal(0));
        let p = Parameter::new("p", Type::int32());
        let body = Expr::binary(BinaryOp::Equal, Expr::parameter(&p), div);
        let lambda = Expr::lambda(vec![p], body);
        let err = partial_eval(&lambda, &Interpreter).unwrap_err();
        assert!(matches!(err, crate::error::QueryError::Evaluation(EvaluationError::DivideByZero)));
    }

    #[test]
    fn test_array_retyped_to_runtime_element() {
        let items = vec![
            Expr::convert(Expr::literal(1), Type::Object),
            Expr::convert(Expr::literal(2), Type::Object),
        ];
        let array = Expr::new_array(Type::Object, items);
        let p = Parameter::new("p", Type::int32());
        let wrapper = Expr::lambda(vec![p.clone()], Expr::binary(BinaryOp::Equal, Expr::parameter(&p), Expr::literal(1)));
        let call = Expr::call(
            None,
            Method::new_static(Owner::Enumerable, "Contains", vec![], Type::bool()),
            vec![array, wrapper],
        );
        let out = partial_eval(&call, &Interpreter).unwrap();
        match &*out {
            Expr::Call { args, .. } => {
                assert_eq!(args[0].ty(), Type::collection(Type::int32()));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_string_methods() {
        let e = Expr::call(
            Some(Expr::literal("Hello")),
            string_method("Substring", vec![Type::int32(), Type::int32()], Type::string()),
            vec![Expr::literal(1), Expr::literal(3)],
        );
        assert_eq!(Interpreter.evaluate(&e).unwrap(), Value::String("ell".into()));
    }
}
