//! Constructors for expression nodes.

use std::rc::Rc;

use super::expr::{
    BinaryOp, Binding, Expr, ExprRef, Member, Method, Owner, Parameter, RefId, ResourceId, UnaryOp,
};
use super::types::{Primitive, Type};
use super::value::Value;

impl Expr {
    pub fn constant(value: impl Into<Value>, ty: Type) -> ExprRef {
        Rc::new(Expr::Constant {
            value: value.into(),
            ty,
        })
    }

    /// A constant typed by its own value.
    pub fn literal(value: impl Into<Value>) -> ExprRef {
        let value = value.into();
        let ty = value.natural_type().unwrap_or(Type::Object);
        Rc::new(Expr::Constant { value, ty })
    }

    pub fn null(ty: Type) -> ExprRef {
        Rc::new(Expr::Constant {
            value: Value::Null,
            ty,
        })
    }

    pub fn parameter(p: &Parameter) -> ExprRef {
        Rc::new(Expr::Parameter(p.clone()))
    }

    pub fn lambda(params: Vec<Parameter>, body: ExprRef) -> ExprRef {
        Rc::new(Expr::Lambda { params, body })
    }

    pub fn unary(op: UnaryOp, operand: ExprRef, ty: Type) -> ExprRef {
        Rc::new(Expr::Unary {
            op,
            operand,
            ty,
            method: None,
        })
    }

    pub fn convert(operand: ExprRef, ty: Type) -> ExprRef {
        Self::unary(UnaryOp::Convert, operand, ty)
    }

    pub fn type_as(operand: ExprRef, ty: Type) -> ExprRef {
        Self::unary(UnaryOp::TypeAs, operand, ty)
    }

    pub fn not(operand: ExprRef) -> ExprRef {
        let ty = operand.ty();
        Self::unary(UnaryOp::Not, operand, ty)
    }

    pub fn negate(operand: ExprRef) -> ExprRef {
        let ty = operand.ty();
        Self::unary(UnaryOp::Negate, operand, ty)
    }

    pub fn quote(operand: ExprRef) -> ExprRef {
        let ty = operand.ty();
        Self::unary(UnaryOp::Quote, operand, ty)
    }

    /// A binary node whose result type follows from the operator and operands.
    pub fn binary(op: BinaryOp, left: ExprRef, right: ExprRef) -> ExprRef {
        let ty = binary_result_type(op, &left.ty(), &right.ty());
        Rc::new(Expr::Binary {
            op,
            left,
            right,
            ty,
            lifted_to_null: false,
            method: None,
        })
    }

    /// A binary node carrying the user-defined operator method it came from.
    pub fn binary_with_method(op: BinaryOp, left: ExprRef, right: ExprRef, method: Method) -> ExprRef {
        let ty = if op.is_relational() {
            Type::bool()
        } else {
            method.ret.clone()
        };
        Rc::new(Expr::Binary {
            op,
            left,
            right,
            ty,
            lifted_to_null: false,
            method: Some(method),
        })
    }

    pub fn equal(left: ExprRef, right: ExprRef) -> ExprRef {
        Self::binary(BinaryOp::Equal, left, right)
    }

    pub fn and_also(left: ExprRef, right: ExprRef) -> ExprRef {
        Self::binary(BinaryOp::AndAlso, left, right)
    }

    pub fn and(left: ExprRef, right: ExprRef) -> ExprRef {
        Self::binary(BinaryOp::And, left, right)
    }

    pub fn call(object: Option<ExprRef>, method: Method, args: Vec<ExprRef>) -> ExprRef {
        Rc::new(Expr::Call {
            object,
            method,
            args,
        })
    }

    pub fn member(object: Option<ExprRef>, member: Member) -> ExprRef {
        Rc::new(Expr::Member { object, member })
    }

    /// Property access on an instance; the declaring type is the instance's type.
    pub fn property(object: ExprRef, name: impl Into<String>, ty: Type) -> ExprRef {
        let declaring = object.ty();
        Self::member(Some(object), Member::new(name, declaring, ty))
    }

    pub fn new_object(ty: Type, args: Vec<ExprRef>, members: Vec<String>) -> ExprRef {
        Rc::new(Expr::New { ty, args, members })
    }

    pub fn member_init(ty: Type, bindings: Vec<Binding>) -> ExprRef {
        Rc::new(Expr::MemberInit {
            ty,
            args: Vec::new(),
            bindings,
        })
    }

    pub fn conditional(test: ExprRef, if_true: ExprRef, if_false: ExprRef, ty: Type) -> ExprRef {
        Rc::new(Expr::Conditional {
            test,
            if_true,
            if_false,
            ty,
        })
    }

    pub fn type_is(operand: ExprRef, target: Type) -> ExprRef {
        Rc::new(Expr::TypeIs { operand, target })
    }

    pub fn new_array(element: Type, items: Vec<ExprRef>) -> ExprRef {
        Rc::new(Expr::NewArray { element, items })
    }

    pub fn root_set(name: impl Into<String>, element: Type) -> ExprRef {
        Rc::new(Expr::RootSet {
            name: name.into(),
            element,
        })
    }

    pub fn resource(id: ResourceId, ty: Type) -> ExprRef {
        Rc::new(Expr::Resource { id, ty })
    }

    pub fn input_ref(slot: RefId, ty: Type) -> ExprRef {
        Rc::new(Expr::InputRef { slot, ty })
    }
}

/// Result type of a binary operator applied to operands of the given types.
pub fn binary_result_type(op: BinaryOp, left: &Type, right: &Type) -> Type {
    if op.is_relational() || op.is_logical() {
        return Type::bool();
    }
    match op {
        BinaryOp::Coalesce => match left {
            Type::Nullable(p) if *right == Type::Primitive(*p) => right.clone(),
            _ => left.clone(),
        },
        _ if left.is_nullable() || right.is_nullable() => left.to_nullable(),
        _ => left.clone(),
    }
}

/// A `Queryable` sequence operator over `source`.
pub fn queryable(name: &str, source: ExprRef, rest: Vec<ExprRef>, ret: Type) -> ExprRef {
    let mut args = vec![source];
    args.extend(rest);
    let params = args.iter().map(|a| a.ty()).collect();
    Expr::call(None, Method::new_static(Owner::Queryable, name, params, ret), args)
}

/// An instance method of `String`.
pub fn string_method(name: &str, params: Vec<Type>, ret: Type) -> Method {
    Method::new_instance(
        Owner::Type(Type::Primitive(Primitive::String)),
        name,
        params,
        ret,
    )
}
