//! Expression graph nodes.
//!
//! Nodes are immutable and shared through [`ExprRef`]. Rewrites never mutate a
//! node in place: they build a new node and thread it upward, so identity
//! (`Rc::ptr_eq`) can be used to tell whether a rewrite changed anything.

use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::types::Type;
use super::value::Value;

/// Shared handle to an expression node.
pub type ExprRef = Rc<Expr>;

/// Index of a resource node in the binder's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub usize);

/// Index of a back-reference slot in the binder's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefId(pub usize);

/// Identity of a node, for side tables keyed by reference rather than by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeKey(usize);

impl NodeKey {
    pub fn of(e: &ExprRef) -> Self {
        NodeKey(Rc::as_ptr(e) as usize)
    }
}

static NEXT_PARAMETER: AtomicUsize = AtomicUsize::new(1);

/// A lambda parameter. Two parameters are the same only if their ids match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Parameter {
    pub id: usize,
    pub name: String,
    pub ty: Type,
}

impl Parameter {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            id: NEXT_PARAMETER.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            ty,
        }
    }
}

/// Who declares a method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Owner {
    /// `System.Linq.Queryable` extension methods.
    Queryable,
    /// `System.Linq.Enumerable` extension methods.
    Enumerable,
    /// Instance methods of the client query type (`Expand`, `AddQueryOption`, ...).
    DataServiceQuery,
    Math,
    Object,
    /// VB compiler helpers (`CompareString`).
    VisualBasic,
    /// Instance or static methods of a concrete type.
    Type(Type),
}

/// A method reference: enough signature to identify and type a call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Method {
    pub owner: Owner,
    pub name: String,
    pub params: Vec<Type>,
    pub ret: Type,
    pub is_static: bool,
}

impl Method {
    pub fn new_static(owner: Owner, name: impl Into<String>, params: Vec<Type>, ret: Type) -> Self {
        Self {
            owner,
            name: name.into(),
            params,
            ret,
            is_static: true,
        }
    }

    pub fn new_instance(owner: Owner, name: impl Into<String>, params: Vec<Type>, ret: Type) -> Self {
        Self {
            owner,
            name: name.into(),
            params,
            ret,
            is_static: false,
        }
    }

    pub fn is_sequence_operator(&self) -> bool {
        matches!(self.owner, Owner::Queryable | Owner::Enumerable)
    }
}

/// A property or field reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Member {
    pub name: String,
    pub declaring: Type,
    pub ty: Type,
}

impl Member {
    pub fn new(name: impl Into<String>, declaring: Type, ty: Type) -> Self {
        Self {
            name: name.into(),
            declaring,
            ty,
        }
    }
}

/// A member assignment inside a member-init expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub member: Member,
    pub expr: ExprRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Negate,
    Plus,
    Convert,
    TypeAs,
    Quote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    And,
    AndAlso,
    Or,
    OrElse,
    ExclusiveOr,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Coalesce,
}

impl BinaryOp {
    pub fn is_relational(&self) -> bool {
        matches!(
            self,
            BinaryOp::Equal
                | BinaryOp::NotEqual
                | BinaryOp::LessThan
                | BinaryOp::LessThanOrEqual
                | BinaryOp::GreaterThan
                | BinaryOp::GreaterThanOrEqual
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::AndAlso | BinaryOp::OrElse)
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Modulo
        )
    }
}

/// An expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Constant {
        value: Value,
        ty: Type,
    },
    Parameter(Parameter),
    Lambda {
        params: Vec<Parameter>,
        body: ExprRef,
    },
    Unary {
        op: UnaryOp,
        operand: ExprRef,
        ty: Type,
        method: Option<Method>,
    },
    Binary {
        op: BinaryOp,
        left: ExprRef,
        right: ExprRef,
        ty: Type,
        lifted_to_null: bool,
        method: Option<Method>,
    },
    Call {
        object: Option<ExprRef>,
        method: Method,
        args: Vec<ExprRef>,
    },
    Member {
        object: Option<ExprRef>,
        member: Member,
    },
    /// Constructor call. `members` names the properties the arguments
    /// initialize (anonymous types); it is empty for plain constructors.
    New {
        ty: Type,
        args: Vec<ExprRef>,
        members: Vec<String>,
    },
    MemberInit {
        ty: Type,
        args: Vec<ExprRef>,
        bindings: Vec<Binding>,
    },
    Conditional {
        test: ExprRef,
        if_true: ExprRef,
        if_false: ExprRef,
        ty: Type,
    },
    TypeIs {
        operand: ExprRef,
        target: Type,
    },
    NewArray {
        element: Type,
        items: Vec<ExprRef>,
    },
    Invoke {
        target: ExprRef,
        args: Vec<ExprRef>,
        ty: Type,
    },
    /// Unbound root collection of the remote service.
    RootSet {
        name: String,
        element: Type,
    },
    /// A bound resource node.
    Resource {
        id: ResourceId,
        ty: Type,
    },
    /// A resource node's back-reference, used inside bound lambdas.
    InputRef {
        slot: RefId,
        ty: Type,
    },
}

impl Expr {
    /// Static type of the node.
    pub fn ty(&self) -> Type {
        match self {
            Expr::Constant { ty, .. } => ty.clone(),
            Expr::Parameter(p) => p.ty.clone(),
            Expr::Lambda { params, body } => Type::Function(
                params.iter().map(|p| p.ty.clone()).collect(),
                Box::new(body.ty()),
            ),
            Expr::Unary { ty, .. } | Expr::Binary { ty, .. } => ty.clone(),
            Expr::Call { method, .. } => method.ret.clone(),
            Expr::Member { member, .. } => member.ty.clone(),
            Expr::New { ty, .. } | Expr::MemberInit { ty, .. } => ty.clone(),
            Expr::Conditional { ty, .. } => ty.clone(),
            Expr::TypeIs { .. } => Type::bool(),
            Expr::NewArray { element, .. } => Type::collection(element.clone()),
            Expr::Invoke { ty, .. } => ty.clone(),
            Expr::RootSet { element, .. } => Type::query(element.clone()),
            Expr::Resource { ty, .. } | Expr::InputRef { ty, .. } => ty.clone(),
        }
    }

    /// Short node-kind name for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Expr::Constant { .. } => "Constant",
            Expr::Parameter(_) => "Parameter",
            Expr::Lambda { .. } => "Lambda",
            Expr::Unary { .. } => "Unary",
            Expr::Binary { .. } => "Binary",
            Expr::Call { .. } => "MethodCall",
            Expr::Member { .. } => "MemberAccess",
            Expr::New { .. } => "New",
            Expr::MemberInit { .. } => "MemberInit",
            Expr::Conditional { .. } => "Conditional",
            Expr::TypeIs { .. } => "TypeIs",
            Expr::NewArray { .. } => "NewArray",
            Expr::Invoke { .. } => "Invoke",
            Expr::RootSet { .. } => "RootSet",
            Expr::Resource { .. } => "Resource",
            Expr::InputRef { .. } => "InputReference",
        }
    }

    /// Child expressions, in evaluation order.
    pub fn children(&self) -> Vec<ExprRef> {
        match self {
            Expr::Constant { .. }
            | Expr::Parameter(_)
            | Expr::RootSet { .. }
            | Expr::Resource { .. }
            | Expr::InputRef { .. } => Vec::new(),
            Expr::Lambda { body, .. } => vec![body.clone()],
            Expr::Unary { operand, .. } => vec![operand.clone()],
            Expr::Binary { left, right, .. } => vec![left.clone(), right.clone()],
            Expr::Call { object, args, .. } => object.iter().chain(args.iter()).cloned().collect(),
            Expr::Member { object, .. } => object.iter().cloned().collect(),
            Expr::New { args, .. } => args.clone(),
            Expr::MemberInit { args, bindings, .. } => args
                .iter()
                .cloned()
                .chain(bindings.iter().map(|b| b.expr.clone()))
                .collect(),
            Expr::Conditional {
                test,
                if_true,
                if_false,
                ..
            } => vec![test.clone(), if_true.clone(), if_false.clone()],
            Expr::TypeIs { operand, .. } => vec![operand.clone()],
            Expr::NewArray { items, .. } => items.clone(),
            Expr::Invoke { target, args, .. } => std::iter::once(target.clone())
                .chain(args.iter().cloned())
                .collect(),
        }
    }

    /// Rebuild this node with every child passed through `f`.
    ///
    /// Returns `Ok(None)` when `f` handed back every child unchanged, so the
    /// caller can keep the original node and its identity.
    pub fn try_map_children<E>(
        &self,
        mut f: impl FnMut(&ExprRef) -> Result<ExprRef, E>,
    ) -> Result<Option<Expr>, E> {
        let mut changed = false;
        let mut map = |c: &ExprRef| -> Result<ExprRef, E> {
            let n = f(c)?;
            if !Rc::ptr_eq(&n, c) {
                changed = true;
            }
            Ok(n)
        };
        let rebuilt = match self {
            Expr::Constant { .. }
            | Expr::Parameter(_)
            | Expr::RootSet { .. }
            | Expr::Resource { .. }
            | Expr::InputRef { .. } => return Ok(None),
            Expr::Lambda { params, body } => Expr::Lambda {
                params: params.clone(),
                body: map(body)?,
            },
            Expr::Unary {
                op,
                operand,
                ty,
                method,
            } => Expr::Unary {
                op: *op,
                operand: map(operand)?,
                ty: ty.clone(),
                method: method.clone(),
            },
            Expr::Binary {
                op,
                left,
                right,
                ty,
                lifted_to_null,
                method,
            } => Expr::Binary {
                op: *op,
                left: map(left)?,
                right: map(right)?,
                ty: ty.clone(),
                lifted_to_null: *lifted_to_null,
                method: method.clone(),
            },
            Expr::Call {
                object,
                method,
                args,
            } => Expr::Call {
                object: object.as_ref().map(&mut map).transpose()?,
                method: method.clone(),
                args: args.iter().map(&mut map).collect::<Result<_, _>>()?,
            },
            Expr::Member { object, member } => Expr::Member {
                object: object.as_ref().map(&mut map).transpose()?,
                member: member.clone(),
            },
            Expr::New { ty, args, members } => Expr::New {
                ty: ty.clone(),
                args: args.iter().map(&mut map).collect::<Result<_, _>>()?,
                members: members.clone(),
            },
            Expr::MemberInit { ty, args, bindings } => Expr::MemberInit {
                ty: ty.clone(),
                args: args.iter().map(&mut map).collect::<Result<_, _>>()?,
                bindings: bindings
                    .iter()
                    .map(|b| {
                        Ok::<_, E>(Binding {
                            member: b.member.clone(),
                            expr: map(&b.expr)?,
                        })
                    })
                    .collect::<Result<_, _>>()?,
            },
            Expr::Conditional {
                test,
                if_true,
                if_false,
                ty,
            } => Expr::Conditional {
                test: map(test)?,
                if_true: map(if_true)?,
                if_false: map(if_false)?,
                ty: ty.clone(),
            },
            Expr::TypeIs { operand, target } => Expr::TypeIs {
                operand: map(operand)?,
                target: target.clone(),
            },
            Expr::NewArray { element, items } => Expr::NewArray {
                element: element.clone(),
                items: items.iter().map(&mut map).collect::<Result<_, _>>()?,
            },
            Expr::Invoke { target, args, ty } => Expr::Invoke {
                target: map(target)?,
                args: args.iter().map(&mut map).collect::<Result<_, _>>()?,
                ty: ty.clone(),
            },
        };
        Ok(if changed { Some(rebuilt) } else { None })
    }

    pub fn as_constant(&self) -> Option<&Value> {
        match self {
            Expr::Constant { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn as_lambda(&self) -> Option<(&[Parameter], &ExprRef)> {
        match self {
            Expr::Lambda { params, body } => Some((params, body)),
            _ => None,
        }
    }

    pub fn is_parameter(&self, p: &Parameter) -> bool {
        matches!(self, Expr::Parameter(q) if q == p)
    }

    pub fn is_null_constant(&self) -> bool {
        matches!(self, Expr::Constant { value: Value::Null, .. })
    }
}
