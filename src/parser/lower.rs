//! Typing of parsed queries against a [`Model`].
//!
//! Names resolve to lambda parameters, then entity sets; members resolve
//! through the model. Mixed numeric operands are promoted C#-style by
//! inserting conversions, which partial evaluation later folds.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use tracing::trace;
use uuid::Uuid;

use crate::ast::{
    BinaryOp, Binding, Expr, ExprRef, Field, Member, Method, Owner, Parameter, Primitive, Type, Value,
};
use crate::error::{QueryError, QueryResult};
use crate::metadata::{ClientTypeInfo, Model};

use super::syntax::{BinaryOperator, Literal, Syntax, TypeName, UnaryOperator};

/// Caller-supplied values referenced as `$name`.
pub type Variables = BTreeMap<String, Value>;

/// Lower a parsed query to a typed expression.
pub fn lower(syntax: &Syntax, model: &Model, variables: &Variables) -> QueryResult<ExprRef> {
    Lowerer::new(model, variables).lower(syntax)
}

fn type_error(message: impl Into<String>) -> QueryError {
    QueryError::type_error(message)
}

/// Convert `e` to `ty` when both are primitive; retype a bare `null`.
fn coerce(e: ExprRef, ty: &Type) -> ExprRef {
    if e.ty() == *ty {
        e
    } else if e.is_null_constant() {
        Expr::null(ty.clone())
    } else if e.ty().primitive().is_some() && ty.primitive().is_some() {
        Expr::convert(e, ty.clone())
    } else {
        e
    }
}

/// Bring two operands to a common type.
fn promote(left: ExprRef, right: ExprRef) -> (ExprRef, ExprRef) {
    let (lt, rt) = (left.ty(), right.ty());
    if left.is_null_constant() && lt == Type::Object {
        let ty = rt.to_nullable();
        return (Expr::null(ty.clone()), coerce(right, &ty));
    }
    if right.is_null_constant() && rt == Type::Object {
        let ty = lt.to_nullable();
        return (coerce(left, &ty), Expr::null(ty));
    }
    let (Some(lp), Some(rp)) = (lt.primitive(), rt.primitive()) else {
        return (left, right);
    };
    let target = if lp.widens_to(rp) {
        rp
    } else if rp.widens_to(lp) {
        lp
    } else {
        return (left, right);
    };
    let mut ty = Type::Primitive(target);
    if lt.is_nullable() || rt.is_nullable() {
        ty = ty.to_nullable();
    }
    (coerce(left, &ty), coerce(right, &ty))
}

fn is_bool(ty: &Type) -> bool {
    ty.primitive() == Some(Primitive::Bool)
}

fn is_numeric(ty: &Type) -> bool {
    ty.primitive().is_some_and(|p| p.is_numeric())
}

fn body_type(lambda: &ExprRef) -> Type {
    lambda
        .as_lambda()
        .map(|(_, body)| body.ty())
        .unwrap_or(Type::Object)
}

fn binary_op(op: BinaryOperator) -> BinaryOp {
    match op {
        BinaryOperator::Or => BinaryOp::OrElse,
        BinaryOperator::And => BinaryOp::AndAlso,
        BinaryOperator::Eq => BinaryOp::Equal,
        BinaryOperator::Ne => BinaryOp::NotEqual,
        BinaryOperator::Lt => BinaryOp::LessThan,
        BinaryOperator::Le => BinaryOp::LessThanOrEqual,
        BinaryOperator::Gt => BinaryOp::GreaterThan,
        BinaryOperator::Ge => BinaryOp::GreaterThanOrEqual,
        BinaryOperator::Add => BinaryOp::Add,
        BinaryOperator::Sub => BinaryOp::Subtract,
        BinaryOperator::Mul => BinaryOp::Multiply,
        BinaryOperator::Div => BinaryOp::Divide,
        BinaryOperator::Mod => BinaryOp::Modulo,
        BinaryOperator::Coalesce => BinaryOp::Coalesce,
    }
}

fn parse_datetime(text: &str) -> QueryResult<NaiveDateTime> {
    const FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S%.f"];
    FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(text, f).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| type_error(format!("invalid datetime '{}'", text)))
}

struct Lowerer<'a> {
    model: &'a Model,
    variables: &'a Variables,
    /// Record constant holding every variable, as a captured closure would.
    closure: Option<ExprRef>,
    scopes: Vec<Parameter>,
}

impl<'a> Lowerer<'a> {
    fn new(model: &'a Model, variables: &'a Variables) -> Self {
        let closure = (!variables.is_empty()).then(|| {
            let fields = variables
                .iter()
                .map(|(n, v)| Field::new(n.clone(), v.natural_type().unwrap_or(Type::Object)))
                .collect();
            let record = variables.iter().map(|(n, v)| (n.clone(), v.clone())).collect();
            Expr::constant(Value::Record(record), Type::Anonymous(fields))
        });
        Self {
            model,
            variables,
            closure,
            scopes: Vec::new(),
        }
    }

    fn lower_all(&mut self, items: &[Syntax]) -> QueryResult<Vec<ExprRef>> {
        items.iter().map(|s| self.lower(s)).collect()
    }

    fn lower(&mut self, syntax: &Syntax) -> QueryResult<ExprRef> {
        match syntax {
            Syntax::Literal(lit) => self.literal(lit),
            Syntax::Name(name) => self.name(name),
            Syntax::Variable(name) => self.variable(name),
            Syntax::Member { target, name } => self.member(target, name),
            Syntax::Call {
                target,
                name,
                generics,
                args,
            } => self.call(target, name, generics, args),
            Syntax::Lambda { .. } => Err(type_error("a lambda is only allowed as an operator argument")),
            Syntax::Anonymous(members) => self.anonymous(members),
            Syntax::MemberInit { ty, bindings } => self.member_init(ty, bindings),
            Syntax::Unary { op, operand } => {
                let operand = self.lower(operand)?;
                match op {
                    UnaryOperator::Not if is_bool(&operand.ty()) => Ok(Expr::not(operand)),
                    UnaryOperator::Neg if is_numeric(&operand.ty()) => Ok(Expr::negate(operand)),
                    _ => Err(type_error(format!("invalid operand for {:?}: {}", op, operand))),
                }
            }
            Syntax::Binary { op, left, right } => self.binary(*op, left, right),
            Syntax::Conditional {
                test,
                if_true,
                if_false,
            } => {
                let test = self.lower(test)?;
                if !is_bool(&test.ty()) {
                    return Err(type_error(format!("condition is not boolean: {}", test)));
                }
                let (t, f) = promote(self.lower(if_true)?, self.lower(if_false)?);
                let ty = t.ty();
                Ok(Expr::conditional(test, t, f, ty))
            }
            Syntax::Is { operand, ty } => {
                let ty = self.resolve_type(ty)?;
                Ok(Expr::type_is(self.lower(operand)?, ty))
            }
            Syntax::As { operand, ty } => {
                let ty = self.resolve_type(ty)?;
                Ok(Expr::type_as(self.lower(operand)?, ty))
            }
            Syntax::Cast { ty, operand } => {
                let ty = self.resolve_type(ty)?;
                Ok(Expr::convert(self.lower(operand)?, ty))
            }
        }
    }

    fn resolve_type(&self, t: &TypeName) -> QueryResult<Type> {
        let base = match t.name.as_str() {
            "object" | "Object" => Type::Object,
            name => match Primitive::from_name(name) {
                Some(p) => Type::Primitive(p),
                None if self.model.types.contains_key(name) => Type::named(name),
                None => return Err(type_error(format!("unknown type '{}'", name))),
            },
        };
        Ok(if t.nullable { base.to_nullable() } else { base })
    }

    fn literal(&self, lit: &Literal) -> QueryResult<ExprRef> {
        let value = match lit {
            Literal::Int(n) => match i32::try_from(*n) {
                Ok(v) => Value::Int32(v),
                Err(_) => Value::Int64(*n),
            },
            Literal::Long(n) => Value::Int64(*n),
            Literal::Decimal(d) => Value::Decimal(*d),
            Literal::Double(f) => Value::Double(*f),
            Literal::Single(f) => Value::Single(*f),
            Literal::Str(s) => Value::String(s.clone()),
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Null => return Ok(Expr::null(Type::Object)),
            Literal::DateTime(text) => Value::DateTime(parse_datetime(text)?),
            Literal::Guid(text) => Value::Guid(
                Uuid::parse_str(text).map_err(|e| type_error(format!("invalid guid '{}': {}", text, e)))?,
            ),
        };
        Ok(Expr::literal(value))
    }

    fn name(&self, name: &str) -> QueryResult<ExprRef> {
        if let Some(p) = self.scopes.iter().rev().find(|p| p.name == name) {
            return Ok(Expr::parameter(p));
        }
        match self.model.entity_set_type(name) {
            Some(element) => Ok(Expr::root_set(name, element)),
            None => Err(type_error(format!("unknown name '{}'", name))),
        }
    }

    fn variable(&self, name: &str) -> QueryResult<ExprRef> {
        let (Some(closure), Some(value)) = (&self.closure, self.variables.get(name)) else {
            return Err(type_error(format!("undefined variable ${}", name)));
        };
        let ty = value.natural_type().unwrap_or(Type::Object);
        Ok(Expr::property(closure.clone(), name, ty))
    }

    /// `string`, `Math` and `object` when not shadowed.
    fn static_owner<'s>(&self, target: &'s Syntax) -> Option<&'s str> {
        match target {
            Syntax::Name(n)
                if matches!(n.as_str(), "string" | "String" | "Math" | "object" | "Object")
                    && !self.scopes.iter().any(|p| &p.name == n)
                    && self.model.entity_set_type(n).is_none() =>
            {
                Some(n.as_str())
            }
            _ => None,
        }
    }

    fn member_type(&self, ty: &Type, name: &str) -> Option<Type> {
        if let Some(t) = self.model.property_type(ty, name) {
            return Some(t);
        }
        match (ty, name) {
            (Type::Nullable(p), "Value") => Some(Type::Primitive(*p)),
            (Type::Nullable(_), "HasValue") => Some(Type::bool()),
            (Type::Primitive(Primitive::String), "Length") => Some(Type::int32()),
            (Type::Primitive(Primitive::DateTime), "Year" | "Month" | "Day" | "Hour" | "Minute" | "Second") => {
                Some(Type::int32())
            }
            (Type::Collection(_), "Count") => Some(Type::int32()),
            _ => None,
        }
    }

    fn member(&mut self, target: &Syntax, name: &str) -> QueryResult<ExprRef> {
        if let Some(owner) = self.static_owner(target) {
            let (declaring, ty) = match (owner, name) {
                ("Math", "PI" | "E") => (Type::named("Math"), Type::Primitive(Primitive::Double)),
                ("string" | "String", "Empty") => (Type::string(), Type::string()),
                _ => return Err(type_error(format!("unknown member {}.{}", owner, name))),
            };
            return Ok(Expr::member(None, Member::new(name, declaring, ty)));
        }
        let object = self.lower(target)?;
        let ty = object.ty();
        match self.member_type(&ty, name) {
            Some(member_ty) => Ok(Expr::property(object, name, member_ty)),
            None => Err(type_error(format!("type {} has no member '{}'", ty, name))),
        }
    }

    fn call(&mut self, target: &Syntax, name: &str, generics: &[TypeName], args: &[Syntax]) -> QueryResult<ExprRef> {
        if let Some(owner) = self.static_owner(target) {
            return self.static_call(owner, name, args);
        }
        let object = self.lower(target)?;
        if object.ty().is_sequence() {
            self.sequence_call(object, name, generics, args)
        } else {
            self.instance_call(object, name, args)
        }
    }

    fn static_call(&mut self, owner: &str, name: &str, args: &[Syntax]) -> QueryResult<ExprRef> {
        let mut args = self.lower_all(args)?;
        let (owner, ret) = match (owner, name, args.len()) {
            ("string" | "String", "Compare", 2 | 3) => (Owner::Type(Type::string()), Type::int32()),
            ("string" | "String", "Concat", n) if n >= 2 => (Owner::Type(Type::string()), Type::string()),
            ("string" | "String", "IsNullOrEmpty", 1) => (Owner::Type(Type::string()), Type::bool()),
            ("object" | "Object", "Equals" | "ReferenceEquals", 2) => (Owner::Object, Type::bool()),
            ("Math", "Round" | "Floor" | "Ceiling", 1) => {
                let ty = match args[0].ty().primitive() {
                    Some(Primitive::Decimal) => Type::Primitive(Primitive::Decimal),
                    _ => Type::Primitive(Primitive::Double),
                };
                args[0] = coerce(args[0].clone(), &ty);
                (Owner::Math, ty)
            }
            _ => return Err(type_error(format!("unknown method {}.{}/{}", owner, name, args.len()))),
        };
        let params = args.iter().map(|a| a.ty()).collect();
        Ok(Expr::call(None, Method::new_static(owner, name, params, ret), args))
    }

    fn instance_call(&mut self, object: ExprRef, name: &str, args: &[Syntax]) -> QueryResult<ExprRef> {
        let ty = object.ty();
        let args = self.lower_all(args)?;
        let string = ty.is_string();
        let ret = match (name, args.len()) {
            ("Equals", 1) => Type::bool(),
            ("CompareTo", 1) => Type::int32(),
            ("ToString", 0) => Type::string(),
            ("Contains" | "StartsWith" | "EndsWith", 1) if string => Type::bool(),
            ("IndexOf", 1) if string => Type::int32(),
            ("Substring", 1 | 2) | ("Replace", 2) | ("ToLower" | "ToUpper" | "Trim", 0) if string => Type::string(),
            _ => return Err(type_error(format!("type {} has no method {}/{}", ty, name, args.len()))),
        };
        let params = args.iter().map(|a| a.ty()).collect();
        Ok(Expr::call(Some(object), Method::new_instance(Owner::Type(ty), name, params, ret), args))
    }

    fn lambda(&mut self, syntax: &Syntax, param_types: &[Type]) -> QueryResult<ExprRef> {
        let Syntax::Lambda { params, body } = syntax else {
            return Err(type_error(format!("expected a lambda taking {} argument(s)", param_types.len())));
        };
        if params.len() != param_types.len() {
            return Err(type_error(format!(
                "lambda takes {} argument(s), expected {}",
                params.len(),
                param_types.len()
            )));
        }
        let params: Vec<Parameter> = params
            .iter()
            .zip(param_types)
            .map(|(n, t)| Parameter::new(n.clone(), t.clone()))
            .collect();
        let depth = self.scopes.len();
        self.scopes.extend(params.iter().cloned());
        let body = self.lower(body);
        self.scopes.truncate(depth);
        Ok(Expr::lambda(params, body?))
    }

    fn predicate(&mut self, syntax: &Syntax, element: &Type) -> QueryResult<ExprRef> {
        let lambda = self.lambda(syntax, std::slice::from_ref(element))?;
        if !is_bool(&body_type(&lambda)) {
            return Err(type_error(format!("predicate is not boolean: {}", lambda)));
        }
        Ok(lambda)
    }

    fn sequence_call(
        &mut self,
        source: ExprRef,
        name: &str,
        generics: &[TypeName],
        args: &[Syntax],
    ) -> QueryResult<ExprRef> {
        let source_ty = source.ty();
        let element = source_ty.element_or_self().clone();
        let remote = matches!(source_ty, Type::Query(_));

        if remote && matches!(name, "Expand" | "AddQueryOption" | "IncludeTotalCount") {
            let args = self.lower_all(args)?;
            let params = args.iter().map(|a| a.ty()).collect();
            let method = Method::new_instance(Owner::DataServiceQuery, name, params, source_ty);
            return Ok(Expr::call(Some(source), method, args));
        }

        let sequence = |t: Type| if remote { Type::query(t) } else { Type::collection(t) };
        let (rest, ret) = match (name, args.len()) {
            ("Where" | "TakeWhile" | "SkipWhile", 1) => (vec![self.predicate(&args[0], &element)?], source_ty),
            ("OrderBy" | "OrderByDescending" | "ThenBy" | "ThenByDescending", 1) => {
                (vec![self.lambda(&args[0], std::slice::from_ref(&element))?], source_ty)
            }
            ("Skip" | "Take", 1) => {
                let count = self.lower(&args[0])?;
                if !count.ty().primitive().is_some_and(|p| p.is_integral()) {
                    return Err(type_error(format!("{} needs an integer, got {}", name, count)));
                }
                (vec![coerce(count, &Type::int32())], source_ty)
            }
            ("Select", 1) => {
                let selector = self.lambda(&args[0], std::slice::from_ref(&element))?;
                let ret = sequence(body_type(&selector));
                (vec![selector], ret)
            }
            ("SelectMany", 1 | 2) => {
                let collection = self.lambda(&args[0], std::slice::from_ref(&element))?;
                let Some(inner) = body_type(&collection).element_type().cloned() else {
                    return Err(type_error(format!("SelectMany selector is not a sequence: {}", collection)));
                };
                if args.len() == 1 {
                    (vec![collection], sequence(inner))
                } else {
                    let result = self.lambda(&args[1], &[element, inner])?;
                    let ret = sequence(body_type(&result));
                    (vec![collection, result], ret)
                }
            }
            ("Cast" | "OfType", 0) => {
                let [target] = generics else {
                    return Err(type_error(format!("{} needs one type argument", name)));
                };
                (vec![], sequence(self.resolve_type(target)?))
            }
            ("Count", 0) => (vec![], Type::int32()),
            ("LongCount", 0) => (vec![], Type::int64()),
            ("Count", 1) => (vec![self.predicate(&args[0], &element)?], Type::int32()),
            ("LongCount", 1) => (vec![self.predicate(&args[0], &element)?], Type::int64()),
            ("First" | "FirstOrDefault" | "Single" | "SingleOrDefault" | "Last" | "LastOrDefault", 0) => {
                (vec![], element)
            }
            ("First" | "FirstOrDefault" | "Single" | "SingleOrDefault" | "Last" | "LastOrDefault", 1) => {
                (vec![self.predicate(&args[0], &element)?], element)
            }
            ("Any", 0) => (vec![], Type::bool()),
            ("Any" | "All", 1) => (vec![self.predicate(&args[0], &element)?], Type::bool()),
            ("Contains", 1) => (vec![coerce(self.lower(&args[0])?, &element)], Type::bool()),
            ("ToList", 0) => (vec![], Type::collection(element)),
            _ => {
                return Err(type_error(format!(
                    "unknown sequence operator {}/{}",
                    name,
                    args.len()
                )));
            }
        };

        let (owner, rest) = if remote {
            let quoted = rest
                .into_iter()
                .map(|a| if a.as_lambda().is_some() { Expr::quote(a) } else { a })
                .collect::<Vec<_>>();
            (Owner::Queryable, quoted)
        } else {
            (Owner::Enumerable, rest)
        };
        trace!(operator = name, remote, "lowered sequence operator");
        let mut all = vec![source];
        all.extend(rest);
        let params = all.iter().map(|a| a.ty()).collect();
        Ok(Expr::call(None, Method::new_static(owner, name, params, ret), all))
    }

    fn binary(&mut self, op: BinaryOperator, left: &Syntax, right: &Syntax) -> QueryResult<ExprRef> {
        let left = self.lower(left)?;
        let right = self.lower(right)?;
        let op = binary_op(op);
        match op {
            BinaryOp::AndAlso | BinaryOp::OrElse => {
                if !is_bool(&left.ty()) || !is_bool(&right.ty()) {
                    return Err(type_error(format!("{:?} needs boolean operands: {} and {}", op, left, right)));
                }
                Ok(Expr::binary(op, left, right))
            }
            BinaryOp::Add if left.ty().is_string() || right.ty().is_string() => {
                let text = Type::string();
                Ok(Expr::binary(op, coerce(left, &text), coerce(right, &text)))
            }
            BinaryOp::Coalesce => {
                if !left.ty().accepts_null() {
                    return Err(type_error(format!("left operand of ?? cannot be null: {}", left)));
                }
                let right = match left.ty() {
                    Type::Nullable(p) => coerce(right, &Type::Primitive(p)),
                    ty => coerce(right, &ty),
                };
                Ok(Expr::binary(op, left, right))
            }
            _ => {
                let (left, right) = promote(left, right);
                if op.is_arithmetic() && (!is_numeric(&left.ty()) || !is_numeric(&right.ty())) {
                    return Err(type_error(format!("{:?} needs numeric operands: {} and {}", op, left, right)));
                }
                Ok(Expr::binary(op, left, right))
            }
        }
    }

    fn anonymous(&mut self, members: &[(Option<String>, Syntax)]) -> QueryResult<ExprRef> {
        let mut fields = Vec::with_capacity(members.len());
        let mut args = Vec::with_capacity(members.len());
        let mut names = Vec::with_capacity(members.len());
        for (name, syntax) in members {
            let name = match (name, syntax) {
                (Some(n), _) => n.clone(),
                (None, Syntax::Member { name, .. }) | (None, Syntax::Name(name)) => name.clone(),
                (None, other) => {
                    return Err(type_error(format!("anonymous member needs a name: {:?}", other)));
                }
            };
            let value = self.lower(syntax)?;
            fields.push(Field::new(name.clone(), value.ty()));
            names.push(name);
            args.push(value);
        }
        Ok(Expr::new_object(Type::Anonymous(fields), args, names))
    }

    fn member_init(&mut self, ty: &TypeName, bindings: &[(String, Syntax)]) -> QueryResult<ExprRef> {
        let ty = self.resolve_type(ty)?;
        if !matches!(ty, Type::Named(_)) {
            return Err(type_error(format!("cannot initialize members of {}", ty)));
        }
        let mut out = Vec::with_capacity(bindings.len());
        for (name, syntax) in bindings {
            let Some(member_ty) = self.model.property_type(&ty, name) else {
                return Err(type_error(format!("type {} has no member '{}'", ty, name)));
            };
            let expr = coerce(self.lower(syntax)?, &member_ty);
            out.push(Binding {
                member: Member::new(name.clone(), ty.clone(), member_ty),
                expr,
            });
        }
        Ok(Expr::member_init(ty, out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::UnaryOp;
    use crate::parser::syntax::parse;
    use pretty_assertions::assert_eq;

    fn model() -> Model {
        Model::new("Shop")
            .entity_set("Products", "Product")
            .entity(
                "Product",
                &["Id"],
                &[("Id", "Int32"), ("Name", "String"), ("Price", "Decimal"), ("Stock", "Int32?")],
            )
    }

    fn lower_text(text: &str, vars: &Variables) -> QueryResult<ExprRef> {
        lower(&parse(text)?, &model(), vars)
    }

    #[test]
    fn test_where_is_quoted_queryable() {
        let e = lower_text("Products.Where(p => p.Name == 'x')", &Variables::new()).unwrap();
        let Expr::Call { method, args, .. } = &*e else {
            panic!("expected call");
        };
        assert_eq!(method.owner, Owner::Queryable);
        assert_eq!(e.ty(), Type::query(Type::named("Product")));
        assert!(matches!(&*args[1], Expr::Unary { op: UnaryOp::Quote, .. }));
    }

    #[test]
    fn test_numeric_promotion() {
        let e = lower_text("Products.Select(p => p.Price > 10)", &Variables::new()).unwrap();
        let text = e.to_string();
        assert!(text.contains("Convert"), "{}", text);
        assert_eq!(e.ty(), Type::query(Type::bool()));
    }

    #[test]
    fn test_nullable_lifting() {
        let e = lower_text("Products.Where(p => p.Stock == 3)", &Variables::new()).unwrap();
        let Expr::Call { args, .. } = &*e else {
            panic!("expected call");
        };
        let Expr::Unary { operand, .. } = &*args[1] else {
            panic!("expected quote");
        };
        let (_, body) = operand.as_lambda().unwrap();
        let Expr::Binary { right, .. } = &**body else {
            panic!("expected comparison");
        };
        assert_eq!(right.ty(), Type::Nullable(Primitive::Int32));
    }

    #[test]
    fn test_variables_become_closure_members() {
        let mut vars = Variables::new();
        vars.insert("min".to_string(), Value::Int32(5));
        let e = lower_text("Products.Where(p => p.Id > $min)", &vars).unwrap();
        assert!(crate::ast::any_node(&e, &mut |n: &Expr| matches!(
            n,
            Expr::Member { object: Some(o), member } if member.name == "min" && o.as_constant().is_some()
        )));
        assert!(lower_text("Products.Where(p => p.Id > $max)", &vars).is_err());
    }

    #[test]
    fn test_type_errors() {
        let vars = Variables::new();
        assert!(matches!(lower_text("Products.Where(p => p.Missing == 1)", &vars), Err(QueryError::Type(_))));
        assert!(matches!(lower_text("Products.Where(p => p.Id)", &vars), Err(QueryError::Type(_))));
        assert!(matches!(lower_text("Orders", &vars), Err(QueryError::Type(_))));
        assert!(matches!(lower_text("Products.Take('a')", &vars), Err(QueryError::Type(_))));
    }

    #[test]
    fn test_select_many_result_selector() {
        let m = Model::new("Shop")
            .entity_set("Customers", "Customer")
            .entity("Customer", &["Id"], &[("Id", "Int32"), ("Orders", "Collection(Order)")])
            .entity("Order", &["Id"], &[("Id", "Int32"), ("Amount", "Int32")]);
        let syntax = parse("Customers.SelectMany(c => c.Orders, (c, o) => new { c, o })").unwrap();
        let e = lower(&syntax, &m, &Variables::new()).unwrap();
        let Type::Query(element) = e.ty() else {
            panic!("expected query");
        };
        assert_eq!(element.field("o").map(|f| f.ty.clone()), Some(Type::named("Order")));
    }
}
