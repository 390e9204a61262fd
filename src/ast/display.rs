//! C#-flavored rendering of expressions, used in diagnostics.

use std::fmt;

use super::expr::{BinaryOp, Expr, Owner, UnaryOp};
use super::value::Value;

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Queryable => write!(f, "Queryable"),
            Owner::Enumerable => write!(f, "Enumerable"),
            Owner::DataServiceQuery => write!(f, "DataServiceQuery"),
            Owner::Math => write!(f, "Math"),
            Owner::Object => write!(f, "Object"),
            Owner::VisualBasic => write!(f, "Operators"),
            Owner::Type(t) => write!(f, "{}", t),
        }
    }
}

impl BinaryOp {
    /// The C# operator token.
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::And => "And",
            BinaryOp::AndAlso => "AndAlso",
            BinaryOp::Or => "Or",
            BinaryOp::OrElse => "OrElse",
            BinaryOp::ExclusiveOr => "^",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::LessThan => "<",
            BinaryOp::LessThanOrEqual => "<=",
            BinaryOp::GreaterThan => ">",
            BinaryOp::GreaterThanOrEqual => ">=",
            BinaryOp::Coalesce => "??",
        }
    }
}

fn list(f: &mut fmt::Formatter<'_>, items: &[super::ExprRef]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Constant { value, ty } => match value {
                Value::Null => write!(f, "null"),
                Value::Record(_) => write!(f, "value({})", ty),
                other => write!(f, "{}", other),
            },
            Expr::Parameter(p) => write!(f, "{}", p.name),
            Expr::Lambda { params, body } => {
                if params.len() == 1 {
                    write!(f, "{} => {}", params[0].name, body)
                } else {
                    let names: Vec<&str> = params.iter().map(|p| p.name.as_str()).collect();
                    write!(f, "({}) => {}", names.join(", "), body)
                }
            }
            Expr::Unary { op, operand, ty, .. } => match op {
                UnaryOp::Not => write!(f, "Not({})", operand),
                UnaryOp::Negate => write!(f, "-{}", operand),
                UnaryOp::Plus => write!(f, "+{}", operand),
                UnaryOp::Convert => write!(f, "Convert({})", operand),
                UnaryOp::TypeAs => write!(f, "({} As {})", operand, ty),
                UnaryOp::Quote => write!(f, "{}", operand),
            },
            Expr::Binary {
                op, left, right, ..
            } => write!(f, "({} {} {})", left, op.symbol(), right),
            Expr::Call {
                object,
                method,
                args,
            } => match object {
                Some(o) => {
                    write!(f, "{}.{}(", o, method.name)?;
                    list(f, args)?;
                    write!(f, ")")
                }
                None if method.is_sequence_operator() && !args.is_empty() => {
                    write!(f, "{}.{}(", args[0], method.name)?;
                    list(f, &args[1..])?;
                    write!(f, ")")
                }
                None => {
                    write!(f, "{}.{}(", method.owner, method.name)?;
                    list(f, args)?;
                    write!(f, ")")
                }
            },
            Expr::Member { object, member } => match object {
                Some(o) => write!(f, "{}.{}", o, member.name),
                None => write!(f, "{}.{}", member.declaring, member.name),
            },
            Expr::New { ty, args, members } => {
                write!(f, "new {}(", ty)?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match members.get(i) {
                        Some(m) => write!(f, "{} = {}", m, a)?,
                        None => write!(f, "{}", a)?,
                    }
                }
                write!(f, ")")
            }
            Expr::MemberInit { ty, args, bindings } => {
                write!(f, "new {}(", ty)?;
                list(f, args)?;
                write!(f, ") {{")?;
                for (i, b) in bindings.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} = {}", b.member.name, b.expr)?;
                }
                write!(f, "}}")
            }
            Expr::Conditional {
                test,
                if_true,
                if_false,
                ..
            } => write!(f, "IIF({}, {}, {})", test, if_true, if_false),
            Expr::TypeIs { operand, target } => write!(f, "({} Is {})", operand, target),
            Expr::NewArray { element, items } => {
                write!(f, "new {}[] {{", element)?;
                list(f, items)?;
                write!(f, "}}")
            }
            Expr::Invoke { target, args, .. } => {
                write!(f, "Invoke({}", target)?;
                for a in args {
                    write!(f, ", {}", a)?;
                }
                write!(f, ")")
            }
            Expr::RootSet { name, .. } => write!(f, "{}", name),
            Expr::Resource { id, ty } => write!(f, "resource#{}({})", id.0, ty),
            Expr::InputRef { slot, .. } => write!(f, "it#{}", slot.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::*;

    #[test]
    fn test_display_predicate() {
        let p = Parameter::new("p", Type::named("Product"));
        let price = Expr::property(Expr::parameter(&p), "Price", Type::int32());
        let body = Expr::binary(BinaryOp::GreaterThan, price, Expr::literal(10));
        let lambda = Expr::lambda(vec![p], body);
        assert_eq!(lambda.to_string(), "p => (p.Price > 10)");
    }

    #[test]
    fn test_display_sequence_call() {
        let products = Expr::root_set("Products", Type::named("Product"));
        let call = queryable(
            "Take",
            products,
            vec![Expr::literal(3)],
            Type::query(Type::named("Product")),
        );
        assert_eq!(call.to_string(), "Products.Take(3)");
    }
}
