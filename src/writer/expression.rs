//! Scalar and predicate expressions in the protocol's operator syntax.

use crate::ast::{BinaryOp, Expr, ExprRef, ResourceId, Type, UnaryOp};
use crate::error::{QueryResult, Unsupported};
use crate::metadata::ClientTypeInfo;
use crate::resource::ResourceArena;

use super::literal;
use super::methods::Builtins;

fn binary_keyword(op: BinaryOp) -> Option<&'static str> {
    let kw = match op {
        BinaryOp::And | BinaryOp::AndAlso => "and",
        BinaryOp::Or | BinaryOp::OrElse => "or",
        BinaryOp::Equal => "eq",
        BinaryOp::NotEqual => "ne",
        BinaryOp::LessThan => "lt",
        BinaryOp::LessThanOrEqual => "le",
        BinaryOp::GreaterThan => "gt",
        BinaryOp::GreaterThanOrEqual => "ge",
        BinaryOp::Add => "add",
        BinaryOp::Subtract => "sub",
        BinaryOp::Multiply => "mul",
        BinaryOp::Divide => "div",
        BinaryOp::Modulo => "mod",
        BinaryOp::ExclusiveOr | BinaryOp::Coalesce => return None,
    };
    Some(kw)
}

fn cant_translate(e: &ExprRef) -> Unsupported {
    Unsupported::CantTranslate(e.to_string())
}

/// Writes one expression bound against the resource `current`.
///
/// Member accesses on `current`'s back-reference are written bare (`Name`);
/// any other back-reference is rejected.
pub struct ExpressionWriter<'a> {
    arena: &'a ResourceArena,
    types: &'a dyn ClientTypeInfo,
    builtins: &'a Builtins,
    current: ResourceId,
    out: String,
}

impl<'a> ExpressionWriter<'a> {
    pub fn new(
        arena: &'a ResourceArena,
        types: &'a dyn ClientTypeInfo,
        builtins: &'a Builtins,
        current: ResourceId,
    ) -> Self {
        Self {
            arena,
            types,
            builtins,
            current,
            out: String::new(),
        }
    }

    /// Serialize `e` and return its text.
    pub fn write(mut self, e: &ExprRef) -> QueryResult<String> {
        self.visit(e)?;
        Ok(self.out)
    }

    /// Whether `e` is the back-reference to the resource being written.
    fn is_current_input(&self, e: &ExprRef) -> QueryResult<bool> {
        match &**e {
            Expr::InputRef { slot, .. } => {
                if self.arena.resolve(*slot) == self.current {
                    Ok(true)
                } else {
                    Err(Unsupported::OtherResource(e.to_string()).into())
                }
            }
            _ => Ok(false),
        }
    }

    /// Binary and unary operands are always parenthesized.
    fn visit_operand(&mut self, e: &ExprRef) -> QueryResult<()> {
        if matches!(&**e, Expr::Binary { .. } | Expr::Unary { .. }) {
            self.out.push('(');
            self.visit(e)?;
            self.out.push(')');
            Ok(())
        } else {
            self.visit(e)
        }
    }

    /// `name([operand, ]'Type')`, omitting the operand when it is the input.
    fn visit_type_function(&mut self, name: &str, operand: &ExprRef, ty: &Type) -> QueryResult<()> {
        self.out.push_str(name);
        self.out.push('(');
        if !self.is_current_input(operand)? {
            self.visit(operand)?;
            self.out.push_str(", ");
        }
        self.out.push('\'');
        self.out.push_str(&self.types.type_name(ty));
        self.out.push_str("')");
        Ok(())
    }

    fn visit(&mut self, e: &ExprRef) -> QueryResult<()> {
        match &**e {
            Expr::Constant { value, .. } => match literal::uri_literal(value) {
                Some(text) => {
                    self.out.push_str(&text);
                    Ok(())
                }
                None => Err(Unsupported::CantConvertConstant(e.to_string()).into()),
            },
            Expr::Binary { op, left, right, .. } => {
                let Some(keyword) = binary_keyword(*op) else {
                    return Err(cant_translate(e).into());
                };
                self.visit_operand(left)?;
                self.out.push(' ');
                self.out.push_str(keyword);
                self.out.push(' ');
                self.visit_operand(right)
            }
            Expr::Unary { op, operand, ty, .. } => match op {
                UnaryOp::Not => {
                    self.out.push_str("not ");
                    self.visit_operand(operand)
                }
                UnaryOp::Negate => {
                    self.out.push('-');
                    self.visit_operand(operand)
                }
                UnaryOp::Plus => self.visit(operand),
                UnaryOp::Convert | UnaryOp::TypeAs => {
                    let from = operand.ty();
                    let lifting = from.primitive().is_some() && from.primitive() == ty.primitive();
                    if *ty == Type::Object || lifting || ty.is_assignable_from(&from) {
                        self.visit(operand)
                    } else {
                        self.visit_type_function("cast", operand, ty)
                    }
                }
                UnaryOp::Quote => Err(cant_translate(e).into()),
            },
            Expr::TypeIs { operand, target } => self.visit_type_function("isof", operand, target),
            Expr::Member {
                object: Some(object),
                member,
            } => {
                if object.ty().is_nullable() {
                    return match member.name.as_str() {
                        "Value" => self.visit(object),
                        _ => Err(cant_translate(e).into()),
                    };
                }
                if !self.is_current_input(object)? {
                    self.visit(object)?;
                    self.out.push('/');
                }
                self.out.push_str(&member.name);
                Ok(())
            }
            Expr::Call { object, method, args } => {
                let Some(function) = self.builtins.function(method, args.len()) else {
                    return Err(cant_translate(e).into());
                };
                let mut operands: Vec<&ExprRef> = args.iter().collect();
                if let Some(receiver) = object {
                    if function.receiver_last {
                        operands.push(receiver);
                    } else {
                        operands.insert(0, receiver);
                    }
                }
                self.out.push_str(function.name);
                self.out.push('(');
                for (i, operand) in operands.into_iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.visit(operand)?;
                }
                self.out.push(')');
                Ok(())
            }
            _ => Err(cant_translate(e).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Parameter, Primitive, string_method};
    use crate::metadata::Model;
    use pretty_assertions::assert_eq;

    struct Fixture {
        arena: ResourceArena,
        id: ResourceId,
        model: Model,
        builtins: Builtins,
    }

    fn fixture() -> Fixture {
        let mut arena = ResourceArena::new();
        let id = arena.new_root("Products", Type::named("Product"));
        let model = Model::new("Shop").entity("Product", &["Id"], &[("Id", "Int32"), ("Name", "String")]);
        Fixture {
            arena,
            id,
            model,
            builtins: Builtins::new(),
        }
    }

    fn write(f: &Fixture, e: &ExprRef) -> QueryResult<String> {
        ExpressionWriter::new(&f.arena, &f.model, &f.builtins, f.id).write(e)
    }

    #[test]
    fn test_contains_swaps_operands() {
        let mut f = fixture();
        let it = f.arena.input_ref(f.id);
        let name = Expr::property(it, "Name", Type::string());
        let call = Expr::call(
            Some(name),
            string_method("Contains", vec![Type::string()], Type::bool()),
            vec![Expr::literal("a")],
        );
        assert_eq!(write(&f, &call).unwrap(), "substringof('a', Name)");
    }

    #[test]
    fn test_operands_parenthesized() {
        let mut f = fixture();
        let it = f.arena.input_ref(f.id);
        let id = Expr::property(it.clone(), "Id", Type::int32());
        let gt = Expr::binary(BinaryOp::GreaterThan, id.clone(), Expr::literal(1));
        let lt = Expr::binary(BinaryOp::LessThan, id, Expr::literal(9));
        let both = Expr::and_also(gt, Expr::not(lt));
        assert_eq!(write(&f, &both).unwrap(), "(Id gt 1) and (not (Id lt 9))");
    }

    #[test]
    fn test_cast_omits_input() {
        let mut f = fixture();
        let it = f.arena.input_ref(f.id);
        let is = Expr::type_is(it.clone(), Type::named("Special"));
        assert_eq!(write(&f, &is).unwrap(), "isof('Shop.Special')");
        let id = Expr::property(it, "Id", Type::int32());
        let widened = Expr::convert(id, Type::Primitive(Primitive::Double));
        assert_eq!(write(&f, &widened).unwrap(), "cast(Id, 'Edm.Double')");
    }

    #[test]
    fn test_conditional_not_translatable() {
        let f = fixture();
        let cond = Expr::conditional(Expr::literal(true), Expr::literal(1), Expr::literal(2), Type::int32());
        let err = write(&f, &cond).unwrap_err();
        assert!(matches!(err.as_unsupported(), Some(Unsupported::CantTranslate(_))));
    }

    #[test]
    fn test_other_resource_rejected() {
        let mut f = fixture();
        let other = f.arena.new_root("Categories", Type::named("Category"));
        let it = f.arena.input_ref(other);
        let name = Expr::property(it, "Name", Type::string());
        let err = write(&f, &name).unwrap_err();
        assert!(matches!(err.as_unsupported(), Some(Unsupported::OtherResource(_))));
    }

    #[test]
    fn test_bare_parameter_rejected() {
        let f = fixture();
        let p = Parameter::new("p", Type::named("Product"));
        assert!(write(&f, &Expr::parameter(&p)).is_err());
    }
}
