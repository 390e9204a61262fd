//! Rebinding lambda parameters to resource back-references.

use std::rc::Rc;

use crate::ast::{Expr, ExprRef, Member, Parameter, ResourceId};
use crate::resource::ResourceArena;

/// Result of binding a lambda body against a resource.
#[derive(Debug, Clone)]
pub struct Bound {
    pub expr: ExprRef,
    /// Distinct resources the body refers to, in first-use order.
    pub referenced: Vec<ResourceId>,
}

/// Replace `param` in `body` by a reference to `input`.
///
/// When `input` carries a transparent scope, member chains rooted at the
/// parameter are resolved through the scope's accessors instead, so that
/// `t.o.Amount` becomes `Amount` on the resource `o` stands for.
pub fn bind(arena: &mut ResourceArena, body: &ExprRef, input: ResourceId, param: &Parameter) -> Bound {
    let mut binder = InputBinder {
        arena,
        input,
        param,
        referenced: Vec::new(),
    };
    let expr = binder.visit(body);
    Bound {
        expr,
        referenced: binder.referenced,
    }
}

struct InputBinder<'a, 'p> {
    arena: &'a mut ResourceArena,
    input: ResourceId,
    param: &'p Parameter,
    referenced: Vec<ResourceId>,
}

impl InputBinder<'_, '_> {
    fn has_scope(&self) -> bool {
        self.arena.node(self.input).transparent_scope.is_some()
    }

    fn reference(&mut self, id: ResourceId) -> ExprRef {
        if !self.referenced.contains(&id) {
            self.referenced.push(id);
        }
        self.arena.input_ref(id)
    }

    fn visit(&mut self, e: &ExprRef) -> ExprRef {
        match &**e {
            Expr::Parameter(p) if p == self.param && !self.has_scope() => self.reference(self.input),
            Expr::Member { .. } if self.has_scope() => self.visit_scoped_member(e),
            _ => {
                let mapped: Result<Option<Expr>, std::convert::Infallible> =
                    e.try_map_children(|c| Ok(self.visit(c)));
                match mapped {
                    Ok(Some(rebuilt)) => Rc::new(rebuilt),
                    _ => e.clone(),
                }
            }
        }
    }

    fn visit_scoped_member(&mut self, e: &ExprRef) -> ExprRef {
        // Outermost member first after the reverse below.
        let mut chain: Vec<Member> = Vec::new();
        let mut root = e.clone();
        while let Expr::Member {
            object: Some(object),
            member,
        } = &*root
        {
            chain.push(member.clone());
            root = object.clone();
        }
        if !root.is_parameter(self.param) || chain.is_empty() {
            return e.clone();
        }
        chain.reverse();

        let mut target = self.input;
        let mut scoped = Some(self.input);
        let mut traversed = false;
        let mut consumed = 0;
        while consumed < chain.len() {
            let Some(set) = scoped else { break };
            let Some(scope) = self.arena.node(set).transparent_scope.clone() else {
                break;
            };
            let name = &chain[consumed].name;
            if *name == scope.accessor {
                target = set;
                consumed += 1;
                traversed = true;
                continue;
            }
            let Some(source) = scope.source_accessor(name) else {
                break;
            };
            traversed = true;
            consumed += 1;
            match &**source {
                Expr::InputRef { slot, .. } => {
                    let resolved = self.arena.resolve(*slot);
                    target = resolved;
                    scoped = Some(resolved);
                }
                Expr::Resource { id, .. } => {
                    let node = self.arena.node(*id);
                    if node.is_set() && node.transparent_scope.is_some() {
                        scoped = Some(*id);
                    } else {
                        target = *id;
                        scoped = None;
                    }
                }
                _ => scoped = None,
            }
        }
        if !traversed {
            return e.clone();
        }

        let mut out = self.reference(target);
        for member in &chain[consumed..] {
            out = Expr::member(Some(out), member.clone());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, Type};
    use crate::resource::{ResourceKind, TransparentScope};

    #[test]
    fn test_parameter_becomes_reference() {
        let mut arena = ResourceArena::new();
        let id = arena.new_root("Products", Type::named("Product"));
        let p = Parameter::new("p", Type::named("Product"));
        let body = Expr::binary(
            BinaryOp::GreaterThan,
            Expr::property(Expr::parameter(&p), "Price", Type::int32()),
            Expr::literal(10),
        );
        let bound = bind(&mut arena, &body, id, &p);
        assert_eq!(bound.referenced, vec![id]);
        let Expr::Binary { left, .. } = &*bound.expr else { panic!("not binary") };
        let Expr::Member { object: Some(object), .. } = &**left else { panic!("not member") };
        assert!(matches!(&**object, Expr::InputRef { .. }));
    }

    #[test]
    fn test_untouched_body_references_nothing() {
        let mut arena = ResourceArena::new();
        let id = arena.new_root("Products", Type::named("Product"));
        let p = Parameter::new("p", Type::named("Product"));
        let body = Expr::literal(true);
        let bound = bind(&mut arena, &body, id, &p);
        assert!(bound.referenced.is_empty());
        assert!(Rc::ptr_eq(&bound.expr, &body));
    }

    #[test]
    fn test_transparent_scope_resolves_accessors() {
        let mut arena = ResourceArena::new();
        let customers = arena.new_root("Customers", Type::named("Customer"));
        let c = Parameter::new("c", Type::named("Customer"));
        let nav = Expr::property(Expr::parameter(&c), "Orders", Type::collection(Type::named("Order")));
        let orders = arena.new_navigation(
            ResourceKind::NavigationSet,
            Type::query(Type::named("Order")),
            customers,
            nav,
            Type::named("Order"),
        );
        let customer_ref = arena.input_ref(customers);
        arena.node_mut(orders).transparent_scope = Some(TransparentScope {
            accessor: "o".into(),
            source_accessors: vec![("c".into(), customer_ref)],
        });

        let record = Type::named("<>join");
        let t = Parameter::new("t", record.clone());
        let o = Expr::property(Expr::parameter(&t), "o", Type::named("Order"));
        let amount = Expr::property(o, "Amount", Type::int32());
        let bound = bind(&mut arena, &amount, orders, &t);
        assert_eq!(bound.referenced, vec![orders]);

        let cc = Expr::property(Expr::parameter(&t), "c", Type::named("Customer"));
        let name = Expr::property(cc, "Name", Type::string());
        let bound = bind(&mut arena, &name, orders, &t);
        assert_eq!(bound.referenced, vec![customers]);
        let Expr::Member { object: Some(object), member } = &*bound.expr else { panic!("not member") };
        assert_eq!(member.name, "Name");
        assert!(matches!(&**object, Expr::InputRef { .. }));
    }
}
