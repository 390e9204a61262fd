//! Projection analysis: can a selector be expressed as `$select`/`$expand`?
//!
//! A selector over entity members is walked once to check that it only uses
//! forms the protocol can express, and to collect the property paths it
//! reads. Those paths become the resource's projection paths; the entity
//! paths among them become expansions.

pub mod assignment;
pub mod path_box;
pub mod rewriter;

use tracing::trace;

use crate::ast::{Expr, ExprRef, ResourceId, SequenceMethod, Type, UnaryOp, is_sequence_call};
use crate::binder::patterns::{lambda_parts, match_convert_to_assignable, strip};
use crate::error::{QueryError, QueryResult, Unsupported};
use crate::metadata::ClientTypeInfo;
use crate::resource::{Projection, ResourceArena};

use self::assignment::{AssignmentAnalysis, match_null_check};
use self::path_box::PathBox;

/// Whether `e` materializes an in-memory collection (`ToList()`).
pub fn is_collection_producing(e: &ExprRef) -> bool {
    let mut current = e.clone();
    while let Expr::Unary {
        op: UnaryOp::Convert | UnaryOp::TypeAs,
        operand,
        ..
    } = &*current
    {
        let next = operand.clone();
        current = next;
    }
    match &*current {
        Expr::Call { method, .. } => method.is_sequence_operator() && method.name == "ToList",
        _ => false,
    }
}

/// Analyze `lambda` as the projection of `target`.
///
/// Returns `Ok(false)` when the selector is not a projection shape at all, so
/// the caller can treat the call as a residual; returns an error when it is a
/// projection the protocol cannot express.
pub fn analyze(
    types: &dyn ClientTypeInfo,
    arena: &mut ResourceArena,
    lambda: &ExprRef,
    target: ResourceId,
    match_members: bool,
) -> QueryResult<bool> {
    let (_, body) = lambda_parts(lambda);
    match &**body {
        Expr::Constant { ty, .. } => {
            if types.is_entity_type(ty) {
                return Err(Unsupported::ConstantEntity.into());
            }
            arena.node_mut(target).projection = Some(Projection {
                selector: lambda.clone(),
                paths: Vec::new(),
            });
            Ok(true)
        }
        Expr::MemberInit { .. } | Expr::New { .. } => {
            analyze_resource_expression(types, arena, lambda, target)?;
            Ok(true)
        }
        _ if match_members && matches!(&*strip(body), Expr::Member { .. }) => {
            analyze_resource_expression(types, arena, lambda, target)?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

fn analyze_resource_expression(
    types: &dyn ClientTypeInfo,
    arena: &mut ResourceArena,
    lambda: &ExprRef,
    target: ResourceId,
) -> QueryResult<()> {
    let mut pb = PathBox::new();
    Analyzer { types }.analyze_lambda(lambda, &mut pb)?;

    let node = arena.node_mut(target);
    let mut expand = pb.expand_paths();
    for path in node.expand_paths.drain(..) {
        if !expand.contains(&path) {
            expand.push(path);
        }
    }
    node.expand_paths = expand;
    node.projection = Some(Projection {
        selector: lambda.clone(),
        paths: pb.projection_paths(),
    });
    trace!(paths = ?node.projection.as_ref().map(|p| &p.paths), "projection analyzed");
    Ok(())
}

fn projection_error(ty: &Type, e: &ExprRef) -> QueryError {
    Unsupported::Projection {
        ty: ty.to_string(),
        expr: e.to_string(),
    }
    .into()
}

fn entity_error(ty: &Type, e: &ExprRef) -> QueryError {
    Unsupported::ProjectionToEntity {
        ty: ty.to_string(),
        expr: e.to_string(),
    }
    .into()
}

#[derive(Clone, Copy)]
struct Analyzer<'t> {
    types: &'t dyn ClientTypeInfo,
}

impl Analyzer<'_> {
    fn is_entity(&self, ty: &Type) -> bool {
        self.types.element_is_entity(ty)
    }

    fn analyze_lambda(self, lambda: &ExprRef, pb: &mut PathBox) -> QueryResult<()> {
        let (params, body) = lambda_parts(lambda);
        let Some(last) = params.last() else {
            return Err(QueryError::internal(format!("projection selector {} has no parameter", lambda)));
        };
        pb.push_param(last);
        let result = if self.is_entity(&body.ty()) {
            match &**body {
                Expr::MemberInit { .. } => self.analyze_entity_init(body, pb),
                Expr::New { .. } => Err(Unsupported::ConstructKnownEntity.into()),
                Expr::Constant { .. } => Err(Unsupported::ConstantEntity.into()),
                _ => self.analyze_non_entity(body, pb),
            }
        } else {
            self.analyze_non_entity(body, pb)
        };
        pb.pop_param();
        result
    }

    fn analyze_member_init(self, init: &ExprRef, pb: &mut PathBox) -> QueryResult<()> {
        if self.is_entity(&init.ty()) {
            self.analyze_entity_init(init, pb)
        } else {
            self.analyze_non_entity(init, pb)
        }
    }

    fn analyze_entity_init(self, init: &ExprRef, pb: &mut PathBox) -> QueryResult<()> {
        let Expr::MemberInit { ty, bindings, .. } = &**init else {
            return self.analyze_non_entity(init, pb);
        };
        let type_name = ty.to_string();
        let mut previous = None;
        for binding in bindings {
            EntityVisitor {
                cx: self,
                pb: &mut *pb,
                ty,
            }
            .visit(&binding.expr)?;

            let Some(entity) = pb.param_in_scope().cloned() else {
                return Err(QueryError::internal("entity projection outside of a lambda"));
            };
            let analysis = AssignmentAnalysis::analyze(&entity, &binding.expr);
            if let Some(err) = analysis.incompatible() {
                return Err(err.clone().into());
            }
            let target_ty = &binding.member.ty;
            let Some(last) = analysis.beyond_target().last() else {
                return Err(entity_error(target_ty, &binding.expr));
            };
            if let Expr::Member { member, .. } = &**last {
                if member.name != binding.member.name {
                    return Err(Unsupported::PropertyNamesMustMatch {
                        from: member.name.clone(),
                        to: binding.member.name.clone(),
                    }
                    .into());
                }
            }
            analysis.check_compatible(&type_name, &mut previous)?;
            if self.is_entity(&last.ty()) && !self.is_entity(target_ty) {
                return Err(projection_error(target_ty, &binding.expr));
            }
        }
        Ok(())
    }

    fn analyze_non_entity(self, e: &ExprRef, pb: &mut PathBox) -> QueryResult<()> {
        let mut v = NonEntityVisitor { cx: self, pb };
        match &**e {
            Expr::MemberInit { bindings, .. } => {
                for b in bindings {
                    v.visit(&b.expr)?;
                }
                Ok(())
            }
            _ => v.visit(e),
        }
    }

    /// An argument a method call may not receive inside a projection.
    fn is_disallowed_call_argument(self, e: &ExprRef) -> bool {
        if let Expr::Member {
            object: Some(object),
            ..
        } = &**e
        {
            if self.types.is_entity_type(&object.ty()) {
                return false;
            }
        }
        is_collection_producing(e)
    }

    /// `Select` over the result of another `Select` cannot be expanded.
    fn check_chained_sequence(self, call: &ExprRef, ty: &Type) -> QueryResult<()> {
        if let Expr::Call { args, .. } = &**call {
            if is_sequence_call(call, SequenceMethod::Select) {
                let inner = strip(&args[0]);
                if is_sequence_call(&inner, SequenceMethod::Select) {
                    return Err(projection_error(ty, call));
                }
            }
        }
        Ok(())
    }

    fn is_allowed_sequence_call(call: &ExprRef) -> bool {
        is_sequence_call(call, SequenceMethod::Select) || is_sequence_call(call, SequenceMethod::ToList)
    }
}

fn visit_children(e: &ExprRef, mut f: impl FnMut(&ExprRef) -> QueryResult<()>) -> QueryResult<()> {
    for child in e.children() {
        f(&child)?;
    }
    Ok(())
}

/// Checks the right-hand side of a member assignment into an entity type.
struct EntityVisitor<'a, 't> {
    cx: Analyzer<'t>,
    pb: &'a mut PathBox,
    ty: &'a Type,
}

impl EntityVisitor<'_, '_> {
    fn visit(&mut self, e: &ExprRef) -> QueryResult<()> {
        let cx = self.cx;
        match &**e {
            Expr::Unary { operand, .. } => {
                if match_convert_to_assignable(e) {
                    self.visit(operand)
                } else {
                    Err(entity_error(self.ty, e))
                }
            }
            Expr::Conditional { .. } => {
                let check = self.pb.param_in_scope().and_then(|p| match_null_check(p, e));
                match check {
                    Some(check) => self.visit(&check.assigned),
                    None => Err(entity_error(self.ty, e)),
                }
            }
            Expr::Member {
                object: Some(object),
                member,
            } => {
                if !cx.is_entity(&object.ty()) || is_collection_producing(object) {
                    return Err(entity_error(self.ty, e));
                }
                self.visit(object)?;
                self.pb.append_to_path(&member.name, cx.is_entity(&member.ty));
                Ok(())
            }
            Expr::Call { object, args, .. } => {
                if object.iter().chain(args).any(|a| cx.is_disallowed_call_argument(a)) {
                    return Err(entity_error(self.ty, e));
                }
                if Analyzer::is_allowed_sequence_call(e) {
                    cx.check_chained_sequence(e, self.ty)?;
                } else if object.iter().chain(args).any(|a| cx.is_entity(&a.ty())) {
                    return Err(entity_error(self.ty, e));
                }
                visit_children(e, |c| self.visit(c))
            }
            Expr::Lambda { .. } => cx.analyze_lambda(e, self.pb),
            Expr::MemberInit { ty, .. } => {
                if cx.is_entity(ty) {
                    cx.analyze_entity_init(e, self.pb)
                } else {
                    Err(entity_error(self.ty, e))
                }
            }
            Expr::New { .. } => Err(Unsupported::ConstructKnownEntity.into()),
            Expr::Parameter(p) => {
                if self.pb.param_in_scope() != Some(p) {
                    return Err(Unsupported::CanOnlyProjectTheLeaf.into());
                }
                self.pb.start_new_path();
                Ok(())
            }
            _ => Err(entity_error(self.ty, e)),
        }
    }
}

/// Checks a projection into an anonymous or other non-entity type.
struct NonEntityVisitor<'a, 't> {
    cx: Analyzer<'t>,
    pb: &'a mut PathBox,
}

impl NonEntityVisitor<'_, '_> {
    fn visit(&mut self, e: &ExprRef) -> QueryResult<()> {
        let cx = self.cx;
        let ty = e.ty();
        match &**e {
            Expr::Unary { operand, .. } => {
                if !match_convert_to_assignable(e) && cx.is_entity(&operand.ty()) {
                    return Err(projection_error(&ty, e));
                }
                self.visit(operand)
            }
            Expr::Binary { left, right, .. } => {
                let bad = |x: &ExprRef| cx.is_entity(&x.ty()) || is_collection_producing(x);
                if bad(left) || bad(right) {
                    return Err(projection_error(&ty, e));
                }
                self.visit(left)?;
                self.visit(right)
            }
            Expr::TypeIs { operand, .. } => {
                if cx.is_entity(&operand.ty()) || is_collection_producing(operand) {
                    return Err(projection_error(&ty, e));
                }
                self.visit(operand)
            }
            Expr::Conditional {
                test,
                if_true,
                if_false,
                ..
            } => {
                if let Some(check) = self.pb.param_in_scope().and_then(|p| match_null_check(p, e)) {
                    return self.visit(&check.assigned);
                }
                let bad = |x: &ExprRef| cx.is_entity(&x.ty()) || is_collection_producing(x);
                if bad(test) || bad(if_true) || bad(if_false) {
                    return Err(projection_error(&ty, e));
                }
                self.visit(test)?;
                self.visit(if_true)?;
                self.visit(if_false)
            }
            Expr::Member {
                object: Some(object),
                member,
            } => {
                if object.ty().is_nullable() {
                    return self.visit(object);
                }
                if is_collection_producing(object) {
                    return Err(projection_error(&ty, e));
                }
                self.visit(object)?;
                self.pb.append_to_path(&member.name, cx.is_entity(&member.ty));
                Ok(())
            }
            Expr::Call { object, args, .. } => {
                if object.iter().chain(args).any(|a| cx.is_disallowed_call_argument(a)) {
                    return Err(projection_error(&ty, e));
                }
                if Analyzer::is_allowed_sequence_call(e) {
                    cx.check_chained_sequence(e, &ty)?;
                } else if object.iter().chain(args).any(|a| cx.is_entity(&a.ty())) {
                    return Err(projection_error(&ty, e));
                }
                visit_children(e, |c| self.visit(c))
            }
            Expr::Invoke { target, args, .. } => {
                if std::iter::once(target).chain(args).any(|a| cx.is_entity(&a.ty())) {
                    return Err(projection_error(&ty, e));
                }
                visit_children(e, |c| self.visit(c))
            }
            Expr::Lambda { .. } => cx.analyze_lambda(e, self.pb),
            Expr::MemberInit { .. } => cx.analyze_member_init(e, self.pb),
            Expr::New { ty, .. } => {
                if cx.is_entity(ty) {
                    return Err(Unsupported::ConstructKnownEntity.into());
                }
                visit_children(e, |c| self.visit(c))
            }
            Expr::Parameter(p) => {
                if self.pb.param_in_scope() != Some(p) {
                    return Err(projection_error(&ty, e));
                }
                self.pb.start_new_path();
                Ok(())
            }
            Expr::Constant { ty, .. } => {
                if cx.is_entity(ty) {
                    return Err(Unsupported::ConstantEntity.into());
                }
                Ok(())
            }
            _ => visit_children(e, |c| self.visit(c)),
        }
    }
}
