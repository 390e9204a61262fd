//! Resource binding.
//!
//! Walks the normalized expression bottom-up and folds recognized sequence
//! operators into [`ResourceNode`](crate::resource::ResourceNode)s: `Where`
//! becomes a key predicate or filter, `Select` a navigation or projection,
//! `OrderBy`/`Skip`/`Take` sequence options and so on. Anything it cannot
//! fold stays in the tree as a residual call, and a residual at the top is
//! reported as unsupported.

pub mod input;
pub mod patterns;
pub mod rules;
mod sequence;

use tracing::debug;

use crate::ast::{Expr, ExprRef, Method, Owner, ResourceId, Rewriter, SequenceMethod, Type, rewrite_children};
use crate::error::{QueryResult, Unsupported};
use crate::metadata::ClientTypeInfo;
use crate::resource::{CountOption, ResourceArena};
use crate::writer::methods::Builtins;

use self::patterns::{lambda_parts, match_string_addition, strip};
use self::rules::as_resource;

/// The bound form of a query: its resource nodes and the leaf.
#[derive(Debug, Clone)]
pub struct BoundQuery {
    pub arena: ResourceArena,
    pub root: ResourceId,
}

/// Bind a normalized query expression to resource nodes.
pub fn bind(expr: &ExprRef, types: &dyn ClientTypeInfo, builtins: &Builtins) -> QueryResult<BoundQuery> {
    let mut binder = ResourceBinder {
        types,
        builtins,
        arena: ResourceArena::new(),
    };
    let bound = binder.rewrite(expr)?;
    let Some(root) = as_resource(&bound) else {
        return Err(Unsupported::UnsupportedExpression(bound.to_string()).into());
    };
    binder.verify_key_predicates(root)?;
    binder.verify_not_select_many_projection(root)?;
    debug!(resources = binder.arena.len(), "bound query");
    Ok(BoundQuery {
        arena: binder.arena,
        root,
    })
}

pub(crate) struct ResourceBinder<'a> {
    types: &'a dyn ClientTypeInfo,
    builtins: &'a Builtins,
    arena: ResourceArena,
}

impl Rewriter for ResourceBinder<'_> {
    fn rewrite(&mut self, e: &ExprRef) -> QueryResult<ExprRef> {
        match &**e {
            Expr::RootSet { name, element } => {
                let id = self.arena.new_root(name.clone(), element.clone());
                Ok(self.arena.expr(id))
            }
            Expr::Call { method, args, .. } => match SequenceMethod::identify(method, args) {
                Some(which) => self.visit_sequence_call(e, which),
                None if method.owner == Owner::DataServiceQuery => {
                    let call = rewrite_children(self, e)?;
                    self.visit_query_method(&call)
                }
                None => rewrite_children(self, e),
            },
            Expr::Binary { .. } => {
                let visited = rewrite_children(self, e)?;
                match match_string_addition(&visited) {
                    Some((left, right)) => Ok(string_concat(left.clone(), right.clone())),
                    None => Ok(visited),
                }
            }
            Expr::Member { .. } => {
                let visited = rewrite_children(self, e)?;
                Ok(self.property_as_method(&visited))
            }
            _ => rewrite_children(self, e),
        }
    }
}

fn string_concat(left: ExprRef, right: ExprRef) -> ExprRef {
    let method = Method::new_static(
        Owner::Type(Type::string()),
        "Concat",
        vec![Type::string(), Type::string()],
        Type::string(),
    );
    Expr::call(None, method, vec![left, right])
}

/// The text of a constant argument to `Expand`/`AddQueryOption`.
fn constant_text(e: &ExprRef) -> QueryResult<String> {
    match strip(e).as_constant() {
        Some(crate::ast::Value::String(s)) => Ok(s.clone()),
        Some(crate::ast::Value::Null) | None => Err(Unsupported::UnsupportedExpression(e.to_string()).into()),
        Some(other) => Ok(other.to_string()),
    }
}

impl ResourceBinder<'_> {
    /// Properties the protocol exposes as functions (`length`, `year`, ...)
    /// become calls so the writer can treat them uniformly.
    fn property_as_method(&self, e: &ExprRef) -> ExprRef {
        match &**e {
            Expr::Member {
                object: Some(object),
                member,
            } if self.builtins.is_property_as_method(&object.ty(), &member.name) => {
                let method = Method::new_instance(Owner::Type(object.ty()), member.name.clone(), vec![], member.ty.clone());
                Expr::call(Some(object.clone()), method, vec![])
            }
            _ => e.clone(),
        }
    }

    /// `Convert(resource, DataServiceQuery<T>)` around the target of an
    /// instance method.
    fn strip_convert(&mut self, e: &ExprRef) -> QueryResult<ExprRef> {
        if let Expr::Unary {
            op: crate::ast::UnaryOp::Convert,
            operand,
            ty: ty @ Type::Query(_),
            ..
        } = &**e
        {
            if let Some(id) = as_resource(operand) {
                let clone = self.arena.clone_with_new_type(id, ty.clone())?;
                return Ok(self.arena.expr(clone));
            }
        }
        Ok(e.clone())
    }

    fn visit_query_method(&mut self, call: &ExprRef) -> QueryResult<ExprRef> {
        let Expr::Call {
            object: Some(object),
            method,
            args,
        } = &**call
        else {
            return Err(Unsupported::MethodNotSupported(call.to_string()).into());
        };
        match (method.name.as_str(), args.len()) {
            ("Expand", 1) | ("AddQueryOption", 2) | ("IncludeTotalCount", 0) => {}
            _ => return Err(Unsupported::MethodNotSupported(call.to_string()).into()),
        }
        let target = self.strip_convert(object)?;
        let Some(id) = as_resource(&target) else {
            return Ok(call.clone());
        };
        match method.name.as_str() {
            "Expand" => {
                rules::require_can_expand(&self.arena, &target)?;
                let path = constant_text(&args[0])?;
                self.arena.node_mut(id).add_expand_path(path);
            }
            "AddQueryOption" => {
                rules::require_can_add_custom_option(&target)?;
                let name = constant_text(&args[0])?;
                let value = constant_text(&args[1])?;
                if name.trim() == "$expand" {
                    rules::require_can_expand(&self.arena, &target)?;
                    self.arena.node_mut(id).add_expand_path(value);
                } else {
                    rules::require_legal_custom_option(&self.arena, id, &name)?;
                    self.arena.node_mut(id).custom_options.push((name, value));
                }
            }
            _ => {
                rules::require_can_add_count(&self.arena, &target)?;
                rules::require_non_singleton(&self.arena, &target)?;
                self.arena.node_mut(id).count = CountOption::InlineAll;
            }
        }
        Ok(self.arena.expr(id))
    }

    /// Every set navigated through must be narrowed to one resource by a key.
    fn verify_key_predicates(&self, id: ResourceId) -> QueryResult<()> {
        if self.is_missing_key_predicates(id) {
            return Err(Unsupported::NavigateWithoutKey.into());
        }
        Ok(())
    }

    fn is_missing_key_predicates(&self, id: ResourceId) -> bool {
        let Some(source) = self.arena.node(id).source else {
            return false;
        };
        if self.is_missing_key_predicates(source) {
            return true;
        }
        let source = self.arena.node(source);
        source.is_set() && !source.has_key_predicate()
    }

    /// A join record or a projection over a nested `SelectMany` cannot reach
    /// the wire.
    fn verify_not_select_many_projection(&self, id: ResourceId) -> QueryResult<()> {
        let node = self.arena.node(id);
        if !node.is_set() {
            return Ok(());
        }
        match &node.projection {
            Some(projection) => {
                let (_, body) = lambda_parts(&projection.selector);
                let body = strip(body);
                if let Expr::Call { method, args, .. } = &*body {
                    if matches!(
                        SequenceMethod::identify(method, args),
                        Some(SequenceMethod::SelectMany | SequenceMethod::SelectManyResultSelector)
                    ) {
                        return Err(Unsupported::UnsupportedExpression(body.to_string()).into());
                    }
                }
            }
            None if node.transparent_scope.is_some() => {
                return Err(Unsupported::UnsupportedExpression(self.arena.describe(id).trim_end().to_string()).into());
            }
            None => {}
        }
        Ok(())
    }
}
