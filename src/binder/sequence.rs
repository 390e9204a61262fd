//! Folding individual sequence operators into resource nodes.

use tracing::trace;

use super::ResourceBinder;
use super::input;
use super::patterns::{
    conjuncts, lambda_parts, match_double_argument_lambda, match_identity_projection_result_selector,
    match_identity_selector, match_key_comparison, match_lambda, match_member_init_with_default_constructor,
    match_new, match_parameter_member_access, match_property_projection_set, match_property_projection_singleton,
    match_single_argument_lambda, match_transparent_identity_selector, match_transparent_scope_selector,
    strip, strip_cast_method_calls,
};
use super::rules::{self, as_resource};
use crate::ast::{Expr, ExprRef, ResourceId, Rewriter, SequenceMethod, Type, mentions, rewrite_children};
use crate::error::{QueryError, QueryResult, Unsupported};
use crate::projection::{self, rewriter};
use crate::resource::{CountOption, KeyValue, OrderKey, QueryOption, ResourceKind};

fn call_parts(call: &ExprRef) -> QueryResult<(&crate::ast::Method, &[ExprRef])> {
    match &**call {
        Expr::Call { method, args, .. } => Ok((method, args)),
        _ => Err(QueryError::internal(format!("expected a method call, found {}", call))),
    }
}

impl ResourceBinder<'_> {
    pub(super) fn visit_sequence_call(&mut self, e: &ExprRef, which: SequenceMethod) -> QueryResult<ExprRef> {
        let call = match which {
            SequenceMethod::Select | SequenceMethod::SelectManyResultSelector => {
                let (method, args) = call_parts(e)?;
                let source = self.rewrite(&args[0])?;
                let checkpoint = self.arena.clone();
                if let Some(projected) = self.analyze_projection(which, e, &source, args)? {
                    return Ok(projected);
                }
                self.arena = checkpoint;
                let mut bound = vec![source];
                for arg in &args[1..] {
                    bound.push(self.rewrite(arg)?);
                }
                Expr::call(None, method.clone(), bound)
            }
            _ => rewrite_children(self, e)?,
        };

        let (_, args) = call_parts(&call)?;
        use SequenceMethod::*;
        match which {
            Where => self.analyze_predicate(&call, args),
            Select => self.analyze_navigation(&call, args),
            SelectMany | SelectManyResultSelector => self.analyze_select_many(&call, args),
            Take => self.analyze_paging(&call, args, QueryOption::Take),
            Skip => self.analyze_paging(&call, args, QueryOption::Skip),
            OrderBy => self.analyze_ordering(&call, args, false, false),
            ThenBy => self.analyze_ordering(&call, args, false, true),
            OrderByDescending => self.analyze_ordering(&call, args, true, false),
            ThenByDescending => self.analyze_ordering(&call, args, true, true),
            First | FirstOrDefault => self.limit_cardinality(&call, args, 1),
            Single | SingleOrDefault => self.limit_cardinality(&call, args, 2),
            Cast => self.analyze_cast(&call, args),
            Count | LongCount => self.analyze_count(&call, args),
            _ => Err(Unsupported::MethodNotSupported(call.to_string()).into()),
        }
    }

    /// A set as first argument and a one-parameter lambda as second.
    fn set_method_arguments(&self, args: &[ExprRef]) -> Option<(ResourceId, ExprRef)> {
        let id = as_resource(args.first()?)?;
        if !self.arena.node(id).is_set() {
            return None;
        }
        let lambda = match_single_argument_lambda(args.get(1)?)?;
        Some((id, lambda))
    }

    /// Bind the lambda body against `input`, failing if it reads any other resource.
    fn bind_to_input(&mut self, input: ResourceId, lambda: &ExprRef) -> Option<ExprRef> {
        let (params, body) = lambda_parts(lambda);
        let bound = input::bind(&mut self.arena, body, input, params.first()?);
        match bound.referenced.as_slice() {
            [] => Some(bound.expr),
            [only] if *only == input => Some(bound.expr),
            _ => None,
        }
    }

    fn analyze_predicate(&mut self, call: &ExprRef, args: &[ExprRef]) -> QueryResult<ExprRef> {
        let Some((input, lambda)) = self.set_method_arguments(args) else {
            rules::require_non_singleton(&self.arena, &args[0])?;
            return Ok(call.clone());
        };
        let (params, body) = lambda_parts(&lambda);
        let param = params[0].clone();

        let mut by_target: Vec<(ResourceId, Vec<ExprRef>)> = Vec::new();
        for conjunct in conjuncts(body) {
            let bound = input::bind(&mut self.arena, &conjunct, input, &param);
            let target = match bound.referenced.as_slice() {
                [] => input,
                [only] => *only,
                _ => return Ok(call.clone()),
            };
            if !self.arena.node(target).is_set() {
                return Ok(call.clone());
            }
            match by_target.iter_mut().find(|(t, _)| *t == target) {
                Some((_, clauses)) => clauses.push(bound.expr),
                None => by_target.push((target, vec![bound.expr])),
            }
        }

        let own = by_target
            .iter()
            .position(|(t, _)| *t == input)
            .map(|i| by_target.remove(i).1);

        for (target, mut clauses) in by_target {
            match self.extract_key_predicate(target, &mut clauses)? {
                Some(key) if clauses.is_empty() => self.arena.node_mut(target).set_key_predicate(key)?,
                _ => return Ok(call.clone()),
            }
        }

        if let Some(mut clauses) = own {
            if let Some(key) = self.extract_key_predicate(input, &mut clauses)? {
                if self.arena.node(input).has_sequence_options() {
                    clauses.push(self.key_filter(input, &key));
                } else {
                    trace!(resource = input.0, "key predicate");
                    self.arena.node_mut(input).set_key_predicate(key)?;
                }
            }
            if !clauses.is_empty() {
                if self.arena.node(input).has_key_predicate() {
                    let key = std::mem::take(&mut self.arena.node_mut(input).key_predicate);
                    clauses.push(self.key_filter(input, &key));
                }
                let mut clauses = clauses.into_iter();
                let mut filter = match self.arena.node(input).filter() {
                    Some(existing) => existing.clone(),
                    None => match clauses.next() {
                        Some(first) => first,
                        None => return Ok(self.arena.expr(input)),
                    },
                };
                for clause in clauses {
                    filter = Expr::and(filter, clause);
                }
                let target = self.arena.expr(input);
                rules::add_sequence_option(&mut self.arena, &target, QueryOption::Filter(filter))?;
            }
        }
        Ok(self.arena.expr(input))
    }

    /// Pull `key == constant` clauses for every key property of `target` out
    /// of `clauses`. Leaves `clauses` untouched unless the full key matched.
    fn extract_key_predicate(&self, target: ResourceId, clauses: &mut Vec<ExprRef>) -> QueryResult<Option<Vec<KeyValue>>> {
        let mut key: Vec<KeyValue> = Vec::new();
        let mut rest = Vec::new();
        for clause in clauses.iter() {
            match match_key_comparison(self.types, &self.arena, clause, target) {
                Some(kv) => {
                    if key.iter().any(|k| k.property.name == kv.property.name) {
                        return Err(Unsupported::OneKeyPredicate.into());
                    }
                    key.push(kv);
                }
                None => rest.push(clause.clone()),
            }
        }
        let key_properties = self.types.key_properties(&self.arena.node(target).resource_type);
        let complete = !key.is_empty()
            && key.len() == key_properties.len()
            && key_properties.iter().all(|name| key.iter().any(|k| &k.property.name == name));
        if !complete {
            return Ok(None);
        }
        *clauses = rest;
        Ok(Some(key))
    }

    /// A key predicate rewritten as an equality filter.
    fn key_filter(&mut self, target: ResourceId, key: &[KeyValue]) -> ExprRef {
        let reference = self.arena.input_ref(target);
        let mut filter: Option<ExprRef> = None;
        for kv in key {
            let eq = Expr::equal(Expr::member(Some(reference.clone()), kv.property.clone()), kv.value.clone());
            filter = Some(match filter {
                Some(f) => Expr::and(f, eq),
                None => eq,
            });
        }
        filter.unwrap_or_else(|| Expr::literal(true))
    }

    fn analyze_navigation(&mut self, call: &ExprRef, args: &[ExprRef]) -> QueryResult<ExprRef> {
        let input = &args[0];
        let Some(lambda) = match_single_argument_lambda(&args[1]) else {
            return Ok(call.clone());
        };
        if match_identity_selector(&lambda) {
            return Ok(input.clone());
        }
        if match_transparent_identity_selector(&self.arena, input, &lambda) {
            if let Some(id) = as_resource(input) {
                let copy = self.arena.remove_transparent_scope(id, call.ty())?;
                return Ok(self.arena.expr(copy));
            }
        }
        rules::require_can_navigate(&self.arena, input)?;
        let Some(source) = as_resource(input) else {
            return Ok(call.clone());
        };
        let Some(bound) = self.bind_to_input(source, &lambda) else {
            return Ok(call.clone());
        };
        let Some(member) = match_property_projection_singleton(&self.arena, source, &bound) else {
            return Ok(call.clone());
        };
        let resource_type = member.ty();
        let id = self
            .arena
            .navigate(ResourceKind::NavigationSingleton, call.ty(), source, member, resource_type);
        trace!(resource = id.0, "navigated to singleton");
        Ok(self.arena.expr(id))
    }

    /// A navigation set over a collection-valued property of `source`.
    fn navigation_set(&mut self, ty: &Type, source: ResourceId, member: ExprRef) -> ResourceId {
        let element = ty.element_or_self().clone();
        let resource_type = member.ty().element_or_self().clone();
        self.arena
            .navigate(ResourceKind::NavigationSet, Type::query(element), source, member, resource_type)
    }

    fn analyze_select_many(&mut self, call: &ExprRef, args: &[ExprRef]) -> QueryResult<ExprRef> {
        if args.len() != 2 && args.len() != 3 {
            return Ok(call.clone());
        }
        rules::require_can_navigate(&self.arena, &args[0])?;
        let Some(input) = as_resource(&args[0]) else {
            return Ok(call.clone());
        };
        let Some(collector) = match_single_argument_lambda(&args[1]) else {
            return Ok(call.clone());
        };
        let (params, body) = lambda_parts(&collector);
        let bound = input::bind(&mut self.arena, body, input, &params[0]);
        let navigation = strip_cast_method_calls(&bound.expr);
        let Some(member) = match_property_projection_set(&self.arena, input, &navigation) else {
            return Ok(call.clone());
        };
        let set = self.navigation_set(&call.ty(), input, member);
        if args.len() == 3 {
            return self.analyze_select_many_selector(call, &args[2], set);
        }
        Ok(self.arena.expr(set))
    }

    fn analyze_select_many_selector(&mut self, call: &ExprRef, selector: &ExprRef, set: ResourceId) -> QueryResult<ExprRef> {
        let Some(lambda) = match_double_argument_lambda(selector) else {
            return Ok(call.clone());
        };
        if let Some(scope) = match_transparent_scope_selector(&mut self.arena, set, &lambda) {
            trace!(resource = set.0, accessor = %scope.accessor, "transparent scope");
            self.arena.node_mut(set).transparent_scope = Some(scope);
            return Ok(self.arena.expr(set));
        }
        if match_identity_projection_result_selector(&lambda) {
            return Ok(self.arena.expr(set));
        }
        if match_member_init_with_default_constructor(&lambda) || match_new(&lambda) {
            let (params, body) = lambda_parts(&lambda);
            let selector = Expr::lambda(vec![params[1].clone()], body.clone());
            if !projection::analyze(self.types, &mut self.arena, &selector, set, false)? {
                return Ok(call.clone());
            }
            return Ok(self.arena.expr(set));
        }
        Ok(call.clone())
    }

    /// Try to read `Select`/`SelectMany(..., resultSelector)` as a projection.
    /// `Ok(None)` means "not a projection"; the caller rolls the arena back.
    fn analyze_projection(
        &mut self,
        which: SequenceMethod,
        call: &ExprRef,
        source: &ExprRef,
        args: &[ExprRef],
    ) -> QueryResult<Option<ExprRef>> {
        let Some(source_id) = as_resource(source) else {
            return Ok(None);
        };
        let ty = call.ty();
        if which == SequenceMethod::Select {
            let Some(lambda) = match_single_argument_lambda(&args[1]) else {
                return Ok(None);
            };
            let resource_type = self.arena.node(source_id).resource_type.clone();
            let lambda = rewriter::try_to_rewrite(self.types, &lambda, &resource_type)?;
            let projected = self.arena.clone_with_new_type(source_id, ty)?;
            if !projection::analyze(self.types, &mut self.arena, &lambda, projected, false)? {
                return Ok(None);
            }
            rules::require_can_project(&self.arena, source)?;
            return Ok(Some(self.arena.expr(projected)));
        }

        if !match_parameter_member_access(&args[1]) {
            return Ok(None);
        }
        let Some(result) = match_lambda(&args[2], 2) else {
            return Ok(None);
        };
        let (result_params, result_body) = lambda_parts(&result);
        if mentions(result_body, &result_params[0]) {
            return Ok(None);
        }
        let Some(collector) = match_single_argument_lambda(&args[1]) else {
            return Ok(None);
        };
        let (params, body) = lambda_parts(&collector);
        let bound = input::bind(&mut self.arena, body, source_id, &params[0]);
        let navigation = strip_cast_method_calls(&bound.expr);
        let Some(member) = match_property_projection_set(&self.arena, source_id, &navigation) else {
            return Ok(None);
        };
        let set = self.navigation_set(&ty, source_id, member);
        if !(match_member_init_with_default_constructor(&result) || match_new(&result)) {
            return Ok(None);
        }
        let selector = Expr::lambda(vec![result_params[1].clone()], result_body.clone());
        let projected = self.arena.clone_with_new_type(set, ty)?;
        let analyzed = match projection::analyze(self.types, &mut self.arena, &selector, projected, false) {
            Ok(analyzed) => analyzed,
            Err(QueryError::Unsupported(_)) => false,
            Err(err) => return Err(err),
        };
        if !analyzed {
            return Ok(None);
        }
        rules::require_can_project(&self.arena, &self.arena.expr(set))?;
        Ok(Some(self.arena.expr(projected)))
    }

    fn analyze_ordering(&mut self, call: &ExprRef, args: &[ExprRef], descending: bool, then_by: bool) -> QueryResult<ExprRef> {
        let Some((input, lambda)) = self.set_method_arguments(args) else {
            return Ok(call.clone());
        };
        let Some(selector) = self.bind_to_input(input, &lambda) else {
            return Ok(call.clone());
        };
        let key = OrderKey { selector, descending };
        let node = self.arena.node_mut(input);
        if then_by {
            if let Some(QueryOption::OrderBy(keys)) = node
                .sequence_options
                .iter_mut()
                .find(|o| matches!(o, QueryOption::OrderBy(_)))
            {
                keys.push(key);
                return Ok(self.arena.expr(input));
            }
        }
        let target = self.arena.expr(input);
        rules::add_sequence_option(&mut self.arena, &target, QueryOption::OrderBy(vec![key]))?;
        Ok(target)
    }

    fn analyze_paging(&mut self, call: &ExprRef, args: &[ExprRef], option: fn(i64) -> QueryOption) -> QueryResult<ExprRef> {
        if as_resource(&args[0]).is_none() {
            return Ok(call.clone());
        }
        let count = strip(&args[1]);
        let Some(n) = count.as_constant().and_then(|v| v.as_i64()) else {
            return Ok(call.clone());
        };
        rules::add_sequence_option(&mut self.arena, &args[0], option(n))?;
        Ok(args[0].clone())
    }

    /// `First()`/`Single()` on a plain set: ask for no more rows than needed.
    fn limit_cardinality(&mut self, call: &ExprRef, args: &[ExprRef], max: i64) -> QueryResult<ExprRef> {
        if args.len() != 1 {
            return Ok(call.clone());
        }
        let Some(id) = as_resource(&args[0]) else {
            return Ok(call.clone());
        };
        let node = self.arena.node(id);
        match node.kind {
            ResourceKind::NavigationSingleton => Ok(args[0].clone()),
            ResourceKind::RootSet if !node.has_key_predicate() => {
                if node.take().is_none_or(|n| n > max) {
                    rules::add_sequence_option(&mut self.arena, &args[0], QueryOption::Take(max))?;
                }
                Ok(args[0].clone())
            }
            _ => Ok(args[0].clone()),
        }
    }

    fn analyze_cast(&mut self, call: &ExprRef, args: &[ExprRef]) -> QueryResult<ExprRef> {
        let Some(id) = as_resource(&args[0]) else {
            return Ok(call.clone());
        };
        let copy = self.arena.clone_with_new_type(id, call.ty())?;
        Ok(self.arena.expr(copy))
    }

    fn analyze_count(&mut self, call: &ExprRef, args: &[ExprRef]) -> QueryResult<ExprRef> {
        let Some(id) = as_resource(&args[0]) else {
            return Ok(call.clone());
        };
        rules::require_can_add_count(&self.arena, &args[0])?;
        rules::require_non_singleton(&self.arena, &args[0])?;
        self.arena.node_mut(id).count = CountOption::ValueOnly;
        Ok(args[0].clone())
    }
}
