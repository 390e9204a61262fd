//! Preconditions checked before a query option is attached to a resource.
//!
//! Each rule passes silently when the expression is not a bound resource:
//! the caller then leaves the call as a residual and the final check
//! reports it.

use crate::ast::{Expr, ExprRef, ResourceId};
use crate::error::{QueryResult, Unsupported};
use crate::resource::{CountOption, OptionKind, QueryOption, ResourceArena, ResourceNode};

/// The resource an expression stands for, if it is bound.
pub fn as_resource(e: &ExprRef) -> Option<ResourceId> {
    match &**e {
        Expr::Resource { id, .. } => Some(*id),
        _ => None,
    }
}

/// Navigating away from a set is only possible while it has no sequence
/// options and no projection.
pub fn require_can_navigate(arena: &ResourceArena, e: &ExprRef) -> QueryResult<()> {
    let Some(id) = as_resource(e) else { return Ok(()) };
    let node = arena.node(id);
    if node.is_set() && node.has_sequence_options() {
        return Err(Unsupported::QueryOptionsOnlyOnLeaf.into());
    }
    if node.projection.is_some() {
        return Err(Unsupported::ProjectionOnlyOnLeaf.into());
    }
    Ok(())
}

pub fn require_can_project(arena: &ResourceArena, e: &ExprRef) -> QueryResult<()> {
    let Some(id) = as_resource(e) else {
        return Err(Unsupported::CanOnlyProjectTheLeaf.into());
    };
    let node = arena.node(id);
    if node.projection.is_some() {
        return Err(Unsupported::OneProjection.into());
    }
    if !node.expand_paths.is_empty() {
        return Err(Unsupported::ProjectWithExpansion.into());
    }
    Ok(())
}

pub fn require_can_expand(arena: &ResourceArena, e: &ExprRef) -> QueryResult<()> {
    let Some(id) = as_resource(e) else {
        return Err(Unsupported::CantExpand.into());
    };
    if arena.node(id).projection.is_some() {
        return Err(Unsupported::ProjectWithExpansion.into());
    }
    Ok(())
}

pub fn require_can_add_count(arena: &ResourceArena, e: &ExprRef) -> QueryResult<()> {
    let Some(id) = as_resource(e) else {
        return Err(Unsupported::CannotAddCount.into());
    };
    let node = arena.node(id);
    if node.count != CountOption::None {
        return Err(Unsupported::CountConflict.into());
    }
    require_no_reserved_custom_option(node, "$inlinecount")
}

/// A structured option must not duplicate a `$name` the caller already added
/// through `AddQueryOption`.
fn require_no_reserved_custom_option(node: &ResourceNode, name: &str) -> QueryResult<()> {
    if node.custom_options.iter().any(|(n, _)| n.trim() == name) {
        return Err(Unsupported::ReservedQueryOption(name.to_string()).into());
    }
    Ok(())
}

pub fn require_can_add_custom_option(e: &ExprRef) -> QueryResult<()> {
    match as_resource(e) {
        Some(_) => Ok(()),
        None => Err(Unsupported::CantAddQueryOption.into()),
    }
}

pub fn require_non_singleton(arena: &ResourceArena, e: &ExprRef) -> QueryResult<()> {
    match as_resource(e) {
        Some(id) if arena.node(id).is_singleton() => Err(Unsupported::OptionsOnSingleton.into()),
        _ => Ok(()),
    }
}

/// A custom option name must not collide with what the query already produces.
pub fn require_legal_custom_option(arena: &ResourceArena, id: ResourceId, name: &str) -> QueryResult<()> {
    let node = arena.node(id);
    let name = name.trim();
    let Some(bare) = name.strip_prefix('$') else {
        return Ok(());
    };
    if node.custom_options.iter().any(|(n, _)| n.trim() == name) {
        return Err(Unsupported::DuplicateQueryOption(name.to_string()).into());
    }
    if !node.is_set() {
        return Ok(());
    }
    let structured = match bare {
        "filter" => node.has_option(OptionKind::Filter),
        "orderby" => node.has_option(OptionKind::OrderBy),
        "skip" => node.has_option(OptionKind::Skip),
        "top" => node.has_option(OptionKind::Take),
        "inlinecount" => node.count == CountOption::InlineAll,
        "expand" => return Ok(()),
        _ => return Err(Unsupported::DollarQueryOption(name.to_string()).into()),
    };
    if structured {
        return Err(Unsupported::ReservedQueryOption(name.to_string()).into());
    }
    Ok(())
}

/// Attach a sequence option to a set, enforcing the protocol's fixed
/// evaluation order: filter, orderby, skip, top, select.
pub fn add_sequence_option(arena: &mut ResourceArena, e: &ExprRef, option: QueryOption) -> QueryResult<()> {
    require_non_singleton(arena, e)?;
    let Some(id) = as_resource(e) else {
        return Err(Unsupported::UnsupportedExpression(e.to_string()).into());
    };
    let node = arena.node(id);
    require_no_reserved_custom_option(node, &format!("${}", option.kind().name()))?;
    let out_of_order = |after: OptionKind| -> QueryResult<()> {
        Err(Unsupported::OptionOutOfOrder {
            option: option.kind().name(),
            after: after.name(),
        }
        .into())
    };
    let projected = || -> QueryResult<()> {
        Err(Unsupported::OptionOutOfOrder {
            option: option.kind().name(),
            after: "select",
        }
        .into())
    };
    match option.kind() {
        OptionKind::Filter | OptionKind::OrderBy => {
            if node.has_option(OptionKind::Skip) {
                return out_of_order(OptionKind::Skip);
            }
            if node.has_option(OptionKind::Take) {
                return out_of_order(OptionKind::Take);
            }
            if node.projection.is_some() {
                return projected();
            }
        }
        OptionKind::Skip => {
            if node.has_option(OptionKind::Take) {
                return out_of_order(OptionKind::Take);
            }
        }
        OptionKind::Take => {}
    }
    arena.node_mut(id).add_sequence_option(option);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Type;
    use crate::resource::Projection;

    fn root() -> (ResourceArena, ExprRef) {
        let mut arena = ResourceArena::new();
        let id = arena.new_root("Products", Type::named("Product"));
        let e = arena.expr(id);
        (arena, e)
    }

    #[test]
    fn test_filter_after_skip_rejected() {
        let (mut arena, e) = root();
        add_sequence_option(&mut arena, &e, QueryOption::Skip(5)).unwrap();
        let err = add_sequence_option(&mut arena, &e, QueryOption::Filter(crate::ast::Expr::literal(true))).unwrap_err();
        assert_eq!(
            err.as_unsupported(),
            Some(&Unsupported::OptionOutOfOrder {
                option: "filter",
                after: "skip"
            })
        );
    }

    #[test]
    fn test_skip_after_top_rejected() {
        let (mut arena, e) = root();
        add_sequence_option(&mut arena, &e, QueryOption::Take(5)).unwrap();
        assert!(add_sequence_option(&mut arena, &e, QueryOption::Skip(1)).is_err());
        add_sequence_option(&mut arena, &e, QueryOption::Take(3)).unwrap();
        assert_eq!(arena.node(as_resource(&e).unwrap()).take(), Some(3));
    }

    #[test]
    fn test_custom_option_rules() {
        let (mut arena, e) = root();
        let id = as_resource(&e).unwrap();
        assert!(require_legal_custom_option(&arena, id, "x").is_ok());
        assert!(require_legal_custom_option(&arena, id, "$expand").is_ok());
        assert_eq!(
            require_legal_custom_option(&arena, id, "$foo").unwrap_err().as_unsupported(),
            Some(&Unsupported::DollarQueryOption("$foo".into()))
        );
        add_sequence_option(&mut arena, &e, QueryOption::Take(1)).unwrap();
        assert_eq!(
            require_legal_custom_option(&arena, id, "$top").unwrap_err().as_unsupported(),
            Some(&Unsupported::ReservedQueryOption("$top".into()))
        );
        assert!(require_legal_custom_option(&arena, id, "$skip").is_ok());
    }

    #[test]
    fn test_structured_option_after_reserved_custom_rejected() {
        let (mut arena, e) = root();
        let id = as_resource(&e).unwrap();
        arena.node_mut(id).custom_options.push(("$top".into(), "3".into()));
        assert_eq!(
            add_sequence_option(&mut arena, &e, QueryOption::Take(2)).unwrap_err().as_unsupported(),
            Some(&Unsupported::ReservedQueryOption("$top".into()))
        );
        assert!(add_sequence_option(&mut arena, &e, QueryOption::Skip(1)).is_ok());
    }

    #[test]
    fn test_count_after_reserved_inlinecount_rejected() {
        let (mut arena, e) = root();
        let id = as_resource(&e).unwrap();
        assert!(require_can_add_count(&arena, &e).is_ok());
        arena.node_mut(id).custom_options.push(("$inlinecount".into(), "allpages".into()));
        assert_eq!(
            require_can_add_count(&arena, &e).unwrap_err().as_unsupported(),
            Some(&Unsupported::ReservedQueryOption("$inlinecount".into()))
        );
    }

    #[test]
    fn test_projection_blocks_navigation_and_expand() {
        let (mut arena, e) = root();
        let id = as_resource(&e).unwrap();
        arena.node_mut(id).projection = Some(Projection {
            selector: crate::ast::Expr::literal(1),
            paths: vec![],
        });
        assert_eq!(
            require_can_navigate(&arena, &e).unwrap_err().as_unsupported(),
            Some(&Unsupported::ProjectionOnlyOnLeaf)
        );
        assert_eq!(
            require_can_expand(&arena, &e).unwrap_err().as_unsupported(),
            Some(&Unsupported::ProjectWithExpansion)
        );
    }
}
