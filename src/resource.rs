//! Resource nodes: the bound form of a query.
//!
//! Nodes live in a [`ResourceArena`] and refer to each other by
//! [`ResourceId`]. Lambdas bound against a node refer to it through a
//! back-reference slot ([`RefId`]); when a node is replaced by a structural
//! copy, the slot is redirected to the copy so every bound lambda follows.

use std::fmt::Write as _;

use crate::ast::{Expr, ExprRef, Member, RefId, ResourceId, Type};
use crate::error::{QueryError, QueryResult, Unsupported};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// A collection addressed by name at the service root.
    RootSet,
    /// A collection reached by navigating a collection-valued property.
    NavigationSet,
    /// A single resource reached by navigating a reference property.
    NavigationSingleton,
}

/// How a node is reached from its source.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Root(String),
    Navigation(ExprRef),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OptionKind {
    Filter,
    OrderBy,
    Skip,
    Take,
}

impl OptionKind {
    pub fn name(&self) -> &'static str {
        match self {
            OptionKind::Filter => "filter",
            OptionKind::OrderBy => "orderby",
            OptionKind::Skip => "skip",
            OptionKind::Take => "top",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderKey {
    pub selector: ExprRef,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryOption {
    Filter(ExprRef),
    OrderBy(Vec<OrderKey>),
    Skip(i64),
    Take(i64),
}

impl QueryOption {
    pub fn kind(&self) -> OptionKind {
        match self {
            QueryOption::Filter(_) => OptionKind::Filter,
            QueryOption::OrderBy(_) => OptionKind::OrderBy,
            QueryOption::Skip(_) => OptionKind::Skip,
            QueryOption::Take(_) => OptionKind::Take,
        }
    }

    /// Combine a second option of the same kind into this one.
    fn compose(self, next: QueryOption) -> QueryOption {
        match (self, next) {
            (QueryOption::Skip(a), QueryOption::Skip(b)) => QueryOption::Skip(a.saturating_add(b)),
            (QueryOption::Take(a), QueryOption::Take(b)) => QueryOption::Take(a.min(b)),
            (_, next) => next,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CountOption {
    #[default]
    None,
    /// `/$count`: only the number of matching resources.
    ValueOnly,
    /// `$inlinecount=allpages`: the resources plus their total count.
    InlineAll,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyValue {
    pub property: Member,
    pub value: ExprRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub selector: ExprRef,
    pub paths: Vec<String>,
}

/// The synthetic join record introduced by `SelectMany` with a result selector.
#[derive(Debug, Clone, PartialEq)]
pub struct TransparentScope {
    /// Member of the record holding the current element.
    pub accessor: String,
    /// Members of the record holding elements of earlier resources.
    pub source_accessors: Vec<(String, ExprRef)>,
}

impl TransparentScope {
    pub fn source_accessor(&self, name: &str) -> Option<&ExprRef> {
        self.source_accessors
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, e)| e)
    }
}

#[derive(Debug, Clone)]
pub struct ResourceNode {
    pub kind: ResourceKind,
    /// Type of the node as an expression: `IQueryable<T>` for sets, `T` for singletons.
    pub ty: Type,
    pub source: Option<ResourceId>,
    pub segment: Segment,
    pub resource_type: Type,
    pub key_predicate: Vec<KeyValue>,
    pub sequence_options: Vec<QueryOption>,
    pub expand_paths: Vec<String>,
    pub count: CountOption,
    pub custom_options: Vec<(String, String)>,
    pub projection: Option<Projection>,
    pub transparent_scope: Option<TransparentScope>,
    input_ref: Option<RefId>,
    handed_off: bool,
}

impl ResourceNode {
    fn new(kind: ResourceKind, ty: Type, source: Option<ResourceId>, segment: Segment, resource_type: Type) -> Self {
        Self {
            kind,
            ty,
            source,
            segment,
            resource_type,
            key_predicate: Vec::new(),
            sequence_options: Vec::new(),
            expand_paths: Vec::new(),
            count: CountOption::None,
            custom_options: Vec::new(),
            projection: None,
            transparent_scope: None,
            input_ref: None,
            handed_off: false,
        }
    }

    pub fn is_set(&self) -> bool {
        self.kind != ResourceKind::NavigationSingleton
    }

    pub fn has_key_predicate(&self) -> bool {
        !self.key_predicate.is_empty()
    }

    /// A keyed set or a navigation singleton addresses exactly one resource.
    pub fn is_singleton(&self) -> bool {
        match self.kind {
            ResourceKind::NavigationSingleton => true,
            _ => self.has_key_predicate(),
        }
    }

    pub fn has_sequence_options(&self) -> bool {
        !self.sequence_options.is_empty()
    }

    pub fn has_query_options(&self) -> bool {
        self.has_sequence_options()
            || !self.expand_paths.is_empty()
            || self.count != CountOption::None
            || !self.custom_options.is_empty()
            || self.projection.is_some()
    }

    pub fn option(&self, kind: OptionKind) -> Option<&QueryOption> {
        self.sequence_options.iter().find(|o| o.kind() == kind)
    }

    pub fn has_option(&self, kind: OptionKind) -> bool {
        self.option(kind).is_some()
    }

    pub fn filter(&self) -> Option<&ExprRef> {
        match self.option(OptionKind::Filter) {
            Some(QueryOption::Filter(e)) => Some(e),
            _ => None,
        }
    }

    pub fn take(&self) -> Option<i64> {
        match self.option(OptionKind::Take) {
            Some(QueryOption::Take(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn order_keys(&self) -> Option<&[OrderKey]> {
        match self.option(OptionKind::OrderBy) {
            Some(QueryOption::OrderBy(keys)) => Some(keys),
            _ => None,
        }
    }

    /// Add an option; one of the same kind already present is merged and moves to the end.
    pub fn add_sequence_option(&mut self, option: QueryOption) {
        let kind = option.kind();
        let option = match self.sequence_options.iter().position(|o| o.kind() == kind) {
            Some(i) => self.sequence_options.remove(i).compose(option),
            None => option,
        };
        self.sequence_options.push(option);
    }

    pub fn remove_option(&mut self, kind: OptionKind) {
        self.sequence_options.retain(|o| o.kind() != kind);
    }

    pub fn set_key_predicate(&mut self, key: Vec<KeyValue>) -> QueryResult<()> {
        if self.has_key_predicate() {
            return Err(Unsupported::OneKeyPredicate.into());
        }
        self.key_predicate = key;
        Ok(())
    }

    pub fn add_expand_path(&mut self, path: impl Into<String>) {
        let path = path.into();
        if !self.expand_paths.contains(&path) {
            self.expand_paths.push(path);
        }
    }

    pub fn custom_option(&self, name: &str) -> Option<&str> {
        self.custom_options
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
struct RefSlot {
    target: ResourceId,
}

/// Owner of every resource node built during one compilation.
#[derive(Debug, Clone, Default)]
pub struct ResourceArena {
    nodes: Vec<ResourceNode>,
    refs: Vec<RefSlot>,
}

impl ResourceArena {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, node: ResourceNode) -> ResourceId {
        self.nodes.push(node);
        ResourceId(self.nodes.len() - 1)
    }

    pub fn new_root(&mut self, name: impl Into<String>, element: Type) -> ResourceId {
        let node = ResourceNode::new(
            ResourceKind::RootSet,
            Type::query(element.clone()),
            None,
            Segment::Root(name.into()),
            element,
        );
        self.push(node)
    }

    pub fn new_navigation(
        &mut self,
        kind: ResourceKind,
        ty: Type,
        source: ResourceId,
        member: ExprRef,
        resource_type: Type,
    ) -> ResourceId {
        let node = ResourceNode::new(kind, ty, Some(source), Segment::Navigation(member), resource_type);
        self.push(node)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: ResourceId) -> &ResourceNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: ResourceId) -> &mut ResourceNode {
        &mut self.nodes[id.0]
    }

    /// The node as an expression.
    pub fn expr(&self, id: ResourceId) -> ExprRef {
        Expr::resource(id, self.node(id).ty.clone())
    }

    /// The node's back-reference, created on first use.
    pub fn input_ref(&mut self, id: ResourceId) -> ExprRef {
        let slot = match self.nodes[id.0].input_ref {
            Some(slot) => slot,
            None => {
                self.refs.push(RefSlot { target: id });
                let slot = RefId(self.refs.len() - 1);
                self.nodes[id.0].input_ref = Some(slot);
                slot
            }
        };
        Expr::input_ref(slot, self.nodes[id.0].resource_type.clone())
    }

    /// The node a back-reference currently points at.
    pub fn resolve(&self, slot: RefId) -> ResourceId {
        self.refs[slot.0].target
    }

    /// Move `old`'s back-reference to `new`.
    ///
    /// A node hands its reference off at most once, and the receiving node
    /// must not have one of its own yet.
    pub fn override_input_reference(&mut self, new: ResourceId, old: ResourceId) -> QueryResult<()> {
        if self.nodes[new.0].input_ref.is_some() {
            return Err(QueryError::internal(format!(
                "resource #{} already has a back-reference",
                new.0
            )));
        }
        if self.nodes[old.0].handed_off {
            return Err(QueryError::internal(format!(
                "resource #{} handed off its back-reference twice",
                old.0
            )));
        }
        if let Some(slot) = self.nodes[old.0].input_ref.take() {
            self.refs[slot.0].target = new;
            self.nodes[new.0].input_ref = Some(slot);
            self.nodes[old.0].handed_off = true;
        }
        Ok(())
    }

    /// Copy `id` under a new expression type, moving its back-reference to the copy.
    pub fn clone_with_new_type(&mut self, id: ResourceId, ty: Type) -> QueryResult<ResourceId> {
        let old = self.node(id);
        let resource_type = ty.element_or_self().clone();
        let mut copy = ResourceNode::new(old.kind, ty, old.source, old.segment.clone(), resource_type);
        copy.key_predicate = old.key_predicate.clone();
        copy.sequence_options = old.sequence_options.clone();
        copy.expand_paths = old.expand_paths.clone();
        copy.count = old.count;
        copy.custom_options = old.custom_options.clone();
        copy.projection = old.projection.clone();
        copy.transparent_scope = old.transparent_scope.clone();
        let new = self.push(copy);
        self.override_input_reference(new, id)?;
        Ok(new)
    }

    /// Navigate from `source` through `member`.
    ///
    /// Expansions, the count option and custom options always belong to the
    /// leaf, so they move from `source` to the new node.
    pub fn navigate(
        &mut self,
        kind: ResourceKind,
        ty: Type,
        source: ResourceId,
        member: ExprRef,
        resource_type: Type,
    ) -> ResourceId {
        let id = self.new_navigation(kind, ty, source, member, resource_type);
        let from = &mut self.nodes[source.0];
        let expand_paths = std::mem::take(&mut from.expand_paths);
        let count = std::mem::take(&mut from.count);
        let custom_options = std::mem::take(&mut from.custom_options);
        let to = &mut self.nodes[id.0];
        to.expand_paths = expand_paths;
        to.count = count;
        to.custom_options = custom_options;
        id
    }

    /// Copy a set carrying a transparent scope into one that does not.
    pub fn remove_transparent_scope(&mut self, id: ResourceId, ty: Type) -> QueryResult<ResourceId> {
        let old = self.node(id).clone();
        let mut copy = ResourceNode::new(old.kind, ty, old.source, old.segment, old.resource_type);
        copy.key_predicate = old.key_predicate;
        copy.expand_paths = old.expand_paths;
        copy.count = old.count;
        copy.custom_options = old.custom_options;
        copy.projection = old.projection;
        for option in old.sequence_options {
            copy.add_sequence_option(option);
        }
        let new = self.push(copy);
        self.override_input_reference(new, id)?;
        Ok(new)
    }

    /// Multi-line outline of the tree ending at `id`, for `explain` output.
    pub fn describe(&self, id: ResourceId) -> String {
        let mut chain = vec![id];
        while let Some(source) = self.node(*chain.last().unwrap_or(&id)).source {
            chain.push(source);
        }
        let mut out = String::new();
        for (depth, rid) in chain.iter().rev().enumerate() {
            let node = self.node(*rid);
            let segment = match &node.segment {
                Segment::Root(name) => name.clone(),
                Segment::Navigation(member) => member.to_string(),
            };
            let _ = writeln!(out, "{}{:?} #{} {} : {}", "  ".repeat(depth), node.kind, rid.0, segment, node.resource_type);
            let pad = "  ".repeat(depth + 1);
            if node.has_key_predicate() {
                let keys: Vec<String> = node
                    .key_predicate
                    .iter()
                    .map(|k| format!("{}={}", k.property.name, k.value))
                    .collect();
                let _ = writeln!(out, "{}key: {}", pad, keys.join(", "));
            }
            for option in &node.sequence_options {
                let text = match option {
                    QueryOption::Filter(e) => e.to_string(),
                    QueryOption::OrderBy(keys) => keys
                        .iter()
                        .map(|k| format!("{}{}", k.selector, if k.descending { " desc" } else { "" }))
                        .collect::<Vec<_>>()
                        .join(", "),
                    QueryOption::Skip(n) | QueryOption::Take(n) => n.to_string(),
                };
                let _ = writeln!(out, "{}{}: {}", pad, option.kind().name(), text);
            }
            if !node.expand_paths.is_empty() {
                let _ = writeln!(out, "{}expand: {}", pad, node.expand_paths.join(", "));
            }
            if let Some(p) = &node.projection {
                let _ = writeln!(out, "{}select: {} [{}]", pad, p.selector, p.paths.join(", "));
            }
            if node.count != CountOption::None {
                let _ = writeln!(out, "{}count: {:?}", pad, node.count);
            }
            for (name, value) in &node.custom_options {
                let _ = writeln!(out, "{}{}={}", pad, name, value);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Value;

    fn product() -> Type {
        Type::named("Product")
    }

    #[test]
    fn test_skip_take_merge() {
        let mut arena = ResourceArena::new();
        let id = arena.new_root("Products", product());
        let node = arena.node_mut(id);
        node.add_sequence_option(QueryOption::Skip(3));
        node.add_sequence_option(QueryOption::Skip(4));
        node.add_sequence_option(QueryOption::Take(10));
        node.add_sequence_option(QueryOption::Take(4));
        assert_eq!(node.sequence_options, vec![QueryOption::Skip(7), QueryOption::Take(4)]);
    }

    #[test]
    fn test_skip_merge_saturates() {
        let mut arena = ResourceArena::new();
        let id = arena.new_root("Products", product());
        let node = arena.node_mut(id);
        node.add_sequence_option(QueryOption::Skip(i64::MAX));
        node.add_sequence_option(QueryOption::Skip(10));
        assert_eq!(node.sequence_options, vec![QueryOption::Skip(i64::MAX)]);
    }

    #[test]
    fn test_merged_option_moves_to_end() {
        let mut arena = ResourceArena::new();
        let id = arena.new_root("Products", product());
        let node = arena.node_mut(id);
        node.add_sequence_option(QueryOption::Skip(1));
        node.add_sequence_option(QueryOption::Take(5));
        node.add_sequence_option(QueryOption::Skip(1));
        assert_eq!(node.sequence_options, vec![QueryOption::Take(5), QueryOption::Skip(2)]);
    }

    #[test]
    fn test_second_key_predicate_rejected() {
        let mut arena = ResourceArena::new();
        let id = arena.new_root("Products", product());
        let key = || {
            vec![KeyValue {
                property: Member::new("Id", product(), Type::int32()),
                value: Expr::literal(Value::Int32(1)),
            }]
        };
        arena.node_mut(id).set_key_predicate(key()).unwrap();
        assert!(arena.node(id).is_singleton());
        let err = arena.node_mut(id).set_key_predicate(key()).unwrap_err();
        assert_eq!(err.as_unsupported(), Some(&Unsupported::OneKeyPredicate));
    }

    #[test]
    fn test_back_reference_follows_clone() {
        let mut arena = ResourceArena::new();
        let id = arena.new_root("Products", product());
        let r = arena.input_ref(id);
        let Expr::InputRef { slot, .. } = &*r else { panic!("not a reference") };
        assert_eq!(arena.resolve(*slot), id);

        let copy = arena.clone_with_new_type(id, Type::query(Type::named("Special"))).unwrap();
        assert_eq!(arena.resolve(*slot), copy);
        assert_eq!(arena.node(copy).resource_type, Type::named("Special"));
    }

    #[test]
    fn test_reference_handed_off_once() {
        let mut arena = ResourceArena::new();
        let id = arena.new_root("Products", product());
        arena.input_ref(id);
        let a = arena.new_root("Products", product());
        let b = arena.new_root("Products", product());
        arena.override_input_reference(a, id).unwrap();
        let err = arena.override_input_reference(b, id).unwrap_err();
        assert!(matches!(err, QueryError::Internal(_)));
    }
}
