//! Resource path and query options.

use serde::Serialize;

use crate::ast::{ExprRef, ResourceId};
use crate::error::{QueryResult, Unsupported};
use crate::metadata::ClientTypeInfo;
use crate::resource::{CountOption, QueryOption, ResourceArena, Segment};

use super::expression::ExpressionWriter;
use super::literal;
use super::methods::Builtins;
use super::ProtocolVersion;

/// Output of [`UriWriter::write`]: the relative request path and the
/// lowest protocol version able to serve it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WrittenQuery {
    pub path: String,
    pub version: ProtocolVersion,
}

pub struct UriWriter<'a> {
    arena: &'a ResourceArena,
    types: &'a dyn ClientTypeInfo,
    builtins: &'a Builtins,
    leaf_parens: bool,
    version: ProtocolVersion,
    out: String,
}

impl<'a> UriWriter<'a> {
    pub fn new(arena: &'a ResourceArena, types: &'a dyn ClientTypeInfo, builtins: &'a Builtins) -> Self {
        Self {
            arena,
            types,
            builtins,
            leaf_parens: false,
            version: ProtocolVersion::V1,
            out: String::new(),
        }
    }

    /// Write `()` after an unkeyed leaf set, e.g. `/Products()`.
    pub fn leaf_parens(mut self, yes: bool) -> Self {
        self.leaf_parens = yes;
        self
    }

    pub fn write(mut self, leaf: ResourceId) -> QueryResult<WrittenQuery> {
        self.write_segment(leaf, leaf)?;
        self.write_options(leaf)?;
        Ok(WrittenQuery {
            path: self.out,
            version: self.version,
        })
    }

    fn expression(&self, e: &ExprRef, current: ResourceId) -> QueryResult<String> {
        ExpressionWriter::new(self.arena, self.types, self.builtins, current).write(e)
    }

    fn write_segment(&mut self, id: ResourceId, leaf: ResourceId) -> QueryResult<()> {
        let node = self.arena.node(id);
        if let Some(source) = node.source {
            self.write_segment(source, leaf)?;
        }
        self.out.push('/');
        match (&node.segment, node.source) {
            (Segment::Root(name), _) => self.out.push_str(name),
            (Segment::Navigation(member), Some(source)) => {
                let text = self.expression(member, source)?;
                self.out.push_str(&text);
            }
            (Segment::Navigation(member), None) => {
                return Err(Unsupported::CantTranslate(member.to_string()).into());
            }
        }

        if node.has_key_predicate() {
            let mut parts = Vec::with_capacity(node.key_predicate.len());
            for key in &node.key_predicate {
                let value = key
                    .value
                    .as_constant()
                    .and_then(literal::uri_literal)
                    .ok_or_else(|| Unsupported::CantConvertConstant(key.value.to_string()))?;
                parts.push(if node.key_predicate.len() == 1 {
                    value
                } else {
                    format!("{}={}", key.property.name, value)
                });
            }
            self.out.push('(');
            self.out.push_str(&parts.join(","));
            self.out.push(')');
        } else if id == leaf && self.leaf_parens && node.is_set() {
            self.out.push_str("()");
        }

        if node.count == CountOption::ValueOnly {
            self.out.push_str("/$count");
            self.version.raise(ProtocolVersion::V2);
        }
        Ok(())
    }

    fn write_options(&mut self, leaf: ResourceId) -> QueryResult<()> {
        let node = self.arena.node(leaf);
        let mut options: Vec<String> = Vec::new();

        let mut sequence: Vec<&QueryOption> = node.sequence_options.iter().collect();
        sequence.sort_by_key(|o| o.kind());
        for option in sequence {
            let text = match option {
                QueryOption::Filter(predicate) => self.expression(predicate, leaf)?,
                QueryOption::OrderBy(keys) => {
                    let mut parts = Vec::with_capacity(keys.len());
                    for key in keys {
                        let mut part = self.expression(&key.selector, leaf)?;
                        if key.descending {
                            part.push_str(" desc");
                        }
                        parts.push(part);
                    }
                    parts.join(",")
                }
                QueryOption::Skip(n) | QueryOption::Take(n) => n.to_string(),
            };
            options.push(format!("${}={}", option.kind().name(), text));
        }

        if !node.expand_paths.is_empty() {
            options.push(format!("$expand={}", node.expand_paths.join(",")));
        }
        if let Some(projection) = &node.projection
            && !projection.paths.is_empty()
        {
            options.push(format!("$select={}", projection.paths.join(",")));
            self.version.raise(ProtocolVersion::V2);
        }
        if node.count == CountOption::InlineAll {
            options.push("$inlinecount=allpages".to_string());
            self.version.raise(ProtocolVersion::V2);
        }
        for (name, value) in &node.custom_options {
            if name.trim() == "$inlinecount" {
                self.version.raise(ProtocolVersion::V2);
            }
            options.push(format!("{}={}", name, value));
        }

        if !options.is_empty() {
            self.out.push('?');
            self.out.push_str(&options.join("&"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, Expr, Member, Type};
    use crate::metadata::Model;
    use crate::resource::{KeyValue, OrderKey, ResourceKind};
    use pretty_assertions::assert_eq;

    fn model() -> Model {
        Model::new("Shop")
            .entity_set("Products", "Product")
            .entity("Product", &["Id"], &[("Id", "Int32"), ("Name", "String")])
            .entity("Line", &["OrderId", "No"], &[("OrderId", "Int32"), ("No", "Int32")])
    }

    #[test]
    fn test_options_in_canonical_order() {
        let model = model();
        let builtins = Builtins::new();
        let mut arena = ResourceArena::new();
        let id = arena.new_root("Products", Type::named("Product"));
        let it = arena.input_ref(id);
        let node = arena.node_mut(id);
        node.add_sequence_option(QueryOption::Take(20));
        node.add_sequence_option(QueryOption::OrderBy(vec![OrderKey {
            selector: Expr::property(it.clone(), "Name", Type::string()),
            descending: true,
        }]));
        node.add_sequence_option(QueryOption::Filter(Expr::binary(
            BinaryOp::GreaterThan,
            Expr::property(it, "Id", Type::int32()),
            Expr::literal(10),
        )));
        let written = UriWriter::new(&arena, &model, &builtins).write(id).unwrap();
        assert_eq!(written.path, "/Products?$filter=Id gt 10&$orderby=Name desc&$top=20");
        assert_eq!(written.version, ProtocolVersion::V1);
    }

    #[test]
    fn test_composite_key_and_count() {
        let model = model();
        let builtins = Builtins::new();
        let mut arena = ResourceArena::new();
        let id = arena.new_root("Lines", Type::named("Line"));
        let key = |name: &str, v: i32| KeyValue {
            property: Member::new(name, Type::named("Line"), Type::int32()),
            value: Expr::literal(v),
        };
        arena.node_mut(id).set_key_predicate(vec![key("OrderId", 1), key("No", 2)]).unwrap();
        let written = UriWriter::new(&arena, &model, &builtins).write(id).unwrap();
        assert_eq!(written.path, "/Lines(OrderId=1,No=2)");

        let counted = arena.new_root("Products", Type::named("Product"));
        arena.node_mut(counted).count = CountOption::ValueOnly;
        let written = UriWriter::new(&arena, &model, &builtins).write(counted).unwrap();
        assert_eq!(written.path, "/Products/$count");
        assert_eq!(written.version, ProtocolVersion::V2);
    }

    #[test]
    fn test_navigation_and_leaf_parens() {
        let model = model();
        let builtins = Builtins::new();
        let mut arena = ResourceArena::new();
        let root = arena.new_root("Customers", Type::named("Customer"));
        arena
            .node_mut(root)
            .set_key_predicate(vec![KeyValue {
                property: Member::new("Id", Type::named("Customer"), Type::int32()),
                value: Expr::literal("ALFKI"),
            }])
            .unwrap();
        let it = arena.input_ref(root);
        let orders = Type::collection(Type::named("Order"));
        let member = Expr::property(it, "Orders", orders.clone());
        let nav = arena.new_navigation(ResourceKind::NavigationSet, orders, root, member, Type::named("Order"));
        arena.node_mut(nav).custom_options.push(("x".into(), "y".into()));
        let written = UriWriter::new(&arena, &model, &builtins)
            .leaf_parens(true)
            .write(nav)
            .unwrap();
        assert_eq!(written.path, "/Customers('ALFKI')/Orders()?x=y");
    }
}
