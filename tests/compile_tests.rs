//! End-to-end compilation of method-chain queries.

use odata_query::prelude::*;
use pretty_assertions::assert_eq;
use url::Url;

fn model() -> Model {
    Model::new("Shop")
        .entity_set("Products", "Product")
        .entity_set("Customers", "Customer")
        .entity(
            "Product",
            &["Id"],
            &[
                ("Id", "Int32"),
                ("Name", "String"),
                ("Price", "Int32"),
                ("Stock", "Int32?"),
                ("Category", "Category"),
            ],
        )
        .entity("Category", &["Id"], &[("Id", "Int32"), ("Name", "String")])
        .entity(
            "Customer",
            &["Id"],
            &[("Id", "Int32"), ("Name", "String"), ("Orders", "Collection(Order)")],
        )
        .entity("Order", &["Id"], &[("Id", "Int32"), ("Amount", "Int32")])
}

fn path(query: &str) -> String {
    odata_query::compile(query, &model()).unwrap().path
}

fn unsupported(query: &str) -> Unsupported {
    match odata_query::compile(query, &model()) {
        Err(QueryError::Unsupported(u)) => u,
        other => panic!("expected an unsupported error for {}, got {:?}", query, other),
    }
}

#[test]
fn test_filter_order_skip_take() {
    assert_eq!(
        path("Products.Where(p => p.Price > 10).OrderBy(p => p.Name).Skip(5).Take(20)"),
        "/Products?$filter=Price gt 10&$orderby=Name&$skip=5&$top=20"
    );
}

#[test]
fn test_filter_written_before_orderby() {
    assert_eq!(
        path("Products.OrderBy(p => p.Name).Where(p => p.Price > 10)"),
        "/Products?$filter=Price gt 10&$orderby=Name"
    );
}

#[test]
fn test_filter_after_skip_rejected() {
    let err = unsupported("Products.Skip(2).Where(p => p.Price > 10)");
    assert!(matches!(err, Unsupported::OptionOutOfOrder { .. }));
}

#[test]
fn test_skip_after_take_rejected() {
    let err = unsupported("Products.Take(2).Skip(1)");
    assert!(matches!(err, Unsupported::OptionOutOfOrder { .. }));
}

#[test]
fn test_repeated_skip_and_take_merge() {
    assert_eq!(
        path("Products.Skip(2).Skip(3).Take(10).Take(5)"),
        "/Products?$skip=5&$top=5"
    );
}

#[test]
fn test_key_predicate() {
    let compiled = odata_query::compile("Products.Where(p => p.Id == 3)", &model()).unwrap();
    assert_eq!(compiled.path, "/Products(3)");
    assert_eq!(compiled.version, ProtocolVersion::V1);
    assert_eq!(compiled.last_segment_type, Type::named("Product"));
}

#[test]
fn test_duplicate_key_property_rejected() {
    let err = unsupported("Products.Where(p => p.Id == 1 && p.Id == 2)");
    assert_eq!(err, Unsupported::OneKeyPredicate);
}

#[test]
fn test_equals_matches_operator() {
    let by_method = path("Products.Where(p => p.Name.Equals(\"a\"))");
    let by_operator = path("Products.Where(p => p.Name == \"a\")");
    assert_eq!(by_method, "/Products?$filter=Name eq 'a'");
    assert_eq!(by_method, by_operator);
}

#[test]
fn test_string_contains() {
    assert_eq!(
        path("Products.Where(p => p.Name.Contains(\"a\"))"),
        "/Products?$filter=substringof('a', Name)"
    );
}

#[test]
fn test_three_way_compare_collapses() {
    assert_eq!(
        path("Products.Where(p => string.Compare(p.Name, \"m\") > 0)"),
        "/Products?$filter=Name gt 'm'"
    );
}

#[test]
fn test_nullable_comparison() {
    assert_eq!(path("Products.Where(p => p.Stock > 5)"), "/Products?$filter=Stock gt 5");
}

#[test]
fn test_variables_are_folded() {
    let model = model();
    let mut vars = Variables::new();
    vars.insert("min".to_string(), Value::Int32(10));
    let expr = parse_query("Products.Where(p => p.Price > $min)", &model, &vars).unwrap();
    let compiled = QueryCompiler::new(&model).compile(&expr).unwrap();
    assert_eq!(compiled.path, "/Products?$filter=Price gt 10");
}

#[test]
fn test_anonymous_projection() {
    let compiled = odata_query::compile(
        "Products.Select(p => new { p.Name, CategoryName = p.Category.Name })",
        &model(),
    )
    .unwrap();
    assert_eq!(compiled.path, "/Products?$expand=Category&$select=Name,Category/Name");
    assert_eq!(compiled.version, ProtocolVersion::V2);
    assert!(compiled.projection.is_some());
}

#[test]
fn test_entity_init_with_computed_value_rejected() {
    let result = odata_query::compile("Products.Select(p => new Product { Id = p.Id + 1 })", &model());
    assert!(matches!(result, Err(QueryError::Unsupported(_))));
}

#[test]
fn test_singleton_navigation() {
    assert_eq!(
        path("Products.Where(p => p.Id == 3).Select(p => p.Category)"),
        "/Products(3)/Category"
    );
}

#[test]
fn test_navigation_without_key_rejected() {
    let err = unsupported("Products.Select(p => p.Category)");
    assert_eq!(err, Unsupported::NavigateWithoutKey);
}

#[test]
fn test_collection_navigation() {
    let compiled = odata_query::compile("Customers.Where(c => c.Id == 1).SelectMany(c => c.Orders)", &model()).unwrap();
    assert_eq!(compiled.path, "/Customers(1)/Orders");
    assert_eq!(compiled.last_segment_type, Type::named("Order"));
}

#[test]
fn test_transparent_scope_filter() {
    assert_eq!(
        path(
            "Customers.Where(c => c.Id == 1)\
             .SelectMany(c => c.Orders, (c, o) => new { c, o })\
             .Where(t => t.o.Amount > 5)\
             .Select(t => t.o)"
        ),
        "/Customers(1)/Orders?$filter=Amount gt 5"
    );
}

#[test]
fn test_predicate_over_two_resources_rejected() {
    let result = odata_query::compile(
        "Customers.Where(c => c.Id == 1)\
         .SelectMany(c => c.Orders, (c, o) => new { c, o })\
         .Where(t => t.c.Name == \"x\" && t.o.Amount > 5)\
         .Select(t => t.o)",
        &model(),
    );
    assert!(matches!(result, Err(QueryError::Unsupported(_))));
}

#[test]
fn test_first_and_single_limit_rows() {
    assert_eq!(path("Products.First()"), "/Products?$top=1");
    assert_eq!(path("Products.Single()"), "/Products?$top=2");
}

#[test]
fn test_count_needs_v2() {
    let compiled = odata_query::compile("Products.Count()", &model()).unwrap();
    assert_eq!(compiled.path, "/Products/$count");
    assert_eq!(compiled.version, ProtocolVersion::V2);
}

#[test]
fn test_inline_count_needs_v2() {
    let compiled = odata_query::compile("Products.IncludeTotalCount()", &model()).unwrap();
    assert_eq!(compiled.path, "/Products?$inlinecount=allpages");
    assert_eq!(compiled.version, ProtocolVersion::V2);
}

#[test]
fn test_expand_and_custom_option() {
    assert_eq!(path("Products.Expand(\"Category\")"), "/Products?$expand=Category");
    assert_eq!(path("Products.AddQueryOption(\"foo\", \"bar\")"), "/Products?foo=bar");
}

#[test]
fn test_custom_inlinecount_needs_v2() {
    let compiled = odata_query::compile("Products.AddQueryOption(\"$inlinecount\", \"allpages\")", &model()).unwrap();
    assert_eq!(compiled.path, "/Products?$inlinecount=allpages");
    assert_eq!(compiled.version, ProtocolVersion::V2);
}

#[test]
fn test_structured_option_after_reserved_custom_rejected() {
    assert_eq!(
        unsupported("Products.AddQueryOption(\"$filter\", \"x\").Where(p => p.Price > 1)"),
        Unsupported::ReservedQueryOption("$filter".into())
    );
    assert_eq!(
        unsupported("Products.AddQueryOption(\"$top\", \"3\").Take(2)"),
        Unsupported::ReservedQueryOption("$top".into())
    );
    assert_eq!(
        unsupported("Products.AddQueryOption(\"$inlinecount\", \"allpages\").IncludeTotalCount()"),
        Unsupported::ReservedQueryOption("$inlinecount".into())
    );
}

#[test]
fn test_parse_error_reports_position() {
    let err = odata_query::compile("Products.Where(p => p.Price >)", &model()).unwrap_err();
    assert!(matches!(err, QueryError::Parse { .. }));
}

#[test]
fn test_unknown_member_is_type_error() {
    let err = odata_query::compile("Products.Where(p => p.Colour == \"red\")", &model()).unwrap_err();
    assert!(matches!(err, QueryError::Type(_)));
}

#[test]
fn test_resolves_against_configured_base() {
    let config = CompilerConfig::from_toml(
        r#"
base_uri = "http://example.org/Shop.svc"

[model]
namespace = "Shop"

[model.entity_sets]
Products = "Product"

[model.types.Product]
keys = ["Id"]

[model.types.Product.properties]
Id = "Int32"
"#,
    )
    .unwrap();
    let compiled = odata_query::compile("Products.Take(1)", &config.model).unwrap();
    let base: Url = config.base_url().unwrap().unwrap();
    assert_eq!(
        compiled.uri(&base).unwrap().as_str(),
        "http://example.org/Shop.svc/Products?$top=1"
    );
}
