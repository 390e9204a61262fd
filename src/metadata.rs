//! Type metadata: which types are entities, what their keys are, and how
//! types are named on the wire.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ast::{Primitive, Type};
use crate::error::{QueryError, QueryResult};

/// The metadata oracle consulted during binding and serialization.
pub trait ClientTypeInfo {
    /// Whether `ty` is an entity type (has a key).
    fn is_entity_type(&self, ty: &Type) -> bool;

    /// Key property names of an entity type, in declaration order.
    fn key_properties(&self, ty: &Type) -> Vec<String>;

    /// Type of property `name` on `ty`, including inherited properties.
    fn property_type(&self, ty: &Type, name: &str) -> Option<Type>;

    /// The type's protocol name, e.g. `Edm.Int32` or `Northwind.Product`.
    fn type_name(&self, ty: &Type) -> String;

    /// Element type of a root entity set.
    fn entity_set_type(&self, set: &str) -> Option<Type>;

    /// Whether `ty`, or the element type of `ty` if it is a sequence, is an entity type.
    fn element_is_entity(&self, ty: &Type) -> bool {
        self.is_entity_type(ty.element_or_self())
    }
}

/// Declaration of an entity or complex type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeDef {
    /// Key property names; a type with keys (own or inherited) is an entity type.
    #[serde(default)]
    pub keys: Vec<String>,

    /// Base type whose properties and keys are inherited.
    #[serde(default)]
    pub base: Option<String>,

    /// Property name to type spec: `Int32`, `String?`, `Category`, `Collection(Order)`.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// A metadata model loaded from TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Model {
    #[serde(default)]
    pub namespace: String,

    /// Entity set name to element type name.
    #[serde(default)]
    pub entity_sets: BTreeMap<String, String>,

    #[serde(default)]
    pub types: BTreeMap<String, TypeDef>,
}

impl Model {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Declare an entity set.
    pub fn entity_set(mut self, name: &str, element: &str) -> Self {
        self.entity_sets.insert(name.to_string(), element.to_string());
        self
    }

    /// Declare an entity type with its keys and properties.
    pub fn entity(mut self, name: &str, keys: &[&str], properties: &[(&str, &str)]) -> Self {
        self.types.insert(
            name.to_string(),
            TypeDef {
                keys: keys.iter().map(|k| k.to_string()).collect(),
                base: None,
                properties: properties
                    .iter()
                    .map(|(n, t)| (n.to_string(), t.to_string()))
                    .collect(),
            },
        );
        self
    }

    /// Declare a complex (keyless) type.
    pub fn complex(self, name: &str, properties: &[(&str, &str)]) -> Self {
        self.entity(name, &[], properties)
    }

    /// Declare a type deriving from `base`.
    pub fn derived(mut self, name: &str, base: &str, properties: &[(&str, &str)]) -> Self {
        self.types.insert(
            name.to_string(),
            TypeDef {
                keys: Vec::new(),
                base: Some(base.to_string()),
                properties: properties
                    .iter()
                    .map(|(n, t)| (n.to_string(), t.to_string()))
                    .collect(),
            },
        );
        self
    }

    /// Parse a model from TOML text and validate it.
    pub fn from_toml(text: &str) -> QueryResult<Self> {
        let model: Model =
            toml::from_str(text).map_err(|e| QueryError::Metadata(e.to_string()))?;
        model.validate()?;
        Ok(model)
    }

    /// Load a model file.
    pub fn load(path: impl AsRef<Path>) -> QueryResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Check that every referenced type exists and every key is a declared property.
    pub fn validate(&self) -> QueryResult<()> {
        for (set, element) in &self.entity_sets {
            if !self.types.contains_key(element) {
                return Err(QueryError::Metadata(format!(
                    "entity set '{}' refers to undeclared type '{}'",
                    set, element
                )));
            }
        }
        for (name, def) in &self.types {
            if let Some(base) = &def.base {
                if !self.types.contains_key(base) {
                    return Err(QueryError::Metadata(format!(
                        "type '{}' derives from undeclared type '{}'",
                        name, base
                    )));
                }
            }
            for (prop, spec) in &def.properties {
                self.parse_type_spec(spec).map_err(|e| {
                    QueryError::Metadata(format!("{}.{}: {}", name, prop, e))
                })?;
            }
            for key in &def.keys {
                if !def.properties.contains_key(key) {
                    return Err(QueryError::Metadata(format!(
                        "key '{}' is not a property of '{}'",
                        key, name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Resolve a property type spec to a [`Type`].
    pub fn parse_type_spec(&self, spec: &str) -> QueryResult<Type> {
        let spec = spec.trim();
        if let Some(inner) = spec
            .strip_prefix("Collection(")
            .and_then(|s| s.strip_suffix(')'))
        {
            return Ok(Type::collection(self.parse_type_spec(inner)?));
        }
        if let Some(inner) = spec.strip_suffix('?') {
            return match Primitive::from_name(inner) {
                Some(p) if p.is_value_type() => Ok(Type::Nullable(p)),
                Some(p) => Ok(Type::Primitive(p)),
                None => Err(QueryError::Metadata(format!(
                    "'{}' is not a nullable primitive",
                    spec
                ))),
            };
        }
        let spec = spec.strip_prefix("Edm.").unwrap_or(spec);
        if let Some(p) = Primitive::from_name(spec) {
            return Ok(Type::Primitive(p));
        }
        if self.types.contains_key(spec) {
            return Ok(Type::Named(spec.to_string()));
        }
        Err(QueryError::Metadata(format!("unknown type '{}'", spec)))
    }

    /// Entity set names with their element types.
    pub fn entity_sets(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entity_sets
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn lookup(&self, ty: &Type) -> Option<(&str, &TypeDef)> {
        match ty {
            Type::Named(n) => self.types.get_key_value(n).map(|(k, v)| (k.as_str(), v)),
            _ => None,
        }
    }

    /// The type and its ancestors, most derived first.
    fn lineage(&self, ty: &Type) -> Vec<&TypeDef> {
        let mut out = Vec::new();
        let mut current = self.lookup(ty).map(|(_, d)| d);
        while let Some(def) = current {
            if out.len() > self.types.len() {
                break;
            }
            out.push(def);
            current = def.base.as_ref().and_then(|b| self.types.get(b));
        }
        out
    }
}

impl ClientTypeInfo for Model {
    fn is_entity_type(&self, ty: &Type) -> bool {
        !self.key_properties(ty).is_empty()
    }

    fn key_properties(&self, ty: &Type) -> Vec<String> {
        self.lineage(ty)
            .into_iter()
            .rev()
            .flat_map(|d| d.keys.iter().cloned())
            .collect()
    }

    fn property_type(&self, ty: &Type, name: &str) -> Option<Type> {
        if let Some(field) = ty.field(name) {
            return Some(field.ty.clone());
        }
        self.lineage(ty)
            .into_iter()
            .find_map(|d| d.properties.get(name))
            .and_then(|spec| self.parse_type_spec(spec).ok())
    }

    fn type_name(&self, ty: &Type) -> String {
        match ty {
            Type::Primitive(p) | Type::Nullable(p) => format!("Edm.{}", p.edm_name()),
            Type::Named(n) if self.namespace.is_empty() => n.clone(),
            Type::Named(n) => format!("{}.{}", self.namespace, n),
            other => other.to_string(),
        }
    }

    fn entity_set_type(&self, set: &str) -> Option<Type> {
        self.entity_sets.get(set).map(|t| Type::Named(t.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn northwind() -> Model {
        Model::new("Northwind")
            .entity_set("Products", "Product")
            .entity(
                "Product",
                &["Id"],
                &[("Id", "Int32"), ("Name", "String"), ("Category", "Category")],
            )
            .entity("Category", &["Id"], &[("Id", "Int32"), ("Name", "String")])
            .derived("DiscontinuedProduct", "Product", &[("Reason", "String")])
            .complex("Address", &[("City", "String")])
    }

    #[test]
    fn test_entity_detection() {
        let m = northwind();
        assert!(m.is_entity_type(&Type::named("Product")));
        assert!(m.is_entity_type(&Type::named("DiscontinuedProduct")));
        assert!(!m.is_entity_type(&Type::named("Address")));
        assert!(m.element_is_entity(&Type::collection(Type::named("Category"))));
    }

    #[test]
    fn test_inherited_members() {
        let m = northwind();
        let d = Type::named("DiscontinuedProduct");
        assert_eq!(m.key_properties(&d), vec!["Id".to_string()]);
        assert_eq!(m.property_type(&d, "Name"), Some(Type::string()));
        assert_eq!(m.property_type(&d, "Reason"), Some(Type::string()));
    }

    #[test]
    fn test_type_names() {
        let m = northwind();
        assert_eq!(m.type_name(&Type::int32()), "Edm.Int32");
        assert_eq!(m.type_name(&Type::named("Product")), "Northwind.Product");
    }

    #[test]
    fn test_from_toml() {
        let text = r#"
namespace = "Shop"

[entity_sets]
Orders = "Order"

[types.Order]
keys = ["Id"]

[types.Order.properties]
Id = "Int64"
Total = "Decimal?"
Lines = "Collection(Line)"

[types.Line.properties]
Qty = "Int32"
"#;
        let m = Model::from_toml(text).unwrap();
        let order = m.entity_set_type("Orders").unwrap();
        assert_eq!(
            m.property_type(&order, "Total"),
            Some(Type::Nullable(Primitive::Decimal))
        );
        assert_eq!(
            m.property_type(&order, "Lines"),
            Some(Type::collection(Type::named("Line")))
        );
    }

    #[test]
    fn test_validate_rejects_unknown_key() {
        let text = r#"
[types.Order]
keys = ["Missing"]
[types.Order.properties]
Id = "Int32"
"#;
        assert!(Model::from_toml(text).is_err());
    }
}
