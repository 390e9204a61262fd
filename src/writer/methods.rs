//! Host methods and properties the protocol exposes as functions.

use std::collections::{HashMap, HashSet};

use crate::ast::{Method, Owner, Primitive, Type};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Host {
    String,
    DateTime,
    Math,
}

impl Host {
    fn of_type(ty: &Type) -> Option<Self> {
        match ty.primitive()? {
            Primitive::String => Some(Host::String),
            Primitive::DateTime => Some(Host::DateTime),
            _ => None,
        }
    }

    fn of_method(method: &Method) -> Option<Self> {
        match &method.owner {
            Owner::Math => Some(Host::Math),
            Owner::Type(ty) => Host::of_type(ty),
            _ => None,
        }
    }
}

/// A protocol function a method call maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Function {
    pub name: &'static str,
    /// The receiver is written after the arguments (`substringof(arg, receiver)`).
    pub receiver_last: bool,
}

/// The method → function table, built once and shared by reference.
#[derive(Debug, Clone)]
pub struct Builtins {
    functions: HashMap<(Host, String, usize), Function>,
    properties: HashSet<(Host, &'static str)>,
}

const STRING_FUNCTIONS: &[(&str, usize, &str)] = &[
    ("Contains", 1, "substringof"),
    ("EndsWith", 1, "endswith"),
    ("StartsWith", 1, "startswith"),
    ("IndexOf", 1, "indexof"),
    ("Replace", 2, "replace"),
    ("Substring", 1, "substring"),
    ("Substring", 2, "substring"),
    ("ToLower", 0, "tolower"),
    ("ToUpper", 0, "toupper"),
    ("Trim", 0, "trim"),
    ("Concat", 2, "concat"),
    ("Length", 0, "length"),
];

const DATETIME_PROPERTIES: &[(&str, &str)] = &[
    ("Day", "day"),
    ("Hour", "hour"),
    ("Minute", "minute"),
    ("Month", "month"),
    ("Second", "second"),
    ("Year", "year"),
];

const MATH_FUNCTIONS: &[(&str, &str)] = &[("Round", "round"), ("Floor", "floor"), ("Ceiling", "ceiling")];

impl Builtins {
    pub fn new() -> Self {
        let mut functions = HashMap::new();
        for (name, arity, function) in STRING_FUNCTIONS {
            functions.insert(
                (Host::String, name.to_string(), *arity),
                Function {
                    name: function,
                    receiver_last: *name == "Contains",
                },
            );
        }
        for (name, function) in DATETIME_PROPERTIES {
            functions.insert(
                (Host::DateTime, name.to_string(), 0),
                Function {
                    name: function,
                    receiver_last: false,
                },
            );
        }
        for (name, function) in MATH_FUNCTIONS {
            functions.insert(
                (Host::Math, name.to_string(), 1),
                Function {
                    name: function,
                    receiver_last: false,
                },
            );
        }

        let mut properties = HashSet::new();
        properties.insert((Host::String, "Length"));
        for (name, _) in DATETIME_PROPERTIES {
            properties.insert((Host::DateTime, *name));
        }

        Self { functions, properties }
    }

    /// The function a call to `method` with `arity` arguments maps to.
    pub fn function(&self, method: &Method, arity: usize) -> Option<Function> {
        let host = Host::of_method(method)?;
        self.functions.get(&(host, method.name.clone(), arity)).copied()
    }

    /// Whether `ty.name` is a property the protocol only exposes as a function.
    pub fn is_property_as_method(&self, ty: &Type, name: &str) -> bool {
        match Host::of_type(ty) {
            Some(host) => self.properties.iter().any(|(h, n)| *h == host && *n == name),
            None => false,
        }
    }
}

impl Default for Builtins {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::string_method;

    #[test]
    fn test_contains_is_receiver_last() {
        let b = Builtins::new();
        let f = b
            .function(&string_method("Contains", vec![Type::string()], Type::bool()), 1)
            .unwrap();
        assert_eq!(f.name, "substringof");
        assert!(f.receiver_last);
    }

    #[test]
    fn test_substring_overloads() {
        let b = Builtins::new();
        let m = string_method("Substring", vec![Type::int32()], Type::string());
        assert_eq!(b.function(&m, 1).unwrap().name, "substring");
        assert_eq!(b.function(&m, 2).unwrap().name, "substring");
        assert!(b.function(&m, 3).is_none());
    }

    #[test]
    fn test_properties_as_methods() {
        let b = Builtins::new();
        assert!(b.is_property_as_method(&Type::string(), "Length"));
        assert!(b.is_property_as_method(&Type::Primitive(Primitive::DateTime), "Year"));
        assert!(!b.is_property_as_method(&Type::named("Product"), "Length"));
    }

    #[test]
    fn test_math_round() {
        let b = Builtins::new();
        let m = Method::new_static(Owner::Math, "Round", vec![Type::Primitive(Primitive::Double)], Type::Primitive(Primitive::Double));
        assert_eq!(b.function(&m, 1).unwrap().name, "round");
    }
}
