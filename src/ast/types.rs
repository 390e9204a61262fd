//! Static types carried by expression nodes.

use std::fmt;

/// Primitive (scalar) types understood by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Primitive {
    Bool,
    Byte,
    Int16,
    Int32,
    Int64,
    Single,
    Double,
    Decimal,
    String,
    DateTime,
    Guid,
    Binary,
}

impl Primitive {
    /// Parse a primitive from its protocol or C# keyword spelling.
    pub fn from_name(name: &str) -> Option<Self> {
        let p = match name {
            "Boolean" | "Bool" | "bool" => Primitive::Bool,
            "Byte" | "byte" => Primitive::Byte,
            "Int16" | "short" => Primitive::Int16,
            "Int32" | "int" => Primitive::Int32,
            "Int64" | "long" => Primitive::Int64,
            "Single" | "float" => Primitive::Single,
            "Double" | "double" => Primitive::Double,
            "Decimal" | "decimal" => Primitive::Decimal,
            "String" | "string" => Primitive::String,
            "DateTime" => Primitive::DateTime,
            "Guid" => Primitive::Guid,
            "Binary" | "byte[]" => Primitive::Binary,
            _ => return None,
        };
        Some(p)
    }

    /// Name used in `Edm.*` type references.
    pub fn edm_name(&self) -> &'static str {
        match self {
            Primitive::Bool => "Boolean",
            Primitive::Byte => "Byte",
            Primitive::Int16 => "Int16",
            Primitive::Int32 => "Int32",
            Primitive::Int64 => "Int64",
            Primitive::Single => "Single",
            Primitive::Double => "Double",
            Primitive::Decimal => "Decimal",
            Primitive::String => "String",
            Primitive::DateTime => "DateTime",
            Primitive::Guid => "Guid",
            Primitive::Binary => "Binary",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Primitive::Byte
                | Primitive::Int16
                | Primitive::Int32
                | Primitive::Int64
                | Primitive::Single
                | Primitive::Double
                | Primitive::Decimal
        )
    }

    pub fn is_integral(&self) -> bool {
        matches!(
            self,
            Primitive::Byte | Primitive::Int16 | Primitive::Int32 | Primitive::Int64
        )
    }

    /// Value types get a nullable counterpart; strings and binaries are already nullable.
    pub fn is_value_type(&self) -> bool {
        !matches!(self, Primitive::String | Primitive::Binary)
    }

    /// Implicit numeric widening, C# style.
    pub fn widens_to(&self, target: Primitive) -> bool {
        use Primitive::*;
        if *self == target {
            return true;
        }
        match self {
            Byte => matches!(target, Int16 | Int32 | Int64 | Single | Double | Decimal),
            Int16 => matches!(target, Int32 | Int64 | Single | Double | Decimal),
            Int32 => matches!(target, Int64 | Single | Double | Decimal),
            Int64 => matches!(target, Single | Double | Decimal),
            Single => matches!(target, Double),
            _ => false,
        }
    }
}

/// A named field of an anonymous record type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Field {
    pub name: String,
    pub ty: Type,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// The type of an expression node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Primitive(Primitive),
    /// `Nullable<T>` over a value-type primitive.
    Nullable(Primitive),
    /// An entity or complex type declared by the metadata model.
    Named(String),
    /// An anonymous record, e.g. `new { p.Name, Total = p.Price * 2 }`.
    Anonymous(Vec<Field>),
    /// `IEnumerable<T>`: collection properties and in-memory sequences.
    Collection(Box<Type>),
    /// `IQueryable<T>`: a composable remote query.
    Query(Box<Type>),
    /// A delegate type for lambdas.
    Function(Vec<Type>, Box<Type>),
    Object,
}

impl Type {
    pub fn bool() -> Self {
        Type::Primitive(Primitive::Bool)
    }

    pub fn int32() -> Self {
        Type::Primitive(Primitive::Int32)
    }

    pub fn int64() -> Self {
        Type::Primitive(Primitive::Int64)
    }

    pub fn string() -> Self {
        Type::Primitive(Primitive::String)
    }

    pub fn named(name: impl Into<String>) -> Self {
        Type::Named(name.into())
    }

    pub fn collection(element: Type) -> Self {
        Type::Collection(Box::new(element))
    }

    pub fn query(element: Type) -> Self {
        Type::Query(Box::new(element))
    }

    /// Element type of a sequence, or `None` for scalars.
    pub fn element_type(&self) -> Option<&Type> {
        match self {
            Type::Collection(t) | Type::Query(t) => Some(t),
            _ => None,
        }
    }

    /// Element type of a sequence, or the type itself.
    pub fn element_or_self(&self) -> &Type {
        self.element_type().unwrap_or(self)
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self, Type::Collection(_) | Type::Query(_))
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self, Type::Nullable(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Type::Primitive(Primitive::String))
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Type::Primitive(Primitive::Bool))
    }

    /// Primitive underneath an optional `Nullable<>` wrapper.
    pub fn primitive(&self) -> Option<Primitive> {
        match self {
            Type::Primitive(p) | Type::Nullable(p) => Some(*p),
            _ => None,
        }
    }

    /// Whether `null` is a legal value of this type.
    pub fn accepts_null(&self) -> bool {
        match self {
            Type::Primitive(p) => !p.is_value_type(),
            Type::Function(..) => false,
            _ => true,
        }
    }

    /// The nullable counterpart of a value-type primitive.
    pub fn to_nullable(&self) -> Type {
        match self {
            Type::Primitive(p) if p.is_value_type() => Type::Nullable(*p),
            other => other.clone(),
        }
    }

    /// Reference-style assignability: identity, anything to `Object`, `T` to
    /// `Nullable<T>`, and sequence covariance.
    pub fn is_assignable_from(&self, other: &Type) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (Type::Object, _) => true,
            (Type::Nullable(a), Type::Primitive(b)) => a == b,
            (Type::Collection(a), Type::Collection(b) | Type::Query(b)) => a.is_assignable_from(b),
            (Type::Query(a), Type::Query(b)) => a.is_assignable_from(b),
            _ => false,
        }
    }

    /// Look up a field of an anonymous record type.
    pub fn field(&self, name: &str) -> Option<&Field> {
        match self {
            Type::Anonymous(fields) => fields.iter().find(|f| f.name == name),
            _ => None,
        }
    }
}

impl From<Primitive> for Type {
    fn from(p: Primitive) -> Self {
        Type::Primitive(p)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Primitive(p) => write!(f, "{}", p.edm_name()),
            Type::Nullable(p) => write!(f, "Nullable<{}>", p.edm_name()),
            Type::Named(n) => write!(f, "{}", n),
            Type::Anonymous(fields) => {
                write!(f, "<>f__AnonymousType{}", fields.len())?;
                let names: Vec<&str> = fields.iter().map(|x| x.name.as_str()).collect();
                write!(f, "[{}]", names.join(", "))
            }
            Type::Collection(t) => write!(f, "IEnumerable<{}>", t),
            Type::Query(t) => write!(f, "IQueryable<{}>", t),
            Type::Function(params, ret) => {
                let mut parts: Vec<String> = params.iter().map(|p| p.to_string()).collect();
                parts.push(ret.to_string());
                write!(f, "Func<{}>", parts.join(", "))
            }
            Type::Object => write!(f, "Object"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignability() {
        assert!(Type::Object.is_assignable_from(&Type::int32()));
        assert!(Type::Nullable(Primitive::Int32).is_assignable_from(&Type::int32()));
        assert!(!Type::int32().is_assignable_from(&Type::Nullable(Primitive::Int32)));
        assert!(!Type::int64().is_assignable_from(&Type::int32()));
        assert!(
            Type::collection(Type::named("Order"))
                .is_assignable_from(&Type::query(Type::named("Order")))
        );
    }

    #[test]
    fn test_widening() {
        assert!(Primitive::Int32.widens_to(Primitive::Int64));
        assert!(Primitive::Int32.widens_to(Primitive::Decimal));
        assert!(!Primitive::Double.widens_to(Primitive::Decimal));
        assert!(!Primitive::String.widens_to(Primitive::Int32));
    }

    #[test]
    fn test_display() {
        assert_eq!(Type::query(Type::named("Product")).to_string(), "IQueryable<Product>");
        assert_eq!(Type::Nullable(Primitive::Int32).to_string(), "Nullable<Int32>");
    }
}
