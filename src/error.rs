//! Error types for query compilation.

use thiserror::Error;

/// A construct the resource algebra or the wire format cannot express.
///
/// These are deterministic: compiling the same expression again reproduces
/// the same error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Unsupported {
    /// A second key predicate on the same resource.
    #[error("Can only specify one key predicate per resource")]
    OneKeyPredicate,

    /// A sequence option added after one it must precede.
    #[error("The {option} query option cannot be specified after the {after} query option")]
    OptionOutOfOrder {
        option: &'static str,
        after: &'static str,
    },

    /// Navigation through a set that has no key predicate.
    #[error("Navigation through a collection requires a key predicate on that collection")]
    NavigateWithoutKey,

    /// Navigation away from a set that carries query options.
    #[error("Query options are only allowed on the leaf resource of a query")]
    QueryOptionsOnlyOnLeaf,

    /// Navigation away from a projected resource.
    #[error("Projection is only allowed on the leaf resource of a query")]
    ProjectionOnlyOnLeaf,

    /// A sequence option or count on a keyed resource.
    #[error("Query options cannot be applied to a single resource")]
    OptionsOnSingleton,

    /// A projection reading a resource other than the leaf.
    #[error("Can only project the last entity type in the query being translated")]
    CanOnlyProjectTheLeaf,

    /// A second projection on the same resource.
    #[error("Cannot translate multiple projections into a single query")]
    OneProjection,

    /// Projection and explicit expansion on one resource.
    #[error("Cannot combine an explicit expansion with a projection")]
    ProjectWithExpansion,

    /// Expand applied to something that is not a resource.
    #[error("Expand can only be applied to a resource in the query")]
    CantExpand,

    /// A count applied to something that is not a resource.
    #[error("A count option can only be added to a resource in the query")]
    CannotAddCount,

    /// A second count option on the same resource.
    #[error("A count option was already specified for this resource")]
    CountConflict,

    /// A custom option added to something that is not a resource.
    #[error("A custom query option can only be added to a resource in the query")]
    CantAddQueryOption,

    /// The same custom option added twice.
    #[error("The query option '{0}' was specified more than once")]
    DuplicateQueryOption(String),

    /// A `$` option given both as a custom and a structured option.
    #[error("The query option '{0}' conflicts with a query option already produced by the query")]
    ReservedQueryOption(String),

    /// A custom option name starting with an unknown `$` name.
    #[error("Custom query option '{0}' cannot start with '$'")]
    DollarQueryOption(String),

    /// A call the binder has no rule for.
    #[error("The method '{0}' is not supported")]
    MethodNotSupported(String),

    /// An expression left over after binding.
    #[error("The expression {0} is not supported")]
    UnsupportedExpression(String),

    /// A node the expression writer cannot render.
    #[error("Could not translate expression {0} into the query string")]
    CantTranslate(String),

    /// A constant with no literal form.
    #[error("Could not convert constant {0} into a literal")]
    CantConvertConstant(String),

    /// A filter or ordering reading a resource other than its own.
    #[error("Referencing a resource other than the current one is not supported: {0}")]
    OtherResource(String),

    /// A projection producing a constant entity.
    #[error("Constructing or initializing instances of an entity type with a constant is not supported")]
    ConstantEntity,

    /// An entity built through constructor arguments.
    #[error("Constructing entity types with constructor arguments is not supported; use member initialization")]
    ConstructKnownEntity,

    /// An entity projection with an illegal member value.
    #[error("Initializing instances of the entity type {ty} with the expression {expr} is not supported")]
    ProjectionToEntity { ty: String, expr: String },

    /// A non-entity projection that leaks an entity or sequence.
    #[error("Constructing or initializing instances of the type {ty} with the expression {expr} is not supported")]
    Projection { ty: String, expr: String },

    /// An entity projection that renames a property.
    #[error("Cannot assign the value of property '{from}' to property '{to}'; property names must match in entity projections")]
    PropertyNamesMustMatch { from: String, to: String },

    /// Entity members assigned from different source entities.
    #[error("Cannot initialize an instance of entity type '{ty}' because '{previous}' and '{candidate}' do not refer to the same source entity")]
    IncompatibleAssignments {
        ty: String,
        previous: String,
        candidate: String,
    },
}

/// Failure raised by the host while evaluating a closed subtree.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    /// Integer or decimal division by zero.
    #[error("Attempted to divide by zero")]
    DivideByZero,

    /// Checked arithmetic or conversion overflow.
    #[error("Arithmetic operation resulted in an overflow")]
    Overflow,

    /// A member or method read through null.
    #[error("Object reference not set to an instance of an object: {0}")]
    NullReference(String),

    /// A conversion the value does not support.
    #[error("Invalid cast from {from} to {to}")]
    InvalidCast { from: String, to: String },

    /// An index or argument out of range.
    #[error("Index was out of range: {0}")]
    OutOfRange(String),

    /// A node the interpreter cannot evaluate.
    #[error("Cannot evaluate {0} locally")]
    NotEvaluable(String),
}

/// The main error type for query compilation.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The query uses a construct the protocol cannot express.
    #[error("Unsupported: {0}")]
    Unsupported(#[from] Unsupported),

    /// Evaluating a parameter-free subtree failed; surfaced unchanged.
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    /// Failed to parse query text.
    #[error("Parse error at position {position}: {message}")]
    Parse { position: usize, message: String },

    /// Query text parsed but does not type-check against the model.
    #[error("Type error: {0}")]
    Type(String),

    /// Invalid metadata model.
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A compiler invariant was violated.
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl QueryError {
    /// Create a parse error at the given position.
    pub fn parse(position: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            position,
            message: message.into(),
        }
    }

    /// Create a typing error.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::Type(message.into())
    }

    /// Create an internal invariant error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// The unsupported-construct detail, if this is one.
    pub fn as_unsupported(&self) -> Option<&Unsupported> {
        match self {
            Self::Unsupported(u) => Some(u),
            _ => None,
        }
    }
}

/// Result type alias for query compilation.
pub type QueryResult<T> = Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = QueryError::parse(5, "unexpected character");
        assert_eq!(
            err.to_string(),
            "Parse error at position 5: unexpected character"
        );
    }

    #[test]
    fn test_unsupported_display() {
        let err: QueryError = Unsupported::OptionOutOfOrder {
            option: "filter",
            after: "skip",
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Unsupported: The filter query option cannot be specified after the skip query option"
        );
        assert!(err.as_unsupported().is_some());
    }

    #[test]
    fn test_evaluation_error_is_transparent() {
        let err: QueryError = EvaluationError::DivideByZero.into();
        assert_eq!(err.to_string(), "Attempted to divide by zero");
    }
}
