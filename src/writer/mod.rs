//! Serialization of bound queries into the wire format.
//!
//! [`ExpressionWriter`] renders scalar and predicate expressions in the
//! protocol's operator/function syntax; [`UriWriter`] renders the resource
//! tree as a path plus query options and tracks the minimum protocol version
//! the emitted features need.

pub mod expression;
pub mod literal;
pub mod methods;
pub mod uri;

use std::fmt;

use serde::Serialize;

pub use expression::ExpressionWriter;
pub use methods::Builtins;
pub use uri::{UriWriter, WrittenQuery};

/// Protocol version a request needs, sent by the transport as a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    pub const V1: ProtocolVersion = ProtocolVersion { major: 1, minor: 0 };
    pub const V2: ProtocolVersion = ProtocolVersion { major: 2, minor: 0 };

    /// Raise to at least `required`; never lowers.
    pub fn raise(&mut self, required: ProtocolVersion) {
        if required > *self {
            *self = required;
        }
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::V1
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_only_rises() {
        let mut v = ProtocolVersion::default();
        assert_eq!(v.to_string(), "1.0");
        v.raise(ProtocolVersion::V2);
        v.raise(ProtocolVersion::V1);
        assert_eq!(v, ProtocolVersion::V2);
    }
}
