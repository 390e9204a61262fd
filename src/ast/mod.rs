//! Expression graph consumed by the compiler.
//!
//! The graph mirrors a host expression-tree API: constants, parameters,
//! lambdas, operators, calls, member accesses, object construction and
//! conditionals, plus three nodes the compiler introduces while binding:
//! unbound root sets, bound resources and resource back-references.

pub mod build;
pub mod display;
pub mod expr;
pub mod sequence;
pub mod types;
pub mod value;
pub mod visit;

pub use build::{binary_result_type, queryable, string_method};
pub use expr::*;
pub use sequence::{SequenceMethod, is_sequence_call};
pub use types::{Field, Primitive, Type};
pub use value::Value;
pub use visit::{Rewriter, any_node, mentions, rewrite_children, substitute};
