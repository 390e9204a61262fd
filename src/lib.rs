//! # odata-query
//!
//! Compiles LINQ-style query expression trees into OData resource paths and
//! query strings.
//!
//! ## Quick Example
//!
//! ```
//! use odata_query::prelude::*;
//!
//! let model = Model::new("Shop")
//!     .entity_set("Products", "Product")
//!     .entity("Product", &["Id"], &[("Id", "Int32"), ("Name", "String"), ("Price", "Int32")]);
//!
//! let compiled = odata_query::compile(
//!     "Products.Where(p => p.Price > 10).OrderBy(p => p.Name).Take(20)",
//!     &model,
//! )
//! .unwrap();
//! assert_eq!(compiled.path, "/Products?$filter=Price gt 10&$orderby=Name&$top=20");
//! ```
//!
//! ## Pipeline
//!
//! | Stage      | Module           | Does                                           |
//! |------------|------------------|------------------------------------------------|
//! | evaluate   | [`evaluator`]    | folds closed subtrees into constants           |
//! | normalize  | [`normalizer`]   | canonicalizes operator and comparison shapes   |
//! | bind       | [`binder`]       | folds sequence operators into resource nodes   |
//! | write      | [`writer`]       | emits the path, options and protocol version   |

pub mod ast;
pub mod binder;
pub mod compiler;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod metadata;
pub mod normalizer;
pub mod parser;
pub mod projection;
pub mod resource;
pub mod writer;

pub mod prelude {
    pub use crate::ast::*;
    pub use crate::compiler::{CompiledQuery, QueryCompiler};
    pub use crate::config::CompilerConfig;
    pub use crate::error::*;
    pub use crate::evaluator::{HostEvaluator, Interpreter};
    pub use crate::metadata::{ClientTypeInfo, Model};
    pub use crate::parser::{Variables, parse_query};
    pub use crate::writer::ProtocolVersion;
}

/// Parse a method-chain query and compile it against `model`.
///
/// # Example
///
/// ```
/// use odata_query::metadata::Model;
///
/// let model = Model::new("Shop")
///     .entity_set("Products", "Product")
///     .entity("Product", &["Id"], &[("Id", "Int32")]);
/// let compiled = odata_query::compile("Products.Where(p => p.Id == 3)", &model).unwrap();
/// assert_eq!(compiled.path, "/Products(3)");
/// ```
pub fn compile(text: &str, model: &metadata::Model) -> error::QueryResult<compiler::CompiledQuery> {
    let expr = parser::parse_query(text, model, &parser::Variables::new())?;
    compiler::QueryCompiler::new(model).compile(&expr)
}
