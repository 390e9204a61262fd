//! Textual front-end for method-chain queries.
//!
//! # Example
//!
//! ```
//! use odata_query::metadata::Model;
//! use odata_query::parser::{parse_query, Variables};
//!
//! let model = Model::new("Shop")
//!     .entity_set("Products", "Product")
//!     .entity("Product", &["Id"], &[("Id", "Int32"), ("Name", "String")]);
//! let expr = parse_query("Products.Where(p => p.Id > 3)", &model, &Variables::new()).unwrap();
//! assert!(expr.ty().is_sequence());
//! ```

pub mod lower;
pub mod syntax;

use tracing::debug;

use crate::ast::ExprRef;
use crate::error::QueryResult;
use crate::metadata::Model;

pub use lower::{Variables, lower};
pub use syntax::{Syntax, parse};

/// Parse `text` and type it against `model`.
pub fn parse_query(text: &str, model: &Model, variables: &Variables) -> QueryResult<ExprRef> {
    let syntax = syntax::parse(text)?;
    let expr = lower::lower(&syntax, model, variables)?;
    debug!(input = text, lowered = %expr, "parsed query");
    Ok(expr)
}
