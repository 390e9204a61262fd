//! Pipeline driver: evaluate, normalize, bind, write.

use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::ast::{ExprRef, Type};
use crate::binder::{self, BoundQuery};
use crate::error::{QueryError, QueryResult};
use crate::evaluator::{HostEvaluator, Interpreter, partial_eval};
use crate::metadata::ClientTypeInfo;
use crate::normalizer::{RewriteMap, normalize};
use crate::writer::{Builtins, ProtocolVersion, UriWriter};

/// A compiled query: the relative request path plus what a transport and
/// a materializer need to execute it.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    /// Relative path with options, e.g. `/Products?$top=5`.
    pub path: String,
    pub version: ProtocolVersion,
    /// The projection lambda applied to each returned entry, if any.
    pub projection: Option<ExprRef>,
    /// Type of the last resource segment.
    pub last_segment_type: Type,
    /// Normalizer rewrites, for mapping diagnostics back to the input.
    pub rewrites: RewriteMap,
}

/// Printable form of a [`CompiledQuery`].
#[derive(Debug, Clone, Serialize)]
pub struct QuerySummary {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projection: Option<String>,
    pub last_segment_type: String,
}

impl CompiledQuery {
    /// Resolve the path against a service root.
    pub fn uri(&self, base: &Url) -> QueryResult<Url> {
        let mut root = base.clone();
        if !root.path().ends_with('/') {
            let path = format!("{}/", root.path());
            root.set_path(&path);
        }
        root.join(self.path.trim_start_matches('/'))
            .map_err(|e| QueryError::Config(format!("cannot combine '{}' with '{}': {}", base, self.path, e)))
    }

    pub fn summary(&self, base: Option<&Url>) -> QueryResult<QuerySummary> {
        let uri = match base {
            Some(base) => Some(self.uri(base)?.to_string()),
            None => None,
        };
        Ok(QuerySummary {
            path: self.path.clone(),
            uri,
            version: self.version.to_string(),
            projection: self.projection.as_ref().map(|p| p.to_string()),
            last_segment_type: self.last_segment_type.to_string(),
        })
    }
}

/// Every intermediate form of one compilation, for `explain`.
#[derive(Debug, Clone, Serialize)]
pub struct Explanation {
    pub input: String,
    pub evaluated: String,
    pub normalized: String,
    /// `(rewritten, original)` pairs.
    pub rewrites: Vec<(String, String)>,
    pub resources: String,
    pub summary: QuerySummary,
}

pub struct QueryCompiler<'a> {
    types: &'a dyn ClientTypeInfo,
    host: &'a dyn HostEvaluator,
    builtins: Builtins,
    leaf_parens: bool,
}

struct Stages {
    evaluated: ExprRef,
    normalized: ExprRef,
    bound: BoundQuery,
    compiled: CompiledQuery,
}

impl<'a> QueryCompiler<'a> {
    /// A compiler evaluating closed subtrees with the built-in [`Interpreter`].
    pub fn new(types: &'a dyn ClientTypeInfo) -> Self {
        Self {
            types,
            host: &Interpreter,
            builtins: Builtins::new(),
            leaf_parens: false,
        }
    }

    /// Use a different host evaluator for closed subtrees.
    pub fn with_host(mut self, host: &'a dyn HostEvaluator) -> Self {
        self.host = host;
        self
    }

    pub fn leaf_parens(mut self, yes: bool) -> Self {
        self.leaf_parens = yes;
        self
    }

    pub fn compile(&self, expr: &ExprRef) -> QueryResult<CompiledQuery> {
        self.run(expr).map(|stages| stages.compiled)
    }

    pub fn explain(&self, expr: &ExprRef, base: Option<&Url>) -> QueryResult<Explanation> {
        let stages = self.run(expr)?;
        Ok(Explanation {
            input: expr.to_string(),
            evaluated: stages.evaluated.to_string(),
            normalized: stages.normalized.to_string(),
            rewrites: stages
                .compiled
                .rewrites
                .iter()
                .map(|(r, o)| (r.to_string(), o.to_string()))
                .collect(),
            resources: stages.bound.arena.describe(stages.bound.root),
            summary: stages.compiled.summary(base)?,
        })
    }

    fn run(&self, expr: &ExprRef) -> QueryResult<Stages> {
        debug!(input = %expr, "compiling query");

        let evaluated = partial_eval(expr, self.host)?;
        debug!(evaluated = %evaluated, "partial evaluation done");

        let (normalized, rewrites) = normalize(&evaluated, self.types)?;
        debug!(normalized = %normalized, rewrites = rewrites.len(), "normalization done");

        let bound = binder::bind(&normalized, self.types, &self.builtins)?;
        let written = UriWriter::new(&bound.arena, self.types, &self.builtins)
            .leaf_parens(self.leaf_parens)
            .write(bound.root)?;
        debug!(path = %written.path, version = %written.version, "query written");

        let leaf = bound.arena.node(bound.root);
        let compiled = CompiledQuery {
            path: written.path,
            version: written.version,
            projection: leaf.projection.as_ref().map(|p| p.selector.clone()),
            last_segment_type: leaf.resource_type.clone(),
            rewrites,
        };
        Ok(Stages {
            evaluated,
            normalized,
            bound,
            compiled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, Parameter, queryable};
    use crate::metadata::Model;
    use pretty_assertions::assert_eq;

    fn model() -> Model {
        Model::new("Shop")
            .entity_set("Products", "Product")
            .entity("Product", &["Id"], &[("Id", "Int32"), ("Name", "String")])
    }

    fn products() -> ExprRef {
        Expr::root_set("Products", Type::named("Product"))
    }

    #[test]
    fn test_compile_take() {
        let model = model();
        let q = queryable("Take", products(), vec![Expr::literal(5)], Type::query(Type::named("Product")));
        let compiled = QueryCompiler::new(&model).compile(&q).unwrap();
        assert_eq!(compiled.path, "/Products?$top=5");
        assert_eq!(compiled.version, ProtocolVersion::V1);
        assert_eq!(compiled.last_segment_type, Type::named("Product"));
        assert!(compiled.projection.is_none());
    }

    #[test]
    fn test_uri_with_base() {
        let model = model();
        let p = Parameter::new("p", Type::named("Product"));
        let pred = Expr::equal(
            Expr::property(Expr::parameter(&p), "Id", Type::int32()),
            Expr::literal(7),
        );
        let q = queryable(
            "Where",
            products(),
            vec![Expr::lambda(vec![p], pred)],
            Type::query(Type::named("Product")),
        );
        let compiled = QueryCompiler::new(&model).compile(&q).unwrap();
        assert_eq!(compiled.path, "/Products(7)");
        let base = Url::parse("http://example.org/Shop.svc").unwrap();
        assert_eq!(compiled.uri(&base).unwrap().as_str(), "http://example.org/Shop.svc/Products(7)");
    }

    #[test]
    fn test_explain_lists_stages() {
        let model = model();
        let q = queryable("Skip", products(), vec![Expr::literal(2)], Type::query(Type::named("Product")));
        let explanation = QueryCompiler::new(&model).explain(&q, None).unwrap();
        assert_eq!(explanation.summary.path, "/Products?$skip=2");
        assert!(explanation.resources.contains("Products"));
        assert_eq!(explanation.summary.version, "1.0");
    }
}
