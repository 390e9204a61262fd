//! Compiler configuration, read from `odq.toml`.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::{QueryError, QueryResult};
use crate::metadata::Model;

pub const CONFIG_FILE: &str = "odq.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompilerConfig {
    /// Service root the relative path is resolved against.
    #[serde(default)]
    pub base_uri: Option<String>,

    /// Emit `()` after an un-keyed leaf set.
    #[serde(default)]
    pub leaf_parens: bool,

    #[serde(default)]
    pub model: Model,
}

impl CompilerConfig {
    pub fn builder() -> CompilerConfigBuilder {
        CompilerConfigBuilder::default()
    }

    /// Parse and validate configuration text.
    pub fn from_toml(text: &str) -> QueryResult<Self> {
        let config: CompilerConfig =
            toml::from_str(text).map_err(|e| QueryError::Config(e.to_string()))?;
        config.model.validate()?;
        if let Some(base) = &config.base_uri {
            Url::parse(base).map_err(|e| QueryError::Config(format!("base_uri '{}': {}", base, e)))?;
        }
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> QueryResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), "loaded configuration");
        Self::from_toml(&text)
    }

    /// Load from `explicit`, else the first of `./odq.toml` and
    /// `<config dir>/odq/odq.toml` that exists, else defaults.
    pub fn discover(explicit: Option<&Path>) -> QueryResult<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match Self::candidates().into_iter().find(|p| p.is_file()) {
            Some(path) => Self::load(path),
            None => {
                debug!("no configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    fn candidates() -> Vec<PathBuf> {
        let mut out = vec![PathBuf::from(CONFIG_FILE)];
        if let Some(dir) = dirs::config_dir() {
            out.push(dir.join("odq").join(CONFIG_FILE));
        }
        out
    }

    pub fn base_url(&self) -> QueryResult<Option<Url>> {
        self.base_uri
            .as_deref()
            .map(|b| Url::parse(b).map_err(|e| QueryError::Config(format!("base_uri '{}': {}", b, e))))
            .transpose()
    }
}

#[derive(Debug, Default)]
pub struct CompilerConfigBuilder {
    config: CompilerConfig,
}

impl CompilerConfigBuilder {
    pub fn base_uri(mut self, uri: impl Into<String>) -> Self {
        self.config.base_uri = Some(uri.into());
        self
    }

    pub fn leaf_parens(mut self, yes: bool) -> Self {
        self.config.leaf_parens = yes;
        self
    }

    pub fn model(mut self, model: Model) -> Self {
        self.config.model = model;
        self
    }

    pub fn build(self) -> CompilerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Type;
    use crate::metadata::ClientTypeInfo;

    const SAMPLE: &str = r#"
base_uri = "http://example.org/Northwind.svc/"
leaf_parens = true

[model]
namespace = "Northwind"

[model.entity_sets]
Products = "Product"

[model.types.Product]
keys = ["Id"]

[model.types.Product.properties]
Id = "Int32"
Name = "String"
"#;

    #[test]
    fn test_parse_sample() {
        let config = CompilerConfig::from_toml(SAMPLE).unwrap();
        assert!(config.leaf_parens);
        assert_eq!(
            config.base_url().unwrap().map(|u| u.to_string()),
            Some("http://example.org/Northwind.svc/".to_string())
        );
        assert_eq!(config.model.key_properties(&Type::named("Product")), vec!["Id".to_string()]);
    }

    #[test]
    fn test_bad_base_uri() {
        let err = CompilerConfig::from_toml("base_uri = \"not a url\"").unwrap_err();
        assert!(matches!(err, QueryError::Config(_)));
    }

    #[test]
    fn test_builder_defaults() {
        let config = CompilerConfig::builder().leaf_parens(true).build();
        assert!(config.leaf_parens);
        assert!(config.base_uri.is_none());
        assert!(config.model.entity_sets.is_empty());
    }
}
