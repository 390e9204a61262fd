//! Path accumulation for `$select` and `$expand`.

use std::collections::HashMap;

use crate::ast::Parameter;

const ENTIRE_ENTITY: char = '*';

/// Paths collected while walking a projection.
///
/// Each lambda parameter in scope owns a base path (the projection path
/// that was current when its lambda was entered). Reaching the parameter
/// itself starts a new path from that base, ending in the whole-entity
/// marker `*`; each property access then extends the latest path.
#[derive(Debug)]
pub struct PathBox {
    projection_paths: Vec<String>,
    expand_paths: Vec<String>,
    params: Vec<Parameter>,
    base_paths: HashMap<usize, String>,
}

impl Default for PathBox {
    fn default() -> Self {
        Self::new()
    }
}

impl PathBox {
    pub fn new() -> Self {
        Self {
            projection_paths: vec![String::new()],
            expand_paths: Vec::new(),
            params: Vec::new(),
            base_paths: HashMap::new(),
        }
    }

    pub fn push_param(&mut self, p: &Parameter) {
        let base = self.projection_paths.pop().unwrap_or_default();
        self.base_paths.insert(p.id, base);
        self.params.push(p.clone());
    }

    pub fn pop_param(&mut self) {
        self.params.pop();
    }

    pub fn param_in_scope(&self) -> Option<&Parameter> {
        self.params.last()
    }

    pub fn start_new_path(&mut self) {
        let base = self
            .param_in_scope()
            .and_then(|p| self.base_paths.get(&p.id))
            .cloned()
            .unwrap_or_default();
        let mut path = base;
        remove_entire_entity_marker(&mut path);
        self.expand_paths.push(path.clone());
        add_entire_entity_marker(&mut path);
        self.projection_paths.push(path);
    }

    /// Extend the current path with property `name`; `is_entity` says whether
    /// the property's type (or element type) is an entity type.
    pub fn append_to_path(&mut self, name: &str, is_entity: bool) {
        if is_entity {
            if let Some(expand) = self.expand_paths.last_mut() {
                if !expand.is_empty() {
                    expand.push('/');
                }
                expand.push_str(name);
            }
        }
        if let Some(path) = self.projection_paths.last_mut() {
            remove_entire_entity_marker(path);
            if !path.is_empty() {
                path.push('/');
            }
            path.push_str(name);
            if is_entity {
                add_entire_entity_marker(path);
            }
        }
    }

    pub fn projection_paths(&self) -> Vec<String> {
        distinct_non_empty(&self.projection_paths)
    }

    pub fn expand_paths(&self) -> Vec<String> {
        distinct_non_empty(&self.expand_paths)
    }
}

fn add_entire_entity_marker(path: &mut String) {
    if !path.is_empty() {
        path.push('/');
    }
    path.push(ENTIRE_ENTITY);
}

fn remove_entire_entity_marker(path: &mut String) {
    if path.ends_with(ENTIRE_ENTITY) {
        path.pop();
    }
    if path.ends_with('/') {
        path.pop();
    }
}

fn distinct_non_empty(paths: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for p in paths {
        if !p.is_empty() && !out.contains(p) {
            out.push(p.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Type;

    #[test]
    fn test_scalar_and_navigation_paths() {
        let p = Parameter::new("p", Type::named("Product"));
        let mut pb = PathBox::new();
        pb.push_param(&p);

        pb.start_new_path();
        pb.append_to_path("Name", false);

        pb.start_new_path();
        pb.append_to_path("Category", true);
        pb.append_to_path("Name", false);
        pb.pop_param();

        assert_eq!(pb.projection_paths(), vec!["Name", "Category/Name"]);
        assert_eq!(pb.expand_paths(), vec!["Category"]);
    }

    #[test]
    fn test_whole_entity_keeps_marker() {
        let p = Parameter::new("p", Type::named("Product"));
        let mut pb = PathBox::new();
        pb.push_param(&p);
        pb.start_new_path();
        pb.append_to_path("Category", true);
        pb.pop_param();

        assert_eq!(pb.projection_paths(), vec!["Category/*"]);
        assert_eq!(pb.expand_paths(), vec!["Category"]);
    }

    #[test]
    fn test_nested_parameter_builds_on_base() {
        let p = Parameter::new("p", Type::named("Customer"));
        let o = Parameter::new("o", Type::named("Order"));
        let mut pb = PathBox::new();
        pb.push_param(&p);
        pb.start_new_path();
        pb.append_to_path("Orders", true);

        pb.push_param(&o);
        pb.start_new_path();
        pb.append_to_path("Amount", false);
        pb.pop_param();
        pb.pop_param();

        assert_eq!(pb.projection_paths(), vec!["Orders/Amount"]);
        assert_eq!(pb.expand_paths(), vec!["Orders"]);
    }
}
