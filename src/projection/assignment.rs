//! Which source entity a projected member assignment draws from.

use std::rc::Rc;

use crate::ast::{BinaryOp, Expr, ExprRef, Parameter, SequenceMethod, UnaryOp, is_sequence_call};
use crate::binder::patterns::match_reference_equals;
use crate::error::Unsupported;

/// Walks an assigned expression and records the member chain that starts at
/// the entity parameter, e.g. `[p, p.Category, p.Category.Name]`.
#[derive(Debug)]
pub struct AssignmentAnalysis<'p> {
    entity: &'p Parameter,
    path: Vec<ExprRef>,
    multiple_paths: bool,
    incompatible: Option<Unsupported>,
}

impl<'p> AssignmentAnalysis<'p> {
    pub fn analyze(entity: &'p Parameter, e: &ExprRef) -> Self {
        let mut analysis = Self {
            entity,
            path: Vec::new(),
            multiple_paths: false,
            incompatible: None,
        };
        analysis.visit(e);
        analysis
    }

    pub fn multiple_paths_found(&self) -> bool {
        self.multiple_paths
    }

    /// Set when a nested member-init mixes members of different source entities.
    pub fn incompatible(&self) -> Option<&Unsupported> {
        self.incompatible.as_ref()
    }

    /// The entity the assignment reads from: all but the last path element.
    pub fn to_target(&self) -> &[ExprRef] {
        match self.path.len() {
            0 | 1 => &[],
            n => &self.path[..n - 1],
        }
    }

    /// The member read off the target entity.
    pub fn beyond_target(&self) -> &[ExprRef] {
        match self.path.len() {
            0 => &[],
            1 => &self.path,
            n => &self.path[n - 1..],
        }
    }

    /// Check that this assignment reads from the same entity as the ones
    /// before it in a member-init of `ty`.
    pub fn check_compatible(&self, ty: &str, previous: &mut Option<Vec<ExprRef>>) -> Result<(), Unsupported> {
        let candidate = self.to_target();
        let Some(prev) = previous.as_ref() else {
            *previous = Some(candidate.to_vec());
            return Ok(());
        };
        let incompatible = || Unsupported::IncompatibleAssignments {
            ty: ty.to_string(),
            previous: prev.last().map(|e| e.to_string()).unwrap_or_default(),
            candidate: candidate.last().map(|e| e.to_string()).unwrap_or_default(),
        };
        if prev.len() != candidate.len() {
            return Err(incompatible());
        }
        for (a, b) in prev.iter().zip(candidate) {
            if a == b {
                continue;
            }
            match (&**a, &**b) {
                (Expr::Member { member: ma, .. }, Expr::Member { member: mb, .. }) if ma.name == mb.name => {}
                _ => return Err(incompatible()),
            }
        }
        Ok(())
    }

    fn visit(&mut self, e: &ExprRef) {
        if self.multiple_paths || self.incompatible.is_some() {
            return;
        }
        match &**e {
            Expr::Parameter(p) if p == self.entity => {
                if self.path.is_empty() {
                    self.path.push(e.clone());
                } else {
                    self.multiple_paths = true;
                }
            }
            Expr::Conditional { .. } => match match_null_check(self.entity, e) {
                Some(check) => self.visit(&check.assigned),
                None => self.visit_children(e),
            },
            Expr::Member {
                object: Some(object),
                ..
            } => {
                self.visit(object);
                if self.path.iter().any(|x| Rc::ptr_eq(x, object)) {
                    self.path.push(e.clone());
                }
            }
            Expr::Call { args, .. } if is_sequence_call(e, SequenceMethod::Select) => self.visit(&args[0]),
            Expr::MemberInit { ty, bindings, .. } => {
                let mut previous = None;
                for b in bindings {
                    let nested = AssignmentAnalysis::analyze(self.entity, &b.expr);
                    if let Some(err) = nested.incompatible().cloned() {
                        self.incompatible = Some(err);
                        return;
                    }
                    if let Err(err) = nested.check_compatible(&ty.to_string(), &mut previous) {
                        self.incompatible = Some(err);
                        return;
                    }
                }
            }
            _ => self.visit_children(e),
        }
    }

    fn visit_children(&mut self, e: &ExprRef) {
        for child in e.children() {
            self.visit(&child);
        }
    }
}

/// `x.A == null ? null : x.A.B` and its mirrored forms.
#[derive(Debug, Clone)]
pub struct NullCheck {
    /// The branch taken when the tested member is not null.
    pub assigned: ExprRef,
    pub tested: ExprRef,
}

struct Equality<'e> {
    left: &'e ExprRef,
    right: &'e ExprRef,
    /// Whether the test is true when the two sides are equal.
    yields_true: bool,
}

fn match_equality(test: &ExprRef) -> Option<Equality<'_>> {
    let mut yields_true = true;
    let mut current = test;
    loop {
        if let Some((left, right)) = match_reference_equals(current) {
            return Some(Equality {
                left,
                right,
                yields_true,
            });
        }
        match &**current {
            Expr::Unary {
                op: UnaryOp::Not,
                operand,
                ..
            } => {
                yields_true = !yields_true;
                current = operand;
            }
            Expr::Binary {
                op: op @ (BinaryOp::Equal | BinaryOp::NotEqual),
                left,
                right,
                ..
            } => {
                if *op == BinaryOp::NotEqual {
                    yields_true = !yields_true;
                }
                return Some(Equality {
                    left,
                    right,
                    yields_true,
                });
            }
            _ => return None,
        }
    }
}

/// Recognize the null-propagation idiom in a conditional.
///
/// The branch taken for null must be a null constant, and the tested member
/// must be a prefix of the entity chain the other branch reads from.
pub fn match_null_check(entity: &Parameter, conditional: &ExprRef) -> Option<NullCheck> {
    let Expr::Conditional {
        test,
        if_true,
        if_false,
        ..
    } = &**conditional
    else {
        return None;
    };
    let eq = match_equality(test)?;
    let tested = match (eq.left.is_null_constant(), eq.right.is_null_constant()) {
        (true, false) => eq.right.clone(),
        (false, true) => eq.left.clone(),
        _ => return None,
    };
    let (null_branch, assigned) = if eq.yields_true {
        (if_true, if_false)
    } else {
        (if_false, if_true)
    };
    if !null_branch.is_null_constant() {
        return None;
    }

    let assigned_analysis = AssignmentAnalysis::analyze(entity, assigned);
    if assigned_analysis.multiple_paths_found() {
        return None;
    }
    let tested_analysis = AssignmentAnalysis::analyze(entity, &tested);
    if tested_analysis.multiple_paths_found() {
        return None;
    }
    let assigned_path = assigned_analysis.to_target();
    let tested_path = tested_analysis.to_target();
    if tested_path.len() > assigned_path.len() {
        return None;
    }
    for (t, a) in tested_path.iter().zip(assigned_path) {
        if t == a {
            continue;
        }
        match (&**t, &**a) {
            (Expr::Member { member: mt, .. }, Expr::Member { member: ma, .. }) if mt == ma => {}
            _ => return None,
        }
    }
    Some(NullCheck {
        assigned: assigned.clone(),
        tested,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Type;

    fn product() -> Parameter {
        Parameter::new("p", Type::named("Product"))
    }

    #[test]
    fn test_path_from_entity() {
        let p = product();
        let category = Expr::property(Expr::parameter(&p), "Category", Type::named("Category"));
        let name = Expr::property(category.clone(), "Name", Type::string());
        let a = AssignmentAnalysis::analyze(&p, &name);
        assert_eq!(a.to_target().len(), 2);
        assert_eq!(a.beyond_target(), &[name.clone()]);
        assert!(!a.multiple_paths_found());
    }

    #[test]
    fn test_two_uses_of_parameter() {
        let p = product();
        let id = Expr::property(Expr::parameter(&p), "Id", Type::int32());
        let sum = Expr::binary(BinaryOp::Add, id.clone(), Expr::property(Expr::parameter(&p), "Id", Type::int32()));
        assert!(AssignmentAnalysis::analyze(&p, &sum).multiple_paths_found());
    }

    #[test]
    fn test_null_check_idiom() {
        let p = product();
        let category = Expr::property(Expr::parameter(&p), "Category", Type::named("Category"));
        let name = Expr::property(category.clone(), "Name", Type::string());
        let test = Expr::equal(category.clone(), Expr::null(Type::named("Category")));
        let cond = Expr::conditional(test, Expr::null(Type::string()), name.clone(), Type::string());
        let check = match_null_check(&p, &cond).unwrap();
        assert_eq!(check.assigned, name);
    }

    #[test]
    fn test_null_check_wrong_branch() {
        let p = product();
        let category = Expr::property(Expr::parameter(&p), "Category", Type::named("Category"));
        let name = Expr::property(category.clone(), "Name", Type::string());
        let test = Expr::equal(category, Expr::null(Type::named("Category")));
        let cond = Expr::conditional(test, name, Expr::null(Type::string()), Type::string());
        assert!(match_null_check(&p, &cond).is_none());
    }
}
