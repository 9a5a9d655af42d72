//! Change-detection traversal
//!
//! Walks the same parse tree as evaluation, but instead of computing values it
//! asks the resolver whether each referenced parameter changed, and whether
//! the change arrived through an asynchronous push. This is what lets the
//! engine decide, cheaply, whether a COMPUTED parameter must be re-evaluated
//! and whether an ACTIVE notification is due.
//!
//! Guards short-circuit: a false guard condition means the guarded subtree is
//! neither evaluated nor treated as changed, no matter what its dependencies
//! did.

use super::context::{ChangeProbe, ValueResolver};
use super::engine::eval_bool;
use crate::ast::ExpressionNode;
use crate::error::DmResult;

/// Probe whether any dependency of `expr` changed
pub fn is_changed(
    expr: &ExpressionNode,
    resolver: &mut dyn ValueResolver,
    dest: &str,
) -> DmResult<ChangeProbe> {
    match expr {
        ExpressionNode::StringLiteral(_) | ExpressionNode::Number(_) => {
            Ok(ChangeProbe::default())
        }
        ExpressionNode::Identifier(name) => resolver.is_value_changed(name, dest),
        ExpressionNode::Unary { operand, .. } => is_changed(operand, resolver, dest),
        ExpressionNode::Binary { left, right, .. } => {
            let probe = is_changed(left, resolver, dest)?;
            Ok(probe.merge(is_changed(right, resolver, dest)?))
        }
        ExpressionNode::Guard { condition, body } => {
            match eval_bool(condition, resolver, dest)? {
                Some(true) => {
                    let probe = is_changed(condition, resolver, dest)?;
                    Ok(probe.merge(is_changed(body, resolver, dest)?))
                }
                _ => Ok(ChangeProbe::default()),
            }
        }
        ExpressionNode::Call { name, args } => match name.as_str() {
            "Class" | "DiffTime" => {
                let mut probe = ChangeProbe::default();
                for arg in args {
                    probe = probe.merge(is_changed(arg, resolver, dest)?);
                }
                Ok(probe)
            }
            other => match other.rsplit_once('.') {
                Some((prefix, suffix)) => {
                    resolver.is_value_changed(&format!("{prefix}!{suffix}"), dest)
                }
                None => Ok(ChangeProbe::default()),
            },
        },
        ExpressionNode::List(items) => {
            let mut probe = ChangeProbe::default();
            for item in items {
                probe = probe.merge(is_changed(item, resolver, dest)?);
            }
            Ok(probe)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DmResult, Fault};
    use crate::parser::parse;

    /// Table resolver where some names are flagged as changed
    struct Probing {
        values: Vec<(&'static str, &'static str)>,
        changed: Vec<&'static str>,
        pushed: Vec<&'static str>,
    }

    impl ValueResolver for Probing {
        fn get_value(&mut self, name: &str, _dest: &str) -> DmResult<String> {
            self.values
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, v)| (*v).to_string())
                .ok_or_else(|| Fault::InvalidParameterName(name.to_string()))
        }

        fn is_value_changed(&mut self, name: &str, _dest: &str) -> DmResult<ChangeProbe> {
            Ok(ChangeProbe {
                changed: self.changed.contains(&name),
                pushed: self.pushed.contains(&name),
            })
        }
    }

    #[test]
    fn false_guard_masks_changed_dependency() {
        let expr = parse("X ? Y").unwrap();
        let mut resolver = Probing {
            values: vec![("X", "0"), ("Y", "1")],
            changed: vec!["Y"],
            pushed: vec![],
        };
        let probe = is_changed(&expr, &mut resolver, "D").unwrap();
        assert!(!probe.changed);
        assert!(!probe.pushed);
    }

    #[test]
    fn true_guard_propagates_changes_and_push() {
        let expr = parse("X ? Y").unwrap();
        let mut resolver = Probing {
            values: vec![("X", "1"), ("Y", "1")],
            changed: vec!["Y"],
            pushed: vec!["Y"],
        };
        let probe = is_changed(&expr, &mut resolver, "D").unwrap();
        assert!(probe.changed);
        assert!(probe.pushed);
    }

    #[test]
    fn binary_merges_both_sides() {
        let expr = parse("A + B").unwrap();
        let mut resolver = Probing {
            values: vec![],
            changed: vec!["B"],
            pushed: vec![],
        };
        let probe = is_changed(&expr, &mut resolver, "D").unwrap();
        assert!(probe.changed);
        assert!(!probe.pushed);
    }

    #[test]
    fn synthetic_call_probes_bang_parameter() {
        let expr = parse("Rtt.Average()").unwrap();
        let mut resolver = Probing {
            values: vec![],
            changed: vec!["Rtt!Average"],
            pushed: vec![],
        };
        assert!(is_changed(&expr, &mut resolver, "D").unwrap().changed);
    }
}
