use std::collections::HashSet;

use crate::{ComponentIr, IrNode, ValidationIssue, ValidationReport, Validator, IR_SCHEMA_VERSION};

/// Reference [`Validator`] that checks framework-independent IR invariants:
///
/// - the schema version matches [`IR_SCHEMA_VERSION`]
/// - the component name is a non-empty identifier
/// - state fields and event handlers have unique names
/// - `Button::on_press` refers to a declared event handler
/// - `Input::binding` and `List::item_binding` refer to declared state fields
/// - image sources are non-empty
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralValidator;

impl Validator for StructuralValidator {
    fn validate(&self, ir: &ComponentIr) -> ValidationReport {
        let mut issues = Vec::new();

        if ir.schema_version != IR_SCHEMA_VERSION {
            issues.push(issue(
                "schema_version",
                format!(
                    "unsupported IR schema version {} (expected {IR_SCHEMA_VERSION})",
                    ir.schema_version
                ),
            ));
        }

        let name_is_identifier = ir
            .name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic())
            && ir.name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !name_is_identifier {
            issues.push(issue("name", format!("invalid component name {:?}", ir.name)));
        }

        let mut state_names = HashSet::new();
        for (idx, field) in ir.state.iter().enumerate() {
            if !state_names.insert(field.name.as_str()) {
                issues.push(issue(
                    format!("state[{idx}]"),
                    format!("duplicate state field {:?}", field.name),
                ));
            }
        }

        let mut event_names = HashSet::new();
        for (idx, handler) in ir.events.iter().enumerate() {
            if !event_names.insert(handler.name.as_str()) {
                issues.push(issue(
                    format!("events[{idx}]"),
                    format!("duplicate event handler {:?}", handler.name),
                ));
            }
        }

        check_node(&ir.root, "root", &state_names, &event_names, &mut issues);

        ValidationReport::from_issues(issues)
    }
}

fn issue(location: impl Into<String>, message: impl Into<String>) -> ValidationIssue {
    ValidationIssue {
        location: location.into(),
        message: message.into(),
    }
}

fn check_node(
    node: &IrNode,
    location: &str,
    state: &HashSet<&str>,
    events: &HashSet<&str>,
    issues: &mut Vec<ValidationIssue>,
) {
    match node {
        IrNode::Button {
            on_press: Some(handler),
            ..
        } if !events.contains(handler.as_str()) => {
            issues.push(issue(
                location,
                format!("button references undeclared event handler {handler:?}"),
            ));
        }
        IrNode::Input {
            binding: Some(binding),
            ..
        } if !state.contains(binding.as_str()) => {
            issues.push(issue(
                location,
                format!("input binds undeclared state field {binding:?}"),
            ));
        }
        IrNode::List { item_binding, .. } if !state.contains(item_binding.as_str()) => {
            issues.push(issue(
                location,
                format!("list iterates undeclared state field {item_binding:?}"),
            ));
        }
        IrNode::Image { source, .. } if source.trim().is_empty() => {
            issues.push(issue(location, "image source is empty"));
        }
        _ => {}
    }

    match node {
        IrNode::List { template, .. } => {
            check_node(template, &format!("{location}.template"), state, events, issues);
        }
        _ => {
            for (idx, child) in node.children().into_iter().enumerate() {
                check_node(
                    child,
                    &format!("{location}.children[{idx}]"),
                    state,
                    events,
                    issues,
                );
            }
        }
    }
}
