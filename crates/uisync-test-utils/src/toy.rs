//! A tiny line-oriented component format used as both sides' "source language" in tests.
//!
//! ```text
//! # comments are ignored
//! component Button
//! state count=0
//! event increment="count += 1"
//! node container layout=row
//!   node button label="Click" on_press="increment" variant="primary"
//!   node text content="Hello"
//! ```
//!
//! `node` lines nest by two-space indentation; the first `node` at depth 0 is the root.
//! Two directives exist for exercising the pool: `!sleep <ms>` blocks the parser and `!panic`
//! crashes it.

use std::path::Path;
use std::time::Duration;

use uisync_core::{
    Ast, AstNode, AstToIr, ComponentIr, ConversionError, EventHandler, GenerationError, Generator,
    IrNode, Layout, ParseError, Parser, PropValue, Props, Side, StateField,
};

const STATE: &str = "@state";
const EVENT: &str = "@event";

#[derive(Debug, Clone, Copy)]
pub struct ToyParser {
    side: Side,
}

impl ToyParser {
    pub fn new(side: Side) -> Self {
        Self { side }
    }
}

struct Token {
    column: u32,
    text: String,
}

fn tokenize(line: &str, line_no: u32) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut start = 0u32;
    let mut in_quotes = false;

    for (idx, c) in line.chars().enumerate() {
        let column = idx as u32 + 1;
        match c {
            '"' => {
                if current.is_empty() {
                    start = column;
                }
                in_quotes = !in_quotes;
                current.push(c);
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(Token {
                        column: start,
                        text: std::mem::take(&mut current),
                    });
                }
            }
            c => {
                if current.is_empty() {
                    start = column;
                }
                current.push(c);
            }
        }
    }

    if in_quotes {
        return Err(ParseError::new(line_no, start, "unterminated string"));
    }
    if !current.is_empty() {
        tokens.push(Token {
            column: start,
            text: current,
        });
    }
    Ok(tokens)
}

fn parse_value(raw: &str) -> PropValue {
    if let Some(inner) = raw.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        return PropValue::String(inner.to_owned());
    }
    match raw {
        "true" => PropValue::Bool(true),
        "false" => PropValue::Bool(false),
        "null" => PropValue::Null,
        _ => raw
            .parse::<f64>()
            .map(PropValue::Number)
            .unwrap_or_else(|_| PropValue::String(raw.to_owned())),
    }
}

fn parse_attribute(token: &Token, line_no: u32) -> Result<(String, PropValue), ParseError> {
    match token.text.split_once('=') {
        Some((key, value)) if !key.is_empty() && !value.is_empty() => {
            Ok((key.to_owned(), parse_value(value)))
        }
        _ => Err(ParseError::new(
            line_no,
            token.column,
            format!("expected key=value, found {:?}", token.text),
        )),
    }
}

impl Parser for ToyParser {
    fn parse(&self, source: &str, path: &Path) -> Result<Ast, ParseError> {
        let mut name: Option<String> = None;
        let mut declarations = Vec::new();
        // (depth, node) chain from the root to the most recent node.
        let mut stack: Vec<(usize, AstNode)> = Vec::new();
        let mut root: Option<AstNode> = None;

        for (idx, raw_line) in source.lines().enumerate() {
            let line_no = idx as u32 + 1;
            let trimmed = raw_line.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let indent = raw_line.len() - trimmed.len();
            let tokens = tokenize(raw_line, line_no)?;
            let Some(head) = tokens.first() else {
                continue;
            };

            match head.text.as_str() {
                "!panic" => panic!("toy parser crashed on {}", path.display()),
                "!sleep" => {
                    let ms = tokens
                        .get(1)
                        .and_then(|t| t.text.parse::<u64>().ok())
                        .ok_or_else(|| ParseError::new(line_no, head.column, "!sleep needs millis"))?;
                    std::thread::sleep(Duration::from_millis(ms));
                }
                "component" => {
                    let Some(value) = tokens.get(1) else {
                        return Err(ParseError::new(line_no, head.column, "missing component name"));
                    };
                    if name.is_some() {
                        return Err(ParseError::new(line_no, head.column, "duplicate component line"));
                    }
                    name = Some(value.text.clone());
                }
                "state" | "event" => {
                    let kind = if head.text == "state" { STATE } else { EVENT };
                    for token in &tokens[1..] {
                        let (key, value) = parse_attribute(token, line_no)?;
                        let node = AstNode::new(kind)
                            .with_attribute("name", PropValue::String(key))
                            .with_attribute("value", value)
                            .with_span(line_no, token.column);
                        declarations.push(node);
                    }
                }
                "node" => {
                    if indent % 2 != 0 {
                        return Err(ParseError::new(line_no, 1, "indentation must be a multiple of two"));
                    }
                    let depth = indent / 2;
                    let Some(kind) = tokens.get(1) else {
                        return Err(ParseError::new(line_no, head.column, "missing node kind"));
                    };
                    let mut node = AstNode::new(kind.text.clone()).with_span(line_no, head.column);
                    for token in &tokens[2..] {
                        let (key, value) = parse_attribute(token, line_no)?;
                        node = node.with_attribute(key, value);
                    }

                    while stack.last().is_some_and(|(d, _)| *d >= depth) {
                        fold_top(&mut stack, &mut root);
                    }
                    let expected = stack.last().map_or(0, |(d, _)| d + 1);
                    if depth != expected || (depth == 0 && root.is_some()) {
                        return Err(ParseError::new(line_no, head.column, "unexpected indentation"));
                    }
                    stack.push((depth, node));
                }
                other => {
                    return Err(ParseError::new(
                        line_no,
                        head.column,
                        format!("unknown directive {other:?}"),
                    ))
                }
            }
        }

        while !stack.is_empty() {
            fold_top(&mut stack, &mut root);
        }

        let Some(name) = name else {
            return Err(ParseError::new(1, 1, "missing `component` line"));
        };
        let mut component = AstNode::new("component").with_attribute("name", PropValue::String(name));
        component.children = declarations;
        component.children.extend(root);
        Ok(Ast {
            side: self.side,
            root: component,
        })
    }
}

fn fold_top(stack: &mut Vec<(usize, AstNode)>, root: &mut Option<AstNode>) {
    let Some((_, node)) = stack.pop() else {
        return;
    };
    match stack.last_mut() {
        Some((_, parent)) => parent.children.push(node),
        None => *root = Some(node),
    }
}

/// Converts toy ASTs (from either side) into IR.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToyConverter;

fn take_string(attrs: &mut Props, key: &str, kind: &str) -> Result<String, ConversionError> {
    match attrs.remove(key) {
        Some(PropValue::String(value)) => Ok(value),
        Some(other) => Err(ConversionError::new(format!(
            "{kind}.{key} must be a string, found {other:?}"
        ))),
        None => Err(ConversionError::new(format!("{kind} requires `{key}`"))),
    }
}

fn take_optional_string(attrs: &mut Props, key: &str, kind: &str) -> Result<Option<String>, ConversionError> {
    if attrs.contains_key(key) {
        take_string(attrs, key, kind).map(Some)
    } else {
        Ok(None)
    }
}

fn convert_node(node: &AstNode) -> Result<IrNode, ConversionError> {
    let mut props = node.attributes.clone();
    let kind = node.kind.as_str();
    let children = || node.children.iter().map(convert_node).collect::<Result<Vec<_>, _>>();

    let ir = match kind {
        "container" => {
            let layout = match take_optional_string(&mut props, "layout", kind)?.as_deref() {
                None | Some("column") => Layout::Column,
                Some("row") => Layout::Row,
                Some("stack") => Layout::Stack,
                Some(other) => {
                    return Err(ConversionError::new(format!("unknown layout {other:?}")))
                }
            };
            IrNode::Container {
                layout,
                children: children()?,
                props,
            }
        }
        "text" => IrNode::Text {
            content: take_string(&mut props, "content", kind)?,
            props,
        },
        "button" => IrNode::Button {
            label: take_string(&mut props, "label", kind)?,
            on_press: take_optional_string(&mut props, "on_press", kind)?,
            props,
        },
        "image" => IrNode::Image {
            source: take_string(&mut props, "source", kind)?,
            props,
        },
        "input" => IrNode::Input {
            binding: take_optional_string(&mut props, "binding", kind)?,
            props,
        },
        "list" => {
            let item_binding = take_string(&mut props, "item_binding", kind)?;
            let mut templates = children()?;
            if templates.len() != 1 {
                return Err(ConversionError::new("list needs exactly one template child"));
            }
            IrNode::List {
                item_binding,
                template: Box::new(templates.remove(0)),
                props,
            }
        }
        "component" => IrNode::Component {
            name: take_string(&mut props, "name", kind)?,
            children: children()?,
            props,
        },
        other => return Err(ConversionError::new(format!("unsupported node kind {other:?}"))),
    };

    if !matches!(ir, IrNode::Container { .. } | IrNode::Component { .. } | IrNode::List { .. })
        && !node.children.is_empty()
    {
        return Err(ConversionError::new(format!("{kind} cannot have children")));
    }
    Ok(ir)
}

impl AstToIr for ToyConverter {
    fn convert(&self, ast: &Ast) -> Result<ComponentIr, ConversionError> {
        let component = &ast.root;
        let name = component
            .attribute("name")
            .and_then(PropValue::as_str)
            .ok_or_else(|| ConversionError::new("component has no name"))?;

        let mut state = Vec::new();
        let mut events = Vec::new();
        let mut root = None;
        for child in &component.children {
            let decl_name = || {
                child
                    .attribute("name")
                    .and_then(PropValue::as_str)
                    .map(str::to_owned)
                    .ok_or_else(|| ConversionError::new("declaration without a name"))
            };
            match child.kind.as_str() {
                STATE => state.push(StateField {
                    name: decl_name()?,
                    initial: child.attribute("value").cloned().unwrap_or(PropValue::Null),
                }),
                EVENT => events.push(EventHandler {
                    name: decl_name()?,
                    action: match child.attribute("value") {
                        Some(PropValue::String(action)) => action.clone(),
                        Some(other) => {
                            return Err(ConversionError::new(format!(
                                "event action must be a string, found {other:?}"
                            )))
                        }
                        None => String::new(),
                    },
                }),
                _ => root = Some(convert_node(child)?),
            }
        }

        let root = root.ok_or_else(|| ConversionError::new("component has no root node"))?;
        let mut ir = ComponentIr::new(name, root);
        ir.state = state;
        ir.events = events;
        Ok(ir)
    }
}

/// Renders IR back into the toy format, with a side-specific header comment.
#[derive(Debug, Clone, Copy)]
pub struct ToyGenerator {
    side: Side,
}

impl ToyGenerator {
    pub fn new(side: Side) -> Self {
        Self { side }
    }
}

fn render_value(value: &PropValue) -> Result<String, GenerationError> {
    match value {
        PropValue::Null => Ok("null".to_owned()),
        PropValue::Bool(b) => Ok(b.to_string()),
        PropValue::Number(n) => Ok(n.to_string()),
        PropValue::String(s) if s.contains('"') => Err(GenerationError::new(format!(
            "strings containing quotes are not representable: {s:?}"
        ))),
        PropValue::String(s) => Ok(format!("\"{s}\"")),
        PropValue::Array(_) | PropValue::Object(_) => Err(GenerationError::new(
            "structured prop values are not representable",
        )),
    }
}

fn render_node(node: &IrNode, depth: usize, out: &mut String) -> Result<(), GenerationError> {
    let mut fields: Vec<(String, String)> = Vec::new();
    let (kind, children): (&str, Vec<&IrNode>) = match node {
        IrNode::Container { layout, .. } => {
            let layout = match layout {
                Layout::Column => "column",
                Layout::Row => "row",
                Layout::Stack => "stack",
            };
            fields.push(("layout".into(), layout.into()));
            ("container", node.children())
        }
        IrNode::Text { content, .. } => {
            fields.push(("content".into(), render_value(&PropValue::from(content.as_str()))?));
            ("text", Vec::new())
        }
        IrNode::Button { label, on_press, .. } => {
            fields.push(("label".into(), render_value(&PropValue::from(label.as_str()))?));
            if let Some(handler) = on_press {
                fields.push(("on_press".into(), render_value(&PropValue::from(handler.as_str()))?));
            }
            ("button", Vec::new())
        }
        IrNode::Image { source, .. } => {
            fields.push(("source".into(), render_value(&PropValue::from(source.as_str()))?));
            ("image", Vec::new())
        }
        IrNode::Input { binding, .. } => {
            if let Some(binding) = binding {
                fields.push(("binding".into(), render_value(&PropValue::from(binding.as_str()))?));
            }
            ("input", Vec::new())
        }
        IrNode::List { item_binding, .. } => {
            fields.push((
                "item_binding".into(),
                render_value(&PropValue::from(item_binding.as_str()))?,
            ));
            ("list", node.children())
        }
        IrNode::Component { name, .. } => {
            fields.push(("name".into(), render_value(&PropValue::from(name.as_str()))?));
            ("component", node.children())
        }
    };
    for (key, value) in node.props() {
        fields.push((key.clone(), render_value(value)?));
    }

    out.push_str(&"  ".repeat(depth));
    out.push_str("node ");
    out.push_str(kind);
    for (key, value) in fields {
        out.push(' ');
        out.push_str(&key);
        out.push('=');
        out.push_str(&value);
    }
    out.push('\n');

    for child in children {
        render_node(child, depth + 1, out)?;
    }
    Ok(())
}

impl Generator for ToyGenerator {
    fn generate(&self, ir: &ComponentIr) -> Result<String, GenerationError> {
        let mut out = format!("# generated by uisync for side {}\n", self.side);
        out.push_str(&format!("component {}\n", ir.name));
        for field in &ir.state {
            out.push_str(&format!("state {}={}\n", field.name, render_value(&field.initial)?));
        }
        for handler in &ir.events {
            out.push_str(&format!(
                "event {}={}\n",
                handler.name,
                render_value(&PropValue::from(handler.action.as_str()))?
            ));
        }
        render_node(&ir.root, 0, &mut out)?;
        Ok(out)
    }
}

/// Source text for a simple "Button" component.
pub fn button_source(label: &str, variant: &str) -> String {
    format!(
        "# Button component\n\
         component Button\n\
         event press=\"submit\"\n\
         node container layout=row\n  \
         node button label=\"{label}\" on_press=\"press\" variant=\"{variant}\"\n"
    )
}
