// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! JSX-like text rendering of a decoded model.
//!
//! Unresolved rows render as `Pending`, error rows as `Error: <message>`.
//! Cycles are cut with `[Circular]` by tracking the row ids on the current
//! rendering path.

use futures::FutureExt;

use crate::decoder::DecodedHandle;
use crate::model::{ClientReferenceMeta, FlightElement, FlightModel, FlightValue, ModelRows, Row};
use crate::registry::ClientModuleRegistry;

const MAX_STRING: usize = 50;
const RESOLVE_DEPTH: usize = 32;
const HIDDEN_PROPS: [&str; 5] = ["children", "key", "ref", "__self", "__source"];

static UNKNOWN_TYPE: FlightValue = FlightValue::Undefined;

/// Render the whole model starting at the root row.
pub fn render_tree(model: &FlightModel) -> String {
    let rows = model.read_rows();
    let renderer = Renderer {
        rows: &*rows,
        modules: model.modules(),
    };
    renderer.reference(0, 0, &mut Vec::new())
}

/// Render whatever a decoded handle currently holds, without waiting.
pub fn render_decoded(handle: &DecodedHandle) -> String {
    match handle.clone().now_or_never() {
        None => "Pending".to_string(),
        Some(Ok(model)) => render_tree(&model),
        Some(Err(err)) => format!("Error: {}", err),
    }
}

struct Renderer<'a> {
    rows: &'a ModelRows,
    modules: Option<&'a ClientModuleRegistry>,
}

fn pad(indent: usize) -> String {
    "  ".repeat(indent)
}

fn quote(s: &str) -> String {
    if s.chars().count() > MAX_STRING {
        let head: String = s.chars().take(MAX_STRING).collect();
        format!("\"{}...\"", head)
    } else {
        format!("\"{}\"", s)
    }
}

fn number(n: f64) -> String {
    if n.is_nan() {
        "NaN".into()
    } else if n.is_infinite() {
        let text = if n > 0.0 { "Infinity" } else { "-Infinity" };
        text.into()
    } else if n == 0.0 && n.is_sign_negative() {
        "-0".into()
    } else {
        format!("{}", n)
    }
}

fn client_name(meta: &ClientReferenceMeta) -> &str {
    match meta.name.as_str() {
        "" | "*" | "default" => "Component",
        name => name,
    }
}

impl Renderer<'_> {
    fn missing(&self) -> String {
        if let Some(err) = &self.rows.failure {
            format!("Error: {}", err)
        } else if self.rows.closed {
            "Error: Connection closed.".into()
        } else {
            "Pending".into()
        }
    }

    /// Follow row references to the value they currently hold.
    fn resolve<'v>(&'v self, value: &'v FlightValue) -> &'v FlightValue {
        let mut current = value;
        for _ in 0..RESOLVE_DEPTH {
            match current {
                FlightValue::Reference(id) | FlightValue::Lazy(id) => match self.rows.rows.get(id) {
                    Some(Row::Model(inner)) => current = inner,
                    _ => return current,
                },
                _ => return current,
            }
        }
        current
    }

    fn is_element(&self, value: &FlightValue) -> bool {
        matches!(self.resolve(value), FlightValue::Element(_))
    }

    fn is_scalar(&self, value: &FlightValue) -> bool {
        !matches!(
            self.resolve(value),
            FlightValue::Array(_)
                | FlightValue::Object(_)
                | FlightValue::Element(_)
                | FlightValue::Lazy(_)
                | FlightValue::Promise(_)
                | FlightValue::Reference(_)
        )
    }

    fn value(&self, value: &FlightValue, indent: usize, ancestors: &mut Vec<u32>) -> String {
        match value {
            FlightValue::Null => "null".into(),
            FlightValue::Undefined => "undefined".into(),
            FlightValue::Bool(b) => b.to_string(),
            FlightValue::Number(n) => number(*n),
            FlightValue::BigInt(digits) => format!("{}n", digits),
            FlightValue::String(s) => quote(s),
            FlightValue::Symbol(name) => format!("Symbol({})", name),
            FlightValue::Date(iso) => format!("Date({})", iso),
            FlightValue::Reference(id) | FlightValue::Lazy(id) | FlightValue::Promise(id) => {
                self.reference(*id, indent, ancestors)
            }
            FlightValue::ServerReference(id) => self.server_reference(*id),
            FlightValue::Array(items) => self.array(items, indent, ancestors),
            FlightValue::Object(entries) => self.object(entries, indent, ancestors),
            FlightValue::Element(el) => self.element(el, indent, ancestors),
        }
    }

    fn reference(&self, id: u32, indent: usize, ancestors: &mut Vec<u32>) -> String {
        if ancestors.contains(&id) {
            return "[Circular]".into();
        }
        match self.rows.rows.get(&id) {
            None => self.missing(),
            Some(Row::Model(inner)) => {
                ancestors.push(id);
                let out = self.value(inner, indent, ancestors);
                ancestors.pop();
                out
            }
            Some(Row::Error(message)) => format!("Error: {}", message),
            Some(Row::Text(text)) => quote(text),
            Some(Row::ClientReference(meta)) => format!("[Function: {}]", client_name(meta)),
        }
    }

    fn server_reference(&self, id: u32) -> String {
        match self.rows.rows.get(&id) {
            None => self.missing(),
            Some(Row::Model(value)) => {
                let name = value
                    .get("id")
                    .and_then(FlightValue::as_str)
                    .map(|id| id.rsplit('#').next().unwrap_or(id))
                    .filter(|name| !name.is_empty())
                    .unwrap_or("anonymous");
                format!("[Function: {}]", name)
            }
            Some(Row::Error(message)) => format!("Error: {}", message),
            Some(_) => "[Function: anonymous]".into(),
        }
    }

    fn array(&self, items: &[FlightValue], indent: usize, ancestors: &mut Vec<u32>) -> String {
        if items.is_empty() {
            return "[]".into();
        }
        let multiline = items.len() > 3 || items.iter().any(|v| self.is_element(v));
        if !multiline {
            let parts: Vec<String> = items
                .iter()
                .map(|v| self.value(v, indent + 1, ancestors))
                .collect();
            return format!("[{}]", parts.join(", "));
        }
        let mut out = String::from("[\n");
        for (i, item) in items.iter().enumerate() {
            out.push_str(&pad(indent + 1));
            out.push_str(&self.value(item, indent + 1, ancestors));
            if i + 1 < items.len() {
                out.push(',');
            }
            out.push('\n');
        }
        out.push_str(&pad(indent));
        out.push(']');
        out
    }

    fn object(
        &self,
        entries: &[(String, FlightValue)],
        indent: usize,
        ancestors: &mut Vec<u32>,
    ) -> String {
        if entries.is_empty() {
            return "{}".into();
        }
        if entries.len() <= 2 && entries.iter().all(|(_, v)| self.is_scalar(v)) {
            let parts: Vec<String> = entries
                .iter()
                .map(|(k, v)| format!("{}: {}", k, self.value(v, indent, ancestors)))
                .collect();
            return format!("{{ {} }}", parts.join(", "));
        }
        let mut out = String::from("{\n");
        for (i, (key, value)) in entries.iter().enumerate() {
            out.push_str(&pad(indent + 1));
            out.push_str(key);
            out.push_str(": ");
            out.push_str(&self.value(value, indent + 1, ancestors));
            if i + 1 < entries.len() {
                out.push(',');
            }
            out.push('\n');
        }
        out.push_str(&pad(indent));
        out.push('}');
        out
    }

    /// Tag name for an element type, or the fallback text to render instead.
    fn tag_name(&self, element_type: &FlightValue) -> Result<String, String> {
        match self.resolve_type(element_type) {
            TypeTarget::Value(FlightValue::String(tag)) => Ok(tag.clone()),
            TypeTarget::Value(FlightValue::Symbol(symbol)) => Ok(match symbol.as_str() {
                "react.fragment" => "Fragment",
                "react.profiler" => "Profiler",
                "react.strict_mode" => "StrictMode",
                "react.suspense" => "Suspense",
                "react.suspense_list" => "SuspenseList",
                "react.activity" => "Activity",
                "react.view_transition" => "ViewTransition",
                _ => "Unknown",
            }
            .to_string()),
            TypeTarget::Value(_) => Ok("Unknown".into()),
            TypeTarget::Client(meta) => match self.modules {
                Some(modules) if !modules.resolves(&meta.module_id, &meta.name) => Err(format!(
                    "Error: Could not find the module \"{}#{}\"",
                    meta.module_id, meta.name
                )),
                _ => Ok(client_name(meta).to_string()),
            },
            TypeTarget::Fallback(text) => Err(text),
        }
    }

    fn resolve_type<'v>(&'v self, element_type: &'v FlightValue) -> TypeTarget<'v> {
        match self.resolve(element_type) {
            FlightValue::Reference(id) | FlightValue::Lazy(id) => match self.rows.rows.get(id) {
                None => TypeTarget::Fallback(self.missing()),
                Some(Row::ClientReference(meta)) => TypeTarget::Client(meta),
                Some(Row::Error(message)) => TypeTarget::Fallback(format!("Error: {}", message)),
                Some(_) => TypeTarget::Value(&UNKNOWN_TYPE),
            },
            other => TypeTarget::Value(other),
        }
    }

    fn element(&self, el: &FlightElement, indent: usize, ancestors: &mut Vec<u32>) -> String {
        let tag = match self.tag_name(&el.element_type) {
            Ok(tag) => tag,
            Err(fallback) => return fallback,
        };

        let mut out = format!("<{}", tag);
        if let Some(key) = &el.key {
            out.push_str(&format!(" key=\"{}\"", key));
        }
        for (name, value) in el.props.iter().filter(|(k, _)| !HIDDEN_PROPS.contains(&k.as_str())) {
            out.push_str(&self.prop(name, value, indent + 1, ancestors));
        }

        let children = el.prop("children");
        let empty = match children.map(|c| self.resolve(c)) {
            None | Some(FlightValue::Null) | Some(FlightValue::Undefined) => true,
            Some(FlightValue::Array(items)) => items.is_empty(),
            Some(_) => false,
        };
        let Some(children) = children.filter(|_| !empty) else {
            out.push_str(" />");
            return out;
        };

        out.push('>');
        let complex = !matches!(
            self.resolve(children),
            FlightValue::String(_) | FlightValue::Number(_)
        );
        if complex {
            out.push('\n');
            out.push_str(&pad(indent + 1));
            out.push_str(&self.children(children, indent + 1, ancestors));
            out.push('\n');
            out.push_str(&pad(indent));
        } else {
            out.push_str(&self.children(children, indent + 1, ancestors));
        }
        out.push_str(&format!("</{}>", tag));
        out
    }

    fn prop(
        &self,
        name: &str,
        value: &FlightValue,
        indent: usize,
        ancestors: &mut Vec<u32>,
    ) -> String {
        let resolved = self.resolve(value);
        if let FlightValue::String(s) = resolved {
            return format!(" {}=\"{}\"", name, s);
        }
        if self.is_element(value) {
            return format!(
                " {}={{\n{}{}\n{}}}",
                name,
                pad(indent),
                self.value(value, indent, ancestors),
                pad(indent.saturating_sub(1))
            );
        }
        if let FlightValue::Array(items) = resolved {
            if items.iter().any(|v| self.is_element(v)) {
                let mut out = format!(" {}={{[\n", name);
                for (i, item) in items.iter().enumerate() {
                    out.push_str(&pad(indent));
                    out.push_str(&self.value(item, indent, ancestors));
                    if i + 1 < items.len() {
                        out.push(',');
                    }
                    out.push('\n');
                }
                out.push_str(&pad(indent.saturating_sub(1)));
                out.push_str("]}");
                return out;
            }
        }
        format!(" {}={{{}}}", name, self.value(value, indent, ancestors))
    }

    fn children(&self, value: &FlightValue, indent: usize, ancestors: &mut Vec<u32>) -> String {
        match value {
            FlightValue::Reference(id) | FlightValue::Lazy(id) if !ancestors.contains(id) => {
                match self.rows.rows.get(id) {
                    Some(Row::Model(inner)) => {
                        ancestors.push(*id);
                        let out = self.children(inner, indent, ancestors);
                        ancestors.pop();
                        out
                    }
                    _ => self.value(value, indent, ancestors),
                }
            }
            FlightValue::String(s) => s.clone(),
            FlightValue::Number(n) => format!("{{{}}}", number(*n)),
            FlightValue::Array(items) => {
                let separator = if items.iter().any(|v| self.is_element(v)) {
                    format!("\n{}", pad(indent))
                } else {
                    String::new()
                };
                items
                    .iter()
                    .map(|child| self.children(child, indent, ancestors))
                    .collect::<Vec<_>>()
                    .join(&separator)
            }
            _ => self.value(value, indent, ancestors),
        }
    }
}

enum TypeTarget<'v> {
    Value(&'v FlightValue),
    Client(&'v ClientReferenceMeta),
    Fallback(String),
}
