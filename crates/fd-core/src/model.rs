// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Decoded UI description: a live, row-addressed value graph.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard};

use serde_json::Value;

use crate::decoder::{CallServer, DecodeOptions, DecodeResult};
use crate::error::DecodeError;
use crate::registry::ClientModuleRegistry;

/// One decoded protocol value.
///
/// References (`Reference`, `Lazy`, `Promise`, `ServerReference`) point at
/// other rows by id and are resolved at read time, so a model keeps
/// improving as more rows arrive.
#[derive(Debug, Clone, PartialEq)]
pub enum FlightValue {
    Null,
    Undefined,
    Bool(bool),
    Number(f64),
    BigInt(String),
    String(String),
    Symbol(String),
    Date(String),
    Array(Vec<FlightValue>),
    Object(Vec<(String, FlightValue)>),
    Reference(u32),
    Lazy(u32),
    Promise(u32),
    ServerReference(u32),
    Element(Box<FlightElement>),
}

impl FlightValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FlightValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Field lookup on an object value.
    pub fn get(&self, key: &str) -> Option<&FlightValue> {
        match self {
            FlightValue::Object(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Lower to plain JSON, re-encoding special values with their wire markers.
    pub fn to_json(&self) -> Value {
        match self {
            FlightValue::Null => Value::Null,
            FlightValue::Undefined => Value::String("$undefined".into()),
            FlightValue::Bool(b) => Value::Bool(*b),
            FlightValue::Number(n) if n.is_nan() => Value::String("$NaN".into()),
            FlightValue::Number(n) if n.is_infinite() && *n > 0.0 => {
                Value::String("$Infinity".into())
            }
            FlightValue::Number(n) if n.is_infinite() => Value::String("$-Infinity".into()),
            FlightValue::Number(n) if *n == 0.0 && n.is_sign_negative() => {
                Value::String("$-0".into())
            }
            FlightValue::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => {
                Value::from(*n as i64)
            }
            FlightValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FlightValue::BigInt(digits) => Value::String(format!("$n{}", digits)),
            FlightValue::String(s) if s.starts_with('$') => Value::String(format!("${}", s)),
            FlightValue::String(s) => Value::String(s.clone()),
            FlightValue::Symbol(name) => Value::String(format!("$S{}", name)),
            FlightValue::Date(iso) => Value::String(format!("$D{}", iso)),
            FlightValue::Array(items) => Value::Array(items.iter().map(|v| v.to_json()).collect()),
            FlightValue::Object(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            FlightValue::Reference(id) => Value::String(format!("${:x}", id)),
            FlightValue::Lazy(id) => Value::String(format!("$L{:x}", id)),
            FlightValue::Promise(id) => Value::String(format!("$@{:x}", id)),
            FlightValue::ServerReference(id) => Value::String(format!("$h{:x}", id)),
            FlightValue::Element(el) => Value::Array(vec![
                Value::String("$".into()),
                el.element_type.to_json(),
                el.key.clone().map(Value::String).unwrap_or(Value::Null),
                Value::Object(
                    el.props
                        .iter()
                        .map(|(k, v)| (k.clone(), v.to_json()))
                        .collect(),
                ),
            ]),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlightElement {
    pub element_type: FlightValue,
    pub key: Option<String>,
    pub props: Vec<(String, FlightValue)>,
}

impl FlightElement {
    pub fn prop(&self, name: &str) -> Option<&FlightValue> {
        self.props.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }
}

/// Import metadata of a client component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientReferenceMeta {
    pub module_id: String,
    pub chunks: Vec<String>,
    pub name: String,
}

/// Content of one protocol row.
#[derive(Debug, Clone, PartialEq)]
pub enum Row {
    Model(FlightValue),
    ClientReference(ClientReferenceMeta),
    Error(String),
    Text(String),
}

/// A server action reachable from the decoded UI.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerReference {
    pub id: String,
    pub bound: Vec<Value>,
}

impl ServerReference {
    /// Display name of the action (the export name part of the id).
    pub fn name(&self) -> &str {
        self.id.rsplit('#').next().unwrap_or(&self.id)
    }
}

#[derive(Debug, Default)]
pub(crate) struct ModelRows {
    pub(crate) rows: HashMap<u32, Row>,
    pub(crate) hints: Vec<String>,
    pub(crate) failure: Option<DecodeError>,
    pub(crate) closed: bool,
}

struct ModelInner {
    rows: RwLock<ModelRows>,
    call_server: Option<CallServer>,
    modules: Option<ClientModuleRegistry>,
}

/// Live handle on a decoded stream. Clones share the same rows.
#[derive(Clone)]
pub struct FlightModel {
    inner: Arc<ModelInner>,
}

impl fmt::Debug for FlightModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows = self.read_rows();
        f.debug_struct("FlightModel")
            .field("rows", &rows.rows.len())
            .field("closed", &rows.closed)
            .field("failure", &rows.failure)
            .finish()
    }
}

impl FlightModel {
    pub(crate) fn new(options: DecodeOptions) -> Self {
        Self {
            inner: Arc::new(ModelInner {
                rows: RwLock::new(ModelRows::default()),
                call_server: options.call_server,
                modules: options.modules,
            }),
        }
    }

    pub(crate) fn read_rows(&self) -> RwLockReadGuard<'_, ModelRows> {
        self.inner.rows.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_rows<R>(&self, f: impl FnOnce(&mut ModelRows) -> R) -> R {
        let mut rows = self.inner.rows.write().unwrap_or_else(|e| e.into_inner());
        f(&mut rows)
    }

    pub(crate) fn insert(&self, id: u32, row: Row) {
        self.write_rows(|rows| {
            rows.rows.insert(id, row);
        });
    }

    pub(crate) fn push_hint(&self, hint: String) {
        self.write_rows(|rows| rows.hints.push(hint));
    }

    pub(crate) fn fail(&self, err: DecodeError) {
        self.write_rows(|rows| {
            rows.failure.get_or_insert(err);
        });
    }

    pub(crate) fn close(&self) {
        self.write_rows(|rows| rows.closed = true);
    }

    /// The root value (row 0), if it has arrived.
    pub fn root(&self) -> Option<Row> {
        self.row(0)
    }

    pub fn row(&self, id: u32) -> Option<Row> {
        self.read_rows().rows.get(&id).cloned()
    }

    pub fn row_count(&self) -> usize {
        self.read_rows().rows.len()
    }

    /// Hint, debug and console rows, in arrival order.
    pub fn hints(&self) -> Vec<String> {
        self.read_rows().hints.clone()
    }

    /// The stream has ended, normally or not.
    pub fn is_complete(&self) -> bool {
        let rows = self.read_rows();
        rows.closed || rows.failure.is_some()
    }

    pub fn failure(&self) -> Option<DecodeError> {
        self.read_rows().failure.clone()
    }

    pub fn modules(&self) -> Option<&ClientModuleRegistry> {
        self.inner.modules.as_ref()
    }

    /// Resolve the server reference stored at `row`.
    pub fn server_reference(&self, row: u32) -> Option<ServerReference> {
        match self.row(row)? {
            Row::Model(value) => server_reference_from(&value),
            _ => None,
        }
    }

    /// All server references currently present, ordered by row id.
    pub fn server_references(&self) -> Vec<(u32, ServerReference)> {
        let rows = self.read_rows();
        // Server references live in the rows that `$h` markers point at.
        let mut targets = Vec::new();
        for row in rows.rows.values() {
            if let Row::Model(v) = row {
                collect_server_targets(v, &mut targets);
            }
        }
        targets.sort_unstable();
        targets.dedup();
        let mut found = Vec::new();
        for id in targets {
            if let Some(Row::Model(v)) = rows.rows.get(&id) {
                if let Some(reference) = server_reference_from(v) {
                    found.push((id, reference));
                }
            }
        }
        found
    }

    /// Invoke the server reference at `row` through the decode-time callback.
    pub async fn call_server_reference(&self, row: u32, args: Vec<Value>) -> DecodeResult {
        let reference = self
            .server_reference(row)
            .ok_or_else(|| DecodeError::Action(format!("row {} is not a server reference", row)))?;
        let call_server = self
            .inner
            .call_server
            .clone()
            .ok_or_else(|| DecodeError::Action("no server callback configured".into()))?;
        let mut all_args = reference.bound;
        all_args.extend(args);
        call_server(reference.id, all_args).await
    }
}

fn collect_server_targets(value: &FlightValue, out: &mut Vec<u32>) {
    match value {
        FlightValue::ServerReference(id) => out.push(*id),
        FlightValue::Array(items) => items.iter().for_each(|v| collect_server_targets(v, out)),
        FlightValue::Object(entries) => entries
            .iter()
            .for_each(|(_, v)| collect_server_targets(v, out)),
        FlightValue::Element(el) => {
            collect_server_targets(&el.element_type, out);
            el.props
                .iter()
                .for_each(|(_, v)| collect_server_targets(v, out));
        }
        _ => {}
    }
}

fn server_reference_from(value: &FlightValue) -> Option<ServerReference> {
    let id = value.get("id")?.as_str()?.to_string();
    let bound = match value.get("bound") {
        Some(FlightValue::Array(items)) => items.iter().map(|v| v.to_json()).collect(),
        _ => Vec::new(),
    };
    Some(ServerReference { id, bound })
}
