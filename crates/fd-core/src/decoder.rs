// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Protocol decoder collaborator and the reference row decoder.
//!
//! A decoder consumes the decode-facing output of a `ChunkBuffer` and hands
//! back a [`DecodedHandle`] immediately. The handle resolves once the root row
//! has been released and keeps reflecting later rows through the shared
//! [`FlightModel`].

use std::fmt;
use std::sync::Arc;

use futures::future::{BoxFuture, Shared};
use futures::{FutureExt, StreamExt};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::error::DecodeError;
use crate::model::{ClientReferenceMeta, FlightElement, FlightModel, FlightValue, Row};
use crate::registry::ClientModuleRegistry;
use crate::stream::ByteStream;

pub type DecodeResult = Result<FlightModel, DecodeError>;

/// Cloneable, lazily-resolving view of a decoded stream.
pub type DecodedHandle = Shared<BoxFuture<'static, DecodeResult>>;

/// Callback the decoded UI uses to invoke a server action by id.
pub type CallServer =
    Arc<dyn Fn(String, Vec<Value>) -> BoxFuture<'static, DecodeResult> + Send + Sync>;

#[derive(Clone, Default)]
pub struct DecodeOptions {
    pub call_server: Option<CallServer>,
    pub modules: Option<ClientModuleRegistry>,
}

impl fmt::Debug for DecodeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodeOptions")
            .field("call_server", &self.call_server.is_some())
            .field("modules", &self.modules)
            .finish()
    }
}

pub trait FlightDecoder: Send + Sync {
    /// Start decoding `output`. Must not block: the stream is cold and only
    /// yields what the owning buffer releases.
    fn decode(&self, output: ByteStream, options: DecodeOptions) -> DecodedHandle;
}

/// A handle that is already rejected.
pub fn rejected(err: DecodeError) -> DecodedHandle {
    futures::future::ready(Err(err)).boxed().shared()
}

/// Decoder for `<hex id>:<payload>` rows.
#[derive(Debug, Clone, Default)]
pub struct RowDecoder;

impl RowDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl FlightDecoder for RowDecoder {
    fn decode(&self, output: ByteStream, options: DecodeOptions) -> DecodedHandle {
        let model = FlightModel::new(options);
        let (tx, rx) = oneshot::channel();
        tokio::spawn(consume(output, model, tx));
        async move { rx.await.unwrap_or(Err(DecodeError::ConnectionClosed)) }
            .boxed()
            .shared()
    }
}

type RootSender = Option<oneshot::Sender<DecodeResult>>;

fn settle(root: &mut RootSender, result: DecodeResult) {
    if let Some(tx) = root.take() {
        let _ = tx.send(result);
    }
}

async fn consume(mut output: ByteStream, model: FlightModel, tx: oneshot::Sender<DecodeResult>) {
    let mut root = Some(tx);
    let mut partial: Vec<u8> = Vec::new();

    while let Some(item) = output.next().await {
        match item {
            Ok(bytes) => {
                partial.extend_from_slice(&bytes);
                while let Some(pos) = partial.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = partial.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
                    process_line(&model, &line, &mut root);
                }
            }
            Err(err) => {
                debug!(error = %err, "decoder input errored");
                let err = DecodeError::Stream(err);
                model.fail(err.clone());
                settle(&mut root, Err(err));
                return;
            }
        }
    }

    if !partial.is_empty() {
        let line = String::from_utf8_lossy(&partial).into_owned();
        process_line(&model, &line, &mut root);
    }
    model.close();
    settle(&mut root, Err(DecodeError::ConnectionClosed));
}

fn process_line(model: &FlightModel, line: &str, root: &mut RootSender) {
    if line.trim().is_empty() {
        return;
    }
    match parse_row(line) {
        Ok(ParsedRow::Hint(hint)) => model.push_hint(hint),
        Ok(ParsedRow::Row(id, row)) => {
            trace!(id, "decoded row");
            let root_outcome = (id == 0).then(|| match &row {
                Row::Error(message) => Err(DecodeError::Server(message.clone())),
                _ => Ok(model.clone()),
            });
            model.insert(id, row);
            if let Some(outcome) = root_outcome {
                settle(root, outcome);
            }
        }
        Err(err) => {
            warn!(error = %err, "dropping malformed row");
            model.fail(err.clone());
            settle(root, Err(err));
        }
    }
}

/// A parsed protocol row.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedRow {
    Row(u32, Row),
    /// Hint, debug or console rows; kept for inspection only.
    Hint(String),
}

fn malformed(line: &str, reason: impl Into<String>) -> DecodeError {
    DecodeError::MalformedRow {
        row: line.to_string(),
        reason: reason.into(),
    }
}

/// Parse one `<hex id>:<payload>` row.
pub fn parse_row(line: &str) -> Result<ParsedRow, DecodeError> {
    let (id, payload) = line
        .split_once(':')
        .ok_or_else(|| malformed(line, "missing row id"))?;
    let id = u32::from_str_radix(id.trim(), 16).map_err(|_| malformed(line, "invalid row id"))?;

    let json = |text: &str| -> Result<Value, DecodeError> {
        serde_json::from_str(text).map_err(|e| malformed(line, e.to_string()))
    };

    let row = match payload.as_bytes().first() {
        Some(b'I') => Row::ClientReference(client_reference(&json(&payload[1..])?).ok_or_else(
            || malformed(line, "client reference must be [id, chunks, name]"),
        )?),
        Some(b'E') => {
            let value = json(&payload[1..])?;
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("An error occurred in the Server Components render.");
            Row::Error(message.to_string())
        }
        Some(b'H' | b'D' | b'W') => return Ok(ParsedRow::Hint(payload.to_string())),
        Some(b'T') => {
            let (_, text) = payload[1..]
                .split_once(',')
                .ok_or_else(|| malformed(line, "text row without length"))?;
            Row::Text(text.to_string())
        }
        _ => Row::Model(to_flight_value(json(payload)?)),
    };
    Ok(ParsedRow::Row(id, row))
}

fn client_reference(value: &Value) -> Option<ClientReferenceMeta> {
    let strings = |v: &Value| -> Vec<String> {
        v.as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|c| c.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    };
    match value {
        Value::Array(items) => Some(ClientReferenceMeta {
            module_id: items.first()?.as_str()?.to_string(),
            chunks: items.get(1).map(strings).unwrap_or_default(),
            name: items.get(2)?.as_str()?.to_string(),
        }),
        Value::Object(map) => Some(ClientReferenceMeta {
            module_id: map.get("id")?.as_str()?.to_string(),
            chunks: map.get("chunks").map(strings).unwrap_or_default(),
            name: map.get("name")?.as_str()?.to_string(),
        }),
        _ => None,
    }
}

/// Convert a JSON model value, interpreting `$` markers.
pub fn to_flight_value(value: Value) -> FlightValue {
    match value {
        Value::Null => FlightValue::Null,
        Value::Bool(b) => FlightValue::Bool(b),
        Value::Number(n) => FlightValue::Number(n.as_f64().unwrap_or(f64::NAN)),
        Value::String(s) => parse_marker(s),
        Value::Array(items) if is_element(&items) => {
            let mut items = items.into_iter().skip(1);
            let element_type = items.next().map(to_flight_value).unwrap_or(FlightValue::Null);
            let key = match items.next() {
                Some(Value::String(k)) => Some(k),
                Some(Value::Null) | None => None,
                Some(other) => Some(other.to_string()),
            };
            let props = match items.next() {
                Some(Value::Object(map)) => map
                    .into_iter()
                    .map(|(k, v)| (k, to_flight_value(v)))
                    .collect(),
                _ => Vec::new(),
            };
            FlightValue::Element(Box::new(FlightElement {
                element_type,
                key,
                props,
            }))
        }
        Value::Array(items) => FlightValue::Array(items.into_iter().map(to_flight_value).collect()),
        Value::Object(map) => FlightValue::Object(
            map.into_iter()
                .map(|(k, v)| (k, to_flight_value(v)))
                .collect(),
        ),
    }
}

fn is_element(items: &[Value]) -> bool {
    items.len() >= 4 && items[0].as_str() == Some("$")
}

fn row_id(hex: &str) -> Option<u32> {
    let hex = hex.split(':').next().unwrap_or(hex);
    u32::from_str_radix(hex, 16).ok()
}

fn parse_marker(s: String) -> FlightValue {
    let Some(rest) = s.strip_prefix('$') else {
        return FlightValue::String(s);
    };
    let tagged = |ctor: fn(u32) -> FlightValue| row_id(&rest[1..]).map(ctor);
    let parsed = match rest {
        "" => None,
        "undefined" => Some(FlightValue::Undefined),
        "NaN" => Some(FlightValue::Number(f64::NAN)),
        "Infinity" => Some(FlightValue::Number(f64::INFINITY)),
        "-Infinity" => Some(FlightValue::Number(f64::NEG_INFINITY)),
        "-0" => Some(FlightValue::Number(-0.0)),
        _ if rest.starts_with('$') => Some(FlightValue::String(rest.to_string())),
        _ if rest.starts_with('L') => tagged(FlightValue::Lazy),
        _ if rest.starts_with('@') => tagged(FlightValue::Promise),
        _ if rest.starts_with('h') || rest.starts_with('F') => tagged(FlightValue::ServerReference),
        _ if rest.starts_with('n') => Some(FlightValue::BigInt(rest[1..].to_string())),
        _ if rest.starts_with('D') => Some(FlightValue::Date(rest[1..].to_string())),
        _ if rest.starts_with('S') => Some(FlightValue::Symbol(rest[1..].to_string())),
        _ => row_id(rest).map(FlightValue::Reference),
    };
    parsed.unwrap_or(FlightValue::String(s))
}
