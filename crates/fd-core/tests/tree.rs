// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

mod common;

use common::{eventually, RENDERED_TREE, RENDER_ROWS};
use fd_core::decoder::{DecodeOptions, FlightDecoder};
use fd_core::error::DecodeError;
use fd_core::stream::from_chunks;
use fd_core::{render_decoded, render_tree, ChunkBuffer, ClientModuleRegistry, RowDecoder};

fn client_modules() -> ClientModuleRegistry {
    let modules = ClientModuleRegistry::new();
    modules.register("client", vec!["Button".into()]);
    modules
}

fn options(modules: Option<ClientModuleRegistry>) -> DecodeOptions {
    DecodeOptions {
        call_server: None,
        modules,
    }
}

#[tokio::test]
async fn renders_client_components_and_server_references() {
    let handle = RowDecoder::new().decode(
        from_chunks(vec![RENDER_ROWS.as_bytes().to_vec()]),
        options(Some(client_modules())),
    );
    let model = handle.await.expect("root row decodes");
    assert_eq!(render_tree(&model), RENDERED_TREE);
}

#[tokio::test]
async fn unknown_client_module_renders_as_error() {
    let rows = concat!(
        "1:I[\"client\",[],\"Missing\"]\n",
        "0:[\"$\",\"$L1\",null,{}]\n",
    );
    let handle = RowDecoder::new().decode(
        from_chunks(vec![rows.as_bytes().to_vec()]),
        options(Some(client_modules())),
    );
    let model = handle.await.unwrap();
    assert_eq!(
        render_tree(&model),
        "Error: Could not find the module \"client#Missing\""
    );

    let handle =
        RowDecoder::new().decode(from_chunks(vec![rows.as_bytes().to_vec()]), options(None));
    assert_eq!(render_tree(&handle.await.unwrap()), "<Missing />");
}

#[tokio::test]
async fn cycles_are_cut() {
    let handle = RowDecoder::new().decode(
        from_chunks(vec![b"0:{\"self\":\"$0\",\"n\":1}\n".to_vec()]),
        options(None),
    );
    let model = handle.await.unwrap();
    assert_eq!(render_tree(&model), "{\n  self: [Circular],\n  n: 1\n}");
}

#[tokio::test]
async fn missing_rows_are_pending_until_the_stream_closes() {
    let body = "0:[\"$\",\"div\",null,{\"children\":\"$1\"}]\n";
    let buffer = ChunkBuffer::new(
        from_chunks(vec![body.as_bytes().to_vec()]),
        &RowDecoder::new(),
        options(None),
    );
    let handle = buffer.decoded();
    buffer.wait_done().await;
    assert_eq!(render_decoded(&handle), "Pending");

    buffer.release(1);
    let model = handle.clone().await.unwrap();
    eventually(|| model.is_complete()).await;
    assert_eq!(
        render_decoded(&handle),
        "<div>\n  Error: Connection closed.\n</div>"
    );
}

#[tokio::test]
async fn partially_released_tree_shows_pending_children() {
    let body = "0:[\"$\",\"div\",null,{\"children\":\"$1\"}]\n1:\"hello\"\n";
    let buffer = ChunkBuffer::new(
        from_chunks(vec![body.as_bytes().to_vec()]),
        &RowDecoder::new(),
        options(None),
    );
    buffer.wait_done().await;
    buffer.release(1);
    let model = buffer.decoded().await.unwrap();
    assert_eq!(render_tree(&model), "<div>\n  Pending\n</div>");

    buffer.release(2);
    eventually(|| model.is_complete()).await;
    assert_eq!(render_tree(&model), "<div>hello</div>");
}

#[tokio::test]
async fn server_error_rows_reject_the_root() {
    let handle = RowDecoder::new().decode(
        from_chunks(vec![b"0:E{\"message\":\"boom\"}\n".to_vec()]),
        options(None),
    );
    assert_eq!(handle.clone().await.unwrap_err(), DecodeError::Server("boom".into()));
    assert_eq!(render_decoded(&handle), "Error: boom");
}

#[tokio::test]
async fn closing_before_the_root_rejects() {
    let handle = RowDecoder::new().decode(from_chunks(vec![b"1:\"x\"\n".to_vec()]), options(None));
    assert_eq!(handle.await.unwrap_err(), DecodeError::ConnectionClosed);
}

#[tokio::test]
async fn long_strings_are_truncated() {
    let long = "x".repeat(60);
    let body = format!("0:{{\"text\":\"{}\"}}\n", long);
    let handle = RowDecoder::new().decode(from_chunks(vec![body.into_bytes()]), options(None));
    let model = handle.await.unwrap();
    assert_eq!(
        render_tree(&model),
        format!("{{ text: \"{}...\" }}", "x".repeat(50))
    );
}
