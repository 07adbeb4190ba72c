// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

mod common;

use std::sync::Arc;

use common::{capture_sandbox, eventually, RENDER_ROWS};
use fd_core::compiler::build_manifest;
use fd_core::error::StreamError;
use fd_core::{EncodedArgs, Sandbox, WorkerConfig, WorkerRequest, WorkerResponse, WorkerSandbox};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct FakeWorker {
    requests: mpsc::UnboundedReceiver<WorkerRequest>,
    responses: mpsc::UnboundedSender<WorkerResponse>,
}

fn connect(timeout_ms: u64) -> (Arc<WorkerSandbox>, FakeWorker) {
    let (req_tx, req_rx) = mpsc::unbounded_channel();
    let (resp_tx, resp_rx) = mpsc::unbounded_channel();
    let sandbox = WorkerSandbox::connect(
        req_tx,
        resp_rx,
        WorkerConfig {
            ready_timeout_ms: timeout_ms,
        },
        CancellationToken::new(),
    );
    (
        Arc::new(sandbox),
        FakeWorker {
            requests: req_rx,
            responses: resp_tx,
        },
    )
}

async fn collect(stream: fd_core::ByteStream) -> Vec<Result<Vec<u8>, StreamError>> {
    stream.collect().await
}

#[tokio::test]
async fn hosted_runtime_serves_render_and_actions() {
    let runtime = capture_sandbox();
    let worker = WorkerSandbox::spawn(runtime.clone(), WorkerConfig::default());

    worker
        .deploy("code", &build_manifest("client", &[]), &["like".to_string()])
        .await
        .unwrap();
    assert_eq!(runtime.deployment().unwrap().code, "code");

    let rendered: Vec<u8> = collect(worker.render().await.unwrap())
        .await
        .into_iter()
        .flat_map(|chunk| chunk.unwrap())
        .collect();
    assert_eq!(rendered, RENDER_ROWS.as_bytes());

    let action = worker
        .call_action("like", EncodedArgs::String("[1]".into()))
        .await
        .unwrap();
    assert_eq!(collect(action).await, vec![Ok(b"0:{\"count\":6}\n".to_vec())]);

    let Err(err) = worker
        .call_action("nope", EncodedArgs::String("[]".into()))
        .await
    else {
        panic!("unknown action should be rejected");
    };
    assert_eq!(err.message, "Action \"nope\" not found");
}

#[tokio::test]
async fn terminating_the_client_stops_the_hosted_runtime() {
    let runtime = capture_sandbox();
    let worker = WorkerSandbox::spawn(runtime.clone(), WorkerConfig::default());
    worker.terminate();
    assert!(worker.is_terminated());
    eventually(|| runtime.is_terminated()).await;

    let Err(err) = worker.render().await else {
        panic!("render after terminate should be rejected");
    };
    assert_eq!(err.message, "Worker terminated");
}

#[tokio::test]
async fn calls_fail_when_the_worker_never_becomes_ready() {
    let (sandbox, _worker) = connect(50);
    let Err(err) = sandbox.render().await else {
        panic!("render should time out");
    };
    assert_eq!(err.message, "Worker did not become ready within 50 ms");
}

#[tokio::test]
async fn throw_before_data_rejects_the_call() {
    let (sandbox, mut worker) = connect(1000);
    worker.responses.send(WorkerResponse::Ready).unwrap();

    let call = tokio::spawn({
        let sandbox = sandbox.clone();
        async move { sandbox.render().await }
    });
    let request = worker.requests.recv().await.unwrap();
    assert!(matches!(request, WorkerRequest::Render { .. }));
    worker
        .responses
        .send(WorkerResponse::Throw {
            request_id: request.request_id(),
            error: "No code deployed".into(),
            stack: Some("at render".into()),
        })
        .unwrap();

    let Err(err) = call.await.unwrap() else {
        panic!("throw before data should reject the call");
    };
    assert_eq!(err.message, "No code deployed");
    assert_eq!(err.stack.as_deref(), Some("at render"));
}

#[tokio::test]
async fn throw_after_data_errors_the_stream() {
    let (sandbox, mut worker) = connect(1000);
    worker.responses.send(WorkerResponse::Ready).unwrap();

    let call = tokio::spawn({
        let sandbox = sandbox.clone();
        async move { sandbox.render().await }
    });
    let request_id = worker.requests.recv().await.unwrap().request_id();
    worker
        .responses
        .send(WorkerResponse::Next {
            request_id,
            value: b"0:1\n".to_vec(),
        })
        .unwrap();
    worker
        .responses
        .send(WorkerResponse::Throw {
            request_id,
            error: "render failed".into(),
            stack: None,
        })
        .unwrap();

    let mut stream = call.await.unwrap().expect("data arrived first");
    assert_eq!(stream.next().await, Some(Ok(b"0:1\n".to_vec())));
    assert_eq!(
        stream.next().await,
        Some(Err(StreamError::new("render failed")))
    );
}

#[tokio::test]
async fn terminate_fails_pending_calls() {
    let (sandbox, mut worker) = connect(1000);
    worker.responses.send(WorkerResponse::Ready).unwrap();

    let call = tokio::spawn({
        let sandbox = sandbox.clone();
        async move { sandbox.render().await }
    });
    worker.requests.recv().await.unwrap();
    sandbox.terminate();

    let Err(err) = call.await.unwrap() else {
        panic!("pending call should fail on terminate");
    };
    assert_eq!(err.message, "Worker terminated");
}
