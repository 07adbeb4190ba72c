// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

mod common;

use common::{
    capture_sandbox, eventually, parts_with, session_parts, RenderScript, ScriptedSandbox,
    CLIENT_SOURCE, RENDERED_TREE, SERVER_SOURCE,
};
use fd_core::model::Row;
use fd_core::{
    render_decoded, EntryKind, FlightValue, SessionError, SessionStatus, WorkspaceSession,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn ready_session_installs_the_render_entry() {
    let sandbox = capture_sandbox();
    let session = WorkspaceSession::create(
        SERVER_SOURCE,
        CLIENT_SOURCE,
        session_parts(sandbox.clone()),
        CancellationToken::new(),
    )
    .await;

    assert_eq!(
        session.status(),
        &SessionStatus::Ready {
            available_actions: vec!["like".into()]
        }
    );
    assert!(session.manifest().contains_key("client#Button"));
    assert!(session.modules().resolves("client", "Button"));

    let deployment = sandbox.deployment().expect("deployed");
    assert_eq!(deployment.action_names, vec!["like".to_string()]);
    assert_eq!(deployment.code, SERVER_SOURCE);

    let timeline = session.timeline();
    assert_eq!(timeline.len(), 1);
    timeline.buffer(0).unwrap().wait_done().await;
    let snapshot = timeline.snapshot();
    assert_eq!(snapshot.entries[0].kind, EntryKind::Render);
    assert_eq!(snapshot.total_chunks, 3);
    assert_eq!(snapshot.cursor, 0);
}

#[tokio::test]
async fn stepping_the_render_resolves_the_tree() {
    let session = WorkspaceSession::create(
        SERVER_SOURCE,
        CLIENT_SOURCE,
        session_parts(capture_sandbox()),
        CancellationToken::new(),
    )
    .await;
    let timeline = session.timeline();
    timeline.buffer(0).unwrap().wait_done().await;

    let decoded = timeline.snapshot().entries[0].decoded.clone();
    timeline.step_forward();
    timeline.step_forward();
    tokio::task::yield_now().await;
    assert_eq!(render_decoded(&decoded), "Pending");

    timeline.step_forward();
    let model = decoded.clone().await.expect("render decodes");
    eventually(|| model.is_complete()).await;
    assert_eq!(render_decoded(&decoded), RENDERED_TREE);
}

#[tokio::test]
async fn decoded_ui_calls_back_into_the_session() {
    let sandbox = capture_sandbox();
    let session = WorkspaceSession::create(
        SERVER_SOURCE,
        CLIENT_SOURCE,
        session_parts(sandbox.clone()),
        CancellationToken::new(),
    )
    .await;
    let timeline = session.timeline().clone();
    timeline.buffer(0).unwrap().wait_done().await;
    timeline.skip_to_entry_end();

    let model = timeline.snapshot().entries[0]
        .decoded
        .clone()
        .await
        .expect("render decodes");
    let references = model.server_references();
    assert_eq!(references.len(), 1);
    let (row, reference) = &references[0];
    assert_eq!(reference.name(), "like");

    let row = *row;
    let call = tokio::spawn(async move { model.call_server_reference(row, vec![json!(5)]).await });

    eventually(|| timeline.len() == 2).await;
    let snapshot = timeline.snapshot();
    assert_eq!(
        snapshot.entries[1].kind,
        EntryKind::Action {
            name: "like".into(),
            args: "0=[5]".into()
        }
    );
    assert_eq!(sandbox.calls()[0].args, vec![json!(5)]);

    timeline.buffer(1).unwrap().wait_done().await;
    assert!(timeline.step_forward());
    let result = call.await.unwrap().expect("action decodes");
    match result.root() {
        Some(Row::Model(value)) => assert_eq!(value.get("count"), Some(&FlightValue::Number(6.0))),
        other => panic!("unexpected root {:?}", other),
    }
}

#[tokio::test]
async fn compile_errors_produce_an_error_session() {
    let sandbox = capture_sandbox();
    let session = WorkspaceSession::create(
        SERVER_SOURCE,
        "export function Button() {}",
        session_parts(sandbox.clone()),
        CancellationToken::new(),
    )
    .await;

    assert_eq!(
        session.status(),
        &SessionStatus::Error {
            message: "Client code must start with \"use client\" directive.".into()
        }
    );
    assert!(!session.is_ready());
    assert!(session.available_actions().is_empty());
    assert!(session.timeline().is_empty());
    assert!(sandbox.deployment().is_none());
}

#[tokio::test]
async fn error_sessions_refuse_actions() {
    let sandbox = capture_sandbox();
    let session = WorkspaceSession::create(
        SERVER_SOURCE,
        "export function Button() {}",
        session_parts(sandbox.clone()),
        CancellationToken::new(),
    )
    .await;

    let Err(err) = session.add_raw_action("like", "0=%5B%5D").await else {
        panic!("an error session must not accept actions");
    };
    assert_eq!(
        err.to_string(),
        "Session is not ready: Client code must start with \"use client\" directive."
    );
    let Err(err) = session.call_server("like", vec![json!(1)]).await else {
        panic!("an error session must not accept actions");
    };
    assert!(matches!(err, SessionError::NotReady(_)));

    assert!(session.timeline().is_empty());
    assert!(sandbox.calls().is_empty());
}

#[tokio::test]
async fn rejected_render_produces_an_error_session() {
    let sandbox = ScriptedSandbox::new(RenderScript::Reject("No code deployed"));
    let session = WorkspaceSession::create(
        SERVER_SOURCE,
        CLIENT_SOURCE,
        parts_with(sandbox.clone()),
        CancellationToken::new(),
    )
    .await;

    assert_eq!(
        session.status(),
        &SessionStatus::Error {
            message: "No code deployed".into()
        }
    );
    assert!(session.timeline().is_empty());
    assert!(!sandbox.is_terminated());

    drop(session);
    assert!(sandbox.is_terminated());
}

#[tokio::test]
async fn raw_payloads_that_cannot_be_decoded_become_failed_entries() {
    let session = WorkspaceSession::create(
        SERVER_SOURCE,
        CLIENT_SOURCE,
        session_parts(capture_sandbox()),
        CancellationToken::new(),
    )
    .await;

    let buffer = session
        .add_raw_action("like", "name=alice")
        .await
        .expect("session is ready");
    buffer.wait_done().await;
    let error = buffer.error().expect("stream failed");
    assert!(error.message.starts_with("couldn't parse the request payload"));
    assert_eq!(buffer.row_count(), 0);
    assert!(buffer.is_closed());

    let snapshot = session.timeline().snapshot();
    assert_eq!(
        snapshot.entries[1].kind,
        EntryKind::Action {
            name: "like".into(),
            args: "name=alice".into()
        }
    );
    eventually(|| render_decoded(&snapshot.entries[1].decoded) != "Pending").await;
    assert!(render_decoded(&snapshot.entries[1].decoded).starts_with("Error: couldn't parse"));
}

#[tokio::test]
async fn unknown_actions_fail_their_entry() {
    let session = WorkspaceSession::create(
        SERVER_SOURCE,
        CLIENT_SOURCE,
        session_parts(capture_sandbox()),
        CancellationToken::new(),
    )
    .await;

    let buffer = session
        .add_raw_action("missing", "0=%5B%5D")
        .await
        .expect("session is ready");
    buffer.wait_done().await;
    assert_eq!(buffer.error().unwrap().message, "Action \"missing\" not found");
}

#[tokio::test]
async fn cancelled_creation_terminates_the_sandbox() {
    let sandbox = capture_sandbox();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let session = WorkspaceSession::create(
        SERVER_SOURCE,
        CLIENT_SOURCE,
        session_parts(sandbox.clone()),
        cancel,
    )
    .await;

    assert_eq!(
        session.status(),
        &SessionStatus::Error {
            message: "Session creation cancelled".into()
        }
    );
    assert!(session.timeline().is_empty());
    assert!(sandbox.is_terminated());
}

#[tokio::test]
async fn dropping_the_session_terminates_the_sandbox() {
    let sandbox = capture_sandbox();
    let session = WorkspaceSession::create(
        SERVER_SOURCE,
        CLIENT_SOURCE,
        session_parts(sandbox.clone()),
        CancellationToken::new(),
    )
    .await;
    assert!(!sandbox.is_terminated());

    drop(session);
    assert!(sandbox.is_terminated());
}

#[tokio::test]
async fn cancelling_during_render_terminates_the_sandbox() {
    let sandbox = ScriptedSandbox::new(RenderScript::Stall);
    let cancel = CancellationToken::new();
    let (session, ()) = tokio::join!(
        WorkspaceSession::create(
            SERVER_SOURCE,
            CLIENT_SOURCE,
            parts_with(sandbox.clone()),
            cancel.clone(),
        ),
        async {
            eventually(|| sandbox.is_rendering()).await;
            cancel.cancel();
        }
    );

    assert_eq!(
        session.status(),
        &SessionStatus::Error {
            message: "Session creation cancelled".into()
        }
    );
    assert!(session.timeline().is_empty());
    assert!(sandbox.is_terminated());
}
