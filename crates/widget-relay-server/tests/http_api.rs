use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;
use widget_relay::builtin::{builtin_factory, ShowTodoOperation};
use widget_relay::{
    BundleDir, ContentBlock, FieldKind, InputShape, Operation, OperationDescriptor,
    OperationError, OperationOutput, SessionHandlerFactory,
};
use widget_relay_server::http::{self, AppState};
use widget_relay_server::session_table::SessionTable;

fn serve(factory: SessionHandlerFactory) -> Router {
    Router::new().merge(http::routes()).with_state(AppState {
        factory: Arc::new(factory),
        sessions: Arc::new(SessionTable::new()),
    })
}

fn make_app() -> (Router, TempDir) {
    let assets = tempfile::tempdir().expect("assets dir");
    std::fs::write(assets.path().join("todo.js"), "render()").expect("seed bundle");

    let factory = builtin_factory(BundleDir::new(assets.path()), "http://localhost:8000")
        .expect("builtin factory");
    (serve(factory), assets)
}

async fn next_frame(body: &mut Body) -> String {
    let frame = body
        .frame()
        .await
        .expect("stream should stay open")
        .expect("frame should be ok");
    let data = frame.into_data().expect("data frame");
    String::from_utf8(data.to_vec()).expect("utf8 frame")
}

/// Open a stream and return its id plus the still-open body.
async fn open_session(app: &Router) -> (String, Body) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(http::SSE_PATH)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );

    let mut body = response.into_body();
    let endpoint = next_frame(&mut body).await;
    assert!(endpoint.starts_with("event: endpoint\n"));
    let session_id = endpoint
        .split("sessionId=")
        .nth(1)
        .expect("endpoint event should carry the session id")
        .trim()
        .to_string();
    (session_id, body)
}

async fn post_message(app: &Router, uri: String, message: Value) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(message.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

fn call_show_todo(id: u64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "operations/call",
        "params": { "name": "show-todo", "arguments": { "message": message } },
    })
}

#[tokio::test]
async fn missing_session_id_is_bad_request() {
    let (app, _assets) = make_app();
    let response = post_message(
        &app,
        http::MESSAGE_PATH.to_string(),
        call_show_todo(1, "hi"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert!(body["error"].as_str().unwrap().contains("sessionId"));
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let (app, _assets) = make_app();
    let response = post_message(
        &app,
        format!("{}?sessionId=unknown-id", http::MESSAGE_PATH),
        call_show_todo(1, "hi"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_message_body_is_bad_request() {
    let (app, _assets) = make_app();
    let (session_id, _stream) = open_session(&app).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("{}?sessionId={session_id}", http::MESSAGE_PATH))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn preflight_declares_methods_and_headers_on_both_paths() {
    let (app, _assets) = make_app();
    for path in [http::SSE_PATH, http::MESSAGE_PATH] {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri(path)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT, "{path}");
        let methods = response.headers()[header::ACCESS_CONTROL_ALLOW_METHODS]
            .to_str()
            .unwrap();
        assert!(methods.contains("GET"));
        assert!(methods.contains("POST"));
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_HEADERS],
            "content-type"
        );
    }
}

/// Echoes after a pause, long enough for a second request to pile up on
/// the session mutex.
struct SlowEchoOperation;

#[async_trait]
impl Operation for SlowEchoOperation {
    fn descriptor(&self) -> OperationDescriptor {
        OperationDescriptor::new("slow-echo", "Slow Echo", "Echo the message after a pause")
            .with_input_shape(InputShape::new().required("message", FieldKind::String))
    }

    async fn execute(&self, args: Value) -> Result<OperationOutput, OperationError> {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        Ok(OperationOutput::new(vec![ContentBlock::text("slow")], args))
    }
}

#[tokio::test]
async fn replies_reach_the_stream_in_dispatch_order() {
    let factory = SessionHandlerFactory::builder()
        .with_operation(Arc::new(SlowEchoOperation))
        .with_operation(Arc::new(ShowTodoOperation::new("http://localhost:8000")))
        .build()
        .expect("factory");
    let app = serve(factory);
    let (session_id, mut stream) = open_session(&app).await;
    let uri = format!("{}?sessionId={session_id}", http::MESSAGE_PATH);

    // First request holds the session busy; the second must not overtake
    // it onto the stream.
    let slow = {
        let app = app.clone();
        let uri = uri.clone();
        tokio::spawn(async move {
            post_message(
                &app,
                uri,
                json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "method": "operations/call",
                    "params": { "name": "slow-echo", "arguments": { "message": "first" } },
                }),
            )
            .await
        })
    };
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let fast = post_message(&app, uri, call_show_todo(2, "second")).await;
    assert_eq!(fast.status(), StatusCode::ACCEPTED);
    let slow = slow.await.expect("slow post should join");
    assert_eq!(slow.status(), StatusCode::ACCEPTED);

    let first: Value = serde_json::from_str(
        next_frame(&mut stream)
            .await
            .strip_prefix("event: message\ndata: ")
            .expect("message event framing")
            .trim(),
    )
    .unwrap();
    let second: Value = serde_json::from_str(
        next_frame(&mut stream)
            .await
            .strip_prefix("event: message\ndata: ")
            .expect("message event framing")
            .trim(),
    )
    .unwrap();
    assert_eq!(first["id"], json!(1));
    assert_eq!(second["id"], json!(2));
}

#[tokio::test]
async fn non_declared_method_on_known_paths_is_not_found() {
    let (app, _assets) = make_app();

    for (method, path) in [
        ("GET", http::MESSAGE_PATH),
        ("POST", http::SSE_PATH),
        ("DELETE", http::MESSAGE_PATH),
    ] {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(path)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.status(),
            StatusCode::NOT_FOUND,
            "{method} {path} should be 404"
        );
    }
}

#[tokio::test]
async fn unknown_path_is_not_found() {
    let (app, _assets) = make_app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/no/such/path")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn addressed_call_is_answered_over_the_open_stream() {
    let (app, _assets) = make_app();
    let (session_id, mut stream) = open_session(&app).await;

    let ack = post_message(
        &app,
        format!("{}?sessionId={session_id}", http::MESSAGE_PATH),
        call_show_todo(7, "hi"),
    )
    .await;
    assert_eq!(ack.status(), StatusCode::ACCEPTED);

    let frame = next_frame(&mut stream).await;
    let payload = frame
        .strip_prefix("event: message\ndata: ")
        .expect("message event framing")
        .trim();
    let reply: Value = serde_json::from_str(payload).unwrap();
    assert_eq!(reply["id"], json!(7));
    assert_eq!(reply["result"]["structured"]["message"], json!("hi"));
    assert_eq!(
        reply["result"]["meta"]["widgetUri"],
        json!("ui://widget/todo.html")
    );
}

#[tokio::test]
async fn invalid_input_reports_the_missing_field() {
    let (app, _assets) = make_app();
    let (session_id, mut stream) = open_session(&app).await;

    let ack = post_message(
        &app,
        format!("{}?sessionId={session_id}", http::MESSAGE_PATH),
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "operations/call",
            "params": { "name": "show-todo", "arguments": {} },
        }),
    )
    .await;
    assert_eq!(ack.status(), StatusCode::ACCEPTED);

    let frame = next_frame(&mut stream).await;
    let payload = frame
        .strip_prefix("event: message\ndata: ")
        .unwrap()
        .trim();
    let reply: Value = serde_json::from_str(payload).unwrap();
    assert_eq!(
        reply["error"]["data"]["violations"][0]["field"],
        json!("message")
    );
}

#[tokio::test]
async fn stale_session_id_is_not_found_after_disconnect() {
    let (app, _assets) = make_app();
    let (session_id, stream) = open_session(&app).await;

    // Client disconnect: dropping the body runs the session's teardown guard.
    drop(stream);

    let uri = format!("{}?sessionId={session_id}", http::MESSAGE_PATH);
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        let response = post_message(&app, uri.clone(), call_show_todo(1, "hi")).await;
        if response.status() == StatusCode::NOT_FOUND {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("stale session was never removed");
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}
