//! Needs a running Docker daemon: `cargo test --features docker_tests`.
#![cfg(feature = "docker_tests")]

use lambda_invoker::{DockerRuntime, InvokerOptions, LocalInvoker, RuntimeImages};
use lambda_testsupport::{code_dir, function_in};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn daemon_answers_ping() {
    let runtime = DockerRuntime::connect("").expect("docker client");
    let invoker = LocalInvoker::new(Arc::new(runtime), RuntimeImages::new(), InvokerOptions::default());
    invoker.ping().await.expect("daemon reachable");
}

#[tokio::test]
async fn python_handler_round_trip() {
    let dir = code_dir();
    std::fs::write(
        dir.path().join("app.py"),
        "def handler(event, context):\n    return {'statusCode': 200, 'body': event.get('path', '')}\n",
    )
    .unwrap();
    let mut function = function_in(dir.path(), "Live", "python3.8");
    function.handler = "app.handler".to_string();
    function.timeout = 30;

    let runtime = DockerRuntime::connect("").expect("docker client");
    let invoker = LocalInvoker::new(Arc::new(runtime), RuntimeImages::new(), InvokerOptions::default());
    let result = invoker
        .invoke(&function, r#"{"path":"/live"}"#, CancellationToken::new())
        .await
        .expect("invocation");

    let envelope = lambda_api::parse_envelope(&result.stdout_text()).expect("envelope");
    assert_eq!(envelope.status_code, Some(200));
    assert_eq!(envelope.body.as_deref(), Some("/live"));
}
