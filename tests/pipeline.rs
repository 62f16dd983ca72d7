use axum::body::Body;
use axum::http::{Request, StatusCode};
use lambda_invoker::{InvokerOptions, LocalInvoker, RuntimeImages};
use lambda_local::{api_router, Config, LocalError};
use lambda_template::{load_template, LoadOptions};
use lambda_testsupport::{api_template, code_dir, envelope, Behavior, FakeRuntime, Reply};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

const TEMPLATE: &str = r#"
Parameters:
  Stage:
    Type: String
    Default: dev
Globals:
  Function:
    Timeout: 10
Resources:
  Items:
    Type: AWS::Serverless::Function
    Properties:
      Handler: app.handler
      Runtime: python3.8
      Environment:
        Variables:
          TABLE: !Sub "${Stage}-${AWS::Region}-items"
          QUEUE: !GetAtt Worker.Arn
      Events:
        List:
          Type: Api
          Properties:
            Path: /items
            Method: get
  Worker:
    Type: AWS::Serverless::Function
    Properties:
      Handler: worker.handler
      Runtime: nodejs12.x
"#;

fn invoker(fake: &FakeRuntime) -> Arc<LocalInvoker> {
    Arc::new(LocalInvoker::new(
        Arc::new(fake.clone()),
        RuntimeImages::new(),
        InvokerOptions::default(),
    ))
}

fn config() -> Config {
    let mut config = Config::default();
    config.server.static_dir = None;
    config
}

#[tokio::test]
async fn template_to_http_response() {
    let code = code_dir();
    let options = LoadOptions {
        base_dir: Some(code.path().to_path_buf()),
        ..LoadOptions::default()
    };
    let template = load_template(TEMPLATE, &options).unwrap();

    let fake = FakeRuntime::replying(envelope(200, &[("X-Source", "items")], "[1,2]"));
    let (app, summary) = api_router(
        &template,
        invoker(&fake),
        &config(),
        CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(summary.mounted.len(), 1);
    assert_eq!(summary.without_triggers, vec!["Worker".to_string()]);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/items?limit=2")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-source"], "items");
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"[1,2]");

    let spec = fake.last_created().await;
    assert_eq!(spec.image, "lambci/lambda:python3.8");
    assert_eq!(spec.cmd[0], "app.handler");

    let env = fake.last_env().await;
    assert_eq!(env["TABLE"], "dev-us-east-1-items");
    assert!(env["QUEUE"].ends_with(":function:Worker"));
    assert_eq!(env["AWS_LAMBDA_FUNCTION_TIMEOUT"], "10");

    let event = fake.last_event().await;
    assert_eq!(event["queryStringParameters"]["limit"], "2");
}

#[tokio::test]
async fn template_without_http_triggers_is_refused() {
    let code = code_dir();
    let options = LoadOptions {
        base_dir: Some(code.path().to_path_buf()),
        ..LoadOptions::default()
    };
    let template = load_template(
        "Resources:\n  Worker:\n    Type: AWS::Serverless::Function\n    Properties:\n      Handler: index.handler\n      Runtime: nodejs12.x\n",
        &options,
    )
    .unwrap();

    let err = api_router(
        &template,
        invoker(&FakeRuntime::new()),
        &config(),
        CancellationToken::new(),
    )
    .await
    .err()
    .expect("mount refused");
    assert!(matches!(err, LocalError::NoHttpTriggers));
}

#[tokio::test]
async fn served_over_tcp() {
    let code = code_dir();
    let options = LoadOptions {
        base_dir: Some(code.path().to_path_buf()),
        ..LoadOptions::default()
    };
    let template = load_template(
        &api_template("nodejs12.x", &[("Echo", "post", "/echo")]),
        &options,
    )
    .unwrap();

    let fake = FakeRuntime::with_behavior(Behavior::script(|spec| {
        let event: serde_json::Value =
            serde_json::from_str(spec.cmd.last().map(String::as_str).unwrap_or("{}")).unwrap();
        Reply::stdout(envelope(200, &[], event["body"].as_str().unwrap_or_default()))
    }));
    let shutdown = CancellationToken::new();
    let (app, _) = api_router(&template, invoker(&fake), &config(), shutdown.clone())
        .await
        .unwrap();

    let listener = lambda_api::bind("127.0.0.1", 0).await.unwrap();
    let address = listener.local_addr().unwrap();
    let server = tokio::spawn(lambda_api::serve(listener, app, shutdown.clone()));

    let response = reqwest::Client::new()
        .post(format!("http://{address}/echo"))
        .body("ping")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.text().await.unwrap(), "ping");

    let event = fake.last_event().await;
    assert_eq!(event["requestContext"]["identity"]["sourceIp"], "127.0.0.1");

    shutdown.cancel();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn address_in_use_is_a_bind_error() {
    let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = taken.local_addr().unwrap().port();
    let err = lambda_api::bind("127.0.0.1", port).await.unwrap_err();
    assert!(matches!(err, LocalError::ServerBind { .. }));
}
