use lambda_models::{Function, HttpTrigger};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

/// A function whose code lives in a fresh temporary directory.
pub fn function_in(dir: &Path, logical_id: &str, runtime: &str) -> Function {
    Function {
        logical_id: logical_id.to_string(),
        function_name: logical_id.to_string(),
        arn: format!("arn:aws:lambda:us-east-1:123456789012:function:{logical_id}"),
        runtime: runtime.to_string(),
        handler: "index.handler".to_string(),
        code_uri: dir.to_path_buf(),
        memory_size: 128,
        timeout: 3,
        environment: BTreeMap::new(),
        http_triggers: Vec::new(),
    }
}

pub fn trigger(function: &str, method: Option<&str>, path: &str) -> HttpTrigger {
    HttpTrigger {
        event_id: format!("{}{}", method.unwrap_or("Any"), path.replace(['/', '{', '}', '+'], "")),
        function: function.to_string(),
        path: path.to_string(),
        method: method.map(str::to_ascii_uppercase),
        stage: "Prod".to_string(),
    }
}

pub fn code_dir() -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("index.js"), "exports.handler = async () => ({});")
        .expect("write handler");
    dir
}

/// Writes a zip archive holding `entries` (name, contents).
pub fn write_zip(path: &Path, entries: &[(&str, &str)]) {
    let file = std::fs::File::create(path).expect("create zip");
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default().unix_permissions(0o644);
    for (name, contents) in entries {
        zip.start_file(*name, options).expect("start file");
        zip.write_all(contents.as_bytes()).expect("write entry");
    }
    zip.finish().expect("finish zip");
}

/// A proxy response envelope as a function would print it.
pub fn envelope(status: u16, headers: &[(&str, &str)], body: &str) -> String {
    let headers: serde_json::Map<String, serde_json::Value> = headers
        .iter()
        .map(|(k, v)| (k.to_string(), serde_json::Value::from(*v)))
        .collect();
    serde_json::json!({
        "statusCode": status,
        "headers": headers,
        "body": body,
    })
    .to_string()
}

/// Template with one function per `(id, method, path)` entry.
pub fn api_template(runtime: &str, routes: &[(&str, &str, &str)]) -> String {
    let mut text = String::from("Resources:\n");
    for (id, method, path) in routes {
        text.push_str(&format!(
            "  {id}:\n    Type: AWS::Serverless::Function\n    Properties:\n      Handler: index.handler\n      Runtime: {runtime}\n      Events:\n        Http:\n          Type: Api\n          Properties:\n            Path: {path}\n            Method: {method}\n"
        ));
    }
    text
}
