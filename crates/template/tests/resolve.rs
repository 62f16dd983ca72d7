use lambda_models::LocalError;
use lambda_template::{load_template, load_template_file, LoadOptions, ResourceKind};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;

const STAGED_TEMPLATE: &str = r#"
AWSTemplateFormatVersion: '2010-09-09'
Transform: AWS::Serverless-2016-10-31
Parameters:
  Stage:
    Type: String
    Default: dev
Resources:
  F:
    Type: AWS::Serverless::Function
    Properties:
      Handler: app.handler
      Runtime: python3.11
      Description: !Sub "hello-${Stage}"
"#;

fn overrides(pairs: &[(&str, &str)]) -> LoadOptions {
    LoadOptions {
        parameter_overrides: pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>(),
        ..LoadOptions::default()
    }
}

#[test]
fn substitute_uses_parameter_override() {
    let loaded = load_template(STAGED_TEMPLATE, &overrides(&[("Stage", "prod")])).unwrap();
    assert_eq!(
        loaded.graph.value("F", "Description"),
        Some(&json!("hello-prod"))
    );
    assert_eq!(loaded.parameters["Stage"], "prod");
}

#[test]
fn substitute_falls_back_to_parameter_default() {
    let loaded = load_template(STAGED_TEMPLATE, &LoadOptions::default()).unwrap();
    assert_eq!(loaded.graph.value("F", "Description"), Some(&json!("hello-dev")));
    assert_eq!(loaded.format_version.as_deref(), Some("2010-09-09"));
}

#[test]
fn forward_references_resolve_regardless_of_order() {
    let template = r#"
Resources:
  F:
    Type: AWS::Serverless::Function
    Properties:
      Handler: index.handler
      Runtime: nodejs18.x
      Environment:
        Variables:
          TARGET: !Ref G
          TARGET_ARN: !GetAtt G.Arn
  G:
    Type: AWS::Serverless::Function
    Properties:
      Handler: index.handler
      Runtime: nodejs18.x
      FunctionName: worker
"#;
    let loaded = load_template(template, &LoadOptions::default()).unwrap();
    let f = loaded.function("F").unwrap();
    assert_eq!(f.environment["TARGET"], "worker");
    assert_eq!(
        f.environment["TARGET_ARN"],
        "arn:aws:lambda:us-east-1:123456789012:function:worker"
    );
    assert_eq!(loaded.graph.passes(), 2);
}

#[test]
fn mutual_references_terminate_with_every_property_listed() {
    let template = r#"
Resources:
  A:
    Type: AWS::Serverless::Function
    Properties:
      Handler: a.handler
      Runtime: python3.11
      Description: !GetAtt B.Arn
  B:
    Type: AWS::Serverless::Function
    Properties:
      Handler: b.handler
      Runtime: python3.11
      Description: !GetAtt A.Arn
"#;
    let options = LoadOptions {
        max_resolve_passes: 10,
        ..LoadOptions::default()
    };
    let err = load_template(template, &options).unwrap_err();
    let LocalError::UnresolvedReferences { passes, properties } = err else {
        panic!("expected unresolved references");
    };
    // The second pass makes no progress and stops the loop early.
    assert_eq!(passes, 1);
    let mut named: Vec<_> = properties
        .iter()
        .map(|p| format!("{}.{}", p.resource, p.property))
        .collect();
    named.sort();
    assert_eq!(named, vec!["A.Description", "B.Description"]);
    assert!(properties[0].reason.contains("waiting on"));
}

#[test]
fn exhausted_pass_budget_is_reported() {
    // C -> B -> A chain in reverse source order needs three passes.
    let template = r#"
Resources:
  C:
    Type: AWS::Serverless::Function
    Properties:
      Handler: h
      Runtime: python3.11
      Description: !Ref B
  B:
    Type: AWS::Serverless::Function
    Properties:
      Handler: h
      Runtime: python3.11
      Description: !Ref A
      FunctionName: !Sub "${A}-b"
  A:
    Type: AWS::Serverless::Function
    Properties:
      Handler: h
      Runtime: python3.11
"#;
    let tight = LoadOptions {
        max_resolve_passes: 1,
        ..LoadOptions::default()
    };
    assert!(matches!(
        load_template(template, &tight),
        Err(LocalError::UnresolvedReferences { passes: 1, .. })
    ));

    let loaded = load_template(template, &LoadOptions::default()).unwrap();
    assert_eq!(loaded.graph.value("C", "Description"), Some(&json!("A-b")));
    assert_eq!(loaded.graph.passes(), 3);
}

#[test]
fn resolving_twice_yields_identical_graphs() {
    let first = load_template(STAGED_TEMPLATE, &LoadOptions::default()).unwrap();
    let second = load_template(STAGED_TEMPLATE, &LoadOptions::default()).unwrap();
    assert_eq!(first.graph, second.graph);
    assert_eq!(first.functions, second.functions);
}

#[test]
fn unsupported_intrinsic_names_the_function() {
    let template = r#"
Resources:
  F:
    Type: AWS::Serverless::Function
    Properties:
      Handler: h
      Runtime: python3.11
      Description: !If [IsProd, a, b]
"#;
    let err = load_template(template, &LoadOptions::default()).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("F.Description"), "{message}");
    assert!(message.contains("Fn::If"), "{message}");
}

#[test]
fn multiline_join_with_nested_list() {
    let template = r#"
Resources:
  F:
    Type: AWS::Serverless::Function
    Properties:
      Handler: h
      Runtime: python3.11
      Description: !Join
        - ":"
        - - !Ref AWS::Region
          - !Ref AWS::AccountId
          - fixed
"#;
    let loaded = load_template(template, &LoadOptions::default()).unwrap();
    assert_eq!(
        loaded.graph.value("F", "Description"),
        Some(&json!("us-east-1:123456789012:fixed"))
    );
}

#[test]
fn json_templates_are_accepted() {
    let template = r#"{
  "Resources": {
    "F": {
      "Type": "AWS::Serverless::Function",
      "Properties": {
        "Handler": "index.handler",
        "Runtime": "nodejs18.x",
        "Description": {"Fn::Join": ["-", ["a", {"Ref": "AWS::StackName"}]]}
      }
    }
  }
}"#;
    let loaded = load_template(template, &LoadOptions::default()).unwrap();
    assert_eq!(loaded.graph.value("F", "Description"), Some(&json!("a-local")));
}

#[test]
fn unknown_types_are_skipped_not_fatal() {
    let template = r#"
Resources:
  Table:
    Type: AWS::DynamoDB::Table
    Properties:
      TableName: items
  F:
    Type: AWS::Serverless::Function
    Properties:
      Handler: h
      Runtime: python3.11
      Environment:
        Variables:
          TABLE: !Sub "${Table}"
"#;
    let loaded = load_template(template, &LoadOptions::default()).unwrap();
    assert_eq!(loaded.skipped.len(), 1);
    assert_eq!(loaded.skipped[0].type_name, "AWS::DynamoDB::Table");
    assert_eq!(loaded.skipped[0].line, Some(3));
    // Skipped resources publish no return values.
    assert_eq!(loaded.function("F").unwrap().environment["TABLE"], "");
}

#[test]
fn missing_required_properties_are_collected_with_lines() {
    let template = "\
Resources:
  A:
    Type: AWS::Serverless::Function
    Properties:
      Runtime: python3.11
  B:
    Type: AWS::Serverless::Function
    Properties:
      Handler: h
";
    let err = load_template(template, &LoadOptions::default()).unwrap_err();
    let LocalError::TemplateValidation { issues } = err else {
        panic!("expected validation error");
    };
    assert_eq!(issues.len(), 2);
    assert_eq!(issues[0].resource, "A");
    assert_eq!(issues[0].property.as_deref(), Some("Handler"));
    assert_eq!(issues[0].line, Some(2));
    assert_eq!(issues[1].resource, "B");
    assert_eq!(issues[1].line, Some(6));
}

#[test]
fn parse_errors_carry_a_line_number() {
    let template = "Resources:\n  F:\n    Type: [unclosed\n";
    let err = load_template(template, &LoadOptions::default()).unwrap_err();
    assert!(matches!(err, LocalError::TemplateParse { line: Some(_), .. }));
}

#[test]
fn http_triggers_take_stage_from_linked_api() {
    let template = r#"
Globals:
  Function:
    Timeout: 10
    Environment:
      Variables:
        SHARED: shared
Resources:
  Api:
    Type: AWS::Serverless::Api
    Properties:
      StageName: v1
  F:
    Type: AWS::Serverless::Function
    Properties:
      Handler: app.handler
      Runtime: python3.11
      CodeUri: src/
      MemorySize: 256
      Events:
        List:
          Type: Api
          Properties:
            Path: /items
            Method: get
            RestApiId: !Ref Api
        Any:
          Type: HttpApi
        Queue:
          Type: SQS
          Properties:
            Queue: arn
"#;
    let options = LoadOptions {
        base_dir: Some(PathBuf::from("/project")),
        ..LoadOptions::default()
    };
    let loaded = load_template(template, &options).unwrap();
    let f = loaded.function("F").unwrap();

    assert_eq!(f.timeout, 10);
    assert_eq!(f.memory_size, 256);
    assert_eq!(f.code_uri, PathBuf::from("/project/src/"));
    assert_eq!(f.environment["SHARED"], "shared");
    assert_eq!(f.http_triggers.len(), 2);

    let list = f.http_triggers.iter().find(|t| t.event_id == "List").unwrap();
    assert_eq!(list.path, "/items");
    assert_eq!(list.method.as_deref(), Some("GET"));
    assert_eq!(list.stage, "v1");

    let any = f.http_triggers.iter().find(|t| t.event_id == "Any").unwrap();
    assert_eq!(any.path, "/{proxy+}");
    assert_eq!(any.method, None);
    assert_eq!(any.stage, "$default");

    assert_eq!(loaded.graph.of_kind(ResourceKind::Api).count(), 1);
}

#[test]
fn function_defaults_apply() {
    let template = r#"
Resources:
  F:
    Type: AWS::Serverless::Function
    Properties:
      Handler: app.handler
      Runtime: python3.11
"#;
    let loaded = load_template(template, &LoadOptions::default()).unwrap();
    let f = loaded.function("F").unwrap();
    assert_eq!(f.memory_size, 128);
    assert_eq!(f.timeout, 3);
    assert_eq!(f.code_uri, PathBuf::from("./."));
    assert_eq!(f.function_name, "F");
    assert!(f.environment.is_empty());
}

#[test]
fn file_loading_resolves_code_against_template_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("template.yaml");
    std::fs::write(&path, STAGED_TEMPLATE).unwrap();

    let loaded = load_template_file(&path, &LoadOptions::default()).unwrap();
    assert_eq!(loaded.function("F").unwrap().code_uri, dir.path().join("."));
}
