use cleanflow::app::ports::RemoteResponse;
use jsonschema::JSONSchema;
use serde_json::{json, Value};

fn compiled_schema() -> JSONSchema {
    let schema: Value = serde_json::from_str(include_str!("../schemas/remote_response.v1.json")).unwrap();
    let schema_static: &'static Value = Box::leak(Box::new(schema));
    JSONSchema::options().compile(schema_static).unwrap()
}

fn load(text: &str) -> Value {
    serde_json::from_str(text).unwrap()
}

#[test]
fn ok_example_is_valid_and_accepted() {
    let compiled = compiled_schema();
    let body = load(include_str!("resources/remote_response_ok.json"));
    assert!(compiled.is_valid(&body));

    let resp = RemoteResponse::from_body(&body).unwrap();
    assert_eq!(resp.rows.len(), 2);
    assert_eq!(resp.quality.rule_hits["invalid_amount"], 1);
    assert!(resp.outputs.cleaned_parquet.is_none());
}

#[test]
fn parquet_example_is_valid_and_keeps_hash() {
    let compiled = compiled_schema();
    let body = load(include_str!("resources/remote_response_with_parquet.json"));
    assert!(compiled.is_valid(&body));

    let resp = RemoteResponse::from_body(&body).unwrap();
    let artifact = resp.outputs.cleaned_parquet.unwrap();
    assert_eq!(artifact.path, "/data/accel/cleaned.parquet");
    assert_eq!(artifact.sha256.unwrap().len(), 64);
}

#[test]
fn scalar_rows_fail_both_checks() {
    let compiled = compiled_schema();
    let mut body = load(include_str!("resources/remote_response_ok.json"));
    body["rows"] = json!([1, 2]);
    assert!(!compiled.is_valid(&body));
    assert!(RemoteResponse::from_body(&body).is_err());
}

#[test]
fn missing_quality_fails_both_checks() {
    let compiled = compiled_schema();
    let mut body = load(include_str!("resources/remote_response_ok.json"));
    body.as_object_mut().unwrap().remove("quality");
    assert!(!compiled.is_valid(&body));
    assert_eq!(RemoteResponse::from_body(&body).unwrap_err().kind(), "invalid_shape");
}

#[test]
fn uppercase_sha_is_rejected_by_schema() {
    let compiled = compiled_schema();
    let mut body = load(include_str!("resources/remote_response_with_parquet.json"));
    body["outputs"]["cleaned_parquet"]["sha256"] = json!("NOTAHEX");
    assert!(!compiled.is_valid(&body));
}
