use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use http_body_util::BodyExt;
use tower::ServiceExt;

use esb_api::create_ingress_router;
use esb_common::MediatorSpec;
use esb_mediation::{MediationEngine, MediationEnvironment, MediatorRegistry, ProxyService, SequenceRef};

fn engine() -> Arc<MediationEngine> {
    let env = MediationEnvironment::builder().build();
    let registry = MediatorRegistry::with_builtins();

    let echo = registry
        .build_sequence(
            "main",
            &[
                MediatorSpec::new("property").with_param("name", "seen").with_param("value", true),
                MediatorSpec::new("respond"),
            ],
            None,
        )
        .unwrap();
    env.add_sequence("main", Arc::new(echo));

    let swallow = registry
        .build_sequence("swallow", &[MediatorSpec::new("drop")], None)
        .unwrap();
    env.add_sequence("swallow", Arc::new(swallow));
    env.add_proxy(ProxyService::new("Sink").with_in_sequence(SequenceRef::named("swallow")));

    Arc::new(MediationEngine::new(env))
}

async fn post(uri: &str, body: &'static str) -> (StatusCode, Option<String>, String) {
    let response = create_ingress_router(engine())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, content_type, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn test_main_sequence_response_returned_to_caller() {
    let (status, content_type, body) = post("/mediate", r#"{"symbol":"IBM"}"#).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("application/json"));
    assert_eq!(body, r#"{"symbol":"IBM"}"#);
}

#[tokio::test]
async fn test_proxy_without_response_is_accepted() {
    let (status, _, body) = post("/proxies/Sink", "{}").await;

    assert_eq!(status, StatusCode::ACCEPTED);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["outcome"], "stopped");
    assert!(json["message_id"].as_str().unwrap().starts_with("urn:uuid:"));
}

#[tokio::test]
async fn test_unknown_proxy_reports_dropped_message() {
    let (status, _, body) = post("/proxies/Nowhere", "{}").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["error"], "CONFIGURATION");
}
