mod common;

use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use pretty_assertions::assert_eq;
use serde_json::json;
use tower::ServiceExt;

use common::Harness;
use ens_subgraph_compat::config::Config;
use ens_subgraph_compat::{AppState, build_app};

async fn app() -> axum::Router {
    let harness = Harness::new().await;
    let state = AppState {
        config: Arc::new(Config::from_lookup(|_| None).unwrap()),
        engine: Arc::new(harness.engine),
    };
    build_app(state)
}

#[tokio::test]
async fn post_returns_graphql_envelope() {
    let body = json!({
        "query": "query ($id: ID!) { domain(id: $id) { name owner { id } } }",
        "variables": { "id": "d-bob" },
    });
    let response = app()
        .await
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/graphql")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let envelope: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(
        envelope,
        json!({ "data": { "domain": { "name": "bob.eth", "owner": { "id": "0xbbb" } } } })
    );
}

#[tokio::test]
async fn get_serves_graphiql_to_browsers_only() {
    let app = app().await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/graphql")
                .header(header::ACCEPT, "text/html")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(Request::builder().uri("/graphql").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}
