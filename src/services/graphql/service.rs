//! Query endpoint: guardrails, per-request snapshot and loader, timeout, HTTP routes.
//!
//! [QueryEngine::execute] is the whole request pipeline. The HTTP handlers only
//! translate between axum and [async_graphql::Request]/[async_graphql::Response].

use std::sync::Arc;
use std::time::Duration;

use async_graphql::http::GraphiQLSource;
use async_graphql::{Request, Response};
use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::Router;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use tracing::{debug, warn};

use super::errors::{EngineError, VALIDATION_ERROR_CODE};
use super::guardrails::GuardrailLimits;
use super::loaders::run_batched;
use super::propagation::has_code;
use super::resolvers::RequestScope;
use super::schema::SubgraphSchema;
use crate::db::DataStore;

/// Executes subgraph queries against a [DataStore].
pub struct QueryEngine {
    schema: SubgraphSchema,
    store: Arc<dyn DataStore>,
    guardrails: GuardrailLimits,
    timeout: Duration,
}

impl QueryEngine {
    pub fn new(
        schema: SubgraphSchema,
        store: Arc<dyn DataStore>,
        guardrails: GuardrailLimits,
        timeout: Duration,
    ) -> Self {
        Self {
            schema,
            store,
            guardrails,
            timeout,
        }
    }

    pub fn schema(&self) -> &SubgraphSchema {
        &self.schema
    }

    /// Run one request to completion.
    ///
    /// Guardrail violations are answered before a snapshot exists. Otherwise every
    /// statement of the request runs in one snapshot, and relation batches are
    /// flushed whenever execution stalls on them.
    pub async fn execute(&self, request: Request) -> Response {
        if let Err(violation) = self.guardrails.check(&request.query) {
            return Response::from_errors(vec![EngineError::from(violation).into_server_error()]);
        }

        let scope = RequestScope::new(self.store.snapshot());
        let loader = scope.loader.clone();
        let null_targets = scope.null_targets.clone();
        let execution = run_batched(&loader, self.schema.execute(request.data(scope)));

        match tokio::time::timeout(self.timeout, execution).await {
            Ok(mut response) => {
                null_targets.apply(&mut response);
                if response.is_err() {
                    assign_default_codes(&mut response);
                    debug!(errors = response.errors.len(), "Query finished with errors");
                }
                response
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "Query timed out");
                Response::from_errors(vec![EngineError::Timeout(self.timeout).into_server_error()])
            }
        }
    }
}

/// Errors raised by the executor itself (syntax, unknown fields or arguments,
/// argument type mismatches) are validation failures.
fn assign_default_codes(response: &mut Response) {
    for error in response.errors.iter_mut().filter(|error| !has_code(error)) {
        error
            .extensions
            .get_or_insert_with(Default::default)
            .set("code", VALIDATION_ERROR_CODE);
    }
}

/// Routes for `/graphql`. Merge into the app and apply [AppState](crate::AppState).
pub fn router() -> Router<crate::AppState> {
    Router::new().route("/graphql", get(graphiql).post(graphql_handler))
}

async fn graphiql(headers: HeaderMap) -> impl IntoResponse {
    let accepts_html = headers
        .get(axum::http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/html"))
        .unwrap_or(false);

    if accepts_html {
        axum::response::Html(GraphiQLSource::build().endpoint("/graphql").finish()).into_response()
    } else {
        (
            axum::http::StatusCode::METHOD_NOT_ALLOWED,
            axum::Json(serde_json::json!({
                "error": "GET requests are not supported for GraphQL queries. Use POST with Content-Type: application/json"
            })),
        )
            .into_response()
    }
}

async fn graphql_handler(
    State(state): State<crate::AppState>,
    req: GraphQLRequest,
) -> GraphQLResponse {
    state.engine.execute(req.into_inner()).await.into()
}
