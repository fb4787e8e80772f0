use crate::infra::AppState;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use voucher_ledger::workflows::{ledger_router, LedgerServices};

pub(crate) fn with_service_routes(services: Arc<LedgerServices>) -> Router {
    ledger_router(services)
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::{in_memory_collaborators, InMemoryPeople, OPERATIONS_ACTOR};
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::sync::atomic::AtomicBool;
    use tower::ServiceExt;
    use voucher_ledger::workflows::providers::ProviderCatalogue;
    use voucher_ledger::workflows::router::ACTOR_HEADER;
    use voucher_ledger::workflows::Delivery;

    fn app(ready: bool) -> Router {
        let wiring = in_memory_collaborators(InMemoryPeople::demo_roster());
        let (services, _) = LedgerServices::assemble(
            ProviderCatalogue::builtin(),
            wiring.collaborators,
            Delivery::Inline,
        )
        .expect("builtin catalogue assembles");
        let state = AppState {
            readiness: Arc::new(AtomicBool::new(ready)),
            metrics: Arc::new(PrometheusBuilder::new().build_recorder().handle()),
        };
        with_service_routes(Arc::new(services)).layer(Extension(state))
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body readable");
        serde_json::from_slice(&bytes).expect("valid json")
    }

    #[tokio::test]
    async fn readiness_reflects_startup_flag() {
        let response = app(false)
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json_body(response).await["status"], "initializing");

        let response = app(true)
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ledger_routes_are_served_alongside_health() {
        let router = app(true);

        let health = router
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::OK);

        let import = router
            .clone()
            .oneshot(
                Request::post("/api/v1/inventory/langcert/speaking/import")
                    .header(ACTOR_HEADER, OPERATIONS_ACTOR)
                    .body(Body::from(
                        "Coupon Code,Expiration Date,Date Sent,Coupon Status\nLCS-1,,,\nLCW-1,,,\n",
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(import.status(), StatusCode::OK);

        let assign = router
            .oneshot(
                Request::post("/api/v1/inventory/langcert/speaking/assignments")
                    .header(header::CONTENT_TYPE, "application/json")
                    .header(ACTOR_HEADER, OPERATIONS_ACTOR)
                    .body(Body::from(r#"{"candidate_id":"cand-2"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(assign.status(), StatusCode::CREATED);
        assert_eq!(json_body(assign).await["resource_code"], "LCS-1");
    }
}
