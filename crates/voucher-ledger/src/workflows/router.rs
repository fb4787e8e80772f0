use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::error::AppError;
use crate::workflows::assignments::{LedgerError, MemberOutcomeView};
use crate::workflows::domain::{
    ActorId, AssignmentId, CandidateId, CandidateListId, ProviderId, ResourceStatus, ServiceCode,
    ServiceKey,
};
use crate::workflows::services::LedgerServices;

/// Header carrying the acting user's id.
pub const ACTOR_HEADER: &str = "x-actor-id";

type Services = State<Arc<LedgerServices>>;

pub fn ledger_router(services: Arc<LedgerServices>) -> Router {
    Router::new()
        .route(
            "/api/v1/inventory/:provider/:service_code/import",
            post(import_handler),
        )
        .route(
            "/api/v1/inventory/:provider/:service_code/assignments",
            post(assign_handler),
        )
        .route(
            "/api/v1/inventory/:provider/:service_code/lists/:list_id/assignments",
            post(assign_list_handler),
        )
        .route(
            "/api/v1/inventory/:provider/:service_code/reassignments",
            post(reassign_handler),
        )
        .route(
            "/api/v1/inventory/:provider/:service_code/available",
            get(available_handler),
        )
        .route("/api/v1/inventory/:provider/count", get(count_handler))
        .route(
            "/api/v1/inventory/:provider/resources/:code",
            get(resource_handler),
        )
        .route(
            "/api/v1/inventory/:provider/resources/:code/status",
            put(override_handler),
        )
        .route(
            "/api/v1/assignments/:assignment_id/redeem",
            post(redeem_handler),
        )
        .route("/api/v1/assignments/:assignment_id/sent", post(sent_handler))
        .route(
            "/api/v1/candidates/:candidate_id/assignments",
            get(history_handler),
        )
        .route("/api/v1/expiry/due", get(due_handler))
        .route("/api/v1/expiry/sweep", post(sweep_handler))
        .route("/api/v1/lifecycle/stats", get(stats_handler))
        .with_state(services)
}

#[derive(Debug, Deserialize)]
pub(crate) struct CandidateRequest {
    candidate_id: CandidateId,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatusRequest {
    status: ResourceStatus,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CountQuery {
    service_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ExpiryQuery {
    provider: Option<String>,
    now: Option<DateTime<Utc>>,
}

impl ExpiryQuery {
    fn provider(&self) -> Option<ProviderId> {
        self.provider.as_deref().map(ProviderId::new)
    }

    fn now(&self) -> DateTime<Utc> {
        self.now.unwrap_or_else(Utc::now)
    }

    /// Sweeps may look back but never ahead of the server clock.
    fn sweep_cutoff(&self) -> DateTime<Utc> {
        self.now().min(Utc::now())
    }
}

fn actor(headers: &HeaderMap) -> Option<ActorId> {
    headers
        .get(ACTOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| ActorId(value.to_string()))
}

/// Runs ledger work that can wait on a row lock on the blocking pool.
async fn blocking<T, F>(work: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await?
}

fn service_key(provider: &str, service_code: &str) -> Result<ServiceKey, AppError> {
    let service_code = service_code
        .parse::<ServiceCode>()
        .map_err(|err| LedgerError::NoSuchObject(err.to_string()))?;
    Ok(ServiceKey::new(provider, service_code))
}

async fn import_handler(
    State(services): Services,
    Path((provider, service_code)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    services.ledger.resolve_actor(actor(&headers).as_ref())?;
    let key = service_key(&provider, &service_code)?;
    let summary = services
        .import(&key, body.as_ref())
        .ok_or_else(|| LedgerError::NoSuchObject(format!("no service registered for {key}")))??;

    let payload = json!({
        "message": summary.message(),
        "summary": summary,
    });
    Ok((StatusCode::OK, Json(payload)).into_response())
}

async fn assign_handler(
    State(services): Services,
    Path((provider, service_code)): Path<(String, String)>,
    headers: HeaderMap,
    Json(request): Json<CandidateRequest>,
) -> Result<Response, AppError> {
    let key = service_key(&provider, &service_code)?;
    let assignment = services.ledger.assign_to_candidate(
        &key,
        &request.candidate_id,
        actor(&headers).as_ref(),
    )?;
    Ok((StatusCode::CREATED, Json(assignment)).into_response())
}

async fn assign_list_handler(
    State(services): Services,
    Path((provider, service_code, list_id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let key = service_key(&provider, &service_code)?;
    let outcomes = services.ledger.assign_to_list(
        &key,
        &CandidateListId(list_id),
        actor(&headers).as_ref(),
    )?;
    let views: Vec<MemberOutcomeView> = outcomes.iter().map(MemberOutcomeView::from).collect();
    Ok((StatusCode::OK, Json(views)).into_response())
}

async fn reassign_handler(
    State(services): Services,
    Path((provider, service_code)): Path<(String, String)>,
    headers: HeaderMap,
    Json(request): Json<CandidateRequest>,
) -> Result<Response, AppError> {
    let key = service_key(&provider, &service_code)?;
    let actor = actor(&headers);
    let assignment = blocking(move || {
        Ok(services
            .ledger
            .reassign(&key, &request.candidate_id, actor.as_ref())?)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(assignment)).into_response())
}

async fn available_handler(
    State(services): Services,
    Path((provider, service_code)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let key = service_key(&provider, &service_code)?;
    if services.binding(&key).is_none() {
        return Err(LedgerError::NoSuchObject(format!("no service registered for {key}")).into());
    }
    let resources = services.queries.available(&key)?;
    Ok((StatusCode::OK, Json(resources)).into_response())
}

async fn count_handler(
    State(services): Services,
    Path(provider): Path<String>,
    Query(query): Query<CountQuery>,
) -> Result<Response, AppError> {
    let provider = ProviderId::new(provider);
    let service_code = match query.service_code.as_deref() {
        Some(raw) => Some(service_key(provider.as_str(), raw)?.service_code),
        None => None,
    };
    if services.directory.service_codes(&provider).is_none() {
        return Err(LedgerError::NoSuchObject(format!("provider {provider} not found")).into());
    }

    let available = services.queries.available_count(&provider, service_code)?;
    let payload = json!({
        "provider": provider,
        "service_code": service_code,
        "available": available,
    });
    Ok((StatusCode::OK, Json(payload)).into_response())
}

async fn resource_handler(
    State(services): Services,
    Path((provider, code)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let provider = ProviderId::new(provider);
    let resource = services
        .queries
        .resource_by_code(&provider, &code)?
        .ok_or_else(|| LedgerError::NoSuchObject(format!("resource {code} not found")))?;
    Ok((StatusCode::OK, Json(resource)).into_response())
}

async fn override_handler(
    State(services): Services,
    Path((provider, code)): Path<(String, String)>,
    headers: HeaderMap,
    Json(request): Json<StatusRequest>,
) -> Result<Response, AppError> {
    let actor = actor(&headers);
    let resource = blocking(move || {
        Ok(services.ledger.override_status(
            &ProviderId::new(provider),
            &code,
            request.status,
            actor.as_ref(),
        )?)
    })
    .await?;
    Ok((StatusCode::OK, Json(resource)).into_response())
}

async fn redeem_handler(
    State(services): Services,
    Path(assignment_id): Path<u64>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let actor = actor(&headers);
    let assignment = blocking(move || {
        Ok(services
            .ledger
            .redeem(AssignmentId(assignment_id), actor.as_ref())?)
    })
    .await?;
    Ok((StatusCode::OK, Json(assignment)).into_response())
}

async fn sent_handler(
    State(services): Services,
    Path(assignment_id): Path<u64>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let actor = actor(&headers);
    let resource = blocking(move || {
        Ok(services
            .ledger
            .mark_sent(AssignmentId(assignment_id), actor.as_ref())?)
    })
    .await?;
    Ok((StatusCode::OK, Json(resource)).into_response())
}

async fn history_handler(
    State(services): Services,
    Path(candidate_id): Path<String>,
) -> Result<Response, AppError> {
    let history = services
        .queries
        .list_for_candidate(&CandidateId(candidate_id))?;
    Ok((StatusCode::OK, Json(history)).into_response())
}

async fn due_handler(
    State(services): Services,
    Query(query): Query<ExpiryQuery>,
) -> Result<Response, AppError> {
    let provider = query.provider();
    let due = services
        .sweeper
        .due_for_expiry(query.now(), provider.as_ref())?;
    Ok((StatusCode::OK, Json(due)).into_response())
}

async fn sweep_handler(
    State(services): Services,
    Query(query): Query<ExpiryQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    services.ledger.resolve_actor(actor(&headers).as_ref())?;
    let provider = query.provider();
    let cutoff = query.sweep_cutoff();
    let report = blocking(move || Ok(services.sweeper.sweep(cutoff, provider.as_ref())?)).await?;
    Ok((StatusCode::OK, Json(report)).into_response())
}

async fn stats_handler(State(services): Services) -> Response {
    (StatusCode::OK, Json(services.orchestrator.stats())).into_response()
}
