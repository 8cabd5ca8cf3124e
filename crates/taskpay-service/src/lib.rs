#![deny(unsafe_code)]

use axum::extract::{FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use taskpay_core::{
    Amount, Campaign, CampaignDraft, CampaignStatus, DocumentStorageConfig, Keyed, LaunchReport,
    LedgerEngine, LedgerEngineConfig, LedgerError, MoneyRequest, MoneyRequestKind, Resolution,
    RoleAuthorizer, TransferOutcome, Wallet, WorkSubmission,
};
use thiserror::Error;
use tracing::{error, info};

/// Header carrying the acting user id. Identity issuance happens upstream.
pub const ACTOR_HEADER: &str = "x-actor-id";

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub storage: DocumentStorageConfig,
    pub cache_ttl_secs: u64,
    pub admins: Vec<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            storage: DocumentStorageConfig::Memory,
            cache_ttl_secs: LedgerEngineConfig::default().cache_ttl_secs,
            admins: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct ServiceState {
    pub engine: Arc<LedgerEngine>,
}

impl ServiceState {
    pub async fn bootstrap(config: ServiceConfig) -> Result<Self, ServiceError> {
        let ServiceConfig {
            storage,
            cache_ttl_secs,
            admins,
        } = config;
        let authorizer = Arc::new(RoleAuthorizer::with_admins(admins));
        let engine_config = LedgerEngineConfig {
            storage,
            cache_ttl_secs,
            ..LedgerEngineConfig::default()
        };
        let engine = LedgerEngine::bootstrap(engine_config, authorizer).await?;
        info!(backend = engine.storage_backend(), "taskpay engine bootstrapped");

        Ok(Self {
            engine: Arc::new(engine),
        })
    }
}

pub fn build_router(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/wallets/:uid", get(get_wallet).post(open_wallet))
        .route("/v1/campaigns", post(launch_campaign))
        .route("/v1/campaigns/:id/deduct", post(deduct_budget))
        .route("/v1/campaigns/:id/status", post(set_campaign_status))
        .route("/v1/campaigns/:id/apply", post(apply_to_campaign))
        .route("/v1/works/:uid/:work_id/approve", post(approve_work))
        .route("/v1/works/:uid/:work_id/reject", post(reject_work))
        .route("/v1/works/:uid/:work_id/resubmit", post(resubmit_work))
        .route("/v1/requests/add-money", post(request_add_money))
        .route("/v1/requests/withdrawals", post(request_withdrawal))
        .route("/v1/requests/:kind/:id/resolve", post(resolve_request))
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("core engine error: {0}")]
    Core(#[from] LedgerError),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Http { status: StatusCode, message: String },
    #[error(transparent)]
    Core(#[from] LedgerError),
}

impl ApiError {
    fn unauthenticated(message: impl Into<String>) -> Self {
        Self::Http {
            status: StatusCode::UNAUTHORIZED,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::Http {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Http { status, message } => {
                (status, Json(serde_json::json!({ "error": message }))).into_response()
            }
            ApiError::Core(err) => {
                let status = match &err {
                    LedgerError::Unauthorized { .. } => StatusCode::FORBIDDEN,
                    LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
                    LedgerError::PreconditionFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    LedgerError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                    LedgerError::AbortedTransaction(_) => StatusCode::CONFLICT,
                    LedgerError::InfrastructureFailure(_)
                    | LedgerError::CompensationFailed { .. } => {
                        error!(error = %err, "ledger operation failed");
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (
                    status,
                    Json(serde_json::json!({
                        "error": err.to_string(),
                        "kind": err.kind(),
                    })),
                )
                    .into_response()
            }
        }
    }
}

/// Acting user id taken from [`ACTOR_HEADER`].
#[derive(Debug, Clone)]
pub struct Actor(pub String);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Actor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let actor = parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ApiError::unauthenticated(format!("missing {ACTOR_HEADER} header")))?;
        Ok(Self(actor.to_string()))
    }
}

/// Transfer outcome with the boolean success flag callers key off.
#[derive(Debug, Clone, Serialize)]
pub struct TransferResponse {
    pub success: bool,
    #[serde(flatten)]
    pub outcome: TransferOutcome,
}

impl From<TransferOutcome> for TransferResponse {
    fn from(outcome: TransferOutcome) -> Self {
        Self {
            success: outcome.is_success(),
            outcome,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    storage_backend: &'static str,
}

async fn health(State(state): State<ServiceState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "taskpay-service",
        storage_backend: state.engine.storage_backend(),
    })
}

async fn open_wallet(
    Path(uid): Path<String>,
    State(state): State<ServiceState>,
    Actor(actor): Actor,
) -> Result<Json<Wallet>, ApiError> {
    Ok(Json(state.engine.open_wallet(&actor, &uid).await?))
}

async fn get_wallet(
    Path(uid): Path<String>,
    State(state): State<ServiceState>,
    Actor(actor): Actor,
) -> Result<Json<Wallet>, ApiError> {
    Ok(Json(state.engine.wallet(&actor, &uid).await?))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LaunchCampaignRequest {
    creator_id: String,
    title: String,
    reward_per_worker: Amount,
    total_workers: u32,
}

async fn launch_campaign(
    State(state): State<ServiceState>,
    Actor(actor): Actor,
    Json(request): Json<LaunchCampaignRequest>,
) -> Result<Json<LaunchReport>, ApiError> {
    let draft = CampaignDraft::new(
        request.title,
        request.reward_per_worker,
        request.total_workers,
    );
    Ok(Json(
        state
            .engine
            .launch_campaign(&actor, &request.creator_id, draft)
            .await?,
    ))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeductRequest {
    user_id: String,
    amount: Amount,
}

async fn deduct_budget(
    Path(campaign_id): Path<String>,
    State(state): State<ServiceState>,
    Actor(actor): Actor,
    Json(request): Json<DeductRequest>,
) -> Result<Json<TransferResponse>, ApiError> {
    let outcome = state
        .engine
        .deduct_campaign_budget(&actor, &campaign_id, request.amount, &request.user_id)
        .await?;
    Ok(Json(outcome.into()))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusRequest {
    status: CampaignStatus,
}

async fn set_campaign_status(
    Path(campaign_id): Path<String>,
    State(state): State<ServiceState>,
    Actor(actor): Actor,
    Json(request): Json<StatusRequest>,
) -> Result<Json<Campaign>, ApiError> {
    Ok(Json(
        state
            .engine
            .set_campaign_status(&actor, &campaign_id, request.status)
            .await?,
    ))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApplyRequest {
    user_id: String,
    proof_url: String,
}

async fn apply_to_campaign(
    Path(campaign_id): Path<String>,
    State(state): State<ServiceState>,
    Actor(actor): Actor,
    Json(request): Json<ApplyRequest>,
) -> Result<Json<Keyed<WorkSubmission>>, ApiError> {
    Ok(Json(
        state
            .engine
            .apply_to_campaign(&actor, &request.user_id, &campaign_id, &request.proof_url)
            .await?,
    ))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApproveWorkRequest {
    campaign_id: String,
    reward: Amount,
}

async fn approve_work(
    Path((uid, work_id)): Path<(String, String)>,
    State(state): State<ServiceState>,
    Actor(actor): Actor,
    Json(request): Json<ApproveWorkRequest>,
) -> Result<Json<TransferResponse>, ApiError> {
    let outcome = state
        .engine
        .approve_work(&actor, &work_id, &uid, &request.campaign_id, request.reward)
        .await?;
    Ok(Json(outcome.into()))
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RejectWorkRequest {
    note: Option<String>,
}

async fn reject_work(
    Path((uid, work_id)): Path<(String, String)>,
    State(state): State<ServiceState>,
    Actor(actor): Actor,
    Json(request): Json<RejectWorkRequest>,
) -> Result<Json<WorkSubmission>, ApiError> {
    Ok(Json(
        state
            .engine
            .reject_work(&actor, &work_id, &uid, request.note)
            .await?,
    ))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResubmitWorkRequest {
    proof_url: String,
}

async fn resubmit_work(
    Path((uid, work_id)): Path<(String, String)>,
    State(state): State<ServiceState>,
    Actor(actor): Actor,
    Json(request): Json<ResubmitWorkRequest>,
) -> Result<Json<WorkSubmission>, ApiError> {
    Ok(Json(
        state
            .engine
            .resubmit_work(&actor, &work_id, &uid, &request.proof_url)
            .await?,
    ))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddMoneyRequest {
    user_id: String,
    amount: Amount,
    upi_transaction_id: String,
}

async fn request_add_money(
    State(state): State<ServiceState>,
    Actor(actor): Actor,
    Json(request): Json<AddMoneyRequest>,
) -> Result<Json<Keyed<MoneyRequest>>, ApiError> {
    Ok(Json(
        state
            .engine
            .request_add_money(
                &actor,
                &request.user_id,
                request.amount,
                &request.upi_transaction_id,
            )
            .await?,
    ))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WithdrawalRequest {
    user_id: String,
    amount: Amount,
    upi_id: String,
}

async fn request_withdrawal(
    State(state): State<ServiceState>,
    Actor(actor): Actor,
    Json(request): Json<WithdrawalRequest>,
) -> Result<Json<Keyed<MoneyRequest>>, ApiError> {
    Ok(Json(
        state
            .engine
            .request_withdrawal(&actor, &request.user_id, request.amount, &request.upi_id)
            .await?,
    ))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResolveRequest {
    user_id: String,
    amount: Amount,
    resolution: Resolution,
}

async fn resolve_request(
    Path((kind, request_id)): Path<(String, String)>,
    State(state): State<ServiceState>,
    Actor(actor): Actor,
    Json(request): Json<ResolveRequest>,
) -> Result<Json<TransferResponse>, ApiError> {
    let kind: MoneyRequestKind = kind.parse().map_err(ApiError::bad_request)?;
    let outcome = state
        .engine
        .process_money_request(
            &actor,
            &request_id,
            kind,
            &request.user_id,
            request.amount,
            request.resolution,
        )
        .await?;
    Ok(Json(outcome.into()))
}
